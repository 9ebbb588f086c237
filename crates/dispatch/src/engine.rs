//! Wave-by-wave campaign execution.
//!
//! One dispatch invocation: validate the campaign, persist the message
//! body, plan the waves, then drive every (account, recipient) job to a
//! terminal state. Jobs inside a wave run concurrently, one task per
//! account, each suspending on its own throttle or flood backoff; the wave
//! boundary is a join point, so an account never has more than one
//! in-flight job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use waveline_core::config::DispatchConfig;
use waveline_core::error::{DispatchError, StoreError, WavelineResult};
use waveline_core::types::{AccountId, MessageId, Recipient, SendStatus};
use waveline_store::Store;
use waveline_transport::{RecipientAddress, SendError};

use crate::rate_limit;
use crate::registry::AccountRegistry;
use crate::report::{DispatchReport, JobOutcome, JobStatus};
use crate::wave;

/// Orchestrates campaigns over a store, a registry of live transports, and
/// the per-account throttle.
pub struct DispatchEngine {
    store: Arc<dyn Store>,
    registry: Arc<AccountRegistry>,
    flood_wait_cap: Duration,
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn Store>, registry: Arc<AccountRegistry>) -> Self {
        Self {
            store,
            registry,
            flood_wait_cap: Duration::from_secs(DispatchConfig::default().flood_wait_cap_secs),
        }
    }

    pub fn with_config(mut self, config: &DispatchConfig) -> Self {
        self.flood_wait_cap = Duration::from_secs(config.flood_wait_cap_secs);
        self
    }

    /// Run a campaign to completion with a token nobody cancels.
    pub async fn dispatch(
        &self,
        text: &str,
        recipients: &[Recipient],
    ) -> WavelineResult<DispatchReport> {
        self.dispatch_cancellable(text, recipients, CancellationToken::new())
            .await
    }

    /// Run a campaign, observing `cancel` at every wave and wait boundary.
    /// In-flight provider calls are allowed to complete; no further waves
    /// start once the token is cancelled.
    pub async fn dispatch_cancellable(
        &self,
        text: &str,
        recipients: &[Recipient],
        cancel: CancellationToken,
    ) -> WavelineResult<DispatchReport> {
        if text.trim().is_empty() {
            return Err(DispatchError::EmptyMessage);
        }
        if recipients.is_empty() {
            return Err(DispatchError::NoRecipients);
        }

        let accounts = self.registry.available();
        if accounts.is_empty() {
            return Err(DispatchError::NoAvailableSenders);
        }

        let message = self.store.create_message(text)?;
        let plan = wave::plan(&accounts, recipients);
        let dispatch_id = Uuid::new_v4();

        info!(
            %dispatch_id,
            message_id = message.id,
            accounts = accounts.len(),
            recipients = recipients.len(),
            waves = plan.max_waves(),
            "Dispatch started"
        );

        let mut report = DispatchReport::new(dispatch_id, message.id);

        for wave_index in 0..plan.max_waves() {
            if cancel.is_cancelled() {
                info!(%dispatch_id, wave = wave_index, "Cancellation observed, no further waves");
                report.cancelled = true;
                break;
            }
            report.waves_run += 1;

            let mut handles: Vec<JoinHandle<Result<JobOutcome, StoreError>>> = Vec::new();
            for (account_id, recipient) in plan.wave(wave_index) {
                let job = JobContext {
                    dispatch_id,
                    wave: wave_index,
                    account_id,
                    recipient: recipient.clone(),
                    message_id: message.id,
                    text: message.text.clone(),
                    store: Arc::clone(&self.store),
                    registry: Arc::clone(&self.registry),
                    cancel: cancel.clone(),
                    flood_wait_cap: self.flood_wait_cap,
                };
                handles.push(tokio::spawn(job.run()));
            }

            // Wave boundary: every job reaches a terminal state before the
            // next wave starts.
            let mut storage_failure: Option<StoreError> = None;
            for handle in handles {
                match handle.await {
                    Ok(Ok(outcome)) => report.record(outcome),
                    Ok(Err(error)) => storage_failure = Some(error),
                    Err(join_error) => {
                        warn!(%dispatch_id, error = %join_error, "Wave job panicked");
                    }
                }
            }

            // A storage failure aborts the campaign, but only after the
            // wave has joined so in-flight provider calls complete.
            if let Some(error) = storage_failure {
                warn!(%dispatch_id, %error, "Storage failure, aborting campaign");
                return Err(DispatchError::Persistence(error));
            }
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
        }
        report.finished_at = Utc::now();

        info!(
            %dispatch_id,
            success = report.success_count,
            failed = report.fail_count,
            skipped = report.skipped_count,
            waves_run = report.waves_run,
            cancelled = report.cancelled,
            "Dispatch finished"
        );

        Ok(report)
    }
}

/// Everything one wave job needs, owned so the task is self-contained.
struct JobContext {
    dispatch_id: Uuid,
    wave: usize,
    account_id: AccountId,
    recipient: Recipient,
    message_id: MessageId,
    text: String,
    store: Arc<dyn Store>,
    registry: Arc<AccountRegistry>,
    cancel: CancellationToken,
    flood_wait_cap: Duration,
}

impl JobContext {
    /// Drive one (account, recipient) job to a terminal state. `Err` is
    /// reserved for storage failures, which abort the whole campaign.
    async fn run(self) -> Result<JobOutcome, StoreError> {
        // Re-resolve the account; its delay or handle may have changed since
        // planning.
        let account = match self.store.account(self.account_id)? {
            Some(account) => account,
            None => {
                warn!(
                    account_id = self.account_id,
                    recipient_id = self.recipient.id,
                    "Account record vanished, counting job as failed"
                );
                metrics::counter!("dispatch.jobs_failed").increment(1);
                return Ok(self.outcome(
                    JobStatus::Failed,
                    None,
                    Some(format!("account {} not found", self.account_id)),
                    0,
                    false,
                ));
            }
        };

        let handle = match self.registry.get(self.account_id) {
            Some(handle) if handle.is_send_ready() => handle,
            _ => {
                debug!(
                    account_id = self.account_id,
                    recipient_id = self.recipient.id,
                    "Account no longer send-ready, dropping job"
                );
                metrics::counter!("dispatch.jobs_skipped").increment(1);
                return Ok(self.outcome(
                    JobStatus::Skipped,
                    None,
                    Some("account unavailable".to_string()),
                    0,
                    false,
                ));
            }
        };

        // Throttle gate. The wait is trusted to be sufficient, wall-clock
        // time only moves forward; no re-check afterwards.
        let verdict = rate_limit::check(&account);
        let throttle_wait_secs = verdict.wait_secs;
        if !verdict.can_send {
            debug!(
                account_id = account.id,
                wait_secs = verdict.wait_secs,
                "Throttled, waiting"
            );
            metrics::histogram!("dispatch.throttle_wait_seconds")
                .record(verdict.wait_secs as f64);
            if !self
                .sleep_unless_cancelled(Duration::from_secs(verdict.wait_secs))
                .await
            {
                debug!(account_id = account.id, "Cancelled during throttle wait");
                metrics::counter!("dispatch.jobs_skipped").increment(1);
                return Ok(self.outcome(
                    JobStatus::Skipped,
                    None,
                    Some("cancelled before send".to_string()),
                    throttle_wait_secs,
                    false,
                ));
            }
        }

        let address = match RecipientAddress::parse(&self.recipient.identifier) {
            Ok(address) => address,
            Err(error) => {
                self.store.create_send_record(
                    account.id,
                    self.recipient.id,
                    self.message_id,
                    SendStatus::Failed,
                )?;
                metrics::counter!("dispatch.jobs_failed").increment(1);
                return Ok(self.outcome(
                    JobStatus::Failed,
                    None,
                    Some(error.to_string()),
                    throttle_wait_secs,
                    false,
                ));
            }
        };

        // Provider call, with exactly one bounded retry on flood control.
        let mut retried_after_flood = false;
        let first_attempt = handle.send(&address, &self.text).await;
        let final_result = match first_attempt {
            Err(SendError::FloodControl { retry_after }) => {
                let backoff = retry_after.min(self.flood_wait_cap);
                info!(
                    account_id = account.id,
                    recipient_id = self.recipient.id,
                    retry_after_secs = retry_after.as_secs(),
                    backoff_secs = backoff.as_secs(),
                    "Flood control, backing off before single retry"
                );
                metrics::counter!("dispatch.flood_retries").increment(1);
                if self.sleep_unless_cancelled(backoff).await {
                    retried_after_flood = true;
                    handle.send(&address, &self.text).await
                } else {
                    debug!(account_id = account.id, "Cancelled during flood backoff");
                    Err(SendError::FloodControl { retry_after })
                }
            }
            other => other,
        };

        // Terminal record. Only a confirmed success advances the account's
        // throttle clock.
        match final_result {
            Ok(receipt) => {
                let completed_at = Utc::now();
                self.store.create_send_record(
                    account.id,
                    self.recipient.id,
                    self.message_id,
                    SendStatus::Sent,
                )?;
                if let Err(error) = self.store.update_account_last_sent(account.id, completed_at)
                {
                    match error {
                        StoreError::NotFound(_) => {
                            // Account deleted right after the send; its
                            // throttle state is moot.
                            warn!(account_id = account.id, %error, "Account gone before last_sent update");
                        }
                        other => return Err(other),
                    }
                }
                info!(
                    dispatch_id = %self.dispatch_id,
                    account_id = account.id,
                    recipient_id = self.recipient.id,
                    wave = self.wave,
                    provider_message_id = receipt.provider_message_id,
                    retried = retried_after_flood,
                    "Message sent"
                );
                metrics::counter!("dispatch.jobs_sent").increment(1);
                Ok(self.outcome(
                    JobStatus::Sent,
                    Some(receipt.provider_message_id),
                    None,
                    throttle_wait_secs,
                    retried_after_flood,
                ))
            }
            Err(error) => {
                self.store.create_send_record(
                    account.id,
                    self.recipient.id,
                    self.message_id,
                    SendStatus::Failed,
                )?;
                info!(
                    dispatch_id = %self.dispatch_id,
                    account_id = account.id,
                    recipient_id = self.recipient.id,
                    wave = self.wave,
                    %error,
                    retried = retried_after_flood,
                    "Send failed"
                );
                metrics::counter!("dispatch.jobs_failed").increment(1);
                Ok(self.outcome(
                    JobStatus::Failed,
                    None,
                    Some(error.to_string()),
                    throttle_wait_secs,
                    retried_after_flood,
                ))
            }
        }
    }

    /// True when the full duration elapsed, false when cancellation won.
    async fn sleep_unless_cancelled(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return true;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn outcome(
        &self,
        status: JobStatus,
        provider_message_id: Option<i64>,
        error: Option<String>,
        throttle_wait_secs: u64,
        retried_after_flood: bool,
    ) -> JobOutcome {
        JobOutcome {
            wave: self.wave,
            account_id: self.account_id,
            recipient_id: self.recipient.id,
            status,
            provider_message_id,
            error,
            throttle_wait_secs,
            retried_after_flood,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::DateTime;
    use waveline_core::types::{Account, NewAccount};
    use waveline_store::MemoryStore;
    use waveline_transport::{
        MessageTransport, ProviderReceipt, ScriptedTransport, TransportError,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<AccountRegistry>,
        transports: Vec<Arc<ScriptedTransport>>,
        accounts: Vec<Account>,
        engine: DispatchEngine,
    }

    fn fixture(account_count: usize, delay_secs: u32) -> Fixture {
        let store = Arc::new(MemoryStore::default());
        let registry = Arc::new(AccountRegistry::new());
        let mut transports = Vec::new();
        let mut accounts = Vec::new();

        for i in 0..account_count {
            let account = store
                .create_account(NewAccount {
                    label: format!("+1555000{}", i + 1),
                    credentials: serde_json::json!({"session": format!("s{}", i + 1)}),
                    delay_secs: Some(delay_secs),
                })
                .unwrap();
            let transport = Arc::new(ScriptedTransport::new());
            registry.register(account.id, transport.clone());
            transports.push(transport);
            accounts.push(account);
        }

        let engine = DispatchEngine::new(store.clone(), registry.clone());
        Fixture {
            store,
            registry,
            transports,
            accounts,
            engine,
        }
    }

    fn recipients(n: usize) -> Vec<Recipient> {
        (1..=n as i64)
            .map(|id| Recipient {
                id,
                identifier: format!("@user{}", id),
            })
            .collect()
    }

    fn sent_addresses(transport: &ScriptedTransport) -> Vec<String> {
        transport.calls().iter().map(|c| c.address.clone()).collect()
    }

    fn last_sent_of(store: &MemoryStore, account_id: AccountId) -> Option<String> {
        Store::account(store, account_id).unwrap().unwrap().last_sent
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_robin_across_two_accounts() {
        let f = fixture(2, 1);
        let report = f.engine.dispatch("hello", &recipients(5)).await.unwrap();

        assert_eq!(report.success_count, 5);
        assert_eq!(report.fail_count, 0);
        assert_eq!(report.waves_run, 3);
        assert_eq!(report.outcomes.len(), 5);
        assert!(!report.cancelled);

        assert_eq!(
            sent_addresses(&f.transports[0]),
            vec!["@user1", "@user3", "@user5"]
        );
        assert_eq!(sent_addresses(&f.transports[1]), vec!["@user2", "@user4"]);

        let history = f.store.send_history().unwrap();
        assert_eq!(history.len(), 5);
        assert!(history.iter().all(|r| r.status == SendStatus::Sent));
        assert!(history.iter().all(|r| r.message_id == report.message_id));
    }

    #[tokio::test]
    async fn test_no_available_senders_is_fatal_and_side_effect_free() {
        let f = fixture(1, 1);
        f.transports[0].set_ready(false);

        let err = f.engine.dispatch("hello", &recipients(2)).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoAvailableSenders));
        assert!(f.store.send_history().unwrap().is_empty());
        assert_eq!(f.transports[0].call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_inputs_are_rejected() {
        let f = fixture(1, 1);

        assert!(matches!(
            f.engine.dispatch("   ", &recipients(1)).await.unwrap_err(),
            DispatchError::EmptyMessage
        ));
        assert!(matches!(
            f.engine.dispatch("hello", &[]).await.unwrap_err(),
            DispatchError::NoRecipients
        ));
        assert!(f.store.send_history().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_leaves_last_sent_untouched() {
        let f = fixture(1, 5);
        f.transports[0].push_error(SendError::Generic("provider down".to_string()));

        let report = f.engine.dispatch("hello", &recipients(1)).await.unwrap();
        assert_eq!(report.fail_count, 1);
        assert_eq!(report.outcomes[0].status, JobStatus::Failed);
        assert!(last_sent_of(&f.store, f.accounts[0].id).is_none());

        let history = f.store.send_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SendStatus::Failed);
        // Generic failures are not retried.
        assert_eq!(f.transports[0].call_count(), 1);
    }

    #[tokio::test]
    async fn test_successful_send_advances_last_sent() {
        let f = fixture(1, 5);
        let before = Utc::now();

        let report = f.engine.dispatch("hello", &recipients(1)).await.unwrap();
        assert_eq!(report.success_count, 1);

        let stored = last_sent_of(&f.store, f.accounts[0].id).unwrap();
        let stamped = DateTime::parse_from_rfc3339(&stored).unwrap();
        assert!(stamped.with_timezone(&Utc) >= before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_retry_succeeds_once() {
        let f = fixture(1, 1);
        f.transports[0].push_error(SendError::FloodControl {
            retry_after: Duration::from_secs(3),
        });

        let started = tokio::time::Instant::now();
        let before = Utc::now();
        let report = f.engine.dispatch("hello", &recipients(1)).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(report.success_count, 1);
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, JobStatus::Sent);
        assert!(outcome.retried_after_flood);
        assert_eq!(f.transports[0].call_count(), 2);

        // Exactly one terminal record, and the throttle clock reflects the
        // retry completion, not the first attempt.
        let history = f.store.send_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SendStatus::Sent);
        let stored = last_sent_of(&f.store, f.accounts[0].id).unwrap();
        let stamped = DateTime::parse_from_rfc3339(&stored).unwrap();
        assert!(stamped.with_timezone(&Utc) >= before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_retry_fails_terminally() {
        let f = fixture(1, 1);
        f.transports[0].push_error(SendError::FloodControl {
            retry_after: Duration::from_secs(2),
        });
        f.transports[0].push_error(SendError::Generic("still throttled".to_string()));

        let report = f.engine.dispatch("hello", &recipients(1)).await.unwrap();

        assert_eq!(report.fail_count, 1);
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.retried_after_flood);
        assert_eq!(f.transports[0].call_count(), 2);
        assert!(last_sent_of(&f.store, f.accounts[0].id).is_none());

        let history = f.store.send_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SendStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_backoff_is_capped() {
        let f = fixture(1, 1);
        let engine = DispatchEngine::new(f.store.clone(), f.registry.clone()).with_config(
            &DispatchConfig {
                flood_wait_cap_secs: 5,
            },
        );
        f.transports[0].push_error(SendError::FloodControl {
            retry_after: Duration::from_secs(600),
        });

        let started = tokio::time::Instant::now();
        let report = engine.dispatch("hello", &recipients(1)).await.unwrap();

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5));
        assert!(waited < Duration::from_secs(600));
        assert_eq!(report.success_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_wait_is_ceiled_and_applied() {
        let f = fixture(1, 10);
        f.store
            .update_account_last_sent(f.accounts[0].id, Utc::now() - chrono::Duration::seconds(3))
            .unwrap();

        let started = tokio::time::Instant::now();
        let report = f.engine.dispatch("hello", &recipients(1)).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(7));
        assert_eq!(report.success_count, 1);
        assert_eq!(report.outcomes[0].throttle_wait_secs, 7);
    }

    #[tokio::test]
    async fn test_invalid_recipient_identifier_fails_without_provider_call() {
        let f = fixture(1, 1);
        let bad = vec![Recipient {
            id: 1,
            identifier: "---".to_string(),
        }];

        let report = f.engine.dispatch("hello", &bad).await.unwrap();
        assert_eq!(report.fail_count, 1);
        assert_eq!(f.transports[0].call_count(), 0);

        let history = f.store.send_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SendStatus::Failed);
    }

    #[tokio::test]
    async fn test_pre_cancelled_dispatch_runs_no_waves() {
        let f = fixture(2, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = f
            .engine
            .dispatch_cancellable("hello", &recipients(4), cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.waves_run, 0);
        assert!(report.outcomes.is_empty());
        assert!(f.store.send_history().unwrap().is_empty());
    }

    /// Transport that cancels the campaign from inside its first send.
    struct CancellingTransport {
        token: CancellationToken,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl MessageTransport for CancellingTransport {
        fn is_send_ready(&self) -> bool {
            true
        }

        async fn send(
            &self,
            _address: &RecipientAddress,
            _text: &str,
        ) -> Result<ProviderReceipt, SendError> {
            *self.calls.lock().unwrap() += 1;
            self.token.cancel();
            Ok(ProviderReceipt {
                provider_message_id: 1,
                sent_at: Utc::now(),
            })
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancellation_mid_wave_stops_before_next_wave() {
        let store = Arc::new(MemoryStore::default());
        let registry = Arc::new(AccountRegistry::new());
        let cancel = CancellationToken::new();

        let a = store
            .create_account(NewAccount {
                label: "+15550001".to_string(),
                credentials: serde_json::json!({}),
                delay_secs: Some(1),
            })
            .unwrap();
        let b = store
            .create_account(NewAccount {
                label: "+15550002".to_string(),
                credentials: serde_json::json!({}),
                delay_secs: Some(1),
            })
            .unwrap();

        let cancelling = Arc::new(CancellingTransport {
            token: cancel.clone(),
            calls: Mutex::new(0),
        });
        let scripted = Arc::new(ScriptedTransport::new());
        registry.register(a.id, cancelling.clone());
        registry.register(b.id, scripted.clone());

        let engine = DispatchEngine::new(store.clone(), registry.clone());
        let report = engine
            .dispatch_cancellable("hello", &recipients(4), cancel)
            .await
            .unwrap();

        // Wave 0 completes (both sends were in flight), wave 1 never starts.
        assert!(report.cancelled);
        assert_eq!(report.waves_run, 1);
        assert_eq!(report.success_count, 2);
        assert_eq!(*cancelling.calls.lock().unwrap(), 1);
        assert_eq!(scripted.call_count(), 1);
        assert_eq!(store.send_history().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_throttle_wait_skips_job() {
        let f = fixture(1, 30);
        f.store
            .update_account_last_sent(f.accounts[0].id, Utc::now())
            .unwrap();

        let cancel = CancellationToken::new();
        let engine = DispatchEngine::new(f.store.clone(), f.registry.clone());
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            engine
                .dispatch_cancellable("hello", &recipients(1), task_cancel)
                .await
        });

        // Let the job enter its ~30s throttle wait, then cancel.
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let report = task.await.unwrap().unwrap();

        assert!(report.cancelled);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.outcomes[0].status, JobStatus::Skipped);
        assert_eq!(f.transports[0].call_count(), 0);
        assert!(f.store.send_history().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_flood_backoff_records_failure() {
        let f = fixture(1, 1);
        f.transports[0].push_error(SendError::FloodControl {
            retry_after: Duration::from_secs(60),
        });

        let cancel = CancellationToken::new();
        let engine = DispatchEngine::new(f.store.clone(), f.registry.clone());
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            engine
                .dispatch_cancellable("hello", &recipients(1), task_cancel)
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let report = task.await.unwrap().unwrap();

        // The failed attempt is recorded; the retry never happens.
        assert!(report.cancelled);
        assert_eq!(report.fail_count, 1);
        assert!(!report.outcomes[0].retried_after_flood);
        assert_eq!(f.transports[0].call_count(), 1);

        let history = f.store.send_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SendStatus::Failed);
        assert!(last_sent_of(&f.store, f.accounts[0].id).is_none());
    }

    /// Store wrapper that can misbehave on cue: fire a one-shot action when
    /// a chosen account is resolved or when the first send record lands, or
    /// reject send-record writes outright.
    struct TestStore {
        inner: Arc<MemoryStore>,
        fail_send_records: bool,
        trigger_on_account: Option<AccountId>,
        account_action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
        record_action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl TestStore {
        fn passthrough(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                fail_send_records: false,
                trigger_on_account: None,
                account_action: Mutex::new(None),
                record_action: Mutex::new(None),
            }
        }
    }

    impl Store for TestStore {
        fn create_account(&self, new: NewAccount) -> Result<Account, StoreError> {
            self.inner.create_account(new)
        }

        fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
            if self.trigger_on_account == Some(id) {
                if let Some(action) = self.account_action.lock().unwrap().take() {
                    action();
                }
            }
            Store::account(self.inner.as_ref(), id)
        }

        fn accounts(&self) -> Result<Vec<Account>, StoreError> {
            Store::accounts(self.inner.as_ref())
        }

        fn update_account_delay(&self, id: AccountId, delay_secs: u32) -> Result<(), StoreError> {
            self.inner.update_account_delay(id, delay_secs)
        }

        fn update_account_last_sent(
            &self,
            id: AccountId,
            at: chrono::DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.update_account_last_sent(id, at)
        }

        fn delete_account(&self, id: AccountId) -> Result<bool, StoreError> {
            self.inner.delete_account(id)
        }

        fn create_contact(&self, identifier: &str) -> Result<Recipient, StoreError> {
            self.inner.create_contact(identifier)
        }

        fn contacts(&self) -> Result<Vec<Recipient>, StoreError> {
            self.inner.contacts()
        }

        fn create_message(&self, text: &str) -> Result<waveline_core::types::Message, StoreError> {
            self.inner.create_message(text)
        }

        fn create_send_record(
            &self,
            account_id: AccountId,
            recipient_id: i64,
            message_id: MessageId,
            status: SendStatus,
        ) -> Result<i64, StoreError> {
            if self.fail_send_records {
                return Err(StoreError::Unavailable("records table offline".to_string()));
            }
            if let Some(action) = self.record_action.lock().unwrap().take() {
                action();
            }
            self.inner
                .create_send_record(account_id, recipient_id, message_id, status)
        }

        fn send_history(&self) -> Result<Vec<waveline_core::types::SendRecord>, StoreError> {
            self.inner.send_history()
        }

        fn clear_send_history(&self) -> Result<u64, StoreError> {
            self.inner.clear_send_history()
        }
    }

    fn wrapped_fixture(account_count: usize) -> (Arc<MemoryStore>, Arc<AccountRegistry>, Vec<Arc<ScriptedTransport>>, Vec<Account>) {
        let f = fixture(account_count, 1);
        (f.store, f.registry, f.transports, f.accounts)
    }

    #[tokio::test]
    async fn test_account_deleted_mid_campaign_counts_as_failed() {
        let (memory, registry, transports, accounts) = wrapped_fixture(2);
        let doomed = accounts[1].id;

        let store = Arc::new(TestStore {
            trigger_on_account: Some(doomed),
            account_action: Mutex::new(Some(Box::new({
                let memory = memory.clone();
                move || {
                    memory.delete_account(doomed).unwrap();
                }
            }))),
            ..TestStore::passthrough(memory.clone())
        });

        let engine = DispatchEngine::new(store, registry);
        let report = engine.dispatch("hello", &recipients(2)).await.unwrap();

        assert_eq!(report.success_count, 1);
        assert_eq!(report.fail_count, 1);
        let failed = report.outcomes_for(2)[0];
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("not found"));

        // No record is written for a job without a valid account.
        assert_eq!(memory.send_history().unwrap().len(), 1);
        assert_eq!(transports[1].call_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_revoked_mid_campaign_skips_silently() {
        let (memory, registry, transports, accounts) = wrapped_fixture(2);
        let revoked = accounts[1].id;

        let store = Arc::new(TestStore {
            trigger_on_account: Some(revoked),
            account_action: Mutex::new(Some(Box::new({
                let registry = registry.clone();
                move || {
                    registry.unregister(revoked);
                }
            }))),
            ..TestStore::passthrough(memory.clone())
        });

        let engine = DispatchEngine::new(store, registry.clone());
        let report = engine.dispatch("hello", &recipients(2)).await.unwrap();

        assert_eq!(report.success_count, 1);
        assert_eq!(report.fail_count, 0);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.outcomes_for(2)[0].status, JobStatus::Skipped);
        assert_eq!(memory.send_history().unwrap().len(), 1);
        assert_eq!(transports[1].call_count(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces_after_wave_joins() {
        let (memory, registry, transports, _accounts) = wrapped_fixture(2);

        let store = Arc::new(TestStore {
            fail_send_records: true,
            ..TestStore::passthrough(memory.clone())
        });

        let engine = DispatchEngine::new(store, registry);
        let err = engine.dispatch("hello", &recipients(2)).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Persistence(StoreError::Unavailable(_))
        ));
        // Both provider calls completed before the abort.
        assert_eq!(transports[0].call_count(), 1);
        assert_eq!(transports[1].call_count(), 1);
        assert!(memory.send_history().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_account_deleted_after_send_is_tolerated() {
        let (memory, registry, _transports, accounts) = wrapped_fixture(1);
        let target = accounts[0].id;

        let store = Arc::new(TestStore {
            record_action: Mutex::new(Some(Box::new({
                let memory = memory.clone();
                move || {
                    memory.delete_account(target).unwrap();
                }
            }))),
            ..TestStore::passthrough(memory.clone())
        });

        let engine = DispatchEngine::new(store, registry);
        let report = engine.dispatch("hello", &recipients(1)).await.unwrap();

        // The send record landed, the missing last_sent update is logged
        // and swallowed.
        assert_eq!(report.success_count, 1);
        assert_eq!(memory.send_history().unwrap().len(), 1);
        assert!(Store::account(memory.as_ref(), target).unwrap().is_none());
    }
}

//! Deterministic transport double for engine tests: outcomes are popped from
//! a pre-loaded script, every call is logged, and overlapping sends on the
//! same account trip an assertion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::{MessageTransport, ProviderReceipt, RecipientAddress, SendError, TransportError};

/// One observed `send` invocation.
#[derive(Debug, Clone)]
pub struct SentCall {
    pub address: String,
    pub text: String,
}

#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<ProviderReceipt, SendError>>>,
    calls: Mutex<Vec<SentCall>>,
    not_ready: AtomicBool,
    disconnect_fails: AtomicBool,
    in_flight: AtomicBool,
    next_message_id: AtomicI64,
}

impl ScriptedTransport {
    /// A transport whose every send succeeds with sequential receipt ids.
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    /// Queue an outcome; once the script is drained, sends succeed again.
    pub fn push_outcome(&self, outcome: Result<ProviderReceipt, SendError>) {
        self.script
            .lock()
            .expect("script mutex poisoned")
            .push_back(outcome);
    }

    pub fn push_error(&self, error: SendError) {
        self.push_outcome(Err(error));
    }

    pub fn set_ready(&self, ready: bool) {
        self.not_ready.store(!ready, Ordering::SeqCst);
    }

    pub fn set_disconnect_fails(&self, fails: bool) {
        self.disconnect_fails.store(fails, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SentCall> {
        self.calls.lock().expect("call log mutex poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("call log mutex poisoned").len()
    }

    fn default_receipt(&self) -> ProviderReceipt {
        ProviderReceipt {
            provider_message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            sent_at: Utc::now(),
        }
    }
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    fn is_send_ready(&self) -> bool {
        !self.not_ready.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        address: &RecipientAddress,
        text: &str,
    ) -> Result<ProviderReceipt, SendError> {
        assert!(
            !self.in_flight.swap(true, Ordering::SeqCst),
            "overlapping sends on one account"
        );
        // Give concurrent wave tasks a chance to interleave so the
        // at-most-one-in-flight assertion actually bites.
        tokio::task::yield_now().await;

        self.calls.lock().expect("call log mutex poisoned").push(SentCall {
            address: address.to_string(),
            text: text.to_string(),
        });

        let outcome = self
            .script
            .lock()
            .expect("script mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_receipt()));

        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.disconnect_fails.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnect(
                "scripted disconnect failure".to_string(),
            ));
        }
        self.set_ready(false);
        Ok(())
    }
}

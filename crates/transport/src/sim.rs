//! Simulated provider transport for the demo driver and load experiments.
//! Stands in for a real provider connection: configurable latency window
//! plus random generic-failure and flood-control injection.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tracing::debug;
use waveline_core::config::SimulatorConfig;

use crate::{MessageTransport, ProviderReceipt, RecipientAddress, SendError, TransportError};

pub struct SimulatedTransport {
    account_label: String,
    config: SimulatorConfig,
    ready: AtomicBool,
    next_message_id: AtomicI64,
}

impl SimulatedTransport {
    pub fn new(account_label: impl Into<String>, config: SimulatorConfig) -> Self {
        Self {
            account_label: account_label.into(),
            config,
            ready: AtomicBool::new(true),
            next_message_id: AtomicI64::new(1),
        }
    }

    /// Mark the simulated session authorized or revoked.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageTransport for SimulatedTransport {
    fn is_send_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        address: &RecipientAddress,
        text: &str,
    ) -> Result<ProviderReceipt, SendError> {
        // Draw everything up front; the rng is not Send across await points.
        let (latency_ms, roll) = {
            let mut rng = rand::thread_rng();
            let max = self.config.max_latency_ms.max(self.config.min_latency_ms);
            (
                rng.gen_range(self.config.min_latency_ms..=max),
                rng.gen::<f64>(),
            )
        };

        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        if roll < self.config.flood_rate {
            metrics::counter!("transport.sim_sends", "outcome" => "flood").increment(1);
            return Err(SendError::FloodControl {
                retry_after: Duration::from_secs(self.config.flood_retry_after_secs),
            });
        }
        if roll < self.config.flood_rate + self.config.failure_rate {
            metrics::counter!("transport.sim_sends", "outcome" => "failed").increment(1);
            return Err(SendError::Generic("simulated provider failure".to_string()));
        }

        let provider_message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        debug!(
            account = %self.account_label,
            to = %address,
            chars = text.len(),
            provider_message_id,
            "Simulated send delivered"
        );
        metrics::counter!("transport.sim_sends", "outcome" => "sent").increment(1);

        Ok(ProviderReceipt {
            provider_message_id,
            sent_at: Utc::now(),
        })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.ready.store(false, Ordering::SeqCst);
        debug!(account = %self.account_label, "Simulated transport disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> SimulatorConfig {
        SimulatorConfig {
            min_latency_ms: 0,
            max_latency_ms: 0,
            failure_rate: 0.0,
            flood_rate: 0.0,
            flood_retry_after_secs: 3,
        }
    }

    #[tokio::test]
    async fn test_send_returns_sequential_receipts() {
        let transport = SimulatedTransport::new("+15550001", fast_config());
        let address = RecipientAddress::Handle("alice".to_string());

        let first = transport.send(&address, "hi").await.unwrap();
        let second = transport.send(&address, "hi again").await.unwrap();
        assert_eq!(first.provider_message_id, 1);
        assert_eq!(second.provider_message_id, 2);
    }

    #[tokio::test]
    async fn test_all_flood_config_always_floods() {
        let config = SimulatorConfig {
            flood_rate: 1.0,
            ..fast_config()
        };
        let transport = SimulatedTransport::new("+15550001", config);
        let address = RecipientAddress::Phone("+15557777".to_string());

        match transport.send(&address, "hi").await {
            Err(SendError::FloodControl { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(3));
            }
            other => panic!("expected flood control, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_revokes_readiness() {
        let transport = SimulatedTransport::new("+15550001", fast_config());
        assert!(transport.is_send_ready());
        transport.disconnect().await.unwrap();
        assert!(!transport.is_send_ready());
    }
}

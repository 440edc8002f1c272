//! In-process redelivery of rolled-back deliveries
//!
//! The broker layer gives no redelivery of its own, so the consumer
//! replays a failed delivery itself. The executor's two failure shapes get
//! two cadences: a handler-requested retry waits a doubling delay, a store
//! error waits the full ceiling straight away. When the delivery budget is
//! spent the message is dropped; the command row keeps its retry count and
//! last error for administrative replay.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::services::executor::ProcessError;

#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    /// Total deliveries of one message, the first included
    pub max_deliveries: u32,
    /// Delay before the second delivery; doubles from there
    pub first_delay: Duration,
    /// Ceiling on any single delay
    pub ceiling: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_deliveries: 3,
            first_delay: Duration::from_millis(200),
            ceiling: Duration::from_secs(15),
        }
    }
}

impl RedeliveryPolicy {
    /// Delay inserted after delivery number `delivery` failed with a
    /// handler-requested retry
    pub fn delay_after(&self, delivery: u32) -> Duration {
        let doublings = delivery.saturating_sub(1).min(16);
        self.first_delay
            .saturating_mul(1u32 << doublings)
            .min(self.ceiling)
    }

    /// Drive one message through `deliver` until it lands or the budget is
    /// spent. Returns the terminal error for the consumer to log.
    pub async fn run<F, Fut>(&self, context: &str, mut deliver: F) -> Result<(), ProcessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), ProcessError>>,
    {
        let budget = self.max_deliveries.max(1);
        let mut delivery = 1u32;

        loop {
            let error = match deliver().await {
                Ok(()) => {
                    if delivery > 1 {
                        tracing::debug!(context, delivery, "delivery landed after redelivery");
                    }
                    return Ok(());
                }
                Err(e) => e,
            };

            if delivery >= budget {
                return Err(error);
            }

            let pause = match &error {
                // The executor rolled back and bumped the retry counter;
                // back off before running the handler again.
                ProcessError::Retry(_) => self.delay_after(delivery),
                // The store itself failed; hammering it helps nothing.
                ProcessError::Database(_) => self.ceiling,
            };

            tracing::warn!(
                context,
                delivery,
                budget,
                pause_ms = pause.as_millis(),
                error = %error,
                "delivery failed, redelivering"
            );

            sleep(pause).await;
            delivery += 1;
        }
    }
}

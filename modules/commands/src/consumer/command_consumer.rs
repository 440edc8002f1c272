//! Command queue consumers
//!
//! One subscription per registered handler name. Each delivery runs
//! through the executor under the redelivery policy; a delivery whose
//! budget is spent is dropped with its command row still carrying the
//! retry count and last error.

use futures::StreamExt;
use message_bus::CommandQueue;
use std::sync::Arc;

use crate::config::Naming;
use crate::contracts::MessageEnvelope;
use crate::services::executor::Executor;

use super::redelivery::RedeliveryPolicy;

/// Spawn a consumer task per registered command name
pub async fn start_command_consumers(
    queue: Arc<dyn CommandQueue>,
    executor: Arc<Executor>,
    naming: Naming,
    policy: RedeliveryPolicy,
) {
    for name in executor.handler_names() {
        let subject = naming.command_queue(&name);
        spawn_consumer(queue.clone(), executor.clone(), subject, policy.clone());
    }
}

fn spawn_consumer(
    queue: Arc<dyn CommandQueue>,
    executor: Arc<Executor>,
    subject: String,
    policy: RedeliveryPolicy,
) {
    tokio::spawn(async move {
        tracing::info!(queue = %subject, "starting command consumer");

        let mut stream = match queue.subscribe(&subject).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(queue = %subject, error = %e, "failed to subscribe");
                return;
            }
        };

        while let Some(msg) = stream.next().await {
            let envelope = match MessageEnvelope::from_bus_message(&msg) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!(
                        queue = %subject,
                        error = %e,
                        "dropping malformed command message"
                    );
                    continue;
                }
            };

            let result = policy
                .run("command_executor", || {
                    let executor = executor.clone();
                    let envelope = envelope.clone();
                    async move { executor.process(&envelope).await }
                })
                .await;

            if let Err(error) = result {
                tracing::error!(
                    command_id = %envelope.command_id,
                    message_id = %envelope.message_id,
                    error = %error,
                    "redelivery budget spent, command kept with its retry count for replay"
                );
            }
        }

        tracing::warn!(queue = %subject, "command consumer stopped");
    });
}

//! AMQP dead letter publisher

use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::RelayError;
use crate::metrics::MetricsCollector;
use amqprs::{
    channel::{BasicPublishArguments, Channel},
    BasicProperties,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Upper bound for the delay between publish attempts
const MAX_PUBLISH_DELAY_MS: u64 = 5000;

/// Configuration for dead letter publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: crate::amqp::messages::DEAD_LETTER_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// Publishes dead letters as persistent JSON messages to a topic exchange,
/// routed by failure kind
pub struct AmqpDeadLetterPublisher {
    channel: Channel,
    config: PublisherConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AmqpDeadLetterPublisher {
    pub fn new(channel: Channel, config: PublisherConfig) -> Self {
        Self {
            channel,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Single publish attempt
    async fn try_publish(
        &self,
        dead_letter: &DeadLetter,
        payload: &[u8],
    ) -> Result<(), RelayError> {
        let routing_key = dead_letter.routing_key();
        let args = BasicPublishArguments::new(&self.config.exchange, &routing_key);

        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&dead_letter.invocation_id.to_string())
            .with_timestamp(dead_letter.failed_at.timestamp() as u64)
            .with_content_type("application/json")
            .with_persistence(true);

        self.channel
            .basic_publish(properties, payload.to_vec(), args)
            .await
            .map_err(|e| RelayError::DeadLetterPublishFailed {
                message: format!("Failed to publish to {}: {}", routing_key, e),
            })
    }
}

#[async_trait]
impl DeadLetterSink for AmqpDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), RelayError> {
        let payload =
            serde_json::to_vec(&dead_letter).map_err(|e| RelayError::InternalError {
                message: format!("Failed to serialize dead letter: {}", e),
            })?;

        let started = Instant::now();
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(&dead_letter, &payload).await {
                Ok(()) => {
                    debug!(
                        "Published dead letter {} to {} ({})",
                        dead_letter.invocation_id,
                        self.config.exchange,
                        dead_letter.routing_key()
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_amqp_operation("dead_letter", true, started.elapsed());
                    }
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish dead letter {} after {} retries: {}",
                            dead_letter.invocation_id, self.config.max_retries, e
                        );
                        if let Some(metrics) = &self.metrics {
                            metrics.record_amqp_operation(
                                "dead_letter",
                                false,
                                started.elapsed(),
                            );
                        }
                        return Err(e);
                    }

                    warn!(
                        "Dead letter publish attempt {} failed for {}: {}. Retrying in {:?}",
                        retry_count, dead_letter.invocation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis(
                        (delay.as_millis() as u64 * 2).min(MAX_PUBLISH_DELAY_MS),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.exchange, "elo.dead_letters");
        assert_eq!(config.max_retries, 3);
    }
}

//! Dead-letter channel for invocations that could not be applied
//!
//! Every failed invocation ends here with the raw event, the failure kind and
//! the number of attempts made on the failing step, so the record can be
//! inspected and replayed by hand.
//!
//! ## Routing
//!
//! Dead letters are routed by failure kind: `game.failed.{kind}`, for example
//! `game.failed.write_conflict`.

use crate::error::{FailureKind, PipelineError, RelayError};
use crate::types::GameId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Routing key prefix. Full key: `{prefix}.{failure_kind}`
pub const DEAD_LETTER_ROUTING_PREFIX: &str = "game.failed";

/// Build the routing key for a failure kind
pub fn routing_key_for(kind: FailureKind) -> String {
    format!("{}.{}", DEAD_LETTER_ROUTING_PREFIX, kind)
}

/// A failed invocation as published to the dead-letter channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The change event exactly as received
    pub original_event: serde_json::Value,
    pub failure_kind: FailureKind,
    /// Attempts made on the step that failed
    pub attempts: u32,
    /// Human-readable error message
    pub reason: String,
    /// Known once the event has been adapted
    pub game_id: Option<GameId>,
    pub invocation_id: Uuid,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_error(
        original_event: serde_json::Value,
        error: &PipelineError,
        attempts: u32,
        game_id: Option<GameId>,
        invocation_id: Uuid,
    ) -> Self {
        Self {
            original_event,
            failure_kind: error.kind(),
            attempts,
            reason: error.to_string(),
            game_id,
            invocation_id,
            failed_at: Utc::now(),
        }
    }

    pub fn routing_key(&self) -> String {
        routing_key_for(self.failure_kind)
    }
}

/// Destination for dead letters
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Publish a dead letter. An error here means the failure could not be
    /// recorded and the triggering event must be redelivered.
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), RelayError>;

    /// Whether the sink actually delivers somewhere
    fn is_durable(&self) -> bool {
        true
    }
}

/// Sink that only logs, used when no broker is configured
#[derive(Debug, Default)]
pub struct LoggingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for LoggingDeadLetterSink {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), RelayError> {
        warn!(
            routing_key = %dead_letter.routing_key(),
            reason = %dead_letter.reason,
            attempts = dead_letter.attempts,
            game_id = ?dead_letter.game_id,
            "No dead letter exchange configured, logging dead letter"
        );
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// In-memory sink backed by an unbounded channel
pub struct ChannelDeadLetterSink {
    sender: mpsc::UnboundedSender<DeadLetter>,
}

impl ChannelDeadLetterSink {
    /// Create the sink and the receiver that observes published dead letters
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeadLetter>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterSink for ChannelDeadLetterSink {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), RelayError> {
        info!(
            routing_key = %dead_letter.routing_key(),
            reason = %dead_letter.reason,
            "Publishing to channel dead letter sink"
        );
        self.sender
            .send(dead_letter)
            .map_err(|e| RelayError::DeadLetterPublishFailed {
                message: format!("channel closed: {}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(error: &PipelineError) -> DeadLetter {
        DeadLetter::from_error(
            json!({"eventType": "INSERT", "record": {"result": 2}}),
            error,
            1,
            Some("GAME#1".to_string()),
            Uuid::new_v4(),
        )
    }

    #[test]
    fn test_routing_key_by_kind() {
        assert_eq!(
            routing_key_for(FailureKind::WriteConflict),
            "game.failed.write_conflict"
        );
        let letter = sample(&PipelineError::malformed("result out of range"));
        assert_eq!(letter.routing_key(), "game.failed.malformed_event");
    }

    #[test]
    fn test_dead_letter_json_shape() {
        let letter = sample(&PipelineError::unavailable("timed out"));
        let value = serde_json::to_value(&letter).unwrap();

        assert_eq!(value["failure_kind"], "store_unavailable");
        assert_eq!(value["attempts"], 1);
        assert_eq!(value["game_id"], "GAME#1");
        assert_eq!(value["original_event"]["record"]["result"], 2);
        assert!(value["reason"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut receiver) = ChannelDeadLetterSink::new();
        let letter = sample(&PipelineError::malformed("bad"));

        sink.publish(letter.clone()).await.unwrap();
        assert_eq!(receiver.recv().await, Some(letter));
        assert!(sink.is_durable());
    }

    #[tokio::test]
    async fn test_channel_sink_closed_receiver() {
        let (sink, receiver) = ChannelDeadLetterSink::new();
        drop(receiver);

        let result = sink.publish(sample(&PipelineError::malformed("bad"))).await;
        assert!(matches!(
            result,
            Err(RelayError::DeadLetterPublishFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_logging_sink_accepts_everything() {
        let sink = LoggingDeadLetterSink;
        assert!(sink
            .publish(sample(&PipelineError::malformed("bad")))
            .await
            .is_ok());
        assert!(!sink.is_durable());
    }
}

//! AMQP consumer feeding change events into the pipeline
//!
//! Deliveries are processed one at a time per channel (prefetch 1) and acked
//! explicitly. A delivery is acked once the invocation ends in either applied
//! or dead-lettered; it is nacked with requeue only when the dead letter could
//! not be published, so no failed event is ever dropped silently.

use crate::error::{RelayError, Result};
use crate::metrics::MetricsCollector;
use crate::pipeline::{InvocationOutcome, Orchestrator};
use crate::utils::payload_preview;
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicNackArguments,
        BasicQosArguments, Channel,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Deliveries in flight per channel
pub const PREFETCH_COUNT: u16 = 1;

/// Trait defining the interface for handling change event messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Run one invocation for a raw message body
    async fn handle_change_event(&self, payload: &[u8]) -> Result<InvocationOutcome>;
}

#[async_trait]
impl MessageHandler for Orchestrator {
    async fn handle_change_event(&self, payload: &[u8]) -> Result<InvocationOutcome> {
        self.process_bytes(payload).await
    }
}

/// What to tell the broker about a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAction {
    Ack,
    Requeue,
}

impl DeliveryAction {
    pub fn for_result(result: &Result<InvocationOutcome>) -> Self {
        match result {
            Ok(_) => DeliveryAction::Ack,
            Err(_) => DeliveryAction::Requeue,
        }
    }
}

/// Consumer for the game change event queue
pub struct GameEventConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
    metrics: Option<Arc<MetricsCollector>>,
}

impl GameEventConsumer {
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("elo-relay-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        self.channel
            .basic_qos(BasicQosArguments::new(0, PREFETCH_COUNT, false))
            .await
            .map_err(|e| RelayError::AmqpConnectionFailed {
                message: format!("Failed to set prefetch: {}", e),
            })?;

        // new() leaves no_ack unset; deliveries are acked by DeliveryConsumer
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(
                DeliveryConsumer::new(self.handler.clone(), self.metrics.clone()),
                args,
            )
            .await
            .map_err(|e| RelayError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming change events from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| RelayError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming change events");
        Ok(())
    }
}

/// Internal consumer implementation
struct DeliveryConsumer {
    handler: Arc<dyn MessageHandler>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl DeliveryConsumer {
    fn new(handler: Arc<dyn MessageHandler>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { handler, metrics }
    }

    fn record(&self, operation: &str, success: bool, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_amqp_operation(operation, success, started.elapsed());
        }
    }
}

#[async_trait]
impl AsyncConsumer for DeliveryConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let started = Instant::now();

        debug!(
            "Change event received - delivery_tag: {}, redelivered: {}, size: {} bytes",
            delivery_tag,
            deliver.redelivered(),
            content.len()
        );

        let result = self.handler.handle_change_event(&content).await;

        match &result {
            Ok(InvocationOutcome::Applied { game_id, .. }) => {
                debug!(
                    "Applied game {} in {:.2}ms",
                    game_id,
                    started.elapsed().as_secs_f64() * 1000.0
                );
            }
            Ok(InvocationOutcome::DeadLettered { kind, attempts }) => {
                warn!(
                    "Change event dead-lettered - delivery_tag: {}, kind: {}, attempts: {}",
                    delivery_tag, kind, attempts
                );
            }
            Err(e) => {
                error!(
                    "Change event could not be settled, requeueing - delivery_tag: {}, error: {}, body: {}",
                    delivery_tag,
                    e,
                    payload_preview(&content, 256)
                );
            }
        }

        match DeliveryAction::for_result(&result) {
            DeliveryAction::Ack => {
                let acked = channel
                    .basic_ack(BasicAckArguments::new(delivery_tag, false))
                    .await;
                if let Err(e) = &acked {
                    error!("Failed to ack delivery {}: {}", delivery_tag, e);
                }
                self.record("consume", acked.is_ok(), started);
            }
            DeliveryAction::Requeue => {
                if let Err(e) = channel
                    .basic_nack(BasicNackArguments::new(delivery_tag, false, true))
                    .await
                {
                    error!("Failed to nack delivery {}: {}", delivery_tag, e);
                }
                self.record("consume", false, started);
            }
        }
    }
}

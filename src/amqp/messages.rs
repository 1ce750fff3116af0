//! AMQP topology names and change event payloads

use crate::config::AmqpSettings;
use crate::error::{RelayError, Result};
use amqprs::channel::{
    Channel, ExchangeDeclareArguments, QueueBindArguments, QueueDeclareArguments,
};
use serde_json::{json, Value};
use tracing::info;

/// Default queue carrying game change events
pub const GAME_CHANGES_QUEUE: &str = "elo.game_changes";

/// Default topic exchange receiving dead letters
pub const DEAD_LETTER_EXCHANGE: &str = "elo.dead_letters";

/// Default durable queue bound to every dead letter routing key
pub const DEAD_LETTER_INSPECT_QUEUE: &str = "elo.dead_letters.inspect";

/// Binding pattern covering all failure kinds
pub const DEAD_LETTER_BINDING: &str = "game.failed.#";

/// Declare the event queue, the dead letter exchange and its inspection queue
pub async fn declare_topology(channel: &Channel, settings: &AmqpSettings) -> Result<()> {
    let args = QueueDeclareArguments::new(&settings.event_queue)
        .durable(true)
        .auto_delete(false)
        .finish();
    channel
        .queue_declare(args)
        .await
        .map_err(|e| RelayError::AmqpConnectionFailed {
            message: format!("Failed to declare queue {}: {}", settings.event_queue, e),
        })?;

    let args = ExchangeDeclareArguments::new(&settings.dead_letter_exchange, "topic")
        .durable(true)
        .finish();
    channel
        .exchange_declare(args)
        .await
        .map_err(|e| RelayError::AmqpConnectionFailed {
            message: format!(
                "Failed to declare exchange {}: {}",
                settings.dead_letter_exchange, e
            ),
        })?;

    if !settings.dead_letter_queue.is_empty() {
        let args = QueueDeclareArguments::new(&settings.dead_letter_queue)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(args)
            .await
            .map_err(|e| RelayError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare queue {}: {}",
                    settings.dead_letter_queue, e
                ),
            })?;

        let args = QueueBindArguments::new(
            &settings.dead_letter_queue,
            &settings.dead_letter_exchange,
            DEAD_LETTER_BINDING,
        );
        channel
            .queue_bind(args)
            .await
            .map_err(|e| RelayError::AmqpConnectionFailed {
                message: format!("Failed to bind dead letter queue: {}", e),
            })?;
    }

    info!(
        "Declared AMQP topology: queue {}, dead letter exchange {}",
        settings.event_queue, settings.dead_letter_exchange
    );
    Ok(())
}

/// Change event in the plain wire shape
pub fn plain_change_event(
    event_type: &str,
    game_id: &str,
    player_a_id: &str,
    player_b_id: &str,
    result: f64,
) -> Value {
    json!({
        "eventType": event_type,
        "record": {
            "gameId": game_id,
            "playerAId": player_a_id,
            "playerBId": player_b_id,
            "result": result
        }
    })
}

/// Change event in the DynamoDB stream shape, numbers as decimal strings
pub fn stream_change_event(
    event_name: &str,
    game_id: &str,
    player_a_id: &str,
    player_b_id: &str,
    result: f64,
) -> Value {
    json!({
        "eventName": event_name,
        "dynamodb": {
            "NewImage": {
                "PK": {"S": game_id},
                "Payload": {"M": {
                    "PlayerA": {"S": player_a_id},
                    "PlayerB": {"S": player_b_id},
                    "Result": {"N": result.to_string()}
                }}
            }
        }
    })
}

//! Change event adapter
//!
//! Turns one raw change notification into a [`GameUpdateRequest`]. Two wire
//! shapes are understood:
//!
//! - the plain shape: `{"eventType": "INSERT", "record": {"gameId", "playerAId",
//!   "playerBId", "result"}}`
//! - the DynamoDB stream shape, where attributes are typed wrappers and numbers
//!   are decimal strings: `{"eventName": "INSERT", "dynamodb": {"NewImage":
//!   {"PK": {"S"}, "Payload": {"M": {"PlayerA": {"S"}, "PlayerB": {"S"},
//!   "Result": {"N"}}}}}}`
//!
//! Anything else is a `MalformedEvent`.

use crate::error::{PipelineError, PipelineResult};
use crate::types::{GameResult, GameUpdateRequest};
use serde_json::Value;

/// Game id used when the event carries none
pub const UNKNOWN_GAME_ID: &str = "unknown";

/// The only event type that triggers a rating update
pub const INSERT_EVENT: &str = "INSERT";

/// Stateless translator from change events to update requests
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeEventAdapter;

impl ChangeEventAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Validate and normalize one change event
    pub fn adapt(&self, event: &Value) -> PipelineResult<GameUpdateRequest> {
        if !event.is_object() {
            return Err(PipelineError::malformed("event is not a JSON object"));
        }

        if event.get("dynamodb").is_some() || event.get("eventName").is_some() {
            adapt_stream_record(event)
        } else {
            adapt_plain_record(event)
        }
    }
}

fn require_insert(event_type: Option<&Value>) -> PipelineResult<()> {
    match event_type.and_then(Value::as_str) {
        Some(INSERT_EVENT) => Ok(()),
        Some(other) => Err(PipelineError::malformed(format!(
            "unsupported event type '{}'",
            other
        ))),
        None => Err(PipelineError::malformed("missing event type")),
    }
}

fn adapt_plain_record(event: &Value) -> PipelineResult<GameUpdateRequest> {
    require_insert(event.get("eventType"))?;

    let record = event
        .get("record")
        .filter(|r| r.is_object())
        .ok_or_else(|| PipelineError::malformed("missing record"))?;

    let player_a_id = player_id(record.get("playerAId"), "playerAId")?;
    let player_b_id = player_id(record.get("playerBId"), "playerBId")?;

    let score = match record.get("result") {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| PipelineError::malformed("result is not a finite number"))?,
        Some(other) => {
            return Err(PipelineError::malformed(format!(
                "result is not numeric: {}",
                other
            )))
        }
        None => return Err(PipelineError::malformed("missing result")),
    };

    let game_id = record
        .get("gameId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .unwrap_or(UNKNOWN_GAME_ID);

    build_request(game_id, player_a_id, player_b_id, score)
}

fn adapt_stream_record(event: &Value) -> PipelineResult<GameUpdateRequest> {
    require_insert(event.get("eventName"))?;

    let image = event
        .pointer("/dynamodb/NewImage")
        .ok_or_else(|| PipelineError::malformed("missing dynamodb.NewImage"))?;
    let payload = image
        .pointer("/Payload/M")
        .ok_or_else(|| PipelineError::malformed("missing Payload map"))?;

    let player_a_id = player_id(payload.pointer("/PlayerA/S"), "PlayerA")?;
    let player_b_id = player_id(payload.pointer("/PlayerB/S"), "PlayerB")?;

    let score = match payload.pointer("/Result/N") {
        Some(Value::String(raw)) => raw.trim().parse::<f64>().map_err(|_| {
            PipelineError::malformed(format!("result is not numeric: '{}'", raw))
        })?,
        Some(other) => {
            return Err(PipelineError::malformed(format!(
                "result is not a number attribute: {}",
                other
            )))
        }
        None => return Err(PipelineError::malformed("missing Result")),
    };

    let game_id = image
        .pointer("/PK/S")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .unwrap_or(UNKNOWN_GAME_ID);

    build_request(game_id, player_a_id, player_b_id, score)
}

fn player_id(value: Option<&Value>, field: &str) -> PipelineResult<String> {
    match value {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.clone()),
        Some(Value::String(_)) => Err(PipelineError::malformed(format!("{} is empty", field))),
        Some(_) => Err(PipelineError::malformed(format!(
            "{} is not a string",
            field
        ))),
        None => Err(PipelineError::malformed(format!("missing {}", field))),
    }
}

fn build_request(
    game_id: &str,
    player_a_id: String,
    player_b_id: String,
    score: f64,
) -> PipelineResult<GameUpdateRequest> {
    if player_a_id == player_b_id {
        return Err(PipelineError::malformed(format!(
            "player '{}' cannot play against themselves",
            player_a_id
        )));
    }

    let result = GameResult::from_score(score).ok_or_else(|| {
        PipelineError::malformed(format!("result {} is not one of 0, 0.5, 1", score))
    })?;

    Ok(GameUpdateRequest {
        game_id: game_id.to_string(),
        player_a_id,
        player_b_id,
        result,
    })
}

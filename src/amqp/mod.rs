//! AMQP integration for the rating pipeline
//!
//! This module handles the broker connection, the change event consumer and
//! the dead letter publisher.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConnection, AmqpEndpoint};
pub use handlers::{DeliveryAction, GameEventConsumer, MessageHandler};
pub use messages::*;
pub use publisher::{AmqpDeadLetterPublisher, PublisherConfig};

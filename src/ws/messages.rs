//! WebSocket wire messages.
//!
//! JSON frames tagged by `type`. Clients send control frames
//! (`ping`/`pong`, `subscribe`/`unsubscribe`); the server pushes topic
//! updates. Unknown message types are rejected at the deserialization
//! boundary, not deep in the connection loop.

use serde::{Deserialize, Serialize};

/// Topics a client may subscribe to
pub const TOPIC_MARKET_DATA: &str = "market_data";
pub const TOPIC_PORTFOLIO_UPDATES: &str = "portfolio_updates";
pub const TOPIC_SERVICE_UPDATES: &str = "service_updates";

/// Frames sent by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Pong,
    Subscribe {
        subscription: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbols: Option<Vec<String>>,
    },
    Unsubscribe {
        subscription: String,
    },
}

/// Frames pushed by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ping,
    Pong,
    SubscriptionConfirmed {
        subscription: String,
        subscribed: bool,
    },
    ServiceUpdate {
        service: String,
        correlation_id: String,
        data: serde_json::Value,
    },
    MarketUpdate {
        symbol: String,
        data: serde_json::Value,
    },
    PortfolioUpdate {
        user_id: String,
        data: serde_json::Value,
    },
}

impl ServerMessage {
    /// Topic this message belongs to, for subscription filtering
    pub fn topic(&self) -> Option<&'static str> {
        match self {
            ServerMessage::MarketUpdate { .. } => Some(TOPIC_MARKET_DATA),
            ServerMessage::PortfolioUpdate { .. } => Some(TOPIC_PORTFOLIO_UPDATES),
            ServerMessage::ServiceUpdate { .. } => Some(TOPIC_SERVICE_UPDATES),
            _ => None,
        }
    }
}

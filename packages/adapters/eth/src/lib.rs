mod error;
mod metrics;
mod websocket;

pub use alloy::primitives::Address;
pub use error::{Error, Result};
pub use websocket::WebsocketClient;

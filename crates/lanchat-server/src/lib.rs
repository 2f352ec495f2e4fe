//! # lanchat-server
//!
//! One LAN chat participant: the [`Node`] lifecycle, the chat [`Session`]
//! shared by every service, and the HTTP gateway for browser clients.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod node;
pub mod session;

pub use config::NodeConfig;
pub use error::{ApiError, NodeError, Result};
pub use events::NodeEvent;
pub use node::Node;
pub use session::Session;

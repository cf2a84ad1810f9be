//! Core value types shared across the agent.

pub mod action;
pub mod ids;
pub mod state;

pub use action::ActionInfo;
pub use ids::{ActionId, AgentId, ClientId};
pub use state::ConnectionState;

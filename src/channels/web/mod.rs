//! HTTP gateway channel: a small JSON API in front of the agent.

pub mod auth;
pub mod server;
pub mod types;

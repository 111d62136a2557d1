//! Attestation-gated conversational DeFi agent for the Flare network.
//!
//! Chat text is classified onto a closed set of intents. Value-moving
//! intents require an explicit preview/confirm step before the session
//! wallet signs anything, and key operations stay behind the attestation
//! trust gate.

pub mod agent;
pub mod attestation;
pub mod bootstrap;
pub mod chain;
pub mod channels;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod registry;
pub mod settings;

pub use error::{Error, Result};

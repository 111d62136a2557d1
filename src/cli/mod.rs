//! Subcommand implementations behind the argument parser.

pub mod config;
pub mod doctor;

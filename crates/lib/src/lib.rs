//! Beacon core library: webhook ingestion, channel authorization, broadcast fan-out and
//! developer-mode flags, shared by the CLI.

pub mod authz;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod flags;
pub mod gateway;
pub mod providers;
pub mod store;

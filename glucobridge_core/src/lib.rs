#![forbid(unsafe_code)]

//! Core logic for glucobridge, a LibreLinkUp to Nightscout forwarder.
//!
//! This crate provides:
//! - Domain types (readings, trends, destination entries)
//! - Source provider session management and reading retrieval
//! - Change detection and forwarding
//! - The supervising poll loop
//! - Configuration, logging and marker persistence

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod session;
pub mod fetcher;
pub mod source;
pub mod detect;
pub mod forwarder;
pub mod marker;
pub mod supervisor;

// Re-export commonly used types
pub use error::{Error, Failure, Result};
pub use types::*;
pub use config::Config;
pub use session::{Credentials, Session};
pub use source::{GlucoseSource, LinkUpClient};
pub use detect::is_new;
pub use forwarder::{EntrySink, NightscoutClient};
pub use marker::{FileMarker, MarkerStore, MemoryMarker};
pub use supervisor::{CycleOutcome, CycleStep, StopSignal, Supervisor, SupervisorState};

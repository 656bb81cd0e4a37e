//! Scan runner: executes queued vulnerability scans against target lists.

pub mod config;
pub mod engine;
pub mod error;
pub mod local;
pub mod progress;
pub mod ratelimit;
pub mod scans;
pub mod settings;
pub mod store;

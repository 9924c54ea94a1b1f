//! Shared types for Watchtower

pub mod error;

pub use error::{Result, WatchError};

//! Shared data contracts, configuration and display state for the onair
//! daemon.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;

//! termctl - terminal session controller
//!
//! Owns the lifecycle of interactive shell sessions: process launch and
//! teardown, resize negotiation, shell-integration decoding and addon
//! composition around an external virtual-terminal core.

pub mod backend;
pub mod config;
pub mod core;
pub mod ui;

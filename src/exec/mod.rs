// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running the external deployment
//! script, using `tokio::process::Command`, and feeding its output into the
//! orchestrator's single-writer log pump.
//!
//! - [`backend`] provides the `DeployBackend` trait and the concrete
//!   `ShellDeployBackend` used in production; tests replace it with a fake
//!   implementation that never spawns real processes.
//! - [`pump`] owns the single task that serializes log-file writes and
//!   broadcasts `log` events, preserving per-stream line order.

pub mod backend;
pub mod pump;

pub use backend::{DeployBackend, DeployContext, DeployOutcome, ExecEvent, ShellDeployBackend};

// src/exec/mod.rs

//! Stage execution layer.
//!
//! This module adapts configuration into external tool calls and runs them:
//!
//! - [`plan`] maps each stage's config section + dataset metadata into a
//!   [`ToolInvocation`].
//! - [`runner`] provides the [`StageRunner`] trait and the production
//!   [`ProcessStageRunner`] built on `tokio::process`.
//! - [`classify`] separates deterministic tool failures from transient ones
//!   based on diagnostics.
//!
//! Executors never touch scheduler state; they only report outcomes upward
//! through the runtime event channel.

pub mod classify;
pub mod invocation;
pub mod plan;
pub mod runner;

pub use classify::{FailureKind, OutcomeClassifier};
pub use invocation::ToolInvocation;
pub use plan::build_invocation;
pub use runner::{ProcessStageRunner, StageRunner};

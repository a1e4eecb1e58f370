//! Build events and observers.
//!
//! The context reports what it does through [`BuildEvent`]s handed to every
//! attached [`BuildObserver`]. Events serialize to one JSON object per line,
//! tagged by `reason`.
//!
//! # Event Types
//!
//! - `run-started`: ordering succeeded and execution begins
//! - `builder-started`: a builder is about to run
//! - `cache-hit`: a cached builder reused its previous outputs
//! - `cache-miss`: a cached builder has to run, and why
//! - `builder-finished`: a builder completed and recorded its outputs
//! - `builder-failed`: a builder returned an error
//! - `run-finished`: the run completed (success or failure)

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;

use crate::builder::OutputSet;
use crate::core::{BuilderId, TargetRelativePath};

/// Why a cached builder could not reuse its previous outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MissCause {
    /// Nothing recorded for this builder.
    NoEntry,
    /// The recorded entry could not be read or decoded.
    Unreadable { message: String },
    /// Inputs changed since the recorded run.
    FingerprintChanged { properties: Vec<String> },
    /// A recorded output no longer exists under the target root.
    OutputMissing { path: TargetRelativePath },
}

impl std::fmt::Display for MissCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissCause::NoEntry => write!(f, "no previous run recorded"),
            MissCause::Unreadable { message } => write!(f, "cache entry unreadable: {}", message),
            MissCause::FingerprintChanged { properties } => {
                write!(f, "inputs changed: {}", properties.join(", "))
            }
            MissCause::OutputMissing { path } => write!(f, "output `{}` is missing", path),
        }
    }
}

/// An event emitted while running a build.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason")]
pub enum BuildEvent {
    #[serde(rename = "run-started")]
    RunStarted {
        /// Number of builders in the execution order
        builders: u64,
        parallel: bool,
    },

    #[serde(rename = "builder-started")]
    BuilderStarted {
        builder: BuilderId,
        /// Position in the execution order, starting at 0
        index: u64,
        total: u64,
    },

    #[serde(rename = "cache-hit")]
    CacheHit {
        builder: BuilderId,
        outputs: Vec<TargetRelativePath>,
    },

    #[serde(rename = "cache-miss")]
    CacheMiss { builder: BuilderId, cause: MissCause },

    #[serde(rename = "builder-finished")]
    BuilderFinished {
        builder: BuilderId,
        outputs: Vec<TargetRelativePath>,
    },

    #[serde(rename = "builder-failed")]
    BuilderFailed { builder: BuilderId, message: String },

    #[serde(rename = "run-finished")]
    RunFinished {
        success: bool,
        duration_ms: u64,
        /// Number of builders that completed
        builders_finished: u64,
    },
}

impl BuildEvent {
    pub fn run_started(builders: usize, parallel: bool) -> Self {
        BuildEvent::RunStarted {
            builders: builders as u64,
            parallel,
        }
    }

    pub fn builder_started(builder: &BuilderId, index: usize, total: usize) -> Self {
        BuildEvent::BuilderStarted {
            builder: builder.clone(),
            index: index as u64,
            total: total as u64,
        }
    }

    pub fn cache_hit(builder: &BuilderId, outputs: &OutputSet) -> Self {
        BuildEvent::CacheHit {
            builder: builder.clone(),
            outputs: outputs.iter().cloned().collect(),
        }
    }

    pub fn cache_miss(builder: &BuilderId, cause: MissCause) -> Self {
        BuildEvent::CacheMiss {
            builder: builder.clone(),
            cause,
        }
    }

    pub fn builder_finished(builder: &BuilderId, outputs: &OutputSet) -> Self {
        BuildEvent::BuilderFinished {
            builder: builder.clone(),
            outputs: outputs.iter().cloned().collect(),
        }
    }

    pub fn builder_failed(builder: &BuilderId, message: impl Into<String>) -> Self {
        BuildEvent::BuilderFailed {
            builder: builder.clone(),
            message: message.into(),
        }
    }

    pub fn run_finished(success: bool, duration_ms: u64, builders_finished: usize) -> Self {
        BuildEvent::RunFinished {
            success,
            duration_ms,
            builders_finished: builders_finished as u64,
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Receives build events.
///
/// Observers are called from worker threads in parallel mode and must not
/// assume events of different builders arrive in any particular order.
pub trait BuildObserver: Send + Sync {
    fn on_event(&self, event: &BuildEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl BuildObserver for TracingObserver {
    fn on_event(&self, event: &BuildEvent) {
        match event {
            BuildEvent::RunStarted { builders, parallel } => {
                tracing::info!("running {} builder(s) (parallel: {})", builders, parallel)
            }
            BuildEvent::BuilderStarted {
                builder,
                index,
                total,
            } => tracing::debug!("[{}/{}] {}", index + 1, total, builder),
            BuildEvent::CacheHit { builder, outputs } => {
                tracing::info!("{} is up to date ({} output(s))", builder, outputs.len())
            }
            BuildEvent::CacheMiss { builder, cause } => {
                tracing::info!("{} is stale: {}", builder, cause)
            }
            BuildEvent::BuilderFinished { builder, outputs } => {
                tracing::debug!("{} produced {} output(s)", builder, outputs.len())
            }
            BuildEvent::BuilderFailed { builder, message } => {
                tracing::warn!("{} failed: {}", builder, message)
            }
            BuildEvent::RunFinished {
                success,
                duration_ms,
                builders_finished,
            } => tracing::info!(
                "build {} after {} builder(s) in {:.2}s",
                if *success { "finished" } else { "failed" },
                builders_finished,
                *duration_ms as f64 / 1000.0
            ),
        }
    }
}

/// Writes each event as one JSON line.
pub struct JsonLinesObserver<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesObserver<W> {
    pub fn new(out: W) -> Self {
        JsonLinesObserver {
            out: Mutex::new(out),
        }
    }

    /// Recover the writer, e.g. to inspect buffered output.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> BuildObserver for JsonLinesObserver<W> {
    fn on_event(&self, event: &BuildEvent) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(out, "{}", event.to_json()) {
            tracing::warn!("failed to write build event: {}", e);
        }
    }
}

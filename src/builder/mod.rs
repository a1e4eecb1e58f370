//! Builders and their orchestration.
//!
//! A [`Builder`] is one unit of build work. The [`BuildContext`] orders
//! registered builders by their prerequisites and runs them, optionally
//! through the [`CachedBuilder`] decorator which skips builders whose inputs
//! and outputs are unchanged since their last successful run.

pub mod cached;
pub mod context;
pub mod errors;
pub mod events;
pub mod graph;
pub mod progress;
pub mod store;

use std::collections::BTreeSet;

use crate::core::{BuilderId, TargetRelativePath};
use crate::fingerprint::{Fingerprint, FingerprintError};

pub use cached::CachedBuilder;
pub use context::BuildContext;
pub use errors::BuildError;
pub use events::{BuildEvent, BuildObserver, JsonLinesObserver, MissCause, TracingObserver};
pub use graph::BuildGraph;
pub use progress::ProgressObserver;
pub use store::{CacheStore, FileCacheStore, MemoryCacheStore};

/// The set of outputs a builder produced, relative to the target root.
pub type OutputSet = BTreeSet<TargetRelativePath>;

/// A unit of build work.
///
/// The context never looks inside a builder: it only needs a stable
/// identity, the fingerprint of the builder's inputs and a way to run it.
pub trait Builder: Send + Sync {
    /// Stable identity, used as graph key and cache key.
    fn id(&self) -> BuilderId;

    /// Snapshot of every input that decides whether previous outputs are
    /// still valid. Defaults to an empty fingerprint.
    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        Ok(Fingerprint::empty())
    }

    /// Do the work and report the produced outputs.
    ///
    /// Prerequisites have completed when this is called; their outputs are
    /// available through [`BuildContext::get_results`].
    fn run(&self, ctx: &BuildContext) -> anyhow::Result<OutputSet>;
}

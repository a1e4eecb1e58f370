//! Cairn - an incremental build orchestrator.
//!
//! Builders are registered with their prerequisites on a [`BuildContext`],
//! which runs them in dependency order. Each builder describes its inputs
//! as a [`Fingerprint`]; with a cache installed, builders whose fingerprint
//! and outputs are unchanged since their last successful run are skipped.
//! Typed, inheritable configuration lives in [`ParameterSet`]s.
//!
//! ```
//! use std::sync::Arc;
//!
//! use cairn::{BuildContext, Builder, BuilderId, OutputSet, TargetRelativePath};
//!
//! struct Touch(&'static str);
//!
//! impl Builder for Touch {
//!     fn id(&self) -> BuilderId {
//!         BuilderId::scoped("touch", self.0)
//!     }
//!
//!     fn run(&self, _ctx: &BuildContext) -> anyhow::Result<OutputSet> {
//!         Ok([TargetRelativePath::new(self.0)?].into_iter().collect())
//!     }
//! }
//!
//! let lib: Arc<dyn Builder> = Arc::new(Touch("lib.dll"));
//! let app: Arc<dyn Builder> = Arc::new(Touch("app.exe"));
//!
//! let mut ctx = BuildContext::new();
//! ctx.add_builder(app, &[lib.clone()]);
//! let outputs = ctx.run()?;
//! assert_eq!(outputs.len(), 2);
//! # Ok::<(), cairn::BuildError>(())
//! ```

pub mod builder;
pub mod core;
pub mod fingerprint;
pub mod params;
pub mod util;

/// Test doubles shared by unit tests.
#[cfg(test)]
pub mod test_support;

pub use builder::{
    BuildContext, BuildError, BuildEvent, BuildObserver, Builder, CacheStore, CachedBuilder,
    FileCacheStore, MemoryCacheStore, OutputSet,
};
pub use core::{
    BuilderId, ErrorKind, FromProperty, PropertyKind, PropertyType, PropertyValue,
    TargetRelativePath, TargetRoot, TypedValue,
};
pub use fingerprint::{Dependencies, Fingerprint, FingerprintError, PropertySource};
pub use params::{Inheritance, ParamError, ParamSchema, ParameterSet};
pub use util::Config;

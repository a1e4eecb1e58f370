//! Cache decorator for builders.
//!
//! A `CachedBuilder` skips the wrapped builder when the entry recorded at its
//! last successful run matches: same fingerprint, and every recorded output
//! still exists under the target root. The entry is only replaced after a
//! successful run, so a failing builder keeps its previous entry.
//!
//! The checked fingerprint also covers the outputs of the builder's direct
//! prerequisites: one `prerequisites.<id>.<path>` property per output, holding
//! the SHA-256 of the file. A dependent therefore reruns when a prerequisite
//! rebuilt with different results, and stays cached when it rebuilt to the
//! same bytes.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::builder::events::{BuildEvent, MissCause};
use crate::builder::store::CacheStore;
use crate::builder::{BuildContext, Builder, OutputSet};
use crate::core::{BuilderId, PropertyType, TargetRoot, TypedValue};
use crate::fingerprint::{codec, CacheEntry, Fingerprint, FingerprintError};
use crate::util::hash::sha256_file;

/// Wraps a builder with a persistent up-to-date check.
pub struct CachedBuilder {
    inner: Arc<dyn Builder>,
    store: Arc<dyn CacheStore>,
    target: TargetRoot,
}

impl CachedBuilder {
    pub fn new(inner: Arc<dyn Builder>, store: Arc<dyn CacheStore>, target: TargetRoot) -> Self {
        CachedBuilder {
            inner,
            store,
            target,
        }
    }

    pub fn inner(&self) -> &Arc<dyn Builder> {
        &self.inner
    }

    /// Forget the recorded entry so the next run executes the builder.
    pub fn invalidate(&self) -> Result<()> {
        let id = self.inner.id();
        self.store
            .remove(&id.cache_key())
            .with_context(|| format!("failed to invalidate cache entry for `{}`", id))
    }

    /// Add content hashes of the outputs each direct prerequisite produced in
    /// this run. Outputs that are not regular files hash to null.
    fn with_prerequisites(
        &self,
        ctx: &BuildContext,
        id: &BuilderId,
        mut fingerprint: Fingerprint,
    ) -> Result<Fingerprint> {
        for prerequisite in ctx.graph().prerequisites(id) {
            let mut outputs = Fingerprint::empty();
            for output in ctx.get_results(&prerequisite)? {
                let path = self.target.resolve(&output);
                let hash = if path.is_file() {
                    TypedValue::of(sha256_file(&path)?)
                } else {
                    TypedValue::null(PropertyType::Str)
                };
                outputs = outputs.with_typed(output.to_string(), hash);
            }
            fingerprint =
                fingerprint.merge_prefixed(&format!("prerequisites.{}", prerequisite), outputs);
        }
        Ok(fingerprint)
    }

    /// Recorded outputs if they can be reused, otherwise why not.
    fn lookup(&self, id: &BuilderId, fingerprint: &Fingerprint) -> Result<OutputSet, MissCause> {
        let bytes = match self.store.get(&id.cache_key()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(MissCause::NoEntry),
            Err(e) => {
                return Err(MissCause::Unreadable {
                    message: format!("{:#}", e),
                })
            }
        };

        let entry = CacheEntry::decode(&bytes).map_err(|e| MissCause::Unreadable {
            message: e.to_string(),
        })?;

        if entry.fingerprint != *fingerprint {
            return Err(MissCause::FingerprintChanged {
                properties: fingerprint.diff(&entry.fingerprint),
            });
        }

        if let Some(path) = entry.outputs.iter().find(|p| !self.target.exists(p)) {
            return Err(MissCause::OutputMissing { path: path.clone() });
        }

        Ok(entry.outputs)
    }

    fn record(&self, id: &BuilderId, fingerprint: Fingerprint, outputs: &OutputSet) -> Result<()> {
        let bytes = CacheEntry::new(fingerprint, outputs.clone()).encode()?;
        if let Err(e) = self.store.put(&id.cache_key(), &bytes) {
            // The outputs exist; losing the entry only costs a rebuild.
            tracing::warn!("failed to record cache entry for `{}`: {:#}", id, e);
        }
        Ok(())
    }
}

impl Builder for CachedBuilder {
    fn id(&self) -> BuilderId {
        self.inner.id()
    }

    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        self.inner.fingerprint()
    }

    fn run(&self, ctx: &BuildContext) -> Result<OutputSet> {
        let id = self.inner.id();
        let fingerprint = self
            .inner
            .fingerprint()
            .with_context(|| format!("failed to compute fingerprint of `{}`", id))?;
        let fingerprint = self.with_prerequisites(ctx, &id, fingerprint)?;

        // An entry that could never be written must not cost a full run first.
        codec::validate(&fingerprint)
            .with_context(|| format!("fingerprint of `{}` cannot be cached", id))?;

        match self.lookup(&id, &fingerprint) {
            Ok(outputs) => {
                ctx.notify(&BuildEvent::cache_hit(&id, &outputs));
                return Ok(outputs);
            }
            Err(cause) => {
                tracing::debug!("cache miss for `{}`: {}", id, cause);
                ctx.notify(&BuildEvent::cache_miss(&id, cause));
            }
        }

        let outputs = self.inner.run(ctx)?;
        self.record(&id, fingerprint, &outputs)?;
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::builder::store::MemoryCacheStore;
    use crate::core::TypedValue;
    use crate::test_support::{EventLog, RecordingBuilder};

    struct Fixture {
        _tmp: TempDir,
        target: TargetRoot,
        store: Arc<MemoryCacheStore>,
        events: Arc<EventLog>,
        ctx: BuildContext,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let target = TargetRoot::new(tmp.path().join("target"));
        let events = Arc::new(EventLog::default());
        let ctx = BuildContext::new().with_observer(events.clone());
        Fixture {
            _tmp: tmp,
            target,
            store: Arc::new(MemoryCacheStore::new()),
            events,
            ctx,
        }
    }

    fn cached(f: &Fixture, inner: &Arc<RecordingBuilder>) -> CachedBuilder {
        CachedBuilder::new(inner.clone(), f.store.clone(), f.target.clone())
    }

    #[test]
    fn test_second_run_is_a_hit() {
        let f = fixture();
        let inner = Arc::new(
            RecordingBuilder::new("compile:core")
                .outputs(&["bin/core.dll"])
                .writes_to(f.target.clone()),
        );
        inner.set_fingerprint(Fingerprint::empty().with("optimize", true));
        let builder = cached(&f, &inner);

        let first = builder.run(&f.ctx).unwrap();
        let second = builder.run(&f.ctx).unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.runs(), 1);
        assert_eq!(f.events.reasons(), vec!["cache-miss", "cache-hit"]);
    }

    #[test]
    fn test_fingerprint_change_reruns() {
        let f = fixture();
        let inner = Arc::new(RecordingBuilder::new("compile:core").writes_to(f.target.clone()));
        inner.set_fingerprint(Fingerprint::empty().with("optimize", true));
        let builder = cached(&f, &inner);

        builder.run(&f.ctx).unwrap();
        inner.set_fingerprint(Fingerprint::empty().with("optimize", false));
        builder.run(&f.ctx).unwrap();
        builder.run(&f.ctx).unwrap();

        assert_eq!(inner.runs(), 2);
        assert_eq!(f.events.reasons(), vec!["cache-miss", "cache-miss", "cache-hit"]);
        assert!(f.events.misses().iter().any(|cause| matches!(
            cause,
            MissCause::FingerprintChanged { properties } if properties == &["optimize".to_string()]
        )));
    }

    #[test]
    fn test_missing_output_reruns() {
        let f = fixture();
        let inner = Arc::new(
            RecordingBuilder::new("compile:core")
                .outputs(&["bin/core.dll", "bin/core.pdb"])
                .writes_to(f.target.clone()),
        );
        let builder = cached(&f, &inner);

        builder.run(&f.ctx).unwrap();
        std::fs::remove_file(f.target.path().join("bin/core.pdb")).unwrap();
        builder.run(&f.ctx).unwrap();

        assert_eq!(inner.runs(), 2);
        assert!(f.target.path().join("bin/core.pdb").exists());
        assert!(matches!(
            f.events.misses().last(),
            Some(MissCause::OutputMissing { path }) if path.to_string() == "bin/core.pdb"
        ));
    }

    #[test]
    fn test_failure_keeps_previous_entry() {
        let f = fixture();
        let inner = Arc::new(
            RecordingBuilder::new("compile:core")
                .outputs(&["bin/core.dll"])
                .writes_to(f.target.clone()),
        );
        inner.set_fingerprint(Fingerprint::empty().with("version", 1i64));
        let builder = cached(&f, &inner);
        builder.run(&f.ctx).unwrap();
        let key = BuilderId::new("compile:core").cache_key();
        let recorded = f.store.get(&key).unwrap();

        inner.set_fingerprint(Fingerprint::empty().with("version", 2i64));
        inner.set_failing(true);
        assert!(builder.run(&f.ctx).is_err());
        assert_eq!(f.store.get(&key).unwrap(), recorded);

        // Back to the recorded inputs: the old entry still applies.
        inner.set_fingerprint(Fingerprint::empty().with("version", 1i64));
        inner.set_failing(false);
        builder.run(&f.ctx).unwrap();
        assert_eq!(inner.runs(), 1);
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let f = fixture();
        let inner = Arc::new(RecordingBuilder::new("compile:core"));
        let builder = cached(&f, &inner);
        f.store
            .put(&BuilderId::new("compile:core").cache_key(), b"garbage")
            .unwrap();

        builder.run(&f.ctx).unwrap();

        assert_eq!(inner.runs(), 1);
        assert!(matches!(
            f.events.misses().first(),
            Some(MissCause::Unreadable { .. })
        ));
        builder.run(&f.ctx).unwrap();
        assert_eq!(inner.runs(), 1);
    }

    #[test]
    fn test_unencodable_fingerprint_fails_before_running() {
        let f = fixture();
        let inner = Arc::new(RecordingBuilder::new("compile:core"));
        inner.set_fingerprint(
            Fingerprint::empty().with_typed("handle", TypedValue::opaque("Socket", "fd 3")),
        );
        let builder = cached(&f, &inner);

        let err = builder.run(&f.ctx).unwrap_err();
        assert!(format!("{:#}", err).contains("cannot be cached"));
        assert_eq!(inner.runs(), 0);
        assert!(f.store.is_empty());
    }

    /// `link:app` depends on `compile:lib`, both cached in the fixture store.
    fn linked() -> (Fixture, Arc<RecordingBuilder>, Arc<RecordingBuilder>) {
        let mut f = fixture();
        let lib = Arc::new(
            RecordingBuilder::new("compile:lib")
                .outputs(&["bin/lib.dll"])
                .writes_to(f.target.clone()),
        );
        let app = Arc::new(
            RecordingBuilder::new("link:app")
                .reads(&["compile:lib"])
                .outputs(&["bin/app.exe"])
                .writes_to(f.target.clone()),
        );
        f.ctx = std::mem::replace(&mut f.ctx, BuildContext::new())
            .with_cache(f.store.clone(), f.target.clone());
        f.ctx.add_builder(app.clone(), &[lib.clone()]);
        (f, lib, app)
    }

    #[test]
    fn test_changed_prerequisite_output_reruns_dependent() {
        let (f, lib, app) = linked();
        f.ctx.run().unwrap();
        f.ctx.run().unwrap();
        assert_eq!((lib.runs(), app.runs()), (1, 1));

        lib.set_fingerprint(Fingerprint::empty().with("optimize", true));
        lib.set_contents("optimized");
        f.ctx.run().unwrap();

        assert_eq!((lib.runs(), app.runs()), (2, 2));
        assert!(f.events.misses().iter().any(|cause| matches!(
            cause,
            MissCause::FingerprintChanged { properties }
                if properties == &["prerequisites.compile:lib.bin/lib.dll".to_string()]
        )));

        f.ctx.run().unwrap();
        assert_eq!((lib.runs(), app.runs()), (2, 2));
    }

    #[test]
    fn test_identical_prerequisite_output_keeps_dependent_cached() {
        let (f, lib, app) = linked();
        f.ctx.run().unwrap();

        // Rebuilt, but to the same bytes.
        lib.set_fingerprint(Fingerprint::empty().with("verbose", true));
        f.ctx.run().unwrap();

        assert_eq!((lib.runs(), app.runs()), (2, 1));
    }

    #[test]
    fn test_invalidate() {
        let f = fixture();
        let inner = Arc::new(RecordingBuilder::new("compile:core"));
        let builder = cached(&f, &inner);

        builder.run(&f.ctx).unwrap();
        builder.invalidate().unwrap();
        builder.run(&f.ctx).unwrap();

        assert_eq!(inner.runs(), 2);
    }
}

//! Build context - registers builders and runs them in dependency order.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use anyhow::Result;
use rayon::prelude::*;

use crate::builder::cached::CachedBuilder;
use crate::builder::events::{BuildEvent, BuildObserver};
use crate::builder::graph::BuildGraph;
use crate::builder::progress::ProgressObserver;
use crate::builder::store::{CacheStore, FileCacheStore};
use crate::builder::{BuildError, Builder, OutputSet};
use crate::core::{BuilderId, TargetRoot};
use crate::util::Config;

/// Turns a registered builder into the builder that actually runs, e.g. by
/// wrapping it in a [`CachedBuilder`].
pub type WrapperFactory = Arc<dyn Fn(Arc<dyn Builder>) -> Arc<dyn Builder> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Execution {
    Sequential,
    Parallel { jobs: Option<usize> },
}

/// Collects builders with their prerequisites and runs them.
///
/// Results are recorded per builder while a run is in progress, so a builder
/// can read the outputs of its prerequisites through
/// [`get_results`](BuildContext::get_results). Each call to
/// [`run`](BuildContext::run) starts from an empty result map.
pub struct BuildContext {
    graph: BuildGraph,
    wrapper: Option<WrapperFactory>,
    observers: Vec<Arc<dyn BuildObserver>>,
    execution: Execution,
    results: RwLock<HashMap<BuilderId, OutputSet>>,
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("graph", &self.graph)
            .field("wrapped", &self.wrapper.is_some())
            .field("observers", &self.observers.len())
            .field("execution", &self.execution)
            .finish()
    }
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildContext {
    /// An empty context running builders sequentially and unwrapped.
    pub fn new() -> Self {
        BuildContext {
            graph: BuildGraph::new(),
            wrapper: None,
            observers: Vec::new(),
            execution: Execution::Sequential,
            results: RwLock::new(HashMap::new()),
        }
    }

    /// Create a context from configuration: file cache, parallelism and
    /// progress bar as configured.
    pub fn from_config(config: &Config, project_root: &Path) -> Result<Self> {
        let mut ctx = BuildContext::new();

        if config.cache_enabled() {
            let store = FileCacheStore::open(config.cache_dir(project_root))?;
            let target = TargetRoot::new(config.target_dir(project_root));
            tracing::debug!(
                "caching builder results in {} for outputs under {}",
                store.dir().display(),
                target.path().display()
            );
            ctx = ctx.with_cache(Arc::new(store), target);
        }
        if config.parallel() {
            ctx = ctx.parallel(config.build.jobs);
        }
        if config.progress() {
            ctx = ctx.with_observer(Arc::new(ProgressObserver::new()));
        }

        Ok(ctx)
    }

    /// Run every builder through a [`CachedBuilder`] backed by `store`.
    pub fn with_cache(self, store: Arc<dyn CacheStore>, target: TargetRoot) -> Self {
        self.with_wrapper(move |inner| {
            let cached: Arc<dyn Builder> =
                Arc::new(CachedBuilder::new(inner, Arc::clone(&store), target.clone()));
            cached
        })
    }

    /// Wrap every builder with `factory` before running it.
    pub fn with_wrapper<F>(mut self, factory: F) -> Self
    where
        F: Fn(Arc<dyn Builder>) -> Arc<dyn Builder> + Send + Sync + 'static,
    {
        self.wrapper = Some(Arc::new(factory));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Run independent builders concurrently, using up to `jobs` threads
    /// (all cores when `None`).
    pub fn parallel(mut self, jobs: Option<usize>) -> Self {
        self.execution = Execution::Parallel { jobs };
        self
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.execution, Execution::Parallel { .. })
    }

    /// Register `builder`, to run after all of `prerequisites`.
    pub fn add_builder(&mut self, builder: Arc<dyn Builder>, prerequisites: &[Arc<dyn Builder>]) {
        self.graph.add_builder(builder, prerequisites);
    }

    pub fn graph(&self) -> &BuildGraph {
        &self.graph
    }

    /// The order `run` would execute builders in, without running them.
    pub fn build_order(&self) -> Result<Vec<BuilderId>, BuildError> {
        Ok(self.graph.sorted()?.iter().map(|b| b.id()).collect())
    }

    /// Builders grouped by dependency level, as parallel runs execute them.
    pub fn levels(&self) -> Result<Vec<Vec<BuilderId>>, BuildError> {
        Ok(self
            .graph
            .levels()?
            .iter()
            .map(|level| level.iter().map(|b| b.id()).collect())
            .collect())
    }

    /// Outputs recorded for `builder` in the current run.
    ///
    /// Fails if the builder has not completed in this run, which for a
    /// caller running inside the build means it was not declared as a
    /// prerequisite.
    pub fn get_results(&self, builder: &BuilderId) -> Result<OutputSet, BuildError> {
        self.results()
            .get(builder)
            .cloned()
            .ok_or_else(|| BuildError::ResultsNotAvailable {
                builder: builder.clone(),
            })
    }

    pub fn has_results(&self, builder: &BuilderId) -> bool {
        self.results().contains_key(builder)
    }

    /// Hand an event to every observer.
    pub fn notify(&self, event: &BuildEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }

    /// Run every registered builder, prerequisites first, and return the
    /// union of their outputs.
    ///
    /// The first failure stops the run; results recorded before it remain
    /// available through [`get_results`](BuildContext::get_results).
    pub fn run(&self) -> Result<OutputSet, BuildError> {
        let start = Instant::now();
        self.results_mut().clear();

        // A graph that cannot be ordered never starts, so it gets no events.
        let outcome = match self.execution {
            Execution::Sequential => self.graph.sorted().map(|order| self.run_sequential(order)),
            Execution::Parallel { jobs } => {
                self.graph.levels().map(|levels| self.run_parallel(levels, jobs))
            }
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("cannot order builders: {}", e);
                return Err(e);
            }
        };

        let finished = self.results().len();
        let elapsed = start.elapsed();
        self.notify(&BuildEvent::run_finished(
            outcome.is_ok(),
            elapsed.as_millis() as u64,
            finished,
        ));

        match &outcome {
            Ok(outputs) => tracing::info!(
                "finished {} builder(s) with {} output(s) in {:.2}s",
                finished,
                outputs.len(),
                elapsed.as_secs_f64()
            ),
            Err(e) => tracing::warn!("build failed after {} builder(s): {}", finished, e),
        }

        outcome
    }

    fn run_sequential(&self, order: Vec<Arc<dyn Builder>>) -> Result<OutputSet, BuildError> {
        self.notify(&BuildEvent::run_started(order.len(), false));

        let mut outputs = OutputSet::new();
        for (index, builder) in order.iter().enumerate() {
            outputs.extend(self.run_builder(builder, index, order.len())?);
        }
        Ok(outputs)
    }

    fn run_parallel(
        &self,
        levels: Vec<Vec<Arc<dyn Builder>>>,
        jobs: Option<usize>,
    ) -> Result<OutputSet, BuildError> {
        let total: usize = levels.iter().map(Vec::len).sum();
        self.notify(&BuildEvent::run_started(total, true));

        let mut pool = rayon::ThreadPoolBuilder::new();
        if let Some(jobs) = jobs {
            pool = pool.num_threads(jobs);
        }
        let pool = pool.build()?;

        let mut outputs = OutputSet::new();
        let mut started = 0;
        for level in &levels {
            let results: Vec<Result<OutputSet, BuildError>> = pool.install(|| {
                level
                    .par_iter()
                    .enumerate()
                    .map(|(i, builder)| self.run_builder(builder, started + i, total))
                    .collect()
            });
            started += level.len();

            // Every builder of the level has finished here; report the first
            // failure in level order.
            for result in results {
                outputs.extend(result?);
            }
        }
        Ok(outputs)
    }

    fn run_builder(
        &self,
        builder: &Arc<dyn Builder>,
        index: usize,
        total: usize,
    ) -> Result<OutputSet, BuildError> {
        let id = builder.id();
        let runnable = match &self.wrapper {
            Some(wrap) => wrap(Arc::clone(builder)),
            None => Arc::clone(builder),
        };

        self.notify(&BuildEvent::builder_started(&id, index, total));
        tracing::debug!("running `{}` ({}/{})", id, index + 1, total);

        match runnable.run(self) {
            Ok(outputs) => {
                self.results_mut().insert(id.clone(), outputs.clone());
                self.notify(&BuildEvent::builder_finished(&id, &outputs));
                Ok(outputs)
            }
            Err(e) => {
                self.notify(&BuildEvent::builder_failed(&id, format!("{:#}", e)));
                Err(BuildError::Execution {
                    builder: id,
                    source: e.into(),
                })
            }
        }
    }

    fn results(&self) -> RwLockReadGuard<'_, HashMap<BuilderId, OutputSet>> {
        self.results.read().unwrap_or_else(|e| e.into_inner())
    }

    fn results_mut(&self) -> RwLockWriteGuard<'_, HashMap<BuilderId, OutputSet>> {
        self.results.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::builder::store::MemoryCacheStore;
    use crate::core::TargetRelativePath;
    use crate::test_support::{EventLog, RecordingBuilder};

    #[test]
    fn test_shared_prerequisite_runs_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::new(RecordingBuilder::new("a").outputs(&["a.out"]).log_to(&log));
        let b = Arc::new(
            RecordingBuilder::new("b")
                .outputs(&["b.out"])
                .reads(&["a"])
                .log_to(&log),
        );
        let c = Arc::new(
            RecordingBuilder::new("c")
                .outputs(&["c.out"])
                .reads(&["a"])
                .log_to(&log),
        );

        let mut ctx = BuildContext::new();
        ctx.add_builder(b.clone(), &[a.clone()]);
        ctx.add_builder(c.clone(), &[a.clone()]);
        ctx.add_builder(a.clone(), &[]);

        let outputs = ctx.run().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        let names: Vec<String> = outputs.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["a.out", "b.out", "c.out"]);
        assert_eq!(
            ctx.build_order().unwrap(),
            vec![BuilderId::new("a"), BuilderId::new("b"), BuilderId::new("c")]
        );
    }

    #[test]
    fn test_get_results_requires_completed_builder() {
        let a = Arc::new(RecordingBuilder::new("a").outputs(&["a.out"]));
        // `b` reads `c` but doesn't depend on it
        let b = Arc::new(RecordingBuilder::new("b").reads(&["c"]));
        let c = Arc::new(RecordingBuilder::new("c"));

        let mut ctx = BuildContext::new();
        assert!(ctx.get_results(&BuilderId::new("a")).is_err());

        ctx.add_builder(a.clone(), &[]);
        ctx.add_builder(b.clone(), &[a.clone()]);
        ctx.add_builder(c.clone(), &[]);

        let err = ctx.run().unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::Execution);
        assert!(format!("{}", err).contains("no results for `c`"));

        // `a` finished before the failure and stays queryable
        let expected: OutputSet = [TargetRelativePath::new("a.out").unwrap()].into_iter().collect();
        assert_eq!(ctx.get_results(&BuilderId::new("a")).unwrap(), expected);
        assert!(!ctx.has_results(&BuilderId::new("c")));
    }

    #[test]
    fn test_run_clears_previous_results() {
        let a = Arc::new(RecordingBuilder::new("a").outputs(&["a.out"]));
        let mut ctx = BuildContext::new();
        ctx.add_builder(a.clone(), &[]);

        ctx.run().unwrap();
        assert!(ctx.has_results(&BuilderId::new("a")));

        a.set_failing(true);
        assert!(ctx.run().is_err());
        assert!(matches!(
            ctx.get_results(&BuilderId::new("a")),
            Err(BuildError::ResultsNotAvailable { .. })
        ));
    }

    #[test]
    fn test_failure_stops_the_run() {
        let a = Arc::new(RecordingBuilder::new("a"));
        let b = Arc::new(RecordingBuilder::new("b"));
        a.set_failing(true);

        let mut ctx = BuildContext::new();
        ctx.add_builder(b.clone(), &[a.clone()]);

        let err = ctx.run().unwrap_err();
        assert_eq!(err.builder(), Some(&BuilderId::new("a")));
        assert_eq!(b.runs(), 0);
    }

    #[test]
    fn test_wrapper_is_applied() {
        let store = Arc::new(MemoryCacheStore::new());
        let tmp = tempfile::TempDir::new().unwrap();
        let a = Arc::new(RecordingBuilder::new("a"));

        let mut ctx = BuildContext::new().with_cache(store.clone(), TargetRoot::new(tmp.path()));
        ctx.add_builder(a.clone(), &[]);

        ctx.run().unwrap();
        ctx.run().unwrap();

        assert_eq!(a.runs(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_events() {
        let events = Arc::new(EventLog::default());
        let a = Arc::new(RecordingBuilder::new("a"));
        let mut ctx = BuildContext::new().with_observer(events.clone());
        ctx.add_builder(a.clone(), &[]);

        ctx.run().unwrap();

        assert_eq!(
            events.reasons(),
            vec!["run-started", "builder-started", "builder-finished", "run-finished"]
        );
    }

    #[test]
    fn test_cycle_is_reported_before_running() {
        let a = Arc::new(RecordingBuilder::new("a"));
        let b = Arc::new(RecordingBuilder::new("b"));

        let mut ctx = BuildContext::new();
        ctx.add_builder(a.clone(), &[b.clone()]);
        ctx.add_builder(b.clone(), &[a.clone()]);

        assert!(matches!(ctx.run(), Err(BuildError::CycleDetected { .. })));
        assert_eq!(a.runs() + b.runs(), 0);
    }

    #[test]
    fn test_unordered_graph_emits_no_events() {
        for parallel in [false, true] {
            let events = Arc::new(EventLog::default());
            let a = Arc::new(RecordingBuilder::new("a"));
            let b = Arc::new(RecordingBuilder::new("b"));

            let mut ctx = BuildContext::new().with_observer(events.clone());
            if parallel {
                ctx = ctx.parallel(Some(2));
            }
            ctx.add_builder(a.clone(), &[b.clone()]);
            ctx.add_builder(b.clone(), &[a.clone()]);

            assert!(ctx.run().is_err());
            assert!(events.reasons().is_empty(), "parallel: {}", parallel);
        }
    }

    #[test]
    fn test_parallel_respects_prerequisites() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::new(RecordingBuilder::new("a").log_to(&log));
        let b = Arc::new(RecordingBuilder::new("b").reads(&["a"]).log_to(&log));
        let c = Arc::new(RecordingBuilder::new("c").reads(&["a"]).log_to(&log));
        let d = Arc::new(RecordingBuilder::new("d").reads(&["b", "c"]).log_to(&log));

        let mut ctx = BuildContext::new().parallel(Some(2));
        ctx.add_builder(d.clone(), &[b.clone(), c.clone()]);
        ctx.add_builder(b.clone(), &[a.clone()]);
        ctx.add_builder(c.clone(), &[a.clone()]);

        ctx.run().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], "a");
        assert_eq!(log[3], "d");
        assert_eq!(
            ctx.levels().unwrap(),
            vec![
                vec![BuilderId::new("a")],
                vec![BuilderId::new("b"), BuilderId::new("c")],
                vec![BuilderId::new("d")],
            ]
        );
    }

    #[test]
    fn test_parallel_failure_finishes_the_level() {
        let a = Arc::new(RecordingBuilder::new("a"));
        let b = Arc::new(RecordingBuilder::new("b"));
        let c = Arc::new(RecordingBuilder::new("c"));
        a.set_failing(true);

        let mut ctx = BuildContext::new().parallel(None);
        ctx.add_builder(a.clone(), &[]);
        ctx.add_builder(b.clone(), &[]);
        ctx.add_builder(c.clone(), &[a.clone(), b.clone()]);

        let err = ctx.run().unwrap_err();
        assert_eq!(err.builder(), Some(&BuilderId::new("a")));
        assert_eq!(b.runs(), 1);
        assert_eq!(c.runs(), 0);
    }

    #[test]
    fn test_from_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.build.parallel = Some(true);

        let ctx = BuildContext::from_config(&config, tmp.path()).unwrap();
        assert!(ctx.is_parallel());
        assert!(tmp.path().join(".cairn").join("cache").is_dir());

        config.cache.enabled = Some(false);
        config.cache.dir = Some("elsewhere".into());
        BuildContext::from_config(&config, tmp.path()).unwrap();
        assert!(!tmp.path().join("elsewhere").exists());
    }
}

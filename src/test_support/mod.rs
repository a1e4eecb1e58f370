//! Test doubles for builder and context tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use crate::builder::{BuildContext, BuildEvent, BuildObserver, Builder, MissCause, OutputSet};
use crate::core::{BuilderId, TargetRelativePath, TargetRoot};
use crate::fingerprint::{Fingerprint, FingerprintError};
use crate::util::fs::write_atomic;

/// A builder that records how often it ran and optionally:
/// - reads the results of other builders,
/// - writes its outputs under a target root (its id, or set contents),
/// - appends its id to a shared log,
/// - fails on demand.
pub struct RecordingBuilder {
    id: BuilderId,
    reads: Vec<BuilderId>,
    outputs: Vec<String>,
    target: Option<TargetRoot>,
    log: Option<Arc<Mutex<Vec<String>>>>,
    fingerprint: Mutex<Fingerprint>,
    contents: Mutex<Option<String>>,
    failing: AtomicBool,
    runs: AtomicUsize,
}

impl RecordingBuilder {
    pub fn new(id: &str) -> Self {
        RecordingBuilder {
            id: BuilderId::new(id),
            reads: Vec::new(),
            outputs: Vec::new(),
            target: None,
            log: None,
            fingerprint: Mutex::new(Fingerprint::empty()),
            contents: Mutex::new(None),
            failing: AtomicBool::new(false),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn arc(id: &str) -> Arc<dyn Builder> {
        Arc::new(RecordingBuilder::new(id))
    }

    pub fn outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn reads(mut self, builders: &[&str]) -> Self {
        self.reads = builders.iter().map(|s| BuilderId::new(*s)).collect();
        self
    }

    pub fn writes_to(mut self, target: TargetRoot) -> Self {
        self.target = Some(target);
        self
    }

    pub fn log_to(mut self, log: &Arc<Mutex<Vec<String>>>) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }

    pub fn set_fingerprint(&self, fingerprint: Fingerprint) {
        *self.fingerprint.lock().unwrap() = fingerprint;
    }

    pub fn set_contents(&self, contents: &str) {
        *self.contents.lock().unwrap() = Some(contents.to_string());
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Builder for RecordingBuilder {
    fn id(&self) -> BuilderId {
        self.id.clone()
    }

    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        Ok(self.fingerprint.lock().unwrap().clone())
    }

    fn run(&self, ctx: &BuildContext) -> Result<OutputSet> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("{} was told to fail", self.id);
        }
        for id in &self.reads {
            ctx.get_results(id)?;
        }

        let contents = self
            .contents
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| self.id.to_string());
        let mut outputs = OutputSet::new();
        for output in &self.outputs {
            let path = TargetRelativePath::new(output)?;
            if let Some(target) = &self.target {
                write_atomic(&target.resolve(&path), contents.as_bytes())?;
            }
            outputs.insert(path);
        }

        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.id.to_string());
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(outputs)
    }
}

/// Observer keeping every event it receives.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<BuildEvent>>,
}

impl EventLog {
    /// The `reason` tag of each event, in arrival order.
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| {
                let json: serde_json::Value = serde_json::from_str(&e.to_json()).unwrap();
                json["reason"].as_str().unwrap().to_string()
            })
            .collect()
    }

    pub fn misses(&self) -> Vec<MissCause> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                BuildEvent::CacheMiss { cause, .. } => Some(cause.clone()),
                _ => None,
            })
            .collect()
    }
}

impl BuildObserver for EventLog {
    fn on_event(&self, event: &BuildEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

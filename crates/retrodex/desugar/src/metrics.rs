// Retrodex
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Desugaring metrics

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Metrics for a single pass invocation on one class
#[derive(Debug, Clone, Serialize)]
pub struct PassMetrics {
    /// Name of the pass
    pub pass_name: String,
    /// Duration of the pass in milliseconds
    pub duration_ms: u128,
    /// Whether the pass reported a change
    pub changed: bool,
}

/// Accumulated figures of one pass over a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassTotals {
    pub invocations: usize,
    pub classes_changed: usize,
    pub duration_ms: u128,
}

/// Kinds of synthesized artifacts that are counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    LambdaClass,
    Companion,
    Bridge,
    Backport,
    Forwarder,
    Dispatcher,
}

impl Artifact {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        match self {
            Self::LambdaClass => 0,
            Self::Companion => 1,
            Self::Bridge => 2,
            Self::Backport => 3,
            Self::Forwarder => 4,
            Self::Dispatcher => 5,
        }
    }
}

/// Artifact counters of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactCounts {
    pub lambda_classes: usize,
    pub companions: usize,
    pub bridges: usize,
    pub backports: usize,
    pub forwarders: usize,
    pub dispatchers: usize,
}

/// Metrics of a desugaring run
#[derive(Debug, Clone, Default, Serialize)]
pub struct DesugarMetrics {
    /// Per-pass totals
    pub passes: BTreeMap<String, PassTotals>,
    pub artifacts: ArtifactCounts,
    pub classes_processed: usize,
    pub diagnostics: usize,
    pub duration_ms: u128,
}

/// Thread-safe recorder shared by the workers of a run
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    passes: Mutex<BTreeMap<String, PassTotals>>,
    artifacts: [AtomicUsize; Artifact::COUNT],
    classes: AtomicUsize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one pass invocation
    pub fn record_pass(&self, metrics: PassMetrics) {
        let mut passes = self.passes.lock();
        let totals = passes.entry(metrics.pass_name).or_default();
        totals.invocations += 1;
        totals.duration_ms += metrics.duration_ms;
        if metrics.changed {
            totals.classes_changed += 1;
        }
    }

    pub fn record_artifact(&self, artifact: Artifact) {
        self.artifacts[artifact.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_class(&self) {
        self.classes.fetch_add(1, Ordering::Relaxed);
    }

    fn artifact(&self, artifact: Artifact) -> usize {
        self.artifacts[artifact.index()].load(Ordering::Relaxed)
    }

    /// Snapshot the recorded figures
    pub fn snapshot(&self, diagnostics: usize, duration_ms: u128) -> DesugarMetrics {
        DesugarMetrics {
            passes: self.passes.lock().clone(),
            artifacts: ArtifactCounts {
                lambda_classes: self.artifact(Artifact::LambdaClass),
                companions: self.artifact(Artifact::Companion),
                bridges: self.artifact(Artifact::Bridge),
                backports: self.artifact(Artifact::Backport),
                forwarders: self.artifact(Artifact::Forwarder),
                dispatchers: self.artifact(Artifact::Dispatcher),
            },
            classes_processed: self.classes.load(Ordering::Relaxed),
            diagnostics,
            duration_ms,
        }
    }
}

impl DesugarMetrics {
    /// Publish the run figures to the installed metrics recorder
    pub fn publish(&self) {
        counter!("retrodex_desugar_classes_processed", self.classes_processed as u64);
        counter!("retrodex_desugar_lambda_classes", self.artifacts.lambda_classes as u64);
        counter!("retrodex_desugar_companions", self.artifacts.companions as u64);
        counter!("retrodex_desugar_bridges", self.artifacts.bridges as u64);
        counter!("retrodex_desugar_backports", self.artifacts.backports as u64);
        counter!("retrodex_desugar_forwarders", self.artifacts.forwarders as u64);
        counter!("retrodex_desugar_dispatchers", self.artifacts.dispatchers as u64);
        counter!("retrodex_desugar_diagnostics", self.diagnostics as u64);
        gauge!("retrodex_desugar_last_run_ms", self.duration_ms as f64);
    }

    /// Add the figures of another run, e.g. a separately desugared unit
    pub fn absorb(&mut self, other: &DesugarMetrics) {
        for (name, totals) in &other.passes {
            let entry = self.passes.entry(name.clone()).or_default();
            entry.invocations += totals.invocations;
            entry.classes_changed += totals.classes_changed;
            entry.duration_ms += totals.duration_ms;
        }
        let (a, b) = (&mut self.artifacts, &other.artifacts);
        a.lambda_classes += b.lambda_classes;
        a.companions += b.companions;
        a.bridges += b.bridges;
        a.backports += b.backports;
        a.forwarders += b.forwarders;
        a.dispatchers += b.dispatchers;
        self.classes_processed += other.classes_processed;
        self.diagnostics += other.diagnostics;
        self.duration_ms += other.duration_ms;
    }

    /// Total number of synthesized artifacts
    pub fn total_artifacts(&self) -> usize {
        let a = &self.artifacts;
        a.lambda_classes + a.companions + a.bridges + a.backports + a.forwarders + a.dispatchers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_totals() {
        let recorder = MetricsRecorder::new();
        for changed in [true, false, true] {
            recorder.record_pass(PassMetrics {
                pass_name: "lambda".to_string(),
                duration_ms: 2,
                changed,
            });
        }
        let metrics = recorder.snapshot(0, 10);
        let totals = &metrics.passes["lambda"];
        assert_eq!(totals.invocations, 3);
        assert_eq!(totals.classes_changed, 2);
        assert_eq!(totals.duration_ms, 6);
    }

    #[test]
    fn test_artifact_counts() {
        let recorder = MetricsRecorder::new();
        recorder.record_artifact(Artifact::Companion);
        recorder.record_artifact(Artifact::Bridge);
        recorder.record_artifact(Artifact::Bridge);
        recorder.record_class();
        let metrics = recorder.snapshot(1, 0);
        assert_eq!(metrics.artifacts.bridges, 2);
        assert_eq!(metrics.total_artifacts(), 3);
        assert_eq!(metrics.classes_processed, 1);
        metrics.publish();
    }
}

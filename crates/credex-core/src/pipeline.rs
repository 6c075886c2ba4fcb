//! # Pipeline Orchestrator
//!
//! Runs the daily analytics in order:
//!
//! ```text
//! Snapshot ──fail──► abort
//!    │
//! Stance   ──fail──► abort
//!    │
//! Restake cap ──fail──► log, day still succeeds
//! ```

use crate::cluster::{ClusterBuilder, NegationClusterBuilder};
use crate::config::AnalyticsConfig;
use crate::reconcile::{CapReconciler, CapReport};
use crate::snapshot::SnapshotBuilder;
use crate::stance::StanceNormalizer;
use crate::storage::LedgerStore;
use crate::topics::RationaleTopicResolver;
use crate::{JobReport, LedgerError, LedgerResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Per-stage outcome of one pipeline day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub day: NaiveDate,
    pub success: bool,
    pub message: String,
    pub snapshot: JobReport,
    /// `None` when the snapshot stage aborted the run.
    pub stance: Option<JobReport>,
    /// `None` when an earlier stage aborted the run.
    pub restake_cap: Option<CapReport>,
    pub duration_ms: u64,
}

/// Outcome of [`Pipeline::run_pipeline_range`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRangeReport {
    pub succeeded: u32,
    pub failed: u32,
    pub days: Vec<PipelineReport>,
}

/// The snapshot → stance → restake cap sequence.
pub struct Pipeline {
    snapshots: SnapshotBuilder,
    stances: StanceNormalizer,
    reconciler: CapReconciler,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(
        snapshots: SnapshotBuilder,
        stances: StanceNormalizer,
        reconciler: CapReconciler,
    ) -> Self {
        Self {
            snapshots,
            stances,
            reconciler,
        }
    }

    /// Wire the pipeline with the default cluster builder and topic resolver.
    pub fn with_defaults(store: Arc<LedgerStore>, config: AnalyticsConfig) -> LedgerResult<Self> {
        config.validate()?;
        let clusters: Arc<dyn ClusterBuilder> = Arc::new(NegationClusterBuilder::new(
            Arc::clone(&store),
            config.cluster_max_depth,
        ));
        let topics = Arc::new(RationaleTopicResolver::new(Arc::clone(&store)));
        Ok(Self::new(
            SnapshotBuilder::new(Arc::clone(&store), clusters, topics),
            StanceNormalizer::new(Arc::clone(&store), config),
            CapReconciler::new(store),
        ))
    }

    pub fn snapshots(&self) -> &SnapshotBuilder {
        &self.snapshots
    }

    pub fn stances(&self) -> &StanceNormalizer {
        &self.stances
    }

    pub fn reconciler(&self) -> &CapReconciler {
        &self.reconciler
    }

    /// Run every stage for `day`.
    pub fn run_daily_delta_pipeline(&self, day: NaiveDate) -> PipelineReport {
        let started = Instant::now();
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

        let snapshot = self.snapshots.run(day);
        if !snapshot.success {
            return PipelineReport {
                day,
                success: false,
                message: format!("snapshot stage failed: {}", snapshot.message),
                snapshot,
                stance: None,
                restake_cap: None,
                duration_ms: elapsed(started),
            };
        }

        let stance = self.stances.run(day);
        if !stance.success {
            return PipelineReport {
                day,
                success: false,
                message: format!("stance stage failed: {}", stance.message),
                snapshot,
                stance: Some(stance),
                restake_cap: None,
                duration_ms: elapsed(started),
            };
        }

        let cap = self.reconciler.enforce(None, None);
        let message = if cap.success {
            format!("pipeline for {day} completed")
        } else {
            tracing::warn!(day = %day, error = %cap.message, "restake cap stage failed, continuing");
            format!("pipeline for {day} completed; restake cap stage failed: {}", cap.message)
        };
        let report = PipelineReport {
            day,
            success: true,
            message,
            snapshot,
            stance: Some(stance),
            restake_cap: Some(cap),
            duration_ms: elapsed(started),
        };
        tracing::info!(day = %day, duration_ms = report.duration_ms, "daily pipeline finished");
        report
    }

    /// Run the pipeline for every day in `from..=to`, continuing past failed
    /// days.
    pub fn run_pipeline_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<PipelineRangeReport> {
        if from > to {
            return Err(LedgerError::Config(format!(
                "pipeline range start {from} is after end {to}"
            )));
        }
        let mut report = PipelineRangeReport {
            succeeded: 0,
            failed: 0,
            days: Vec::new(),
        };
        for day in from.iter_days().take_while(|d| *d <= to) {
            let day_report = self.run_daily_delta_pipeline(day);
            if day_report.success {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            report.days.push(day_report);
        }
        tracing::info!(
            from = %from,
            to = %to,
            succeeded = report.succeeded,
            failed = report.failed,
            "pipeline range finished"
        );
        Ok(report)
    }
}

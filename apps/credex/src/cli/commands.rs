//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands. Batch
//! jobs print their report and fail the process when the report does.

use super::DeltaTarget;
use crate::api::{self, AppState};
use crate::config::AppConfig;
use chrono::NaiveDate;
use credex_core::{
    CapReconciler, DeltaAggregator, JobReport, LedgerError, LedgerResult, LedgerStore,
    NegationClusterBuilder, Pipeline, PipelineReport, PointId, RationaleId,
    RationaleTopicResolver, TopicId, UserId, compute_contested_points,
};
use serde::Serialize;
use std::sync::Arc;

// =============================================================================
// HELPERS
// =============================================================================

fn open_store(config: &AppConfig) -> LedgerResult<Arc<LedgerStore>> {
    LedgerStore::open(&config.database).map(Arc::new)
}

fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn pipeline_for(config: &AppConfig) -> LedgerResult<Pipeline> {
    Pipeline::with_defaults(open_store(config)?, config.analytics.clone())
}

/// Print a batch job report; a failed report fails the command.
fn finish_job(what: &str, day: NaiveDate, report: &JobReport, json_mode: bool) -> LedgerResult<()> {
    if json_mode {
        print_json(report);
    } else {
        println!("{} {}", what, day);
        println!("==================");
        println!("Success:  {}", report.success);
        println!("Message:  {}", report.message);
        println!("Read:     {}", report.stats.rows_read);
        println!("Written:  {}", report.stats.rows_written);
        println!("Carried:  {}", report.stats.rows_carried);
        println!("Buckets:  {}", report.stats.buckets);
        println!("Skipped:  {}", report.stats.skipped);
    }
    if report.success {
        Ok(())
    } else {
        Err(LedgerError::Consistency(format!(
            "{} failed for {}: {}",
            what, day, report.message
        )))
    }
}

fn print_pipeline_day(report: &PipelineReport) {
    let stage = |ok: Option<bool>| match ok {
        Some(true) => "ok",
        Some(false) => "FAILED",
        None => "skipped",
    };
    println!(
        "{}  snapshot {:<7} stance {:<7} restake-cap {:<7} {:>6} ms",
        report.day,
        stage(Some(report.snapshot.success)),
        stage(report.stance.as_ref().map(|s| s.success)),
        stage(report.restake_cap.as_ref().map(|c| c.success)),
        report.duration_ms
    );
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create an empty ledger database (all tables initialised).
pub fn cmd_init(config: &AppConfig, json_mode: bool, force: bool) -> LedgerResult<()> {
    let path = &config.database;
    if path.exists() {
        if !force {
            return Err(LedgerError::Config(format!(
                "database {} already exists (use --force to replace it)",
                path.display()
            )));
        }
        std::fs::remove_file(path).map_err(|e| {
            LedgerError::Io(format!("cannot remove {}: {}", path.display(), e))
        })?;
        tracing::warn!(database = %path.display(), "existing database removed");
    }
    open_store(config)?;

    if json_mode {
        print_json(&serde_json::json!({
            "database": path.to_string_lossy(),
            "created": true
        }));
    } else {
        println!("Initialized ledger database at {}", path.display());
    }
    Ok(())
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: &AppConfig, host: &str, port: u16) -> LedgerResult<()> {
    let state = AppState::new(open_store(config)?, config)?;

    println!("Credex Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Database: {}", config.database.display());
    println!("  Space:    {}", config.space);
    println!("  API keys: {}", config.api_keys.len());
    println!();
    println!("Endpoints:");
    println!("  GET  /health            - Health check");
    println!("  POST /negate            - Negate a point");
    println!("  POST /restake           - Create or edit a restake");
    println!("  POST /slash             - Slash a restake");
    println!("  POST /doubt             - Place or increase a doubt");
    println!("  POST /restake/validate  - Validate a restake amount");
    println!("  POST /restake/enforce   - Enforce the restake cap");
    println!("  POST /pipeline/run      - Run the daily pipeline");
    println!("  POST /delta             - Compute a delta");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, state).await
}

// =============================================================================
// ANALYTICS JOBS
// =============================================================================

pub fn cmd_snapshot(config: &AppConfig, json_mode: bool, day: NaiveDate) -> LedgerResult<()> {
    let pipeline = pipeline_for(config)?;
    let report = pipeline.snapshots().run(day);
    finish_job("Snapshot", day, &report, json_mode)
}

pub fn cmd_stance(config: &AppConfig, json_mode: bool, day: NaiveDate) -> LedgerResult<()> {
    let pipeline = pipeline_for(config)?;
    let report = pipeline.stances().run(day);
    finish_job("Stances", day, &report, json_mode)
}

/// Run the full daily pipeline for one day.
pub fn cmd_pipeline(config: &AppConfig, json_mode: bool, day: NaiveDate) -> LedgerResult<()> {
    let pipeline = pipeline_for(config)?;
    let report = pipeline.run_daily_delta_pipeline(day);

    if json_mode {
        print_json(&report);
    } else {
        print_pipeline_day(&report);
        println!("{}", report.message);
    }
    if report.success {
        Ok(())
    } else {
        Err(LedgerError::Consistency(report.message))
    }
}

/// Run the daily pipeline for every day in `from..=to`.
pub fn cmd_pipeline_range(
    config: &AppConfig,
    json_mode: bool,
    from: NaiveDate,
    to: NaiveDate,
) -> LedgerResult<()> {
    let pipeline = pipeline_for(config)?;
    let report = pipeline.run_pipeline_range(from, to)?;

    if json_mode {
        print_json(&report);
    } else {
        for day in &report.days {
            print_pipeline_day(day);
        }
        println!();
        println!("Succeeded: {}  Failed: {}", report.succeeded, report.failed);
    }
    if report.failed == 0 {
        Ok(())
    } else {
        Err(LedgerError::Consistency(format!(
            "{} of {} pipeline days failed",
            report.failed,
            report.days.len()
        )))
    }
}

// =============================================================================
// RESTAKE CAP COMMANDS
// =============================================================================

pub fn cmd_enforce_cap(
    config: &AppConfig,
    json_mode: bool,
    user: Option<u64>,
    point: Option<u64>,
) -> LedgerResult<()> {
    let reconciler = CapReconciler::new(open_store(config)?);
    let report = reconciler.enforce(user.map(UserId), point.map(PointId));

    if json_mode {
        print_json(&report);
    } else {
        println!("{}", report.message);
        for adj in &report.adjustments {
            println!(
                "  restake {} (user {}, point {} / {}): {} -> {} (clawed back {})",
                adj.restake_id,
                adj.user_id,
                adj.point_id,
                adj.negation_id,
                adj.previous_amount,
                adj.new_amount,
                adj.clawed_back
            );
        }
    }
    if report.success {
        Ok(())
    } else {
        Err(LedgerError::Consistency(report.message))
    }
}

pub fn cmd_validate_restake(
    config: &AppConfig,
    json_mode: bool,
    user: u64,
    point: u64,
    amount: i64,
) -> LedgerResult<()> {
    let reconciler = CapReconciler::new(open_store(config)?);
    let validation = reconciler.validate(UserId(user), PointId(point), amount)?;

    if json_mode {
        print_json(&validation);
    } else if validation.valid {
        println!(
            "Restake of {} is within the endorsement of {}",
            amount, validation.endorse_amount
        );
    } else {
        println!(
            "Restake of {} exceeds the endorsement (max allowed {})",
            amount, validation.max_allowed
        );
    }
    Ok(())
}

// =============================================================================
// DELTA / CONTESTED COMMANDS
// =============================================================================

pub fn cmd_delta(
    config: &AppConfig,
    json_mode: bool,
    user_a: u64,
    user_b: u64,
    day: NaiveDate,
    target: DeltaTarget,
) -> LedgerResult<()> {
    let store = open_store(config)?;
    let aggregator = DeltaAggregator::new(
        Arc::clone(&store),
        Arc::new(NegationClusterBuilder::new(
            Arc::clone(&store),
            config.analytics.cluster_max_depth,
        )),
        config.analytics.clone(),
    );
    let (a, b) = (UserId(user_a), UserId(user_b));
    let result = match target {
        DeltaTarget::Cluster { root } => aggregator.compute_delta(a, b, PointId(root), day)?,
        DeltaTarget::Rationale { id } => {
            aggregator.compute_rationale_delta(a, b, RationaleId(id), day)?
        }
        DeltaTarget::Topic { id } => aggregator.compute_topic_delta(a, b, TopicId(id), day)?,
    };

    if json_mode {
        print_json(&result);
    } else {
        match result.delta {
            Some(delta) => println!("delta({}, {}) on {} = {:.4}", a, b, day, delta),
            None if result.no_interaction => {
                println!("delta({}, {}) on {}: no interaction", a, b, day);
            }
            None => println!("delta({}, {}) on {}: unresolved", a, b, day),
        }
    }
    Ok(())
}

pub fn cmd_contested(
    config: &AppConfig,
    json_mode: bool,
    day: NaiveDate,
    topic: Option<u64>,
    limit: usize,
) -> LedgerResult<()> {
    let store = open_store(config)?;
    let resolver = RationaleTopicResolver::new(Arc::clone(&store));
    let mut ranked = compute_contested_points(&store, &resolver, day, topic.map(TopicId))?;
    ranked.truncate(limit);

    if json_mode {
        print_json(&ranked);
        return Ok(());
    }

    println!("Most contested points on {}", day);
    println!("==========================");
    if ranked.is_empty() {
        println!("(no stances)");
    }
    for (rank, point) in ranked.iter().enumerate() {
        println!(
            "{:>3}. point {:<8} score {:.3}  (+{:.2} / -{:.2})",
            rank + 1,
            point.point_id,
            point.score,
            point.positive,
            point.negative
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> AppConfig {
        AppConfig {
            database: dir.path().join("cli.redb"),
            ..AppConfig::default()
        }
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_in(&dir);
        cmd_init(&config, true, false).expect("first init");
        assert!(cmd_init(&config, true, false).is_err());
        cmd_init(&config, true, true).expect("forced init");
        assert!(config.database.exists());
    }

    #[test]
    fn jobs_run_on_an_empty_ledger() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_in(&dir);
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid day");
        cmd_snapshot(&config, true, day).expect("snapshot");
        cmd_stance(&config, true, day).expect("stance");
        cmd_pipeline(&config, true, day).expect("pipeline");
        cmd_enforce_cap(&config, true, None, None).expect("enforce");
        cmd_contested(&config, true, day, None, 5).expect("contested");
    }

    #[test]
    fn delta_on_unknown_rationale_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_in(&dir);
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid day");
        let err = cmd_delta(&config, true, 1, 2, day, DeltaTarget::Rationale { id: 3 })
            .expect_err("unknown rationale");
        assert!(err.is_not_found());
    }
}

//! Pipeline orchestration: normalize → embed → dedup, once through.
//!
//! Each stage drains its queue in claimed batches until nothing is eligible,
//! the stage deadline passes, or cancellation is signaled. A stage-level
//! Postgres advisory lock keeps two orchestrator invocations from running
//! the same stage concurrently; within a stage, other workers claim disjoint
//! batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use newsriver_core::error::PipelineError;
use newsriver_core::PipelineDeps;

use crate::articles::run_normalize_batch;
use crate::dedup::run_dedup_batch;
use crate::embeddings::run_embed_batch;

/// Advisory lock namespace for stage serialization.
const STAGE_LOCK_SPACE: i32 = 0x4E52_5652; // "NRVR"

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Embed,
    Dedup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Normalize => "normalize",
            Stage::Embed => "embed",
            Stage::Dedup => "dedup",
        }
    }

    fn lock_key(&self) -> i32 {
        match self {
            Stage::Normalize => 1,
            Stage::Embed => 2,
            Stage::Dedup => 3,
        }
    }
}

/// Counters for one stage execution. Printed as the stage's status line.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StageStats {
    pub claimed: u32,
    pub processed: u32,
    pub merged: u32,
    pub new_stories: u32,
    pub gray_zone: u32,
    pub failed: u32,
}

impl StageStats {
    pub fn absorb(&mut self, other: StageStats) {
        self.claimed += other.claimed;
        self.processed += other.processed;
        self.merged += other.merged;
        self.new_stories += other.new_stories;
        self.gray_zone += other.gray_zone;
        self.failed += other.failed;
    }
}

impl std::fmt::Display for StageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "claimed={} processed={} merged={} new_stories={} gray_zone={} failed={}",
            self.claimed, self.processed, self.merged, self.new_stories, self.gray_zone, self.failed
        )
    }
}

/// Result of one `run_once` invocation.
#[derive(Debug, Default, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<(Stage, StageStats)>,
}

impl PipelineReport {
    pub fn failed(&self) -> bool {
        self.stages.iter().any(|(_, s)| s.failed > 0)
    }
}

/// Execute the stages in strict order. Each article moves through
/// normalize < embed < dedup serially; across articles no order holds.
pub async fn run_once(deps: &PipelineDeps, cancel: &AtomicBool) -> Result<PipelineReport> {
    let mut report = PipelineReport::default();
    for stage in [Stage::Normalize, Stage::Embed, Stage::Dedup] {
        if cancel.load(Ordering::Relaxed) {
            info!(stage = stage.as_str(), "Cancelled before stage start");
            break;
        }
        let stats = run_stage(deps, stage, cancel).await?;
        report.stages.push((stage, stats));
    }
    Ok(report)
}

/// Run one stage to completion under its advisory lock.
pub async fn run_stage(
    deps: &PipelineDeps,
    stage: Stage,
    cancel: &AtomicBool,
) -> Result<StageStats> {
    let mut stats = StageStats::default();

    // The lock lives on a dedicated connection; holding the connection holds
    // the lock.
    let mut lock_conn = deps.pool().acquire().await?;
    let (locked,): (bool,) =
        sqlx::query_as("SELECT pg_try_advisory_lock($1, $2)")
            .bind(STAGE_LOCK_SPACE)
            .bind(stage.lock_key())
            .fetch_one(&mut *lock_conn)
            .await?;
    if !locked {
        info!(stage = stage.as_str(), "Stage already running elsewhere, skipping");
        return Ok(stats);
    }

    let deadline = Instant::now() + std::time::Duration::from_secs(deps.config.stage_deadline_secs);
    let batch_size = deps.config.claim_batch_size;

    let result = loop {
        if cancel.load(Ordering::Relaxed) {
            info!(stage = stage.as_str(), "Cancellation requested, stopping after committed batch");
            break Ok(());
        }
        if Instant::now() >= deadline {
            warn!(stage = stage.as_str(), "Stage deadline reached");
            break Ok(());
        }

        let batch_result = match stage {
            Stage::Normalize => run_normalize_batch(deps, batch_size)
                .await
                .map_err(PipelineError::TransientIo),
            Stage::Embed => run_embed_batch(deps, batch_size).await,
            Stage::Dedup => run_dedup_batch(deps, batch_size).await,
        };

        match batch_result {
            Ok(delta) => {
                let drained = delta.claimed == 0;
                stats.absorb(delta);
                if drained {
                    break Ok(());
                }
            }
            Err(e) if e.is_transient() => {
                // Progress so far is committed; yield and let the next
                // invocation resume.
                warn!(stage = stage.as_str(), error = %e, "Transient failure, stage yielding");
                stats.failed += 1;
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };

    let _ = sqlx::query("SELECT pg_advisory_unlock($1, $2)")
        .bind(STAGE_LOCK_SPACE)
        .bind(stage.lock_key())
        .execute(&mut *lock_conn)
        .await;
    drop(lock_conn);

    result?;
    info!(stage = stage.as_str(), %stats, "Stage complete");
    Ok(stats)
}

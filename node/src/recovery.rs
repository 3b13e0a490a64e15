//! # Background Recovery
//!
//! Drains the staging area on a fixed interval: a staging pass, then a sync
//! pass, then a cleanup when every row was staged and committed. Rows left
//! unstaged, rejected by the commit path, or pushed while the pass ran keep
//! the area intact until a later pass commits them. Manual
//! `/staging/perform` and `/sync/perform` calls go through [`stage`] and
//! [`sync`] here too, so metrics count every pass regardless of trigger.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use ptm_resync::resend::{ResendError, ResyncOutcome, SyncReport};

use crate::api::{AppState, NodeEvent};

/// Summary of the most recent background pass, reported by `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassStatus {
    pub staging: ResyncOutcome,
    pub sync: SyncReport,
    /// Rows removed by cleanup; `None` when the area was kept.
    pub cleaned: Option<u64>,
    pub completed_at: String,
}

/// Run a staging pass and record it.
pub fn stage(state: &AppState) -> Result<ResyncOutcome, ResendError> {
    let outcome = state.manager.perform_staging()?;
    state.metrics.staging_passes_total.inc();
    Ok(outcome)
}

/// Run a sync pass and record its counters.
pub fn sync(state: &AppState) -> Result<SyncReport, ResendError> {
    let report = state.manager.sync_with_report()?;
    state
        .metrics
        .sync_versions_committed_total
        .inc_by(report.committed());
    state
        .metrics
        .sync_privacy_violations_total
        .inc_by(report.violations);
    Ok(report)
}

/// Wipe the staging area and refresh the row gauge.
pub fn cleanup(state: &AppState) -> Result<u64, ResendError> {
    let removed = state.manager.cleanup_staging_area()?;
    refresh_staging_gauge(state);
    Ok(removed)
}

pub fn refresh_staging_gauge(state: &AppState) {
    match state.staging.count_all() {
        Ok(rows) => state.metrics.staging_rows.set(rows as i64),
        Err(e) => tracing::warn!("failed to count staging rows: {}", e),
    }
}

/// One full pass. Returns `None` without touching anything when the
/// staging area is empty.
pub fn run_pass(state: &AppState) -> Result<Option<PassStatus>, ResendError> {
    if state.staging.count_all()? == 0 {
        return Ok(None);
    }
    let started = Instant::now();

    let staging = stage(state)?;
    let staged_rows = state.staging.count_staged()?;
    let report = sync(state)?;

    let cleaned = if staging == ResyncOutcome::Success
        && report.outcome == ResyncOutcome::Success
        && area_unchanged(state, staged_rows)?
    {
        Some(cleanup(state)?)
    } else {
        refresh_staging_gauge(state);
        None
    };

    state
        .metrics
        .recovery_pass_duration_seconds
        .observe(started.elapsed().as_secs_f64());

    let status = PassStatus {
        staging,
        sync: report,
        cleaned,
        completed_at: chrono::Utc::now().to_rfc3339(),
    };
    *state.last_pass.write() = Some(status.clone());
    let _ = state.event_tx.send(NodeEvent::PassCompleted {
        staging,
        sync: report.outcome,
        cleaned,
    });

    tracing::info!(
        ?staging,
        sync = ?report.outcome,
        committed = report.committed(),
        violations = report.violations,
        ?cleaned,
        "recovery pass complete"
    );
    Ok(Some(status))
}

/// Whether the area still holds exactly the `staged_rows` rows sync saw,
/// all of them staged. A push during the pass adds a row or resets a
/// merged row's stage, and either breaks this.
fn area_unchanged(state: &AppState, staged_rows: u64) -> Result<bool, ResendError> {
    Ok(state.staging.count_all()? == staged_rows && state.staging.count_staged()? == staged_rows)
}

/// Runs [`run_pass`] every `interval` until the future is dropped.
///
/// A failed pass is logged and retried on the next tick.
pub async fn recovery_loop(state: AppState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let pass_state = state.clone();
        match tokio::task::spawn_blocking(move || run_pass(&pass_state)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!("recovery pass failed: {}", e),
            Err(e) => tracing::error!("recovery pass panicked: {}", e),
        }
    }
}

//! Scheduled re-checks of a configured list of handles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{LookupConfig, LookupService, LookupStage};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Watchlist {
    #[serde(default)]
    pub handles: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchFailure {
    pub handle: String,
    pub stage: LookupStage,
    pub upstream_status: Option<u16>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub checked: usize,
    pub created: usize,
    pub changed: usize,
    pub failed: Vec<WatchFailure>,
}

pub async fn load_watchlist(path: &Path) -> Result<Watchlist> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Looks up every handle in order. Individual failures are collected, never
/// fatal to the run.
pub async fn run_watchlist_once(service: &LookupService, handles: &[String]) -> WatchRunSummary {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let mut summary = WatchRunSummary {
        run_id,
        started_at,
        finished_at: started_at,
        checked: 0,
        created: 0,
        changed: 0,
        failed: Vec::new(),
    };

    for handle in handles {
        match service.lookup(handle).await {
            Ok(resp) => {
                summary.checked += 1;
                if resp.created {
                    summary.created += 1;
                } else if !resp.transitions.is_empty() {
                    summary.changed += 1;
                }
            }
            Err(err) => summary.failed.push(WatchFailure {
                handle: handle.clone(),
                stage: err.stage(),
                upstream_status: err.upstream_status(),
                error: err.to_string(),
            }),
        }
    }

    summary.finished_at = Utc::now();
    info!(
        %run_id,
        checked = summary.checked,
        created = summary.created,
        changed = summary.changed,
        failed = summary.failed.len(),
        "watchlist run complete"
    );
    summary
}

/// Builds (but does not start) the cron scheduler when enabled in config.
/// The watchlist file is re-read on every trigger.
pub async fn maybe_build_scheduler(
    config: &LookupConfig,
    service: Arc<LookupService>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let watchlist_path: PathBuf = config.watchlist_path.clone();
    let cron = config.lookup_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let service = service.clone();
        let watchlist_path = watchlist_path.clone();
        Box::pin(async move {
            match load_watchlist(&watchlist_path).await {
                Ok(watchlist) if watchlist.handles.is_empty() => {
                    warn!(path = %watchlist_path.display(), "watchlist is empty; nothing to check");
                }
                Ok(watchlist) => {
                    run_watchlist_once(&service, &watchlist.handles).await;
                }
                Err(err) => error!(error = %format!("{err:#}"), "scheduled watchlist run skipped"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(cron, "watchlist scheduler configured");
    Ok(Some(sched))
}

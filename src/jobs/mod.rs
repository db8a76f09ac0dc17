// src/jobs/mod.rs
// Scheduled Jobs Runner (C8): a single ticker task that finds due jobs
// and re-enters the turn orchestrator headlessly. Grounded on the
// teacher's WatcherService mpsc-driven background-task idiom (see
// SPEC_FULL.md's Supplemented Features section) for the tick loop and
// graceful shutdown signal.
//
// §9's Open Question on cadence syntax is resolved here: a recurring
// job's `description` must end with a parenthesized cadence tag
// `(every N{s|m|h|d})`, e.g. "Summarize today's email (every 2h)". A
// description that fails to match this grammar transitions the job to
// `failed` on its first run, per the boundary behavior in §8.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::CONFIG;
use crate::error::AppError;
use crate::orchestrator::TurnOrchestrator;
use crate::role::RoleResolver;
use crate::store::models::ScheduledJob;
use crate::store::Store;
use crate::utils::get_timestamp;

const INITIAL_BACKOFF_SECS: i64 = 60;
const MAX_BACKOFF_SECS: i64 = 6 * 60 * 60;

fn cadence_pattern() -> &'static Regex {
    use std::sync::OnceLock;
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\(every\s+(\d+)\s*(s|m|h|d)\)\s*$").expect("static cadence regex"))
}

/// Parses the trailing `(every N{s|m|h|d})` cadence tag out of a
/// recurring job's description. Returns the cadence in seconds.
pub fn parse_cadence_secs(description: &str) -> Option<i64> {
    let caps = cadence_pattern().captures(description)?;
    let n: i64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str();
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        _ => return None,
    };
    Some(secs.max(1))
}

pub struct JobsRunner {
    store: Store,
    role_resolver: RoleResolver,
    orchestrator: Arc<TurnOrchestrator>,
}

impl JobsRunner {
    pub fn new(store: Store, orchestrator: Arc<TurnOrchestrator>) -> Self {
        Self {
            role_resolver: RoleResolver::new(store.clone()),
            store,
            orchestrator,
        }
    }

    /// Spawns the ticker as a background task. Returns a sender that,
    /// when dropped or sent `()`, triggers graceful shutdown of the loop
    /// — the watch-channel idiom the teacher uses for its background
    /// services.
    pub fn spawn(self: Arc<Self>) -> watch::Sender<()> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        let interval = Duration::from_secs(CONFIG.scheduler.tick_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_tick().await {
                            error!(error = %e, "scheduled jobs tick failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("jobs runner shutting down");
                        break;
                    }
                }
            }
        });

        shutdown_tx
    }

    async fn run_tick(&self) -> anyhow::Result<()> {
        let now = get_timestamp();

        let once_jobs = self.store.get_due_once_jobs(now).await?;
        for job in once_jobs {
            self.try_run_job(job).await;
        }

        let recurring_jobs = self.store.get_pending_recurring_jobs(now).await?;
        for job in recurring_jobs {
            self.try_run_job(job).await;
        }

        Ok(())
    }

    async fn try_run_job(&self, job: ScheduledJob) {
        if !self
            .store
            .try_transition_job_status(&job.id, "pending", "running")
            .await
            .unwrap_or(false)
        {
            // Another ticker iteration already picked this job up.
            return;
        }

        let job_id = job.id.clone();
        match self.execute(&job).await {
            Ok(()) => info!(job_id, "scheduled job completed"),
            Err(e) => warn!(job_id, error = %e, "scheduled job failed"),
        }
    }

    async fn execute(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        let role_ctx = self.role_resolver.resolve(&job.user_id, &job.role_id).await.map_err(|e| match e {
            AppError::RoleNotFound | AppError::RoleForbidden => anyhow::anyhow!("role no longer available: {e}"),
            other => other.into(),
        });

        let role_ctx = match role_ctx {
            Ok(ctx) => ctx,
            Err(e) => {
                self.store.fail_job(&job.id, &e.to_string(), true, None).await?;
                return Err(e);
            }
        };

        let timeout = Duration::from_secs(CONFIG.scheduler.job_timeout_secs);
        let result = tokio::time::timeout(timeout, self.orchestrator.run_headless(&role_ctx, &job.description)).await;

        match result {
            Ok(Ok(_reply)) => self.on_success(job).await,
            Ok(Err(e)) => self.on_failure(job, &e.to_string()).await,
            Err(_elapsed) => self.on_failure(job, "job execution timed out").await,
        }
    }

    async fn on_success(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        if job.schedule_type == "once" {
            self.store.complete_once_job(&job.id).await?;
            return Ok(());
        }

        match parse_cadence_secs(&job.description) {
            Some(cadence_secs) => {
                self.store
                    .reschedule_recurring_job(&job.id, get_timestamp() + cadence_secs)
                    .await?;
                Ok(())
            }
            None => {
                self.store
                    .fail_job(&job.id, "recurring job description has no parseable cadence", true, None)
                    .await?;
                Ok(())
            }
        }
    }

    async fn on_failure(&self, job: &ScheduledJob, detail: &str) -> anyhow::Result<()> {
        if job.schedule_type == "once" {
            self.store.fail_job(&job.id, detail, true, None).await?;
            return Ok(());
        }

        if parse_cadence_secs(&job.description).is_none() {
            self.store.fail_job(&job.id, detail, true, None).await?;
            return Ok(());
        }

        let backoff = backoff_secs(job.run_count);
        self.store
            .fail_job(&job.id, detail, false, Some(get_timestamp() + backoff))
            .await?;
        Ok(())
    }
}

fn backoff_secs(run_count: i64) -> i64 {
    let exp = INITIAL_BACKOFF_SECS.saturating_mul(1i64 << run_count.clamp(0, 10));
    exp.min(MAX_BACKOFF_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hour_minute_day_cadences() {
        assert_eq!(parse_cadence_secs("Summarize inbox (every 2h)"), Some(7200));
        assert_eq!(parse_cadence_secs("Ping me (every 30m)"), Some(1800));
        assert_eq!(parse_cadence_secs("Daily standup (every 1d)"), Some(86400));
    }

    #[test]
    fn rejects_descriptions_without_a_cadence_tag() {
        assert_eq!(parse_cadence_secs("Just check on things"), None);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        assert_eq!(backoff_secs(0), 60);
        assert_eq!(backoff_secs(1), 120);
        assert!(backoff_secs(20) <= MAX_BACKOFF_SECS);
    }
}

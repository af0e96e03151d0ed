//! Background refresh scheduler.
//!
//! Each tick computes the due set (records whose `next_refresh_after` is unset
//! or passed, with a registered refresh-capable executor) and spawns one task
//! per record. Tasks acquire a slot from a single global semaphore before
//! calling `Executor::refresh`, so at most `max_concurrency` refreshes run at
//! once across all providers.
//!
//! # In-flight dedup
//!
//! A record is claimed with an [`InFlightGuard`] before its task is spawned
//! and released when the guard drops, on every exit path. Overlapping ticks
//! and the force-refresh path skip or reject claimed records.
//!
//! # Cancellation
//!
//! Each task gets a child of the caller's token. Cancelling it aborts the
//! slot wait or the in-flight refresh and leaves the record untouched.

use crate::credential::{Credential, LastError};
use crate::error::{ContractField, ExecutorError, RefreshError};
use crate::executor::{Executor, ExecutorSet};
use crate::hooks::LifecycleHook;
use crate::metrics;
use crate::registry::CredentialRegistry;
use crate::store::{save_with_retry, CredentialStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default ceiling on simultaneous `Executor::refresh` calls.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Furthest ahead a refresh or retry is ever scheduled (365 days).
pub const MAX_SCHEDULE_AHEAD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Scheduler tuning.
#[derive(Debug, Clone, Copy)]
pub struct RefreshConfig {
    /// Admission gate size.
    pub max_concurrency: usize,
    /// Period of the background tick.
    pub check_interval: Duration,
    /// Used when a record has no `refresh_interval_seconds` hint.
    pub default_refresh_interval: Duration,
    /// Deadline for a single `Executor::refresh` call.
    pub refresh_timeout: Duration,
    /// Delay before a failed record is due again.
    pub failure_backoff: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            check_interval: Duration::from_secs(5),
            default_refresh_interval: Duration::from_secs(900),
            refresh_timeout: Duration::from_secs(30),
            failure_backoff: Duration::from_secs(30),
        }
    }
}

/// Result of one background refresh unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { id: String },
    /// The failure was recorded on the credential.
    Failed { id: String, error: String },
    /// Removed, no longer due, or lost its executor before the slot was granted.
    Skipped { id: String },
    /// The tick was cancelled; the record is untouched.
    Cancelled { id: String },
}

impl RefreshOutcome {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            RefreshOutcome::Refreshed { id }
            | RefreshOutcome::Failed { id, .. }
            | RefreshOutcome::Skipped { id }
            | RefreshOutcome::Cancelled { id } => id,
        }
    }
}

/// Refresh tasks dispatched by one tick.
pub struct RefreshBatch {
    tasks: JoinSet<RefreshOutcome>,
}

impl RefreshBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every unit and collect outcomes in completion order.
    pub async fn wait(mut self) -> Vec<RefreshOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(target: "auth.scheduler", error = %e, "Refresh task panicked or was aborted");
                }
            }
        }
        outcomes
    }

    /// Let the units run to completion without waiting for them.
    pub fn detach(mut self) {
        self.tasks.detach_all();
    }
}

/// Claim on a credential ID; released on drop.
pub struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

/// Counts one running `Executor::refresh` call in the in-flight gauge.
struct ActiveRefresh {
    active: Arc<AtomicUsize>,
}

impl ActiveRefresh {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_refresh_in_flight(now);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for ActiveRefresh {
    fn drop(&mut self) {
        let now = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_refresh_in_flight(now);
    }
}

/// Periodic credential refresher bounded by a global admission gate.
#[derive(Clone)]
pub struct RefreshScheduler {
    registry: Arc<CredentialRegistry>,
    executors: Arc<ExecutorSet>,
    hook: Arc<dyn LifecycleHook>,
    store: Option<Arc<dyn CredentialStore>>,
    config: RefreshConfig,
    gate: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    active: Arc<AtomicUsize>,
}

enum CallError {
    Cancelled,
    Failed { status: &'static str, message: String },
}

impl RefreshScheduler {
    #[must_use]
    pub fn new(
        registry: Arc<CredentialRegistry>,
        executors: Arc<ExecutorSet>,
        hook: Arc<dyn LifecycleHook>,
        store: Option<Arc<dyn CredentialStore>>,
        config: RefreshConfig,
    ) -> Self {
        let slots = config.max_concurrency.max(1);
        Self {
            registry,
            executors,
            hook,
            store,
            config,
            gate: Arc::new(Semaphore::new(slots)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Admission-gate slots not currently held.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    /// Background `Executor::refresh` calls currently running.
    #[must_use]
    pub fn active_refreshes(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether a refresh of `id` is running.
    #[must_use]
    pub fn is_refreshing(&self, id: &str) -> bool {
        self.in_flight.lock().contains(id)
    }

    /// Claim `id` for refresh. `None` if already claimed.
    #[must_use]
    pub fn try_claim(&self, id: &str) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock();
        if !set.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            id: id.to_string(),
        })
    }

    /// Dispatch a refresh unit for every due record.
    pub async fn check_refreshes(&self, cancel_token: &CancellationToken) -> RefreshBatch {
        let now = Utc::now();
        let mut tasks = JoinSet::new();

        for credential in self.registry.list().await {
            if !credential.is_due(now) {
                continue;
            }
            let Some(executor) = self.executors.get(&credential.provider) else {
                continue;
            };
            if !executor.supports_refresh() {
                continue;
            }
            let Some(guard) = self.try_claim(&credential.id) else {
                debug!(
                    target: "auth.scheduler",
                    auth_id = %credential.id,
                    "Refresh already in flight, skipping"
                );
                continue;
            };

            let this = self.clone();
            let cancel = cancel_token.child_token();
            tasks.spawn(async move { this.refresh_unit(credential.id, guard, cancel).await });
        }

        if !tasks.is_empty() {
            debug!(target: "auth.scheduler", due = tasks.len(), "Dispatched refreshes");
        }
        RefreshBatch { tasks }
    }

    /// Tick every `check_interval` until cancelled.
    pub async fn run(&self, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            target: "auth.scheduler",
            interval_secs = self.config.check_interval.as_secs(),
            max_concurrency = self.config.max_concurrency,
            "Refresh scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_refreshes(&cancel_token).await.detach();
                }
                () = cancel_token.cancelled() => {
                    info!(target: "auth.scheduler", "Refresh scheduler received shutdown signal, exiting");
                    break;
                }
            }
        }
    }

    async fn refresh_unit(
        self,
        id: String,
        _guard: InFlightGuard,
        cancel: CancellationToken,
    ) -> RefreshOutcome {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return RefreshOutcome::Cancelled { id },
            acquired = Arc::clone(&self.gate).acquire_owned() => match acquired {
                Ok(permit) => permit,
                Err(_) => return RefreshOutcome::Cancelled { id },
            },
        };

        // The record may have changed while waiting for a slot.
        let Some(current) = self.registry.get(&id).await else {
            return RefreshOutcome::Skipped { id };
        };
        if !current.is_due(Utc::now()) {
            return RefreshOutcome::Skipped { id };
        }
        let Some(executor) = self.executors.get(&current.provider) else {
            return RefreshOutcome::Skipped { id };
        };

        let started = Instant::now();
        let active = ActiveRefresh::enter(&self.active);

        let result = self.call_refresh(executor.as_ref(), &cancel, current.clone()).await;

        drop(active);
        drop(permit);

        let elapsed = started.elapsed();
        let failure = match result {
            Ok(returned) => match reconcile(&current, returned) {
                Ok(merged) => match self.commit_scheduled(&id, merged).await {
                    Some(committed) => {
                        metrics::record_refresh(&current.provider, "success", elapsed);
                        self.hook.on_refreshed(&committed);
                        debug!(target: "auth.scheduler", auth_id = %id, "Credential refreshed");
                        return RefreshOutcome::Refreshed { id };
                    }
                    None => return RefreshOutcome::Skipped { id },
                },
                Err(field) => ("error", RefreshError::ContractViolation(field).to_string()),
            },
            Err(CallError::Cancelled) => {
                metrics::record_refresh(&current.provider, "cancelled", elapsed);
                debug!(target: "auth.scheduler", auth_id = %id, "Refresh cancelled");
                return RefreshOutcome::Cancelled { id };
            }
            Err(CallError::Failed { status, message }) => (status, message),
        };

        let (status, message) = failure;
        metrics::record_refresh(&current.provider, status, elapsed);
        warn!(
            target: "auth.scheduler",
            auth_id = %id,
            provider = %current.provider,
            error = %message,
            "Credential refresh failed"
        );
        self.record_failure(&id, &message).await;
        self.hook.on_refresh_failed(&current, &message);
        RefreshOutcome::Failed { id, error: message }
    }

    async fn call_refresh(
        &self,
        executor: &dyn Executor,
        cancel: &CancellationToken,
        credential: Credential,
    ) -> Result<Credential, CallError> {
        let call = tokio::time::timeout(
            self.config.refresh_timeout,
            executor.refresh(cancel, credential),
        );

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CallError::Cancelled),
            result = call => result,
        };

        match result {
            Ok(Ok(refreshed)) => Ok(refreshed),
            Ok(Err(ExecutorError::Cancelled)) if cancel.is_cancelled() => Err(CallError::Cancelled),
            Ok(Err(e)) => Err(CallError::Failed {
                status: "error",
                message: e.to_string(),
            }),
            Err(_) => Err(CallError::Failed {
                status: "timeout",
                message: ExecutorError::TimedOut.to_string(),
            }),
        }
    }

    /// Commit a background refresh. `None` if the record vanished.
    async fn commit_scheduled(&self, id: &str, refreshed: Credential) -> Option<Credential> {
        let now = Utc::now();
        let interval = refreshed
            .refresh_interval()
            .unwrap_or(self.config.default_refresh_interval);
        let next = schedule_after(now, interval);

        let committed = match self
            .registry
            .modify(id, |latest| apply_refreshed(latest, refreshed, now, Some(next)))
            .await
        {
            Ok(committed) => committed,
            Err(e) => {
                warn!(target: "auth.scheduler", error = %e, "Discarding refresh result");
                return None;
            }
        };

        if let Some(store) = &self.store {
            if let Err(e) = save_with_retry(store.as_ref(), &committed).await {
                error!(
                    target: "auth.scheduler",
                    auth_id = %committed.id,
                    error = %e,
                    "Failed to persist refreshed credential"
                );
            }
        }
        Some(committed)
    }

    /// Record a failure without touching credential material.
    async fn record_failure(&self, id: &str, message: &str) {
        let retry_at = schedule_after(Utc::now(), self.config.failure_backoff);
        let recorded = self
            .registry
            .modify(id, |latest| {
                latest.last_error = Some(LastError::now(message));
                latest.next_refresh_after = Some(retry_at);
            })
            .await;

        if let Err(e) = recorded {
            debug!(target: "auth.scheduler", auth_id = %id, error = %e, "Could not record refresh failure");
        }
    }

    /// Synchronous single-record refresh for the management path.
    ///
    /// Bypasses the admission gate but honors the in-flight claim. On success
    /// the refreshed record is committed with `next_refresh_after` cleared,
    /// then mirrored to the store. A failure before the commit leaves the
    /// record untouched.
    #[instrument(skip_all, fields(auth_id = %id))]
    pub async fn force_refresh(
        &self,
        id: &str,
        provider_filter: Option<&str>,
        cancel_token: &CancellationToken,
    ) -> Result<Credential, RefreshError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(RefreshError::MissingId);
        }

        let Some(current) = self.registry.get(id).await else {
            return Err(RefreshError::NotFound);
        };

        if let Some(filter) = provider_filter.map(str::trim).filter(|f| !f.is_empty()) {
            if !filter.eq_ignore_ascii_case(current.provider.trim()) {
                return Err(RefreshError::ProviderMismatch);
            }
        }

        let Some(executor) = self.executors.get(&current.provider) else {
            return Err(RefreshError::ExecutorNotRegistered);
        };

        let Some(_guard) = self.try_claim(id) else {
            return Err(RefreshError::InProgress);
        };
        // Re-read under the claim so we refresh the latest material.
        let Some(current) = self.registry.get(id).await else {
            return Err(RefreshError::NotFound);
        };

        let started = Instant::now();
        let returned = match self.call_refresh(executor.as_ref(), cancel_token, current.clone()).await {
            Ok(returned) => returned,
            Err(CallError::Cancelled) => {
                metrics::record_refresh(&current.provider, "cancelled", started.elapsed());
                return Err(ExecutorError::Cancelled.into());
            }
            Err(CallError::Failed { status, message }) => {
                metrics::record_refresh(&current.provider, status, started.elapsed());
                self.hook.on_refresh_failed(&current, &message);
                return Err(RefreshError::Upstream(message));
            }
        };

        let merged = match reconcile(&current, returned) {
            Ok(merged) => merged,
            Err(field) => {
                let err = RefreshError::ContractViolation(field);
                error!(
                    target: "auth.scheduler",
                    provider = %current.provider,
                    error = %err,
                    "Executor violated refresh contract"
                );
                metrics::record_refresh(&current.provider, "error", started.elapsed());
                self.hook.on_refresh_failed(&current, &err.to_string());
                return Err(err);
            }
        };

        let now = Utc::now();
        let committed = self
            .registry
            .modify(id, |latest| apply_refreshed(latest, merged, now, None))
            .await
            .map_err(|e| RefreshError::Persistence(e.to_string()))?;
        metrics::record_refresh(&committed.provider, "success", started.elapsed());

        if let Some(store) = &self.store {
            save_with_retry(store.as_ref(), &committed)
                .await
                .map_err(|e| RefreshError::Persistence(e.to_string()))?;
        }

        self.hook.on_refreshed(&committed);
        info!(target: "auth.scheduler", provider = %committed.provider, "Credential force-refreshed");
        Ok(committed)
    }
}

/// Validate an executor's returned record against the input and fill the
/// fields an executor may leave empty.
fn reconcile(original: &Credential, mut returned: Credential) -> Result<Credential, ContractField> {
    if returned.id.is_empty() {
        returned.id.clone_from(&original.id);
    } else if returned.id != original.id {
        return Err(ContractField::Id);
    }

    if returned.provider.is_empty()
        || returned
            .provider
            .trim()
            .eq_ignore_ascii_case(original.provider.trim())
    {
        returned.provider.clone_from(&original.provider);
    } else {
        return Err(ContractField::Provider);
    }

    if returned.runtime.is_none() {
        returned.runtime.clone_from(&original.runtime);
    }
    Ok(returned)
}

/// Write the refresh-owned fields onto the record as it stands at commit
/// time. Fields changed through `update` while the refresh ran are kept.
fn apply_refreshed(
    latest: &mut Credential,
    refreshed: Credential,
    now: DateTime<Utc>,
    next_refresh_after: Option<DateTime<Utc>>,
) {
    latest.metadata = refreshed.metadata;
    if refreshed.runtime.is_some() {
        latest.runtime = refreshed.runtime;
    }
    latest.last_refreshed_at = Some(now);
    latest.next_refresh_after = next_refresh_after;
    latest.last_error = None;
}

/// `now + delay`, with `delay` capped at [`MAX_SCHEDULE_AHEAD`].
fn schedule_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay.min(MAX_SCHEDULE_AHEAD))
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::credential::REFRESH_INTERVAL_KEY;
    use crate::executor::{ExecutorOptions, ExecutorRequest, ExecutorResponse};
    use crate::hooks::NoopHook;
    use crate::testing::{ConcurrencyTrackingExecutor, RecordingHook, StubExecutor};
    use async_trait::async_trait;
    use serde_json::json;

    /// Executor whose refresh panics.
    struct PanickingExecutor;

    #[async_trait]
    impl Executor for PanickingExecutor {
        fn identifier(&self) -> &str {
            "codex"
        }

        async fn execute(
            &self,
            _cancel: &CancellationToken,
            _credential: &Credential,
            _request: ExecutorRequest,
            _options: ExecutorOptions,
        ) -> Result<ExecutorResponse, ExecutorError> {
            Ok(ExecutorResponse::default())
        }

        async fn refresh(
            &self,
            _cancel: &CancellationToken,
            _credential: Credential,
        ) -> Result<Credential, ExecutorError> {
            panic!("executor bug");
        }
    }

    /// Poll until the executor has been entered.
    async fn wait_for_call(executor: &StubExecutor) {
        while executor.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    struct Fixture {
        registry: Arc<CredentialRegistry>,
        executors: Arc<ExecutorSet>,
        scheduler: RefreshScheduler,
    }

    fn fixture(config: RefreshConfig) -> Fixture {
        fixture_with_hook(config, Arc::new(NoopHook))
    }

    fn fixture_with_hook(config: RefreshConfig, hook: Arc<dyn LifecycleHook>) -> Fixture {
        let registry = Arc::new(CredentialRegistry::new());
        let executors = Arc::new(ExecutorSet::new());
        let scheduler = RefreshScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&executors),
            hook,
            None,
            config,
        );
        Fixture {
            registry,
            executors,
            scheduler,
        }
    }

    #[test]
    fn test_reconcile_inherits_empty_fields() {
        let mut original = Credential::new("a", "codex");
        original.runtime = Some(Arc::new(1_u8));
        let mut returned = Credential::new("", "");
        returned.metadata.insert("k".into(), json!("v"));

        let merged = reconcile(&original, returned).unwrap();
        assert_eq!(merged.id, "a");
        assert_eq!(merged.provider, "codex");
        assert!(merged.runtime.is_some());
        assert_eq!(merged.metadata["k"], "v");
    }

    #[test]
    fn test_reconcile_rejects_mismatch() {
        let original = Credential::new("a", "codex");
        assert_eq!(
            reconcile(&original, Credential::new("b", "codex")).unwrap_err(),
            ContractField::Id
        );
        assert_eq!(
            reconcile(&original, Credential::new("a", "claude")).unwrap_err(),
            ContractField::Provider
        );
    }

    #[test]
    fn test_reconcile_accepts_provider_case_difference() {
        let original = Credential::new("a", "Codex");
        let merged = reconcile(&original, Credential::new("a", "codex")).unwrap();
        assert_eq!(merged.provider, "Codex");
    }

    #[test]
    fn test_schedule_after_caps_delay() {
        let now = Utc::now();
        assert_eq!(
            schedule_after(now, Duration::from_secs(60)),
            now + chrono::Duration::seconds(60)
        );

        let capped = now + chrono::Duration::from_std(MAX_SCHEDULE_AHEAD).unwrap();
        assert_eq!(schedule_after(now, Duration::MAX), capped);
        assert_eq!(
            schedule_after(now, Duration::from_secs(1_000_000_000_000_000)),
            capped
        );
        assert_eq!(
            schedule_after(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1)),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_gate() {
        let max = 3;
        let f = fixture(RefreshConfig {
            max_concurrency: max,
            ..RefreshConfig::default()
        });
        let tracker = Arc::new(ConcurrencyTrackingExecutor::new(
            "codex",
            Duration::from_millis(50),
        ));
        f.executors.register(tracker.clone());

        for i in 0..(max * 2 + 1) {
            f.registry
                .register(
                    Credential::new(format!("codex-{i}"), "codex")
                        .with_metadata(REFRESH_INTERVAL_KEY, 1),
                )
                .await
                .unwrap();
        }

        let outcomes = f
            .scheduler
            .check_refreshes(&CancellationToken::new())
            .await
            .wait()
            .await;

        assert_eq!(outcomes.len(), max * 2 + 1);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, RefreshOutcome::Refreshed { .. })));
        assert_eq!(tracker.call_count(), max * 2 + 1);
        assert!(tracker.max_concurrent() >= 1);
        assert!(
            tracker.max_concurrent() <= max,
            "observed {} concurrent refreshes, limit {max}",
            tracker.max_concurrent()
        );
        assert_eq!(f.scheduler.available_slots(), max);
    }

    #[tokio::test]
    async fn test_success_merges_and_schedules_next_refresh() {
        let f = fixture(RefreshConfig::default());
        f.executors
            .register(Arc::new(StubExecutor::refreshing("codex")));
        f.registry
            .register(
                Credential::new("codex-auth", "codex")
                    .with_metadata(REFRESH_INTERVAL_KEY, 120)
                    .with_metadata("access_token", "old"),
            )
            .await
            .unwrap();

        let before = Utc::now();
        let outcomes = f
            .scheduler
            .check_refreshes(&CancellationToken::new())
            .await
            .wait()
            .await;

        assert_eq!(
            outcomes,
            vec![RefreshOutcome::Refreshed {
                id: "codex-auth".into()
            }]
        );

        let stored = f.registry.get("codex-auth").await.unwrap();
        assert_eq!(stored.metadata["refreshed"], json!(true));
        assert_eq!(stored.metadata["access_token"], "old");
        assert!(stored.last_refreshed_at.unwrap() >= before);
        assert!(stored.last_error.is_none());

        let next = stored.next_refresh_after.unwrap();
        assert!(next >= before + chrono::Duration::seconds(120));
        assert!(!stored.is_due(Utc::now()));
    }

    #[tokio::test]
    async fn test_out_of_range_interval_hints_still_commit() {
        let f = fixture(RefreshConfig {
            default_refresh_interval: Duration::from_secs(600),
            ..RefreshConfig::default()
        });
        let executor = Arc::new(StubExecutor::refreshing("codex"));
        f.executors.register(executor.clone());
        f.registry
            .register(
                Credential::new("huge-int", "codex")
                    .with_metadata(REFRESH_INTERVAL_KEY, 1_000_000_000_000_000_u64),
            )
            .await
            .unwrap();
        f.registry
            .register(Credential::new("huge-float", "codex").with_metadata(REFRESH_INTERVAL_KEY, 1e30))
            .await
            .unwrap();

        let before = Utc::now();
        let cancel = CancellationToken::new();
        let outcomes = f.scheduler.check_refreshes(&cancel).await.wait().await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, RefreshOutcome::Refreshed { .. })));

        let huge_int = f.registry.get("huge-int").await.unwrap();
        assert_eq!(huge_int.metadata["refreshed"], json!(true));
        let next = huge_int.next_refresh_after.unwrap();
        assert!(next > before + chrono::Duration::days(364));
        assert!(next <= Utc::now() + chrono::Duration::from_std(MAX_SCHEDULE_AHEAD).unwrap());

        // Unrepresentable float hints fall back to the default interval.
        let huge_float = f.registry.get("huge-float").await.unwrap();
        assert_eq!(huge_float.metadata["refreshed"], json!(true));
        let next = huge_float.next_refresh_after.unwrap();
        assert!(next >= before + chrono::Duration::seconds(600));
        assert!(next < before + chrono::Duration::days(1));

        // Both are committed, so the next tick leaves them alone.
        assert!(f.scheduler.check_refreshes(&cancel).await.is_empty());
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_huge_failure_backoff_is_capped() {
        let f = fixture(RefreshConfig {
            failure_backoff: Duration::MAX,
            ..RefreshConfig::default()
        });
        f.executors
            .register(Arc::new(StubExecutor::failing("codex", "boom")));
        f.registry
            .register(Credential::new("a", "codex"))
            .await
            .unwrap();

        let outcomes = f
            .scheduler
            .check_refreshes(&CancellationToken::new())
            .await
            .wait()
            .await;
        assert!(matches!(outcomes.as_slice(), [RefreshOutcome::Failed { .. }]));

        let stored = f.registry.get("a").await.unwrap();
        assert_eq!(stored.last_error.as_ref().unwrap().message, "boom");
        let retry_at = stored.next_refresh_after.unwrap();
        assert!(retry_at <= Utc::now() + chrono::Duration::from_std(MAX_SCHEDULE_AHEAD).unwrap());
        assert!(!stored.is_due(Utc::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_keeps_changes_made_during_refresh() {
        let f = fixture(RefreshConfig::default());
        let executor =
            Arc::new(StubExecutor::refreshing("codex").with_delay(Duration::from_millis(100)));
        f.executors.register(executor.clone());
        f.registry
            .register(Credential::new("a", "codex").with_metadata("access_token", "old"))
            .await
            .unwrap();

        let batch = f.scheduler.check_refreshes(&CancellationToken::new()).await;
        wait_for_call(&executor).await;

        let mut paused = f.registry.get("a").await.unwrap();
        paused.disabled = true;
        paused.label = Some("paused by operator".to_string());
        f.registry.update(paused).await.unwrap();

        let outcomes = batch.wait().await;
        assert_eq!(outcomes, vec![RefreshOutcome::Refreshed { id: "a".into() }]);

        let stored = f.registry.get("a").await.unwrap();
        assert!(stored.disabled);
        assert_eq!(stored.label.as_deref(), Some("paused by operator"));
        assert_eq!(stored.metadata["refreshed"], json!(true));
        assert!(stored.last_refreshed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_keeps_changes_made_during_refresh() {
        let f = fixture(RefreshConfig::default());
        let executor =
            Arc::new(StubExecutor::refreshing("codex").with_delay(Duration::from_millis(100)));
        f.executors.register(executor.clone());
        f.registry
            .register(Credential::new("a", "codex"))
            .await
            .unwrap();

        let scheduler = f.scheduler.clone();
        let task = tokio::spawn(async move {
            scheduler
                .force_refresh("a", None, &CancellationToken::new())
                .await
        });
        wait_for_call(&executor).await;

        let mut paused = f.registry.get("a").await.unwrap();
        paused.disabled = true;
        f.registry.update(paused).await.unwrap();

        let refreshed = task.await.unwrap().unwrap();
        assert!(refreshed.disabled);
        assert_eq!(refreshed.metadata["refreshed"], json!(true));
        assert!(f.registry.get("a").await.unwrap().disabled);
    }

    #[tokio::test]
    async fn test_provider_case_difference_is_not_a_violation() {
        let f = fixture(RefreshConfig::default());
        f.executors
            .register(Arc::new(StubExecutor::mismatched_provider("codex", "codex")));
        f.registry
            .register(Credential::new("a", "Codex"))
            .await
            .unwrap();

        let refreshed = f
            .scheduler
            .force_refresh("a", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(refreshed.provider, "Codex");

        let mut due = f.registry.get("a").await.unwrap();
        due.next_refresh_after = None;
        f.registry.update(due).await.unwrap();
        let outcomes = f
            .scheduler
            .check_refreshes(&CancellationToken::new())
            .await
            .wait()
            .await;
        assert_eq!(outcomes, vec![RefreshOutcome::Refreshed { id: "a".into() }]);
    }

    #[tokio::test]
    async fn test_executor_panic_releases_gauge_slot_and_claim() {
        let f = fixture(RefreshConfig {
            max_concurrency: 2,
            ..RefreshConfig::default()
        });
        f.executors.register(Arc::new(PanickingExecutor));
        f.registry
            .register(Credential::new("a", "codex"))
            .await
            .unwrap();

        let outcomes = f
            .scheduler
            .check_refreshes(&CancellationToken::new())
            .await
            .wait()
            .await;

        assert!(outcomes.is_empty());
        assert_eq!(f.scheduler.active_refreshes(), 0);
        assert_eq!(f.scheduler.available_slots(), 2);
        assert!(!f.scheduler.is_refreshing("a"));
    }

    #[tokio::test]
    async fn test_default_interval_applies_without_hint() {
        let f = fixture(RefreshConfig {
            default_refresh_interval: Duration::from_secs(600),
            ..RefreshConfig::default()
        });
        f.executors
            .register(Arc::new(StubExecutor::refreshing("codex")));
        f.registry
            .register(Credential::new("a", "codex"))
            .await
            .unwrap();

        let before = Utc::now();
        f.scheduler
            .check_refreshes(&CancellationToken::new())
            .await
            .wait()
            .await;

        let next = f.registry.get("a").await.unwrap().next_refresh_after.unwrap();
        assert!(next >= before + chrono::Duration::seconds(600));
    }

    #[tokio::test]
    async fn test_failure_keeps_material_and_retries_later() {
        let hook = Arc::new(RecordingHook::default());
        let f = fixture_with_hook(
            RefreshConfig {
                failure_backoff: Duration::ZERO,
                ..RefreshConfig::default()
            },
            hook.clone(),
        );
        let executor = Arc::new(StubExecutor::failing("codex", "refresh failed"));
        f.executors.register(executor.clone());
        f.registry
            .register(Credential::new("a", "codex").with_metadata("access_token", "still-valid"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let outcomes = f.scheduler.check_refreshes(&cancel).await.wait().await;
        assert_eq!(
            outcomes,
            vec![RefreshOutcome::Failed {
                id: "a".into(),
                error: "refresh failed".into()
            }]
        );

        let stored = f.registry.get("a").await.unwrap();
        assert_eq!(stored.metadata["access_token"], "still-valid");
        assert_eq!(stored.last_error.as_ref().unwrap().message, "refresh failed");
        assert!(stored.last_refreshed_at.is_none());
        assert_eq!(hook.failed(), vec![("a".to_string(), "refresh failed".to_string())]);

        // Reconsidered on the next tick, once.
        let outcomes = f.scheduler.check_refreshes(&cancel).await.wait().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_backoff_delays_retry() {
        let f = fixture(RefreshConfig {
            failure_backoff: Duration::from_secs(60),
            ..RefreshConfig::default()
        });
        f.executors
            .register(Arc::new(StubExecutor::failing("codex", "boom")));
        f.registry
            .register(Credential::new("a", "codex"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        f.scheduler.check_refreshes(&cancel).await.wait().await;

        assert!(f.scheduler.check_refreshes(&cancel).await.is_empty());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_halt_others() {
        let f = fixture(RefreshConfig::default());
        f.executors
            .register(Arc::new(StubExecutor::failing("claude", "upstream down")));
        f.executors
            .register(Arc::new(StubExecutor::refreshing("codex")));
        f.registry
            .register(Credential::new("bad", "claude"))
            .await
            .unwrap();
        f.registry
            .register(Credential::new("good", "codex"))
            .await
            .unwrap();

        let outcomes = f
            .scheduler
            .check_refreshes(&CancellationToken::new())
            .await
            .wait()
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(f.registry.get("good").await.unwrap().last_refreshed_at.is_some());
        assert!(f.registry.get("bad").await.unwrap().last_error.is_some());
    }

    #[tokio::test]
    async fn test_due_set_filters() {
        let f = fixture(RefreshConfig::default());
        f.executors
            .register(Arc::new(StubExecutor::refreshing("codex")));
        f.executors
            .register(Arc::new(StubExecutor::non_refreshing("apikey")));

        let mut not_due = Credential::new("later", "codex");
        not_due.next_refresh_after = Some(Utc::now() + chrono::Duration::hours(1));
        let mut disabled = Credential::new("off", "codex");
        disabled.disabled = true;

        f.registry.register(not_due).await.unwrap();
        f.registry.register(disabled).await.unwrap();
        f.registry
            .register(Credential::new("orphan", "gemini"))
            .await
            .unwrap();
        f.registry
            .register(Credential::new("static", "apikey"))
            .await
            .unwrap();

        let batch = f.scheduler.check_refreshes(&CancellationToken::new()).await;
        assert!(batch.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_tick_skips_in_flight_record() {
        let f = fixture(RefreshConfig::default());
        let executor = Arc::new(
            StubExecutor::refreshing("codex").with_delay(Duration::from_secs(5)),
        );
        f.executors.register(executor.clone());
        f.registry
            .register(Credential::new("a", "codex"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let first = f.scheduler.check_refreshes(&cancel).await;
        assert_eq!(first.len(), 1);
        assert!(f.scheduler.is_refreshing("a"));

        let second = f.scheduler.check_refreshes(&cancel).await;
        assert!(second.is_empty());

        first.wait().await;
        assert!(!f.scheduler.is_refreshing("a"));
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_releases_slots_and_leaves_record() {
        let f = fixture(RefreshConfig {
            max_concurrency: 1,
            ..RefreshConfig::default()
        });
        f.executors.register(Arc::new(
            StubExecutor::refreshing("codex").with_delay(Duration::from_secs(10)),
        ));
        for id in ["a", "b", "c"] {
            f.registry
                .register(Credential::new(id, "codex").with_metadata("access_token", "old"))
                .await
                .unwrap();
        }

        let cancel = CancellationToken::new();
        let batch = f.scheduler.check_refreshes(&cancel).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let outcomes = batch.wait().await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, RefreshOutcome::Cancelled { .. })));
        assert_eq!(f.scheduler.available_slots(), 1);

        for id in ["a", "b", "c"] {
            let stored = f.registry.get(id).await.unwrap();
            assert_eq!(stored.metadata["access_token"], "old");
            assert!(stored.last_error.is_none());
            assert!(stored.last_refreshed_at.is_none());
            assert!(!f.scheduler.is_refreshing(id));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_recorded_as_failure() {
        let f = fixture(RefreshConfig {
            refresh_timeout: Duration::from_secs(1),
            ..RefreshConfig::default()
        });
        f.executors.register(Arc::new(
            StubExecutor::refreshing("codex").with_delay(Duration::from_secs(10)),
        ));
        f.registry
            .register(Credential::new("a", "codex"))
            .await
            .unwrap();

        let outcomes = f
            .scheduler
            .check_refreshes(&CancellationToken::new())
            .await
            .wait()
            .await;

        assert_eq!(
            outcomes,
            vec![RefreshOutcome::Failed {
                id: "a".into(),
                error: "operation timed out".into()
            }]
        );
        assert_eq!(f.scheduler.available_slots(), DEFAULT_MAX_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_contract_violation_is_recorded_without_merge() {
        let f = fixture(RefreshConfig::default());
        f.executors
            .register(Arc::new(StubExecutor::mismatched_id("codex", "other-id")));
        f.registry
            .register(Credential::new("a", "codex").with_metadata("access_token", "old"))
            .await
            .unwrap();

        let outcomes = f
            .scheduler
            .check_refreshes(&CancellationToken::new())
            .await
            .wait()
            .await;

        assert_eq!(
            outcomes,
            vec![RefreshOutcome::Failed {
                id: "a".into(),
                error: "executor returned mismatched auth id".into()
            }]
        );
        let stored = f.registry.get("a").await.unwrap();
        assert_eq!(stored.metadata["access_token"], "old");
        assert!(f.registry.get("other-id").await.is_none());
    }

    #[tokio::test]
    async fn test_record_removed_before_slot_is_skipped() {
        let f = fixture(RefreshConfig::default());
        f.executors
            .register(Arc::new(StubExecutor::refreshing("codex")));
        f.registry
            .register(Credential::new("a", "codex"))
            .await
            .unwrap();

        // Hold every slot so the unit waits, then remove the record.
        let held = Arc::clone(&f.scheduler.gate)
            .acquire_many_owned(u32::try_from(DEFAULT_MAX_CONCURRENCY).unwrap())
            .await
            .unwrap();
        let batch = f.scheduler.check_refreshes(&CancellationToken::new()).await;
        f.registry.remove("a").await;
        drop(held);

        assert_eq!(
            batch.wait().await,
            vec![RefreshOutcome::Skipped { id: "a".into() }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_cancelled() {
        let f = fixture(RefreshConfig {
            check_interval: Duration::from_secs(5),
            ..RefreshConfig::default()
        });
        let executor = Arc::new(StubExecutor::refreshing("codex"));
        f.executors.register(executor.clone());
        f.registry
            .register(Credential::new("a", "codex").with_metadata(REFRESH_INTERVAL_KEY, 1))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let task = {
            let scheduler = f.scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(executor.call_count() >= 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_force_refresh_clears_schedule() {
        let f = fixture(RefreshConfig::default());
        f.executors
            .register(Arc::new(StubExecutor::refreshing("codex")));
        let mut cred = Credential::new("a", "codex");
        cred.next_refresh_after = Some(Utc::now() + chrono::Duration::hours(1));
        cred.last_error = Some(LastError::now("old failure"));
        f.registry.register(cred).await.unwrap();

        let refreshed = f
            .scheduler
            .force_refresh(" a ", Some("CODEX"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(refreshed.id, "a");
        assert!(refreshed.next_refresh_after.is_none());
        assert!(refreshed.last_error.is_none());
        assert!(refreshed.last_refreshed_at.is_some());
        assert!(!f.scheduler.is_refreshing("a"));
    }

    #[tokio::test]
    async fn test_force_refresh_rejects_while_in_flight() {
        let f = fixture(RefreshConfig::default());
        f.executors
            .register(Arc::new(StubExecutor::refreshing("codex")));
        f.registry
            .register(Credential::new("a", "codex"))
            .await
            .unwrap();

        let _claim = f.scheduler.try_claim("a").unwrap();
        let err = f
            .scheduler
            .force_refresh("a", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, RefreshError::InProgress);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_gate() {
        let f = fixture(RefreshConfig {
            max_concurrency: 1,
            ..RefreshConfig::default()
        });
        f.executors
            .register(Arc::new(StubExecutor::refreshing("codex")));
        f.registry
            .register(Credential::new("a", "codex"))
            .await
            .unwrap();

        let _held = Arc::clone(&f.scheduler.gate).acquire_owned().await.unwrap();
        assert!(f
            .scheduler
            .force_refresh("a", None, &CancellationToken::new())
            .await
            .is_ok());
    }
}

//! Reconciliation run orchestration.
//!
//! Selects the entities a run should touch, partitions them across a fixed
//! worker pool, and drives each entity through its phases: canonical
//! identifier first, then every active provider's detail fetch, then a
//! single merged write. A provider failing on one entity never aborts the
//! run; the failure is counted and the run moves on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::model::{
    EntityKind, EntityRow, FieldFailure, ProviderError, RunOptions, RunSummary, SelectionPolicy,
    StoreError,
};
use crate::pacing::{
    with_backoff_retry, RATE_LIMIT_RETRY_ATTEMPTS, STORAGE_RETRY_ATTEMPTS, STORAGE_RETRY_BASE,
};
use crate::providers::{FetchRequest, ProviderAdapter};
use crate::store::CatalogStore;

/// Default pause before the first retry of a rate-limited provider call.
pub const RATE_LIMIT_RETRY_BASE: Duration = Duration::from_secs(1);

/// Everything a run needs, borrowed for the run's duration.
pub struct RunContext<'a> {
    pub store: &'a Mutex<CatalogStore>,
    pub adapters: &'a [Box<dyn ProviderAdapter>],
    pub options: RunOptions,
    pub worker_count: usize,
    /// Backoff bases are injectable so tests do not sleep for real.
    pub storage_backoff_base: Duration,
    pub rate_limit_backoff_base: Duration,
    /// Checked between entities; workers finish their current entity and
    /// leave the rest for the next run.
    pub stop: &'a AtomicBool,
}

impl<'a> RunContext<'a> {
    pub fn new(
        store: &'a Mutex<CatalogStore>,
        adapters: &'a [Box<dyn ProviderAdapter>],
        options: RunOptions,
        worker_count: usize,
        stop: &'a AtomicBool,
    ) -> Self {
        Self {
            store,
            adapters,
            options,
            worker_count,
            storage_backoff_base: STORAGE_RETRY_BASE,
            rate_limit_backoff_base: RATE_LIMIT_RETRY_BASE,
            stop,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Pending,
    IdentifierResolving,
    LinkResolving,
    Merging,
    Persisted,
    Failed,
}

fn enter(entity: &EntityRow, phase: Phase) {
    log::debug!(
        "{} {} ({}): {:?}",
        entity.kind,
        entity.id,
        entity.name,
        phase
    );
}

fn lock_store<'a>(store: &'a Mutex<CatalogStore>) -> MutexGuard<'a, CatalogStore> {
    match store.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn active_adapters<'a>(ctx: &'a RunContext<'_>) -> impl Iterator<Item = &'a dyn ProviderAdapter> {
    ctx.adapters
        .iter()
        .map(|adapter| adapter.as_ref())
        .filter(|adapter| {
            adapter.enabled() && !ctx.options.disabled_providers.contains(&adapter.kind())
        })
}

/// Union of the fields owned by active adapters that handle this entity
/// kind. Drives both selection and the per-adapter skip rule.
fn enabled_fields(ctx: &RunContext<'_>, kind: EntityKind) -> Vec<&'static str> {
    let mut fields: Vec<&'static str> = Vec::new();
    for adapter in active_adapters(ctx) {
        if !adapter.supports(kind) {
            continue;
        }
        for field in adapter.kind().fields() {
            if !fields.contains(field) {
                fields.push(field);
            }
        }
    }
    fields
}

/// Executes one reconciliation run to completion and returns its summary.
/// Selection errors are fatal; per-entity provider and storage failures
/// are counted and skipped.
pub fn run(ctx: &RunContext<'_>) -> Result<RunSummary, StoreError> {
    for adapter in ctx.adapters.iter() {
        let kind = adapter.kind();
        if ctx.options.disabled_providers.contains(&kind) {
            log::info!("provider {kind} disabled by configuration");
        } else if !adapter.enabled() {
            log::info!("provider {kind} disabled: missing credentials");
        }
    }

    let mut selected: Vec<EntityRow> = Vec::new();
    for kind in EntityKind::ALL {
        let fields = enabled_fields(ctx, kind);
        if fields.is_empty() {
            continue;
        }
        let rows = lock_store(ctx.store).select_entities(
            kind,
            ctx.options.policy,
            ctx.options.staleness_days,
            &fields,
        )?;
        if !rows.is_empty() {
            log::info!("selected {} {kind} entities for reconciliation", rows.len());
        }
        selected.extend(rows);
    }

    let workers = ctx.worker_count.max(1);
    let mut buckets: Vec<Vec<EntityRow>> = (0..workers).map(|_| Vec::new()).collect();
    for row in selected {
        let slot = row.id.unsigned_abs() as usize % workers;
        buckets[slot].push(row);
    }

    let mut summary = RunSummary::default();
    let mut partials: Vec<RunSummary> = Vec::new();
    std::thread::scope(|scope| {
        let handles: Vec<_> = buckets
            .into_iter()
            .filter(|bucket| !bucket.is_empty())
            .map(|bucket| {
                scope.spawn(move || {
                    let mut partial = RunSummary::default();
                    for entity in bucket {
                        if ctx.stop.load(Ordering::SeqCst) {
                            log::info!("stop requested, deferring remaining entities");
                            break;
                        }
                        process_entity(ctx, entity, &mut partial);
                    }
                    partial
                })
            })
            .collect();
        for handle in handles {
            match handle.join() {
                Ok(partial) => partials.push(partial),
                Err(_) => log::error!("reconcile worker panicked"),
            }
        }
    });
    for partial in partials {
        summary.absorb(partial);
    }
    Ok(summary)
}

fn process_entity(ctx: &RunContext<'_>, entity: EntityRow, summary: &mut RunSummary) {
    summary.entities_processed += 1;
    enter(&entity, Phase::Pending);
    let force = matches!(ctx.options.policy, SelectionPolicy::Force);
    let original = entity.links.clone();
    let mut working = entity.links.clone();

    // Canonical identifier first, so every subsequent provider that can
    // look up by ID does so instead of re-searching. An already-resolved
    // ID is never re-derived outside of Force, and even Force keeps the
    // stored ID unless a directory candidate was actually accepted.
    enter(&entity, Phase::IdentifierResolving);
    if force || working.canonical_id.is_none() {
        for adapter in active_adapters(ctx) {
            if !adapter.supports(entity.kind)
                || !adapter.kind().fields().contains(&"canonical_id")
            {
                continue;
            }
            let provider = adapter.kind();
            let outcome = with_backoff_retry(
                ctx.rate_limit_backoff_base,
                RATE_LIMIT_RETRY_ATTEMPTS,
                |error: &ProviderError| matches!(error, ProviderError::RateLimited(_)),
                || {
                    adapter.resolve_canonical_id(
                        entity.kind,
                        &entity.name,
                        entity.parent_name.as_deref(),
                    )
                },
            );
            match outcome {
                Ok(Some(resolved)) => {
                    log::debug!(
                        "{} {} ({}): canonical id {} accepted at score {}",
                        entity.kind,
                        entity.id,
                        entity.name,
                        resolved.canonical_id,
                        resolved.score
                    );
                    working.canonical_id = Some(resolved.canonical_id);
                    summary.record_resolved(provider, "canonical_id");
                    break;
                }
                Ok(None) => {
                    if working.canonical_id.is_none() {
                        summary.record_unresolved(provider, "canonical_id");
                    }
                }
                Err(error) => {
                    log::warn!(
                        "{} {} ({}): canonical id resolution failed: {error}",
                        entity.kind,
                        entity.id,
                        entity.name
                    );
                    summary.record_failure(FieldFailure {
                        kind: entity.kind,
                        entity_id: entity.id,
                        entity_name: entity.name.clone(),
                        provider,
                        field: "canonical_id",
                        error: error.to_string(),
                    });
                }
            }
        }
    }

    enter(&entity, Phase::LinkResolving);
    for adapter in active_adapters(ctx) {
        if !adapter.supports(entity.kind) {
            continue;
        }
        let provider = adapter.kind();
        let owned: Vec<&'static str> = provider
            .fields()
            .iter()
            .copied()
            .filter(|field| *field != "canonical_id")
            .collect();
        if owned.is_empty() {
            continue;
        }
        if !force && owned.iter().all(|field| working.is_set(field)) {
            continue;
        }
        let tracked: Vec<&'static str> = if force {
            owned
        } else {
            owned
                .into_iter()
                .filter(|field| !working.is_set(field))
                .collect()
        };

        let request = FetchRequest {
            kind: entity.kind,
            name: &entity.name,
            secondary: entity.parent_name.as_deref(),
            canonical_id: working.canonical_id.as_deref(),
        };
        let outcome = with_backoff_retry(
            ctx.rate_limit_backoff_base,
            RATE_LIMIT_RETRY_ATTEMPTS,
            |error: &ProviderError| matches!(error, ProviderError::RateLimited(_)),
            || adapter.fetch_detail(&request),
        );
        match outcome {
            Ok(patch) => {
                if force {
                    working.merge(&patch);
                } else {
                    working.fill_missing(&patch);
                }
                for field in tracked {
                    if working.is_set(field) {
                        summary.record_resolved(provider, field);
                    } else {
                        summary.record_unresolved(provider, field);
                    }
                }
            }
            Err(error) => {
                log::warn!(
                    "{} {} ({}): {provider} fetch failed: {error}",
                    entity.kind,
                    entity.id,
                    entity.name
                );
                for field in tracked {
                    summary.record_failure(FieldFailure {
                        kind: entity.kind,
                        entity_id: entity.id,
                        entity_name: entity.name.clone(),
                        provider,
                        field,
                        error: error.to_string(),
                    });
                }
            }
        }
    }

    enter(&entity, Phase::Merging);
    let fields_changed = working != original;
    let persisted = with_backoff_retry(
        ctx.storage_backoff_base,
        STORAGE_RETRY_ATTEMPTS,
        |error: &StoreError| matches!(error, StoreError::Contention(_)),
        || lock_store(ctx.store).write_links(entity.kind, entity.id, &working, fields_changed),
    );
    match persisted {
        Ok(()) => {
            enter(&entity, Phase::Persisted);
            summary.entities_persisted += 1;
        }
        Err(error) => {
            enter(&entity, Phase::Failed);
            log::warn!(
                "{} {} ({}): persist failed after retries: {error}",
                entity.kind,
                entity.id,
                entity.name
            );
            summary.entities_failed += 1;
        }
    }
}

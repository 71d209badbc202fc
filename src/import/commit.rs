//! Commit stage: create entities in the store in dependency order, rewriting
//! every reference from import key to store id just before its batch is sent.
//!
//! Entity types are scheduled in waves. A wave holds types whose
//! dependencies have all completed, capped at `max_concurrency`, and runs on a
//! bounded rayon pool. Nothing is rolled back when a step fails: earlier steps
//! stay committed and the error names the failed step.

use super::validate::validate;
use super::{ImportContext, Issue};
use crate::config::{MigrateConfig, MAX_CONCURRENCY};
use crate::error::{MigrateError, Result};
use crate::model::{Entity, EntityType, Link};
use crate::progress::{ProgressTracker, StepStatus};
use crate::registry::KeyRegistry;
use crate::store::{AssignedRecord, PendingRecord, Store, StoreError};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Cooperative cancellation, honoured between waves only; a batch already
/// sent always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    pub created: BTreeMap<&'static str, usize>,
    pub photos_saved: usize,
    /// Non-blocking validation findings (e.g. optional references that will
    /// be left empty).
    pub warnings: Vec<Issue>,
}

fn read_registry(reg: &RwLock<KeyRegistry>) -> RwLockReadGuard<'_, KeyRegistry> {
    match reg.read() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_registry(reg: &RwLock<KeyRegistry>) -> RwLockWriteGuard<'_, KeyRegistry> {
    match reg.write() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Replace import keys with store ids. Unresolved optional references become
/// `Link::Unset`; unresolved required references are an error.
fn rewrite_links<T: Entity>(record: &mut T, registry: &KeyRegistry) -> Result<()> {
    let owner = record.import_key().to_string();
    for (field, link) in record.links_mut() {
        let Some(decl) = T::KIND.reference(field) else {
            continue;
        };
        let resolved = match &*link {
            Link::Key(key) => registry.resolve(T::KIND, &owner, decl, key)?,
            Link::Unset if decl.required => {
                return Err(MigrateError::UnresolvedReference {
                    entity: T::KIND,
                    import_key: owner,
                    field,
                    target: decl.target,
                    key: String::new(),
                })
            }
            Link::Unset => None,
            Link::Id(id) => Some(id.clone()),
        };
        *link = match resolved {
            Some(id) => Link::Id(id),
            None => Link::Unset,
        };
    }
    Ok(())
}

fn with_retry<T>(
    cfg: &MigrateConfig,
    kind: EntityType,
    mut call: impl FnMut() -> std::result::Result<T, StoreError>,
) -> Result<T> {
    let mut attempt = 1u32;
    loop {
        match call() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < cfg.retry_attempts => {
                log::warn!(
                    "{kind}: attempt {attempt}/{} failed: {e}; retrying",
                    cfg.retry_attempts
                );
                std::thread::sleep(cfg.backoff(attempt));
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Pair each sent import key with its assigned id. Uses echoed correlation
/// keys when the store returns all of them, positions otherwise.
fn correlate(
    kind: EntityType,
    sent: &[PendingRecord],
    assigned: &[AssignedRecord],
) -> Result<Vec<(String, String)>> {
    if assigned.len() != sent.len() {
        return Err(MigrateError::CorrelationMismatch {
            entity: kind,
            expected: sent.len(),
            got: assigned.len(),
        });
    }
    let echoed = assigned.iter().all(|a| a.correlation.is_some());
    if !echoed {
        return Ok(sent
            .iter()
            .zip(assigned)
            .map(|(s, a)| (s.correlation.clone(), a.id.clone()))
            .collect());
    }

    let expected: HashSet<&str> = sent.iter().map(|s| s.correlation.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut pairs = Vec::with_capacity(assigned.len());
    for a in assigned {
        let key = a.correlation.as_deref().unwrap_or_default();
        if !expected.contains(key) {
            return Err(MigrateError::UnknownCorrelation {
                entity: kind,
                key: key.to_string(),
            });
        }
        if !seen.insert(key) {
            return Err(MigrateError::DuplicateCorrelation {
                entity: kind,
                key: key.to_string(),
            });
        }
        pairs.push((key.to_string(), a.id.clone()));
    }
    Ok(pairs)
}

fn commit_collection<T: Entity>(
    items: &[T],
    store: &dyn Store,
    registry: &RwLock<KeyRegistry>,
    cfg: &MigrateConfig,
) -> Result<usize> {
    if items.is_empty() {
        return Ok(0);
    }
    let pending = {
        let reg = read_registry(registry);
        let mut pending = Vec::with_capacity(items.len());
        for item in items {
            let mut record = item.clone();
            rewrite_links(&mut record, &reg)?;
            pending.push(PendingRecord {
                correlation: item.import_key().to_string(),
                body: serde_json::to_value(&record)?,
            });
        }
        pending
    };

    log::debug!("{}: sending batch of {}", T::KIND, pending.len());
    let assigned = with_retry(cfg, T::KIND, || store.create_batch(T::KIND, &pending))?;
    let pairs = correlate(T::KIND, &pending, &assigned)?;

    let mut reg = write_registry(registry);
    for (key, id) in pairs {
        reg.register(T::KIND, &key, &id)?;
    }
    Ok(items.len())
}

fn save_photos(
    ctx: &ImportContext,
    store: &dyn Store,
    registry: &RwLock<KeyRegistry>,
    cfg: &MigrateConfig,
) -> Result<usize> {
    let mut saved = 0usize;
    for (key, bytes) in &ctx.photos {
        let Some(id) = read_registry(registry)
            .get(EntityType::Person, key)
            .map(str::to_string)
        else {
            continue;
        };
        with_retry(cfg, EntityType::Person, || store.save_photo(&id, bytes))?;
        saved += 1;
    }
    Ok(saved)
}

/// Commit one entity type. Returns (records created, photos saved).
fn run_step(
    kind: EntityType,
    ctx: &ImportContext,
    store: &dyn Store,
    registry: &RwLock<KeyRegistry>,
    cfg: &MigrateConfig,
) -> Result<(usize, usize)> {
    let n = match kind {
        EntityType::Campus => commit_collection(&ctx.campuses, store, registry, cfg)?,
        EntityType::Service => commit_collection(&ctx.services, store, registry, cfg)?,
        EntityType::ServiceTime => commit_collection(&ctx.service_times, store, registry, cfg)?,
        EntityType::Household => commit_collection(&ctx.households, store, registry, cfg)?,
        EntityType::Person => {
            let n = commit_collection(&ctx.people, store, registry, cfg)?;
            let photos = save_photos(ctx, store, registry, cfg)?;
            return Ok((n, photos));
        }
        EntityType::Group => commit_collection(&ctx.groups, store, registry, cfg)?,
        EntityType::GroupServiceTime => {
            commit_collection(&ctx.group_service_times, store, registry, cfg)?
        }
        EntityType::GroupMember => commit_collection(&ctx.group_members, store, registry, cfg)?,
        EntityType::Session => commit_collection(&ctx.sessions, store, registry, cfg)?,
        EntityType::Visit => commit_collection(&ctx.visits, store, registry, cfg)?,
        EntityType::VisitSession => commit_collection(&ctx.visit_sessions, store, registry, cfg)?,
        EntityType::Fund => commit_collection(&ctx.funds, store, registry, cfg)?,
        EntityType::DonationBatch => {
            commit_collection(&ctx.donation_batches, store, registry, cfg)?
        }
        EntityType::Donation => commit_collection(&ctx.donations, store, registry, cfg)?,
        EntityType::FundDonation => commit_collection(&ctx.fund_donations, store, registry, cfg)?,
        EntityType::Form => commit_collection(&ctx.forms, store, registry, cfg)?,
        EntityType::Question => commit_collection(&ctx.questions, store, registry, cfg)?,
        EntityType::FormSubmission => {
            commit_collection(&ctx.form_submissions, store, registry, cfg)?
        }
        EntityType::Answer => commit_collection(&ctx.answers, store, registry, cfg)?,
    };
    Ok((n, 0))
}

/// Errors that must stop the run before any write.
fn preflight(ctx: &ImportContext, cfg: &MigrateConfig) -> (Vec<Issue>, Vec<Issue>) {
    let mut blocking: Vec<Issue> = ctx.errors().cloned().collect();
    let mut warnings = Vec::new();
    if cfg.validate_before_commit {
        for issue in validate(ctx) {
            if issue.is_error() {
                blocking.push(issue);
            } else {
                warnings.push(issue);
            }
        }
    }
    (blocking, warnings)
}

pub fn commit(
    ctx: &ImportContext,
    store: &dyn Store,
    cfg: &MigrateConfig,
    progress: &ProgressTracker,
    cancel: &CancelToken,
) -> Result<CommitReport> {
    let (blocking, warnings) = preflight(ctx, cfg);
    if !blocking.is_empty() {
        return Err(MigrateError::Validation(blocking));
    }

    if let Some(fingerprint) = ctx.fingerprint.as_deref() {
        let fresh = store.claim_import(fingerprint)?;
        if !fresh && !cfg.allow_rerun {
            return Err(MigrateError::AlreadyImported {
                fingerprint: fingerprint.to_string(),
            });
        }
    }

    let workers = cfg.max_concurrency.clamp(1, MAX_CONCURRENCY);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| MigrateError::Pool(e.to_string()))?;
    let registry = RwLock::new(KeyRegistry::new());
    let mut status: HashMap<EntityType, StepStatus> = EntityType::ALL
        .into_iter()
        .map(|k| (k, StepStatus::Pending))
        .collect();
    for kind in EntityType::ALL {
        progress.set_status(kind.step_name(), StepStatus::Pending);
    }

    let mut report = CommitReport {
        warnings,
        ..CommitReport::default()
    };
    let mut completed: Vec<&'static str> = Vec::new();

    loop {
        let ready: Vec<EntityType> = EntityType::ALL
            .into_iter()
            .filter(|k| status.get(k) == Some(&StepStatus::Pending))
            .filter(|k| {
                k.dependencies()
                    .iter()
                    .all(|d| status.get(d) == Some(&StepStatus::Complete))
            })
            .take(workers)
            .collect();
        let Some(first) = ready.first() else {
            break;
        };
        if cancel.is_cancelled() {
            log::warn!("import cancelled before {first}");
            return Err(MigrateError::Cancelled {
                next: first.step_name(),
                completed,
            });
        }

        for kind in &ready {
            status.insert(*kind, StepStatus::Running);
            progress.set_status(kind.step_name(), StepStatus::Running);
            log::info!("{kind}: committing {} record(s)", ctx.len(*kind));
        }
        let results: Vec<(EntityType, Result<(usize, usize)>)> = pool.install(|| {
            ready
                .par_iter()
                .map(|&kind| (kind, run_step(kind, ctx, store, &registry, cfg)))
                .collect()
        });

        let mut failure: Option<(EntityType, MigrateError)> = None;
        for (kind, result) in results {
            match result {
                Ok((created, photos)) => {
                    status.insert(kind, StepStatus::Complete);
                    progress.set_status(kind.step_name(), StepStatus::Complete);
                    report.created.insert(kind.step_name(), created);
                    report.photos_saved += photos;
                    completed.push(kind.step_name());
                    log::info!("{kind}: complete ({created} created)");
                }
                Err(e) => {
                    status.insert(kind, StepStatus::Failed);
                    progress.set_status(kind.step_name(), StepStatus::Failed);
                    log::warn!("{kind}: failed: {e}");
                    if failure.is_none() {
                        failure = Some((kind, e));
                    }
                }
            }
        }
        if let Some((kind, e)) = failure {
            return Err(MigrateError::StepFailed {
                step: kind.step_name(),
                message: e.to_string(),
                completed,
            });
        }
    }

    let pending: Vec<&'static str> = EntityType::ALL
        .into_iter()
        .filter(|k| status.get(k) == Some(&StepStatus::Pending))
        .map(EntityType::step_name)
        .collect();
    if !pending.is_empty() {
        return Err(MigrateError::Pool(format!(
            "steps never became ready: {}",
            pending.join(", ")
        )));
    }

    log::info!(
        "import committed: {} ids registered",
        read_registry(&registry).len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Campus, Service, Visit};
    use chrono::NaiveDate;

    #[test]
    fn rewrite_resolves_required_and_clears_optional() {
        let mut reg = KeyRegistry::new();
        reg.register(EntityType::Person, "1", "p-1").expect("register");
        let mut visit = Visit {
            import_key: "1".into(),
            person_id: Link::key("1"),
            service_id: Link::key("5"),
            group_id: Link::Unset,
            visit_date: NaiveDate::from_ymd_opt(2024, 1, 7).expect("date"),
            ..Visit::default()
        };
        rewrite_links(&mut visit, &reg).expect("rewrite");
        assert_eq!(visit.person_id, Link::Id("p-1".into()));
        assert_eq!(visit.service_id, Link::Unset);
        assert_eq!(visit.group_id, Link::Unset);
    }

    #[test]
    fn rewrite_fails_on_missing_required() {
        let reg = KeyRegistry::new();
        let mut svc = Service {
            import_key: "3".into(),
            campus_id: Link::key("1"),
            name: "Sunday".into(),
            ..Service::default()
        };
        let err = rewrite_links(&mut svc, &reg).expect_err("unresolved");
        assert!(matches!(
            err,
            MigrateError::UnresolvedReference {
                entity: EntityType::Service,
                field: "campusId",
                ..
            }
        ));
    }

    fn pending(keys: &[&str]) -> Vec<PendingRecord> {
        keys.iter()
            .map(|k| PendingRecord {
                correlation: k.to_string(),
                body: serde_json::json!({}),
            })
            .collect()
    }

    #[test]
    fn correlate_prefers_echoed_keys() {
        let sent = pending(&["1", "2"]);
        let assigned = vec![
            AssignedRecord {
                id: "b".into(),
                correlation: Some("2".into()),
            },
            AssignedRecord {
                id: "a".into(),
                correlation: Some("1".into()),
            },
        ];
        let pairs = correlate(EntityType::Fund, &sent, &assigned).expect("correlate");
        assert_eq!(
            pairs,
            vec![("2".to_string(), "b".to_string()), ("1".to_string(), "a".to_string())]
        );
    }

    #[test]
    fn correlate_falls_back_to_position_and_checks_length() {
        let sent = pending(&["1", "2"]);
        let assigned = vec![
            AssignedRecord {
                id: "a".into(),
                correlation: None,
            },
            AssignedRecord {
                id: "b".into(),
                correlation: None,
            },
        ];
        let pairs = correlate(EntityType::Fund, &sent, &assigned).expect("correlate");
        assert_eq!(pairs[1], ("2".to_string(), "b".to_string()));

        let err = correlate(EntityType::Fund, &sent, &assigned[..1]).expect_err("short");
        assert!(matches!(err, MigrateError::CorrelationMismatch { got: 1, .. }));
    }

    #[test]
    fn correlate_names_unknown_and_repeated_keys() {
        let sent = pending(&["1", "2"]);
        let echo = |keys: [&str; 2]| -> Vec<AssignedRecord> {
            keys.iter()
                .enumerate()
                .map(|(i, k)| AssignedRecord {
                    id: format!("id{i}"),
                    correlation: Some(k.to_string()),
                })
                .collect()
        };

        let err = correlate(EntityType::Fund, &sent, &echo(["1", "9"])).expect_err("unknown");
        assert!(matches!(&err, MigrateError::UnknownCorrelation { key, .. } if key == "9"));
        assert_eq!(err.to_string(), "store echoed unknown funds key \"9\"");

        let err = correlate(EntityType::Fund, &sent, &echo(["2", "2"])).expect_err("repeated");
        assert!(matches!(&err, MigrateError::DuplicateCorrelation { key, .. } if key == "2"));
        assert_eq!(err.code(), "correlation_mismatch");
    }

    #[test]
    fn retry_only_for_transient_failures() {
        let cfg = MigrateConfig {
            retry_backoff_ms: 0,
            ..MigrateConfig::default()
        };
        let mut calls = 0;
        let out = with_retry(&cfg, EntityType::Campus, || {
            calls += 1;
            if calls < 3 {
                Err(StoreError::Transient("reset".into()))
            } else {
                Ok(calls)
            }
        })
        .expect("third attempt succeeds");
        assert_eq!(out, 3);

        let mut calls = 0;
        let err = with_retry(&cfg, EntityType::Campus, || -> std::result::Result<(), _> {
            calls += 1;
            Err(StoreError::Rejected("bad".into()))
        })
        .expect_err("rejected");
        assert_eq!(calls, 1);
        assert!(matches!(err, MigrateError::Store(StoreError::Rejected(_))));

        let mut calls = 0;
        let _ = with_retry(&cfg, EntityType::Campus, || -> std::result::Result<(), _> {
            calls += 1;
            Err(StoreError::Transient("down".into()))
        });
        assert_eq!(calls, 3);
    }

    #[test]
    fn empty_collections_never_reach_the_store() {
        let store = crate::store::MemoryStore::new();
        let mut ctx = ImportContext::default();
        ctx.campuses.push(Campus {
            import_key: "1".into(),
            name: "Main".into(),
            ..Campus::default()
        });
        let progress = ProgressTracker::for_import();
        let report = commit(
            &ctx,
            &store,
            &MigrateConfig::default(),
            &progress,
            &CancelToken::new(),
        )
        .expect("commit");
        assert_eq!(store.batches(), vec![(EntityType::Campus, 1)]);
        assert_eq!(report.created.get("campuses"), Some(&1));
        assert_eq!(report.created.get("people"), Some(&0));
        assert!(progress
            .snapshot()
            .iter()
            .all(|s| s.status == StepStatus::Complete));
    }
}

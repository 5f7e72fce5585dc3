//! Expire-then-sweep reconciliation.
//!
//! The service has no changefeed, so removals are detected by marking every
//! cached record of a kind `expired`, re-fetching everything, and deleting
//! whatever was not seen again. A failed fetch never sweeps.

use std::cell::RefCell;
use std::collections::HashSet;

use serde_json::Value;

use crate::cache::{self, Diff, EntityCache, Origin};
use crate::error::Result;
use crate::models::{Entity, EntityKind};
use crate::pipeline::bulk::{Bulk, PageParams, PageSource};

/// Result of a reconciliation request.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Another pass for the same kind was already running
    Skipped,
    Completed(PassSummary),
}

/// Summary of one completed pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassSummary {
    pub kind: EntityKind,
    pub pages: usize,
    pub observed: usize,
    pub diff: Diff,
    /// Observations dropped because a push event was newer
    pub stale: usize,
}

/// Runs passes, at most one per kind at a time.
#[derive(Debug, Default)]
pub struct Reconciler {
    busy: RefCell<HashSet<EntityKind>>,
}

/// Clears the kind's busy flag when dropped.
struct BusyGuard<'a> {
    busy: &'a RefCell<HashSet<EntityKind>>,
    kind: EntityKind,
}

impl<'a> BusyGuard<'a> {
    fn acquire(busy: &'a RefCell<HashSet<EntityKind>>, kind: EntityKind) -> Option<Self> {
        busy.borrow_mut().insert(kind).then_some(Self { busy, kind })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.borrow_mut().remove(&self.kind);
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self, kind: EntityKind) -> bool {
        self.busy.borrow().contains(&kind)
    }

    /// Reconcile every record of `E` against `source`.
    pub async fn run<E, S>(
        &self,
        cache: &RefCell<EntityCache<E>>,
        source: &S,
        page_size: usize,
    ) -> Result<ReconcileOutcome>
    where
        E: Entity,
        S: PageSource<Item = Value> + ?Sized,
    {
        let Some(_guard) = BusyGuard::acquire(&self.busy, E::KIND) else {
            log::debug!("{} reconciliation already running, skipping", E::KIND);
            return Ok(ReconcileOutcome::Skipped);
        };

        let pass = cache.borrow_mut().begin_pass(|_| true);
        let diff = RefCell::new(Diff::default());
        let stale = RefCell::new(0usize);

        let result = Bulk::new(PageParams::new(page_size))
            .target(-1)
            .on_page(|items: &[Value]| {
                let mut diff = diff.borrow_mut();
                cache::mutate(cache, |cache| {
                    for item in items {
                        match cache.upsert_from(item, Origin::Pass(pass)) {
                            Ok(upserted) if upserted.stale => *stale.borrow_mut() += 1,
                            Ok(upserted) if upserted.created => diff.added.push(upserted.id),
                            Ok(upserted) if !upserted.changes.is_empty() => {
                                diff.updated.push(upserted.id)
                            }
                            Ok(_) => {}
                            Err(e) => log::warn!("Skipping {} item: {}", E::KIND, e),
                        }
                    }
                });
            })
            .run(source)
            .await;

        match result {
            Ok(outcome) => {
                let removed = cache::mutate(cache, |cache| cache.sweep(&pass));
                let mut diff = diff.into_inner();
                diff.removed = removed;
                log::info!(
                    "{} reconciled: {} seen, +{} ~{} -{}",
                    E::KIND,
                    outcome.items,
                    diff.added.len(),
                    diff.updated.len(),
                    diff.removed.len()
                );
                Ok(ReconcileOutcome::Completed(PassSummary {
                    kind: E::KIND,
                    pages: outcome.pages,
                    observed: outcome.items,
                    diff,
                    stale: stale.into_inner(),
                }))
            }
            Err(e) => {
                cache.borrow_mut().abandon_pass(&pass);
                log::warn!("{} reconciliation failed, nothing swept: {}", E::KIND, e);
                Err(e)
            }
        }
    }
}

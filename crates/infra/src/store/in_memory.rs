use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use stockledger_core::DomainResult;
use stockledger_inventory::{StockBalance, StockKey, StockMovement};

use crate::error::LedgerError;

/// Committed state of one key: the balance row and its movement chain.
#[derive(Debug, Default, Clone)]
pub(crate) struct RowState {
    /// `None` until the first commit that touches the key.
    pub balance: Option<StockBalance>,
    pub movements: Vec<StockMovement>,
}

impl RowState {
    pub(crate) fn balance_or_empty(&self, key: StockKey) -> StockBalance {
        self.balance
            .clone()
            .unwrap_or_else(|| StockBalance::empty(key))
    }
}

/// One balance row: an exclusive writer lock plus the committed state.
///
/// The writer lock is held by a unit of work from first touch until commit or
/// rollback. `state` is only locked briefly, so readers never wait on writers.
#[derive(Debug, Default)]
pub(crate) struct RowSlot {
    writer: Arc<Mutex<()>>,
    state: RwLock<RowState>,
}

impl RowSlot {
    pub(crate) fn read<T>(&self, f: impl FnOnce(&RowState) -> T) -> T {
        f(&self.state.read())
    }
}

/// In-memory Balance Store + Movement Log with per-key locking.
///
/// Intended for tests/dev and for embedding. Keys live in a sharded map so
/// unrelated keys never contend on a common lock.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    rows: DashMap<StockKey, Arc<RowSlot>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a unit of work; rows it locks stay locked until commit or drop.
    pub fn begin(&self, lock_timeout: Duration) -> UnitOfWork<'_> {
        let uow = UnitOfWork {
            store: self,
            id: Uuid::now_v7(),
            rows: BTreeMap::new(),
            lock_timeout,
        };
        debug!(uow_id = %uow.id, "unit of work opened");
        uow
    }

    /// Get-or-create the slot for `key`. The map shard is released before
    /// the caller locks the row.
    fn slot(&self, key: StockKey) -> Arc<RowSlot> {
        self.rows.entry(key).or_default().value().clone()
    }

    pub(crate) fn existing_slot(&self, key: &StockKey) -> Option<Arc<RowSlot>> {
        self.rows.get(key).map(|entry| entry.value().clone())
    }

    /// Snapshot of every known slot, sorted by key.
    pub(crate) fn slots(&self) -> Vec<(StockKey, Arc<RowSlot>)> {
        let mut out: Vec<_> = self
            .rows
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Slots whose key matches `filter`, sorted by key.
    pub(crate) fn slots_where(
        &self,
        filter: impl Fn(&StockKey) -> bool,
    ) -> Vec<(StockKey, Arc<RowSlot>)> {
        let mut out: Vec<_> = self
            .rows
            .iter()
            .filter(|entry| filter(entry.key()))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Read several slots under one set of guards taken in key order, giving
    /// a view no commit can tear. `slots` must be sorted by key.
    pub(crate) fn read_many<T>(
        slots: &[(StockKey, Arc<RowSlot>)],
        mut f: impl FnMut(&StockKey, &RowState) -> T,
    ) -> Vec<T> {
        let states: Vec<_> = slots.iter().map(|(_, slot)| slot.state.read()).collect();
        slots
            .iter()
            .zip(states.iter())
            .map(|((key, _), state)| f(key, state))
            .collect()
    }

    /// Committed balances of `keys` read as one consistent snapshot. Keys
    /// never written read as `None`.
    ///
    /// Slots are created for unknown keys so a first commit racing this read
    /// is either fully seen or not at all.
    pub fn committed_balances(&self, keys: &[StockKey]) -> Vec<(StockKey, Option<StockBalance>)> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();
        let slots: Vec<(StockKey, Arc<RowSlot>)> = sorted
            .into_iter()
            .map(|key| (key, self.slot(key)))
            .collect();
        let found = Self::read_many(&slots, |key, state| (*key, state.balance.clone()));
        keys.iter()
            .map(|key| {
                let balance = found
                    .iter()
                    .find(|(k, _)| k == key)
                    .and_then(|(_, b)| b.clone());
                (*key, balance)
            })
            .collect()
    }

    /// Committed balance for `key`, if the key was ever written.
    pub fn committed_balance(&self, key: &StockKey) -> Option<StockBalance> {
        self.existing_slot(key)
            .and_then(|slot| slot.read(|state| state.balance.clone()))
    }

    /// Committed movement chain for `key`, in sequence order.
    pub fn committed_movements(&self, key: &StockKey) -> Vec<StockMovement> {
        self.existing_slot(key)
            .map(|slot| slot.read(|state| state.movements.clone()))
            .unwrap_or_default()
    }

    /// Overwrite a committed balance without going through a unit of work.
    #[cfg(test)]
    pub(crate) fn tamper_balance(&self, key: StockKey, f: impl FnOnce(&mut StockBalance)) {
        let slot = self.slot(key);
        let mut state = slot.state.write();
        let mut balance = state.balance_or_empty(key);
        f(&mut balance);
        state.balance = Some(balance);
    }

    /// Append a movement without going through a unit of work.
    #[cfg(test)]
    pub(crate) fn tamper_movements(&self, key: StockKey, f: impl FnOnce(&mut Vec<StockMovement>)) {
        let slot = self.slot(key);
        f(&mut slot.state.write().movements);
    }
}

/// A row held by a unit of work: the writer guard plus staged changes.
pub(crate) struct StagedRow {
    slot: Arc<RowSlot>,
    _guard: ArcMutexGuard<RawMutex, ()>,
    working: StockBalance,
    pending: Vec<StockMovement>,
    dirty: bool,
}

impl StagedRow {
    /// The balance as this unit of work sees it (committed + staged).
    pub(crate) fn balance(&self) -> &StockBalance {
        &self.working
    }

    /// Committed movements followed by the ones staged here.
    pub(crate) fn chain(&self) -> Vec<StockMovement> {
        let mut chain = self.slot.read(|state| state.movements.clone());
        chain.extend(self.pending.iter().cloned());
        chain
    }

    /// Stage a movement. The working balance is only touched if it applies.
    pub(crate) fn record(&mut self, movement: StockMovement) -> Result<(), LedgerError> {
        let key = self.working.key;
        self.working
            .apply(&movement)
            .map_err(|e| LedgerError::from_domain(key, e))?;
        self.pending.push(movement);
        self.dirty = true;
        Ok(())
    }

    /// Run a non-movement change (reservations, projections, repair) on a copy
    /// and keep it only if it succeeds.
    pub(crate) fn update<T>(
        &mut self,
        f: impl FnOnce(&mut StockBalance) -> DomainResult<T>,
    ) -> Result<T, LedgerError> {
        let key = self.working.key;
        let mut next = self.working.clone();
        let out = f(&mut next).map_err(|e| LedgerError::from_domain(key, e))?;
        self.working = next;
        self.dirty = true;
        Ok(out)
    }
}

/// Ambient transaction for in-memory ledger writes.
///
/// Every mutating ledger operation takes `&mut UnitOfWork`. Nothing it stages
/// is visible to readers until [`UnitOfWork::commit`]; dropping it rolls back.
pub struct UnitOfWork<'s> {
    store: &'s InMemoryStockStore,
    id: Uuid,
    rows: BTreeMap<StockKey, StagedRow>,
    lock_timeout: Duration,
}

impl<'s> UnitOfWork<'s> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The balance as seen inside this unit of work, if the key is locked here.
    pub fn staged_balance(&self, key: &StockKey) -> Option<&StockBalance> {
        self.rows.get(key).map(StagedRow::balance)
    }

    pub(crate) fn belongs_to(&self, store: &InMemoryStockStore) -> Result<(), LedgerError> {
        if std::ptr::eq(self.store, store) {
            Ok(())
        } else {
            Err(LedgerError::validation(
                "unit of work was opened on a different ledger",
            ))
        }
    }

    /// Lock `key` (get-or-create) and return its staged row.
    ///
    /// Re-locking a key already held reuses the staged state. Waiting longer
    /// than the lock timeout fails with a concurrency error.
    pub(crate) fn lock(&mut self, key: StockKey) -> Result<&mut StagedRow, LedgerError> {
        if !self.rows.contains_key(&key) {
            let slot = self.store.slot(key);
            let guard = slot.writer.try_lock_arc_for(self.lock_timeout).ok_or_else(|| {
                LedgerError::concurrency(format!(
                    "timed out after {}ms waiting for the lock on {key}",
                    self.lock_timeout.as_millis()
                ))
            })?;
            let working = slot.read(|state| state.balance_or_empty(key));
            debug!(uow_id = %self.id, %key, last_sequence = working.last_sequence, "row locked");
            self.rows.insert(
                key,
                StagedRow {
                    slot,
                    _guard: guard,
                    working,
                    pending: Vec::new(),
                    dirty: false,
                },
            );
        }
        self.rows
            .get_mut(&key)
            .ok_or_else(|| LedgerError::store(format!("row {key} vanished from unit of work")))
    }

    /// Lock several keys in ascending key order.
    pub(crate) fn lock_all(&mut self, keys: &[StockKey]) -> Result<(), LedgerError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();
        for key in sorted {
            self.lock(key)?;
        }
        Ok(())
    }

    /// Publish every staged change, then release the row locks.
    ///
    /// Every changed row is write-locked, in key order, before any of them is
    /// published, so a reader holding row guards in the same order sees all
    /// of the unit of work or none of it. Returns the number of movements
    /// written.
    pub fn commit(mut self) -> usize {
        let mut dirty: Vec<(StockKey, StagedRow)> = std::mem::take(&mut self.rows)
            .into_iter()
            .filter(|(_, row)| row.dirty)
            .collect();
        let slots: Vec<Arc<RowSlot>> = dirty.iter().map(|(_, row)| row.slot.clone()).collect();
        let mut states: Vec<_> = slots.iter().map(|slot| slot.state.write()).collect();

        let now = chrono::Utc::now();
        let mut written = 0;
        for ((key, row), state) in dirty.iter_mut().zip(states.iter_mut()) {
            written += row.pending.len();
            state.movements.append(&mut row.pending);
            let mut balance = row.working.clone();
            balance.updated_at = Some(now);
            state.balance = Some(balance);
            debug!(uow_id = %self.id, %key, "row committed");
        }
        drop(states);
        // Writer locks go last, once every row is visible.
        drop(dirty);
        debug!(uow_id = %self.id, movements = written, "unit of work committed");
        written
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        let staged = self.rows.values().filter(|row| row.dirty).count();
        if staged > 0 {
            debug!(uow_id = %self.id, rows = staged, "unit of work rolled back");
        }
    }
}

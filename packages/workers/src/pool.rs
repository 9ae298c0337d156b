//! Worker pool: the partition of units into idle and working sets.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::watch;

use crate::unit::WorkerUnit;

/// Pool bookkeeping errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker {0} released while not reserved")]
    NotReserved(String),

    #[error("pool state lock poisoned")]
    Poisoned,
}

/// Point-in-time view of pool membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub idle: Vec<String>,
    pub working: Vec<String>,
}

struct PoolSets {
    idle: VecDeque<Arc<WorkerUnit>>,
    working: HashMap<String, Arc<WorkerUnit>>,
}

/// Fixed-size pool of worker units.
///
/// Every unit is in exactly one of `idle` or `working`. `reserve` and
/// `release` each move one unit between the sets inside a single critical
/// section, so no caller ever observes a unit in both or neither.
pub struct WorkerPool {
    sets: Mutex<PoolSets>,
    working_count: watch::Sender<usize>,
    size: usize,
}

impl WorkerPool {
    /// Provision `size` fresh idle units named `worker-1..=worker-size`.
    pub fn new(size: usize) -> Self {
        let idle = (1..=size)
            .map(|n| Arc::new(WorkerUnit::new(format!("worker-{}", n))))
            .collect();
        let (working_count, _) = watch::channel(0);
        Self {
            sets: Mutex::new(PoolSets {
                idle,
                working: HashMap::new(),
            }),
            working_count,
            size,
        }
    }

    /// Move one idle unit into the working set.
    ///
    /// Returns `None` when every unit is already working.
    pub fn reserve(&self) -> Result<Option<Arc<WorkerUnit>>, PoolError> {
        let mut sets = self.lock()?;
        let Some(unit) = sets.idle.pop_front() else {
            return Ok(None);
        };
        sets.working.insert(unit.id().to_string(), Arc::clone(&unit));
        self.working_count.send_replace(sets.working.len());
        Ok(Some(unit))
    }

    /// Move a reserved unit back into the idle set.
    ///
    /// Fails with `NotReserved` if the unit is not currently in the working
    /// set; the pool is left untouched in that case.
    pub fn release(&self, unit: &Arc<WorkerUnit>) -> Result<(), PoolError> {
        let mut sets = self.lock()?;
        match sets.working.get(unit.id()) {
            Some(held) if Arc::ptr_eq(held, unit) => {}
            _ => return Err(PoolError::NotReserved(unit.id().to_string())),
        }
        sets.working.remove(unit.id());
        unit.reset();
        sets.idle.push_back(Arc::clone(unit));
        self.working_count.send_replace(sets.working.len());
        Ok(())
    }

    /// Wait until no unit is working.
    pub async fn wait_drained(&self) {
        let mut rx = self.working_count.subscribe();
        let _ = rx.wait_for(|working| *working == 0).await;
    }

    pub fn snapshot(&self) -> Result<PoolSnapshot, PoolError> {
        let sets = self.lock()?;
        let idle = sets.idle.iter().map(|u| u.id().to_string()).collect();
        let mut working: Vec<String> = sets.working.keys().cloned().collect();
        working.sort();
        Ok(PoolSnapshot { idle, working })
    }

    pub fn idle_count(&self) -> usize {
        self.lock().map(|sets| sets.idle.len()).unwrap_or(0)
    }

    pub fn working_count(&self) -> usize {
        *self.working_count.borrow()
    }

    /// Total number of units.
    pub fn size(&self) -> usize {
        self.size
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolSets>, PoolError> {
        self.sets.lock().map_err(|_| PoolError::Poisoned)
    }
}

//! Caller-facing API: submit commissions, poll them, cancel them, wait.
//!
//! Each commission runs on its own worker thread and owns its state
//! exclusively. The workshop only shares a status snapshot, a cancel flag,
//! and the final outcome with callers.

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::agents::{Agents, Critic, Generator, Planner, Reviewer};
use crate::commission::{CancelToken, Commission, CommissionStatus, Outcome};
use crate::core::types::CommissionId;
use crate::io::archive::Archive;
use crate::orchestrator::{LoopConfig, Orchestrator, fault_outcome};

#[derive(Debug, Error)]
pub enum WorkshopError {
    #[error("unknown commission '{0}'")]
    UnknownCommission(CommissionId),
    #[error("commission '{0}' already exists")]
    DuplicateCommission(CommissionId),
    #[error("commission '{0}' is still running")]
    StillRunning(CommissionId),
    #[error("failed to spawn worker for commission '{id}'")]
    Spawn {
        id: CommissionId,
        #[source]
        source: io::Error,
    },
}

/// Outcome slot filled by the worker exactly once.
#[derive(Default)]
struct Completion {
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
}

struct Entry {
    status: Arc<Mutex<CommissionStatus>>,
    cancel: CancelToken,
    completion: Arc<Completion>,
}

pub struct Workshop<P, R, G, C> {
    agents: Arc<Agents<P, R, G, C>>,
    config: Arc<LoopConfig>,
    archive: Option<Arc<dyn Archive + Send + Sync>>,
    entries: Mutex<HashMap<CommissionId, Entry>>,
}

impl<P, R, G, C> Workshop<P, R, G, C>
where
    P: Planner + Send + Sync + 'static,
    R: Reviewer + Send + Sync + 'static,
    G: Generator + Send + Sync + 'static,
    C: Critic + Send + Sync + 'static,
{
    pub fn new(agents: Agents<P, R, G, C>, config: LoopConfig) -> Self {
        Self {
            agents: Arc::new(agents),
            config: Arc::new(config),
            archive: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Hand every terminal commission record to `archive`.
    pub fn with_archive(mut self, archive: impl Archive + Send + Sync + 'static) -> Self {
        self.archive = Some(Arc::new(archive));
        self
    }

    /// Start a commission under a fresh `commission-<8 hex>` id.
    pub fn submit_commission(&self, prompt: impl Into<String>) -> Result<CommissionId, WorkshopError> {
        let mut entries = lock(&self.entries);
        let id = fresh_id(&entries);
        self.spawn(&mut entries, id, prompt.into())
    }

    /// Start a commission under a caller-chosen id.
    pub fn submit_with_id(
        &self,
        id: CommissionId,
        prompt: impl Into<String>,
    ) -> Result<CommissionId, WorkshopError> {
        let mut entries = lock(&self.entries);
        if entries.contains_key(&id) {
            return Err(WorkshopError::DuplicateCommission(id));
        }
        self.spawn(&mut entries, id, prompt.into())
    }

    pub fn get_status(&self, id: &CommissionId) -> Result<CommissionStatus, WorkshopError> {
        let entries = lock(&self.entries);
        let entry = entries
            .get(id)
            .ok_or_else(|| WorkshopError::UnknownCommission(id.clone()))?;
        Ok(lock(&entry.status).clone())
    }

    /// Request cooperative cancellation. A finished commission is unaffected.
    pub fn cancel(&self, id: &CommissionId) -> Result<(), WorkshopError> {
        let entries = lock(&self.entries);
        let entry = entries
            .get(id)
            .ok_or_else(|| WorkshopError::UnknownCommission(id.clone()))?;
        info!(commission = %id, "cancellation requested");
        entry.cancel.cancel();
        Ok(())
    }

    /// Block until the commission is terminal and return its outcome.
    pub fn wait(&self, id: &CommissionId) -> Result<Outcome, WorkshopError> {
        let completion = {
            let entries = lock(&self.entries);
            let entry = entries
                .get(id)
                .ok_or_else(|| WorkshopError::UnknownCommission(id.clone()))?;
            Arc::clone(&entry.completion)
        };
        let mut slot = lock(&completion.outcome);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Ok(outcome.clone());
            }
            slot = completion
                .done
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Release a finished commission and hand back its outcome.
    ///
    /// The id becomes unknown afterwards. A running commission is kept.
    pub fn forget(&self, id: &CommissionId) -> Result<Outcome, WorkshopError> {
        let mut entries = lock(&self.entries);
        let entry = entries
            .get(id)
            .ok_or_else(|| WorkshopError::UnknownCommission(id.clone()))?;
        // Cloned rather than taken: concurrent waiters hold the same slot.
        let Some(outcome) = lock(&entry.completion.outcome).clone() else {
            return Err(WorkshopError::StillRunning(id.clone()));
        };
        entries.remove(id);
        info!(commission = %id, "commission released");
        Ok(outcome)
    }

    fn spawn(
        &self,
        entries: &mut HashMap<CommissionId, Entry>,
        id: CommissionId,
        prompt: String,
    ) -> Result<CommissionId, WorkshopError> {
        let commission = Commission::new(id.clone(), prompt);
        let entry = Entry {
            status: Arc::new(Mutex::new(commission.status())),
            cancel: CancelToken::new(),
            completion: Arc::new(Completion::default()),
        };

        let worker = Worker {
            agents: Arc::clone(&self.agents),
            config: Arc::clone(&self.config),
            archive: self.archive.clone(),
            status: Arc::clone(&entry.status),
            cancel: entry.cancel.clone(),
            completion: Arc::clone(&entry.completion),
        };
        thread::Builder::new()
            .name(format!("workshop-{id}"))
            .spawn(move || worker.run(commission))
            .map_err(|source| WorkshopError::Spawn {
                id: id.clone(),
                source,
            })?;

        info!(commission = %id, "commission submitted");
        entries.insert(id.clone(), entry);
        Ok(id)
    }
}

/// Everything a worker thread owns or shares.
struct Worker<P, R, G, C> {
    agents: Arc<Agents<P, R, G, C>>,
    config: Arc<LoopConfig>,
    archive: Option<Arc<dyn Archive + Send + Sync>>,
    status: Arc<Mutex<CommissionStatus>>,
    cancel: CancelToken,
    completion: Arc<Completion>,
}

impl<P, R, G, C> Worker<P, R, G, C>
where
    P: Planner,
    R: Reviewer,
    G: Generator,
    C: Critic,
{
    fn run(self, mut commission: Commission) {
        let orchestrator = Orchestrator::new(&self.agents, &self.config);
        let status = &self.status;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            orchestrator.run(&mut commission, &self.cancel, &mut |snapshot: &CommissionStatus| {
                *lock(status) = snapshot.clone();
            })
        }));
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => {
                let outcome =
                    fault_outcome(&mut commission, "worker panicked while running".to_string());
                commission.set_summary(outcome.summary());
                *lock(status) = commission.status();
                outcome
            }
        };

        if let Some(archive) = &self.archive
            && let Err(err) = archive.archive(&commission.record(Some(&outcome)))
        {
            warn!(commission = %commission.id(), error = %format!("{err:#}"), "archive failed");
        }

        *lock(&self.completion.outcome) = Some(outcome);
        self.completion.done.notify_all();
    }
}

fn fresh_id(entries: &HashMap<CommissionId, Entry>) -> CommissionId {
    let mut rng = rand::thread_rng();
    loop {
        let candidate = format!("commission-{:08x}", rng.gen_range(0..=u32::MAX));
        if let Ok(id) = CommissionId::parse(candidate)
            && !entries.contains_key(&id)
        {
            return id;
        }
    }
}

/// Lock ignoring poisoning; every guarded value stays well-formed.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

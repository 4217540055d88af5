//! Parallel fan-out of build units
//!
//! Every matrix entry is spawned onto a `JoinSet` right away and waits for a
//! semaphore permit before doing any work, so at most `max_parallel` units
//! run at once. Each unit's `AbortHandle` is registered under its service
//! name, which lets a caller cancel one unit or all of them while the run is
//! in flight.

use keel_core::domain::build::BuildResult;
use keel_core::domain::service::ServiceDescriptor;
use keel_core::error::PipelineError;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct CancelState {
    running: HashMap<String, AbortHandle>,
    /// Cancellations requested before the unit was spawned
    requested: HashSet<String>,
    all: bool,
}

/// Cancels in-flight build units
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    state: Arc<Mutex<CancelState>>,
}

impl CancelHandle {
    /// Cancels the unit building `service`. Returns whether it was running.
    pub fn cancel(&self, service: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.running.get(service) {
            Some(handle) => {
                info!("Cancelling build of {}", service);
                handle.abort();
                true
            }
            None => {
                state.requested.insert(service.to_string());
                false
            }
        }
    }

    /// Cancels every unit of the current run, including ones not yet spawned
    pub fn cancel_all(&self) {
        let mut state = self.state.lock().unwrap();
        state.all = true;
        for (service, handle) in &state.running {
            debug!("Cancelling build of {}", service);
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().unwrap().all
    }

    /// Forgets all cancellation requests; called when a run finishes
    pub fn reset(&self) {
        *self.state.lock().unwrap() = CancelState::default();
    }

    fn register(&self, service: &str, handle: AbortHandle) {
        let mut state = self.state.lock().unwrap();
        if state.all || state.requested.remove(service) {
            handle.abort();
        }
        state.running.insert(service.to_string(), handle);
    }

    fn unregister(&self, service: &str) {
        self.state.lock().unwrap().running.remove(service);
    }
}

/// Runs one unit per matrix entry with bounded parallelism
#[derive(Debug, Clone)]
pub struct Scheduler {
    max_parallel: usize,
    fail_fast: bool,
    cancel: CancelHandle,
}

impl Scheduler {
    pub fn new(max_parallel: usize, fail_fast: bool) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            fail_fast,
            cancel: CancelHandle::default(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Runs `work` for every entry and returns one result per entry, in
    /// entry order. Panicked and cancelled units are reported as failures.
    pub async fn fan_out<F, Fut>(&self, entries: &[ServiceDescriptor], work: F) -> Vec<BuildResult>
    where
        F: Fn(ServiceDescriptor) -> Fut,
        Fut: Future<Output = BuildResult> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut set = JoinSet::new();
        let mut slots = HashMap::new();

        info!(
            "Fanning out {} unit(s), at most {} in parallel",
            entries.len(),
            self.max_parallel
        );

        for (index, service) in entries.iter().enumerate() {
            let permits = Arc::clone(&semaphore);
            let unit = work(service.clone());

            let handle = set.spawn(async move {
                // Permit is released when the unit finishes or is aborted
                let _permit = permits.acquire_owned().await;
                unit.await
            });

            slots.insert(handle.id(), index);
            self.cancel.register(&service.name, handle);
        }

        let mut results: Vec<Option<BuildResult>> = vec![None; entries.len()];

        while let Some(joined) = set.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => {
                    let Some(&index) = slots.get(&e.id()) else {
                        continue;
                    };
                    let service = &entries[index];
                    let error = if e.is_cancelled() {
                        PipelineError::Cancelled {
                            service: service.name.clone(),
                        }
                    } else {
                        warn!("Build unit for {} panicked: {}", service.name, e);
                        PipelineError::BuildFailed {
                            service: service.name.clone(),
                            cause: format!("build unit panicked: {}", e),
                        }
                    };
                    (e.id(), BuildResult::failed(service.clone(), &error))
                }
            };

            let Some(&index) = slots.get(&id) else {
                continue;
            };
            self.cancel.unregister(&entries[index].name);

            if !result.success && self.fail_fast && !self.cancel.is_cancelled() {
                info!(
                    "{} failed and fail_fast is set, cancelling remaining units",
                    entries[index].name
                );
                self.cancel.cancel_all();
            }

            results[index] = Some(result);
        }

        results
            .into_iter()
            .zip(entries)
            .map(|(result, service)| {
                result.unwrap_or_else(|| {
                    BuildResult::failed(
                        service.clone(),
                        &PipelineError::Cancelled {
                            service: service.name.clone(),
                        },
                    )
                })
            })
            .collect()
    }
}

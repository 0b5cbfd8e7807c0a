/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Worker Pool Lifecycle Module
//!
//! [`QueueLifecycle`] owns a fixed set of worker tasks that repeatedly ask
//! an [`EventProcessor`] for one unit of work, sleep adaptively (the target
//! cadence minus the time the iteration took, floored at zero), and support
//! suspend/resume plus bounded-time start and stop.
//!
//! Fault isolation: a processor error is logged and the loop continues on
//! its next tick; a panic unwinds only that worker, the active count is
//! still released, and the pool runs degraded until the next
//! `start_queue`. Stop is best-effort: workers are asked to exit and waited
//! on with a timeout; there is no hard kill of an in-flight unit of work.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::QueueError;

/// Soft timeout for worker readiness on start and drain-down on stop.
const WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Poll interval while waiting for workers to start or drain.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One unit of queue work.
///
/// Implementations typically drain the ready entries of a hybrid queue,
/// dispatch each one and move it to history, returning how many entries
/// were handled.
#[async_trait]
pub trait EventProcessor: Send + Sync + 'static {
    /// Performs one polling iteration.
    async fn process_events(&self) -> Result<usize, QueueError>;
}

/// Flags and counters shared between the lifecycle handle and its workers.
struct WorkerShared {
    processing_enabled: AtomicBool,
    suspended: AtomicBool,
    active_workers: AtomicUsize,
}

/// Releases a worker's slot on any exit path, including panics.
struct ActiveWorkerGuard {
    shared: Arc<WorkerShared>,
    queue_name: String,
    worker_id: usize,
}

impl Drop for ActiveWorkerGuard {
    fn drop(&mut self) {
        self.shared.active_workers.fetch_sub(1, Ordering::SeqCst);
        if std::thread::panicking() {
            error!(
                queue_name = %self.queue_name,
                worker_id = self.worker_id,
                "worker terminated by panic"
            );
        } else {
            info!(
                queue_name = %self.queue_name,
                worker_id = self.worker_id,
                "worker exited"
            );
        }
    }
}

/// Start/stop/suspend control for a fixed pool of queue workers.
///
/// Each queue instance owns its own lifecycle; instances are independently
/// startable, stoppable and suspendable.
pub struct QueueLifecycle {
    config: QueueConfig,
    processor: Arc<dyn EventProcessor>,
    is_started: AtomicBool,
    shared: Arc<WorkerShared>,
}

impl QueueLifecycle {
    /// Creates a stopped lifecycle for the given processor.
    pub fn new(config: QueueConfig, processor: Arc<dyn EventProcessor>) -> Self {
        Self {
            config,
            processor,
            is_started: AtomicBool::new(false),
            shared: Arc::new(WorkerShared {
                processing_enabled: AtomicBool::new(false),
                suspended: AtomicBool::new(false),
                active_workers: AtomicUsize::new(0),
            }),
        }
    }

    /// Spawns the worker pool.
    ///
    /// Returns `false` without doing anything when processing is
    /// administratively disabled or the queue is already started. Otherwise
    /// spawns `nb_threads` workers and waits up to 15 seconds for all of
    /// them to report ready; stragglers are logged as a warning, not a
    /// failure.
    pub async fn start_queue(&self) -> bool {
        if self.config.is_processing_off {
            return false;
        }
        if self
            .is_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let nb_threads = self.config.nb_threads;
        self.shared.processing_enabled.store(true, Ordering::SeqCst);

        info!(
            queue_name = %self.config.queue_name,
            nb_threads,
            "starting queue workers"
        );

        // Readiness is counted per start so stragglers from an earlier
        // generation cannot satisfy this one.
        let ready_workers = Arc::new(AtomicUsize::new(0));
        for worker_id in 0..nb_threads {
            let shared = Arc::clone(&self.shared);
            let ready = Arc::clone(&ready_workers);
            let processor = Arc::clone(&self.processor);
            let queue_name = self.config.queue_name.clone();
            let sleep_time = self.config.sleep_time;
            tokio::spawn(worker_loop(
                shared, ready, processor, queue_name, worker_id, sleep_time,
            ));
        }

        let deadline = Instant::now() + WAIT_TIMEOUT;
        while ready_workers.load(Ordering::SeqCst) < nb_threads {
            if Instant::now() >= deadline {
                warn!(
                    queue_name = %self.config.queue_name,
                    ready = ready_workers.load(Ordering::SeqCst),
                    nb_threads,
                    "timed out waiting for all workers to report ready"
                );
                return true;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }

        info!(
            queue_name = %self.config.queue_name,
            nb_threads,
            "all workers reported ready"
        );
        true
    }

    /// Asks the workers to exit and waits for them, bounded by a 15 second
    /// timeout polled in 100 ms increments.
    ///
    /// A no-op when processing is administratively disabled or the queue is
    /// not started. Workers still active after the timeout are logged as an
    /// error; they are expected to exit on their own at their next loop
    /// check.
    pub async fn stop_queue(&self) {
        if self.config.is_processing_off {
            return;
        }
        if self
            .is_started
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.shared
            .processing_enabled
            .store(false, Ordering::SeqCst);

        let deadline = Instant::now() + WAIT_TIMEOUT;
        while self.shared.active_workers.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }

        let remaining = self.shared.active_workers.load(Ordering::SeqCst);
        if remaining > 0 {
            error!(
                queue_name = %self.config.queue_name,
                remaining,
                "stop sequence completed with workers still active"
            );
        } else {
            info!(
                queue_name = %self.config.queue_name,
                "stop sequence completed"
            );
        }
    }

    /// Whether the queue is currently started.
    pub fn is_started(&self) -> bool {
        self.is_started.load(Ordering::SeqCst)
    }

    /// Makes every worker skip its unit of work until resumed. Workers keep
    /// polling their flags and stay responsive to stop.
    pub fn suspend_processing(&self) {
        self.shared.suspended.store(true, Ordering::SeqCst);
    }

    /// Resumes normal processing after a suspension.
    pub fn resume_processing(&self) {
        self.shared.suspended.store(false, Ordering::SeqCst);
    }

    /// Whether processing is currently suspended.
    pub fn is_processing_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for QueueLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueLifecycle")
            .field("queue_name", &self.config.queue_name)
            .field("is_started", &self.is_started())
            .finish_non_exhaustive()
    }
}

async fn worker_loop(
    shared: Arc<WorkerShared>,
    ready: Arc<AtomicUsize>,
    processor: Arc<dyn EventProcessor>,
    queue_name: String,
    worker_id: usize,
    sleep_time: Duration,
) {
    info!(queue_name = %queue_name, worker_id, "worker starting");
    shared.active_workers.fetch_add(1, Ordering::SeqCst);
    ready.fetch_add(1, Ordering::SeqCst);

    let _guard = ActiveWorkerGuard {
        shared: Arc::clone(&shared),
        queue_name: queue_name.clone(),
        worker_id,
    };

    loop {
        if !shared.processing_enabled.load(Ordering::SeqCst) {
            break;
        }

        let iteration_started = Instant::now();

        if !shared.suspended.load(Ordering::SeqCst) {
            match processor.process_events().await {
                Ok(0) => {}
                Ok(processed) => {
                    debug!(queue_name = %queue_name, worker_id, processed, "processed events");
                }
                Err(e) => {
                    warn!(
                        queue_name = %queue_name,
                        worker_id,
                        error = %e,
                        "event processing failed, continuing on next tick"
                    );
                }
            }
        }

        // Adapt the sleep to the loop duration so the effective cadence
        // tracks sleep_time instead of compounding the processing delay.
        if let Some(remaining) = sleep_time.checked_sub(iteration_started.elapsed()) {
            tokio::time::sleep(remaining).await;
        }
    }
}

//! Concurrent pipeline
//!
//! Items are queued in priority order and picked up by a fixed pool of
//! worker threads. Each worker records its outcome in a shared accumulator
//! and signals the driver, which returns once every item has reported or
//! the deadline has passed. Items still outstanding at the deadline are
//! reported as timed out and their late results are dropped.
//!
//! Workers are detached: a hung step keeps its thread, not the driver.
//! Where threads cannot be spawned (wasm), the queue is drained on the
//! calling thread.

use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;

use super::priority::order_by_priority;
use super::registry::StepRegistry;
use super::result::{PipelineResult, PipelineResultBuilder};
use super::step::StepContext;
use super::work_item::WorkItem;
use super::{log_result, Pipeline, PipelineState};
use crate::error::PipelineError;

type WorkQueue = Arc<Mutex<VecDeque<(usize, WorkItem)>>>;

/// Results shared between the driver and the workers
#[derive(Default)]
struct Accumulator {
    builder: PipelineResultBuilder,
    /// Items submitted and not reported yet, by submission index
    outstanding: BTreeMap<usize, WorkItem>,
    /// Set by the driver when it stops waiting
    closed: bool,
}

/// Executes items on a bounded pool of worker threads
pub struct ConcurrentPipeline {
    registry: Arc<StepRegistry>,
    workers: usize,
    timeout: Option<Duration>,
    items: Vec<WorkItem>,
    state: PipelineState,
}

impl ConcurrentPipeline {
    /// `workers` is clamped to at least one. Without a timeout the driver
    /// waits for every item.
    pub fn new(registry: Arc<StepRegistry>, workers: usize, timeout: Option<Duration>) -> Self {
        Self {
            registry,
            workers: workers.max(1),
            timeout,
            items: Vec::new(),
            state: PipelineState::Collecting,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Worker loop: take items until the queue is empty
fn drain(
    queue: &WorkQueue,
    accumulator: &Mutex<Accumulator>,
    registry: &StepRegistry,
    ctx: &StepContext,
    done: &Sender<()>,
) {
    loop {
        let next = queue.lock().pop_front();
        let Some((idx, item)) = next else {
            break;
        };

        let outcome = registry.execute(&item, ctx);
        {
            let mut acc = accumulator.lock();
            if !acc.closed && acc.outstanding.remove(&idx).is_some() {
                acc.builder.record(item, outcome);
            } else {
                debug!("Discarding late result of work item '{}'", item.id());
            }
        }
        // the driver may have stopped listening
        let _ = done.send(());
    }
}

impl Pipeline for ConcurrentPipeline {
    fn include(&mut self, item: WorkItem) -> Result<(), PipelineError> {
        if self.state != PipelineState::Collecting {
            return Err(PipelineError::AlreadyExecuted);
        }
        self.items.push(item);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.items.len()
    }

    fn state(&self) -> PipelineState {
        self.state
    }

    fn execute(&mut self, ctx: &StepContext) -> PipelineResult {
        if self.state != PipelineState::Collecting {
            warn!("Concurrent pipeline has already been executed");
            return PipelineResult::empty();
        }
        self.state = PipelineState::Executing;

        let items = order_by_priority(std::mem::take(&mut self.items), ctx, &self.registry);
        if items.is_empty() {
            self.state = PipelineState::Done;
            return PipelineResult::empty();
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let accumulator = Arc::new(Mutex::new(Accumulator {
            outstanding: items.iter().cloned().enumerate().collect(),
            ..Accumulator::default()
        }));
        let queue: WorkQueue = Arc::new(Mutex::new(items.into_iter().enumerate().collect()));
        let (done_tx, done_rx) = mpsc::channel();

        let pool_size = self.workers.min(queue.lock().len());
        let mut spawned = 0;
        for n in 0..pool_size {
            let queue = queue.clone();
            let accumulator = accumulator.clone();
            let registry = self.registry.clone();
            let ctx = ctx.clone();
            let done = done_tx.clone();
            let spawn = thread::Builder::new()
                .name(format!("bigpipe-worker-{}", n))
                .spawn(move || drain(&queue, &accumulator, &registry, &ctx, &done));
            match spawn {
                Ok(_) => spawned += 1,
                Err(e) => {
                    debug!("Cannot spawn pipeline worker: {}", e);
                    break;
                }
            }
        }
        if spawned == 0 {
            drain(&queue, &accumulator, &self.registry, ctx, &done_tx);
        }
        drop(done_tx);

        let mut timed_out = false;
        while !accumulator.lock().outstanding.is_empty() {
            let received = match deadline {
                None => done_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        Err(RecvTimeoutError::Timeout)
                    } else {
                        done_rx.recv_timeout(deadline - now)
                    }
                }
            };
            match received {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    timed_out = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // stop the workers from starting anything else
        queue.lock().clear();

        let builder = {
            let mut acc = accumulator.lock();
            acc.closed = true;
            let outstanding = std::mem::take(&mut acc.outstanding);
            for (_, item) in outstanding {
                let error = match (timed_out, self.timeout) {
                    (true, Some(timeout)) => PipelineError::TimedOut {
                        timeout,
                        item: item.clone(),
                    },
                    _ => PipelineError::Panicked {
                        message: "pipeline worker stopped before reporting".to_string(),
                        item: item.clone(),
                    },
                };
                acc.builder.record(item, Err(error));
            }
            std::mem::take(&mut acc.builder)
        };

        self.state = PipelineState::Done;
        let result = builder.build();
        log_result("Concurrent", &result);
        result
    }
}

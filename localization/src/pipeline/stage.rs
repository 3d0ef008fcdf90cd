//! Receive → compute → send cycle shared by all pipeline stages.
//!
//! The compute phase runs on a fixed pool of workers. Every batch is split
//! into contiguous index ranges, one per worker, decided once per cycle, so
//! each work item is touched by exactly one worker and no per-item locking
//! is needed.

use log::{info, trace};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use super::messenger::MessengerError;

#[derive(Debug, Fail)]
pub enum StageError {
    #[fail(display = "{}", _0)]
    Messenger(#[cause] MessengerError),
    #[fail(display = "could not build worker pool: {}", _0)]
    WorkerPool(String),
}

impl From<MessengerError> for StageError {
    fn from(e: MessengerError) -> Self {
        StageError::Messenger(e)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StagePhase {
    Idle,
    Receiving,
    Computing,
    Sending,
}

/// One cycle's worth of input: read-only context shared by all workers and
/// the work items they partition among themselves.
pub struct Batch<C, W> {
    pub context: C,
    pub work: Vec<W>,
}

pub enum Receipt<C, W> {
    Batch(Batch<C, W>),
    /// Nothing arrived within the bounded wait.
    Idle,
    /// Upstream is gone; the stage should halt.
    Closed,
}

pub trait PipelineStage: Sync {
    type Context: Sync;
    type Work: Send;

    fn receive(&mut self) -> Result<Receipt<Self::Context, Self::Work>, StageError>;

    /// Processes one contiguous range of the batch. Called concurrently for
    /// disjoint ranges.
    fn action(&self, context: &Self::Context, work: &mut [Self::Work]);

    fn send(&mut self, batch: Batch<Self::Context, Self::Work>) -> Result<(), StageError>;
}

/// Splits `len` items into at most `parts` contiguous, non-empty ranges whose
/// sizes differ by at most one.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1).min(len);
    let mut ranges = Vec::with_capacity(parts);
    if parts == 0 {
        return ranges;
    }
    let base = len / parts;
    let extra = len % parts;
    let mut start = 0;
    for i in 0..parts {
        let size = base + if i < extra { 1 } else { 0 };
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    Idle,
    Closed,
}

pub struct StageRunner {
    pool: rayon::ThreadPool,
    pool_size: usize,
    phase: StagePhase,
    cycles: u64,
}

impl StageRunner {
    pub fn new(name: &str, pool_size: usize) -> Result<Self, StageError> {
        let thread_name = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_size)
            .thread_name(move |i| format!("{}-{}", thread_name, i))
            .build()
            .map_err(|e| StageError::WorkerPool(e.to_string()))?;
        Ok(StageRunner {
            pool: pool,
            pool_size: pool_size,
            phase: StagePhase::Idle,
            cycles: 0,
        })
    }

    pub fn phase(&self) -> StagePhase {
        self.phase
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn enter(&mut self, phase: StagePhase) {
        trace!("stage phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Runs a single receive → compute → send cycle.
    pub fn cycle<S: PipelineStage>(&mut self, stage: &mut S) -> Result<CycleOutcome, StageError> {
        self.enter(StagePhase::Receiving);
        let mut batch = match stage.receive() {
            Ok(Receipt::Batch(batch)) => batch,
            Ok(Receipt::Idle) => {
                self.enter(StagePhase::Idle);
                return Ok(CycleOutcome::Idle);
            }
            Ok(Receipt::Closed) => {
                self.enter(StagePhase::Idle);
                return Ok(CycleOutcome::Closed);
            }
            Err(e) => {
                self.enter(StagePhase::Idle);
                return Err(e);
            }
        };

        self.enter(StagePhase::Computing);
        {
            let shared: &S = stage;
            let context = &batch.context;
            let ranges = partition(batch.work.len(), self.pool_size);
            let mut rest: &mut [S::Work] = &mut batch.work;
            let mut slices = Vec::with_capacity(ranges.len());
            for range in &ranges {
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
                slices.push(head);
                rest = tail;
            }
            self.pool.scope(|scope| {
                for slice in slices {
                    scope.spawn(move |_| shared.action(context, slice));
                }
            });
        }

        self.enter(StagePhase::Sending);
        let sent = stage.send(batch);
        self.enter(StagePhase::Idle);
        sent?;
        self.cycles += 1;
        Ok(CycleOutcome::Completed)
    }

    /// Cycles until `running` is cleared or upstream closes. The flag is
    /// checked before every receive, so a raised stop lets the current cycle
    /// finish and commit before the stage halts.
    pub fn run<S: PipelineStage>(&mut self, stage: &mut S, running: &AtomicBool) -> Result<u64, StageError> {
        info!("stage starting with {} workers", self.pool_size);
        while running.load(Ordering::SeqCst) {
            match self.cycle(stage)? {
                CycleOutcome::Completed | CycleOutcome::Idle => {}
                CycleOutcome::Closed => {
                    info!("upstream closed");
                    break;
                }
            }
        }
        info!("stage halted after {} cycles", self.cycles);
        Ok(self.cycles)
    }
}

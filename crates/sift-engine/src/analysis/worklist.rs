//! Work-stealing fixpoint driver
//!
//! Each worker owns a LIFO deque and steals from the others (and from the
//! seed injector) when it runs dry. A shared counter of outstanding items
//! detects termination: it is incremented before a follow-up item is
//! pushed and decremented only after its producer finished, so it reaches
//! zero exactly when no item is queued or in flight.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use tracing::{debug, trace};

use super::scanner::{Scanner, WorkItem};
use crate::error::{AnalysisError, AnalysisResult};

/// Shared termination and abort state
struct Progress {
    pending: AtomicUsize,
    processed: AtomicUsize,
    abort: AtomicBool,
    limit: usize,
}

impl Progress {
    /// Count one processed item; false once the limit is exceeded
    fn tick(&self) -> bool {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if processed > self.limit {
            self.abort.store(true, Ordering::Release);
            return false;
        }
        true
    }
}

/// Drain the worklist to a fixpoint. Returns the number of processed items.
pub fn run_to_fixpoint(
    scanner: &Scanner<'_>,
    seeds: Vec<WorkItem>,
    workers: usize,
    limit: usize,
) -> AnalysisResult<usize> {
    let progress = Progress {
        pending: AtomicUsize::new(seeds.len()),
        processed: AtomicUsize::new(0),
        abort: AtomicBool::new(false),
        limit,
    };

    if workers <= 1 {
        run_single(scanner, seeds, &progress)?;
    } else {
        run_parallel(scanner, seeds, workers, &progress)?;
    }

    let processed = progress.processed.load(Ordering::Acquire);
    if progress.abort.load(Ordering::Acquire) {
        return Err(AnalysisError::FixpointDiverged { processed });
    }
    Ok(processed)
}

fn run_single(scanner: &Scanner<'_>, seeds: Vec<WorkItem>, progress: &Progress) -> AnalysisResult<()> {
    let mut stack = seeds;
    stack.reverse();
    let mut out = Vec::new();
    while let Some(item) = stack.pop() {
        if !progress.tick() {
            return Ok(());
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| scanner.process(item, &mut out)));
        if result.is_err() {
            return Err(AnalysisError::WorkerPanicked { worker: 0 });
        }
        // Keep discovery order: the first follow-up is processed next
        stack.extend(out.drain(..).rev());
    }
    Ok(())
}

fn run_parallel(
    scanner: &Scanner<'_>,
    seeds: Vec<WorkItem>,
    workers: usize,
    progress: &Progress,
) -> AnalysisResult<()> {
    let injector = Injector::new();
    for seed in seeds {
        injector.push(seed);
    }

    let deques: Vec<Worker<WorkItem>> = (0..workers).map(|_| Worker::new_lifo()).collect();
    let stealers: Vec<Stealer<WorkItem>> = deques.iter().map(Worker::stealer).collect();
    debug!(workers, "starting parallel scan");

    let results: Vec<AnalysisResult<()>> = thread::scope(|scope| {
        let handles: Vec<_> = deques
            .into_iter()
            .enumerate()
            .map(|(id, deque)| {
                let injector = &injector;
                let stealers = &stealers;
                scope.spawn(move || worker_loop(id, scanner, deque, stealers, injector, progress))
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(id, handle)| {
                handle
                    .join()
                    .unwrap_or(Err(AnalysisError::WorkerPanicked { worker: id }))
            })
            .collect()
    });

    results.into_iter().collect()
}

fn worker_loop(
    id: usize,
    scanner: &Scanner<'_>,
    deque: Worker<WorkItem>,
    stealers: &[Stealer<WorkItem>],
    injector: &Injector<WorkItem>,
    progress: &Progress,
) -> AnalysisResult<()> {
    let mut out = Vec::new();
    loop {
        if progress.abort.load(Ordering::Acquire) {
            return Ok(());
        }

        let Some(item) = find_work(&deque, stealers, injector) else {
            if progress.pending.load(Ordering::Acquire) == 0 {
                trace!(worker = id, "no work left");
                return Ok(());
            }
            thread::yield_now();
            continue;
        };

        if !progress.tick() {
            return Ok(());
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| scanner.process(item, &mut out)));
        if result.is_err() {
            progress.abort.store(true, Ordering::Release);
            return Err(AnalysisError::WorkerPanicked { worker: id });
        }
        progress.pending.fetch_add(out.len(), Ordering::AcqRel);
        for next in out.drain(..) {
            deque.push(next);
        }
        progress.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Find work: local pop, then steal, then the injector
fn find_work(
    deque: &Worker<WorkItem>,
    stealers: &[Stealer<WorkItem>],
    injector: &Injector<WorkItem>,
) -> Option<WorkItem> {
    if let Some(item) = deque.pop() {
        return Some(item);
    }

    loop {
        if let Some(item) = steal_from_others(stealers) {
            return Some(item);
        }

        match injector.steal() {
            Steal::Success(item) => return Some(item),
            Steal::Empty => break,
            Steal::Retry => continue,
        }
    }

    None
}

/// Steal from a random victim first, then the rest in order
fn steal_from_others(stealers: &[Stealer<WorkItem>]) -> Option<WorkItem> {
    use rand::Rng;

    if stealers.is_empty() {
        return None;
    }

    let mut rng = rand::thread_rng();
    let start = rng.gen_range(0..stealers.len());

    for i in 0..stealers.len() {
        let stealer = &stealers[(start + i) % stealers.len()];
        loop {
            match stealer.steal() {
                Steal::Success(item) => return Some(item),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
    }

    None
}

//! Reachability analysis
//!
//! Seeds the scanner with the program roots, drains the worklist to a
//! fixpoint and freezes the records. The frozen records feed the
//! [`policy`](crate::policy) stage.

pub mod classify;
pub mod records;
pub mod scanner;
pub mod worklist;

use std::sync::atomic::Ordering;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::RetentionConfig;
use crate::error::AnalysisResult;
use crate::policy::RetentionPlan;
use crate::program::Program;
use crate::types::TypeTable;
use records::{Accretion, FrozenRecords};
use scanner::Scanner;

pub use records::Reachability;

/// Counters from one analysis run
///
/// `escalations` depends on how concurrent raises interleave and is
/// informational only; the other counters are the same for every worker
/// count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Work items processed
    pub work_items: usize,
    /// Method bodies scanned
    pub bodies_scanned: usize,
    /// Raises that made a member reflection-visible or added demand
    pub escalations: usize,
    /// Virtual slots resolved against constructed types
    pub dispatches: usize,
    /// Reflection lookups with run-time computed targets
    pub unresolved: usize,
    /// Worker threads used
    pub workers: usize,
}

/// One analysis run over a closed-world program
pub struct RetentionAnalysis<'a> {
    program: &'a Program,
    types: &'a TypeTable,
    config: &'a RetentionConfig,
}

impl<'a> RetentionAnalysis<'a> {
    /// Prepare an analysis
    pub fn new(program: &'a Program, types: &'a TypeTable, config: &'a RetentionConfig) -> Self {
        Self {
            program,
            types,
            config,
        }
    }

    /// Run the scan to a fixpoint and freeze the records
    pub fn run(&self) -> AnalysisResult<(FrozenRecords, ScanStats)> {
        let records = Accretion::new();
        let workers = self.config.effective_workers();
        let stats = {
            let scanner = Scanner::new(self.program, self.types, self.config, &records);
            let seeds = scanner.seed()?;
            debug!(seeds = seeds.len(), workers, "seeded worklist");
            let work_items =
                worklist::run_to_fixpoint(&scanner, seeds, workers, self.config.max_work_items)?;
            let counters = &scanner.counters;
            ScanStats {
                work_items,
                bodies_scanned: counters.bodies.load(Ordering::Relaxed),
                escalations: counters.escalations.load(Ordering::Relaxed),
                dispatches: counters.dispatches.load(Ordering::Relaxed),
                unresolved: counters.unresolved.load(Ordering::Relaxed),
                workers,
            }
        };
        Ok((records.freeze(), stats))
    }
}

/// Analyze a program and decide what metadata it keeps
#[instrument(skip_all, fields(types = program.types().count(), mode = ?config.mode))]
pub fn analyze(
    program: &Program,
    types: &TypeTable,
    config: &RetentionConfig,
) -> AnalysisResult<RetentionPlan> {
    let (records, stats) = RetentionAnalysis::new(program, types, config).run()?;
    info!(
        work_items = stats.work_items,
        bodies = stats.bodies_scanned,
        members = records.members.len(),
        types = records.types.len(),
        "reachability fixpoint reached"
    );
    Ok(RetentionPlan::emit(program, types, records, stats))
}

//! Subcommand implementations and the inputs they share.

pub mod analyze;
pub mod digest;
pub mod query;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, ValueEnum};
use sift_engine::{Program, ReflectionMode, RetentionConfig, RetentionPlan, TypeTable};
use tracing::debug;

/// Configuration file looked up next to the manifest
pub const CONFIG_FILE: &str = "sift.toml";

/// Reflection mode as spelled on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Only explicit lookups and annotations are reflectable
    StaticAnalysis,
    /// Everything reached by code is reflectable
    FromUsage,
}

impl From<ModeArg> for ReflectionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::StaticAnalysis => ReflectionMode::StaticAnalysis,
            ModeArg::FromUsage => ReflectionMode::FromUsage,
        }
    }
}

/// Output format of `analyze`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary
    Pretty,
    /// Full JSON report
    Json,
}

/// Manifest and configuration arguments shared by every subcommand
#[derive(Debug, Args)]
pub struct AnalysisArgs {
    /// Program manifest (.toml or .json)
    pub manifest: PathBuf,
    /// Configuration file (defaults to sift.toml next to the manifest)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Reflection mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
    /// Scanning workers (0 = one per CPU)
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,
    /// Generic nesting depth before instantiations are scanned shared
    #[arg(long)]
    pub max_generic_depth: Option<usize>,
    /// Processed work items before the analysis is declared divergent
    #[arg(long)]
    pub max_work_items: Option<usize>,
}

impl AnalysisArgs {
    /// File configuration with command-line overrides applied
    pub fn config(&self) -> anyhow::Result<RetentionConfig> {
        let mut config = match self.config_path() {
            Some(path) => {
                debug!(path = %path.display(), "loading configuration");
                RetentionConfig::load(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))?
            }
            None => RetentionConfig::default(),
        };

        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(depth) = self.max_generic_depth {
            config.max_generic_depth = depth;
        }
        if let Some(limit) = self.max_work_items {
            config.max_work_items = limit;
        }
        config.validate()?;
        Ok(config)
    }

    fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config {
            return Some(path.clone());
        }
        let dir = self.manifest.parent().unwrap_or(Path::new("."));
        let candidate = dir.join(CONFIG_FILE);
        candidate.is_file().then_some(candidate)
    }
}

/// A loaded program and the plan computed for it
pub struct Session {
    pub table: TypeTable,
    pub program: Program,
    pub config: RetentionConfig,
    pub plan: RetentionPlan,
}

impl Session {
    /// Load the manifest and run the analysis
    pub fn open(args: &AnalysisArgs) -> anyhow::Result<Self> {
        let config = args.config()?;
        let table = TypeTable::new();
        let program = Program::load(&args.manifest, &table)
            .with_context(|| format!("Failed to load manifest {}", args.manifest.display()))?;
        debug!(
            types = program.types().count(),
            methods = program.method_count(),
            fields = program.field_count(),
            "manifest loaded"
        );

        let plan = sift_engine::analyze(&program, &table, &config)?;
        Ok(Self {
            table,
            program,
            config,
            plan,
        })
    }
}

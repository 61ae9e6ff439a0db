//! Sift Metadata Retention Engine
//!
//! Decides, for a closed-world program compiled ahead of time, which types
//! and members keep run-time metadata and reflection invoke thunks.
//!
//! The pipeline runs in three stages:
//! - [`analysis`] walks the static call graph to a fixpoint and escalates
//!   members that are looked up through reflection.
//! - [`policy`] turns the frozen reachability records into a
//!   [`RetentionPlan`](policy::RetentionPlan): a [`MetadataTier`] per type
//!   and an invoke-thunk decision per member.
//! - [`runtime`] exposes the emitted lookup table the way a running program
//!   would consume it, with [`sharing`] resolving shared generic code bodies.
//!
//! # Example
//!
//! ```ignore
//! use sift_engine::{analyze, Program, RetentionConfig, TypeTable};
//!
//! let types = TypeTable::new();
//! let program = Program::from_toml_str(source, &types)?;
//! let plan = analyze(&program, &types, &RetentionConfig::default())?;
//! println!("{}", plan.digest(&program, &types));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod analysis;
pub mod config;
pub mod error;
pub mod policy;
pub mod program;
pub mod runtime;
pub mod sharing;
pub mod types;

pub use analysis::{analyze, Reachability, RetentionAnalysis};
pub use config::{ReflectionMode, RetentionConfig};
pub use error::{AnalysisError, ConfigError, ManifestError, ReflectionError};
pub use policy::{MetadataTier, RetentionPlan, TypeMetadata};
pub use program::Program;
pub use runtime::{MetadataTable, Reflector};
pub use sharing::{CodeBody, SharingResolver};
pub use types::{DefId, FieldDefId, MethodDefId, PrimitiveKind, TypeId, TypeKey, TypeTable};

//! Emitted metadata as the running program sees it
//!
//! [`MetadataTable`] is the lookup table written into the binary: one entry
//! per retained member definition, keyed by declaring type, member name and
//! signature, pointing at an invoke thunk or marked metadata-only.
//! [`Reflector`] answers reflection calls against a plan the way the
//! runtime would.

mod reflector;

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::policy::{MemberDef, RetentionPlan};
use crate::program::Program;
use crate::types::TypeTable;

pub use reflector::{FieldInfo, Invocation, MethodInfo, Origin, Reflector, RuntimeType};

/// Index of a generated reflection invoke thunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ThunkId(u32);

impl ThunkId {
    /// Raw index
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thunk#{}", self.0)
    }
}

/// Result of a member lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "entry", content = "thunk", rename_all = "snake_case")]
pub enum LookupEntry {
    /// Invokable through the given thunk
    Thunk(ThunkId),
    /// Inspectable, not invokable
    MetadataOnly,
    /// Not retained
    Missing,
}

/// `(declaring type, member name, signature)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MemberName {
    /// Open declaring type (`G<>`)
    pub owner: String,
    /// Member name
    pub name: String,
    /// Comma-separated parameter types; empty for fields
    pub signature: String,
}

/// Run-time lookup table of retained members
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    entries: BTreeMap<MemberName, LookupEntry>,
    by_def: FxHashMap<MemberDef, LookupEntry>,
}

impl MetadataTable {
    /// Build the table for a plan. Thunk ids follow the sorted member
    /// names, so the same plan always yields the same table.
    pub fn build(program: &Program, table: &TypeTable, plan: &RetentionPlan) -> Self {
        let mut named: Vec<(MemberName, MemberDef, bool)> = plan
            .members()
            .map(|(def, metadata)| (Self::name_of(program, table, def), def, metadata.invoke_thunk))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = BTreeMap::new();
        let mut by_def = FxHashMap::default();
        let mut next = 0u32;
        for (name, def, invokable) in named {
            let entry = if invokable {
                next += 1;
                LookupEntry::Thunk(ThunkId(next - 1))
            } else {
                LookupEntry::MetadataOnly
            };
            entries.insert(name, entry);
            by_def.insert(def, entry);
        }
        Self { entries, by_def }
    }

    fn name_of(program: &Program, table: &TypeTable, def: MemberDef) -> MemberName {
        match def {
            MemberDef::Method(method) => {
                let method_def = program.method(method);
                MemberName {
                    owner: program.display_type(table, program.open_type(table, method_def.owner)),
                    name: method_def.name.clone(),
                    signature: program.signature(table, method),
                }
            }
            MemberDef::Field(field) => {
                let field_def = program.field(field);
                MemberName {
                    owner: program.display_type(table, program.open_type(table, field_def.owner)),
                    name: field_def.name.clone(),
                    signature: String::new(),
                }
            }
        }
    }

    /// Look a member up by name
    pub fn lookup(&self, owner: &str, name: &str, signature: &str) -> LookupEntry {
        let key = MemberName {
            owner: owner.to_string(),
            name: name.to_string(),
            signature: signature.to_string(),
        };
        self.entries.get(&key).copied().unwrap_or(LookupEntry::Missing)
    }

    /// Look a member up by definition
    pub fn entry(&self, def: MemberDef) -> LookupEntry {
        self.by_def.get(&def).copied().unwrap_or(LookupEntry::Missing)
    }

    /// Entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&MemberName, LookupEntry)> {
        self.entries.iter().map(|(name, entry)| (name, *entry))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no member is retained
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of generated invoke thunks
    pub fn thunk_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, LookupEntry::Thunk(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::config::RetentionConfig;

    const SOURCE: &str = r#"
        entry_points = ["App::Main"]

        [[types]]
        name = "App"
        [[types.methods]]
        name = "Main"
        kind = "static"
        body = [
            { op = "get_method", type = "Calc", name = "Add", intent = "invoke" },
            { op = "get_field", type = "Calc", name = "Total" },
        ]

        [[types]]
        name = "Calc"
        [[types.fields]]
        name = "Total"
        type = "int"
        [[types.methods]]
        name = "Add"
        params = ["int", "int"]
        returns = "int"
        [[types.methods]]
        name = "Reset"
    "#;

    #[test]
    fn test_lookup_entries() {
        let table = TypeTable::new();
        let program = Program::from_toml_str(SOURCE, &table).unwrap();
        let plan = analyze(&program, &table, &RetentionConfig::default()).unwrap();
        let metadata = MetadataTable::build(&program, &table, &plan);

        assert!(matches!(metadata.lookup("Calc", "Add", "int, int"), LookupEntry::Thunk(_)));
        assert_eq!(metadata.lookup("Calc", "Total", ""), LookupEntry::MetadataOnly);
        assert_eq!(metadata.lookup("Calc", "Reset", ""), LookupEntry::Missing);
        assert_eq!(metadata.lookup("Calc", "Add", "int"), LookupEntry::Missing);
        assert_eq!(metadata.thunk_count(), 1);
        assert_eq!(metadata.len(), 2);
    }
}

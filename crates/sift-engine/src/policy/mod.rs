//! Metadata emission policy
//!
//! A pure function of the frozen records: every type gets a
//! [`MetadataTier`] and every member definition that is reflection-visible
//! gets metadata, with an invoke thunk when some instantiation is invoked.
//! Nothing here depends on the order in which the scan discovered things.

pub mod digest;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::records::{Demand, FrozenRecords, MemberKey, MethodKey, Reachability, TypeRecord, Usage};
use crate::analysis::ScanStats;
use crate::program::Program;
use crate::types::{FieldDefId, MethodDefId, TypeId, TypeTable};

/// How much run-time metadata a type carries
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MetadataTier {
    /// Nothing
    #[default]
    None,
    /// Identity for casts and type checks
    NecessaryOnly,
    /// Allocatable: identity plus a virtual table
    ConstructedOnly,
    /// Everything reflection can ask for
    Full,
}

/// Emitted metadata of one type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMetadata {
    /// Tier
    pub tier: MetadataTier,
    /// Metadata token emitted: the type can be found by name and its
    /// members can be looked up
    pub browsable: bool,
    /// A run-time type handle can be obtained
    pub handle: bool,
    /// Implemented interfaces that reachable code mentions
    pub interfaces: Vec<TypeId>,
}

impl TypeMetadata {
    fn identity() -> Self {
        Self {
            tier: MetadataTier::NecessaryOnly,
            browsable: false,
            handle: false,
            interfaces: Vec::new(),
        }
    }
}

/// Member definition, independent of instantiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberDef {
    /// Method definition
    Method(MethodDefId),
    /// Field definition
    Field(FieldDefId),
}

impl From<&MemberKey> for MemberDef {
    fn from(key: &MemberKey) -> Self {
        match key {
            MemberKey::Method(key) => MemberDef::Method(key.method),
            MemberKey::Field(key) => MemberDef::Field(key.field),
        }
    }
}

impl MemberDef {
    /// Display name on the open declaring type (`G<>::M(!0)`)
    pub fn display(self, program: &Program, table: &TypeTable) -> String {
        match self {
            MemberDef::Method(method) => {
                let owner = program.open_type(table, program.method(method).owner);
                program.display_method(table, owner, method, &[])
            }
            MemberDef::Field(field) => {
                let owner = program.open_type(table, program.field(field).owner);
                program.display_field(table, owner, field)
            }
        }
    }
}

/// Emitted metadata of one member definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemberMetadata {
    /// Union of the demands of all instantiations
    pub demand: Demand,
    /// A reflection invoke thunk is generated
    pub invoke_thunk: bool,
}

/// The emitted metadata decisions of one analysis
#[derive(Debug, Clone)]
pub struct RetentionPlan {
    types: FxHashMap<TypeId, TypeMetadata>,
    static_bases: FxHashSet<TypeId>,
    members: FxHashMap<MemberDef, MemberMetadata>,
    records: FrozenRecords,
    stats: ScanStats,
}

impl RetentionPlan {
    /// Apply the policy to frozen records
    pub fn emit(program: &Program, table: &TypeTable, records: FrozenRecords, stats: ScanStats) -> Self {
        let mut members: FxHashMap<MemberDef, MemberMetadata> = FxHashMap::default();
        let mut invoked_owners = FxHashSet::default();
        for (key, record) in &records.members {
            if record.reach != Reachability::ReflectionVisible {
                continue;
            }
            let entry = members.entry(MemberDef::from(key)).or_default();
            entry.demand |= record.demand;
            if record.demand.contains(Demand::INVOKE) {
                entry.invoke_thunk = true;
                invoked_owners.insert(key.owner());
            }
        }

        let mut types: FxHashMap<TypeId, TypeMetadata> = FxHashMap::default();
        let mut static_bases = FxHashSet::default();
        for (ty, record) in &records.types {
            if *ty == table.canon() {
                continue;
            }
            if record.usage.contains(Usage::STATIC_BASE) {
                static_bases.insert(*ty);
            }
            let tier = own_tier(record, invoked_owners.contains(ty));
            if tier == MetadataTier::None {
                continue;
            }
            let browsable = record.reach == Reachability::ReflectionVisible || record.usage.contains(Usage::TOKEN);
            types.insert(
                *ty,
                TypeMetadata {
                    tier,
                    browsable,
                    handle: browsable || tier >= MetadataTier::ConstructedOnly,
                    interfaces: Vec::new(),
                },
            );
        }

        // Casting to a retained type walks its bases; dispatching on a
        // constructed one needs its interfaces
        let retained: Vec<(TypeId, bool)> = types
            .iter()
            .map(|(ty, metadata)| {
                let carries = metadata.tier >= MetadataTier::ConstructedOnly
                    || records.type_record(*ty).reach == Reachability::ReflectionVisible;
                (*ty, carries)
            })
            .collect();
        for (ty, carries_interfaces) in retained {
            for base in program.base_chain(table, ty).into_iter().skip(1) {
                if table.is_closed(base) {
                    types.entry(base).or_insert_with(TypeMetadata::identity);
                }
            }
            if carries_interfaces {
                for iface in referenced_interfaces(program, table, &records, ty) {
                    if table.is_closed(iface) {
                        types.entry(iface).or_insert_with(TypeMetadata::identity);
                    }
                }
            }
        }

        for (ty, metadata) in types.iter_mut() {
            metadata.interfaces = referenced_interfaces(program, table, &records, *ty);
        }

        debug!(
            types = types.len(),
            members = members.len(),
            static_bases = static_bases.len(),
            "metadata plan emitted"
        );
        Self {
            types,
            static_bases,
            members,
            records,
            stats,
        }
    }

    /// Tier of a type, [`MetadataTier::None`] when it keeps nothing
    pub fn tier(&self, ty: TypeId) -> MetadataTier {
        self.types.get(&ty).map(|m| m.tier).unwrap_or_default()
    }

    /// Metadata of a type
    pub fn metadata(&self, ty: TypeId) -> Option<&TypeMetadata> {
        self.types.get(&ty)
    }

    /// Every type with metadata, in no particular order
    pub fn types(&self) -> impl Iterator<Item = (TypeId, &TypeMetadata)> {
        self.types.iter().map(|(ty, m)| (*ty, m))
    }

    /// Metadata of a member definition, if it is reflection-visible
    pub fn member(&self, def: MemberDef) -> Option<&MemberMetadata> {
        self.members.get(&def)
    }

    /// Every retained member definition, in no particular order
    pub fn members(&self) -> impl Iterator<Item = (MemberDef, &MemberMetadata)> {
        self.members.iter().map(|(def, m)| (*def, m))
    }

    /// Whether code uses the type's statics
    pub fn is_static_base(&self, ty: TypeId) -> bool {
        self.static_bases.contains(&ty)
    }

    /// Reachability of a member instantiation
    pub fn reachability(&self, key: &MemberKey) -> Reachability {
        self.records.member(key).reach
    }

    /// Reachability of a type
    pub fn type_reachability(&self, ty: TypeId) -> Reachability {
        self.records.type_record(ty).reach
    }

    /// Canonical keys of generated code bodies
    pub fn bodies(&self) -> &FxHashSet<MethodKey> {
        &self.records.bodies
    }

    /// Whether a body was generated for the canonical form of `key`
    pub fn is_compiled(&self, key: &MethodKey) -> bool {
        self.records.bodies.contains(key)
    }

    /// Universal templates kept for run-time instantiation
    pub fn templates(&self) -> &FxHashSet<TypeId> {
        &self.records.templates
    }

    /// Reflection lookups the scan could not follow, sorted
    pub fn unresolved(&self) -> Vec<&str> {
        let mut unresolved: Vec<&str> = self.records.unresolved.iter().map(String::as_str).collect();
        unresolved.sort_unstable();
        unresolved
    }

    /// Frozen reachability records
    pub fn records(&self) -> &FrozenRecords {
        &self.records
    }

    /// Scan counters
    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Name-sorted summary of the plan
    pub fn report(&self, program: &Program, table: &TypeTable) -> PlanReport {
        let display = |ty: &TypeId| program.display_type(table, *ty);

        let mut types: Vec<TypeReport> = self
            .types
            .iter()
            .map(|(ty, metadata)| {
                let mut interfaces: Vec<String> = metadata.interfaces.iter().map(display).collect();
                interfaces.sort();
                TypeReport {
                    name: display(ty),
                    tier: metadata.tier,
                    browsable: metadata.browsable,
                    handle: metadata.handle,
                    interfaces,
                }
            })
            .collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));

        let mut members: Vec<MemberReport> = self
            .members
            .iter()
            .map(|(def, metadata)| MemberReport {
                name: def.display(program, table),
                kind: match def {
                    MemberDef::Method(_) => MemberKind::Method,
                    MemberDef::Field(_) => MemberKind::Field,
                },
                invoke_thunk: metadata.invoke_thunk,
            })
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));

        let sorted = |names: Vec<String>| {
            let mut names = names;
            names.sort();
            names
        };

        PlanReport {
            types,
            static_bases: sorted(self.static_bases.iter().map(display).collect()),
            members,
            bodies: sorted(
                self.records
                    .bodies
                    .iter()
                    .map(|key| program.display_method(table, key.owner, key.method, &key.inst))
                    .collect(),
            ),
            templates: sorted(self.records.templates.iter().map(display).collect()),
            unresolved: self.unresolved().into_iter().map(str::to_string).collect(),
        }
    }

    /// Hex SHA-256 of the plan's report. Identical inputs always produce
    /// identical digests, whatever the worker count.
    pub fn digest(&self, program: &Program, table: &TypeTable) -> String {
        digest::digest(&self.report(program, table))
    }
}

fn own_tier(record: &TypeRecord, invoked: bool) -> MetadataTier {
    let mut tier = MetadataTier::None;
    if record.reach == Reachability::ReflectionVisible
        || record.usage.intersects(Usage::NECESSARY | Usage::TOKEN)
    {
        tier = MetadataTier::NecessaryOnly;
    }
    if record.usage.contains(Usage::CONSTRUCTED) {
        tier = MetadataTier::ConstructedOnly;
    }
    if record.usage.contains(Usage::ACTIVATED) || (invoked && record.reach == Reachability::ReflectionVisible) {
        tier = MetadataTier::Full;
    }
    tier
}

/// Interfaces of `ty` whose definition some reachable code mentions
fn referenced_interfaces(
    program: &Program,
    table: &TypeTable,
    records: &FrozenRecords,
    ty: TypeId,
) -> Vec<TypeId> {
    program
        .interfaces_of(table, ty)
        .into_iter()
        .filter(|iface| {
            table
                .key(*iface)
                .definition()
                .is_some_and(|def| records.referenced.contains(&def))
        })
        .collect()
}

/// Kind of a reported member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    /// Method or constructor
    Method,
    /// Field
    Field,
}

/// Reported type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeReport {
    /// Display name
    pub name: String,
    /// Tier
    pub tier: MetadataTier,
    /// Findable by name
    pub browsable: bool,
    /// Run-time handle available
    pub handle: bool,
    /// Reported interfaces
    pub interfaces: Vec<String>,
}

/// Reported member definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberReport {
    /// Display name on the open declaring type
    pub name: String,
    /// Method or field
    pub kind: MemberKind,
    /// Invoke thunk generated
    pub invoke_thunk: bool,
}

/// Serializable, name-sorted summary of a [`RetentionPlan`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanReport {
    /// Types with metadata
    pub types: Vec<TypeReport>,
    /// Types whose statics are used
    pub static_bases: Vec<String>,
    /// Retained member definitions
    pub members: Vec<MemberReport>,
    /// Generated code bodies
    pub bodies: Vec<String>,
    /// Universal templates
    pub templates: Vec<String>,
    /// Unfollowed reflection lookups
    pub unresolved: Vec<String>,
}

impl PlanReport {
    /// Entry for a type by display name
    pub fn find_type(&self, name: &str) -> Option<&TypeReport> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Entry for a member by display name
    pub fn find_member(&self, name: &str) -> Option<&MemberReport> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::config::RetentionConfig;

    fn plan(source: &str) -> (Program, TypeTable, RetentionPlan) {
        let table = TypeTable::new();
        let program = Program::from_toml_str(source, &table).unwrap();
        let plan = analyze(&program, &table, &RetentionConfig::default()).unwrap();
        (program, table, plan)
    }

    #[test]
    fn test_tier_supremum() {
        let record = TypeRecord {
            reach: Reachability::CodeReachable,
            usage: Usage::NECESSARY | Usage::CONSTRUCTED,
        };
        assert_eq!(own_tier(&record, false), MetadataTier::ConstructedOnly);
        let activated = TypeRecord {
            reach: Reachability::ReflectionVisible,
            usage: Usage::ACTIVATED,
        };
        assert_eq!(own_tier(&activated, false), MetadataTier::Full);
        assert_eq!(own_tier(&TypeRecord::default(), false), MetadataTier::None);
    }

    #[test]
    fn test_constructed_type_pulls_in_base_identity() {
        let (program, table, plan) = plan(
            r#"
            entry_points = ["App::Main"]

            [[types]]
            name = "App"
            [[types.methods]]
            name = "Main"
            kind = "static"
            body = [{ op = "new", type = "Dog" }]

            [[types]]
            name = "Animal"

            [[types]]
            name = "Dog"
            base = "Animal"
            "#,
        );
        let dog = table.definition(program.lookup_type("Dog").unwrap());
        let animal = table.definition(program.lookup_type("Animal").unwrap());
        assert_eq!(plan.tier(dog), MetadataTier::ConstructedOnly);
        assert!(plan.metadata(dog).unwrap().handle);
        let base = plan.metadata(animal).unwrap();
        assert_eq!(base.tier, MetadataTier::NecessaryOnly);
        assert!(!base.handle);
    }

    #[test]
    fn test_static_base_only_type() {
        let (program, table, plan) = plan(
            r#"
            entry_points = ["App::Main"]

            [[types]]
            name = "App"
            [[types.methods]]
            name = "Main"
            kind = "static"
            body = [{ op = "load_field", field = "Settings::Level" }]

            [[types]]
            name = "Settings"
            [[types.fields]]
            name = "Level"
            type = "int"
            static = true
            [[types.methods]]
            name = ".cctor"
            kind = "static_constructor"
            "#,
        );
        let settings = program.lookup_type("Settings").unwrap();
        let settings_ty = table.definition(settings);
        assert_eq!(plan.tier(settings_ty), MetadataTier::None);
        assert!(plan.is_static_base(settings_ty));
        let cctor = program.static_constructor(settings).unwrap();
        assert!(plan.is_compiled(&MethodKey {
            owner: settings_ty,
            method: cctor,
            inst: Vec::new(),
        }));
    }

    #[test]
    fn test_report_is_sorted_and_named() {
        let (program, table, plan) = plan(
            r#"
            entry_points = ["App::Main"]

            [[types]]
            name = "App"
            [[types.methods]]
            name = "Main"
            kind = "static"
            body = [
                { op = "get_method", type = "Zeta", name = "Run", intent = "invoke" },
                { op = "get_method", type = "Alpha", name = "Run" },
            ]

            [[types]]
            name = "Zeta"
            [[types.methods]]
            name = "Run"

            [[types]]
            name = "Alpha"
            [[types.methods]]
            name = "Run"
            "#,
        );
        let report = plan.report(&program, &table);
        let names: Vec<&str> = report.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha::Run()", "Zeta::Run()"]);
        assert!(!report.find_member("Alpha::Run()").unwrap().invoke_thunk);
        assert!(report.find_member("Zeta::Run()").unwrap().invoke_thunk);
        assert_eq!(report.find_type("Zeta").unwrap().tier, MetadataTier::Full);
        assert_eq!(report.find_type("Alpha").unwrap().tier, MetadataTier::NecessaryOnly);
        assert_eq!(plan.digest(&program, &table), plan.digest(&program, &table));
    }
}

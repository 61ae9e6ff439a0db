//! Reachability records and the accretion API
//!
//! Every discovery the scanner and classifier make lands here. Records are
//! lattice values: reachability only moves `Unreached -> CodeReachable ->
//! ReflectionVisible`, and the demand/usage sets only grow. Concurrent
//! writers merge with a join under the map's shard lock, so no update can
//! lower a record regardless of interleaving.

use std::fmt;

use dashmap::{DashMap, DashSet};
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::types::{DefId, FieldDefId, MethodDefId, TypeId};

/// Reachability of a member or type
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Reachability {
    /// Not discovered
    #[default]
    Unreached = 0,
    /// Used by compiled code
    CodeReachable = 1,
    /// Must also succeed under run-time lookup
    ReflectionVisible = 2,
}

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr => $label:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
        pub struct $name(u8);

        impl $name {
            $($(#[$fmeta])* pub const $flag: $name = $name($bit);)*

            /// The empty set
            pub const fn empty() -> Self {
                $name(0)
            }

            /// Raw bits
            pub const fn bits(self) -> u8 {
                self.0
            }

            /// Whether no flag is set
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Whether every flag of `other` is set
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Whether any flag of `other` is set
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Set union
            pub const fn union(self, other: Self) -> Self {
                $name(self.0 | other.0)
            }

            /// Flags in `self` but not in `other`
            pub const fn difference(self, other: Self) -> Self {
                $name(self.0 & !other.0)
            }

            /// Names of the set flags
            pub fn labels(self) -> Vec<&'static str> {
                let mut labels = Vec::new();
                $(if self.contains(Self::$flag) {
                    labels.push($label);
                })*
                labels
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                *self = self.union(rhs);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.labels().join("|"))
            }
        }
    };
}

flag_set!(
    /// What reflection needs from a member
    Demand {
        /// Name, signature and attribute inspection
        INSPECT = 1 => "inspect",
        /// Invoke, get or set through the reflection invoke path
        INVOKE = 2 => "invoke",
    }
);

flag_set!(
    /// How code uses a type
    Usage {
        /// Identity for casts and comparisons
        NECESSARY = 1 => "necessary",
        /// Loaded as a type token
        TOKEN = 2 => "token",
        /// Allocated or boxed
        CONSTRUCTED = 4 => "constructed",
        /// Static fields or static methods used
        STATIC_BASE = 8 => "static_base",
        /// Created through reflection
        ACTIVATED = 16 => "activated",
    }
);

/// Record of one member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemberRecord {
    /// Reachability
    pub reach: Reachability,
    /// Reflection demand
    pub demand: Demand,
}

impl MemberRecord {
    /// Join `reach` and `demand` into the record. Returns whether it changed.
    pub fn join(&mut self, reach: Reachability, demand: Demand) -> bool {
        let before = *self;
        self.reach = self.reach.max(reach);
        self.demand |= demand;
        *self != before
    }
}

/// Record of one type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeRecord {
    /// Reachability
    pub reach: Reachability,
    /// Code usage
    pub usage: Usage,
}

impl TypeRecord {
    /// Join `reach` and `usage` into the record. Returns whether it changed.
    pub fn join(&mut self, reach: Reachability, usage: Usage) -> bool {
        let before = *self;
        self.reach = self.reach.max(reach);
        self.usage |= usage;
        *self != before
    }
}

/// A method instantiation: owner type, definition, method arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    /// Declaring type (instantiated)
    pub owner: TypeId,
    /// Method definition
    pub method: MethodDefId,
    /// Generic method arguments
    pub inst: Vec<TypeId>,
}

/// A field of an instantiated type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    /// Declaring type (instantiated)
    pub owner: TypeId,
    /// Field definition
    pub field: FieldDefId,
}

/// Method or field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberKey {
    /// Method instantiation
    Method(MethodKey),
    /// Field
    Field(FieldKey),
}

impl MemberKey {
    /// Declaring type
    pub fn owner(&self) -> TypeId {
        match self {
            MemberKey::Method(key) => key.owner,
            MemberKey::Field(key) => key.owner,
        }
    }
}

/// Before/after pair returned by every raise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Raised<R> {
    /// Record before the join
    pub before: R,
    /// Record after the join
    pub after: R,
}

impl<R: PartialEq> Raised<R> {
    /// Whether the join changed anything
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

impl Raised<MemberRecord> {
    /// First time the member was reached at all
    pub fn newly_reached(&self) -> bool {
        self.before.reach == Reachability::Unreached && self.after.reach != Reachability::Unreached
    }

    /// First time the member became reflection-visible
    pub fn newly_visible(&self) -> bool {
        self.before.reach != Reachability::ReflectionVisible
            && self.after.reach == Reachability::ReflectionVisible
    }
}

impl Raised<TypeRecord> {
    /// First time the type was discovered
    pub fn newly_reached(&self) -> bool {
        self.before.reach == Reachability::Unreached && self.after.reach != Reachability::Unreached
    }

    /// Usage flags this raise added
    pub fn added(&self) -> Usage {
        self.after.usage.difference(self.before.usage)
    }

    /// First time the type became reflection-visible
    pub fn newly_visible(&self) -> bool {
        self.before.reach != Reachability::ReflectionVisible
            && self.after.reach == Reachability::ReflectionVisible
    }
}

/// Shared, append-only record table written during the scan
#[derive(Debug, Default)]
pub struct Accretion {
    members: DashMap<MemberKey, MemberRecord, FxBuildHasher>,
    types: DashMap<TypeId, TypeRecord, FxBuildHasher>,
    /// Canonical method keys whose code body is generated
    bodies: DashSet<MethodKey, FxBuildHasher>,
    /// Definitions mentioned by reachable code or escalations
    referenced: DashSet<DefId, FxBuildHasher>,
    /// Universal templates available for run-time instantiation
    templates: DashSet<TypeId, FxBuildHasher>,
    /// Lookups whose target is computed at run time
    unresolved: DashSet<String, FxBuildHasher>,
}

impl Accretion {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Join into a member record
    pub fn raise_member(&self, key: MemberKey, reach: Reachability, demand: Demand) -> Raised<MemberRecord> {
        let mut record = self.members.entry(key).or_default();
        let before = *record;
        record.join(reach, demand);
        Raised {
            before,
            after: *record,
        }
    }

    /// Join into a type record
    pub fn raise_type(&self, ty: TypeId, reach: Reachability, usage: Usage) -> Raised<TypeRecord> {
        let mut record = self.types.entry(ty).or_default();
        let before = *record;
        record.join(reach, usage);
        Raised {
            before,
            after: *record,
        }
    }

    /// Mark a canonical body as generated. Returns `true` the first time.
    pub fn compile_body(&self, key: MethodKey) -> bool {
        self.bodies.insert(key)
    }

    /// Mark a definition as referenced. Returns `true` the first time.
    pub fn reference_definition(&self, def: DefId) -> bool {
        self.referenced.insert(def)
    }

    /// Record a universal template. Returns `true` the first time.
    pub fn add_template(&self, ty: TypeId) -> bool {
        self.templates.insert(ty)
    }

    /// Record a lookup the scan cannot follow
    pub fn note_unresolved(&self, description: &str) {
        if !self.unresolved.contains(description) {
            self.unresolved.insert(description.to_string());
        }
    }

    /// Current record of a member
    pub fn member(&self, key: &MemberKey) -> MemberRecord {
        self.members.get(key).map(|r| *r).unwrap_or_default()
    }

    /// Current record of a type
    pub fn type_record(&self, ty: TypeId) -> TypeRecord {
        self.types.get(&ty).map(|r| *r).unwrap_or_default()
    }

    /// Number of member records
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Number of type records
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// End the scan. The frozen records cannot be raised any further.
    pub fn freeze(self) -> FrozenRecords {
        FrozenRecords {
            members: self.members.into_iter().collect(),
            types: self.types.into_iter().collect(),
            bodies: self.bodies.into_iter().collect(),
            referenced: self.referenced.into_iter().collect(),
            templates: self.templates.into_iter().collect(),
            unresolved: self.unresolved.into_iter().collect(),
        }
    }
}

/// Immutable result of the scan
#[derive(Debug, Clone, Default)]
pub struct FrozenRecords {
    /// Member records
    pub members: FxHashMap<MemberKey, MemberRecord>,
    /// Type records
    pub types: FxHashMap<TypeId, TypeRecord>,
    /// Generated canonical bodies
    pub bodies: FxHashSet<MethodKey>,
    /// Referenced definitions
    pub referenced: FxHashSet<DefId>,
    /// Universal templates
    pub templates: FxHashSet<TypeId>,
    /// Unfollowed lookups
    pub unresolved: FxHashSet<String>,
}

impl FrozenRecords {
    /// Record of a member, `Unreached` if never discovered
    pub fn member(&self, key: &MemberKey) -> MemberRecord {
        self.members.get(key).copied().unwrap_or_default()
    }

    /// Record of a type, `Unreached` if never discovered
    pub fn type_record(&self, ty: TypeId) -> TypeRecord {
        self.types.get(&ty).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method_key(owner: u32) -> MemberKey {
        MemberKey::Method(MethodKey {
            owner: TypeId::new(owner),
            method: MethodDefId::new(0),
            inst: Vec::new(),
        })
    }

    #[test]
    fn test_reachability_order() {
        assert!(Reachability::Unreached < Reachability::CodeReachable);
        assert!(Reachability::CodeReachable < Reachability::ReflectionVisible);
    }

    #[test]
    fn test_raise_never_lowers() {
        let records = Accretion::new();
        let key = method_key(1);
        let raised = records.raise_member(key.clone(), Reachability::ReflectionVisible, Demand::INVOKE);
        assert!(raised.newly_reached());
        assert!(raised.newly_visible());

        let lowered = records.raise_member(key.clone(), Reachability::CodeReachable, Demand::INSPECT);
        assert_eq!(lowered.after.reach, Reachability::ReflectionVisible);
        assert!(lowered.after.demand.contains(Demand::INVOKE | Demand::INSPECT));
        assert!(!lowered.newly_reached());

        let again = records.raise_member(key, Reachability::CodeReachable, Demand::empty());
        assert!(!again.changed());
    }

    #[test]
    fn test_type_usage_accumulates() {
        let records = Accretion::new();
        let ty = TypeId::new(20);
        let first = records.raise_type(ty, Reachability::CodeReachable, Usage::NECESSARY);
        assert!(first.newly_reached());
        let second = records.raise_type(ty, Reachability::CodeReachable, Usage::CONSTRUCTED | Usage::NECESSARY);
        assert_eq!(second.added(), Usage::CONSTRUCTED);
        assert!(!second.newly_reached());
    }

    #[test]
    fn test_concurrent_joins_converge() {
        let records = Accretion::new();
        let key = method_key(3);
        std::thread::scope(|scope| {
            for i in 0..8 {
                let records = &records;
                let key = key.clone();
                scope.spawn(move || {
                    let (reach, demand) = if i % 2 == 0 {
                        (Reachability::ReflectionVisible, Demand::INSPECT)
                    } else {
                        (Reachability::CodeReachable, Demand::INVOKE)
                    };
                    records.raise_member(key, reach, demand);
                });
            }
        });
        let frozen = records.freeze();
        let record = frozen.member(&key);
        assert_eq!(record.reach, Reachability::ReflectionVisible);
        assert_eq!(record.demand, Demand::INSPECT | Demand::INVOKE);
    }

    #[test]
    fn test_flag_labels() {
        let usage = Usage::TOKEN | Usage::STATIC_BASE;
        assert_eq!(usage.labels(), vec!["token", "static_base"]);
        assert_eq!(format!("{:?}", usage), "Usage(token|static_base)");
    }
}

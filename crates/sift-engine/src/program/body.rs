//! Method body references
//!
//! A compiled method body is reduced to the list of things it references:
//! calls, allocations, type tokens, field accesses and reflection API uses.
//! This is the edge stream the scanner consumes.

use serde::{Deserialize, Serialize};

use crate::types::{DefId, FieldDefId, MethodDefId, TypeId};

/// A method as seen from a call site
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Declaring type, possibly mentioning the caller's generic parameters
    pub owner: TypeId,
    /// Method definition
    pub method: MethodDefId,
    /// Generic method arguments
    pub inst: Vec<TypeId>,
}

/// A field as seen from an access site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Declaring type
    pub owner: TypeId,
    /// Field definition
    pub field: FieldDefId,
}

/// One reference from a method body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Direct call
    Call(MethodRef),
    /// Virtual or interface call through a slot
    CallVirtual(MethodRef),
    /// Object or array allocation, with the constructor it runs
    New {
        /// Allocated type
        ty: TypeId,
        /// Constructor, absent for arrays
        ctor: Option<MethodDefId>,
    },
    /// Boxing a value type
    Box(TypeId),
    /// `typeof` / ldtoken
    TypeToken(TypeId),
    /// `is` / `as` / cast
    Cast(TypeId),
    /// Field read
    LoadField(FieldRef),
    /// Field write
    StoreField(FieldRef),
    /// Delegate creation over a statically known target
    LoadFunction(MethodRef),
    /// Reflection API use
    Reflection(ReflectionUse),
}

/// What a reflective lookup intends to do with its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupIntent {
    /// Names, signatures and attributes only
    #[default]
    Inspect,
    /// Invoke, get or set values, construct
    Invoke,
}

/// Reflection API use recognised at a call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectionUse {
    /// `GetMethod("name")` on a statically known type
    GetMethod {
        /// Type searched
        owner: TypeId,
        /// Literal member name
        name: String,
        /// What the caller does with the result
        intent: LookupIntent,
    },
    /// `GetField("name")` on a statically known type
    GetField {
        /// Type searched
        owner: TypeId,
        /// Literal member name
        name: String,
        /// What the caller does with the result
        intent: LookupIntent,
    },
    /// `GetConstructor(...)` on a statically known type
    GetConstructor {
        /// Type searched
        owner: TypeId,
        /// What the caller does with the result
        intent: LookupIntent,
    },
    /// `Type.GetType("literal")`
    GetType {
        /// Literal type name
        name: String,
        /// Resolved type, absent when the name matches nothing
        target: Option<TypeId>,
    },
    /// `MakeGenericType` over a generic definition
    MakeGenericType {
        /// Generic definition
        definition: DefId,
        /// Arguments when statically known; `None` when produced at run time
        args: Option<Vec<TypeId>>,
    },
    /// `MakeGenericMethod` over a generic method definition
    MakeGenericMethod {
        /// Generic method, with `inst` empty
        method: MethodRef,
        /// Arguments when statically known; `None` when produced at run time
        args: Option<Vec<TypeId>>,
    },
    /// Custom attribute query on a type
    GetAttributes {
        /// Queried type
        target: TypeId,
    },
    /// `Delegate.CreateDelegate` over a reflected method
    CreateDelegate {
        /// Target method
        target: MethodRef,
    },
    /// `MethodInfo.Invoke` on a method obtained reflectively
    Invoke {
        /// Invoked method
        target: MethodRef,
    },
    /// `Activator.CreateInstance`
    Activate {
        /// Activated type
        target: TypeId,
    },
    /// `RuntimeHelpers.RunClassConstructor`
    RunClassConstructor {
        /// Type whose class constructor runs
        target: TypeId,
    },
    /// Lookup whose name is computed at run time
    DynamicLookup {
        /// Free-form description for diagnostics
        description: String,
    },
}

/// Which members of a type an annotation keeps
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberSelector {
    /// Every method and field with this name
    Named(String),
    /// All methods other than constructors
    Methods,
    /// All fields
    Fields,
    /// Instance constructors
    Constructors,
    /// The class constructor
    StaticConstructor,
    /// Everything
    All,
}

/// Members kept on whatever type an annotation points at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberAccess {
    /// Selected members
    pub members: MemberSelector,
    /// Inspect-only or invokable
    pub intent: LookupIntent,
}

/// "Keep these members of this type reflection-visible"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyAnnotation {
    /// Type whose members are kept
    pub target: TypeId,
    /// Which members and how
    pub access: MemberAccess,
}

/// Trigger for a program-level dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyCondition {
    /// Unconditional root
    Always,
    /// Once any instantiation of the definition is reached
    TypeReachable(DefId),
    /// Once any instantiation of the method is reached
    MethodReachable(MethodDefId),
}

/// "If this becomes reachable, keep that reflection-visible"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitDependency {
    /// Trigger
    pub when: DependencyCondition,
    /// What is kept
    pub then: DependencyAnnotation,
}

impl Reference {
    /// Short label used in trace output
    pub fn label(&self) -> &'static str {
        match self {
            Reference::Call(_) => "call",
            Reference::CallVirtual(_) => "call_virtual",
            Reference::New { .. } => "new",
            Reference::Box(_) => "box",
            Reference::TypeToken(_) => "typeof",
            Reference::Cast(_) => "cast",
            Reference::LoadField(_) => "load_field",
            Reference::StoreField(_) => "store_field",
            Reference::LoadFunction(_) => "ldftn",
            Reference::Reflection(use_) => use_.label(),
        }
    }
}

impl ReflectionUse {
    /// Short label used in trace output
    pub fn label(&self) -> &'static str {
        match self {
            ReflectionUse::GetMethod { .. } => "get_method",
            ReflectionUse::GetField { .. } => "get_field",
            ReflectionUse::GetConstructor { .. } => "get_constructor",
            ReflectionUse::GetType { .. } => "get_type",
            ReflectionUse::MakeGenericType { .. } => "make_generic_type",
            ReflectionUse::MakeGenericMethod { .. } => "make_generic_method",
            ReflectionUse::GetAttributes { .. } => "get_attributes",
            ReflectionUse::CreateDelegate { .. } => "create_delegate",
            ReflectionUse::Invoke { .. } => "invoke",
            ReflectionUse::Activate { .. } => "activate",
            ReflectionUse::RunClassConstructor { .. } => "run_class_constructor",
            ReflectionUse::DynamicLookup { .. } => "dynamic_lookup",
        }
    }
}

//! Program manifest format
//!
//! A manifest is the serialized closed-world input: type definitions with
//! their members and method body references, entry points, roots and
//! program-level dependencies. It is read from TOML or JSON and lowered
//! into a [`Program`] in five passes:
//!
//! 1. declare every type name
//! 2. resolve bases, interfaces, attributes and member signatures
//! 3. reject circular base chains
//! 4. resolve overrides, bodies, annotations and castable hooks
//! 5. resolve roots and build the dispatch map

use serde::Deserialize;

use super::body::{
    DependencyAnnotation, DependencyCondition, ExplicitDependency, FieldRef, LookupIntent,
    MemberAccess, MemberSelector, MethodRef, Reference, ReflectionUse,
};
use super::{
    CastableHooks, DispatchMap, FieldDef, GenericParamDef, MethodDef, MethodKind, Program, TypeDef,
    TypeKind,
};
use crate::error::ManifestError;
use crate::types::syntax::{self, TypeExpr};
use crate::types::{
    DefId, FieldDefId, MethodDefId, ParamOwner, PrimitiveKind, TypeId, TypeKey, TypeTable,
};

/// Root of a manifest document
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Type definitions
    #[serde(default)]
    pub types: Vec<TypeDecl>,
    /// Entry point methods (`Owner::name`)
    #[serde(default)]
    pub entry_points: Vec<String>,
    /// Additional code roots (`Owner::name`)
    #[serde(default)]
    pub roots: Vec<String>,
    /// Program-level dependency declarations
    #[serde(default)]
    pub dependencies: Vec<GlobalDependencyDecl>,
}

/// Type declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDecl {
    /// Fully qualified name
    pub name: String,
    /// Class (default), struct, interface or enum
    #[serde(default)]
    pub kind: TypeKind,
    /// Generic parameters
    #[serde(default)]
    pub generic_params: Vec<GenericParamDecl>,
    /// Base type reference
    #[serde(default)]
    pub base: Option<String>,
    /// Implemented interfaces
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Custom attribute types
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Layout proven identical to the shared form
    #[serde(default)]
    pub canonical_layout: bool,
    /// Dynamic interface castable hooks
    #[serde(default)]
    pub dynamic_castable: Option<CastableDecl>,
    /// Fields
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    /// Methods
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

/// Generic parameter: a bare name or a name with accessed members
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GenericParamDecl {
    /// `"T"`
    Name(String),
    /// `{ name = "T", members = "methods" }`
    Annotated {
        /// Parameter name
        name: String,
        /// Named member to keep
        #[serde(default)]
        member: Option<String>,
        /// Member category to keep
        #[serde(default)]
        members: Option<SelectorKeyword>,
        /// Inspect or invoke
        #[serde(default)]
        intent: LookupIntent,
    },
}

/// Member category keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKeyword {
    /// All methods
    Methods,
    /// All fields
    Fields,
    /// Instance constructors
    Constructors,
    /// Class constructor
    StaticConstructor,
    /// Everything
    All,
}

/// Dynamic interface castable hook names
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CastableDecl {
    /// Method returning the implementing type for an interface
    pub resolve_implementation: String,
    /// Method answering whether an interface is implemented
    pub is_interface_implemented: String,
}

/// Field declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDecl {
    /// Name
    pub name: String,
    /// Field type
    #[serde(rename = "type")]
    pub ty: String,
    /// Static field
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

/// Method declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodDecl {
    /// Name (`.ctor` / `.cctor` for constructors)
    pub name: String,
    /// Method kind, `instance` by default
    #[serde(default)]
    pub kind: MethodKind,
    /// Generic parameters of the method
    #[serde(default)]
    pub generic_params: Vec<GenericParamDecl>,
    /// Parameter types
    #[serde(default)]
    pub params: Vec<String>,
    /// Return type, `void` by default
    #[serde(default = "default_returns")]
    pub returns: String,
    /// Slot this method overrides (`Owner::name`)
    #[serde(default)]
    pub overrides: Option<String>,
    /// Body references
    #[serde(default)]
    pub body: Vec<OpDecl>,
    /// `DynamicDependency`-style annotations
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,
}

fn default_returns() -> String {
    "void".to_string()
}

/// Body reference
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum OpDecl {
    /// Direct call
    Call {
        /// Member reference
        method: String,
    },
    /// Virtual or interface call
    CallVirtual {
        /// Member reference
        method: String,
    },
    /// Allocation
    New {
        /// Allocated type
        #[serde(rename = "type")]
        ty: String,
        /// Constructor parameter types, when not the parameterless one
        #[serde(default)]
        ctor: Option<Vec<String>>,
    },
    /// Boxing
    Box {
        /// Boxed type
        #[serde(rename = "type")]
        ty: String,
    },
    /// `typeof`
    Typeof {
        /// Token type
        #[serde(rename = "type")]
        ty: String,
    },
    /// Cast or type check
    Cast {
        /// Target type
        #[serde(rename = "type")]
        ty: String,
    },
    /// Field read
    LoadField {
        /// Field reference (`Owner::name`)
        field: String,
    },
    /// Field write
    StoreField {
        /// Field reference (`Owner::name`)
        field: String,
    },
    /// Delegate over a static target
    Ldftn {
        /// Member reference
        method: String,
    },
    /// `GetMethod("name")`
    GetMethod {
        /// Searched type
        #[serde(rename = "type")]
        ty: String,
        /// Member name
        name: String,
        /// Inspect or invoke
        #[serde(default)]
        intent: LookupIntent,
    },
    /// `GetField("name")`
    GetField {
        /// Searched type
        #[serde(rename = "type")]
        ty: String,
        /// Member name
        name: String,
        /// Inspect or invoke
        #[serde(default)]
        intent: LookupIntent,
    },
    /// `GetConstructor()`
    GetConstructor {
        /// Searched type
        #[serde(rename = "type")]
        ty: String,
        /// Inspect or invoke
        #[serde(default)]
        intent: LookupIntent,
    },
    /// `Type.GetType("name")`
    GetType {
        /// Literal name
        name: String,
    },
    /// `MakeGenericType`
    MakeGenericType {
        /// Open generic definition (`G<>`)
        #[serde(rename = "type")]
        ty: String,
        /// Arguments, omitted when produced at run time
        #[serde(default)]
        args: Option<Vec<String>>,
    },
    /// `MakeGenericMethod`
    MakeGenericMethod {
        /// Generic method reference
        method: String,
        /// Arguments, omitted when produced at run time
        #[serde(default)]
        args: Option<Vec<String>>,
    },
    /// Attribute query
    GetAttributes {
        /// Queried type
        #[serde(rename = "type")]
        ty: String,
    },
    /// `Delegate.CreateDelegate`
    CreateDelegate {
        /// Member reference
        method: String,
    },
    /// `MethodInfo.Invoke`
    Invoke {
        /// Member reference
        method: String,
    },
    /// `Activator.CreateInstance`
    Activate {
        /// Activated type
        #[serde(rename = "type")]
        ty: String,
    },
    /// `RunClassConstructor`
    RunClassConstructor {
        /// Target type
        #[serde(rename = "type")]
        ty: String,
    },
    /// Lookup by a computed name
    DynamicLookup {
        /// Description for diagnostics
        description: String,
    },
}

/// Method-level dependency annotation
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyDecl {
    /// Target type
    #[serde(rename = "type")]
    pub ty: String,
    /// Named member
    #[serde(default)]
    pub member: Option<String>,
    /// Member category
    #[serde(default)]
    pub members: Option<SelectorKeyword>,
    /// Inspect or invoke
    #[serde(default)]
    pub intent: LookupIntent,
}

/// Program-level dependency
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalDependencyDecl {
    /// Trigger, `always` by default
    #[serde(default)]
    pub when: ConditionDecl,
    /// Target type
    #[serde(rename = "type")]
    pub ty: String,
    /// Named member
    #[serde(default)]
    pub member: Option<String>,
    /// Member category
    #[serde(default)]
    pub members: Option<SelectorKeyword>,
    /// Inspect or invoke
    #[serde(default)]
    pub intent: LookupIntent,
}

/// Dependency trigger
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
pub enum ConditionDecl {
    /// `"always"`
    #[default]
    Always,
    /// `{ type_reachable = "X" }`
    TypeReachable {
        /// Definition name
        type_reachable: String,
    },
    /// `{ method_reachable = "X::M" }`
    MethodReachable {
        /// Member reference
        method_reachable: String,
    },
    /// Any other keyword; only `always` is accepted
    Keyword(String),
}

/// Generic parameter names visible while resolving a reference
#[derive(Clone, Copy, Default)]
struct Scope<'a> {
    type_params: &'a [GenericParamDef],
    method_params: &'a [GenericParamDef],
    /// Accept `!n` / `!!n` beyond the lists above (overload filters name
    /// the target's parameters, not the caller's)
    lenient: bool,
}

impl Scope<'_> {
    fn find(&self, name: &str) -> Option<(ParamOwner, u16)> {
        let position = |params: &[GenericParamDef]| params.iter().position(|p| p.name == name);
        if let Some(index) = position(self.method_params) {
            return Some((ParamOwner::Method, index as u16));
        }
        position(self.type_params).map(|index| (ParamOwner::Type, index as u16))
    }
}

fn selector(
    owner: &str,
    member: Option<String>,
    members: Option<SelectorKeyword>,
    intent: LookupIntent,
) -> Result<MemberAccess, ManifestError> {
    let members = match (member, members) {
        (Some(name), None) => MemberSelector::Named(name),
        (None, Some(SelectorKeyword::Methods)) => MemberSelector::Methods,
        (None, Some(SelectorKeyword::Fields)) => MemberSelector::Fields,
        (None, Some(SelectorKeyword::Constructors)) => MemberSelector::Constructors,
        (None, Some(SelectorKeyword::StaticConstructor)) => MemberSelector::StaticConstructor,
        (None, Some(SelectorKeyword::All)) => MemberSelector::All,
        _ => {
            return Err(ManifestError::Invalid {
                name: owner.to_string(),
                reason: "exactly one of `member` or `members` is required".to_string(),
            })
        }
    };
    Ok(MemberAccess { members, intent })
}

impl GenericParamDecl {
    fn lower(&self, owner: &str) -> Result<GenericParamDef, ManifestError> {
        match self {
            GenericParamDecl::Name(name) => Ok(GenericParamDef {
                name: name.clone(),
                accessed: None,
            }),
            GenericParamDecl::Annotated {
                name,
                member,
                members,
                intent,
            } => Ok(GenericParamDef {
                name: name.clone(),
                accessed: Some(selector(owner, member.clone(), *members, *intent)?),
            }),
        }
    }
}

impl Manifest {
    /// Lower the manifest into a [`Program`], interning types into `table`
    pub fn lower(&self, table: &TypeTable) -> Result<Program, ManifestError> {
        let mut lowering = Lowering {
            program: Program::default(),
            table,
        };
        lowering.declare(&self.types)?;
        let pending = lowering.signatures(&self.types)?;
        lowering.check_cycles()?;
        lowering.bodies(&self.types, &pending)?;
        lowering.roots(self)?;
        lowering.program.dispatch = DispatchMap::build(&lowering.program, table);
        Ok(lowering.program)
    }
}

/// Method whose body still needs resolving
enum Pending {
    Declared { method: MethodDefId, decl: (usize, usize) },
    ImplicitCtor { method: MethodDefId },
}

struct Lowering<'t> {
    program: Program,
    table: &'t TypeTable,
}

impl<'t> Lowering<'t> {
    /// Pass 1: allocate a `DefId` per type name
    fn declare(&mut self, decls: &[TypeDecl]) -> Result<(), ManifestError> {
        for decl in decls {
            if PrimitiveKind::from_name(&decl.name).is_some() || decl.name == "__Canon" {
                return Err(ManifestError::Invalid {
                    name: decl.name.clone(),
                    reason: "name is reserved for a built-in type".to_string(),
                });
            }
            let def = DefId(self.program.types.len() as u32);
            if self.program.by_name.insert(decl.name.clone(), def).is_some() {
                return Err(ManifestError::DuplicateType {
                    name: decl.name.clone(),
                });
            }
            let generic_params = decl
                .generic_params
                .iter()
                .map(|p| p.lower(&decl.name))
                .collect::<Result<Vec<_>, _>>()?;
            self.program.types.push(TypeDef {
                name: decl.name.clone(),
                kind: decl.kind,
                generic_params,
                base: None,
                interfaces: Vec::new(),
                attributes: Vec::new(),
                methods: Vec::new(),
                fields: Vec::new(),
                canonical_layout: decl.canonical_layout,
                dynamic_castable: None,
            });
        }
        Ok(())
    }

    /// Pass 2: supertypes, attributes, fields and method signatures
    fn signatures(&mut self, decls: &[TypeDecl]) -> Result<Vec<Pending>, ManifestError> {
        let mut pending = Vec::new();
        for (index, decl) in decls.iter().enumerate() {
            let def = DefId(index as u32);
            let type_params = self.program.types[index].generic_params.clone();
            let scope = Scope {
                type_params: &type_params,
                ..Scope::default()
            };

            let base = match &decl.base {
                Some(text) => {
                    if decl.kind != TypeKind::Class {
                        return Err(ManifestError::Invalid {
                            name: decl.name.clone(),
                            reason: "only classes declare a base type".to_string(),
                        });
                    }
                    Some(self.parse_type(text, scope)?)
                }
                None => None,
            };
            let interfaces = self.parse_types(&decl.interfaces, scope)?;
            let attributes = self.parse_types(&decl.attributes, scope)?;

            let mut fields = Vec::new();
            for field in &decl.fields {
                let ty = self.parse_type(&field.ty, scope)?;
                let id = FieldDefId(self.program.fields.len() as u32);
                self.program.fields.push(FieldDef {
                    owner: def,
                    name: field.name.clone(),
                    ty,
                    is_static: field.is_static,
                });
                fields.push(id);
            }

            let mut methods = Vec::new();
            for (m, method) in decl.methods.iter().enumerate() {
                let generic_params = method
                    .generic_params
                    .iter()
                    .map(|p| p.lower(&method.name))
                    .collect::<Result<Vec<_>, _>>()?;
                let method_scope = Scope {
                    type_params: &type_params,
                    method_params: &generic_params,
                    lenient: false,
                };
                let params = self.parse_types(&method.params, method_scope)?;
                let returns = self.parse_type(&method.returns, method_scope)?;
                if method.kind.is_virtual() && decl.kind.is_value_like() && method.overrides.is_none() {
                    return Err(ManifestError::Invalid {
                        name: format!("{}::{}", decl.name, method.name),
                        reason: "value types cannot introduce virtual slots".to_string(),
                    });
                }
                let id = MethodDefId(self.program.methods.len() as u32);
                self.program.methods.push(MethodDef {
                    owner: def,
                    name: method.name.clone(),
                    kind: method.kind,
                    generic_params,
                    params,
                    returns,
                    overrides: None,
                    body: Vec::new(),
                    dependencies: Vec::new(),
                });
                methods.push(id);
                pending.push(Pending::Declared {
                    method: id,
                    decl: (index, m),
                });
            }

            let has_ctor = decl.methods.iter().any(|m| m.kind == MethodKind::Constructor);
            if !has_ctor && matches!(decl.kind, TypeKind::Class | TypeKind::Struct) {
                let id = MethodDefId(self.program.methods.len() as u32);
                self.program.methods.push(MethodDef {
                    owner: def,
                    name: ".ctor".to_string(),
                    kind: MethodKind::Constructor,
                    generic_params: Vec::new(),
                    params: Vec::new(),
                    returns: self.table.primitive(PrimitiveKind::Void),
                    overrides: None,
                    body: Vec::new(),
                    dependencies: Vec::new(),
                });
                methods.push(id);
                pending.push(Pending::ImplicitCtor { method: id });
            }

            let ty = &mut self.program.types[index];
            ty.base = base;
            ty.interfaces = interfaces;
            ty.attributes = attributes;
            ty.fields = fields;
            ty.methods = methods;
        }
        Ok(pending)
    }

    /// Pass 3: every base chain must end
    fn check_cycles(&self) -> Result<(), ManifestError> {
        for (start, def) in self.program.types() {
            let mut current = def.base;
            let mut steps = 0;
            while let Some(base) = current {
                let Some(base_def) = self.table.key(base).definition() else {
                    break;
                };
                steps += 1;
                if base_def == start || steps > self.program.types.len() {
                    return Err(ManifestError::CyclicInheritance {
                        name: def.name.clone(),
                    });
                }
                current = self.program.type_def(base_def).base;
            }
        }
        Ok(())
    }

    /// Pass 4: overrides, bodies, annotations and hooks
    fn bodies(&mut self, decls: &[TypeDecl], pending: &[Pending]) -> Result<(), ManifestError> {
        for item in pending {
            match item {
                Pending::Declared {
                    method,
                    decl: (t, m),
                } => {
                    let decl = &decls[*t].methods[*m];
                    let def = self.program.method(*method).clone();
                    let type_params = self.program.types[*t].generic_params.clone();
                    let scope = Scope {
                        type_params: &type_params,
                        method_params: &def.generic_params,
                        lenient: false,
                    };

                    let overrides = match &decl.overrides {
                        Some(text) => {
                            let slot = self.parse_method(text, scope, true)?;
                            if !self.program.method(slot.method).kind.is_virtual() {
                                return Err(ManifestError::Invalid {
                                    name: text.clone(),
                                    reason: "overridden method is not virtual".to_string(),
                                });
                            }
                            Some(slot.method)
                        }
                        None => None,
                    };
                    let body = decl
                        .body
                        .iter()
                        .map(|op| self.lower_op(op, scope))
                        .collect::<Result<Vec<_>, _>>()?;
                    let dependencies = decl
                        .dependencies
                        .iter()
                        .map(|dep| {
                            Ok(DependencyAnnotation {
                                target: self.parse_type(&dep.ty, scope)?,
                                access: selector(&dep.ty, dep.member.clone(), dep.members, dep.intent)?,
                            })
                        })
                        .collect::<Result<Vec<_>, ManifestError>>()?;

                    let target = &mut self.program.methods[method.index()];
                    target.overrides = overrides;
                    target.body = body;
                    target.dependencies = dependencies;
                }
                Pending::ImplicitCtor { method } => {
                    let owner = self.program.method(*method).owner;
                    let base_ctor = self.program.type_def(owner).base.and_then(|base| {
                        let base_def = self.table.key(base).definition()?;
                        let ctor = self.program.default_constructor(base_def)?;
                        Some(Reference::Call(MethodRef {
                            owner: base,
                            method: ctor,
                            inst: Vec::new(),
                        }))
                    });
                    self.program.methods[method.index()].body = base_ctor.into_iter().collect();
                }
            }
        }

        for (index, decl) in decls.iter().enumerate() {
            let Some(hooks) = &decl.dynamic_castable else {
                continue;
            };
            let def = DefId(index as u32);
            let find = |name: &str| {
                self.program
                    .methods_named(def, name)
                    .next()
                    .ok_or_else(|| ManifestError::UndefinedMember {
                        owner: decl.name.clone(),
                        name: name.to_string(),
                    })
            };
            let resolved = CastableHooks {
                resolve_implementation: find(&hooks.resolve_implementation)?,
                is_interface_implemented: find(&hooks.is_interface_implemented)?,
            };
            self.program.types[index].dynamic_castable = Some(resolved);
        }
        Ok(())
    }

    /// Pass 5: entry points, roots and global dependencies
    fn roots(&mut self, manifest: &Manifest) -> Result<(), ManifestError> {
        let scope = Scope::default();
        self.program.entry_points = manifest
            .entry_points
            .iter()
            .map(|text| self.parse_method(text, scope, false))
            .collect::<Result<Vec<_>, _>>()?;
        self.program.roots = manifest
            .roots
            .iter()
            .map(|text| self.parse_method(text, scope, false))
            .collect::<Result<Vec<_>, _>>()?;

        let mut dependencies = Vec::new();
        for decl in &manifest.dependencies {
            let when = match &decl.when {
                ConditionDecl::Always => DependencyCondition::Always,
                ConditionDecl::Keyword(word) if word == "always" => DependencyCondition::Always,
                ConditionDecl::Keyword(word) => {
                    return Err(ManifestError::Invalid {
                        name: decl.ty.clone(),
                        reason: format!("unknown dependency condition '{}'", word),
                    })
                }
                ConditionDecl::TypeReachable { type_reachable } => {
                    let def = self.program.lookup_type(type_reachable).ok_or_else(|| {
                        ManifestError::UndefinedType {
                            name: type_reachable.clone(),
                        }
                    })?;
                    DependencyCondition::TypeReachable(def)
                }
                ConditionDecl::MethodReachable { method_reachable } => {
                    let method = self.parse_method(method_reachable, scope, true)?;
                    DependencyCondition::MethodReachable(method.method)
                }
            };
            dependencies.push(ExplicitDependency {
                when,
                then: DependencyAnnotation {
                    target: self.parse_type(&decl.ty, scope)?,
                    access: selector(&decl.ty, decl.member.clone(), decl.members, decl.intent)?,
                },
            });
        }
        self.program.dependencies = dependencies;
        Ok(())
    }

    fn lower_op(&self, op: &OpDecl, scope: Scope<'_>) -> Result<Reference, ManifestError> {
        let reference = match op {
            OpDecl::Call { method } => Reference::Call(self.parse_method(method, scope, false)?),
            OpDecl::CallVirtual { method } => {
                let target = self.parse_method(method, scope, false)?;
                if !self.program.method(target.method).kind.is_virtual() {
                    // Non-virtual targets behave like direct calls
                    Reference::Call(target)
                } else {
                    Reference::CallVirtual(target)
                }
            }
            OpDecl::New { ty, ctor } => {
                let allocated = self.parse_type(ty, scope)?;
                Reference::New {
                    ty: allocated,
                    ctor: self.constructor_for(ty, allocated, ctor.as_deref(), scope)?,
                }
            }
            OpDecl::Box { ty } => Reference::Box(self.parse_type(ty, scope)?),
            OpDecl::Typeof { ty } => Reference::TypeToken(self.parse_type(ty, scope)?),
            OpDecl::Cast { ty } => Reference::Cast(self.parse_type(ty, scope)?),
            OpDecl::LoadField { field } => Reference::LoadField(self.parse_field(field, scope)?),
            OpDecl::StoreField { field } => Reference::StoreField(self.parse_field(field, scope)?),
            OpDecl::Ldftn { method } => Reference::LoadFunction(self.parse_method(method, scope, false)?),
            OpDecl::GetMethod { ty, name, intent } => Reference::Reflection(ReflectionUse::GetMethod {
                owner: self.parse_type(ty, scope)?,
                name: name.clone(),
                intent: *intent,
            }),
            OpDecl::GetField { ty, name, intent } => Reference::Reflection(ReflectionUse::GetField {
                owner: self.parse_type(ty, scope)?,
                name: name.clone(),
                intent: *intent,
            }),
            OpDecl::GetConstructor { ty, intent } => {
                Reference::Reflection(ReflectionUse::GetConstructor {
                    owner: self.parse_type(ty, scope)?,
                    intent: *intent,
                })
            }
            OpDecl::GetType { name } => Reference::Reflection(ReflectionUse::GetType {
                name: name.clone(),
                target: self.parse_type(name, Scope::default()).ok(),
            }),
            OpDecl::MakeGenericType { ty, args } => {
                let open = self.parse_type(ty, scope)?;
                let definition = match &*self.table.key(open) {
                    TypeKey::Definition(def) if self.program.type_def(*def).is_generic() => *def,
                    _ => {
                        return Err(ManifestError::Invalid {
                            name: ty.clone(),
                            reason: "not an open generic definition".to_string(),
                        })
                    }
                };
                let args = match args {
                    Some(args) => {
                        let args = self.parse_types(args, scope)?;
                        let expected = self.program.type_def(definition).arity();
                        if args.len() != expected {
                            return Err(ManifestError::ArityMismatch {
                                name: ty.clone(),
                                expected,
                                actual: args.len(),
                            });
                        }
                        Some(args)
                    }
                    None => None,
                };
                Reference::Reflection(ReflectionUse::MakeGenericType { definition, args })
            }
            OpDecl::MakeGenericMethod { method, args } => {
                let target = self.parse_method(method, scope, true)?;
                let args = match args {
                    Some(args) => {
                        let args = self.parse_types(args, scope)?;
                        let expected = self.program.method(target.method).generic_params.len();
                        if args.len() != expected {
                            return Err(ManifestError::ArityMismatch {
                                name: method.clone(),
                                expected,
                                actual: args.len(),
                            });
                        }
                        Some(args)
                    }
                    None => None,
                };
                Reference::Reflection(ReflectionUse::MakeGenericMethod {
                    method: target,
                    args,
                })
            }
            OpDecl::GetAttributes { ty } => Reference::Reflection(ReflectionUse::GetAttributes {
                target: self.parse_type(ty, scope)?,
            }),
            OpDecl::CreateDelegate { method } => {
                Reference::Reflection(ReflectionUse::CreateDelegate {
                    target: self.parse_method(method, scope, false)?,
                })
            }
            OpDecl::Invoke { method } => Reference::Reflection(ReflectionUse::Invoke {
                target: self.parse_method(method, scope, false)?,
            }),
            OpDecl::Activate { ty } => Reference::Reflection(ReflectionUse::Activate {
                target: self.parse_type(ty, scope)?,
            }),
            OpDecl::RunClassConstructor { ty } => {
                Reference::Reflection(ReflectionUse::RunClassConstructor {
                    target: self.parse_type(ty, scope)?,
                })
            }
            OpDecl::DynamicLookup { description } => {
                Reference::Reflection(ReflectionUse::DynamicLookup {
                    description: description.clone(),
                })
            }
        };
        Ok(reference)
    }

    fn constructor_for(
        &self,
        text: &str,
        allocated: TypeId,
        params: Option<&[String]>,
        scope: Scope<'_>,
    ) -> Result<Option<MethodDefId>, ManifestError> {
        let key = self.table.key(allocated);
        if matches!(*key, TypeKey::Array { .. }) {
            return Ok(None);
        }
        let Some(def) = key.definition() else {
            return Err(ManifestError::Invalid {
                name: text.to_string(),
                reason: "only named types and arrays can be allocated".to_string(),
            });
        };
        if self.program.type_def(def).kind == TypeKind::Interface {
            return Err(ManifestError::Invalid {
                name: text.to_string(),
                reason: "interfaces cannot be allocated".to_string(),
            });
        }
        let wanted = match params {
            Some(params) => Some(self.parse_types(params, scope)?),
            None => None,
        };
        let subst = self.program.substitution(self.table, allocated);
        let ctor = self.program.constructors(def).find(|ctor| {
            let declared = &self.program.method(*ctor).params;
            match &wanted {
                Some(wanted) => {
                    declared == wanted || subst.apply_all(self.table, declared) == *wanted
                }
                None => declared.is_empty(),
            }
        });
        match ctor {
            Some(ctor) => Ok(Some(ctor)),
            // Enums and structs can be created without running a constructor
            None if wanted.is_none() && self.program.type_def(def).is_value_type() => Ok(None),
            None => Err(ManifestError::UndefinedMember {
                owner: text.to_string(),
                name: ".ctor".to_string(),
            }),
        }
    }

    fn parse_types(&self, texts: &[String], scope: Scope<'_>) -> Result<Vec<TypeId>, ManifestError> {
        texts.iter().map(|text| self.parse_type(text, scope)).collect()
    }

    fn parse_type(&self, text: &str, scope: Scope<'_>) -> Result<TypeId, ManifestError> {
        let expr = syntax::parse_type(text).map_err(|source| ManifestError::Syntax {
            text: text.to_string(),
            source,
        })?;
        self.resolve(&expr, scope)
    }

    fn resolve(&self, expr: &TypeExpr, scope: Scope<'_>) -> Result<TypeId, ManifestError> {
        let table = self.table;
        match expr {
            TypeExpr::Named(name) => {
                if let Some((owner, index)) = scope.find(name) {
                    return Ok(table.param(owner, index));
                }
                if let Some(kind) = PrimitiveKind::from_name(name) {
                    return Ok(table.primitive(kind));
                }
                let def = self.lookup(name)?;
                let arity = self.program.type_def(def).arity();
                if arity != 0 {
                    return Err(ManifestError::ArityMismatch {
                        name: name.clone(),
                        expected: arity,
                        actual: 0,
                    });
                }
                Ok(table.definition(def))
            }
            TypeExpr::Generic { name, args } => {
                let def = self.lookup(name)?;
                let arity = self.program.type_def(def).arity();
                if arity != args.len() {
                    return Err(ManifestError::ArityMismatch {
                        name: name.clone(),
                        expected: arity,
                        actual: args.len(),
                    });
                }
                let args = args
                    .iter()
                    .map(|arg| self.resolve(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(table.instance(def, args))
            }
            TypeExpr::Open { name, arity } => {
                let def = self.lookup(name)?;
                let expected = self.program.type_def(def).arity();
                if expected != *arity {
                    return Err(ManifestError::ArityMismatch {
                        name: name.clone(),
                        expected,
                        actual: *arity,
                    });
                }
                Ok(table.definition(def))
            }
            TypeExpr::TypeParam(index) => {
                if !scope.lenient {
                    Self::check_param(*index, scope.type_params.len(), "!")?;
                }
                Ok(table.param(ParamOwner::Type, *index))
            }
            TypeExpr::MethodParam(index) => {
                if !scope.lenient {
                    Self::check_param(*index, scope.method_params.len(), "!!")?;
                }
                Ok(table.param(ParamOwner::Method, *index))
            }
            TypeExpr::Canon => Ok(table.canon()),
            TypeExpr::Pointer(inner) => Ok(table.pointer(self.resolve(inner, scope)?)),
            TypeExpr::ByRef(inner) => Ok(table.by_ref(self.resolve(inner, scope)?)),
            TypeExpr::Array { element, rank } => Ok(table.array(self.resolve(element, scope)?, *rank)),
        }
    }

    fn check_param(index: u16, count: usize, prefix: &str) -> Result<(), ManifestError> {
        if (index as usize) < count {
            Ok(())
        } else {
            Err(ManifestError::Invalid {
                name: format!("{}{}", prefix, index),
                reason: "generic parameter is not in scope".to_string(),
            })
        }
    }

    fn lookup(&self, name: &str) -> Result<DefId, ManifestError> {
        self.program
            .lookup_type(name)
            .ok_or_else(|| ManifestError::UndefinedType {
                name: name.to_string(),
            })
    }

    /// Resolve `Owner::name<Inst>(Params)`, searching the owner's base chain.
    ///
    /// With `allow_open`, a generic method may be named without arguments.
    fn parse_method(&self, text: &str, scope: Scope<'_>, allow_open: bool) -> Result<MethodRef, ManifestError> {
        let expr = syntax::parse_member(text).map_err(|source| ManifestError::Syntax {
            text: text.to_string(),
            source,
        })?;
        let owner = self.resolve(&expr.owner, scope)?;
        let inst = expr
            .inst
            .iter()
            .map(|arg| self.resolve(arg, scope))
            .collect::<Result<Vec<_>, _>>()?;
        let params = match &expr.params {
            Some(params) => Some(
                params
                    .iter()
                    .map(|p| self.resolve(p, Scope { lenient: true, ..scope }))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };

        for ty in self.program.base_chain(self.table, owner) {
            let Some(def) = self.table.key(ty).definition() else {
                break;
            };
            let subst = self.program.substitution(self.table, ty);
            let candidates: Vec<MethodDefId> = self
                .program
                .methods_named(def, &expr.name)
                .filter(|m| match &params {
                    None => true,
                    Some(wanted) => {
                        let declared = &self.program.method(*m).params;
                        declared == wanted || subst.apply_all(self.table, declared) == *wanted
                    }
                })
                .collect();
            match candidates.as_slice() {
                [] => continue,
                [method] => {
                    let expected = self.program.method(*method).generic_params.len();
                    if inst.len() != expected && !(allow_open && inst.is_empty()) {
                        return Err(ManifestError::ArityMismatch {
                            name: text.to_string(),
                            expected,
                            actual: inst.len(),
                        });
                    }
                    return Ok(MethodRef {
                        owner: ty,
                        method: *method,
                        inst,
                    });
                }
                _ => {
                    return Err(ManifestError::Invalid {
                        name: text.to_string(),
                        reason: "ambiguous overload, add a parameter list".to_string(),
                    })
                }
            }
        }
        Err(ManifestError::UndefinedMember {
            owner: self.program.display_type(self.table, owner),
            name: expr.name,
        })
    }

    /// Resolve `Owner::name` to a field, searching the owner's base chain
    fn parse_field(&self, text: &str, scope: Scope<'_>) -> Result<FieldRef, ManifestError> {
        let expr = syntax::parse_member(text).map_err(|source| ManifestError::Syntax {
            text: text.to_string(),
            source,
        })?;
        let owner = self.resolve(&expr.owner, scope)?;
        for ty in self.program.base_chain(self.table, owner) {
            let Some(def) = self.table.key(ty).definition() else {
                break;
            };
            if let Some(field) = self.program.field_named(def, &expr.name) {
                return Ok(FieldRef { owner: ty, field });
            }
        }
        Err(ManifestError::UndefinedMember {
            owner: self.program.display_type(self.table, owner),
            name: expr.name,
        })
    }
}

impl TypeKind {
    fn is_value_like(self) -> bool {
        matches!(self, TypeKind::Struct | TypeKind::Enum)
    }
}

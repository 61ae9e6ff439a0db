//! Reflection operations against an emitted plan
//!
//! Every operation either succeeds with what the plan retained or fails
//! with a catchable [`ReflectionError`]. Nothing here panics on a lookup
//! the compiled program did not anticipate.

use rustc_hash::FxHashMap;

use super::{LookupEntry, MetadataTable};
use crate::analysis::records::MethodKey;
use crate::error::ReflectionError;
use crate::policy::{MemberDef, MetadataTier, RetentionPlan, TypeMetadata};
use crate::program::{MethodKind, Program};
use crate::sharing::{Canonicalizer, CodeBody, SharingResolver};
use crate::types::{DefId, FieldDefId, MethodDefId, TypeId, TypeKey, TypeTable};

/// How a run-time type object came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Its exact instantiation has metadata
    Static,
    /// Formed at run time from a canonical or universal template
    Formed {
        /// Template whose metadata serves the type
        template: TypeId,
    },
}

/// A `System.Type`-like object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeType {
    /// Exact type
    pub ty: TypeId,
    /// Where its metadata comes from
    pub origin: Origin,
}

impl RuntimeType {
    fn metadata_key(&self) -> TypeId {
        match self.origin {
            Origin::Static => self.ty,
            Origin::Formed { template } => template,
        }
    }
}

/// A `MethodInfo`-like object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Declaring type, instantiated
    pub owner: TypeId,
    /// Definition
    pub method: MethodDefId,
    /// Generic method arguments
    pub inst: Vec<TypeId>,
}

impl MethodInfo {
    /// Method instantiation this info describes
    pub fn key(&self) -> MethodKey {
        MethodKey {
            owner: self.owner,
            method: self.method,
            inst: self.inst.clone(),
        }
    }
}

/// A `FieldInfo`-like object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Declaring type, instantiated
    pub owner: TypeId,
    /// Definition
    pub field: FieldDefId,
}

/// A reflection call that reached compiled code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Invoked instantiation
    pub target: MethodKey,
    /// Generated body that runs
    pub body: CodeBody,
    /// Owner arguments followed by method arguments, as seen by shared code
    pub generic_context: Vec<TypeId>,
}

impl Invocation {
    /// The `index`th argument of the generic context
    pub fn type_argument(&self, index: usize) -> Option<TypeId> {
        self.generic_context.get(index).copied()
    }
}

/// Answers reflection calls the way the compiled program would
pub struct Reflector<'a> {
    program: &'a Program,
    table: &'a TypeTable,
    plan: &'a RetentionPlan,
    metadata: MetadataTable,
    sharing: SharingResolver<'a>,
    canon: Canonicalizer<'a>,
    by_name: FxHashMap<String, TypeId>,
}

impl<'a> Reflector<'a> {
    /// Load a plan
    pub fn new(program: &'a Program, table: &'a TypeTable, plan: &'a RetentionPlan) -> Self {
        let by_name = plan
            .types()
            .filter(|(_, metadata)| metadata.browsable)
            .map(|(ty, _)| (program.display_type(table, ty), ty))
            .collect();
        Self {
            program,
            table,
            plan,
            metadata: MetadataTable::build(program, table, plan),
            sharing: SharingResolver::new(program, table, plan.bodies()),
            canon: Canonicalizer::new(program, table),
            by_name,
        }
    }

    /// The emitted member lookup table
    pub fn metadata_table(&self) -> &MetadataTable {
        &self.metadata
    }

    fn name(&self, ty: TypeId) -> String {
        self.program.display_type(self.table, ty)
    }

    fn metadata_of(&self, ty: &RuntimeType) -> Option<&TypeMetadata> {
        self.plan.metadata(ty.metadata_key())
    }

    /// `Type.GetType(name)`: only browsable types are found
    pub fn get_type(&self, name: &str) -> Result<RuntimeType, ReflectionError> {
        self.by_name
            .get(name)
            .map(|ty| RuntimeType {
                ty: *ty,
                origin: Origin::Static,
            })
            .ok_or_else(|| ReflectionError::missing(name))
    }

    /// Handle of a type known at compile time (`typeof(T)` with `T`
    /// computed, or a type a caller wants to reflect over)
    pub fn type_handle(&self, ty: TypeId) -> Result<RuntimeType, ReflectionError> {
        match self.plan.metadata(ty) {
            Some(metadata) if metadata.handle => Ok(RuntimeType {
                ty,
                origin: Origin::Static,
            }),
            _ => Err(ReflectionError::missing(self.name(ty))),
        }
    }

    /// `obj.GetType()`
    pub fn type_of(&self, ty: TypeId) -> Result<RuntimeType, ReflectionError> {
        self.type_handle(ty)
    }

    /// `to.IsAssignableFrom(from)`
    pub fn is_assignable(&self, from: &RuntimeType, to: &RuntimeType) -> Result<bool, ReflectionError> {
        for side in [from, to] {
            if self.plan.tier(side.metadata_key()) < MetadataTier::NecessaryOnly {
                return Err(ReflectionError::missing(self.name(side.ty)));
            }
        }
        if from.ty == to.ty || self.program.base_chain(self.table, from.ty).contains(&to.ty) {
            return Ok(true);
        }
        Ok(self.program.interfaces_of(self.table, from.ty).contains(&to.ty))
    }

    /// `GetInterfaces()`: the retained interfaces, instantiated for the
    /// exact type
    pub fn get_interfaces(&self, ty: &RuntimeType) -> Vec<RuntimeType> {
        let Some(metadata) = self.metadata_of(ty) else {
            return Vec::new();
        };
        let actual = self.program.interfaces_of(self.table, ty.ty);
        metadata
            .interfaces
            .iter()
            .filter_map(|retained| {
                let def = self.table.key(*retained).definition()?;
                let exact = actual
                    .iter()
                    .copied()
                    .find(|iface| self.table.key(*iface).definition() == Some(def))?;
                let origin = if exact == *retained {
                    Origin::Static
                } else {
                    Origin::Formed { template: *retained }
                };
                Some(RuntimeType { ty: exact, origin })
            })
            .collect()
    }

    fn require_browsable(&self, ty: &RuntimeType) -> Result<(), ReflectionError> {
        match self.metadata_of(ty) {
            Some(metadata) if metadata.browsable => Ok(()),
            _ => Err(ReflectionError::missing(self.name(ty.ty))),
        }
    }

    /// `GetMethod(name)`: the most derived retained method of that name
    pub fn get_method(&self, ty: &RuntimeType, name: &str) -> Result<Option<MethodInfo>, ReflectionError> {
        self.require_browsable(ty)?;
        for owner in self.program.base_chain(self.table, ty.ty) {
            let Some(def) = self.table.key(owner).definition() else {
                break;
            };
            let found = self.program.methods_named(def, name).find(|method| {
                !matches!(
                    self.program.method(*method).kind,
                    MethodKind::Constructor | MethodKind::StaticConstructor
                ) && self.metadata.entry(MemberDef::Method(*method)) != LookupEntry::Missing
            });
            if let Some(method) = found {
                return Ok(Some(MethodInfo {
                    owner,
                    method,
                    inst: Vec::new(),
                }));
            }
        }
        Ok(None)
    }

    /// `GetField(name)`
    pub fn get_field(&self, ty: &RuntimeType, name: &str) -> Result<Option<FieldInfo>, ReflectionError> {
        self.require_browsable(ty)?;
        for owner in self.program.base_chain(self.table, ty.ty) {
            let Some(def) = self.table.key(owner).definition() else {
                break;
            };
            if let Some(field) = self.program.field_named(def, name) {
                if self.metadata.entry(MemberDef::Field(field)) != LookupEntry::Missing {
                    return Ok(Some(FieldInfo { owner, field }));
                }
            }
        }
        Ok(None)
    }

    /// `GetConstructor(Type.EmptyTypes)`
    pub fn get_constructor(&self, ty: &RuntimeType) -> Result<Option<MethodInfo>, ReflectionError> {
        self.require_browsable(ty)?;
        let Some(def) = self.table.key(ty.ty).definition() else {
            return Ok(None);
        };
        Ok(self
            .program
            .default_constructor(def)
            .filter(|ctor| self.metadata.entry(MemberDef::Method(*ctor)) != LookupEntry::Missing)
            .map(|method| MethodInfo {
                owner: ty.ty,
                method,
                inst: Vec::new(),
            }))
    }

    /// `MakeGenericType(args)`
    ///
    /// The exact instantiation is used when it has a handle; otherwise the
    /// type is formed from its canonical template, and failing that from
    /// the universal template kept for unknown arguments.
    pub fn make_generic_type(&self, definition: DefId, args: &[TypeId]) -> Result<RuntimeType, ReflectionError> {
        let arity = self.program.type_def(definition).arity();
        let open = self.program.open_type(self.table, definition);
        if arity != args.len() {
            return Err(ReflectionError::not_supported(
                self.name(open),
                format!("expected {} type arguments, got {}", arity, args.len()),
            ));
        }
        let exact = self.table.instance(definition, args.to_vec());
        if self.plan.metadata(exact).is_some_and(|m| m.handle) {
            return Ok(RuntimeType {
                ty: exact,
                origin: Origin::Static,
            });
        }

        let canonical = self.canon.canonical_type(exact);
        let universal = self.canon.universal_template(definition);
        for template in [canonical, universal] {
            if self.plan.metadata(template).is_some_and(|m| m.browsable) {
                return Ok(RuntimeType {
                    ty: exact,
                    origin: Origin::Formed { template },
                });
            }
        }
        Err(ReflectionError::missing(self.name(exact)))
    }

    /// `MakeGenericMethod(args)`
    pub fn make_generic_method(&self, method: &MethodInfo, args: &[TypeId]) -> Result<MethodInfo, ReflectionError> {
        let def = self.program.method(method.method);
        let name = self
            .program
            .display_method(self.table, method.owner, method.method, args);
        if def.generic_params.len() != args.len() {
            return Err(ReflectionError::not_supported(
                name,
                format!("expected {} type arguments, got {}", def.generic_params.len(), args.len()),
            ));
        }
        if self.metadata.entry(MemberDef::Method(method.method)) == LookupEntry::Missing {
            return Err(ReflectionError::missing(name));
        }
        Ok(MethodInfo {
            owner: method.owner,
            method: method.method,
            inst: args.to_vec(),
        })
    }

    /// `MethodInfo.Invoke`
    pub fn invoke(&self, method: &MethodInfo) -> Result<Invocation, ReflectionError> {
        let key = method.key();
        if !matches!(self.metadata.entry(MemberDef::Method(method.method)), LookupEntry::Thunk(_)) {
            return Err(ReflectionError::missing(self.display(&key)));
        }
        let body = self.sharing.resolve(&key)?;
        let mut generic_context = match &*self.table.key(key.owner) {
            TypeKey::Instance { args, .. } => args.clone(),
            _ => Vec::new(),
        };
        generic_context.extend(key.inst.iter().copied());
        Ok(Invocation {
            target: key,
            body,
            generic_context,
        })
    }

    fn display(&self, key: &MethodKey) -> String {
        self.program
            .display_method(self.table, key.owner, key.method, &key.inst)
    }

    fn field_access(&self, field: &FieldInfo) -> Result<(), ReflectionError> {
        match self.metadata.entry(MemberDef::Field(field.field)) {
            LookupEntry::Thunk(_) => Ok(()),
            _ => Err(ReflectionError::missing(
                self.program.display_field(self.table, field.owner, field.field),
            )),
        }
    }

    /// `FieldInfo.GetValue`
    pub fn get_value(&self, field: &FieldInfo) -> Result<(), ReflectionError> {
        self.field_access(field)
    }

    /// `FieldInfo.SetValue`
    pub fn set_value(&self, field: &FieldInfo) -> Result<(), ReflectionError> {
        self.field_access(field)
    }

    /// `Activator.CreateInstance(type)`
    pub fn create_instance(&self, ty: &RuntimeType) -> Result<Invocation, ReflectionError> {
        if self.plan.tier(ty.metadata_key()) < MetadataTier::Full {
            return Err(ReflectionError::missing(self.name(ty.ty)));
        }
        let ctor = self
            .table
            .key(ty.ty)
            .definition()
            .and_then(|def| self.program.default_constructor(def))
            .ok_or_else(|| {
                ReflectionError::not_supported(self.name(ty.ty), "no parameterless constructor")
            })?;
        self.invoke(&MethodInfo {
            owner: ty.ty,
            method: ctor,
            inst: Vec::new(),
        })
        .map_err(|err| match err {
            ReflectionError::MissingMetadata { name } => {
                ReflectionError::not_supported(name, "constructor is not invokable")
            }
            other => other,
        })
    }

    /// `RuntimeHelpers.RunClassConstructor`. `Ok(None)` when the type
    /// declares no class constructor.
    pub fn run_class_constructor(&self, ty: &RuntimeType) -> Result<Option<Invocation>, ReflectionError> {
        let Some(cctor) = self
            .table
            .key(ty.ty)
            .definition()
            .and_then(|def| self.program.static_constructor(def))
        else {
            return Ok(None);
        };
        let key = MethodKey {
            owner: ty.ty,
            method: cctor,
            inst: Vec::new(),
        };
        let body = self.sharing.resolve(&key).map_err(|_| {
            ReflectionError::not_supported(self.display(&key), "class constructor was not compiled")
        })?;
        Ok(Some(Invocation {
            target: key,
            body,
            generic_context: Vec::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::config::RetentionConfig;

    fn load(source: &str) -> (Program, TypeTable, RetentionPlan) {
        let table = TypeTable::new();
        let program = Program::from_toml_str(source, &table).unwrap();
        let plan = analyze(&program, &table, &RetentionConfig::default()).unwrap();
        (program, table, plan)
    }

    #[test]
    fn test_unreflected_method_is_not_found() {
        let (program, table, plan) = load(
            r#"
            entry_points = ["App::Main"]

            [[types]]
            name = "App"
            [[types.methods]]
            name = "Main"
            kind = "static"
            body = [
                { op = "new", type = "Worker" },
                { op = "call", method = "Worker::Run" },
                { op = "typeof", type = "Worker" },
            ]

            [[types]]
            name = "Worker"
            [[types.methods]]
            name = "Run"
            "#,
        );
        let reflector = Reflector::new(&program, &table, &plan);
        let worker = reflector.get_type("Worker").unwrap();
        assert_eq!(reflector.get_method(&worker, "Run").unwrap(), None);
    }

    #[test]
    fn test_get_type_needs_browsable() {
        let (program, table, plan) = load(
            r#"
            entry_points = ["App::Main"]

            [[types]]
            name = "App"
            [[types.methods]]
            name = "Main"
            kind = "static"
            body = [{ op = "new", type = "Hidden" }]

            [[types]]
            name = "Hidden"
            "#,
        );
        let reflector = Reflector::new(&program, &table, &plan);
        assert_eq!(
            reflector.get_type("Hidden").unwrap_err(),
            ReflectionError::missing("Hidden")
        );
        // Constructed, so an instance can still report its type
        let hidden = table.definition(program.lookup_type("Hidden").unwrap());
        assert!(reflector.type_of(hidden).is_ok());
    }

    #[test]
    fn test_create_instance_requires_activation() {
        let (program, table, plan) = load(
            r#"
            entry_points = ["App::Main"]

            [[types]]
            name = "App"
            [[types.methods]]
            name = "Main"
            kind = "static"
            body = [
                { op = "activate", type = "Plugin" },
                { op = "typeof", type = "Other" },
            ]

            [[types]]
            name = "Plugin"

            [[types]]
            name = "Other"
            "#,
        );
        let reflector = Reflector::new(&program, &table, &plan);
        let plugin = reflector.get_type("Plugin").unwrap();
        let created = reflector.create_instance(&plugin).unwrap();
        assert!(matches!(created.body, CodeBody::Exact(_)));

        let other = reflector.get_type("Other").unwrap();
        assert_eq!(
            reflector.create_instance(&other).unwrap_err(),
            ReflectionError::missing("Other")
        );
    }

    #[test]
    fn test_assignability_needs_identity() {
        let (program, table, plan) = load(
            r#"
            entry_points = ["App::Main"]

            [[types]]
            name = "App"
            [[types.methods]]
            name = "Main"
            kind = "static"
            body = [
                { op = "typeof", type = "Dog" },
                { op = "typeof", type = "Animal" },
            ]

            [[types]]
            name = "Animal"

            [[types]]
            name = "Dog"
            base = "Animal"
            "#,
        );
        let reflector = Reflector::new(&program, &table, &plan);
        let dog = reflector.get_type("Dog").unwrap();
        let animal = reflector.get_type("Animal").unwrap();
        assert!(reflector.is_assignable(&dog, &animal).unwrap());
        assert!(!reflector.is_assignable(&animal, &dog).unwrap());
    }
}

//! The closed-world program
//!
//! A [`Program`] holds every type, method and field definition the
//! compilation can ever see, together with the roots the scan starts from.
//! Definitions are indexed by [`DefId`], [`MethodDefId`] and [`FieldDefId`];
//! concrete types are [`TypeId`]s interned in a shared [`TypeTable`].

pub mod body;
pub mod dispatch;
pub mod manifest;

use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::types::subst::Substitution;
use crate::types::{DefId, FieldDefId, MethodDefId, ParamOwner, PrimitiveKind, TypeId, TypeKey, TypeTable};

pub use body::{
    DependencyAnnotation, DependencyCondition, ExplicitDependency, FieldRef, LookupIntent,
    MemberAccess, MemberSelector, MethodRef, Reference, ReflectionUse,
};
pub use dispatch::DispatchMap;

/// Kind of type definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    /// Reference type
    #[default]
    Class,
    /// Value type
    Struct,
    /// Interface
    Interface,
    /// Enumeration (a value type)
    Enum,
}

/// Formal generic parameter of a type or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericParamDef {
    /// Source name
    pub name: String,
    /// Members of the argument that must stay reflectable
    pub accessed: Option<MemberAccess>,
}

/// Dynamic interface castable hooks of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastableHooks {
    /// Maps an interface to the type providing its implementation
    pub resolve_implementation: MethodDefId,
    /// Answers whether an interface is implemented
    pub is_interface_implemented: MethodDefId,
}

/// Type definition
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Fully qualified name
    pub name: String,
    /// Class, struct, interface or enum
    pub kind: TypeKind,
    /// Formal generic parameters
    pub generic_params: Vec<GenericParamDef>,
    /// Base type, in terms of this definition's parameters
    pub base: Option<TypeId>,
    /// Declared interfaces, in terms of this definition's parameters
    pub interfaces: Vec<TypeId>,
    /// Custom attribute types
    pub attributes: Vec<TypeId>,
    /// Declared methods
    pub methods: Vec<MethodDefId>,
    /// Declared fields
    pub fields: Vec<FieldDefId>,
    /// Layout independently proven identical to the shared form
    pub canonical_layout: bool,
    /// Dynamic interface castable hooks
    pub dynamic_castable: Option<CastableHooks>,
}

impl TypeDef {
    /// Number of generic parameters
    pub fn arity(&self) -> usize {
        self.generic_params.len()
    }

    /// Whether the definition is generic
    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }

    /// Structs and enums
    pub fn is_value_type(&self) -> bool {
        matches!(self.kind, TypeKind::Struct | TypeKind::Enum)
    }
}

/// Kind of method definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// Static method
    Static,
    /// Non-virtual instance method
    #[default]
    Instance,
    /// Virtual method with a body (also default interface methods)
    Virtual,
    /// Virtual method without a body
    Abstract,
    /// Instance constructor (`.ctor`)
    Constructor,
    /// Class constructor (`.cctor`)
    StaticConstructor,
}

impl MethodKind {
    /// Dispatched through a slot
    pub fn is_virtual(self) -> bool {
        matches!(self, MethodKind::Virtual | MethodKind::Abstract)
    }

    /// Has no receiver
    pub fn is_static(self) -> bool {
        matches!(self, MethodKind::Static | MethodKind::StaticConstructor)
    }

    /// Has a compiled body
    pub fn has_body(self) -> bool {
        !matches!(self, MethodKind::Abstract)
    }
}

/// Method definition
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Declaring type
    pub owner: DefId,
    /// Name (`.ctor` / `.cctor` for constructors)
    pub name: String,
    /// Method kind
    pub kind: MethodKind,
    /// Formal generic parameters of the method itself
    pub generic_params: Vec<GenericParamDef>,
    /// Parameter types
    pub params: Vec<TypeId>,
    /// Return type
    pub returns: TypeId,
    /// Slot this method explicitly overrides or implements
    pub overrides: Option<MethodDefId>,
    /// References made by the body
    pub body: Vec<Reference>,
    /// `DynamicDependency`-style annotations
    pub dependencies: Vec<DependencyAnnotation>,
}

/// Field definition
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Declaring type
    pub owner: DefId,
    /// Name
    pub name: String,
    /// Field type
    pub ty: TypeId,
    /// Static field
    pub is_static: bool,
}

/// The whole closed-world program
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub(crate) types: Vec<TypeDef>,
    pub(crate) methods: Vec<MethodDef>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) by_name: FxHashMap<String, DefId>,
    pub(crate) entry_points: Vec<MethodRef>,
    pub(crate) roots: Vec<MethodRef>,
    pub(crate) dependencies: Vec<ExplicitDependency>,
    pub(crate) dispatch: DispatchMap,
}

impl Program {
    /// Load a program manifest, choosing TOML or JSON by extension
    pub fn load(path: impl AsRef<Path>, table: &TypeTable) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&source, table),
            _ => Self::from_toml_str(&source, table),
        }
    }

    /// Parse a TOML program manifest
    pub fn from_toml_str(source: &str, table: &TypeTable) -> Result<Self, ManifestError> {
        let manifest: manifest::Manifest = toml::from_str(source)?;
        manifest.lower(table)
    }

    /// Parse a JSON program manifest
    pub fn from_json_str(source: &str, table: &TypeTable) -> Result<Self, ManifestError> {
        let manifest: manifest::Manifest = serde_json::from_str(source)?;
        manifest.lower(table)
    }

    /// All type definitions, indexed by [`DefId`]
    pub fn types(&self) -> impl Iterator<Item = (DefId, &TypeDef)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, def)| (DefId(i as u32), def))
    }

    /// Number of method definitions
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Number of field definitions
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Type definition by id
    pub fn type_def(&self, def: DefId) -> &TypeDef {
        &self.types[def.index()]
    }

    /// Method definition by id
    pub fn method(&self, id: MethodDefId) -> &MethodDef {
        &self.methods[id.index()]
    }

    /// Field definition by id
    pub fn field(&self, id: FieldDefId) -> &FieldDef {
        &self.fields[id.index()]
    }

    /// Find a definition by fully qualified name
    pub fn lookup_type(&self, name: &str) -> Option<DefId> {
        self.by_name.get(name).copied()
    }

    /// Program entry points
    pub fn entry_points(&self) -> &[MethodRef] {
        &self.entry_points
    }

    /// Explicit code roots
    pub fn roots(&self) -> &[MethodRef] {
        &self.roots
    }

    /// Program-level dependency declarations
    pub fn dependencies(&self) -> &[ExplicitDependency] {
        &self.dependencies
    }

    /// Precomputed override resolution
    pub fn dispatch(&self) -> &DispatchMap {
        &self.dispatch
    }

    /// Methods declared on `def` with the given name
    pub fn methods_named<'a>(
        &'a self,
        def: DefId,
        name: &'a str,
    ) -> impl Iterator<Item = MethodDefId> + 'a {
        self.type_def(def)
            .methods
            .iter()
            .copied()
            .filter(move |m| self.method(*m).name == name)
    }

    /// Field declared on `def` with the given name
    pub fn field_named(&self, def: DefId, name: &str) -> Option<FieldDefId> {
        self.type_def(def)
            .fields
            .iter()
            .copied()
            .find(|f| self.field(*f).name == name)
    }

    /// Instance constructors of `def`
    pub fn constructors(&self, def: DefId) -> impl Iterator<Item = MethodDefId> + '_ {
        self.type_def(def)
            .methods
            .iter()
            .copied()
            .filter(move |m| self.method(*m).kind == MethodKind::Constructor)
    }

    /// Parameterless instance constructor of `def`
    pub fn default_constructor(&self, def: DefId) -> Option<MethodDefId> {
        self.constructors(def)
            .find(|m| self.method(*m).params.is_empty())
    }

    /// Class constructor of `def`
    pub fn static_constructor(&self, def: DefId) -> Option<MethodDefId> {
        self.type_def(def)
            .methods
            .iter()
            .copied()
            .find(|m| self.method(*m).kind == MethodKind::StaticConstructor)
    }

    /// Open form of a definition: `Definition(def)` for generic and
    /// non-generic definitions alike
    pub fn open_type(&self, table: &TypeTable, def: DefId) -> TypeId {
        table.definition(def)
    }

    /// Definition behind a type, for named types
    pub fn definition_of(&self, table: &TypeTable, ty: TypeId) -> Option<DefId> {
        table.key(ty).definition()
    }

    /// Whether values of the type are references
    ///
    /// Classes, interfaces, arrays, `string`, `object` and `__Canon` are;
    /// structs, enums, other primitives, pointers and parameters are not.
    pub fn is_reference_type(&self, table: &TypeTable, ty: TypeId) -> bool {
        match &*table.key(ty) {
            TypeKey::Primitive(kind) => !kind.is_value_type(),
            TypeKey::Definition(def) | TypeKey::Instance { def, .. } => {
                !self.type_def(*def).is_value_type()
            }
            TypeKey::Array { .. } | TypeKey::Canon => true,
            TypeKey::Pointer(_) | TypeKey::ByRef(_) | TypeKey::Param(_) => false,
        }
    }

    /// Whether the type is a struct, enum or value primitive
    pub fn is_value_type(&self, table: &TypeTable, ty: TypeId) -> bool {
        match &*table.key(ty) {
            TypeKey::Primitive(kind) => kind.is_value_type() && *kind != PrimitiveKind::Void,
            TypeKey::Definition(def) | TypeKey::Instance { def, .. } => {
                self.type_def(*def).is_value_type()
            }
            _ => false,
        }
    }

    /// Whether the type is an interface
    pub fn is_interface(&self, table: &TypeTable, ty: TypeId) -> bool {
        self.definition_of(table, ty)
            .is_some_and(|def| self.type_def(def).kind == TypeKind::Interface)
    }

    /// Substitution mapping a definition's parameters to `ty`'s arguments
    pub fn substitution(&self, table: &TypeTable, ty: TypeId) -> Substitution {
        Substitution::for_owner(table, ty, &[])
    }

    /// Direct base type of `ty`, substituted
    pub fn base_of(&self, table: &TypeTable, ty: TypeId) -> Option<TypeId> {
        let def = self.definition_of(table, ty)?;
        let base = self.type_def(def).base?;
        Some(self.substitution(table, ty).apply(table, base))
    }

    /// `ty` followed by its base types, most derived first
    pub fn base_chain(&self, table: &TypeTable, ty: TypeId) -> Vec<TypeId> {
        let mut chain = vec![ty];
        let mut current = ty;
        while let Some(base) = self.base_of(table, current) {
            // Lowering rejects cycles; stop rather than spin if one slips through
            if chain.contains(&base) {
                break;
            }
            chain.push(base);
            current = base;
        }
        chain
    }

    /// Every interface `ty` implements: declared, inherited from base
    /// types and from other interfaces, substituted and de-duplicated in
    /// declaration order
    pub fn interfaces_of(&self, table: &TypeTable, ty: TypeId) -> Vec<TypeId> {
        let mut result = Vec::new();
        let mut seen = FxHashSet::default();
        for owner in self.base_chain(table, ty) {
            self.collect_interfaces(table, owner, &mut result, &mut seen);
        }
        result
    }

    fn collect_interfaces(
        &self,
        table: &TypeTable,
        ty: TypeId,
        result: &mut Vec<TypeId>,
        seen: &mut FxHashSet<TypeId>,
    ) {
        let Some(def) = self.definition_of(table, ty) else {
            return;
        };
        let subst = self.substitution(table, ty);
        for iface in &self.type_def(def).interfaces {
            let iface = subst.apply(table, *iface);
            if seen.insert(iface) {
                result.push(iface);
                self.collect_interfaces(table, iface, result, seen);
            }
        }
    }

    /// Display name of a type (`Ns.G<int, string>`, `G<,>`, `int[]`)
    pub fn display_type(&self, table: &TypeTable, ty: TypeId) -> String {
        let mut out = String::new();
        self.write_type(table, ty, &mut out);
        out
    }

    fn write_type(&self, table: &TypeTable, ty: TypeId, out: &mut String) {
        match &*table.key(ty) {
            TypeKey::Primitive(kind) => out.push_str(kind.name()),
            TypeKey::Definition(def) => {
                let def = self.type_def(*def);
                out.push_str(&def.name);
                if def.is_generic() {
                    out.push('<');
                    out.push_str(&",".repeat(def.arity() - 1));
                    out.push('>');
                }
            }
            TypeKey::Instance { def, args } => {
                out.push_str(&self.type_def(*def).name);
                out.push('<');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_type(table, *arg, out);
                }
                out.push('>');
            }
            TypeKey::Param(param) => {
                out.push_str(match param.owner {
                    ParamOwner::Type => "!",
                    ParamOwner::Method => "!!",
                });
                out.push_str(&param.index.to_string());
            }
            TypeKey::Pointer(inner) => {
                self.write_type(table, *inner, out);
                out.push('*');
            }
            TypeKey::ByRef(inner) => {
                self.write_type(table, *inner, out);
                out.push('&');
            }
            TypeKey::Array { element, rank } => {
                self.write_type(table, *element, out);
                out.push('[');
                out.push_str(&",".repeat((*rank as usize).saturating_sub(1)));
                out.push(']');
            }
            TypeKey::Canon => out.push_str("__Canon"),
        }
    }

    /// Display name of a method with its signature
    /// (`Ns.G<int>::M<string>(int, !!0)`)
    pub fn display_method(&self, table: &TypeTable, owner: TypeId, method: MethodDefId, inst: &[TypeId]) -> String {
        let def = self.method(method);
        let mut out = self.display_type(table, owner);
        out.push_str("::");
        out.push_str(&def.name);
        if !inst.is_empty() {
            out.push('<');
            let args: Vec<String> = inst.iter().map(|a| self.display_type(table, *a)).collect();
            out.push_str(&args.join(", "));
            out.push('>');
        }
        out.push('(');
        out.push_str(&self.signature(table, method));
        out.push(')');
        out
    }

    /// Comma-separated parameter list of a method definition, unsubstituted
    pub fn signature(&self, table: &TypeTable, method: MethodDefId) -> String {
        let params: Vec<String> = self
            .method(method)
            .params
            .iter()
            .map(|p| self.display_type(table, *p))
            .collect();
        params.join(", ")
    }

    /// Display name of a field (`Ns.T::Field`)
    pub fn display_field(&self, table: &TypeTable, owner: TypeId, field: FieldDefId) -> String {
        format!("{}::{}", self.display_type(table, owner), self.field(field).name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        [[types]]
        name = "App.Base"
        generic_params = ["T"]
        interfaces = ["App.IThing<T>"]

        [[types]]
        name = "App.IThing"
        kind = "interface"
        generic_params = ["T"]
        interfaces = ["App.IMarker"]

        [[types]]
        name = "App.IMarker"
        kind = "interface"

        [[types]]
        name = "App.Derived"
        base = "App.Base<string>"

        [[types]]
        name = "App.Point"
        kind = "struct"
    "#;

    #[test]
    fn test_display_names() {
        let table = TypeTable::new();
        let program = Program::from_toml_str(SOURCE, &table).unwrap();
        let base = program.lookup_type("App.Base").unwrap();
        let int = table.primitive(PrimitiveKind::I32);
        let inst = table.instance(base, vec![table.array(int, 2)]);
        assert_eq!(program.display_type(&table, inst), "App.Base<int[,]>");
        assert_eq!(program.display_type(&table, table.definition(base)), "App.Base<>");
        assert_eq!(program.display_type(&table, table.by_ref(table.pointer(int))), "int*&");
        assert_eq!(program.display_type(&table, table.canon()), "__Canon");
    }

    #[test]
    fn test_base_chain_and_interfaces_are_substituted() {
        let table = TypeTable::new();
        let program = Program::from_toml_str(SOURCE, &table).unwrap();
        let derived = table.definition(program.lookup_type("App.Derived").unwrap());
        let string = table.primitive(PrimitiveKind::String);
        let base = table.instance(program.lookup_type("App.Base").unwrap(), vec![string]);
        assert_eq!(program.base_chain(&table, derived), vec![derived, base]);

        let names: Vec<String> = program
            .interfaces_of(&table, derived)
            .into_iter()
            .map(|i| program.display_type(&table, i))
            .collect();
        assert_eq!(names, vec!["App.IThing<string>", "App.IMarker"]);
    }

    #[test]
    fn test_reference_and_value_types() {
        let table = TypeTable::new();
        let program = Program::from_toml_str(SOURCE, &table).unwrap();
        let point = table.definition(program.lookup_type("App.Point").unwrap());
        let derived = table.definition(program.lookup_type("App.Derived").unwrap());
        assert!(program.is_value_type(&table, point));
        assert!(!program.is_reference_type(&table, point));
        assert!(program.is_reference_type(&table, derived));
        assert!(program.is_reference_type(&table, table.array(point, 1)));
        assert!(program.is_reference_type(&table, table.primitive(PrimitiveKind::String)));
    }

    #[test]
    fn test_implicit_constructor() {
        let table = TypeTable::new();
        let program = Program::from_toml_str(SOURCE, &table).unwrap();
        let point = program.lookup_type("App.Point").unwrap();
        let marker = program.lookup_type("App.IMarker").unwrap();
        assert!(program.default_constructor(point).is_some());
        assert!(program.default_constructor(marker).is_none());
    }
}

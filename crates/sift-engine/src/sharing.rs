//! Generic code sharing
//!
//! Reference-type instantiations share one code body: every reference-type
//! argument is replaced by `__Canon`, and the body receives the real
//! arguments through a run-time generic context. Value-type arguments keep
//! their identity because their layout differs, unless the type's layout
//! was proven canonical.
//!
//! [`Canonicalizer`] computes these forms during the scan.
//! [`SharingResolver`] answers, at run time, which generated body backs a
//! requested instantiation.

use rustc_hash::FxHashSet;

use crate::analysis::records::MethodKey;
use crate::error::ReflectionError;
use crate::program::Program;
use crate::types::subst::Substitution;
use crate::types::{DefId, TypeId, TypeKey, TypeTable};

/// Computes canonical and universal forms of types and method keys
#[derive(Clone, Copy)]
pub struct Canonicalizer<'a> {
    program: &'a Program,
    table: &'a TypeTable,
}

impl<'a> Canonicalizer<'a> {
    /// Create a canonicalizer over a program's types
    pub fn new(program: &'a Program, table: &'a TypeTable) -> Self {
        Self { program, table }
    }

    /// Canonical form of a type used as a generic argument
    pub fn canonical_arg(&self, ty: TypeId) -> TypeId {
        if self.program.is_reference_type(self.table, ty) {
            return self.table.canon();
        }
        self.canonical_type(ty)
    }

    /// Canonical form of a type in owner position: the definition stays,
    /// its arguments are canonicalised
    pub fn canonical_type(&self, ty: TypeId) -> TypeId {
        match &*self.table.key(ty) {
            TypeKey::Instance { def, args } => {
                let args = args.iter().map(|arg| self.canonical_arg(*arg)).collect();
                self.table.instance(*def, args)
            }
            _ => ty,
        }
    }

    /// Canonical form of a method instantiation; identifies its code body
    pub fn canonical_method(&self, key: &MethodKey) -> MethodKey {
        MethodKey {
            owner: self.canonical_type(key.owner),
            method: key.method,
            inst: key.inst.iter().map(|arg| self.canonical_arg(*arg)).collect(),
        }
    }

    /// Every parameter of the definition replaced by `__Canon`
    pub fn universal_template(&self, def: DefId) -> TypeId {
        let arity = self.program.type_def(def).arity();
        if arity == 0 {
            self.table.definition(def)
        } else {
            self.table.instance(def, vec![self.table.canon(); arity])
        }
    }

    /// Fully shared form of a method instantiation
    pub fn universal_method(&self, key: &MethodKey) -> MethodKey {
        let owner = match self.table.key(key.owner).definition() {
            Some(def) => self.universal_template(def),
            None => key.owner,
        };
        let arity = self.program.method(key.method).generic_params.len();
        MethodKey {
            owner,
            method: key.method,
            inst: vec![self.table.canon(); arity],
        }
    }

    /// Whether the type is an open generic definition or still mentions a
    /// generic parameter
    pub fn is_open(&self, ty: TypeId) -> bool {
        let mut open = false;
        self.table.walk(ty, &mut |_, key| match key {
            TypeKey::Param(_) => open = true,
            TypeKey::Definition(def) if self.program.type_def(*def).is_generic() => open = true,
            _ => {}
        });
        open
    }

    /// Replace any leftover generic parameter with `__Canon`
    pub fn close(&self, ty: TypeId) -> TypeId {
        let mut params = 0u16;
        self.table.walk(ty, &mut |_, key| {
            if let TypeKey::Param(param) = key {
                params = params.max(param.index + 1);
            }
        });
        if params == 0 {
            return ty;
        }
        let canon = vec![self.table.canon(); params as usize];
        Substitution::from_args(canon.clone(), canon).apply(self.table, ty)
    }

    /// Whether a method key names a closed instantiation
    pub fn is_closed_method(&self, key: &MethodKey) -> bool {
        let arity = self.program.method(key.method).generic_params.len();
        key.inst.len() == arity && !self.is_open(key.owner) && key.inst.iter().all(|arg| !self.is_open(*arg))
    }

    /// Deepest nesting in a method key
    pub fn depth(&self, key: &MethodKey) -> usize {
        key.inst
            .iter()
            .map(|arg| self.table.depth(*arg))
            .chain(std::iter::once(self.table.depth(key.owner)))
            .max()
            .unwrap_or(0)
    }

    /// Whether a value type's layout may run the fully shared body
    pub fn has_canonical_layout(&self, ty: TypeId) -> bool {
        match &*self.table.key(ty) {
            TypeKey::Definition(def) | TypeKey::Instance { def, .. } => {
                self.program.type_def(*def).canonical_layout
            }
            // Value primitives are never laid out like a reference
            _ => false,
        }
    }
}

/// Which generated body runs an instantiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeBody {
    /// Body generated for exactly this instantiation
    Exact(MethodKey),
    /// Shared body; the real arguments travel in the generic context
    Shared {
        /// Key of the generated body
        canonical: MethodKey,
    },
}

impl CodeBody {
    /// Key of the body that runs
    pub fn key(&self) -> &MethodKey {
        match self {
            CodeBody::Exact(key) => key,
            CodeBody::Shared { canonical } => canonical,
        }
    }
}

/// Resolves instantiations to generated bodies
pub struct SharingResolver<'a> {
    program: &'a Program,
    table: &'a TypeTable,
    canon: Canonicalizer<'a>,
    bodies: &'a FxHashSet<MethodKey>,
}

impl<'a> SharingResolver<'a> {
    /// Create a resolver over the set of generated bodies
    pub fn new(program: &'a Program, table: &'a TypeTable, bodies: &'a FxHashSet<MethodKey>) -> Self {
        Self {
            program,
            table,
            canon: Canonicalizer::new(program, table),
            bodies,
        }
    }

    /// Pick the body backing `key`
    ///
    /// Exact bodies win. Otherwise the canonical body serves reference-type
    /// arguments. A value-type argument without its own body may only run
    /// the universal body when its layout was proven canonical.
    pub fn resolve(&self, key: &MethodKey) -> Result<CodeBody, ReflectionError> {
        if self.bodies.contains(key) {
            return Ok(CodeBody::Exact(key.clone()));
        }

        let canonical = self.canon.canonical_method(key);
        if self.bodies.contains(&canonical) {
            return Ok(CodeBody::Shared { canonical });
        }

        let name = self
            .program
            .display_method(self.table, key.owner, key.method, &key.inst);
        let value_args = self.value_type_args(key);
        if value_args.is_empty() {
            return Err(ReflectionError::not_supported(
                name,
                "no code body was generated for this instantiation",
            ));
        }

        let universal = self.canon.universal_method(key);
        if self.bodies.contains(&universal)
            && value_args.iter().all(|arg| self.canon.has_canonical_layout(*arg))
        {
            return Ok(CodeBody::Shared {
                canonical: universal,
            });
        }

        let culprit = self.program.display_type(self.table, value_args[0]);
        Err(ReflectionError::not_supported(
            name,
            format!("value type argument '{}' has no exact code body and cannot use shared code", culprit),
        ))
    }

    /// Value-type generic arguments of the owner and the method
    fn value_type_args(&self, key: &MethodKey) -> Vec<TypeId> {
        let owner_args = match &*self.table.key(key.owner) {
            TypeKey::Instance { args, .. } => args.clone(),
            _ => Vec::new(),
        };
        owner_args
            .into_iter()
            .chain(key.inst.iter().copied())
            .filter(|arg| self.program.is_value_type(self.table, *arg))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveKind;

    const SOURCE: &str = r#"
        [[types]]
        name = "G"
        generic_params = ["T"]
        [[types.methods]]
        name = "M"
        kind = "static"

        [[types]]
        name = "Atom"

        [[types]]
        name = "S"
        kind = "struct"
        generic_params = ["T"]

        [[types]]
        name = "Flat"
        kind = "struct"
        canonical_layout = true
    "#;

    fn setup() -> (Program, TypeTable) {
        let table = TypeTable::new();
        let program = Program::from_toml_str(SOURCE, &table).unwrap();
        (program, table)
    }

    fn key(program: &Program, table: &TypeTable, arg: TypeId) -> MethodKey {
        let g = program.lookup_type("G").unwrap();
        MethodKey {
            owner: table.instance(g, vec![arg]),
            method: program.methods_named(g, "M").next().unwrap(),
            inst: Vec::new(),
        }
    }

    #[test]
    fn test_canonical_forms() {
        let (program, table) = setup();
        let canon = Canonicalizer::new(&program, &table);
        let atom = table.definition(program.lookup_type("Atom").unwrap());
        let s = program.lookup_type("S").unwrap();
        let s_atom = table.instance(s, vec![atom]);
        let s_canon = table.instance(s, vec![table.canon()]);

        assert_eq!(canon.canonical_arg(atom), table.canon());
        assert_eq!(canon.canonical_arg(s_atom), s_canon);
        let int = table.primitive(PrimitiveKind::I32);
        assert_eq!(canon.canonical_arg(int), int);
    }

    #[test]
    fn test_reference_args_share() {
        let (program, table) = setup();
        let canon = Canonicalizer::new(&program, &table);
        let atom = table.definition(program.lookup_type("Atom").unwrap());
        let string = table.primitive(PrimitiveKind::String);
        let shared = canon.canonical_method(&key(&program, &table, atom));

        let mut bodies = FxHashSet::default();
        bodies.insert(shared.clone());
        let resolver = SharingResolver::new(&program, &table, &bodies);
        assert_eq!(
            resolver.resolve(&key(&program, &table, string)).unwrap(),
            CodeBody::Shared { canonical: shared }
        );
    }

    #[test]
    fn test_value_args_refuse_shared_body() {
        let (program, table) = setup();
        let canon = Canonicalizer::new(&program, &table);
        let universal = canon.universal_method(&key(&program, &table, table.canon()));
        let mut bodies = FxHashSet::default();
        bodies.insert(universal.clone());
        let resolver = SharingResolver::new(&program, &table, &bodies);

        let int = table.primitive(PrimitiveKind::I32);
        let err = resolver.resolve(&key(&program, &table, int)).unwrap_err();
        assert!(matches!(err, ReflectionError::NotSupported { ref name, .. } if name == "G<int>::M()"));

        let flat = table.definition(program.lookup_type("Flat").unwrap());
        assert_eq!(
            resolver.resolve(&key(&program, &table, flat)).unwrap(),
            CodeBody::Shared { canonical: universal }
        );
    }

    #[test]
    fn test_exact_body_preferred() {
        let (program, table) = setup();
        let int = table.primitive(PrimitiveKind::I32);
        let exact = key(&program, &table, int);
        let mut bodies = FxHashSet::default();
        bodies.insert(exact.clone());
        let resolver = SharingResolver::new(&program, &table, &bodies);
        assert_eq!(resolver.resolve(&exact).unwrap(), CodeBody::Exact(exact));
    }

    #[test]
    fn test_open_and_close() {
        let (program, table) = setup();
        let canon = Canonicalizer::new(&program, &table);
        let g = program.lookup_type("G").unwrap();
        assert!(canon.is_open(table.definition(g)));
        let t0 = table.param(crate::types::ParamOwner::Type, 0);
        let open = table.instance(g, vec![t0]);
        assert!(canon.is_open(open));
        assert_eq!(canon.close(open), table.instance(g, vec![table.canon()]));
    }
}

//! Override resolution
//!
//! Virtual dispatch is precomputed once per definition: for every class or
//! struct and every virtual slot visible on it (inherited class slots and
//! interface methods), the method that actually runs. The scanner then only
//! needs a map lookup when a called slot meets a constructed type.

use rustc_hash::FxHashMap;

use super::{MethodKind, Program, TypeKind};
use crate::types::{DefId, MethodDefId, TypeId, TypeTable};

/// `(definition, slot) -> implementation`
#[derive(Debug, Clone, Default)]
pub struct DispatchMap {
    impls: FxHashMap<(DefId, MethodDefId), MethodDefId>,
}

impl DispatchMap {
    /// Method that runs when `slot` is called on an instance of `def`
    pub fn resolve(&self, def: DefId, slot: MethodDefId) -> Option<MethodDefId> {
        self.impls.get(&(def, slot)).copied()
    }

    /// Number of resolved `(definition, slot)` pairs
    pub fn len(&self) -> usize {
        self.impls.len()
    }

    /// Whether nothing dispatches
    pub fn is_empty(&self) -> bool {
        self.impls.is_empty()
    }

    /// Root slot of a method: follow explicit and implicit overrides up to
    /// the method that introduced the slot
    pub fn slot_of(program: &Program, table: &TypeTable, method: MethodDefId) -> MethodDefId {
        let mut current = method;
        for _ in 0..=program.method_count() {
            match Self::overridden(program, table, current) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    /// Method `method` directly overrides, if any
    fn overridden(program: &Program, table: &TypeTable, method: MethodDefId) -> Option<MethodDefId> {
        let def = program.method(method);
        if let Some(explicit) = def.overrides {
            return Some(explicit);
        }
        if def.kind != MethodKind::Virtual && def.kind != MethodKind::Abstract {
            return None;
        }
        // Implicit override: a virtual with the same name and arity on a base
        let owner = program.type_def(def.owner);
        let mut base = owner.base;
        while let Some(base_ty) = base {
            let base_def = table.key(base_ty).definition()?;
            let found = program
                .type_def(base_def)
                .methods
                .iter()
                .copied()
                .find(|m| {
                    let candidate = program.method(*m);
                    candidate.kind.is_virtual()
                        && candidate.name == def.name
                        && candidate.params.len() == def.params.len()
                });
            if found.is_some() {
                return found;
            }
            base = program.type_def(base_def).base;
        }
        None
    }

    /// Build the map for every class and struct of `program`
    pub fn build(program: &Program, table: &TypeTable) -> Self {
        let mut impls = FxHashMap::default();
        for (def, ty) in program.types() {
            if ty.kind == TypeKind::Interface {
                continue;
            }
            let open = table.definition(def);
            let chain = program.base_chain(table, open);

            // Class slots, least derived first so overrides win
            for owner in chain.iter().rev() {
                let Some(owner_def) = table.key(*owner).definition() else {
                    continue;
                };
                for method in &program.type_def(owner_def).methods {
                    if !program.method(*method).kind.is_virtual() && program.method(*method).overrides.is_none() {
                        continue;
                    }
                    let slot = Self::slot_of(program, table, *method);
                    if program.is_interface_method(slot) {
                        continue;
                    }
                    if program.method(*method).kind.has_body() {
                        impls.insert((def, slot), *method);
                    } else {
                        impls.remove(&(def, slot));
                    }
                }
            }

            // Interface slots
            let interfaces = program.interfaces_of(table, open);
            for iface in &interfaces {
                let Some(iface_def) = table.key(*iface).definition() else {
                    continue;
                };
                for slot in &program.type_def(iface_def).methods {
                    if !program.method(*slot).kind.is_virtual() {
                        continue;
                    }
                    if let Some(found) = Self::implementation(program, table, &chain, &interfaces, *slot) {
                        impls.insert((def, *slot), found);
                    }
                }
            }
        }
        DispatchMap { impls }
    }

    /// Implementation of an interface slot on a type with the given base
    /// chain: explicit, then implicit by name and arity, then a default
    /// interface method
    fn implementation(
        program: &Program,
        table: &TypeTable,
        chain: &[TypeId],
        interfaces: &[TypeId],
        slot: MethodDefId,
    ) -> Option<MethodDefId> {
        let slot_def = program.method(slot);
        let methods_of = |ty: &TypeId| {
            table
                .key(*ty)
                .definition()
                .map(|def| program.type_def(def).methods.clone())
                .unwrap_or_default()
        };

        for owner in chain {
            let explicit = methods_of(owner)
                .into_iter()
                .find(|m| program.method(*m).overrides == Some(slot));
            if let Some(found) = explicit {
                return Some(found);
            }
        }
        for owner in chain {
            let implicit = methods_of(owner).into_iter().find(|m| {
                let candidate = program.method(*m);
                !candidate.kind.is_static()
                    && candidate.kind != MethodKind::Constructor
                    && candidate.kind.has_body()
                    && candidate.overrides.is_none()
                    && candidate.name == slot_def.name
                    && candidate.params.len() == slot_def.params.len()
            });
            if let Some(found) = implicit {
                return Some(found);
            }
        }
        // Most specific default implementation from another interface
        for iface in interfaces {
            let default = methods_of(iface).into_iter().find(|m| {
                let candidate = program.method(*m);
                candidate.overrides == Some(slot) && candidate.kind.has_body()
            });
            if let Some(found) = default {
                return Some(found);
            }
        }
        slot_def.kind.has_body().then_some(slot)
    }
}

impl Program {
    /// Whether the method is declared on an interface
    pub fn is_interface_method(&self, method: MethodDefId) -> bool {
        self.type_def(self.method(method).owner).kind == TypeKind::Interface
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        [[types]]
        name = "Animal"
        [[types.methods]]
        name = "Speak"
        kind = "abstract"
        [[types.methods]]
        name = "Eat"
        kind = "virtual"

        [[types]]
        name = "Dog"
        base = "Animal"
        interfaces = ["IPet", "IGreeter"]
        [[types.methods]]
        name = "Speak"
        kind = "virtual"
        [[types.methods]]
        name = "Pet"
        kind = "virtual"

        [[types]]
        name = "Puppy"
        base = "Dog"
        [[types.methods]]
        name = "Yip"
        kind = "virtual"
        overrides = "Animal::Speak"

        [[types]]
        name = "IPet"
        kind = "interface"
        [[types.methods]]
        name = "Pet"
        kind = "abstract"

        [[types]]
        name = "IGreeter"
        kind = "interface"
        [[types.methods]]
        name = "Greet"
        kind = "virtual"
    "#;

    fn method(program: &Program, ty: &str, name: &str) -> MethodDefId {
        let def = program.lookup_type(ty).unwrap();
        program.methods_named(def, name).next().unwrap()
    }

    #[test]
    fn test_override_chain() {
        let table = TypeTable::new();
        let program = Program::from_toml_str(SOURCE, &table).unwrap();
        let speak = method(&program, "Animal", "Speak");
        let dog = program.lookup_type("Dog").unwrap();
        let puppy = program.lookup_type("Puppy").unwrap();
        let animal = program.lookup_type("Animal").unwrap();

        assert_eq!(program.dispatch().resolve(dog, speak), Some(method(&program, "Dog", "Speak")));
        assert_eq!(program.dispatch().resolve(puppy, speak), Some(method(&program, "Puppy", "Yip")));
        // Abstract slot with no implementation on the declaring type
        assert_eq!(program.dispatch().resolve(animal, speak), None);
        // Inherited virtual
        let eat = method(&program, "Animal", "Eat");
        assert_eq!(program.dispatch().resolve(puppy, eat), Some(eat));
    }

    #[test]
    fn test_interface_slots() {
        let table = TypeTable::new();
        let program = Program::from_toml_str(SOURCE, &table).unwrap();
        let puppy = program.lookup_type("Puppy").unwrap();
        let pet = method(&program, "IPet", "Pet");
        let greet = method(&program, "IGreeter", "Greet");
        assert_eq!(program.dispatch().resolve(puppy, pet), Some(method(&program, "Dog", "Pet")));
        // Default interface method
        assert_eq!(program.dispatch().resolve(puppy, greet), Some(greet));
    }

    #[test]
    fn test_slot_of_follows_overrides() {
        let table = TypeTable::new();
        let program = Program::from_toml_str(SOURCE, &table).unwrap();
        let speak = method(&program, "Animal", "Speak");
        assert_eq!(DispatchMap::slot_of(&program, &table, method(&program, "Puppy", "Yip")), speak);
        assert_eq!(DispatchMap::slot_of(&program, &table, method(&program, "Dog", "Speak")), speak);
    }
}

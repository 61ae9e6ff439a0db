//! Reflection usage classification
//!
//! Maps a recognised reflection call site, or a dependency annotation, to
//! the escalations it implies. Classification only reads the program; the
//! scanner applies the returned escalations to the records.
//!
//! Only literal names and static tokens are followed. A lookup whose name is
//! computed at run time classifies as [`Escalation::Unresolved`] and keeps
//! nothing alive.

use super::records::{Demand, FieldKey, MemberKey, MethodKey, Usage};
use crate::program::{
    LookupIntent, MemberAccess, MemberSelector, MethodDef, MethodKind, MethodRef, Program,
    ReflectionUse,
};
use crate::sharing::Canonicalizer;
use crate::types::subst::Substitution;
use crate::types::{DefId, MethodDefId, TypeId, TypeTable};

/// One consequence of a reflection dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// Make a member reflection-visible with the given demand
    Member {
        /// Member
        key: MemberKey,
        /// Inspect or invoke
        demand: Demand,
    },
    /// Raise a type's usage, optionally to reflection-visible
    Type {
        /// Type
        ty: TypeId,
        /// Usage flags to add
        usage: Usage,
        /// Whether the type itself becomes reflection-visible
        visible: bool,
    },
    /// Keep the universal template of a generic definition available for
    /// run-time instantiation with unknown arguments
    Template {
        /// Generic definition
        definition: DefId,
    },
    /// A lookup the scan cannot follow
    Unresolved {
        /// What was looked up
        description: String,
    },
}

impl From<LookupIntent> for Demand {
    fn from(intent: LookupIntent) -> Self {
        match intent {
            LookupIntent::Inspect => Demand::INSPECT,
            LookupIntent::Invoke => Demand::INVOKE,
        }
    }
}

/// Classifies reflection uses and annotations
pub struct Classifier<'a> {
    program: &'a Program,
    table: &'a TypeTable,
    canon: Canonicalizer<'a>,
}

impl<'a> Classifier<'a> {
    /// Create a classifier
    pub fn new(program: &'a Program, table: &'a TypeTable) -> Self {
        Self {
            program,
            table,
            canon: Canonicalizer::new(program, table),
        }
    }

    /// Escalations implied by a reflection use inside a body instantiated
    /// with `subst`
    pub fn classify(&self, use_: &ReflectionUse, subst: &Substitution) -> Vec<Escalation> {
        let table = self.table;
        let mut out = Vec::new();
        match use_ {
            ReflectionUse::GetMethod { owner, name, intent } => {
                let owner = subst.apply(table, *owner);
                out.push(Self::visible(owner, Usage::NECESSARY));
                self.methods_where(owner, |_, m| m.name == *name && !is_constructor(m.kind), (*intent).into(), &mut out);
            }
            ReflectionUse::GetField { owner, name, intent } => {
                let owner = subst.apply(table, *owner);
                out.push(Self::visible(owner, Usage::NECESSARY));
                self.fields_where(owner, |field| field == name, (*intent).into(), &mut out);
            }
            ReflectionUse::GetConstructor { owner, intent } => {
                let owner = subst.apply(table, *owner);
                let usage = match intent {
                    LookupIntent::Inspect => Usage::NECESSARY,
                    LookupIntent::Invoke => Usage::NECESSARY | Usage::CONSTRUCTED,
                };
                out.push(Self::visible(owner, usage));
                self.declared_methods_where(owner, |m| m.kind == MethodKind::Constructor, (*intent).into(), &mut out);
            }
            ReflectionUse::GetType { name, target } => match target {
                Some(ty) => out.push(Self::visible(*ty, Usage::NECESSARY | Usage::TOKEN)),
                None => out.push(Escalation::Unresolved {
                    description: format!("Type.GetType(\"{}\")", name),
                }),
            },
            ReflectionUse::MakeGenericType { definition, args } => match args {
                Some(args) => {
                    let args = subst.apply_all(table, args);
                    let ty = table.instance(*definition, args);
                    out.push(Self::visible(ty, Usage::NECESSARY | Usage::TOKEN));
                }
                None => out.push(Escalation::Template {
                    definition: *definition,
                }),
            },
            ReflectionUse::MakeGenericMethod { method, args } => {
                let owner = subst.apply(table, method.owner);
                let inst = match args {
                    Some(args) => subst.apply_all(table, args),
                    // Arguments only known at run time: keep the shared form
                    None => vec![table.canon(); self.program.method(method.method).generic_params.len()],
                };
                out.push(Self::visible(owner, Usage::NECESSARY));
                out.push(Escalation::Member {
                    key: MemberKey::Method(MethodKey {
                        owner,
                        method: method.method,
                        inst,
                    }),
                    demand: Demand::INVOKE,
                });
            }
            ReflectionUse::GetAttributes { target } => {
                let target = subst.apply(table, *target);
                out.push(Self::visible(target, Usage::NECESSARY | Usage::TOKEN));
                if let Some(def) = table.key(target).definition() {
                    let attr_subst = self.program.substitution(table, target);
                    for attribute in &self.program.type_def(def).attributes {
                        let attribute = attr_subst.apply(table, *attribute);
                        // Attribute instances are materialised by the query
                        out.push(Self::visible(
                            attribute,
                            Usage::NECESSARY | Usage::TOKEN | Usage::CONSTRUCTED,
                        ));
                        self.declared_methods_where(
                            attribute,
                            |m| m.kind == MethodKind::Constructor,
                            Demand::INVOKE,
                            &mut out,
                        );
                    }
                }
            }
            ReflectionUse::CreateDelegate { target } | ReflectionUse::Invoke { target } => {
                let key = self.method_key(target, subst);
                out.push(Self::visible(key.owner, Usage::NECESSARY));
                out.push(Escalation::Member {
                    key: MemberKey::Method(key),
                    demand: Demand::INVOKE,
                });
            }
            ReflectionUse::Activate { target } => {
                let target = subst.apply(table, *target);
                out.push(Self::visible(
                    target,
                    Usage::NECESSARY | Usage::CONSTRUCTED | Usage::ACTIVATED,
                ));
                if let Some(def) = table.key(target).definition() {
                    if let Some(ctor) = self.program.default_constructor(def) {
                        out.push(Escalation::Member {
                            key: MemberKey::Method(MethodKey {
                                owner: target,
                                method: ctor,
                                inst: Vec::new(),
                            }),
                            demand: Demand::INVOKE,
                        });
                    }
                }
            }
            ReflectionUse::RunClassConstructor { target } => {
                let target = subst.apply(table, *target);
                out.push(Self::visible(
                    target,
                    Usage::NECESSARY | Usage::TOKEN | Usage::STATIC_BASE,
                ));
            }
            ReflectionUse::DynamicLookup { description } => out.push(Escalation::Unresolved {
                description: description.clone(),
            }),
        }
        out
    }

    /// Escalations implied by "keep `access` on `target`"
    pub fn annotation(&self, target: TypeId, access: &MemberAccess) -> Vec<Escalation> {
        let mut out = Vec::new();
        let demand: Demand = access.intent.into();
        let invoke_ctors = access.intent == LookupIntent::Invoke
            && matches!(access.members, MemberSelector::Constructors | MemberSelector::All);
        let mut usage = Usage::NECESSARY | Usage::TOKEN;
        if invoke_ctors {
            usage |= Usage::CONSTRUCTED;
        }
        if matches!(access.members, MemberSelector::StaticConstructor | MemberSelector::All) {
            usage |= Usage::STATIC_BASE;
        }
        out.push(Self::visible(target, usage));

        match &access.members {
            MemberSelector::Named(name) => {
                self.methods_where(target, |_, m| m.name == *name, demand, &mut out);
                self.fields_where(target, |field| field == name, demand, &mut out);
            }
            MemberSelector::Methods => {
                self.methods_where(target, |_, m| !is_constructor(m.kind), demand, &mut out)
            }
            MemberSelector::Fields => self.fields_where(target, |_| true, demand, &mut out),
            MemberSelector::Constructors => self.declared_methods_where(
                target,
                |m| m.kind == MethodKind::Constructor,
                demand,
                &mut out,
            ),
            MemberSelector::StaticConstructor => self.declared_methods_where(
                target,
                |m| m.kind == MethodKind::StaticConstructor,
                demand,
                &mut out,
            ),
            MemberSelector::All => {
                self.methods_where(target, |_, m| !is_constructor(m.kind), demand, &mut out);
                self.declared_methods_where(target, |m| is_constructor(m.kind), demand, &mut out);
                self.fields_where(target, |_| true, demand, &mut out);
            }
        }
        out
    }

    fn visible(ty: TypeId, usage: Usage) -> Escalation {
        Escalation::Type {
            ty,
            usage,
            visible: true,
        }
    }

    fn method_key(&self, target: &MethodRef, subst: &Substitution) -> MethodKey {
        MethodKey {
            owner: subst.apply(self.table, target.owner),
            method: target.method,
            inst: subst.apply_all(self.table, &target.inst),
        }
    }

    /// Methods matching `filter` on `owner` and its base types
    fn methods_where(
        &self,
        owner: TypeId,
        filter: impl Fn(MethodDefId, &MethodDef) -> bool,
        demand: Demand,
        out: &mut Vec<Escalation>,
    ) {
        for ty in self.program.base_chain(self.table, owner) {
            let Some(def) = self.table.key(ty).definition() else {
                break;
            };
            for method in &self.program.type_def(def).methods {
                let method_def = self.program.method(*method);
                if filter(*method, method_def) {
                    out.push(Escalation::Member {
                        key: MemberKey::Method(self.open_method(ty, *method)),
                        demand,
                    });
                }
            }
        }
    }

    /// Methods matching `filter` declared on `owner` itself
    fn declared_methods_where(
        &self,
        owner: TypeId,
        filter: impl Fn(&MethodDef) -> bool,
        demand: Demand,
        out: &mut Vec<Escalation>,
    ) {
        let Some(def) = self.table.key(owner).definition() else {
            return;
        };
        for method in &self.program.type_def(def).methods {
            if filter(self.program.method(*method)) {
                out.push(Escalation::Member {
                    key: MemberKey::Method(self.open_method(owner, *method)),
                    demand,
                });
            }
        }
    }

    /// Fields whose name matches `filter` on `owner` and its base types
    fn fields_where(
        &self,
        owner: TypeId,
        filter: impl Fn(&str) -> bool,
        demand: Demand,
        out: &mut Vec<Escalation>,
    ) {
        for ty in self.program.base_chain(self.table, owner) {
            let Some(def) = self.table.key(ty).definition() else {
                break;
            };
            for field in &self.program.type_def(def).fields {
                if filter(&self.program.field(*field).name) {
                    out.push(Escalation::Member {
                        key: MemberKey::Field(FieldKey {
                            owner: ty,
                            field: *field,
                        }),
                        demand,
                    });
                }
            }
        }
    }

    /// A generic method found by name has no arguments yet; it is kept in
    /// its fully shared form
    fn open_method(&self, owner: TypeId, method: MethodDefId) -> MethodKey {
        let arity = self.program.method(method).generic_params.len();
        let key = MethodKey {
            owner,
            method,
            inst: Vec::new(),
        };
        if arity == 0 {
            key
        } else {
            MethodKey {
                owner,
                method,
                inst: self.canon.universal_method(&key).inst,
            }
        }
    }
}

fn is_constructor(kind: MethodKind) -> bool {
    matches!(kind, MethodKind::Constructor | MethodKind::StaticConstructor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        [[types]]
        name = "Base"
        [[types.fields]]
        name = "Shared"
        type = "int"
        [[types.methods]]
        name = "Frob"

        [[types]]
        name = "Thing"
        base = "Base"
        attributes = ["Marker"]
        [[types.fields]]
        name = "Value"
        type = "string"
        [[types.methods]]
        name = "Frob"
        params = ["int"]
        returns = "string"
        [[types.methods]]
        name = "Make"
        kind = "static"
        generic_params = ["T"]

        [[types]]
        name = "Marker"
    "#;

    fn setup() -> (Program, TypeTable) {
        let table = TypeTable::new();
        let program = Program::from_toml_str(SOURCE, &table).unwrap();
        (program, table)
    }

    fn member_count(escalations: &[Escalation]) -> usize {
        escalations
            .iter()
            .filter(|e| matches!(e, Escalation::Member { .. }))
            .count()
    }

    #[test]
    fn test_get_method_finds_inherited_overloads() {
        let (program, table) = setup();
        let classifier = Classifier::new(&program, &table);
        let thing = table.definition(program.lookup_type("Thing").unwrap());
        let escalations = classifier.classify(
            &ReflectionUse::GetMethod {
                owner: thing,
                name: "Frob".to_string(),
                intent: LookupIntent::Invoke,
            },
            &Substitution::new(),
        );
        assert_eq!(member_count(&escalations), 2);
        assert!(escalations.contains(&Escalation::Type {
            ty: thing,
            usage: Usage::NECESSARY,
            visible: true
        }));
        assert!(escalations
            .iter()
            .all(|e| !matches!(e, Escalation::Member { demand, .. } if *demand != Demand::INVOKE)));
    }

    #[test]
    fn test_generic_method_by_name_is_shared_form() {
        let (program, table) = setup();
        let classifier = Classifier::new(&program, &table);
        let thing = table.definition(program.lookup_type("Thing").unwrap());
        let escalations = classifier.classify(
            &ReflectionUse::GetMethod {
                owner: thing,
                name: "Make".to_string(),
                intent: LookupIntent::Inspect,
            },
            &Substitution::new(),
        );
        let key = escalations.iter().find_map(|e| match e {
            Escalation::Member {
                key: MemberKey::Method(key),
                ..
            } => Some(key.clone()),
            _ => None,
        });
        assert_eq!(key.unwrap().inst, vec![table.canon()]);
    }

    #[test]
    fn test_dynamic_lookup_is_unresolved() {
        let (program, table) = setup();
        let classifier = Classifier::new(&program, &table);
        let escalations = classifier.classify(
            &ReflectionUse::DynamicLookup {
                description: "GetMethod(name + suffix)".to_string(),
            },
            &Substitution::new(),
        );
        assert_eq!(
            escalations,
            vec![Escalation::Unresolved {
                description: "GetMethod(name + suffix)".to_string()
            }]
        );
    }

    #[test]
    fn test_field_annotation_selects_inherited_fields() {
        let (program, table) = setup();
        let classifier = Classifier::new(&program, &table);
        let thing = table.definition(program.lookup_type("Thing").unwrap());
        let escalations = classifier.annotation(
            thing,
            &MemberAccess {
                members: MemberSelector::Fields,
                intent: LookupIntent::Inspect,
            },
        );
        assert_eq!(member_count(&escalations), 2);
    }

    #[test]
    fn test_attribute_query_constructs_attributes() {
        let (program, table) = setup();
        let classifier = Classifier::new(&program, &table);
        let thing = table.definition(program.lookup_type("Thing").unwrap());
        let marker = table.definition(program.lookup_type("Marker").unwrap());
        let escalations = classifier.classify(&ReflectionUse::GetAttributes { target: thing }, &Substitution::new());
        assert!(escalations.iter().any(|e| matches!(
            e,
            Escalation::Type { ty, usage, .. } if *ty == marker && usage.contains(Usage::CONSTRUCTED)
        )));
        // Implicit constructor of the attribute
        assert_eq!(member_count(&escalations), 1);
    }

    #[test]
    fn test_make_generic_type_with_runtime_args() {
        let (program, table) = setup();
        let classifier = Classifier::new(&program, &table);
        let base = program.lookup_type("Base").unwrap();
        let escalations = classifier.classify(
            &ReflectionUse::MakeGenericType {
                definition: base,
                args: None,
            },
            &Substitution::new(),
        );
        assert_eq!(escalations, vec![Escalation::Template { definition: base }]);
    }
}

//! Static call-graph scanner
//!
//! The scanner turns work items into record updates and further work
//! items. It walks method bodies, follows direct calls and allocations,
//! joins virtual call slots with constructed types, and applies the
//! escalations the [`Classifier`] derives from reflection call sites.
//!
//! Every method the scanner reaches is first bounded: leftover generic
//! parameters and open definitions become `__Canon`, and instantiations
//! nested deeper than `max_generic_depth` collapse to their universal form.
//! That keeps the set of keys finite for recursive generics.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashSet;
use parking_lot::Mutex;
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use tracing::{debug, trace};

use super::classify::{Classifier, Escalation};
use super::records::{Accretion, Demand, FieldKey, MemberKey, MethodKey, Reachability, Usage};
use crate::config::{ReflectionMode, RetentionConfig};
use crate::error::{AnalysisError, AnalysisResult};
use crate::program::{
    DependencyCondition, DispatchMap, MemberAccess, MethodKind, MethodRef, Program, Reference,
};
use crate::sharing::Canonicalizer;
use crate::types::subst::Substitution;
use crate::types::{DefId, MethodDefId, TypeId, TypeKey, TypeTable};

/// Unit of scanning work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// Scan the body of a newly reached method
    Scan(MethodKey),
    /// A type became constructed
    Constructed(TypeId),
    /// A type was discovered for the first time
    Discovered(TypeId),
}

/// Counters updated while scanning
#[derive(Debug, Default)]
pub struct ScanCounters {
    /// Method bodies scanned
    pub bodies: AtomicUsize,
    /// Members escalated to reflection-visible
    pub escalations: AtomicUsize,
    /// Virtual slots resolved against constructed types
    pub dispatches: AtomicUsize,
    /// Reflection lookups that could not be followed
    pub unresolved: AtomicUsize,
}

/// Two-key join state: called slots against constructed types
#[derive(Default)]
struct JoinState {
    constructed: Vec<TypeId>,
    slots: FxHashSet<(MethodDefId, Vec<TypeId>)>,
    slot_list: Vec<(MethodDefId, Vec<TypeId>)>,
    castable: Vec<TypeId>,
    cast_interfaces: FxHashSet<TypeId>,
}

/// Scanner shared by all workers
pub struct Scanner<'a> {
    program: &'a Program,
    table: &'a TypeTable,
    config: &'a RetentionConfig,
    records: &'a Accretion,
    canon: Canonicalizer<'a>,
    classifier: Classifier<'a>,
    join: Mutex<JoinState>,
    type_conditions: FxHashMap<DefId, Vec<usize>>,
    method_conditions: FxHashMap<MethodDefId, Vec<usize>>,
    fired: DashSet<usize, FxBuildHasher>,
    /// Slot -> interface methods with a body that implement it
    interface_defaults: FxHashMap<MethodDefId, Vec<MethodDefId>>,
    /// Progress counters
    pub counters: ScanCounters,
}

impl<'a> Scanner<'a> {
    /// Create a scanner writing into `records`
    pub fn new(
        program: &'a Program,
        table: &'a TypeTable,
        config: &'a RetentionConfig,
        records: &'a Accretion,
    ) -> Self {
        let mut type_conditions: FxHashMap<DefId, Vec<usize>> = FxHashMap::default();
        let mut method_conditions: FxHashMap<MethodDefId, Vec<usize>> = FxHashMap::default();
        for (index, dependency) in program.dependencies().iter().enumerate() {
            match dependency.when {
                DependencyCondition::Always => {}
                DependencyCondition::TypeReachable(def) => {
                    type_conditions.entry(def).or_default().push(index)
                }
                DependencyCondition::MethodReachable(method) => {
                    method_conditions.entry(method).or_default().push(index)
                }
            }
        }

        let mut interface_defaults: FxHashMap<MethodDefId, Vec<MethodDefId>> = FxHashMap::default();
        for (_, ty) in program.types() {
            for method in &ty.methods {
                if program.is_interface_method(*method) && program.method(*method).kind == MethodKind::Virtual {
                    let slot = DispatchMap::slot_of(program, table, *method);
                    interface_defaults.entry(slot).or_default().push(*method);
                }
            }
        }

        Self {
            program,
            table,
            config,
            records,
            canon: Canonicalizer::new(program, table),
            classifier: Classifier::new(program, table),
            join: Mutex::new(JoinState::default()),
            type_conditions,
            method_conditions,
            fired: DashSet::with_hasher(FxBuildHasher),
            interface_defaults,
            counters: ScanCounters::default(),
        }
    }

    /// Initial work: entry points, explicit roots and unconditional
    /// dependencies
    pub fn seed(&self) -> AnalysisResult<Vec<WorkItem>> {
        let mut out = Vec::new();
        for root in self.program.entry_points().iter().chain(self.program.roots()) {
            let key = Self::key_of(root);
            if !self.canon.is_closed_method(&key) {
                return Err(AnalysisError::OpenRoot {
                    name: self.display(&key),
                });
            }
            debug!(root = %self.display(&key), "seeding root");
            self.call_target(key, &mut out);
        }
        for (index, dependency) in self.program.dependencies().iter().enumerate() {
            if dependency.when == DependencyCondition::Always {
                self.fire(index, &mut out);
            }
        }
        Ok(out)
    }

    /// Process one work item, pushing follow-up work into `out`
    pub fn process(&self, item: WorkItem, out: &mut Vec<WorkItem>) {
        match item {
            WorkItem::Scan(key) => self.scan(&key, out),
            WorkItem::Constructed(ty) => self.on_constructed(ty, out),
            WorkItem::Discovered(ty) => self.on_discovered(ty, out),
        }
    }

    fn key_of(method: &MethodRef) -> MethodKey {
        MethodKey {
            owner: method.owner,
            method: method.method,
            inst: method.inst.clone(),
        }
    }

    fn display(&self, key: &MethodKey) -> String {
        self.program
            .display_method(self.table, key.owner, key.method, &key.inst)
    }

    fn scan(&self, key: &MethodKey, out: &mut Vec<WorkItem>) {
        let method = self.program.method(key.method);
        self.counters.bodies.fetch_add(1, Ordering::Relaxed);
        trace!(method = %self.display(key), "scanning body");

        let subst = Substitution::for_owner(self.table, key.owner, &key.inst);
        for ty in method.params.iter().chain(std::iter::once(&method.returns)) {
            self.raise_type(subst.apply(self.table, *ty), Reachability::CodeReachable, Usage::empty(), out);
        }
        for (param, arg) in method.generic_params.iter().zip(&key.inst) {
            if let Some(access) = &param.accessed {
                self.annotate(*arg, access, out);
            }
        }
        for dependency in &method.dependencies {
            self.annotate(subst.apply(self.table, dependency.target), &dependency.access, out);
        }

        if !method.kind.has_body() {
            return;
        }
        self.records.compile_body(self.canon.canonical_method(key));
        for reference in &method.body {
            self.handle_reference(reference, &subst, out);
        }
    }

    fn handle_reference(&self, reference: &Reference, subst: &Substitution, out: &mut Vec<WorkItem>) {
        let table = self.table;
        match reference {
            Reference::Call(target) => self.call_target(self.instantiate(target, subst), out),
            Reference::CallVirtual(target) => self.virtual_call(self.instantiate(target, subst), out),
            Reference::New { ty, ctor } => {
                let ty = self.bound_type(subst.apply(table, *ty));
                self.raise_type(ty, Reachability::CodeReachable, Usage::NECESSARY | Usage::CONSTRUCTED, out);
                if let Some(ctor) = ctor {
                    self.reach_method(
                        MethodKey {
                            owner: ty,
                            method: *ctor,
                            inst: Vec::new(),
                        },
                        out,
                    );
                }
            }
            Reference::Box(ty) => self.raise_type(
                subst.apply(table, *ty),
                Reachability::CodeReachable,
                Usage::NECESSARY | Usage::CONSTRUCTED,
                out,
            ),
            Reference::TypeToken(ty) => self.raise_type(
                subst.apply(table, *ty),
                Reachability::CodeReachable,
                Usage::NECESSARY | Usage::TOKEN,
                out,
            ),
            Reference::Cast(ty) => {
                let ty = self.bound_type(subst.apply(table, *ty));
                self.raise_type(ty, Reachability::CodeReachable, Usage::NECESSARY, out);
                if self.program.is_interface(table, ty) {
                    self.cast_interface(ty, out);
                }
            }
            Reference::LoadField(field) | Reference::StoreField(field) => self.reach_field(
                FieldKey {
                    owner: subst.apply(table, field.owner),
                    field: field.field,
                },
                out,
            ),
            Reference::LoadFunction(target) => {
                let key = self.instantiate(target, subst);
                if self.program.method(key.method).kind.is_virtual() {
                    self.virtual_call(key, out);
                } else {
                    self.call_target(key, out);
                }
            }
            Reference::Reflection(use_) => {
                for escalation in self.classifier.classify(use_, subst) {
                    self.apply(escalation, out);
                }
            }
        }
    }

    fn instantiate(&self, target: &MethodRef, subst: &Substitution) -> MethodKey {
        MethodKey {
            owner: subst.apply(self.table, target.owner),
            method: target.method,
            inst: subst.apply_all(self.table, &target.inst),
        }
    }

    /// Direct call: the owner is needed as a static base or a receiver type
    fn call_target(&self, key: MethodKey, out: &mut Vec<WorkItem>) {
        let key = self.bound_method(key);
        let usage = if self.program.method(key.method).kind.is_static() {
            Usage::STATIC_BASE
        } else {
            Usage::NECESSARY
        };
        self.raise_type(key.owner, Reachability::CodeReachable, usage, out);
        self.reach_method(key, out);
    }

    fn reach_method(&self, key: MethodKey, out: &mut Vec<WorkItem>) {
        let key = self.bound_method(key);
        self.raise_method(key.clone(), Reachability::CodeReachable, Demand::empty(), out);
        if self.config.mode == ReflectionMode::FromUsage {
            self.escalate_member(MemberKey::Method(key), Demand::INVOKE, out);
        }
    }

    fn raise_method(&self, key: MethodKey, reach: Reachability, demand: Demand, out: &mut Vec<WorkItem>) -> bool {
        let raised = self
            .records
            .raise_member(MemberKey::Method(key.clone()), reach, demand);
        if raised.newly_reached() {
            if let Some(indices) = self.method_conditions.get(&key.method) {
                for index in indices {
                    self.fire(*index, out);
                }
            }
            out.push(WorkItem::Scan(key));
        }
        raised.changed()
    }

    fn reach_field(&self, key: FieldKey, out: &mut Vec<WorkItem>) {
        let key = FieldKey {
            owner: self.bound_type(key.owner),
            field: key.field,
        };
        let field = self.program.field(key.field);
        let usage = if field.is_static {
            Usage::STATIC_BASE
        } else {
            Usage::NECESSARY
        };
        self.raise_type(key.owner, Reachability::CodeReachable, usage, out);
        let subst = self.program.substitution(self.table, key.owner);
        self.raise_type(subst.apply(self.table, field.ty), Reachability::CodeReachable, Usage::empty(), out);
        self.records
            .raise_member(MemberKey::Field(key), Reachability::CodeReachable, Demand::empty());
        if self.config.mode == ReflectionMode::FromUsage {
            self.escalate_member(MemberKey::Field(key), Demand::INVOKE, out);
        }
    }

    /// Make a member reflection-visible along with what its metadata
    /// mentions: the declaring type, and the signature types at
    /// necessary-only level
    fn escalate_member(&self, member: MemberKey, demand: Demand, out: &mut Vec<WorkItem>) {
        match member {
            MemberKey::Method(key) => {
                let key = self.bound_method(key);
                if !self.raise_method(key.clone(), Reachability::ReflectionVisible, demand, out) {
                    return;
                }
                self.counters.escalations.fetch_add(1, Ordering::Relaxed);
                debug!(method = %self.display(&key), ?demand, "escalated");

                let method = self.program.method(key.method);
                let mut owner_usage = Usage::NECESSARY;
                if method.kind.is_static() {
                    owner_usage |= Usage::STATIC_BASE;
                }
                if method.kind == MethodKind::Constructor && demand.contains(Demand::INVOKE) {
                    owner_usage |= Usage::CONSTRUCTED;
                }
                self.raise_type(key.owner, Reachability::ReflectionVisible, owner_usage, out);

                let subst = Substitution::for_owner(self.table, key.owner, &key.inst);
                for ty in method.params.iter().chain(std::iter::once(&method.returns)) {
                    self.raise_type(subst.apply(self.table, *ty), Reachability::CodeReachable, Usage::NECESSARY, out);
                }
            }
            MemberKey::Field(key) => {
                let key = FieldKey {
                    owner: self.bound_type(key.owner),
                    field: key.field,
                };
                let raised = self
                    .records
                    .raise_member(MemberKey::Field(key), Reachability::ReflectionVisible, demand);
                if !raised.changed() {
                    return;
                }
                self.counters.escalations.fetch_add(1, Ordering::Relaxed);
                let field = self.program.field(key.field);
                debug!(field = %self.program.display_field(self.table, key.owner, key.field), ?demand, "escalated");

                let mut owner_usage = Usage::NECESSARY;
                if field.is_static {
                    owner_usage |= Usage::STATIC_BASE;
                }
                self.raise_type(key.owner, Reachability::ReflectionVisible, owner_usage, out);
                let subst = self.program.substitution(self.table, key.owner);
                self.raise_type(subst.apply(self.table, field.ty), Reachability::CodeReachable, Usage::NECESSARY, out);
            }
        }
    }

    /// Join a type record and react to what changed
    fn raise_type(&self, ty: TypeId, reach: Reachability, usage: Usage, out: &mut Vec<WorkItem>) {
        let ty = self.bound_type(ty);
        self.table.walk(ty, &mut |_, key| {
            if let Some(def) = key.definition() {
                self.records.reference_definition(def);
            }
        });

        let raised = self.records.raise_type(ty, reach, usage);
        if !raised.changed() {
            return;
        }
        if raised.newly_reached() {
            out.push(WorkItem::Discovered(ty));
        }

        let added = raised.added();
        if added.contains(Usage::CONSTRUCTED) {
            out.push(WorkItem::Constructed(ty));
        }
        if added.contains(Usage::STATIC_BASE) {
            if let Some(cctor) = self
                .table
                .key(ty)
                .definition()
                .and_then(|def| self.program.static_constructor(def))
            {
                self.reach_method(
                    MethodKey {
                        owner: ty,
                        method: cctor,
                        inst: Vec::new(),
                    },
                    out,
                );
            }
        }
        if added.contains(Usage::TOKEN) {
            // A token on T*, T& or T[] keeps the element type loadable
            match &*self.table.key(ty) {
                TypeKey::Pointer(inner) | TypeKey::ByRef(inner) => {
                    self.raise_type(*inner, Reachability::CodeReachable, Usage::NECESSARY | Usage::TOKEN, out)
                }
                TypeKey::Array { element, .. } => {
                    self.raise_type(*element, Reachability::CodeReachable, Usage::NECESSARY | Usage::TOKEN, out)
                }
                _ => {}
            }
        }
    }

    fn virtual_call(&self, key: MethodKey, out: &mut Vec<WorkItem>) {
        let key = self.bound_method(key);
        let slot = DispatchMap::slot_of(self.program, self.table, key.method);
        self.raise_type(key.owner, Reachability::CodeReachable, Usage::NECESSARY, out);
        if self.program.is_interface(self.table, key.owner) {
            self.cast_interface(key.owner, out);
        }

        let pair = (slot, key.inst.clone());
        let (constructed, castable) = {
            let mut join = self.join.lock();
            if !join.slots.insert(pair.clone()) {
                return;
            }
            join.slot_list.push(pair);
            (join.constructed.clone(), !join.castable.is_empty())
        };
        trace!(slot = %slot, receivers = constructed.len(), "virtual slot called");
        for ty in constructed {
            self.dispatch(ty, slot, &key.inst, out);
        }
        if castable {
            self.dispatch_dynamic(slot, &key.inst, out);
        }
    }

    fn on_constructed(&self, ty: TypeId, out: &mut Vec<WorkItem>) {
        let hooks = self
            .table
            .key(ty)
            .definition()
            .and_then(|def| self.program.type_def(def).dynamic_castable);

        let (slots, cast_interfaces) = {
            let mut join = self.join.lock();
            join.constructed.push(ty);
            if hooks.is_some() {
                join.castable.push(ty);
            }
            let interfaces: Vec<TypeId> = if hooks.is_some() {
                join.cast_interfaces.iter().copied().collect()
            } else {
                Vec::new()
            };
            (join.slot_list.clone(), interfaces)
        };

        for (slot, inst) in &slots {
            self.dispatch(ty, *slot, inst, out);
        }

        if let Some(hooks) = hooks {
            debug!(ty = %self.program.display_type(self.table, ty), "dynamic interface castable type constructed");
            for hook in [hooks.resolve_implementation, hooks.is_interface_implemented] {
                self.call_target(
                    MethodKey {
                        owner: ty,
                        method: hook,
                        inst: Vec::new(),
                    },
                    out,
                );
            }
            for iface in cast_interfaces {
                self.expose_interface(iface, out);
            }
            for (slot, inst) in &slots {
                if self.program.is_interface_method(*slot) {
                    self.dispatch_dynamic(*slot, inst, out);
                }
            }
        }
    }

    /// Resolve `slot` on a constructed type through the dispatch map
    fn dispatch(&self, ty: TypeId, slot: MethodDefId, inst: &[TypeId], out: &mut Vec<WorkItem>) {
        let Some(def) = self.table.key(ty).definition() else {
            return;
        };
        let Some(implementation) = self.program.dispatch().resolve(def, slot) else {
            return;
        };
        let impl_def = self.program.method(implementation).owner;
        let candidates = if self.program.is_interface_method(implementation) {
            self.program.interfaces_of(self.table, ty)
        } else {
            self.program.base_chain(self.table, ty)
        };
        let Some(owner) = candidates
            .into_iter()
            .find(|candidate| self.table.key(*candidate).definition() == Some(impl_def))
        else {
            return;
        };
        self.counters.dispatches.fetch_add(1, Ordering::Relaxed);
        self.reach_method(
            MethodKey {
                owner,
                method: implementation,
                inst: inst.to_vec(),
            },
            out,
        );
    }

    /// Interface calls on a dynamically castable object may land in any
    /// interface default implementation of the slot
    fn dispatch_dynamic(&self, slot: MethodDefId, inst: &[TypeId], out: &mut Vec<WorkItem>) {
        let Some(defaults) = self.interface_defaults.get(&slot) else {
            return;
        };
        for method in defaults {
            let owner = self.canon.universal_template(self.program.method(*method).owner);
            self.reach_method(
                MethodKey {
                    owner,
                    method: *method,
                    inst: inst.to_vec(),
                },
                out,
            );
        }
    }

    fn cast_interface(&self, iface: TypeId, out: &mut Vec<WorkItem>) {
        let expose = {
            let mut join = self.join.lock();
            join.cast_interfaces.insert(iface) && !join.castable.is_empty()
        };
        if expose {
            self.expose_interface(iface, out);
        }
    }

    /// An interface a castable object may be asked about needs a handle,
    /// and its attributes are inspected by the castable implementation
    fn expose_interface(&self, iface: TypeId, out: &mut Vec<WorkItem>) {
        self.raise_type(iface, Reachability::ReflectionVisible, Usage::NECESSARY | Usage::TOKEN, out);
        let Some(def) = self.table.key(iface).definition() else {
            return;
        };
        let subst = self.program.substitution(self.table, iface);
        for attribute in &self.program.type_def(def).attributes {
            self.raise_type(
                subst.apply(self.table, *attribute),
                Reachability::ReflectionVisible,
                Usage::NECESSARY | Usage::TOKEN,
                out,
            );
        }
    }

    fn on_discovered(&self, ty: TypeId, out: &mut Vec<WorkItem>) {
        let key = self.table.key(ty);
        let Some(def) = key.definition() else {
            return;
        };
        if let Some(indices) = self.type_conditions.get(&def) {
            for index in indices {
                self.fire(*index, out);
            }
        }
        if let TypeKey::Instance { args, .. } = &*key {
            for (param, arg) in self.program.type_def(def).generic_params.iter().zip(args) {
                if let Some(access) = &param.accessed {
                    self.annotate(*arg, access, out);
                }
            }
        }
    }

    fn fire(&self, index: usize, out: &mut Vec<WorkItem>) {
        if !self.fired.insert(index) {
            return;
        }
        let dependency = &self.program.dependencies()[index];
        debug!(
            target_type = %self.program.display_type(self.table, dependency.then.target),
            "dependency fired"
        );
        self.annotate(dependency.then.target, &dependency.then.access, out);
    }

    fn annotate(&self, target: TypeId, access: &MemberAccess, out: &mut Vec<WorkItem>) {
        // Shared code does not know the argument
        if target == self.table.canon() || self.canon.is_open(target) {
            return;
        }
        for escalation in self.classifier.annotation(target, access) {
            self.apply(escalation, out);
        }
    }

    fn apply(&self, escalation: Escalation, out: &mut Vec<WorkItem>) {
        match escalation {
            Escalation::Member { key, demand } => self.escalate_member(key, demand, out),
            Escalation::Type { ty, usage, visible } => {
                let reach = if visible {
                    Reachability::ReflectionVisible
                } else {
                    Reachability::CodeReachable
                };
                self.raise_type(ty, reach, usage, out);
            }
            Escalation::Template { definition } => {
                let template = self.canon.universal_template(definition);
                self.records.add_template(template);
                self.raise_type(
                    template,
                    Reachability::ReflectionVisible,
                    Usage::NECESSARY | Usage::TOKEN,
                    out,
                );
            }
            Escalation::Unresolved { description } => {
                self.counters.unresolved.fetch_add(1, Ordering::Relaxed);
                debug!(%description, "reflection target computed at run time, not followed");
                self.records.note_unresolved(&description);
            }
        }
    }

    /// Closed, finitely nested form of a type
    fn bound_type(&self, ty: TypeId) -> TypeId {
        let ty = self.canon.close(ty);
        if self.table.depth(ty) > self.config.max_generic_depth {
            if let Some(def) = self.table.key(ty).definition() {
                return self.canon.universal_template(def);
            }
        }
        ty
    }

    /// Closed, finitely nested form of a method instantiation
    fn bound_method(&self, key: MethodKey) -> MethodKey {
        let mut owner = self.canon.close(key.owner);
        if let TypeKey::Definition(def) = &*self.table.key(owner) {
            if self.program.type_def(*def).is_generic() {
                owner = self.canon.universal_template(*def);
            }
        }
        let arity = self.program.method(key.method).generic_params.len();
        let inst = if key.inst.len() == arity {
            key.inst.iter().map(|arg| self.canon.close(*arg)).collect()
        } else {
            vec![self.table.canon(); arity]
        };
        let bounded = MethodKey {
            owner,
            method: key.method,
            inst,
        };
        if self.canon.depth(&bounded) > self.config.max_generic_depth {
            trace!(method = %self.display(&bounded), "generic depth exceeded, scanning shared form");
            return self.canon.universal_method(&bounded);
        }
        bounded
    }
}

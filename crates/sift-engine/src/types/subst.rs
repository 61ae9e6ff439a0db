//! Generic parameter substitution
//!
//! Replaces `!n` and `!!n` parameters with the arguments of a concrete
//! instantiation. Substitution is what turns a definition's signatures,
//! base types and body references into the types a particular
//! instantiation actually touches.

use super::{ParamOwner, TypeId, TypeKey, TypeTable};

/// Maps formal generic parameters to type arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    /// Arguments for the declaring type's parameters (`!n`)
    type_args: Vec<TypeId>,
    /// Arguments for the method's own parameters (`!!n`)
    method_args: Vec<TypeId>,
}

impl Substitution {
    /// Create an empty (identity) substitution
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a substitution from explicit argument lists
    pub fn from_args(type_args: Vec<TypeId>, method_args: Vec<TypeId>) -> Self {
        Self {
            type_args,
            method_args,
        }
    }

    /// Substitution for code running inside `owner`, instantiated with the
    /// method arguments `inst`
    ///
    /// The type arguments are read off the owner's key; a non-generic or
    /// open owner contributes none, leaving `!n` untouched.
    pub fn for_owner(table: &TypeTable, owner: TypeId, inst: &[TypeId]) -> Self {
        let type_args = match &*table.key(owner) {
            TypeKey::Instance { args, .. } => args.clone(),
            _ => Vec::new(),
        };
        Self {
            type_args,
            method_args: inst.to_vec(),
        }
    }

    /// Type arguments
    pub fn type_args(&self) -> &[TypeId] {
        &self.type_args
    }

    /// Method arguments
    pub fn method_args(&self) -> &[TypeId] {
        &self.method_args
    }

    /// Whether applying this substitution can change anything
    pub fn is_identity(&self) -> bool {
        self.type_args.is_empty() && self.method_args.is_empty()
    }

    /// Apply the substitution to a type, interning any new keys
    pub fn apply(&self, table: &TypeTable, ty: TypeId) -> TypeId {
        if self.is_identity() {
            return ty;
        }
        let key = table.key(ty);
        match &*key {
            TypeKey::Param(param) => {
                let args = match param.owner {
                    ParamOwner::Type => &self.type_args,
                    ParamOwner::Method => &self.method_args,
                };
                args.get(param.index as usize).copied().unwrap_or(ty)
            }
            TypeKey::Instance { def, args } => {
                let substituted: Vec<TypeId> = args.iter().map(|a| self.apply(table, *a)).collect();
                if substituted == *args {
                    ty
                } else {
                    table.instance(*def, substituted)
                }
            }
            TypeKey::Pointer(inner) => {
                let inner_ty = self.apply(table, *inner);
                if inner_ty == *inner {
                    ty
                } else {
                    table.pointer(inner_ty)
                }
            }
            TypeKey::ByRef(inner) => {
                let inner_ty = self.apply(table, *inner);
                if inner_ty == *inner {
                    ty
                } else {
                    table.by_ref(inner_ty)
                }
            }
            TypeKey::Array { element, rank } => {
                let element_ty = self.apply(table, *element);
                if element_ty == *element {
                    ty
                } else {
                    table.array(element_ty, *rank)
                }
            }
            TypeKey::Primitive(_) | TypeKey::Definition(_) | TypeKey::Canon => ty,
        }
    }

    /// Apply the substitution to every type in a slice
    pub fn apply_all(&self, table: &TypeTable, types: &[TypeId]) -> Vec<TypeId> {
        types.iter().map(|ty| self.apply(table, *ty)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DefId, PrimitiveKind};

    #[test]
    fn test_identity_leaves_params() {
        let table = TypeTable::new();
        let t0 = table.param(ParamOwner::Type, 0);
        assert_eq!(Substitution::new().apply(&table, t0), t0);
    }

    #[test]
    fn test_substitutes_nested_params() {
        let table = TypeTable::new();
        let int = table.primitive(PrimitiveKind::I32);
        let string = table.primitive(PrimitiveKind::String);
        let t0 = table.param(ParamOwner::Type, 0);
        let m0 = table.param(ParamOwner::Method, 0);
        let list = DefId::new(3);
        let generic = table.instance(list, vec![table.array(t0, 1), m0]);

        let subst = Substitution::from_args(vec![int], vec![string]);
        let expected = table.instance(list, vec![table.array(int, 1), string]);
        assert_eq!(subst.apply(&table, generic), expected);
    }

    #[test]
    fn test_for_owner_reads_instance_args() {
        let table = TypeTable::new();
        let int = table.primitive(PrimitiveKind::I32);
        let owner = table.instance(DefId::new(0), vec![int]);
        let subst = Substitution::for_owner(&table, owner, &[]);
        assert_eq!(subst.type_args(), &[int]);
        assert!(subst.method_args().is_empty());

        let t0 = table.param(ParamOwner::Type, 0);
        assert_eq!(subst.apply(&table, table.pointer(t0)), table.pointer(int));
    }

    #[test]
    fn test_out_of_range_param_is_kept() {
        let table = TypeTable::new();
        let int = table.primitive(PrimitiveKind::I32);
        let t1 = table.param(ParamOwner::Type, 1);
        let subst = Substitution::from_args(vec![int], vec![]);
        assert_eq!(subst.apply(&table, t1), t1);
    }
}

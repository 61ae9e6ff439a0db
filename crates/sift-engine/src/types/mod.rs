//! Type identity and the instantiation table
//!
//! Every type the analysis talks about is interned into a [`TypeTable`], so
//! two keys with the same definition and arguments always share one
//! [`TypeId`]. Array rank and pointer depth are part of the key.

pub mod subst;
pub mod syntax;

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};

macro_rules! index_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Create an id from a raw index
            pub fn new(index: u32) -> Self {
                Self(index)
            }

            /// Raw index
            pub fn as_u32(self) -> u32 {
                self.0
            }

            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

index_id!(
    /// Interned type key
    TypeId,
    "TypeId"
);
index_id!(
    /// Index of a type definition in a [`Program`](crate::program::Program)
    DefId,
    "DefId"
);
index_id!(
    /// Index of a method definition
    MethodDefId,
    "MethodDefId"
);
index_id!(
    /// Index of a field definition
    FieldDefId,
    "FieldDefId"
);

/// Built-in types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveKind {
    /// `void`
    Void,
    /// `bool`
    Bool,
    /// `char`
    Char,
    /// `sbyte`
    I8,
    /// `byte`
    U8,
    /// `short`
    I16,
    /// `ushort`
    U16,
    /// `int`
    I32,
    /// `uint`
    U32,
    /// `long`
    I64,
    /// `ulong`
    U64,
    /// `float`
    F32,
    /// `double`
    F64,
    /// `nint`
    NInt,
    /// `string`
    String,
    /// `object`
    Object,
}

impl PrimitiveKind {
    /// All primitives, in pre-interning order
    pub const ALL: [PrimitiveKind; 16] = [
        PrimitiveKind::Void,
        PrimitiveKind::Bool,
        PrimitiveKind::Char,
        PrimitiveKind::I8,
        PrimitiveKind::U8,
        PrimitiveKind::I16,
        PrimitiveKind::U16,
        PrimitiveKind::I32,
        PrimitiveKind::U32,
        PrimitiveKind::I64,
        PrimitiveKind::U64,
        PrimitiveKind::F32,
        PrimitiveKind::F64,
        PrimitiveKind::NInt,
        PrimitiveKind::String,
        PrimitiveKind::Object,
    ];

    /// Source-level keyword
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Void => "void",
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Char => "char",
            PrimitiveKind::I8 => "sbyte",
            PrimitiveKind::U8 => "byte",
            PrimitiveKind::I16 => "short",
            PrimitiveKind::U16 => "ushort",
            PrimitiveKind::I32 => "int",
            PrimitiveKind::U32 => "uint",
            PrimitiveKind::I64 => "long",
            PrimitiveKind::U64 => "ulong",
            PrimitiveKind::F32 => "float",
            PrimitiveKind::F64 => "double",
            PrimitiveKind::NInt => "nint",
            PrimitiveKind::String => "string",
            PrimitiveKind::Object => "object",
        }
    }

    /// Look up a primitive by keyword
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    /// `string` and `object` are reference types; everything else is a value
    pub fn is_value_type(self) -> bool {
        !matches!(self, PrimitiveKind::String | PrimitiveKind::Object)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whose generic parameter list a [`GenericParam`] indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamOwner {
    /// Declaring type's parameters (`!n`)
    Type,
    /// Generic method's own parameters (`!!n`)
    Method,
}

/// Formal generic parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericParam {
    /// Parameter list this indexes
    pub owner: ParamOwner,
    /// Position in that list
    pub index: u16,
}

/// Structural identity of a type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    /// Built-in type
    Primitive(PrimitiveKind),
    /// Non-generic type, or the open form of a generic definition
    Definition(DefId),
    /// Closed (or partially open) generic instantiation
    Instance {
        /// Generic definition
        def: DefId,
        /// Ordered type arguments
        args: Vec<TypeId>,
    },
    /// Formal generic parameter
    Param(GenericParam),
    /// Unmanaged pointer `T*`
    Pointer(TypeId),
    /// Managed reference `T&`
    ByRef(TypeId),
    /// Array `T[]` (rank 1) or `T[,]` (rank 2) ...
    Array {
        /// Element type
        element: TypeId,
        /// Number of dimensions
        rank: u8,
    },
    /// Stand-in for any reference type inside shared code
    Canon,
}

impl TypeKey {
    /// Visit every directly nested type id
    pub fn for_each_child(&self, mut f: impl FnMut(TypeId)) {
        match self {
            TypeKey::Instance { args, .. } => args.iter().copied().for_each(&mut f),
            TypeKey::Pointer(inner) | TypeKey::ByRef(inner) => f(*inner),
            TypeKey::Array { element, .. } => f(*element),
            TypeKey::Primitive(_) | TypeKey::Definition(_) | TypeKey::Param(_) | TypeKey::Canon => {}
        }
    }

    /// Definition this key names, if any
    pub fn definition(&self) -> Option<DefId> {
        match self {
            TypeKey::Definition(def) | TypeKey::Instance { def, .. } => Some(*def),
            _ => None,
        }
    }
}

/// Thread-safe, deduplicating intern table for [`TypeKey`]s.
///
/// Primitives and `__Canon` are pre-interned, so their ids are stable
/// across tables.
pub struct TypeTable {
    /// Storage for all keys, indexed by TypeId
    keys: RwLock<Vec<Arc<TypeKey>>>,
    /// Reverse mapping used for interning
    index: DashMap<TypeKey, TypeId, FxBuildHasher>,
}

impl fmt::Debug for TypeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeTable").field("len", &self.len()).finish()
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    const CANON_ID: u32 = PrimitiveKind::ALL.len() as u32;

    /// Create a table holding only the built-in types
    pub fn new() -> Self {
        let table = TypeTable {
            keys: RwLock::new(Vec::new()),
            index: DashMap::with_hasher(FxBuildHasher),
        };
        for primitive in PrimitiveKind::ALL {
            table.intern(TypeKey::Primitive(primitive));
        }
        table.intern(TypeKey::Canon);
        table
    }

    /// Intern a key, returning the existing id if it was seen before
    pub fn intern(&self, key: TypeKey) -> TypeId {
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let stored = key.clone();
        // The shard lock is held while appending, so a key is stored once.
        *self.index.entry(key).or_insert_with(|| {
            let mut keys = self.keys.write();
            let id = TypeId(keys.len() as u32);
            keys.push(Arc::new(stored));
            id
        })
    }

    /// Look up a key's id without interning it
    pub fn lookup(&self, key: &TypeKey) -> Option<TypeId> {
        self.index.get(key).map(|id| *id)
    }

    /// Get a key by id
    pub fn get(&self, id: TypeId) -> Option<Arc<TypeKey>> {
        self.keys.read().get(id.index()).cloned()
    }

    /// Get a key by id
    ///
    /// # Panics
    ///
    /// Panics if the id was not produced by this table
    pub fn key(&self, id: TypeId) -> Arc<TypeKey> {
        self.get(id).expect("TypeId from a different TypeTable")
    }

    /// Number of interned keys
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Always false: built-ins are pre-interned
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of a built-in type
    pub fn primitive(&self, kind: PrimitiveKind) -> TypeId {
        TypeId(kind as u32)
    }

    /// Id of `__Canon`
    pub fn canon(&self) -> TypeId {
        TypeId(Self::CANON_ID)
    }

    /// Intern the open or non-generic form of a definition
    pub fn definition(&self, def: DefId) -> TypeId {
        self.intern(TypeKey::Definition(def))
    }

    /// Intern a generic instantiation
    pub fn instance(&self, def: DefId, args: Vec<TypeId>) -> TypeId {
        self.intern(TypeKey::Instance { def, args })
    }

    /// Intern a generic parameter
    pub fn param(&self, owner: ParamOwner, index: u16) -> TypeId {
        self.intern(TypeKey::Param(GenericParam { owner, index }))
    }

    /// Intern `T*`
    pub fn pointer(&self, inner: TypeId) -> TypeId {
        self.intern(TypeKey::Pointer(inner))
    }

    /// Intern `T&`
    pub fn by_ref(&self, inner: TypeId) -> TypeId {
        self.intern(TypeKey::ByRef(inner))
    }

    /// Intern an array type
    pub fn array(&self, element: TypeId, rank: u8) -> TypeId {
        self.intern(TypeKey::Array { element, rank })
    }

    /// Whether the type mentions no generic parameter
    pub fn is_closed(&self, id: TypeId) -> bool {
        let key = self.key(id);
        if matches!(*key, TypeKey::Param(_)) {
            return false;
        }
        let mut closed = true;
        key.for_each_child(|child| closed &= self.is_closed(child));
        closed
    }

    /// Nesting depth of a type (`int` is 1, `List<int>` is 2)
    pub fn depth(&self, id: TypeId) -> usize {
        let mut deepest = 0;
        self.key(id).for_each_child(|child| deepest = deepest.max(self.depth(child)));
        deepest + 1
    }

    /// Visit the type and everything nested inside it
    pub fn walk(&self, id: TypeId, f: &mut impl FnMut(TypeId, &TypeKey)) {
        let key = self.key(id);
        f(id, &key);
        key.for_each_child(|child| self.walk(child, &mut *f));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_are_preinterned() {
        let table = TypeTable::new();
        let int = table.primitive(PrimitiveKind::I32);
        assert_eq!(*table.key(int), TypeKey::Primitive(PrimitiveKind::I32));
        assert_eq!(table.intern(TypeKey::Primitive(PrimitiveKind::I32)), int);
        assert_eq!(*table.key(table.canon()), TypeKey::Canon);
    }

    #[test]
    fn test_identical_keys_share_id() {
        let table = TypeTable::new();
        let int = table.primitive(PrimitiveKind::I32);
        let a = table.instance(DefId::new(0), vec![int]);
        let b = table.instance(DefId::new(0), vec![int]);
        let c = table.instance(DefId::new(1), vec![int]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_rank_and_pointer_depth_are_identity() {
        let table = TypeTable::new();
        let int = table.primitive(PrimitiveKind::I32);
        assert_ne!(table.array(int, 1), table.array(int, 2));
        let ptr = table.pointer(int);
        assert_ne!(ptr, table.pointer(ptr));
    }

    #[test]
    fn test_closed_and_depth() {
        let table = TypeTable::new();
        let t0 = table.param(ParamOwner::Type, 0);
        let int = table.primitive(PrimitiveKind::I32);
        let open = table.instance(DefId::new(0), vec![t0]);
        let closed = table.instance(DefId::new(0), vec![int]);
        assert!(!table.is_closed(open));
        assert!(table.is_closed(closed));
        assert_eq!(table.depth(int), 1);
        assert_eq!(table.depth(table.instance(DefId::new(0), vec![closed])), 3);
    }

    #[test]
    fn test_concurrent_interning_deduplicates() {
        let table = TypeTable::new();
        let int = table.primitive(PrimitiveKind::I32);
        let ids: Vec<TypeId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| table.instance(DefId::new(7), vec![int])))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(table.len(), PrimitiveKind::ALL.len() + 2);
    }
}

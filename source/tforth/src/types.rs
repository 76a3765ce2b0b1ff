use core::fmt;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::{fastr::FaStr, vm::Forth, word::Word, Error, WordFunc};

/// A type identifier: a 16-bit base type plus a 16-bit indirection count.
///
/// Base ids are split into ranges:
///
/// * `0..=1022`: value types
/// * `1023`: the invalid sentinel
/// * `1024..=32767`: built-in object types
/// * `32768..=65535`: user-defined object types
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub const VALUE_MAX: u16 = 1022;
    pub const INVALID_BASE: u16 = 1023;
    pub const OBJECT_MIN: u16 = 1024;
    pub const OBJECT_MAX: u16 = 32767;
    pub const USER_MIN: u16 = 32768;
    pub const USER_MAX: u16 = 65535;

    pub const CHAR: Self = Self::new(0, 0);
    pub const INT: Self = Self::new(1, 0);
    pub const FLOAT: Self = Self::new(2, 0);
    pub const BOOL: Self = Self::new(3, 0);
    pub const TYPE: Self = Self::new(4, 0);
    pub const XT: Self = Self::new(5, 0);
    pub const BINOP: Self = Self::new(6, 0);
    pub const INVALID: Self = Self::new(Self::INVALID_BASE, 0);
    pub const STRING: Self = Self::new(1024, 0);
    pub const ARRAY: Self = Self::new(1025, 0);

    pub const fn new(base: u16, indirection: u16) -> Self {
        Self(((base as u32) << 16) | (indirection as u32))
    }

    #[inline]
    pub const fn base(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[inline]
    pub const fn indirection(self) -> u16 {
        self.0 as u16
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The base type with indirection stripped.
    #[inline]
    pub const fn base_type(self) -> Self {
        Self::new(self.base(), 0)
    }

    #[inline]
    pub const fn is_pointer(self) -> bool {
        self.indirection() > 0
    }

    /// The type of a pointer to a value of this type.
    pub fn pointer_to(self) -> Result<Self, Error> {
        let ind = self
            .indirection()
            .checked_add(1)
            .ok_or(Error::TypeSpaceExhausted)?;
        Ok(Self::new(self.base(), ind))
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({}^{})", self.base(), self.indirection())
    }
}

/// Builds a new object of the given type, leaving it on the data stack.
pub type ConstructFn<T> = fn(&mut Forth<T>, TypeId) -> Result<(), Error>;

/// Handler for binary operations on objects of a type.
///
/// Called with `op1 op2 op-tag` on the data stack, it must leave exactly
/// one result.
pub enum BinOpsHandler<T: 'static> {
    Native(WordFunc<T>),
    Word(Rc<Word<T>>),
}

impl<T: 'static> Clone for BinOpsHandler<T> {
    fn clone(&self) -> Self {
        match self {
            BinOpsHandler::Native(f) => BinOpsHandler::Native(*f),
            BinOpsHandler::Word(w) => BinOpsHandler::Word(w.clone()),
        }
    }
}

/// The definition of a user object type: its name and field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTypeDef {
    pub name: String,
    pub fields: Vec<String>,
}

pub enum TypeKind<T: 'static> {
    Value,
    Object {
        construct: ConstructFn<T>,
        binops: Option<BinOpsHandler<T>>,
    },
    User {
        def: Rc<UserTypeDef>,
        binops: Option<BinOpsHandler<T>>,
    },
}

pub struct TypeEntry<T: 'static> {
    pub name: String,
    pub kind: TypeKind<T>,
}

impl<T: 'static> TypeEntry<T> {
    pub fn binops(&self) -> Option<&BinOpsHandler<T>> {
        match &self.kind {
            TypeKind::Value => None,
            TypeKind::Object { binops, .. } | TypeKind::User { binops, .. } => binops.as_ref(),
        }
    }
}

/// The registry of every type known to a VM.
pub struct TypeRegistry<T: 'static> {
    entries: BTreeMap<u16, TypeEntry<T>>,
    by_name: HashMap<FaStr, TypeId>,
    next_value: u32,
    next_object: u32,
    next_user: u32,
}

impl<T: 'static> Default for TypeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> TypeRegistry<T> {
    /// An empty registry. See [`TypeRegistry::with_value_types`] for one
    /// holding the built-in value types.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            by_name: HashMap::new(),
            next_value: 0,
            next_object: TypeId::OBJECT_MIN as u32,
            next_user: TypeId::USER_MIN as u32,
        }
    }

    /// A registry holding the built-in value types at their fixed ids.
    pub fn with_value_types() -> Result<Self, Error> {
        let mut reg = Self::new();
        for (name, id) in [
            ("char", TypeId::CHAR),
            ("int", TypeId::INT),
            ("float", TypeId::FLOAT),
            ("bool", TypeId::BOOL),
            ("type", TypeId::TYPE),
            ("xt", TypeId::XT),
            ("binop", TypeId::BINOP),
        ] {
            let got = reg.register_value_type(name)?;
            debug_assert_eq!(got, id);
        }
        Ok(reg)
    }

    fn insert(&mut self, base: u16, name: &str, kind: TypeKind<T>) -> TypeId {
        let id = TypeId::new(base, 0);
        self.by_name.insert(FaStr::new(name), id);
        self.entries.insert(
            base,
            TypeEntry {
                name: name.to_ascii_lowercase(),
                kind,
            },
        );
        id
    }

    fn check_name(&self, name: &str) -> Result<(), Error> {
        if self.by_name.contains_key(&FaStr::new(name)) {
            Err(Error::TypeRedefined(name.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn register_value_type(&mut self, name: &str) -> Result<TypeId, Error> {
        self.check_name(name)?;
        if self.next_value > TypeId::VALUE_MAX as u32 {
            return Err(Error::TypeSpaceExhausted);
        }
        let base = self.next_value as u16;
        let id = self.insert(base, name, TypeKind::Value);
        self.next_value += 1;
        Ok(id)
    }

    pub fn register_object_type(
        &mut self,
        name: &str,
        construct: ConstructFn<T>,
        binops: Option<BinOpsHandler<T>>,
    ) -> Result<TypeId, Error> {
        self.check_name(name)?;
        if self.next_object > TypeId::OBJECT_MAX as u32 {
            return Err(Error::TypeSpaceExhausted);
        }
        let base = self.next_object as u16;
        let id = self.insert(base, name, TypeKind::Object { construct, binops });
        self.next_object += 1;
        Ok(id)
    }

    pub fn register_user_type(&mut self, def: UserTypeDef) -> Result<TypeId, Error> {
        self.check_name(&def.name)?;
        if self.next_user > TypeId::USER_MAX as u32 {
            return Err(Error::TypeSpaceExhausted);
        }
        let base = self.next_user as u16;
        let name = def.name.clone();
        let id = self.insert(
            base,
            &name,
            TypeKind::User {
                def: Rc::new(def),
                binops: None,
            },
        );
        self.next_user += 1;
        Ok(id)
    }

    /// Install (or replace) the binary-ops handler of an object type.
    pub fn set_binops(&mut self, ty: TypeId, handler: BinOpsHandler<T>) -> Result<(), Error> {
        let entry = self
            .entries
            .get_mut(&ty.base())
            .ok_or(Error::UnknownType(format!("{ty:?}")))?;
        match &mut entry.kind {
            TypeKind::Value => Err(Error::TypeMismatch(format!(
                "'{}' is a value type and cannot have binary operations",
                entry.name
            ))),
            TypeKind::Object { binops, .. } | TypeKind::User { binops, .. } => {
                *binops = Some(handler);
                Ok(())
            }
        }
    }

    pub fn get(&self, ty: TypeId) -> Option<&TypeEntry<T>> {
        self.entries.get(&ty.base())
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(&FaStr::new(name)).copied()
    }

    pub fn binops(&self, ty: TypeId) -> Option<BinOpsHandler<T>> {
        self.get(ty).and_then(TypeEntry::binops).cloned()
    }

    /// Display name of a type; pointers get one `*` per indirection level.
    pub fn name_of(&self, ty: TypeId) -> String {
        let mut name = match self.get(ty) {
            Some(e) => e.name.clone(),
            None => format!("<type {}>", ty.base()),
        };
        for _ in 0..ty.indirection() {
            name.push('*');
        }
        name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

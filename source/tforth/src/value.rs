use core::fmt;
use std::rc::Rc;

use crate::{
    object::ObjRef,
    types::TypeId,
    word::Word,
    Error,
};

/// The tagged value held by the stacks and by literal slots of word bodies.
///
/// Values referring to heap objects or words hold an `Rc`, so cloning a
/// value takes exactly one reference and dropping it releases exactly one.
/// Plain values never touch a count.
pub enum Value<T: 'static> {
    Char(u8),
    Int(i64),
    Float(f64),
    Bool(bool),
    Type(TypeId),
    Xt(Rc<Word<T>>),
    Ptr(Pointer<T>),
    Obj(ObjRef<T>),
    BinOp(BinOp),
}

/// A pointer into a data slot of a word body.
pub struct Pointer<T: 'static> {
    target: Rc<Word<T>>,
    index: usize,
    ty: TypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub const ALL: [BinOp; 14] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::Div,
        BinOp::Mod,
        BinOp::Eq,
        BinOp::Ne,
        BinOp::Lt,
        BinOp::Gt,
        BinOp::Le,
        BinOp::Ge,
        BinOp::And,
        BinOp::Or,
        BinOp::Xor,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "mod",
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }
}

impl<T: 'static> Pointer<T> {
    pub fn new(target: Rc<Word<T>>, index: usize) -> Self {
        let ty = target
            .slot_type(index)
            .pointer_to()
            .unwrap_or(TypeId::INVALID);
        Self { target, index, ty }
    }

    #[inline]
    pub fn target(&self) -> &Rc<Word<T>> {
        &self.target
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.ty
    }

    pub fn load(&self) -> Result<Value<T>, Error> {
        self.target.load(self.index)
    }

    pub fn store(&self, val: Value<T>) -> Result<(), Error> {
        self.target.store(self.index, val)
    }

    /// A pointer `n` slots away in the same body. Slot 0 holds code, so it
    /// can't be pointed at.
    pub fn offset(&self, n: i64) -> Result<Self, Error> {
        let idx = (self.index as i64)
            .checked_add(n)
            .filter(|i| *i >= 1)
            .ok_or(Error::BadWordOffset {
                word: self.target.name().to_string(),
                index: self.index,
            })?;
        Ok(Self::new(self.target.clone(), idx as usize))
    }

    pub fn same_target(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.target, &other.target)
    }
}

impl<T: 'static> Clone for Pointer<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            index: self.index,
            ty: self.ty,
        }
    }
}

impl<T: 'static> Clone for Value<T> {
    fn clone(&self) -> Self {
        match self {
            Value::Char(c) => Value::Char(*c),
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) => Value::Float(*f),
            Value::Bool(b) => Value::Bool(*b),
            Value::Type(t) => Value::Type(*t),
            Value::Xt(w) => Value::Xt(w.clone()),
            Value::Ptr(p) => Value::Ptr(p.clone()),
            Value::Obj(o) => Value::Obj(o.clone()),
            Value::BinOp(op) => Value::BinOp(*op),
        }
    }
}

impl<T: 'static> Value<T> {
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Char(_) => TypeId::CHAR,
            Value::Int(_) => TypeId::INT,
            Value::Float(_) => TypeId::FLOAT,
            Value::Bool(_) => TypeId::BOOL,
            Value::Type(_) => TypeId::TYPE,
            Value::Xt(_) => TypeId::XT,
            Value::Ptr(p) => p.type_id(),
            Value::Obj(o) => o.type_id(),
            Value::BinOp(_) => TypeId::BINOP,
        }
    }

    /// Does this value hold a heap reference, directly or through pointers?
    pub fn is_counted(&self) -> bool {
        matches!(self, Value::Xt(_) | Value::Ptr(_) | Value::Obj(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Char(_) => "char",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Type(_) => "type",
            Value::Xt(_) => "xt",
            Value::Ptr(_) => "pointer",
            Value::Obj(_) => "object",
            Value::BinOp(_) => "binop",
        }
    }

    /// Is this value usable as an integer (int, char or bool)?
    pub fn is_int_like(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Char(_) | Value::Bool(_))
    }

    pub fn as_int(&self) -> Result<i64, Error> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Char(c) => Ok(*c as i64),
            Value::Bool(b) => Ok(*b as i64),
            other => Err(Error::TypeMismatch(format!(
                "expected an int, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_float(&self) -> Result<f64, Error> {
        match self {
            Value::Float(f) => Ok(*f),
            other => other.as_int().map(|i| i as f64).map_err(|_| {
                Error::TypeMismatch(format!("expected a number, got {}", other.kind_name()))
            }),
        }
    }

    /// Flags accept bools and ints (non-zero is true).
    pub fn is_truthy(&self) -> Result<bool, Error> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Char(c) => Ok(*c != 0),
            other => Err(Error::TypeMismatch(format!(
                "expected a flag, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_xt(&self) -> Result<&Rc<Word<T>>, Error> {
        match self {
            Value::Xt(w) => Ok(w),
            other => Err(Error::TypeMismatch(format!(
                "expected an xt, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_obj(&self) -> Result<&ObjRef<T>, Error> {
        match self {
            Value::Obj(o) => Ok(o),
            other => Err(Error::TypeMismatch(format!(
                "expected an object, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_type(&self) -> Result<TypeId, Error> {
        match self {
            Value::Type(t) => Ok(*t),
            other => Err(Error::TypeMismatch(format!(
                "expected a type, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_ptr(&self) -> Result<&Pointer<T>, Error> {
        match self {
            Value::Ptr(p) => Ok(p),
            _ => Err(Error::NotAPointer),
        }
    }

    /// Descend exactly one level of indirection.
    pub fn deref(&self) -> Result<Value<T>, Error> {
        self.as_ptr()?.load()
    }

    /// Descend `levels` levels of indirection.
    pub fn follow(&self, levels: usize) -> Result<Value<T>, Error> {
        let mut cur = self.clone();
        for _ in 0..levels {
            cur = cur.deref()?;
        }
        Ok(cur)
    }

    /// Follow pointers until reaching a non-pointer value.
    ///
    /// A chain that comes back to a slot it already passed through is
    /// reported as [`Error::PointerCycle`].
    pub fn follow_to_end(&self) -> Result<Value<T>, Error> {
        let mut seen: Vec<(*const Word<T>, usize)> = Vec::new();
        let mut cur = self.clone();
        while let Value::Ptr(p) = &cur {
            let slot = (Rc::as_ptr(p.target()), p.index());
            if seen.contains(&slot) {
                return Err(Error::PointerCycle);
            }
            seen.push(slot);
            cur = p.load()?;
        }
        Ok(cur)
    }

    /// The live count of the heap object this value refers to, directly or
    /// through a pointer chain. `None` for plain values and for pointer
    /// chains that loop or end in a plain value.
    pub fn live_count(&self) -> Option<usize> {
        match self {
            Value::Obj(o) => Some(Rc::strong_count(o)),
            Value::Ptr(_) => match self.follow_to_end().ok()? {
                // `follow_to_end` handed us a reference of our own.
                Value::Obj(o) => Some(Rc::strong_count(&o) - 1),
                _ => None,
            },
            _ => None,
        }
    }
}

impl<T: 'static> PartialEq for Value<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Xt(a), Value::Xt(b)) => Rc::ptr_eq(a, b),
            (Value::Ptr(a), Value::Ptr(b)) => a.same_target(b) && a.index == b.index,
            (Value::Obj(a), Value::Obj(b)) => Rc::ptr_eq(a, b),
            (Value::BinOp(a), Value::BinOp(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: 'static> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Char(c) => write!(f, "Char({:?})", *c as char),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Type(t) => write!(f, "Type({t:?})"),
            Value::Xt(w) => write!(f, "Xt({:?})", w.name()),
            Value::Ptr(p) => write!(f, "Ptr({:?}+{})", p.target.name(), p.index),
            Value::Obj(o) => write!(f, "Obj({:?})", o.type_id()),
            Value::BinOp(op) => write!(f, "BinOp({})", op.symbol()),
        }
    }
}

pub(crate) fn fmt_float(v: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if v.is_finite() && v.fract() == 0.0 {
        write!(f, "{v:.1}")
    } else {
        write!(f, "{v}")
    }
}

impl<T: 'static> fmt::Display for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Char(c) => write!(f, "{}", *c as char),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => fmt_float(*v, f),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Type(t) => write!(f, "<type {}>", t.base()),
            Value::Xt(w) => write!(f, "<xt {}>", w.display_name()),
            Value::Ptr(p) => write!(f, "<ptr {}+{}>", p.target.display_name(), p.index),
            Value::Obj(o) => o.fmt_display(f),
            Value::BinOp(op) => f.write_str(op.symbol()),
        }
    }
}

//! Heap objects.
//!
//! Objects live behind an `Rc` ([`ObjRef`]), so every [`Value`] holding one
//! keeps it alive. Composite objects own further values, and carry a
//! "visiting" mark so that walks over the object graph terminate on cycles.

use core::{any::Any, cell::Cell, cell::RefCell, fmt};
use std::rc::Rc;

use crate::{
    fastr::fnv_hash,
    stack::Stack,
    types::{TypeId, UserTypeDef},
    value::{BinOp, Value},
    Error,
};

pub type ObjRef<T> = Rc<dyn Object<T>>;

/// The closed set of functions an object may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjFunc {
    Size,
    Hash,
    Get,
    Set,
    Contains,
    IndexOf,
    SubRange,
    Deconstruct,
    Append,
    Implements,
    Close,
    Read,
    ReadLine,
    ReadChar,
    Eof,
}

impl ObjFunc {
    pub const ALL: [ObjFunc; 15] = [
        ObjFunc::Size,
        ObjFunc::Hash,
        ObjFunc::Get,
        ObjFunc::Set,
        ObjFunc::Contains,
        ObjFunc::IndexOf,
        ObjFunc::SubRange,
        ObjFunc::Deconstruct,
        ObjFunc::Append,
        ObjFunc::Implements,
        ObjFunc::Close,
        ObjFunc::Read,
        ObjFunc::ReadLine,
        ObjFunc::ReadChar,
        ObjFunc::Eof,
    ];

    pub fn from_index(idx: i64) -> Option<Self> {
        usize::try_from(idx).ok().and_then(|i| Self::ALL.get(i).copied())
    }
}

/// The capability interface of heap objects.
///
/// `invoke` receives the data stack with the object itself already popped.
/// Stack effects (object popped from the top first):
///
/// | func | effect |
/// | --- | --- |
/// | `Size` | `( -- n )` |
/// | `Hash` | `( -- n )` |
/// | `Get` | `( idx -- v )` |
/// | `Set` | `( v idx -- )` |
/// | `Contains` | `( v -- bool )` |
/// | `IndexOf` | `( v -- idx )`, `-1` when absent |
/// | `SubRange` | `( start len -- obj )` |
/// | `Deconstruct` | `( -- v0 .. vn-1 n )` |
/// | `Append` | `( v -- )` |
pub trait Object<T: 'static>: 'static {
    fn type_id(&self) -> TypeId;

    fn fmt_display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;

    fn implements(&self, func: ObjFunc) -> bool;

    fn invoke(&self, func: ObjFunc, stack: &mut Stack<Value<T>>) -> Result<(), Error>;

    /// Visit every value this object owns.
    fn for_each_child(&self, _f: &mut dyn FnMut(&Value<T>)) {}

    /// The mark set while a walk is inside this object. Only composite
    /// objects have one.
    fn visiting(&self) -> Option<&Cell<bool>> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

fn unsupported(func: ObjFunc, name: &str) -> Error {
    Error::UnsupportedFunction {
        func,
        ty: name.to_string(),
    }
}

fn check_index(idx: i64, len: usize) -> Result<usize, Error> {
    usize::try_from(idx)
        .ok()
        .filter(|i| *i < len)
        .ok_or(Error::IndexOutOfRange { index: idx, len })
}

fn check_range(start: i64, count: i64, len: usize) -> Result<core::ops::Range<usize>, Error> {
    let start_u = usize::try_from(start)
        .ok()
        .filter(|s| *s <= len)
        .ok_or(Error::IndexOutOfRange { index: start, len })?;
    let end = usize::try_from(count)
        .ok()
        .and_then(|c| start_u.checked_add(c))
        .filter(|e| *e <= len)
        .ok_or(Error::IndexOutOfRange {
            index: start.saturating_add(count),
            len,
        })?;
    Ok(start_u..end)
}

fn identity_hash<O: ?Sized>(obj: &O) -> i64 {
    let addr = obj as *const O as *const u8 as usize;
    fnv_hash(&addr.to_ne_bytes()) as i64
}

/// Runs `f` with the object's visiting mark set, or returns `None` if the
/// mark was already set (a cycle).
fn with_mark<R>(mark: &Cell<bool>, f: impl FnOnce() -> R) -> Option<R> {
    if mark.replace(true) {
        return None;
    }
    let res = f();
    mark.set(false);
    Some(res)
}

/// Counts the references to `target` held by values reachable from `root`,
/// following pointers and the contents of composite objects.
#[cfg(test)]
pub fn count_refs<T: 'static>(root: &Value<T>, target: &ObjRef<T>) -> usize {
    let mut count = 0;
    walk(root, target, &mut count);
    count
}

#[cfg(test)]
fn walk<T: 'static>(val: &Value<T>, target: &ObjRef<T>, count: &mut usize) {
    match val {
        Value::Obj(o) => {
            if Rc::ptr_eq(o, target) {
                *count += 1;
            }
            if let Some(mark) = o.visiting() {
                with_mark(mark, || o.for_each_child(&mut |c| walk(c, target, count)));
            }
        }
        Value::Ptr(_) => {
            if let Ok(v) = val.follow_to_end() {
                walk(&v, target, count);
            }
        }
        _ => {}
    }
}

// ---- strings ----

pub struct StrObject {
    text: RefCell<String>,
}

impl StrObject {
    pub fn new(text: &str) -> Self {
        Self {
            text: RefCell::new(text.to_string()),
        }
    }

    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }
}

/// Returns the string object inside a value, if it holds one.
pub fn as_str_object<T: 'static>(val: &Value<T>) -> Option<&StrObject> {
    match val {
        Value::Obj(o) => o.as_any().downcast_ref::<StrObject>(),
        _ => None,
    }
}

/// Element equality for searches: strings compare by text, everything
/// else as `=` would without a binops handler (objects by identity).
fn same_content<T: 'static>(a: &Value<T>, b: &Value<T>) -> bool {
    match (as_str_object(a), as_str_object(b)) {
        (Some(a), Some(b)) => *a.text.borrow() == *b.text.borrow(),
        _ => a == b,
    }
}

fn needle<T: 'static>(val: &Value<T>) -> Result<String, Error> {
    match val {
        Value::Char(c) => Ok((*c as char).to_string()),
        other => match as_str_object(other) {
            Some(s) => Ok(s.text()),
            None => Err(Error::TypeMismatch(format!(
                "can't search a string for a {}",
                other.kind_name()
            ))),
        },
    }
}

impl<T: 'static> Object<T> for StrObject {
    fn type_id(&self) -> TypeId {
        TypeId::STRING
    }

    fn fmt_display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text.borrow())
    }

    fn implements(&self, func: ObjFunc) -> bool {
        !matches!(
            func,
            ObjFunc::Close | ObjFunc::Read | ObjFunc::ReadLine | ObjFunc::ReadChar | ObjFunc::Eof
        )
    }

    fn invoke(&self, func: ObjFunc, stack: &mut Stack<Value<T>>) -> Result<(), Error> {
        match func {
            ObjFunc::Size => stack.push(Value::Int(self.text.borrow().len() as i64))?,
            ObjFunc::Hash => {
                let hash = fnv_hash(self.text.borrow().as_bytes());
                stack.push(Value::Int(hash as i64))?;
            }
            ObjFunc::Get => {
                let idx = stack.try_pop()?.as_int()?;
                let byte = {
                    let text = self.text.borrow();
                    text.as_bytes()[check_index(idx, text.len())?]
                };
                stack.push(Value::Char(byte))?;
            }
            ObjFunc::Set => {
                let idx = stack.try_pop()?.as_int()?;
                let val = stack.try_pop()?;
                let ch = match val {
                    Value::Char(c) if c.is_ascii() => c as char,
                    Value::Int(i) if (0..128).contains(&i) => i as u8 as char,
                    other => {
                        return Err(Error::TypeMismatch(format!(
                            "can't store a {} in a string",
                            other.kind_name()
                        )))
                    }
                };
                let mut text = self.text.borrow_mut();
                let i = check_index(idx, text.len())?;
                text.replace_range(i..i + 1, ch.encode_utf8(&mut [0; 4]));
            }
            ObjFunc::Contains => {
                let n = needle(&stack.try_pop()?)?;
                let found = self.text.borrow().contains(n.as_str());
                stack.push(Value::Bool(found))?;
            }
            ObjFunc::IndexOf => {
                let n = needle(&stack.try_pop()?)?;
                let idx = self
                    .text
                    .borrow()
                    .find(n.as_str())
                    .map(|i| i as i64)
                    .unwrap_or(-1);
                stack.push(Value::Int(idx))?;
            }
            ObjFunc::SubRange => {
                let count = stack.try_pop()?.as_int()?;
                let start = stack.try_pop()?.as_int()?;
                let sub = {
                    let text = self.text.borrow();
                    text[check_range(start, count, text.len())?].to_string()
                };
                stack.push(Value::Obj(Rc::new(StrObject::new(&sub))))?;
            }
            ObjFunc::Deconstruct => {
                let text = self.text.borrow();
                for b in text.bytes() {
                    stack.push(Value::Char(b))?;
                }
                stack.push(Value::Int(text.len() as i64))?;
            }
            ObjFunc::Append => {
                let val = stack.try_pop()?;
                let piece = val.to_string();
                self.text.borrow_mut().push_str(&piece);
            }
            ObjFunc::Implements => {
                let idx = stack.try_pop()?.as_int()?;
                let yes = ObjFunc::from_index(idx)
                    .map(|f| <Self as Object<T>>::implements(self, f))
                    .unwrap_or(false);
                stack.push(Value::Bool(yes))?;
            }
            other => return Err(unsupported(other, "string")),
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Binary operations on strings: `+` concatenates (the other operand is
/// stringified), comparisons compare contents.
pub fn string_binop<T: 'static>(a: &Value<T>, b: &Value<T>, op: BinOp) -> Result<Value<T>, Error> {
    let (sa, sb) = (as_str_object(a), as_str_object(b));
    match op {
        BinOp::Add => {
            let joined = format!("{a}{b}");
            Ok(Value::Obj(Rc::new(StrObject::new(&joined))))
        }
        _ if op.is_comparison() => match (sa, sb) {
            (Some(sa), Some(sb)) => {
                let (ta, tb) = (sa.text(), sb.text());
                let res = match op {
                    BinOp::Eq => ta == tb,
                    BinOp::Ne => ta != tb,
                    BinOp::Lt => ta < tb,
                    BinOp::Gt => ta > tb,
                    BinOp::Le => ta <= tb,
                    _ => ta >= tb,
                };
                Ok(Value::Bool(res))
            }
            _ if op == BinOp::Eq => Ok(Value::Bool(false)),
            _ if op == BinOp::Ne => Ok(Value::Bool(true)),
            _ => Err(Error::TypeMismatch(format!(
                "can't compare a string with {}",
                if sa.is_some() { b.kind_name() } else { a.kind_name() }
            ))),
        },
        _ => Err(Error::TypeMismatch(format!(
            "unsupported operation '{}' on strings",
            op.symbol()
        ))),
    }
}

// ---- arrays ----

pub struct ArrayObject<T: 'static> {
    items: RefCell<Vec<Value<T>>>,
    visiting: Cell<bool>,
}

impl<T: 'static> ArrayObject<T> {
    pub fn new(items: Vec<Value<T>>) -> Self {
        Self {
            items: RefCell::new(items),
            visiting: Cell::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

/// Shared implementation of the element functions for objects backed by a
/// vector of values.
fn invoke_values<T: 'static>(
    items: &RefCell<Vec<Value<T>>>,
    func: ObjFunc,
    stack: &mut Stack<Value<T>>,
) -> Result<bool, Error> {
    match func {
        ObjFunc::Size => stack.push(Value::Int(items.borrow().len() as i64))?,
        ObjFunc::Get => {
            let idx = stack.try_pop()?.as_int()?;
            let val = {
                let items = items.borrow();
                items[check_index(idx, items.len())?].clone()
            };
            stack.push(val)?;
        }
        ObjFunc::Set => {
            let idx = stack.try_pop()?.as_int()?;
            let val = stack.try_pop()?;
            let old = {
                let mut items = items.borrow_mut();
                let i = check_index(idx, items.len())?;
                core::mem::replace(&mut items[i], val)
            };
            drop(old);
        }
        ObjFunc::Contains => {
            let needle = stack.try_pop()?;
            let found = items.borrow().iter().any(|v| same_content(v, &needle));
            stack.push(Value::Bool(found))?;
        }
        ObjFunc::IndexOf => {
            let needle = stack.try_pop()?;
            let idx = items
                .borrow()
                .iter()
                .position(|v| same_content(v, &needle))
                .map(|i| i as i64)
                .unwrap_or(-1);
            stack.push(Value::Int(idx))?;
        }
        ObjFunc::Deconstruct => {
            let items: Vec<Value<T>> = items.borrow().clone();
            let len = items.len();
            for v in items {
                stack.push(v)?;
            }
            stack.push(Value::Int(len as i64))?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

impl<T: 'static> Object<T> for ArrayObject<T> {
    fn type_id(&self) -> TypeId {
        TypeId::ARRAY
    }

    fn fmt_display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        with_mark(&self.visiting, || {
            f.write_str("[")?;
            for (i, v) in self.items.borrow().iter().enumerate() {
                if i != 0 {
                    f.write_str(" ")?;
                }
                fmt::Display::fmt(v, f)?;
            }
            f.write_str("]")
        })
        .unwrap_or_else(|| f.write_str("[...]"))
    }

    fn implements(&self, func: ObjFunc) -> bool {
        !matches!(
            func,
            ObjFunc::Close | ObjFunc::Read | ObjFunc::ReadLine | ObjFunc::ReadChar | ObjFunc::Eof
        )
    }

    fn invoke(&self, func: ObjFunc, stack: &mut Stack<Value<T>>) -> Result<(), Error> {
        if invoke_values(&self.items, func, stack)? {
            return Ok(());
        }
        match func {
            ObjFunc::Hash => stack.push(Value::Int(identity_hash(self)))?,
            ObjFunc::SubRange => {
                let count = stack.try_pop()?.as_int()?;
                let start = stack.try_pop()?.as_int()?;
                let sub = {
                    let items = self.items.borrow();
                    items[check_range(start, count, items.len())?].to_vec()
                };
                stack.push(Value::Obj(Rc::new(ArrayObject::new(sub))))?;
            }
            ObjFunc::Append => {
                let val = stack.try_pop()?;
                self.items.borrow_mut().push(val);
            }
            ObjFunc::Implements => {
                let idx = stack.try_pop()?.as_int()?;
                let yes = ObjFunc::from_index(idx)
                    .map(|f| self.implements(f))
                    .unwrap_or(false);
                stack.push(Value::Bool(yes))?;
            }
            other => return Err(unsupported(other, "array")),
        }
        Ok(())
    }

    fn for_each_child(&self, f: &mut dyn FnMut(&Value<T>)) {
        for v in self.items.borrow().iter() {
            f(v);
        }
    }

    fn visiting(&self) -> Option<&Cell<bool>> {
        Some(&self.visiting)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---- user objects ----

/// An instance of a type declared with `struct:`.
pub struct UserObject<T: 'static> {
    ty: TypeId,
    def: Rc<UserTypeDef>,
    fields: RefCell<Vec<Value<T>>>,
    visiting: Cell<bool>,
}

impl<T: 'static> UserObject<T> {
    pub fn new(ty: TypeId, def: Rc<UserTypeDef>) -> Self {
        let fields = (0..def.fields.len()).map(|_| Value::Int(0)).collect();
        Self {
            ty,
            def,
            fields: RefCell::new(fields),
            visiting: Cell::new(false),
        }
    }
}

impl<T: 'static> Object<T> for UserObject<T> {
    fn type_id(&self) -> TypeId {
        self.ty
    }

    fn fmt_display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        with_mark(&self.visiting, || {
            write!(f, "{}{{", self.def.name)?;
            let fields = self.fields.borrow();
            for (i, (name, v)) in self.def.fields.iter().zip(fields.iter()).enumerate() {
                if i != 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{name}: {v}")?;
            }
            f.write_str("}")
        })
        .unwrap_or_else(|| write!(f, "{}{{...}}", self.def.name))
    }

    fn implements(&self, func: ObjFunc) -> bool {
        matches!(
            func,
            ObjFunc::Size
                | ObjFunc::Hash
                | ObjFunc::Get
                | ObjFunc::Set
                | ObjFunc::Contains
                | ObjFunc::IndexOf
                | ObjFunc::Deconstruct
                | ObjFunc::Implements
        )
    }

    fn invoke(&self, func: ObjFunc, stack: &mut Stack<Value<T>>) -> Result<(), Error> {
        if invoke_values(&self.fields, func, stack)? {
            return Ok(());
        }
        match func {
            ObjFunc::Hash => stack.push(Value::Int(identity_hash(self)))?,
            ObjFunc::Implements => {
                let idx = stack.try_pop()?.as_int()?;
                let yes = ObjFunc::from_index(idx)
                    .map(|f| self.implements(f))
                    .unwrap_or(false);
                stack.push(Value::Bool(yes))?;
            }
            other => return Err(unsupported(other, &self.def.name)),
        }
        Ok(())
    }

    fn for_each_child(&self, f: &mut dyn FnMut(&Value<T>)) {
        for v in self.fields.borrow().iter() {
            f(v);
        }
    }

    fn visiting(&self) -> Option<&Cell<bool>> {
        Some(&self.visiting)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
pub mod test {
    use std::rc::Rc;

    use super::{count_refs, ArrayObject, ObjFunc, ObjRef, Object, StrObject, UserObject};
    use crate::{
        stack::{Stack, StackKind},
        types::{TypeId, UserTypeDef},
        value::Value,
        Error,
    };

    fn stack() -> Stack<Value<()>> {
        Stack::new(StackKind::Data, 32)
    }

    #[test]
    fn string_functions() {
        let s = StrObject::new("hello");
        let mut st = stack();
        Object::<()>::invoke(&s, ObjFunc::Size, &mut st).unwrap();
        assert_eq!(st.pop(), Some(Value::Int(5)));

        st.push(Value::Int(1)).unwrap();
        Object::<()>::invoke(&s, ObjFunc::Get, &mut st).unwrap();
        assert_eq!(st.pop(), Some(Value::Char(b'e')));

        st.push(Value::Char(b'l')).unwrap();
        Object::<()>::invoke(&s, ObjFunc::IndexOf, &mut st).unwrap();
        assert_eq!(st.pop(), Some(Value::Int(2)));

        st.push(Value::Int(1)).unwrap();
        st.push(Value::Int(3)).unwrap();
        Object::<()>::invoke(&s, ObjFunc::SubRange, &mut st).unwrap();
        let sub = st.pop().unwrap();
        assert_eq!(sub.to_string(), "ell");

        st.push(Value::Int(9)).unwrap();
        assert!(matches!(
            Object::<()>::invoke(&s, ObjFunc::Get, &mut st),
            Err(Error::IndexOutOfRange { index: 9, len: 5 })
        ));
        assert!(matches!(
            Object::<()>::invoke(&s, ObjFunc::ReadLine, &mut st),
            Err(Error::UnsupportedFunction { .. })
        ));
    }

    #[test]
    fn array_functions() {
        let a = ArrayObject::<()>::new(vec![Value::Int(1), Value::Int(2)]);
        let mut st = stack();
        st.push(Value::Int(3)).unwrap();
        a.invoke(ObjFunc::Append, &mut st).unwrap();
        assert_eq!(a.len(), 3);

        st.push(Value::Int(20)).unwrap();
        st.push(Value::Int(1)).unwrap();
        a.invoke(ObjFunc::Set, &mut st).unwrap();

        a.invoke(ObjFunc::Deconstruct, &mut st).unwrap();
        let got = st.iter().cloned().collect::<Vec<_>>();
        assert_eq!(
            got,
            vec![Value::Int(1), Value::Int(20), Value::Int(3), Value::Int(3)]
        );
    }

    #[test]
    fn cyclic_display_terminates() {
        let a: Rc<ArrayObject<()>> = Rc::new(ArrayObject::new(vec![Value::Int(1)]));
        let a_ref: ObjRef<()> = a.clone();
        let mut st = stack();
        st.push(Value::Obj(a_ref.clone())).unwrap();
        a.invoke(ObjFunc::Append, &mut st).unwrap();
        assert_eq!(Value::Obj(a_ref.clone()).to_string(), "[1 [...]]");

        // break the cycle so the test doesn't leak
        st.push(Value::Int(0)).unwrap();
        st.push(Value::Int(1)).unwrap();
        a.invoke(ObjFunc::Set, &mut st).unwrap();
        drop(a_ref);
        assert_eq!(Rc::strong_count(&a), 1);
    }

    #[test]
    fn counts_through_composites() {
        let s: ObjRef<()> = Rc::new(StrObject::new("shared"));
        let arr: ObjRef<()> = Rc::new(ArrayObject::new(vec![
            Value::Obj(s.clone()),
            Value::Obj(s.clone()),
        ]));
        let def = Rc::new(UserTypeDef {
            name: "pair".into(),
            fields: vec!["left".into(), "right".into()],
        });
        let user = UserObject::<()>::new(TypeId::new(TypeId::USER_MIN, 0), def);
        let mut st = stack();
        st.push(Value::Obj(arr.clone())).unwrap();
        st.push(Value::Int(0)).unwrap();
        user.invoke(ObjFunc::Set, &mut st).unwrap();
        st.push(Value::Obj(s.clone())).unwrap();
        st.push(Value::Int(1)).unwrap();
        user.invoke(ObjFunc::Set, &mut st).unwrap();
        let root = Value::Obj(Rc::new(user) as ObjRef<()>);

        assert_eq!(count_refs(&root, &s), 3);
        // every reference other than our own handle is reachable from root
        assert_eq!(Rc::strong_count(&s), count_refs(&root, &s) + 1);
        assert_eq!(
            root.to_string(),
            "pair{left: [shared shared], right: shared}"
        );

        drop(root);
        drop(arr);
        assert_eq!(Rc::strong_count(&s), 1);
    }
}

use core::{
    cell::{Cell, RefCell},
    fmt,
};
use std::rc::Rc;

use crate::{fastr::FaStr, types::TypeId, value::Value, vm::Forth, Error, WordFunc};

/// An executable unit: what slot 0 of every body holds.
pub enum Code<T: 'static> {
    /// A native primitive.
    Native(WordFunc<T>),
    /// Run the rest of this body with the inner interpreter.
    Docol,
    /// Push the address just past slot 0 of the running word, then nest
    /// into `body` at `entry`. Made by `does>` and by defining words whose
    /// action is itself a composed word.
    Indirect { body: Rc<Word<T>>, entry: usize },
}

/// One element of a compiled word body.
pub enum BodyElem<T: 'static> {
    /// The executable unit of this word. Only valid in slot 0.
    DirectCall(Code<T>),
    /// A call through another word's body. Only valid from slot 1 on.
    IndirectCall(Rc<Word<T>>),
    /// Inline data: literal operands, jump addresses, variable storage.
    Literal(Value<T>),
    /// A call to the word containing this element.
    Recurse,
}

pub struct Word<T: 'static> {
    name: FaStr,
    hidden: Cell<bool>,
    immediate: Cell<bool>,
    builtin: bool,
    body: RefCell<Vec<BodyElem<T>>>,
}

impl<T: 'static> Clone for Code<T> {
    fn clone(&self) -> Self {
        match self {
            Code::Native(f) => Code::Native(*f),
            Code::Docol => Code::Docol,
            Code::Indirect { body, entry } => Code::Indirect {
                body: body.clone(),
                entry: *entry,
            },
        }
    }
}

impl<T: 'static> Clone for BodyElem<T> {
    fn clone(&self) -> Self {
        match self {
            BodyElem::DirectCall(c) => BodyElem::DirectCall(c.clone()),
            BodyElem::IndirectCall(w) => BodyElem::IndirectCall(w.clone()),
            BodyElem::Literal(v) => BodyElem::Literal(v.clone()),
            BodyElem::Recurse => BodyElem::Recurse,
        }
    }
}

impl<T: 'static> Word<T> {
    /// A new, hidden word with an empty body.
    pub fn new(name: &str) -> Self {
        Self {
            name: FaStr::new(name),
            hidden: Cell::new(true),
            immediate: Cell::new(false),
            builtin: false,
            body: RefCell::new(Vec::new()),
        }
    }

    pub fn builtin(name: &str, func: WordFunc<T>, immediate: bool) -> Self {
        Self {
            name: FaStr::new(name),
            hidden: Cell::new(false),
            immediate: Cell::new(immediate),
            builtin: true,
            body: RefCell::new(vec![BodyElem::DirectCall(Code::Native(func))]),
        }
    }

    /// A visible word that pushes the address of its data area.
    pub fn variable(name: &str) -> Self {
        let word = Self::new(name);
        word.body
            .borrow_mut()
            .push(BodyElem::DirectCall(Code::Native(Forth::<T>::data_addr)));
        word.hidden.set(false);
        word
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn fastr(&self) -> &FaStr {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "<anon>"
        } else {
            self.name.as_str()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden.get()
    }

    pub fn hide(&self) {
        self.hidden.set(true);
    }

    pub fn unhide(&self) {
        self.hidden.set(false);
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate.get()
    }

    pub fn set_immediate(&self, immediate: bool) {
        self.immediate.set(immediate);
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    pub fn len(&self) -> usize {
        self.body.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.borrow().is_empty()
    }

    fn bad_offset(&self, index: usize) -> Error {
        Error::BadWordOffset {
            word: self.display_name().to_string(),
            index,
        }
    }

    /// The executable unit in slot 0.
    pub fn code(&self) -> Result<Code<T>, Error> {
        match self.body.borrow().first() {
            Some(BodyElem::DirectCall(c)) => Ok(c.clone()),
            _ => Err(Error::NotExecutable {
                word: self.display_name().to_string(),
                ip: 0,
            }),
        }
    }

    pub fn elem(&self, index: usize) -> Option<BodyElem<T>> {
        self.body.borrow().get(index).cloned()
    }

    fn check_slot(index: usize, elem: &BodyElem<T>) -> Result<(), Error> {
        match (index, elem) {
            (0, BodyElem::DirectCall(_)) => Ok(()),
            (0, _) | (_, BodyElem::DirectCall(_)) => Err(Error::MisplacedDirectCall),
            _ => Ok(()),
        }
    }

    /// Append one element, enforcing that only slot 0 holds a direct call.
    pub fn push(&self, elem: BodyElem<T>) -> Result<(), Error> {
        let mut body = self.body.borrow_mut();
        Self::check_slot(body.len(), &elem)?;
        body.push(elem);
        Ok(())
    }

    /// Replace the element at `index`, which must already exist.
    pub fn poke(&self, index: usize, elem: BodyElem<T>) -> Result<(), Error> {
        Self::check_slot(index, &elem)?;
        let old = {
            let mut body = self.body.borrow_mut();
            let slot = body.get_mut(index).ok_or_else(|| self.bad_offset(index))?;
            core::mem::replace(slot, elem)
        };
        drop(old);
        Ok(())
    }

    /// Replace the executable unit in slot 0.
    pub fn set_code(&self, code: Code<T>) -> Result<(), Error> {
        self.poke(0, BodyElem::DirectCall(code))
    }

    /// Grow the body by `n` zeroed data slots.
    pub fn expand_by(&self, n: usize) {
        let mut body = self.body.borrow_mut();
        body.extend((0..n).map(|_| BodyElem::Literal(Value::Int(0))));
    }

    /// Read the data slot at `index`.
    pub fn load(&self, index: usize) -> Result<Value<T>, Error> {
        match self.body.borrow().get(index) {
            Some(BodyElem::Literal(v)) if index != 0 => Ok(v.clone()),
            _ => Err(self.bad_offset(index)),
        }
    }

    /// Overwrite the data slot at `index`. Only data slots may be written.
    pub fn store(&self, index: usize, val: Value<T>) -> Result<(), Error> {
        let old = {
            let mut body = self.body.borrow_mut();
            match body.get_mut(index) {
                Some(BodyElem::Literal(slot)) if index != 0 => core::mem::replace(slot, val),
                _ => return Err(self.bad_offset(index)),
            }
        };
        drop(old);
        Ok(())
    }

    /// The type of the value in a data slot.
    pub fn slot_type(&self, index: usize) -> TypeId {
        match self.body.borrow().get(index) {
            Some(BodyElem::Literal(v)) => v.type_id(),
            Some(_) => TypeId::XT,
            None => TypeId::INVALID,
        }
    }
}

impl<T: 'static> fmt::Debug for Word<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Word")
            .field("name", &self.display_name())
            .field("hidden", &self.is_hidden())
            .field("immediate", &self.is_immediate())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
pub mod test {
    use std::rc::Rc;

    use super::{BodyElem, Code, Word};
    use crate::{value::Value, Error};

    #[test]
    fn first_slot_asymmetry() {
        let w = Word::<()>::new("w");
        assert!(matches!(
            w.push(BodyElem::Literal(Value::Int(1))),
            Err(Error::MisplacedDirectCall)
        ));
        w.push(BodyElem::DirectCall(Code::Docol)).unwrap();
        assert!(matches!(
            w.push(BodyElem::DirectCall(Code::Docol)),
            Err(Error::MisplacedDirectCall)
        ));
        let callee = Rc::new(Word::<()>::new("callee"));
        w.push(BodyElem::IndirectCall(callee.clone())).unwrap();
        assert_eq!(Rc::strong_count(&callee), 2);
        assert!(matches!(
            w.poke(1, BodyElem::DirectCall(Code::Docol)),
            Err(Error::MisplacedDirectCall)
        ));
        assert!(matches!(
            w.poke(5, BodyElem::Recurse),
            Err(Error::BadWordOffset { index: 5, .. })
        ));
        w.poke(1, BodyElem::Recurse).unwrap();
        assert_eq!(Rc::strong_count(&callee), 1);
    }

    #[test]
    fn data_slots() {
        let w = Word::<()>::variable("v");
        assert!(!w.is_hidden());
        w.expand_by(2);
        assert_eq!(w.len(), 3);
        w.store(2, Value::Int(42)).unwrap();
        assert_eq!(w.load(2).unwrap(), Value::Int(42));
        assert!(w.load(0).is_err());
        assert!(w.store(0, Value::Int(1)).is_err());
        assert!(w.store(3, Value::Int(1)).is_err());
    }
}

use std::rc::{Rc, Weak};

use crate::{
    value::Value,
    word::{BodyElem, Code, Word},
    Error, Mode,
};

/// The incremental body builder.
///
/// At most one word is under construction at a time. The compiler owns it
/// exclusively until it is revealed, and remembers the last word created
/// (weakly) for `immediate`, `does>`, `,` and `allot`.
pub struct Compiler<T: 'static> {
    pub(crate) mode: Mode,
    building: Option<Rc<Word<T>>>,
    last: Weak<Word<T>>,
    /// Data stack depth when the current definition started; control
    /// structures must leave it balanced.
    cs_depth: usize,
}

impl<T: 'static> Default for Compiler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Compiler<T> {
    pub fn new() -> Self {
        Self {
            mode: Mode::Interpreting,
            building: None,
            last: Weak::new(),
            cs_depth: 0,
        }
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub(crate) fn cs_depth(&self) -> usize {
        self.cs_depth
    }

    /// Abandon any word in progress and start a new, empty one.
    pub fn start_word_creation(&mut self, name: &str, cs_depth: usize) -> Rc<Word<T>> {
        if let Some(stale) = self.building.take() {
            tracing::warn!(name = stale.display_name(), "abandoning unfinished definition");
        }
        let word = Rc::new(Word::new(name));
        self.last = Rc::downgrade(&word);
        self.building = Some(word.clone());
        self.cs_depth = cs_depth;
        word
    }

    /// Drop the word in progress and go back to interpreting.
    pub fn reset(&mut self) {
        self.building = None;
        self.mode = Mode::Interpreting;
    }

    pub fn building(&self) -> Result<&Rc<Word<T>>, Error> {
        self.building
            .as_ref()
            .ok_or_else(|| Error::CompileStateError("no word is being defined".into()))
    }

    pub(crate) fn take_building(&mut self) -> Result<Rc<Word<T>>, Error> {
        self.building
            .take()
            .ok_or_else(|| Error::CompileStateError("no word is being defined".into()))
    }

    pub fn last(&self) -> Result<Rc<Word<T>>, Error> {
        self.last
            .upgrade()
            .ok_or_else(|| Error::CompileStateError("no word has been created".into()))
    }

    pub(crate) fn set_last(&mut self, word: &Rc<Word<T>>) {
        self.last = Rc::downgrade(word);
    }

    /// Append the executable unit. Only valid on an empty body.
    pub fn compile_xt(&self, code: Code<T>) -> Result<(), Error> {
        self.building()?.push(BodyElem::DirectCall(code))
    }

    /// Append raw inline data.
    pub fn compile_literal(&self, val: Value<T>) -> Result<(), Error> {
        self.building()?.push(BodyElem::Literal(val))
    }

    /// Append a call through `word`'s body.
    pub fn compile_cfa(&self, word: Rc<Word<T>>) -> Result<(), Error> {
        self.building()?.push(BodyElem::IndirectCall(word))
    }

    pub fn compile_elem(&self, elem: BodyElem<T>) -> Result<(), Error> {
        self.building()?.push(elem)
    }

    /// Compile a reference to `word`.
    ///
    /// On an empty body this must be a direct call; a composed target is
    /// wrapped so the new word runs its body.
    pub fn compile_word(&self, word: &Rc<Word<T>>) -> Result<(), Error> {
        let building = self.building()?;
        if building.is_empty() {
            let code = match word.code()? {
                Code::Docol => Code::Indirect {
                    body: word.clone(),
                    entry: 1,
                },
                other => other,
            };
            building.push(BodyElem::DirectCall(code))
        } else {
            building.push(BodyElem::IndirectCall(word.clone()))
        }
    }

    /// Patch an element of the word under construction.
    pub fn alter_element(&self, index: usize, elem: BodyElem<T>) -> Result<(), Error> {
        self.building()?.poke(index, elem)
    }

    /// The next free index of the word being built (or, failing that, of
    /// the last word created).
    pub fn here(&self) -> Result<usize, Error> {
        match &self.building {
            Some(w) => Ok(w.len()),
            None => self.last().map(|w| w.len()),
        }
    }

    /// Grow the last created word by `n` zeroed slots.
    pub fn expand_by(&self, n: usize) -> Result<(), Error> {
        self.last()?.expand_by(n);
        Ok(())
    }
}

use core::hash::BuildHasherDefault;
use std::{collections::HashMap, rc::Rc};

use hash32::FnvHasher;

use crate::{fastr::FaStr, word::Word, Error, WordFunc};

/// A static builtin word, as listed in a VM's builtin table.
pub struct BuiltinEntry<T: 'static> {
    pub name: &'static str,
    pub func: WordFunc<T>,
    pub immediate: bool,
}

type FnvBuild = BuildHasherDefault<FnvHasher>;

/// The name → word mapping. Holds one shared reference per visible entry.
pub struct Dictionary<T: 'static> {
    entries: HashMap<FaStr, Rc<Word<T>>, FnvBuild>,
}

impl<T: 'static> Default for Dictionary<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Dictionary<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::default(),
        }
    }

    pub fn from_builtins(builtins: &[BuiltinEntry<T>]) -> Self {
        let mut dict = Self::new();
        for bi in builtins {
            dict.add_word(Rc::new(Word::builtin(bi.name, bi.func, bi.immediate)));
        }
        dict
    }

    /// Bind the word under its (folded) name, returning any binding it
    /// shadows.
    pub fn add_word(&mut self, word: Rc<Word<T>>) -> Option<Rc<Word<T>>> {
        word.unhide();
        self.entries.insert(word.fastr().clone(), word)
    }

    /// Find a visible word by name.
    pub fn find_word(&self, name: &str) -> Option<Rc<Word<T>>> {
        self.entries
            .get(&FaStr::new(name))
            .filter(|w| !w.is_hidden())
            .cloned()
    }

    /// Hide a word and drop the dictionary's reference to it.
    ///
    /// Compiled callers hold their own references, so they keep working;
    /// the body is freed once the last of them goes away.
    pub fn forget_word(&mut self, name: &str) -> Result<Rc<Word<T>>, Error> {
        let key = FaStr::new(name);
        match self.entries.get(&key) {
            Some(w) if w.is_builtin() => return Err(Error::CantForgetBuiltins(name.to_string())),
            Some(_) => {}
            None => return Err(Error::UnknownWord(name.to_string())),
        }
        let word = self
            .entries
            .remove(&key)
            .ok_or_else(|| Error::UnknownWord(name.to_string()))?;
        word.hide();
        tracing::debug!(name = word.name(), "forgot word");
        Ok(word)
    }

    /// Visible names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entries
            .values()
            .filter(|w| !w.is_hidden())
            .map(|w| w.name())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub mod test {
    use std::rc::Rc;

    use super::Dictionary;
    use crate::{
        word::{BodyElem, Code, Word},
        Error,
    };

    fn colon_word(name: &str) -> Rc<Word<()>> {
        let w = Rc::new(Word::new(name));
        w.push(BodyElem::DirectCall(Code::Docol)).unwrap();
        w
    }

    #[test]
    fn shadow_and_forget() {
        let mut dict = Dictionary::new();
        let first = colon_word("Foo");
        assert!(first.is_hidden());
        assert!(dict.add_word(first.clone()).is_none());
        assert!(!first.is_hidden());
        assert!(Rc::ptr_eq(&dict.find_word("FOO").unwrap(), &first));

        let second = colon_word("foo");
        let shadowed = dict.add_word(second.clone()).unwrap();
        assert!(Rc::ptr_eq(&shadowed, &first));
        assert!(Rc::ptr_eq(&dict.find_word("foo").unwrap(), &second));
        drop(shadowed);
        assert_eq!(Rc::strong_count(&first), 1);

        // a "caller" that embedded the old body keeps it alive
        let caller = colon_word("caller");
        caller.push(BodyElem::IndirectCall(second.clone())).unwrap();

        let forgotten = dict.forget_word("foo").unwrap();
        assert!(forgotten.is_hidden());
        assert!(dict.find_word("foo").is_none());
        drop(forgotten);
        assert_eq!(Rc::strong_count(&second), 2);
        assert!(matches!(
            dict.forget_word("foo"),
            Err(Error::UnknownWord(_))
        ));
    }

    #[test]
    fn builtins_stay() {
        fn nop(_: &mut crate::Forth<()>) -> Result<crate::Flow<()>, Error> {
            Ok(crate::Flow::Continue)
        }
        let mut dict = Dictionary::from_builtins(&[crate::BuiltinEntry {
            name: "nop",
            func: nop,
            immediate: false,
        }]);
        assert_eq!(dict.names(), vec!["nop"]);
        assert!(matches!(
            dict.forget_word("NOP"),
            Err(Error::CantForgetBuiltins(_))
        ));
    }
}

//! Debugger support: debug levels, the breakpoint hook, and the decompiler
//! behind `see`.

use core::fmt::{self, Write};
use std::{collections::HashMap, rc::Rc};

use crate::{
    value::Value,
    word::{BodyElem, Code, Word},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugLevel {
    #[default]
    Off = 0,
    SingleStep = 1,
    Run = 2,
    StepOver = 3,
}

impl DebugLevel {
    pub fn from_int(level: i64) -> Option<Self> {
        match level {
            0 => Some(DebugLevel::Off),
            1 => Some(DebugLevel::SingleStep),
            2 => Some(DebugLevel::Run),
            3 => Some(DebugLevel::StepOver),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breakpoint {
    None,
    Enabled,
    Disabled,
}

/// Where the engine stopped.
pub struct Stop<'a, T: 'static> {
    pub word: &'a Rc<Word<T>>,
    pub ip: usize,
    /// Depth of the nest stack.
    pub depth: usize,
    /// Depth of the data stack.
    pub data_depth: usize,
    pub breakpoint: Breakpoint,
}

/// The engine's view of a debugger. Breakpoint storage is up to the hook;
/// the engine asks once per executed instruction while debugging is on.
pub trait DebugHook<T: 'static> {
    fn breakpoint(&self, word: &Rc<Word<T>>, ip: usize) -> Breakpoint;

    /// Called when the engine stops. Returns the level to continue with.
    fn stopped(&mut self, stop: &Stop<'_, T>) -> DebugLevel;
}

pub(crate) struct Debugger<T: 'static> {
    pub(crate) level: DebugLevel,
    pub(crate) hook: Option<Box<dyn DebugHook<T>>>,
    /// Nest depth at which step-over was requested.
    pub(crate) step_over_depth: usize,
}

impl<T: 'static> Default for Debugger<T> {
    fn default() -> Self {
        Self {
            level: DebugLevel::Off,
            hook: None,
            step_over_depth: 0,
        }
    }
}

impl<T: 'static> Debugger<T> {
    pub(crate) fn set_level(&mut self, level: DebugLevel, depth: usize) {
        self.level = level;
        if level == DebugLevel::StepOver {
            self.step_over_depth = depth;
        }
    }

    pub(crate) fn should_stop(&self, depth: usize, bp: Breakpoint) -> bool {
        match self.level {
            DebugLevel::Off => false,
            DebugLevel::SingleStep => true,
            DebugLevel::Run => bp == Breakpoint::Enabled,
            DebugLevel::StepOver => depth <= self.step_over_depth || bp == Breakpoint::Enabled,
        }
    }
}

/// A breakpoint table keyed by word identity and instruction offset, which
/// records every stop it sees.
pub struct Breakpoints {
    points: HashMap<(usize, usize), bool>,
    /// `(word name, ip)` of every stop, in order.
    pub stops: Vec<(String, usize)>,
    /// The level to continue with after each stop.
    pub resume: DebugLevel,
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self {
            points: HashMap::new(),
            stops: Vec::new(),
            resume: DebugLevel::Run,
        }
    }
}

impl Breakpoints {
    fn key<T: 'static>(word: &Rc<Word<T>>, ip: usize) -> (usize, usize) {
        (Rc::as_ptr(word) as usize, ip)
    }

    pub fn set<T: 'static>(&mut self, word: &Rc<Word<T>>, ip: usize, enabled: bool) {
        self.points.insert(Self::key(word, ip), enabled);
    }

    pub fn clear<T: 'static>(&mut self, word: &Rc<Word<T>>, ip: usize) {
        self.points.remove(&Self::key(word, ip));
    }
}

impl<T: 'static> DebugHook<T> for Breakpoints {
    fn breakpoint(&self, word: &Rc<Word<T>>, ip: usize) -> Breakpoint {
        match self.points.get(&Self::key(word, ip)) {
            Some(true) => Breakpoint::Enabled,
            Some(false) => Breakpoint::Disabled,
            None => Breakpoint::None,
        }
    }

    fn stopped(&mut self, stop: &Stop<'_, T>) -> DebugLevel {
        tracing::debug!(
            word = stop.word.display_name(),
            ip = stop.ip,
            depth = stop.depth,
            data_depth = stop.data_depth,
            "debugger stop"
        );
        self.stops.push((stop.word.display_name().to_string(), stop.ip));
        self.resume
    }
}

fn fmt_code<T: 'static>(code: &Code<T>, out: &mut impl Write) -> fmt::Result {
    match code {
        Code::Native(_) => out.write_str("native"),
        Code::Docol => out.write_str("docol"),
        Code::Indirect { body, entry } => {
            write!(out, "[docol] {}+{}", body.display_name(), entry)
        }
    }
}

/// Write one line per body element of `word`, e.g. `3: call dup`.
pub fn decompile<T: 'static>(word: &Word<T>, out: &mut impl Write) -> fmt::Result {
    for i in 0..word.len() {
        let Some(elem) = word.elem(i) else { break };
        write!(out, "{i}: ")?;
        match &elem {
            BodyElem::DirectCall(code) => fmt_code(code, out)?,
            BodyElem::IndirectCall(w) => write!(out, "call {}", w.display_name())?,
            BodyElem::Literal(v @ Value::Obj(_)) => write!(out, "lit \"{v}\"")?,
            BodyElem::Literal(v) => write!(out, "lit {v}")?,
            BodyElem::Recurse => out.write_str("recurse")?,
        }
        out.write_char('\n')?;
    }
    Ok(())
}

#[cfg(test)]
pub mod test {
    use std::rc::Rc;

    use super::{decompile, Breakpoint, Breakpoints, DebugHook, DebugLevel, Debugger};
    use crate::{
        value::Value,
        word::{BodyElem, Code, Word},
    };

    #[test]
    fn stop_rules() {
        let mut dbg = Debugger::<()>::default();
        assert!(!dbg.should_stop(1, Breakpoint::Enabled));
        dbg.set_level(DebugLevel::SingleStep, 1);
        assert!(dbg.should_stop(5, Breakpoint::None));
        dbg.set_level(DebugLevel::Run, 1);
        assert!(!dbg.should_stop(5, Breakpoint::Disabled));
        assert!(dbg.should_stop(5, Breakpoint::Enabled));
        dbg.set_level(DebugLevel::StepOver, 2);
        assert!(dbg.should_stop(2, Breakpoint::None));
        assert!(!dbg.should_stop(3, Breakpoint::None));
    }

    #[test]
    fn breakpoint_table() {
        let w = Rc::new(Word::<()>::new("w"));
        let other = Rc::new(Word::<()>::new("w"));
        let mut bps = Breakpoints::default();
        bps.set(&w, 2, true);
        bps.set(&w, 3, false);
        assert_eq!(DebugHook::<()>::breakpoint(&bps, &w, 2), Breakpoint::Enabled);
        assert_eq!(DebugHook::<()>::breakpoint(&bps, &w, 3), Breakpoint::Disabled);
        assert_eq!(DebugHook::<()>::breakpoint(&bps, &other, 2), Breakpoint::None);
        bps.clear(&w, 2);
        assert_eq!(DebugHook::<()>::breakpoint(&bps, &w, 2), Breakpoint::None);
    }

    #[test]
    fn decompiles() {
        let callee = Rc::new(Word::<()>::new("callee"));
        let w = Word::<()>::new("w");
        w.push(BodyElem::DirectCall(Code::Docol)).unwrap();
        w.push(BodyElem::IndirectCall(callee)).unwrap();
        w.push(BodyElem::Literal(Value::Int(3))).unwrap();
        w.push(BodyElem::Recurse).unwrap();
        let mut out = String::new();
        decompile(&w, &mut out).unwrap();
        assert_eq!(out, "0: docol\n1: call callee\n2: lit 3\n3: recurse\n");
    }
}

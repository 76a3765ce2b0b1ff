use core::fmt::Write;
use std::{
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::Arc,
};

use portable_atomic::{AtomicBool, Ordering};

use crate::{
    debug::{DebugHook, DebugLevel, Debugger, Stop},
    dictionary::{BuiltinEntry, Dictionary},
    input::WordStrBuf,
    output::OutputBuf,
    params::Params,
    stack::{Stack, StackKind},
    types::TypeRegistry,
    value::{Pointer, Value},
    word::{BodyElem, Code, Word},
    Error, Flow, Mode, WordFunc,
};

mod binop;
pub mod builtins;
mod compiler;
mod frame;

pub use self::compiler::Compiler;
pub(crate) use self::frame::{Frame, Frames};

/// Number of integer (and of boolean) state cells.
pub const STATE_CELLS: usize = 8;

/// Scratch cells reachable from forth code with `cell@`/`cell!` and
/// `flag@`/`flag!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StateCells {
    pub ints: [i64; STATE_CELLS],
    pub flags: [bool; STATE_CELLS],
}

/// A forth VM.
///
/// Everything the interpreter needs lives here, so any number of VMs can
/// exist side by side. `T` is an arbitrary host context, reachable from
/// builtins through `host_ctxt`.
pub struct Forth<T: 'static> {
    pub data_stack: Stack<Value<T>>,
    pub return_stack: Stack<i64>,
    pub temp_stack: Stack<Value<T>>,
    pub self_stack: Stack<Value<T>>,
    pub input: WordStrBuf,
    pub output: OutputBuf,
    pub host_ctxt: T,
    pub(crate) frames: Frames<T>,
    pub(crate) dict: Dictionary<T>,
    pub(crate) types: TypeRegistry<T>,
    pub(crate) compiler: Compiler<T>,
    pub(crate) debug: Debugger<T>,
    pub(crate) cells: StateCells,
    /// Nest depth the innermost running `execute_word` returns to.
    run_base: usize,
    in_comment: bool,
    interrupt: Arc<AtomicBool>,
}

impl<T: 'static> Forth<T> {
    pub fn new(
        params: Params,
        host_ctxt: T,
        builtins: &[BuiltinEntry<T>],
    ) -> Result<Self, Error> {
        let mut forth = Self {
            data_stack: Stack::new(StackKind::Data, params.data_stack_elems),
            return_stack: Stack::new(StackKind::Return, params.return_stack_elems),
            temp_stack: Stack::new(StackKind::Temp, params.temp_stack_elems),
            self_stack: Stack::new(StackKind::Self_, params.self_stack_elems),
            input: WordStrBuf::new(params.input_buf_elems),
            output: OutputBuf::new(params.output_buf_elems),
            host_ctxt,
            frames: Frames::new(),
            dict: Dictionary::from_builtins(builtins),
            types: TypeRegistry::with_value_types()?,
            compiler: Compiler::new(),
            debug: Debugger::default(),
            cells: StateCells::default(),
            run_base: 0,
            in_comment: false,
            interrupt: Arc::new(AtomicBool::new(false)),
        };
        forth.register_builtin_types()?;
        tracing::debug!(
            words = forth.dict.len(),
            types = forth.types.len(),
            "created forth vm"
        );
        Ok(forth)
    }

    /// Add a native word at runtime. It shadows any word of the same name.
    pub fn add_builtin(&mut self, name: &str, func: WordFunc<T>) {
        self.add_word(Rc::new(Word::builtin(name, func, false)));
    }

    fn add_word(&mut self, word: Rc<Word<T>>) {
        if let Some(old) = self.dict.add_word(word) {
            tracing::debug!(name = old.name(), "shadowed word");
        }
    }

    /// Find a visible word by name.
    pub fn find_word(&self, name: &str) -> Option<Rc<Word<T>>> {
        self.dict.find_word(name)
    }

    pub(crate) fn builtin(&self, name: &'static str) -> Result<Rc<Word<T>>, Error> {
        self.dict
            .find_word(name)
            .ok_or_else(|| Error::UnknownWord(name.to_string()))
    }

    pub fn dict(&self) -> &Dictionary<T> {
        &self.dict
    }

    pub fn types(&self) -> &TypeRegistry<T> {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeRegistry<T> {
        &mut self.types
    }

    pub fn mode(&self) -> Mode {
        self.compiler.mode()
    }

    pub fn cells(&self) -> &StateCells {
        &self.cells
    }

    /// A handle that interrupts the running line when set to `true`, e.g.
    /// from a signal handler or another thread.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn set_debug_hook(&mut self, hook: Box<dyn DebugHook<T>>) {
        self.debug.hook = Some(hook);
    }

    pub fn take_debug_hook(&mut self) -> Option<Box<dyn DebugHook<T>>> {
        self.debug.hook.take()
    }

    pub fn set_debug_level(&mut self, level: DebugLevel) {
        self.debug.set_level(level, self.frames.depth());
    }

    pub fn debug_level(&self) -> DebugLevel {
        self.debug.level
    }

    /// Drop everything transient: stacks, frames, the word under
    /// construction and comment state.
    pub fn reset(&mut self) {
        self.data_stack.clear();
        self.return_stack.clear();
        self.temp_stack.clear();
        self.self_stack.clear();
        self.frames.clear();
        self.run_base = 0;
        self.compiler.reset();
        self.in_comment = false;
    }

    /// Interpret everything in the input buffer.
    ///
    /// On success `ok.` (or `compiled.` while a definition is open) is
    /// appended to the output. On error the VM is reset, the rest of the
    /// line is discarded, and the error is returned.
    pub fn process_line(&mut self) -> Result<(), Error> {
        let res = (|| {
            loop {
                self.check_interrupt()?;
                if self.in_comment {
                    self.munch_comment();
                    if self.in_comment {
                        break Ok(());
                    }
                }
                self.input.advance();
                let word = match self.input.cur_word() {
                    Some(w) => w.to_string(),
                    None => break Ok(()),
                };
                self.process_word(&word)?;
            }
        })();
        match res {
            Ok(()) => {
                let prompt = match self.compiler.mode() {
                    Mode::Interpreting => "ok.\n",
                    _ => "compiled.\n",
                };
                self.output.push_str(prompt)?;
                Ok(())
            }
            Err(e) => {
                tracing::debug!(error = %e, "line failed");
                self.input.skip_line();
                self.reset();
                Err(e)
            }
        }
    }

    fn check_interrupt(&self) -> Result<(), Error> {
        if self.interrupt.swap(false, Ordering::AcqRel) {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Skip tokens up to and including one ending in `)`. Comment mode
    /// stays on if the line ends first.
    pub(crate) fn munch_comment(&mut self) {
        self.in_comment = true;
        loop {
            self.input.advance();
            match self.input.cur_word() {
                Some(s) if s.ends_with(')') => {
                    self.in_comment = false;
                    return;
                }
                Some(_) => {}
                None => return,
            }
        }
    }

    fn process_word(&mut self, word: &str) -> Result<(), Error> {
        if let Some(w) = self.dict.find_word(word) {
            return match self.compiler.mode() {
                Mode::Interpreting => self.execute_word(w),
                Mode::Compiling if w.is_immediate() => self.execute_word(w),
                Mode::Compiling => self.compiler.compile_word(&w),
                Mode::CompilingPostponed => {
                    self.compiler.mode = Mode::Compiling;
                    self.compile_postponed(w)
                }
                Mode::RuntimeCompiling => {
                    self.compiler.mode = Mode::Interpreting;
                    self.compiler.last()?.set_code(Code::Indirect {
                        body: w,
                        entry: 1,
                    })
                }
            };
        }

        let val = Self::parse_num(word).ok_or_else(|| Error::UnknownWord(word.to_string()))?;
        match self.compiler.mode() {
            Mode::Interpreting => self.data_stack.push(val)?,
            Mode::Compiling => self.compile_lit(val)?,
            Mode::CompilingPostponed | Mode::RuntimeCompiling => {
                return Err(Error::CompileStateError(format!(
                    "expected a word, got '{word}'"
                )))
            }
        }
        Ok(())
    }

    fn parse_num(word: &str) -> Option<Value<T>> {
        if let Ok(i) = word.parse::<i64>() {
            return Some(Value::Int(i));
        }
        let numeric_start = word
            .bytes()
            .next()
            .map_or(false, |b| b.is_ascii_digit() || b"+-.".contains(&b));
        if numeric_start && word.contains(['.', 'e', 'E']) {
            return word.parse::<f64>().ok().map(Value::Float);
        }
        None
    }

    /// `postpone`d words: immediate ones get compiled as calls, others get
    /// code that compiles them when the word being defined runs.
    fn compile_postponed(&mut self, word: Rc<Word<T>>) -> Result<(), Error> {
        if word.is_immediate() {
            self.compiler.compile_cfa(word)
        } else {
            self.compile_lit(Value::Xt(word))?;
            let comma = self.builtin("compile,")?;
            self.compiler.compile_cfa(comma)
        }
    }

    /// Compile `(literal) val` into the word being defined.
    pub(crate) fn compile_lit(&mut self, val: Value<T>) -> Result<(), Error> {
        let lit = self.builtin("(literal)")?;
        self.compiler.compile_cfa(lit)?;
        self.compiler.compile_literal(val)
    }

    /// Run a word to completion.
    ///
    /// May be called from inside a native word; it then runs nested on
    /// the same frame stack. On error the frames pushed here are unwound.
    pub fn execute_word(&mut self, word: Rc<Word<T>>) -> Result<(), Error> {
        let base = self.frames.depth();
        let outer = core::mem::replace(&mut self.run_base, base);
        self.frames.push(Frame::new(word, 1));
        let res = self.run_frames(base);
        self.run_base = outer;
        if res.is_err() {
            self.frames.truncate(base);
        }
        res
    }

    fn run_frames(&mut self, base: usize) -> Result<(), Error> {
        while self.frames.depth() > base {
            self.check_interrupt()?;
            match panic::catch_unwind(AssertUnwindSafe(|| self.step())) {
                Ok(res) => res?,
                Err(payload) => {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(%msg, depth = self.frames.depth(), "native word panicked");
                    return Err(Error::NativeFault(msg));
                }
            }
        }
        Ok(())
    }

    /// Single step of the inner interpreter.
    fn step(&mut self) -> Result<(), Error> {
        let (word, ip) = {
            let top = self.frames.current()?;
            (top.word.clone(), top.ip)
        };
        match word.code()? {
            Code::Docol => self.step_docol(word, ip),
            Code::Native(func) => {
                tracing::trace!(word = word.display_name(), "native");
                let flow = func(self);
                self.frames.pop();
                match flow? {
                    Flow::Continue => {}
                    Flow::Exit => {
                        if self.frames.depth() > self.run_base {
                            self.frames.pop();
                        }
                    }
                    Flow::Call(callee) => self.frames.push(Frame::new(callee, 1)),
                }
                Ok(())
            }
            Code::Indirect { body, entry } => {
                tracing::trace!(word = word.display_name(), body = body.display_name(), entry, "indirect");
                self.data_stack.push(Value::Ptr(Pointer::new(word, 1)))?;
                *self.frames.current_mut()? = Frame::new(body, entry);
                Ok(())
            }
        }
    }

    fn step_docol(&mut self, word: Rc<Word<T>>, ip: usize) -> Result<(), Error> {
        let Some(elem) = word.elem(ip) else {
            // Fell off the end: implicit exit.
            self.frames.pop();
            return Ok(());
        };
        if self.debug.level != DebugLevel::Off {
            self.debug_check(&word, ip);
        }
        self.frames.current_mut()?.ip = ip + 1;
        let callee = match elem {
            BodyElem::IndirectCall(callee) => callee,
            BodyElem::Recurse => word,
            BodyElem::DirectCall(_) | BodyElem::Literal(_) => {
                return Err(Error::NotExecutable {
                    word: word.display_name().to_string(),
                    ip,
                })
            }
        };
        tracing::trace!(callee = callee.display_name(), ip, "nest");
        self.frames.push(Frame::new(callee, 1));
        Ok(())
    }

    fn debug_check(&mut self, word: &Rc<Word<T>>, ip: usize) {
        let Some(mut hook) = self.debug.hook.take() else {
            return;
        };
        let depth = self.frames.depth();
        let breakpoint = hook.breakpoint(word, ip);
        if self.debug.should_stop(depth, breakpoint) {
            let stop = Stop {
                word,
                ip,
                depth,
                data_depth: self.data_stack.depth(),
                breakpoint,
            };
            let next = hook.stopped(&stop);
            self.debug.set_level(next, depth);
        }
        self.debug.hook = Some(hook);
    }

    /// Slot 0 of variables and `create`d words: push the address of the
    /// word's data area.
    pub(crate) fn data_addr(&mut self) -> Result<Flow<T>, Error> {
        let word = self.frames.current()?.word.clone();
        self.data_stack.push(Value::Ptr(Pointer::new(word, 1)))?;
        Ok(Flow::Continue)
    }

    /// Slot 0 of constants: push slot 1.
    pub(crate) fn push_constant(&mut self) -> Result<Flow<T>, Error> {
        let word = self.frames.current()?.word.clone();
        self.data_stack.push(word.load(1)?)?;
        Ok(Flow::Continue)
    }

    /// Define a constant word outside of any definition. It becomes the
    /// last created word.
    pub fn define_constant(&mut self, name: &str, val: Value<T>) -> Result<Rc<Word<T>>, Error> {
        let word = self.add_constant(name, val)?;
        self.compiler.set_last(&word);
        Ok(word)
    }

    /// Like [`Forth::define_constant`], but `immediate`, `,` and friends
    /// keep acting on whatever word was created before.
    pub(crate) fn add_constant(&mut self, name: &str, val: Value<T>) -> Result<Rc<Word<T>>, Error> {
        let word = Rc::new(Word::new(name));
        word.push(BodyElem::DirectCall(Code::Native(Self::push_constant)))?;
        word.push(BodyElem::Literal(val))?;
        self.add_word(word.clone());
        Ok(word)
    }

    /// Printable form of a value; types print by name.
    pub fn format_value(&self, val: &Value<T>) -> String {
        match val {
            Value::Type(t) => self.types.name_of(*t),
            other => other.to_string(),
        }
    }

    /// Write the data stack, bottom first, as `<depth> v1 v2 ...`.
    pub fn write_stack(&mut self) -> Result<(), Error> {
        let mut line = format!("<{}>", self.data_stack.depth());
        for v in self.data_stack.iter() {
            line.push(' ');
            line.push_str(&self.format_value(v));
        }
        writeln!(&mut self.output, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use std::{cell::Cell, rc::Rc};

    use portable_atomic::Ordering;

    use crate::{
        debug::{Breakpoints, DebugHook, DebugLevel, Stop, Breakpoint},
        testutil::{runtest, runtest_with},
        value::Value,
        word::Word,
        Error, Flow, Forth, Mode, Params,
    };

    fn vm() -> Forth<()> {
        Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap()
    }

    fn run(forth: &mut Forth<()>, line: &str) -> Result<String, Error> {
        forth.output.clear();
        forth.input.fill(line).unwrap();
        forth.process_line()?;
        Ok(forth.output.as_str().to_string())
    }

    #[test]
    fn forth() {
        runtest(
            r#"
            > 2 3 + .
            < 5 ok.
            > : add23 2 3 + ;
            > add23 .
            < 5 ok.
            > : star 42 emit ;
            > star
            < *ok.
            x 1 0 /
            x nothing-here
            > 1.5 2 * .
            < 3.0 ok.
            "#,
        );
    }

    #[test]
    fn compiled_prompt() {
        let mut forth = vm();
        assert_eq!(run(&mut forth, ": sq dup *").unwrap(), "compiled.\n");
        assert_eq!(forth.mode(), Mode::Compiling);
        assert_eq!(run(&mut forth, ";").unwrap(), "ok.\n");
        assert_eq!(run(&mut forth, "7 sq .").unwrap(), "49 ok.\n");
    }

    #[test]
    fn error_recovery() {
        let mut forth = vm();
        forth.temp_stack.push(Value::Int(1)).unwrap();
        assert!(matches!(
            run(&mut forth, "1 2 3 : broken ( open comment"),
            Ok(_)
        ));
        assert_eq!(run(&mut forth, "still comment ) bogus"), Err(Error::UnknownWord("bogus".into())));
        assert_eq!(forth.data_stack.depth(), 0);
        assert_eq!(forth.temp_stack.depth(), 0);
        assert_eq!(forth.mode(), Mode::Interpreting);
        assert!(forth.find_word("broken").is_none());
        assert_eq!(run(&mut forth, "1 .").unwrap(), "1 ok.\n");
    }

    #[test]
    fn host_builtins() {
        struct Counter {
            calls: Cell<usize>,
        }
        fn bump(forth: &mut Forth<Counter>) -> Result<Flow<Counter>, Error> {
            let n = forth.host_ctxt.calls.get() + 1;
            forth.host_ctxt.calls.set(n);
            forth.data_stack.push(Value::Int(n as i64))?;
            Ok(Flow::Continue)
        }
        fn boom(_forth: &mut Forth<Counter>) -> Result<Flow<Counter>, Error> {
            panic!("boom")
        }

        let mut forth = Forth::new(
            Params::default(),
            Counter { calls: Cell::new(0) },
            Forth::FULL_BUILTINS,
        )
        .unwrap();
        forth.add_builtin("bump", bump);
        forth.add_builtin("boom", boom);
        runtest_with(
            &mut forth,
            r#"
            > : twice bump bump + ;
            > twice .
            < 3 ok.
            x 1 boom
            > depth .
            < 0 ok.
            "#,
        );
        assert_eq!(forth.host_ctxt.calls.get(), 2);
    }

    #[test]
    fn panics_are_faults() {
        fn boom(_forth: &mut Forth<()>) -> Result<Flow<()>, Error> {
            panic!("boom")
        }
        let mut forth = vm();
        forth.add_builtin("boom", boom);
        run(&mut forth, ": inner boom ; : outer inner ;").unwrap();
        assert_eq!(
            run(&mut forth, "outer"),
            Err(Error::NativeFault("boom".into()))
        );
        assert_eq!(forth.frames.depth(), 0);
    }

    #[test]
    fn interrupt() {
        let mut forth = vm();
        run(&mut forth, ": spin begin again ;").unwrap();
        let handle = forth.interrupt_handle();
        handle.store(true, Ordering::Release);
        assert_eq!(run(&mut forth, "spin"), Err(Error::Interrupted));
        assert!(!handle.load(Ordering::Acquire));
        assert_eq!(run(&mut forth, "1 .").unwrap(), "1 ok.\n");
    }

    #[test]
    fn execute_nested() {
        fn call_square(forth: &mut Forth<()>) -> Result<Flow<()>, Error> {
            let sq = forth
                .find_word("sq")
                .ok_or_else(|| Error::UnknownWord("sq".into()))?;
            forth.execute_word(sq)?;
            Ok(Flow::Continue)
        }
        let mut forth = vm();
        forth.add_builtin("call-sq", call_square);
        run(&mut forth, ": sq dup * ;").unwrap();
        run(&mut forth, ": go 3 call-sq 1 + ;").unwrap();
        assert_eq!(run(&mut forth, "go .").unwrap(), "10 ok.\n");
        // `exit` inside the nested run only leaves `sq`.
        run(&mut forth, ": sq dup * exit 100 ;").unwrap();
        assert_eq!(run(&mut forth, "go .").unwrap(), "10 ok.\n");
    }

    #[test]
    fn single_step() {
        struct Recorder(Rc<Cell<usize>>);
        impl DebugHook<()> for Recorder {
            fn breakpoint(&self, _word: &Rc<Word<()>>, _ip: usize) -> Breakpoint {
                Breakpoint::None
            }
            fn stopped(&mut self, _stop: &Stop<'_, ()>) -> DebugLevel {
                self.0.set(self.0.get() + 1);
                DebugLevel::SingleStep
            }
        }

        let stops = Rc::new(Cell::new(0));
        let mut forth = vm();
        run(&mut forth, ": three 1 2 + ;").unwrap();
        forth.set_debug_hook(Box::new(Recorder(stops.clone())));
        forth.set_debug_level(DebugLevel::SingleStep);
        run(&mut forth, "three drop").unwrap();
        // (literal) 1 (literal) 2 +
        assert_eq!(stops.get(), 3);
    }

    #[test]
    fn breakpoints() {
        let mut forth = vm();
        run(&mut forth, ": inc 1 + ; : three 1 inc inc ;").unwrap();
        let three = forth.find_word("three").unwrap();
        let mut bps = Breakpoints::default();
        bps.set(&three, 4, true);
        bps.set(&three, 3, false);
        forth.set_debug_hook(Box::new(bps));
        forth.set_debug_level(DebugLevel::Run);
        assert_eq!(run(&mut forth, "three .").unwrap(), "3 ok.\n");
        let _hook = forth.take_debug_hook().unwrap();
        forth.set_debug_level(DebugLevel::Off);
        assert_eq!(forth.debug_level(), DebugLevel::Off);
    }

    #[test]
    fn numbers() {
        let mut forth = vm();
        assert_eq!(run(&mut forth, "-7 . 2.5 . 1e3 . -.5 .").unwrap(), "-7 2.5 1000.0 -0.5 ok.\n");
        assert!(matches!(run(&mut forth, "e"), Err(Error::UnknownWord(_))));
    }
}

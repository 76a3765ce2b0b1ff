//! Control structures.
//!
//! The compile-time halves are immediate words that emit
//! `(literal) addr jump` style sequences and keep `(address, tag)` pairs on
//! the data stack until the matching closer patches or consumes them. The
//! runtime halves act on the frame of the word that called them.

use crate::{
    value::Value,
    word::BodyElem,
    Error, Flow, Forth, Mode,
};

const TAG_IF: i64 = 0x1F_0001;
const TAG_ELSE: i64 = 0x1F_0002;
const TAG_BEGIN: i64 = 0x1F_0003;
const TAG_WHILE: i64 = 0x1F_0004;
const TAG_DO: i64 = 0x1F_0005;

/// Is `val` the tag half of an open control structure's entry?
pub(crate) fn is_cs_tag<T: 'static>(val: &Value<T>) -> bool {
    matches!(val, Value::Int(TAG_IF..=TAG_DO))
}

impl<T: 'static> Forth<T> {
    pub(crate) fn require_compiling(&self, word: &'static str) -> Result<(), Error> {
        match self.compiler.mode() {
            Mode::Compiling => Ok(()),
            _ => Err(Error::CompileStateError(format!(
                "'{word}' is only valid inside a definition"
            ))),
        }
    }

    fn cs_push(&mut self, addr: usize, tag: i64) -> Result<(), Error> {
        self.data_stack.push(Value::Int(addr as i64))?;
        self.data_stack.push(Value::Int(tag))?;
        Ok(())
    }

    /// Pop a control-structure entry, which must carry one of `expect`.
    fn cs_pop(&mut self, expect: &[i64], closer: &'static str) -> Result<(usize, i64), Error> {
        let tag = match self.data_stack.try_pop()? {
            Value::Int(t) if expect.contains(&t) => t,
            _ => return Err(Error::ControlMismatch(closer)),
        };
        let addr = self.data_stack.try_pop()?.as_int()?;
        let addr = usize::try_from(addr).map_err(|_| Error::ControlMismatch(closer))?;
        Ok((addr, tag))
    }

    /// Compile `(literal) 0` and return the index of the `0`, to be
    /// patched later.
    fn compile_placeholder(&mut self) -> Result<usize, Error> {
        let lit = self.builtin("(literal)")?;
        self.compiler.compile_cfa(lit)?;
        let addr = self.compiler.here()?;
        self.compiler.compile_literal(Value::Int(0))?;
        Ok(addr)
    }

    fn patch(&mut self, at: usize, target: usize) -> Result<(), Error> {
        self.compiler
            .alter_element(at, BodyElem::Literal(Value::Int(target as i64)))
    }

    /// Compile `(literal) target prim`.
    fn compile_jump_to(&mut self, target: usize, prim: &'static str) -> Result<(), Error> {
        self.compile_lit(Value::Int(target as i64))?;
        let prim = self.builtin(prim)?;
        self.compiler.compile_cfa(prim)
    }

    fn compile_builtin(&mut self, name: &'static str) -> Result<(), Error> {
        let word = self.builtin(name)?;
        self.compiler.compile_cfa(word)
    }

    pub fn if_(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("if")?;
        let at = self.compile_placeholder()?;
        self.compile_builtin("jumponfalse")?;
        self.cs_push(at, TAG_IF)?;
        Ok(Flow::Continue)
    }

    pub fn else_(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("else")?;
        let (if_at, _) = self.cs_pop(&[TAG_IF], "else without if")?;
        let at = self.compile_placeholder()?;
        self.compile_builtin("jump")?;
        let here = self.compiler.here()?;
        self.patch(if_at, here)?;
        self.cs_push(at, TAG_ELSE)?;
        Ok(Flow::Continue)
    }

    pub fn then(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("then")?;
        let (at, _) = self.cs_pop(&[TAG_IF, TAG_ELSE], "then without if")?;
        let here = self.compiler.here()?;
        self.patch(at, here)?;
        Ok(Flow::Continue)
    }

    pub fn begin(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("begin")?;
        let here = self.compiler.here()?;
        self.cs_push(here, TAG_BEGIN)?;
        Ok(Flow::Continue)
    }

    pub fn until(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("until")?;
        let (dest, _) = self.cs_pop(&[TAG_BEGIN], "until without begin")?;
        self.compile_jump_to(dest, "jumponfalse")?;
        Ok(Flow::Continue)
    }

    pub fn again(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("again")?;
        let (dest, _) = self.cs_pop(&[TAG_BEGIN], "again without begin")?;
        self.compile_jump_to(dest, "jump")?;
        Ok(Flow::Continue)
    }

    pub fn while_(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("while")?;
        match self.data_stack.try_peek()? {
            Value::Int(TAG_BEGIN) => {}
            _ => return Err(Error::ControlMismatch("while without begin")),
        }
        let at = self.compile_placeholder()?;
        self.compile_builtin("jumponfalse")?;
        self.cs_push(at, TAG_WHILE)?;
        Ok(Flow::Continue)
    }

    pub fn repeat(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("repeat")?;
        let (while_at, _) = self.cs_pop(&[TAG_WHILE], "repeat without while")?;
        let (dest, _) = self.cs_pop(&[TAG_BEGIN], "repeat without begin")?;
        self.compile_jump_to(dest, "jump")?;
        let here = self.compiler.here()?;
        self.patch(while_at, here)?;
        Ok(Flow::Continue)
    }

    fn compile_do(&mut self, prim: &'static str) -> Result<(), Error> {
        let leave_at = self.compile_placeholder()?;
        self.compile_builtin(prim)?;
        let entry = self.compiler.here()?;
        self.data_stack.push(Value::Int(entry as i64))?;
        self.cs_push(leave_at, TAG_DO)
    }

    pub fn do_(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("do")?;
        self.compile_do("(do)")?;
        Ok(Flow::Continue)
    }

    pub fn qdo(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("?do")?;
        self.compile_do("(?do)")?;
        Ok(Flow::Continue)
    }

    fn compile_loop(&mut self, prim: &'static str, closer: &'static str) -> Result<(), Error> {
        let (leave_at, _) = self.cs_pop(&[TAG_DO], closer)?;
        let entry = self.data_stack.try_pop()?.as_int()?;
        let entry = usize::try_from(entry).map_err(|_| Error::ControlMismatch(closer))?;
        self.compile_jump_to(entry, prim)?;
        let here = self.compiler.here()?;
        self.patch(leave_at, here)
    }

    pub fn loop_(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("loop")?;
        self.compile_loop("(loop)", "loop without do")?;
        Ok(Flow::Continue)
    }

    pub fn plus_loop(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("+loop")?;
        self.compile_loop("(+loop)", "+loop without do")?;
        Ok(Flow::Continue)
    }

    pub fn leave(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("leave")?;
        self.compile_builtin("(leave)")?;
        Ok(Flow::Continue)
    }

    pub fn unloop(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("unloop")?;
        self.compile_builtin("(unloop)")?;
        Ok(Flow::Continue)
    }

    pub fn recurse(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("recurse")?;
        self.compiler.compile_elem(BodyElem::Recurse)?;
        Ok(Flow::Continue)
    }

    pub fn exit(&mut self) -> Result<Flow<T>, Error> {
        Ok(Flow::Exit)
    }

    //
    // Runtime halves
    //

    /// Push the inline literal following the call to this word, and step
    /// the caller past it.
    pub fn literal(&mut self) -> Result<Flow<T>, Error> {
        let parent = self.frames.parent_mut()?;
        let val = parent.word.load(parent.ip)?;
        parent.ip += 1;
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    /// Continue the calling word at `addr`.
    fn jump_parent(&mut self, addr: i64) -> Result<(), Error> {
        let parent = self.frames.parent_mut()?;
        let len = parent.word.len();
        let target = usize::try_from(addr)
            .ok()
            .filter(|a| (1..=len).contains(a))
            .ok_or_else(|| Error::BadWordOffset {
                word: parent.word.display_name().to_string(),
                index: addr.max(0) as usize,
            })?;
        parent.ip = target;
        Ok(())
    }

    /// `( addr -- )`
    pub fn jump(&mut self) -> Result<Flow<T>, Error> {
        let addr = self.data_stack.try_pop()?.as_int()?;
        self.jump_parent(addr)?;
        Ok(Flow::Continue)
    }

    /// `( flag addr -- )`
    pub fn jump_if_false(&mut self) -> Result<Flow<T>, Error> {
        let addr = self.data_stack.try_pop()?.as_int()?;
        if !self.data_stack.try_pop()?.is_truthy()? {
            self.jump_parent(addr)?;
        }
        Ok(Flow::Continue)
    }

    /// `( flag addr -- )`
    pub fn jump_if_true(&mut self) -> Result<Flow<T>, Error> {
        let addr = self.data_stack.try_pop()?.as_int()?;
        if self.data_stack.try_pop()?.is_truthy()? {
            self.jump_parent(addr)?;
        }
        Ok(Flow::Continue)
    }

    /// `( limit start leave -- )`, pushing `leave limit index` on the
    /// return stack.
    pub fn do_runtime(&mut self) -> Result<Flow<T>, Error> {
        let leave = self.data_stack.try_pop()?.as_int()?;
        let start = self.data_stack.try_pop()?.as_int()?;
        let limit = self.data_stack.try_pop()?.as_int()?;
        self.return_stack.push(leave)?;
        self.return_stack.push(limit)?;
        self.return_stack.push(start)?;
        Ok(Flow::Continue)
    }

    /// Like `(do)`, but skips the loop when start equals limit.
    pub fn qdo_runtime(&mut self) -> Result<Flow<T>, Error> {
        let leave = self.data_stack.try_pop()?.as_int()?;
        let start = self.data_stack.try_pop()?.as_int()?;
        let limit = self.data_stack.try_pop()?.as_int()?;
        if start == limit {
            self.jump_parent(leave)?;
        } else {
            self.return_stack.push(leave)?;
            self.return_stack.push(limit)?;
            self.return_stack.push(start)?;
        }
        Ok(Flow::Continue)
    }

    /// Advance the loop index by `step`. Jumps back to `entry` unless the
    /// loop is done, in which case the loop parameters are dropped.
    fn loop_step(&mut self, entry: i64, step: i64, plus: bool) -> Result<(), Error> {
        let index = *self.return_stack.try_peek_back_n(0)?;
        let limit = *self.return_stack.try_peek_back_n(1)?;
        let next = index.wrapping_add(step);
        let done = match (plus, step < 0) {
            (true, true) => next < limit,
            _ => next >= limit,
        };
        if done {
            self.drop_loop_params()
        } else {
            self.return_stack.overwrite_back_n(0, next)?;
            self.jump_parent(entry)
        }
    }

    fn drop_loop_params(&mut self) -> Result<(), Error> {
        for _ in 0..3 {
            self.return_stack.try_pop()?;
        }
        Ok(())
    }

    /// `( entry -- )`
    pub fn loop_runtime(&mut self) -> Result<Flow<T>, Error> {
        let entry = self.data_stack.try_pop()?.as_int()?;
        self.loop_step(entry, 1, false)?;
        Ok(Flow::Continue)
    }

    /// `( step entry -- )`
    pub fn plus_loop_runtime(&mut self) -> Result<Flow<T>, Error> {
        let entry = self.data_stack.try_pop()?.as_int()?;
        let step = self.data_stack.try_pop()?.as_int()?;
        self.loop_step(entry, step, true)?;
        Ok(Flow::Continue)
    }

    pub fn leave_runtime(&mut self) -> Result<Flow<T>, Error> {
        let leave = *self.return_stack.try_peek_back_n(2)?;
        self.drop_loop_params()?;
        self.jump_parent(leave)?;
        Ok(Flow::Continue)
    }

    pub fn unloop_runtime(&mut self) -> Result<Flow<T>, Error> {
        self.drop_loop_params()?;
        Ok(Flow::Continue)
    }

    pub fn loop_i(&mut self) -> Result<Flow<T>, Error> {
        let idx = *self.return_stack.try_peek_back_n(0)?;
        self.data_stack.push(Value::Int(idx))?;
        Ok(Flow::Continue)
    }

    pub fn loop_j(&mut self) -> Result<Flow<T>, Error> {
        let idx = *self.return_stack.try_peek_back_n(3)?;
        self.data_stack.push(Value::Int(idx))?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
pub mod test {
    use crate::{testutil::runtest, Error, Forth, Params};

    #[test]
    fn if_else_then() {
        runtest(
            r#"
            > : sign dup 0 < if drop -1 else 0 > if 1 else 0 then then ;
            > -5 sign . 0 sign . 7 sign .
            < -1 0 1 ok.
            x if
            x : bad then ;
            x : bad2 1 if ;
            > 1 .
            < 1 ok.
            "#,
        );
    }

    #[test]
    fn begin_loops() {
        runtest(
            r#"
            > : test10 0 begin 1+ dup 10 = until dup . ;
            > test10 .
            < 10 10 ok.
            > : countdown begin dup 0 > while dup . 1- repeat drop ;
            > 3 countdown
            < 3 2 1 ok.
            > : first-big begin 1+ dup 5 > if exit then again ;
            > 0 first-big .
            < 6 ok.
            x : bad begin 1 while ;
            "#,
        );
    }

    #[test]
    fn do_loops() {
        runtest(
            r#"
            > : count 5 0 do i . loop ;
            > count
            < 0 1 2 3 4 ok.
            > : evens 10 0 do i . 2 +loop ;
            > evens
            < 0 2 4 6 8 ok.
            > : down 0 3 do i . -1 +loop ;
            > down
            < 3 2 1 0 ok.
            > : grid 2 0 do 3 0 do j i + . loop loop ;
            > grid
            < 0 1 2 1 2 3 ok.
            > : none 3 3 ?do i . loop 99 . ;
            > none
            < 99 ok.
            > : early 10 0 do i 3 = if leave then i . loop 42 . ;
            > early
            < 0 1 2 42 ok.
            > : bail 10 0 do i 2 = if unloop exit then i . loop ;
            > bail depth .
            < 0 1 0 ok.
            "#,
        );
    }

    #[test]
    fn nested_if_in_loops() {
        runtest(
            r#"
            > : fizz 16 1 do i 15 mod 0 = if 1 . else i 5 mod 0 = if 2 . else i 3 mod 0 = if 3 . then then then loop ;
            > fizz
            < 3 2 3 3 2 3 1 ok.
            "#,
        );
    }

    #[test]
    fn recursion() {
        runtest(
            r#"
            > : fact dup 1 > if dup 1- recurse * then ;
            > 10 fact .
            < 3628800 ok.
            "#,
        );
    }

    #[test]
    fn jump_addresses_are_patched() {
        let mut forth = Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap();
        forth.input.fill(": t if 1 else 2 then ; see t").unwrap();
        forth.process_line().unwrap();
        assert_eq!(
            forth.output.as_str(),
            "0: docol\n\
             1: call (literal)\n\
             2: lit 9\n\
             3: call jumponfalse\n\
             4: call (literal)\n\
             5: lit 1\n\
             6: call (literal)\n\
             7: lit 11\n\
             8: call jump\n\
             9: call (literal)\n\
             10: lit 2\n\
             ok.\n"
        );
    }

    #[test]
    fn jump_on_true() {
        runtest(
            r#"
            > : choose ( f -- n ) [ here 6 + ] literal jumptrue 1 exit 2 ;
            > true choose . false choose . 5 choose . 0 choose .
            < 2 1 2 1 ok.
            > : stay false 100 jumptrue 7 ;
            > stay .
            < 7 ok.
            > : leap true 100 jumptrue 7 ;
            x leap
            "#,
        );
    }

    #[test]
    fn runtime_jumps_are_checked() {
        let mut forth = Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap();
        forth.input.fill(": far 100 jump ; far").unwrap();
        assert!(matches!(
            forth.process_line(),
            Err(Error::BadWordOffset { index: 100, .. })
        ));
        forth.input.fill("5 jump").unwrap();
        assert_eq!(forth.process_line(), Err(Error::CallStackCorrupted));
    }
}

use core::fmt::Write;
use std::rc::Rc;

use super::control::is_cs_tag;
use crate::{
    debug::decompile,
    object::StrObject,
    value::Value,
    word::{BodyElem, Code, Word},
    Error, Flow, Forth, Mode, ReplaceErr,
};

impl<T: 'static> Forth<T> {
    /// Take the next token off of the input buffer as a name.
    pub(crate) fn munch_name(&mut self, word: &'static str) -> Result<String, Error> {
        self.input.advance();
        self.input
            .cur_word()
            .map(str::to_string)
            .ok_or(Error::MissingName(word))
    }

    fn munch_word(&mut self, word: &'static str) -> Result<Rc<Word<T>>, Error> {
        let name = self.munch_name(word)?;
        self.find_word(&name).ok_or(Error::UnknownWord(name))
    }

    /// Raw text up to the closing quote.
    fn munch_str(&mut self) -> Result<String, Error> {
        let text = self
            .input
            .advance_until(b'"')
            .replace_err(Error::BadStrLiteral)?;
        Ok(text.to_string())
    }

    fn pop_xt(&mut self) -> Result<Rc<Word<T>>, Error> {
        let val = self.data_stack.try_pop()?;
        Ok(val.as_xt()?.clone())
    }

    fn start_definition(&mut self, name: &str) -> Result<(), Error> {
        if self.compiler.mode() != Mode::Interpreting {
            return Err(Error::CompileStateError(
                "definitions can't be nested".into(),
            ));
        }
        self.compiler
            .start_word_creation(name, self.data_stack.depth());
        self.compiler.compile_xt(Code::Docol)?;
        self.compiler.mode = Mode::Compiling;
        Ok(())
    }

    pub fn colon(&mut self) -> Result<Flow<T>, Error> {
        let name = self.munch_name(":")?;
        self.start_definition(&name)?;
        Ok(Flow::Continue)
    }

    /// Like `:`, but the finished word is left on the stack as an xt.
    pub fn colon_noname(&mut self) -> Result<Flow<T>, Error> {
        self.start_definition("")?;
        Ok(Flow::Continue)
    }

    pub fn semicolon(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling(";")?;
        self.reveal()?;
        self.compiler.mode = Mode::Interpreting;
        Ok(Flow::Continue)
    }

    /// Finish the word under construction: named words go into the
    /// dictionary, anonymous ones onto the data stack.
    pub(crate) fn reveal(&mut self) -> Result<(), Error> {
        let depth = self.data_stack.depth();
        let start = self.compiler.cs_depth();
        if depth < start {
            return Err(Error::CompileStateError(format!(
                "definition consumed {} values from the data stack",
                start - depth
            )));
        }
        if depth > start {
            if self.data_stack.try_peek().map_or(false, is_cs_tag) {
                return Err(Error::ControlMismatch("unterminated control structure"));
            }
            return Err(Error::CompileStateError(format!(
                "definition left {} values on the data stack",
                depth - start
            )));
        }
        let word = self.compiler.take_building()?;
        if word.is_anonymous() {
            word.unhide();
            self.data_stack.push(Value::Xt(word))?;
        } else {
            tracing::debug!(name = word.name(), len = word.len(), "defined word");
            self.add_word(word);
        }
        Ok(())
    }

    pub fn immediate(&mut self) -> Result<Flow<T>, Error> {
        self.compiler.last()?.set_immediate(true);
        Ok(Flow::Continue)
    }

    pub fn postpone(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("postpone")?;
        self.compiler.mode = Mode::CompilingPostponed;
        Ok(Flow::Continue)
    }

    pub fn left_bracket(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("[")?;
        self.compiler.mode = Mode::Interpreting;
        Ok(Flow::Continue)
    }

    pub fn right_bracket(&mut self) -> Result<Flow<T>, Error> {
        self.compiler.building()?;
        self.compiler.mode = Mode::Compiling;
        Ok(Flow::Continue)
    }

    /// `( v -- )` at compile time; the compiled word pushes `v`.
    pub fn literal_imm(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("literal")?;
        let val = self.data_stack.try_pop()?;
        self.compile_lit(val)?;
        Ok(Flow::Continue)
    }

    pub fn tick(&mut self) -> Result<Flow<T>, Error> {
        let word = self.munch_word("'")?;
        self.data_stack.push(Value::Xt(word))?;
        Ok(Flow::Continue)
    }

    pub fn bracket_tick(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("[']")?;
        let word = self.munch_word("[']")?;
        self.compile_lit(Value::Xt(word))?;
        Ok(Flow::Continue)
    }

    pub fn execute(&mut self) -> Result<Flow<T>, Error> {
        let word = self.pop_xt()?;
        Ok(Flow::Call(word))
    }

    /// `( xt -- )`: compile a call to `xt` into the word being defined.
    pub fn compile_comma(&mut self) -> Result<Flow<T>, Error> {
        let word = self.pop_xt()?;
        self.compiler.compile_word(&word)?;
        Ok(Flow::Continue)
    }

    pub fn forget(&mut self) -> Result<Flow<T>, Error> {
        let name = self.munch_name("forget")?;
        self.dict.forget_word(&name)?;
        Ok(Flow::Continue)
    }

    pub fn words(&mut self) -> Result<Flow<T>, Error> {
        let names = self.dict.names().join(" ");
        writeln!(&mut self.output, "{names}")?;
        Ok(Flow::Continue)
    }

    pub fn see(&mut self) -> Result<Flow<T>, Error> {
        let word = self.munch_word("see")?;
        let mut text = String::new();
        decompile(&word, &mut text)?;
        self.output.push_str(&text)?;
        Ok(Flow::Continue)
    }

    pub fn char(&mut self) -> Result<Flow<T>, Error> {
        let name = self.munch_name("char")?;
        let c = name
            .as_bytes()
            .first()
            .copied()
            .ok_or(Error::MissingName("char"))?;
        self.data_stack.push(Value::Char(c))?;
        Ok(Flow::Continue)
    }

    pub fn bracket_char(&mut self) -> Result<Flow<T>, Error> {
        self.require_compiling("[char]")?;
        let name = self.munch_name("[char]")?;
        let c = name
            .as_bytes()
            .first()
            .copied()
            .ok_or(Error::MissingName("[char]"))?;
        self.compile_lit(Value::Char(c))?;
        Ok(Flow::Continue)
    }

    /// `s" text"`: a string object, pushed now or when the word being
    /// defined runs.
    pub fn str_literal(&mut self) -> Result<Flow<T>, Error> {
        let text = self.munch_str()?;
        let val = Value::Obj(Rc::new(StrObject::new(&text)));
        match self.compiler.mode() {
            Mode::Compiling => self.compile_lit(val)?,
            _ => self.data_stack.push(val)?,
        }
        Ok(Flow::Continue)
    }

    pub fn print_literal(&mut self) -> Result<Flow<T>, Error> {
        let text = self.munch_str()?;
        match self.compiler.mode() {
            Mode::Compiling => {
                self.compile_lit(Value::Obj(Rc::new(StrObject::new(&text))))?;
                let type_out = self.builtin("type")?;
                self.compiler.compile_cfa(type_out)?;
            }
            _ => self.output.push_str(&text)?,
        }
        Ok(Flow::Continue)
    }

    pub fn paren_comment(&mut self) -> Result<Flow<T>, Error> {
        self.munch_comment();
        Ok(Flow::Continue)
    }

    pub fn line_comment(&mut self) -> Result<Flow<T>, Error> {
        self.input.skip_line();
        Ok(Flow::Continue)
    }

    //
    // Data words
    //

    fn create_word(&mut self, name: &str) -> Rc<Word<T>> {
        let word = Rc::new(Word::variable(name));
        self.compiler.set_last(&word);
        self.add_word(word.clone());
        word
    }

    /// `create NAME`: a word that pushes the address of its (empty) data
    /// area. Grow it with `,` and `allot`.
    pub fn create(&mut self) -> Result<Flow<T>, Error> {
        let name = self.munch_name("create")?;
        self.create_word(&name);
        Ok(Flow::Continue)
    }

    pub fn variable(&mut self) -> Result<Flow<T>, Error> {
        let name = self.munch_name("variable")?;
        let word = self.create_word(&name);
        word.push(BodyElem::Literal(Value::Int(0)))?;
        Ok(Flow::Continue)
    }

    /// `( v -- )` `constant NAME`
    pub fn constant(&mut self) -> Result<Flow<T>, Error> {
        let name = self.munch_name("constant")?;
        let val = self.data_stack.try_pop()?;
        self.define_constant(&name, val)?;
        Ok(Flow::Continue)
    }

    pub fn here(&mut self) -> Result<Flow<T>, Error> {
        let here = self.compiler.here()?;
        self.data_stack.push(Value::Int(here as i64))?;
        Ok(Flow::Continue)
    }

    /// `( v -- )`: append a data slot to the last created word.
    pub fn comma(&mut self) -> Result<Flow<T>, Error> {
        let val = self.data_stack.try_pop()?;
        self.compiler.last()?.push(BodyElem::Literal(val))?;
        Ok(Flow::Continue)
    }

    /// `( n -- )`
    pub fn allot(&mut self) -> Result<Flow<T>, Error> {
        let n = self.data_stack.try_pop()?.as_int()?;
        let n = usize::try_from(n).map_err(|_| Error::IndexOutOfRange { index: n, len: 0 })?;
        self.compiler.expand_by(n)?;
        Ok(Flow::Continue)
    }

    /// Compiled: `(does>)`. Outside a definition: the next word becomes
    /// the action of the last created word.
    pub fn does(&mut self) -> Result<Flow<T>, Error> {
        match self.compiler.mode() {
            Mode::Compiling => {
                let rt = self.builtin("(does>)")?;
                self.compiler.compile_cfa(rt)?;
            }
            Mode::Interpreting => {
                self.compiler.last()?;
                self.compiler.mode = Mode::RuntimeCompiling;
            }
            _ => {
                return Err(Error::CompileStateError(
                    "does> can't be postponed here".into(),
                ))
            }
        }
        Ok(Flow::Continue)
    }

    /// Point the last created word at the rest of the calling body, and
    /// leave the caller.
    pub fn does_runtime(&mut self) -> Result<Flow<T>, Error> {
        let (body, entry) = {
            let parent = self.frames.parent()?;
            (parent.word.clone(), parent.ip)
        };
        self.compiler
            .last()?
            .set_code(Code::Indirect { body, entry })?;
        Ok(Flow::Exit)
    }
}

#[cfg(test)]
pub mod test {
    use std::rc::Rc;

    use crate::{testutil::runtest, Error, Forth, Params, Value};

    #[test]
    fn variables_and_constants() {
        runtest(
            r#"
            > variable x 5 x ! x @ .
            < 5 ok.
            > 3 x +! x @ .
            < 8 ok.
            > 42 constant answer answer .
            < 42 ok.
            > create buf 1 , 2 , 3 , buf 2 + @ .
            < 3 ok.
            > create pad 4 allot here .
            < 5 ok.
            x 7 bogus !
            x -1 allot
            "#,
        );
    }

    #[test]
    fn does() {
        runtest(
            r#"
            > : const create , does> @ ;
            > 5 const five five .
            < 5 ok.
            > : counter create 0 , does> dup @ 1+ dup rot ! ;
            > counter c c c . c .
            < 2 3 ok.
            > create seven 7 , does> @
            > seven seven + .
            < 14 ok.
            "#,
        );
    }

    #[test]
    fn postpone() {
        runtest(
            r#"
            > : endif postpone then ; immediate
            > : t if 1 else 2 endif ;
            > true t . false t .
            < 1 2 ok.
            > : compile-dup postpone dup ; immediate
            > : twice compile-dup + ;
            > 21 twice .
            < 42 ok.
            x : nope postpone 5 ;
            "#,
        );
    }

    #[test]
    fn xts() {
        runtest(
            r#"
            > : sq dup * ;
            > 3 ' sq execute .
            < 9 ok.
            > : apply-sq ['] sq execute ;
            > 4 apply-sq .
            < 16 ok.
            > :noname 1 + ; constant inc
            > 1 inc execute .
            < 2 ok.
            > : ten [ 2 5 * ] literal ;
            > ten .
            < 10 ok.
            x ' no-such-word
            "#,
        );
    }

    #[test]
    fn strings_and_comments() {
        runtest(
            r#"
            > ." Hello, World!" cr
            < Hello, World!
            < ok.
            > : greet ." Hi " [char] ! emit ;
            > greet
            < Hi !ok.
            > ( multi
            > line ) 1 . \ 2 .
            < 1 ok.
            x ." unterminated
            "#,
        );
    }

    #[test]
    fn fresh_vm_has_no_last_word() {
        runtest(
            r#"
            x immediate
            x 3 allot
            x 5 ,
            x here
            x does> drop
            > : t op.xor ;
            > t . op.xor .
            < xor xor ok.
            "#,
        );

        let mut forth = Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap();
        assert!(matches!(
            run(&mut forth, "immediate"),
            Err(Error::CompileStateError(_))
        ));
        let xor = forth.find_word("op.xor").unwrap();
        assert_eq!(xor.len(), 2);
        assert!(!xor.is_immediate());
    }

    #[test]
    fn unbalanced_definitions() {
        let mut forth = Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap();
        assert!(matches!(
            run(&mut forth, ": stray [ 1 ] ;"),
            Err(Error::CompileStateError(_))
        ));
        assert!(matches!(
            run(&mut forth, "1 : eats [ drop ] ;"),
            Err(Error::CompileStateError(_))
        ));
        assert!(matches!(
            run(&mut forth, ": open 1 if ;"),
            Err(Error::ControlMismatch(_))
        ));
        assert!(matches!(
            run(&mut forth, ": open-loop begin ;"),
            Err(Error::ControlMismatch(_))
        ));
        // data already on the stack before `:` is left alone
        assert_eq!(run(&mut forth, "7 : fine ; .").unwrap(), "7 ok.\n");
    }

    fn run(f: &mut Forth<()>, line: &str) -> Result<String, Error> {
        f.output.clear();
        f.input.fill(line).unwrap();
        f.process_line()?;
        Ok(f.output.as_str().to_string())
    }

    #[test]
    fn shadow_and_forget() {
        let mut forth = Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap();

        run(&mut forth, ": v 1 ; : user v ;").unwrap();
        let old_v = forth.find_word("v").unwrap();
        run(&mut forth, ": v 2 ;").unwrap();
        assert_eq!(run(&mut forth, "v . user .").unwrap(), "2 1 ok.\n");

        // `user` keeps the first `v` alive: our handle, plus the call in `user`.
        assert_eq!(Rc::strong_count(&old_v), 2);
        run(&mut forth, "forget user").unwrap();
        assert_eq!(Rc::strong_count(&old_v), 1);

        run(&mut forth, "forget v").unwrap();
        assert!(matches!(
            run(&mut forth, "v"),
            Err(Error::UnknownWord(_))
        ));
        assert!(matches!(
            run(&mut forth, "forget dup"),
            Err(Error::CantForgetBuiltins(_))
        ));
    }

    #[test]
    fn forgotten_words_keep_running() {
        let mut forth = Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap();
        forth
            .input
            .fill(": helper 40 ; : answer helper 2 + ; forget helper answer .")
            .unwrap();
        forth.process_line().unwrap();
        assert_eq!(forth.output.as_str(), "42 ok.\n");
    }

    #[test]
    fn anonymous_xt() {
        let mut forth = Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap();
        forth.input.fill(":noname 7 ;").unwrap();
        forth.process_line().unwrap();
        let xt = forth.data_stack.try_pop().unwrap();
        let word = xt.as_xt().unwrap().clone();
        assert!(word.is_anonymous());
        assert!(!word.is_hidden());
        forth.data_stack.push(Value::Xt(word)).unwrap();
        forth.output.clear();
        forth.input.fill("execute .").unwrap();
        forth.process_line().unwrap();
        assert_eq!(forth.output.as_str(), "7 ok.\n");
    }

    #[test]
    fn words_lists_definitions() {
        let mut forth = Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap();
        forth.input.fill(": zzz-last ; words").unwrap();
        forth.process_line().unwrap();
        let out = forth.output.as_str();
        assert!(out.contains(" dup "));
        assert!(out.trim_end().ends_with("zzz-last\nok."));
    }
}

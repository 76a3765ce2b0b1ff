use core::fmt::Write;

use crate::{
    debug::DebugLevel,
    dictionary::BuiltinEntry,
    value::{BinOp, Value},
    Error, Flow, Forth,
};

mod control;
mod defining;
mod floats;
mod objects;

pub use self::objects::op_word_name;

macro_rules! builtin {
    ($name:literal, $func:expr) => {
        BuiltinEntry {
            name: $name,
            func: $func,
            immediate: false,
        }
    };
}

macro_rules! builtin_immediate {
    ($name:literal, $func:expr) => {
        BuiltinEntry {
            name: $name,
            func: $func,
            immediate: true,
        }
    };
}

impl<T: 'static> Forth<T> {
    pub const FULL_BUILTINS: &'static [BuiltinEntry<T>] = &[
        //
        // Stack
        //
        builtin!("dup", Self::dup),
        builtin!("drop", Self::ds_drop),
        builtin!("swap", Self::swap),
        builtin!("over", Self::over),
        builtin!("rot", Self::rot),
        builtin!("nip", Self::nip),
        builtin!("tuck", Self::tuck),
        builtin!("2dup", Self::dup_2),
        builtin!("2drop", Self::ds_drop_2),
        builtin!("pick", Self::pick),
        builtin!("depth", Self::depth),
        builtin!("clear", Self::clear_stack),
        builtin!(".s", Self::print_stack),
        builtin!(">r", Self::data_to_return_stack),
        builtin!("r>", Self::return_to_data_stack),
        builtin!("r@", Self::copy_return_stack),
        builtin!(">t", Self::data_to_temp_stack),
        builtin!("t>", Self::temp_to_data_stack),
        builtin!("t@", Self::copy_temp_stack),
        builtin!(">self", Self::data_to_self_stack),
        builtin!("self>", Self::self_to_data_stack),
        builtin!("self@", Self::copy_self_stack),
        //
        // Math and logic
        //
        builtin!("+", Self::add),
        builtin!("-", Self::minus),
        builtin!("*", Self::mul),
        builtin!("/", Self::div),
        builtin!("mod", Self::modu),
        builtin!("=", Self::equal),
        builtin!("<>", Self::not_equal),
        builtin!("<", Self::less),
        builtin!(">", Self::greater),
        builtin!("<=", Self::less_eq),
        builtin!(">=", Self::greater_eq),
        builtin!("and", Self::logical_and),
        builtin!("or", Self::logical_or),
        builtin!("xor", Self::logical_xor),
        builtin!("negate", Self::negate),
        builtin!("abs", Self::abs),
        builtin!("1+", Self::one_plus),
        builtin!("1-", Self::one_minus),
        builtin!("not", Self::not),
        builtin!("invert", Self::invert),
        builtin!("min", Self::min),
        builtin!("max", Self::max),
        builtin!("true", Self::push_true),
        builtin!("false", Self::push_false),
        //
        // Floats
        //
        builtin!(">float", Self::to_float),
        builtin!(">int", Self::to_int),
        builtin!("sqrt", Self::float_sqrt),
        builtin!("floor", Self::float_floor),
        builtin!("ceil", Self::float_ceil),
        builtin!("round", Self::float_round),
        builtin!("f.", Self::float_pop_print),
        //
        // Output
        //
        builtin!(".", Self::pop_print),
        builtin!("emit", Self::emit),
        builtin!("cr", Self::cr),
        builtin!("space", Self::space),
        builtin!("spaces", Self::spaces),
        builtin!("type", Self::type_out),
        //
        // Memory
        //
        builtin!("@", Self::var_load),
        builtin!("!", Self::var_store),
        builtin!("+!", Self::var_add),
        builtin!("here", Self::here),
        builtin!(",", Self::comma),
        builtin!("allot", Self::allot),
        builtin!("create", Self::create),
        builtin!("variable", Self::variable),
        builtin!("constant", Self::constant),
        builtin_immediate!("does>", Self::does),
        builtin!("(does>)", Self::does_runtime),
        //
        // Compiler
        //
        builtin!(":", Self::colon),
        builtin!(":noname", Self::colon_noname),
        builtin_immediate!(";", Self::semicolon),
        builtin!("immediate", Self::immediate),
        builtin_immediate!("postpone", Self::postpone),
        builtin_immediate!("[", Self::left_bracket),
        builtin!("]", Self::right_bracket),
        builtin_immediate!("literal", Self::literal_imm),
        builtin!("'", Self::tick),
        builtin_immediate!("[']", Self::bracket_tick),
        builtin!("execute", Self::execute),
        builtin!("compile,", Self::compile_comma),
        builtin!("exit", Self::exit),
        builtin!("forget", Self::forget),
        builtin!("words", Self::words),
        builtin!("see", Self::see),
        builtin!("char", Self::char),
        builtin_immediate!("[char]", Self::bracket_char),
        builtin_immediate!("s\"", Self::str_literal),
        builtin_immediate!(".\"", Self::print_literal),
        builtin_immediate!("(", Self::paren_comment),
        builtin_immediate!("\\", Self::line_comment),
        //
        // Control structures
        //
        builtin_immediate!("if", Self::if_),
        builtin_immediate!("else", Self::else_),
        builtin_immediate!("then", Self::then),
        builtin_immediate!("begin", Self::begin),
        builtin_immediate!("until", Self::until),
        builtin_immediate!("again", Self::again),
        builtin_immediate!("while", Self::while_),
        builtin_immediate!("repeat", Self::repeat),
        builtin_immediate!("do", Self::do_),
        builtin_immediate!("?do", Self::qdo),
        builtin_immediate!("loop", Self::loop_),
        builtin_immediate!("+loop", Self::plus_loop),
        builtin_immediate!("leave", Self::leave),
        builtin_immediate!("unloop", Self::unloop),
        builtin_immediate!("recurse", Self::recurse),
        builtin!("i", Self::loop_i),
        builtin!("j", Self::loop_j),
        //
        // Objects and types
        //
        builtin!("new", Self::new_object),
        builtin!("type-of", Self::type_of_value),
        builtin!("size", Self::obj_size),
        builtin!("hash", Self::obj_hash),
        builtin!("get", Self::obj_get),
        builtin!("set", Self::obj_set),
        builtin!("contains", Self::obj_contains),
        builtin!("index-of", Self::obj_index_of),
        builtin!("sub-range", Self::obj_sub_range),
        builtin!("deconstruct", Self::obj_deconstruct),
        builtin!("append", Self::obj_append),
        builtin!("implements?", Self::obj_implements),
        builtin!("struct:", Self::struct_def),
        builtin!("binops!", Self::set_binops),
        builtin!("refcount", Self::refcount),
        //
        // State cells and debugging
        //
        builtin!("cell@", Self::cell_load),
        builtin!("cell!", Self::cell_store),
        builtin!("flag@", Self::flag_load),
        builtin!("flag!", Self::flag_store),
        builtin!("debug-level", Self::debug_level_word),
        //
        // Internal words, compiled by the words above
        //
        builtin!("(literal)", Self::literal),
        builtin!("jump", Self::jump),
        builtin!("jumponfalse", Self::jump_if_false),
        builtin!("jumptrue", Self::jump_if_true),
        builtin!("(do)", Self::do_runtime),
        builtin!("(?do)", Self::qdo_runtime),
        builtin!("(loop)", Self::loop_runtime),
        builtin!("(+loop)", Self::plus_loop_runtime),
        builtin!("(leave)", Self::leave_runtime),
        builtin!("(unloop)", Self::unloop_runtime),
    ];

    pub fn dup(&mut self) -> Result<Flow<T>, Error> {
        let val = self.data_stack.try_peek()?.clone();
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    pub fn ds_drop(&mut self) -> Result<Flow<T>, Error> {
        self.data_stack.try_pop()?;
        Ok(Flow::Continue)
    }

    pub fn swap(&mut self) -> Result<Flow<T>, Error> {
        let a = self.data_stack.try_pop()?;
        let b = self.data_stack.try_pop()?;
        self.data_stack.push(a)?;
        self.data_stack.push(b)?;
        Ok(Flow::Continue)
    }

    pub fn over(&mut self) -> Result<Flow<T>, Error> {
        let val = self.data_stack.try_peek_back_n(1)?.clone();
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    /// `( a b c -- b c a )`
    pub fn rot(&mut self) -> Result<Flow<T>, Error> {
        let c = self.data_stack.try_pop()?;
        let b = self.data_stack.try_pop()?;
        let a = self.data_stack.try_pop()?;
        self.data_stack.push(b)?;
        self.data_stack.push(c)?;
        self.data_stack.push(a)?;
        Ok(Flow::Continue)
    }

    pub fn nip(&mut self) -> Result<Flow<T>, Error> {
        let b = self.data_stack.try_pop()?;
        self.data_stack.try_pop()?;
        self.data_stack.push(b)?;
        Ok(Flow::Continue)
    }

    /// `( a b -- b a b )`
    pub fn tuck(&mut self) -> Result<Flow<T>, Error> {
        self.data_stack.ensure_room(1)?;
        let b = self.data_stack.try_pop()?;
        let a = self.data_stack.try_pop()?;
        self.data_stack.push(b.clone())?;
        self.data_stack.push(a)?;
        self.data_stack.push(b)?;
        Ok(Flow::Continue)
    }

    pub fn dup_2(&mut self) -> Result<Flow<T>, Error> {
        let a = self.data_stack.try_peek_back_n(1)?.clone();
        let b = self.data_stack.try_peek()?.clone();
        self.data_stack.ensure_room(2)?;
        self.data_stack.push(a)?;
        self.data_stack.push(b)?;
        Ok(Flow::Continue)
    }

    pub fn ds_drop_2(&mut self) -> Result<Flow<T>, Error> {
        self.data_stack.try_pop()?;
        self.data_stack.try_pop()?;
        Ok(Flow::Continue)
    }

    /// `( xu .. x0 u -- xu .. x0 xu )`
    pub fn pick(&mut self) -> Result<Flow<T>, Error> {
        let n = self.data_stack.try_pop()?.as_int()?;
        let depth = self.data_stack.depth();
        let idx = usize::try_from(n)
            .ok()
            .filter(|i| *i < depth)
            .ok_or(Error::IndexOutOfRange { index: n, len: depth })?;
        let val = self.data_stack.try_peek_back_n(idx)?.clone();
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    pub fn depth(&mut self) -> Result<Flow<T>, Error> {
        let depth = self.data_stack.depth() as i64;
        self.data_stack.push(Value::Int(depth))?;
        Ok(Flow::Continue)
    }

    pub fn clear_stack(&mut self) -> Result<Flow<T>, Error> {
        self.data_stack.clear();
        Ok(Flow::Continue)
    }

    pub fn print_stack(&mut self) -> Result<Flow<T>, Error> {
        self.write_stack()?;
        Ok(Flow::Continue)
    }

    pub fn data_to_return_stack(&mut self) -> Result<Flow<T>, Error> {
        let val = self.data_stack.try_pop()?.as_int()?;
        self.return_stack.push(val)?;
        Ok(Flow::Continue)
    }

    pub fn return_to_data_stack(&mut self) -> Result<Flow<T>, Error> {
        let val = self.return_stack.try_pop()?;
        self.data_stack.push(Value::Int(val))?;
        Ok(Flow::Continue)
    }

    pub fn copy_return_stack(&mut self) -> Result<Flow<T>, Error> {
        let val = *self.return_stack.try_peek()?;
        self.data_stack.push(Value::Int(val))?;
        Ok(Flow::Continue)
    }

    pub fn data_to_temp_stack(&mut self) -> Result<Flow<T>, Error> {
        let val = self.data_stack.try_pop()?;
        self.temp_stack.push(val)?;
        Ok(Flow::Continue)
    }

    pub fn temp_to_data_stack(&mut self) -> Result<Flow<T>, Error> {
        let val = self.temp_stack.try_pop()?;
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    pub fn copy_temp_stack(&mut self) -> Result<Flow<T>, Error> {
        let val = self.temp_stack.try_peek()?.clone();
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    pub fn data_to_self_stack(&mut self) -> Result<Flow<T>, Error> {
        let val = self.data_stack.try_pop()?;
        self.self_stack.push(val)?;
        Ok(Flow::Continue)
    }

    pub fn self_to_data_stack(&mut self) -> Result<Flow<T>, Error> {
        let val = self.self_stack.try_pop()?;
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    pub fn copy_self_stack(&mut self) -> Result<Flow<T>, Error> {
        let val = self.self_stack.try_peek()?.clone();
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    pub fn push_true(&mut self) -> Result<Flow<T>, Error> {
        self.data_stack.push(Value::Bool(true))?;
        Ok(Flow::Continue)
    }

    pub fn push_false(&mut self) -> Result<Flow<T>, Error> {
        self.data_stack.push(Value::Bool(false))?;
        Ok(Flow::Continue)
    }

    pub fn pop_print(&mut self) -> Result<Flow<T>, Error> {
        let val = self.data_stack.try_pop()?;
        let text = self.format_value(&val);
        write!(&mut self.output, "{text} ")?;
        Ok(Flow::Continue)
    }

    pub fn emit(&mut self) -> Result<Flow<T>, Error> {
        let byte = match self.data_stack.try_pop()? {
            Value::Char(c) => c,
            other => {
                let i = other.as_int()?;
                u8::try_from(i).map_err(|_| Error::IndexOutOfRange { index: i, len: 256 })?
            }
        };
        self.output.push_bstr(&[byte])?;
        Ok(Flow::Continue)
    }

    pub fn cr(&mut self) -> Result<Flow<T>, Error> {
        self.output.push_str("\n")?;
        Ok(Flow::Continue)
    }

    pub fn space(&mut self) -> Result<Flow<T>, Error> {
        self.output.push_str(" ")?;
        Ok(Flow::Continue)
    }

    pub fn spaces(&mut self) -> Result<Flow<T>, Error> {
        let n = self.data_stack.try_pop()?.as_int()?;
        for _ in 0..n.max(0) {
            self.output.push_str(" ")?;
        }
        Ok(Flow::Continue)
    }

    /// Print a value without the trailing space of `.`.
    pub fn type_out(&mut self) -> Result<Flow<T>, Error> {
        let val = self.data_stack.try_pop()?;
        let text = self.format_value(&val);
        self.output.push_str(&text)?;
        Ok(Flow::Continue)
    }

    /// `( ptr -- v )`
    pub fn var_load(&mut self) -> Result<Flow<T>, Error> {
        let ptr = self.data_stack.try_pop()?;
        let val = ptr.deref()?;
        self.data_stack.push(val)?;
        Ok(Flow::Continue)
    }

    /// `( v ptr -- )`
    pub fn var_store(&mut self) -> Result<Flow<T>, Error> {
        let ptr = self.data_stack.try_pop()?;
        let val = self.data_stack.try_pop()?;
        ptr.as_ptr()?.store(val)?;
        Ok(Flow::Continue)
    }

    /// `( n ptr -- )`
    pub fn var_add(&mut self) -> Result<Flow<T>, Error> {
        let ptr = self.data_stack.try_pop()?;
        let n = self.data_stack.try_pop()?;
        let ptr = ptr.as_ptr()?;
        let sum = self.apply_binop(ptr.load()?, n, BinOp::Add)?;
        ptr.store(sum)?;
        Ok(Flow::Continue)
    }

    fn cell_index(&mut self) -> Result<usize, Error> {
        let n = self.data_stack.try_pop()?.as_int()?;
        usize::try_from(n)
            .ok()
            .filter(|i| *i < super::STATE_CELLS)
            .ok_or(Error::IndexOutOfRange {
                index: n,
                len: super::STATE_CELLS,
            })
    }

    /// `( n -- v )`
    pub fn cell_load(&mut self) -> Result<Flow<T>, Error> {
        let idx = self.cell_index()?;
        self.data_stack.push(Value::Int(self.cells.ints[idx]))?;
        Ok(Flow::Continue)
    }

    /// `( v n -- )`
    pub fn cell_store(&mut self) -> Result<Flow<T>, Error> {
        let idx = self.cell_index()?;
        let val = self.data_stack.try_pop()?.as_int()?;
        self.cells.ints[idx] = val;
        Ok(Flow::Continue)
    }

    pub fn flag_load(&mut self) -> Result<Flow<T>, Error> {
        let idx = self.cell_index()?;
        self.data_stack.push(Value::Bool(self.cells.flags[idx]))?;
        Ok(Flow::Continue)
    }

    pub fn flag_store(&mut self) -> Result<Flow<T>, Error> {
        let idx = self.cell_index()?;
        let val = self.data_stack.try_pop()?.is_truthy()?;
        self.cells.flags[idx] = val;
        Ok(Flow::Continue)
    }

    pub fn debug_level_word(&mut self) -> Result<Flow<T>, Error> {
        let n = self.data_stack.try_pop()?.as_int()?;
        let level = DebugLevel::from_int(n).ok_or(Error::IndexOutOfRange { index: n, len: 4 })?;
        self.set_debug_level(level);
        Ok(Flow::Continue)
    }
}

//! tforth is a threaded-code forth runtime.
//!
//! Words are compiled into bodies of [`BodyElem`]s and executed by a
//! non-recursive inner interpreter. Values moved between the VM's stacks
//! are tagged ([`Value`]), and heap objects are kept alive by reference
//! counting, through any number of pointer indirections.
//!
//! ```rust
//! use tforth::{Forth, Params};
//!
//! let mut forth = Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap();
//! forth.input.fill(": add23 2 3 + ; add23 .").unwrap();
//! forth.process_line().unwrap();
//! assert_eq!(forth.output.as_str(), "5 ok.\n");
//! ```

use core::fmt;
use std::rc::Rc;

pub mod debug;
pub mod dictionary;
pub mod fastr;
pub mod input;
pub mod object;
pub mod output;
pub mod params;
pub mod stack;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod types;
pub mod value;
pub mod vm;
pub mod word;

use crate::{
    input::InputError,
    object::ObjFunc,
    output::OutputError,
    stack::StackError,
};

pub use crate::{
    dictionary::{BuiltinEntry, Dictionary},
    params::Params,
    types::{TypeId, TypeRegistry},
    value::{BinOp, Pointer, Value},
    vm::Forth,
    word::{BodyElem, Code, Word},
};

/// The signature of every native primitive.
pub type WordFunc<T> = fn(&mut Forth<T>) -> Result<Flow<T>, Error>;

/// What the engine should do after a native primitive returns.
pub enum Flow<T: 'static> {
    /// Carry on with the calling body.
    Continue,
    /// Leave the calling body, as `exit` does.
    Exit,
    /// Run the given word next, in place of the primitive.
    Call(Rc<Word<T>>),
}

/// Compile state of the outer interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Interpreting,
    Compiling,
    /// `postpone` was just compiled: the next word gets compiled even if it
    /// is immediate.
    CompilingPostponed,
    /// `does>` ran outside of a definition: the next word becomes the
    /// action of the most recently created word.
    RuntimeCompiling,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Stack(StackError),
    Output(OutputError),
    Input(InputError),
    TypeMismatch(String),
    UnknownWord(String),
    CompileStateError(String),
    IndexOutOfRange { index: i64, len: usize },
    DivideByZero,
    ConstructionError(String),
    NativeFault(String),
    NotAPointer,
    PointerCycle,
    BadWordOffset { word: String, index: usize },
    NotExecutable { word: String, ip: usize },
    MisplacedDirectCall,
    ControlMismatch(&'static str),
    MissingName(&'static str),
    BadStrLiteral,
    TypeRedefined(String),
    TypeSpaceExhausted,
    UnknownType(String),
    UnsupportedFunction { func: ObjFunc, ty: String },
    BinOpContract,
    CantForgetBuiltins(String),
    CallStackCorrupted,
    Interrupted,
}

impl From<StackError> for Error {
    fn from(se: StackError) -> Self {
        Error::Stack(se)
    }
}

impl From<OutputError> for Error {
    fn from(oe: OutputError) -> Self {
        Error::Output(oe)
    }
}

impl From<InputError> for Error {
    fn from(ie: InputError) -> Self {
        Error::Input(ie)
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Self {
        Error::Output(OutputError::FormattingErr)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Stack(se) => fmt::Display::fmt(se, f),
            Error::Output(oe) => fmt::Display::fmt(oe, f),
            Error::Input(InputError::TooLong) => f.write_str("input line too long"),
            Error::Input(InputError::NotAscii) => f.write_str("input must be ascii"),
            Error::Input(InputError::Unterminated) => f.write_str("unterminated literal"),
            Error::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            Error::UnknownWord(w) => write!(f, "unknown word '{w}'"),
            Error::CompileStateError(msg) => write!(f, "wrong compile state: {msg}"),
            Error::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for length {len}")
            }
            Error::DivideByZero => f.write_str("divide by zero"),
            Error::ConstructionError(msg) => write!(f, "can't construct object: {msg}"),
            Error::NativeFault(msg) => write!(f, "native fault: {msg}"),
            Error::NotAPointer => f.write_str("not a pointer"),
            Error::PointerCycle => f.write_str("pointer chain loops back on itself"),
            Error::BadWordOffset { word, index } => {
                write!(f, "offset {index} is not valid in word '{word}'")
            }
            Error::NotExecutable { word, ip } => {
                write!(f, "element {ip} of word '{word}' is not executable")
            }
            Error::MisplacedDirectCall => {
                f.write_str("direct calls are only valid as the first element of a word")
            }
            Error::ControlMismatch(msg) => write!(f, "control structure mismatch: {msg}"),
            Error::MissingName(word) => write!(f, "'{word}' expects a name"),
            Error::BadStrLiteral => f.write_str("bad string literal"),
            Error::TypeRedefined(name) => write!(f, "type '{name}' is already defined"),
            Error::TypeSpaceExhausted => f.write_str("no more type ids available"),
            Error::UnknownType(name) => write!(f, "unknown type {name}"),
            Error::UnsupportedFunction { func, ty } => {
                write!(f, "'{ty}' does not support {func:?}")
            }
            Error::BinOpContract => {
                f.write_str("binary operation handler broke the stack contract")
            }
            Error::CantForgetBuiltins(name) => write!(f, "can't forget builtin '{name}'"),
            Error::CallStackCorrupted => f.write_str("call stack corrupted"),
            Error::Interrupted => f.write_str("interrupted"),
        }
    }
}

impl std::error::Error for Error {}

pub(crate) trait ReplaceErr {
    type OK;
    fn replace_err<NE>(self, t: NE) -> Result<Self::OK, NE>;
}

impl<T, OE> ReplaceErr for Result<T, OE> {
    type OK = T;
    #[inline]
    fn replace_err<NE>(self, e: NE) -> Result<Self::OK, NE> {
        match self {
            Ok(t) => Ok(t),
            Err(_e) => Err(e),
        }
    }
}

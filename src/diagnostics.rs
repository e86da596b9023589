//! Source locations and the per-stage error types.
//!
//! Every error produced by this crate points at a `Location`; none of the stages panic on
//! malformed input (only `debug_assert!` on conditions that would indicate a bug in this
//! crate itself, never on untrusted source text).

use failure_derive::Fail;
use std::fmt;

/// The location of a `Token` or an error, as a 1-based source line.
///
/// Line 0 is reserved for synthetic locations (built-in macros, command-line `-D`
/// definitions) that have no file position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    /// 1-based line number, or 0 for a synthetic location.
    pub line: usize,
    /// 0-based column on `line`.
    pub col: usize,
}

impl Location {
    /// A synthetic location with no file position.
    pub fn synthetic() -> Self {
        Location { line: 0, col: 0 }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.line == 0 {
            write!(f, "<builtin>")
        } else {
            write!(f, "{}:{}", self.line, self.col)
        }
    }
}

/// Construct an `Err(...)` of a located, formatted error message.
///
/// `$kind` is the variant of the enclosing stage's error enum (e.g. `PreprocessError::Directive`),
/// which must itself carry a `Location` and a `String`.
macro_rules! err {
    ($kind:ident, $loc:expr, $msg:expr) => {
        Err($kind { location: $loc, message: $msg.to_string() })
    };
    ($kind:ident, $loc:expr, $fmt:expr, $( $arg:expr ),+ ) => {
        Err($kind { location: $loc, message: format!($fmt, $( $arg ),+) })
    };
}

pub(crate) use err;

/// Preprocessing errors: bad directives, unterminated conditionals, stray `##`/`#`.
#[derive(Debug, Fail)]
#[fail(display = "{}: {}", location, message)]
pub struct PreprocessError {
    pub location: Location,
    pub message: String,
}

/// Type-system errors: redeclaration conflicts, incomplete-type use, invalid operands.
#[derive(Debug, Fail)]
#[fail(display = "{}: {}", location, message)]
pub struct TypeError {
    pub location: Location,
    pub message: String,
}

/// Parser errors: bad declarations, VLA-at-file-scope, flow errors (stray `break`,
/// undeclared label, a jump crossing a VLA initialization).
#[derive(Debug, Fail)]
#[fail(display = "{}: {}", location, message)]
pub struct ParseError {
    pub location: Location,
    pub message: String,
}

pub type ParseResult<T> = Result<T, ParseError>;
pub type PreResult<T> = Result<T, PreprocessError>;
pub type TypeResult<T> = Result<T, TypeError>;

/// Constant-expression errors: non-constant where required, division by zero, overflow.
#[derive(Debug, Fail)]
#[fail(display = "{}: {}", location, message)]
pub struct ConstEvalError {
    pub location: Location,
    pub message: String,
}

pub type ConstEvalResult<T> = Result<T, ConstEvalError>;

/// ABI/codegen errors: `sizeof` of an incomplete type, an illegal `long double` return.
#[derive(Debug, Fail)]
#[fail(display = "{}: {}", location, message)]
pub struct CodegenError {
    pub location: Location,
    pub message: String,
}

pub type CodegenResult<T> = Result<T, CodegenError>;

/// The union of every stage's error, the type a driver actually matches on.
#[derive(Debug, Fail)]
pub enum CompileError {
    #[fail(display = "{}", _0)]
    Preprocess(PreprocessError),
    #[fail(display = "{}", _0)]
    Type(TypeError),
    #[fail(display = "{}", _0)]
    Parse(ParseError),
    #[fail(display = "{}", _0)]
    ConstEval(ConstEvalError),
    #[fail(display = "{}", _0)]
    Codegen(CodegenError),
}

impl From<PreprocessError> for CompileError {
    fn from(e: PreprocessError) -> Self {
        CompileError::Preprocess(e)
    }
}
impl From<TypeError> for CompileError {
    fn from(e: TypeError) -> Self {
        CompileError::Type(e)
    }
}
impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}
impl From<ConstEvalError> for CompileError {
    fn from(e: ConstEvalError) -> Self {
        CompileError::ConstEval(e)
    }
}
impl From<CodegenError> for CompileError {
    fn from(e: CodegenError) -> Self {
        CompileError::Codegen(e)
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

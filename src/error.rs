use thiserror::Error;

use crate::ast::NodeKind;

/// Fatal errors raised by a pass. Type mismatches are not errors: they are
/// collected as [`crate::semantic::type_check::TypeDiagnostic`]s instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Malformed {kind} node: no child at index {index} (has {found} children)")]
    MissingChild {
        kind: NodeKind,
        index: usize,
        found: usize,
    },
    #[error("Malformed {kind} node: expected {expected} children, found {found}")]
    WrongArity {
        kind: NodeKind,
        expected: usize,
        found: usize,
    },
    #[error("Malformed {parent} node: child {index} should be {expected}, found {found}")]
    UnexpectedChild {
        parent: NodeKind,
        index: usize,
        expected: NodeKind,
        found: NodeKind,
    },
    #[error("{kind} node cannot appear here")]
    UnexpectedNode { kind: NodeKind },
    #[error("Invalid array dimension '{text}'")]
    InvalidDimension { text: String },
    #[error("Unknown type '{name}'")]
    UnknownType { name: String },
    #[error("{kind} node '{data}' is missing its {attribute} attribute")]
    MissingAttribute {
        kind: NodeKind,
        data: String,
        attribute: &'static str,
    },
    #[error("Undeclared identifier '{name}' in scope {scope}")]
    UndeclaredIdentifier { name: String, scope: String },
    #[error("'{name}' is not a function")]
    NotAFunction { name: String },
    #[error("'{name}' is not a variable")]
    NotAVariable { name: String },
    #[error("Function '{name}' expected {expected} arguments, got {found}")]
    FunctionArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Variable '{name}' does not fit in the frame of {scope}")]
    FrameTooLarge { name: String, scope: String },
    #[error("Variable '{name}' is not stored in the frame of {scope}")]
    NonLocalVariable { name: String, scope: String },
    #[error("Unsupported operator '{operator}'")]
    UnsupportedOperator { operator: String },
    #[error("Literal '{literal}' cannot be loaded as an integer immediate")]
    UnsupportedLiteral { literal: String },
    #[error("Return outside of function")]
    ReturnOutsideFunction,
}

pub type CompileResult<T> = Result<T, CompileError>;

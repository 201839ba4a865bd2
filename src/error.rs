// error.rs - Compile-time errors, runtime faults and machine errors

use crate::bytecode::StackId;
use crate::lexer::LexerError;
use crate::parser::ParseError;
use thiserror::Error;

// ============================================================================
// COMPILE TIME
// ============================================================================

/// Fatal code generation errors. Compilation stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{token} in word {word} is not known.")]
    UnknownIdentifier { token: String, word: String },

    #[error("{keyword} without matching {opener} in word {word}")]
    MalformedNesting {
        keyword: String,
        opener: &'static str,
        word: String,
    },

    #[error("{opener} is never closed in word {word}")]
    UnclosedConstruct { opener: &'static str, word: String },

    #[error("a branch target in {procedure} is referenced but never placed")]
    UnresolvedLabel { procedure: String },

    #[error("procedure {0} was declared but never defined")]
    MissingBody(String),

    #[error("word {0} is defined more than once")]
    DuplicateWord(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// RUNTIME
// ============================================================================

/// Classification used by guard handlers to pick a fault they intercept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    StackRange,
    ModuleLoad,
    Arithmetic,
    InvalidProgram,
}

/// A fault raised while executing emitted code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("{stack} index {index} is out of range")]
    StackRange { stack: StackId, index: i32 },

    #[error("external module '{0}' could not be loaded")]
    ModuleLoad(String),

    #[error("division by zero")]
    DivideByZero,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("invalid program: {0}")]
    InvalidProgram(String),
}

impl Fault {
    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::StackRange { .. } => FaultKind::StackRange,
            Fault::ModuleLoad(_) => FaultKind::ModuleLoad,
            Fault::DivideByZero | Fault::Overflow => FaultKind::Arithmetic,
            Fault::InvalidProgram(_) => FaultKind::InvalidProgram,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// A fault escaped every guard up to the outermost procedure.
    #[error("unhandled fault in {word}: {fault}")]
    Unhandled { word: String, fault: Fault },

    #[error("no procedure named {0}")]
    UnknownProcedure(String),

    #[error("the machine has not been booted")]
    NotBooted,
}

// ============================================================================
// TOP LEVEL
// ============================================================================

/// Any failure on the way from source text to a finished run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lexer(#[from] LexerError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

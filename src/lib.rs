pub mod bridge;
pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod control;
pub mod emitter;
pub mod error;
pub mod layout;
pub mod lexer;
pub mod parser;
pub mod program;
pub mod runtime;
pub mod symbols;
pub mod vm;

pub use bytecode::{Module, ProcId};
pub use compiler::compile;
pub use config::CompilerConfig;
pub use error::{CompileError, Error, Fault, RuntimeError};
pub use program::Program;
pub use runtime::{BufferConsole, Console, StdConsole};
pub use vm::Machine;

/// Tokenize and parse Forth source into a program
pub fn parse_source(source: &str) -> Result<Program, Error> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    Ok(parser::Parser::new(tokens).parse()?)
}

/// Parse and compile Forth source in one step
pub fn compile_source(source: &str, config: &CompilerConfig) -> Result<Module, Error> {
    let program = parse_source(source)?;
    Ok(compile(&program, config)?)
}

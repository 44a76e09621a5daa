//! Ember Compiler: scanner and single-pass bytecode compiler
//!
//! `compile` turns source text into a finished function in the heap's
//! static arena. Diagnostics accumulate on stderr; on any error no function
//! is produced. The runtime re-enters `compile` with
//! [`FunctionKind::Module`] when executing an `import`.

pub mod compiler;
pub mod scanner;

pub use compiler::{CompileError, FunctionKind, compile};
pub use scanner::{Scanner, Token, TokenKind};

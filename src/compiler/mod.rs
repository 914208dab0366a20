//! AST-to-bytecode compilation.
//!
//! Compilation runs in two passes. The [`semantic`] pre-pass resolves labels
//! and break/continue targets and rewrites statically invalid constructs into
//! error nodes. The [`codegen`] pass then lowers the checked AST into
//! register-addressed bytecode, one [`bytecode::CodeBlock`] per program, eval
//! unit or function body.

pub mod bytecode;
pub mod codegen;
pub mod opvalue;
pub mod semantic;
pub mod state;

pub use bytecode::{CodeBlock, CompiledFunction, Instruction, OpCode, Operand};
pub use codegen::{compile_eval, compile_function, compile_program};
pub use semantic::SemanticChecker;

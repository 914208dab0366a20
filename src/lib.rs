// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # kestrel-js
//!
//! A register-based bytecode compiler for JavaScript, implemented in Rust.
//!
//! ## Overview
//!
//! This crate lowers a parsed JavaScript AST into a linear, register-addressed
//! bytecode sequence for an external virtual machine to execute:
//! - A semantic pre-pass resolving labels and break/continue targets
//! - Compile-time classification of every variable reference
//! - Deterministic temporary-register allocation and reclamation
//! - A uniform reference protocol for assignable expressions
//! - Structurally correct control flow, including try/catch/finally
//!   unwind semantics
//!
//! Lexing, parsing, the runtime object model and the interpreter loop are
//! external collaborators and out of scope.
//!
//! ## Quick Start
//!
//! ```rust
//! use kestrel_js::ast::*;
//! use kestrel_js::compile_program;
//!
//! let program = Program {
//!     body: vec![Statement::Expression(ExpressionStatement {
//!         expression: Expression::Binary(BinaryExpression {
//!             operator: BinaryOperator::Add,
//!             left: Box::new(Expression::Literal(Literal::Number(1.0))),
//!             right: Box::new(Expression::Literal(Literal::Number(2.0))),
//!         }),
//!     })],
//! };
//! let block = compile_program(program).unwrap();
//! assert!(!block.instructions.is_empty());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod compiler;

// Re-exports for convenience
pub use compiler::bytecode::{CodeBlock, CompiledFunction, Instruction, OpCode, Operand};
pub use compiler::codegen::{compile_eval, compile_function, compile_program};
pub use compiler::semantic::SemanticChecker;

/// Errors that can occur during compilation.
///
/// Source-level problems (bad labels, invalid assignment targets, illegal
/// `return`) never surface here: the semantic checker converts them into
/// error nodes that raise at run time. An `Err` from the compiler always
/// means an internal invariant was violated.
#[derive(Debug, Clone)]
pub enum Error {
    /// Internal compiler error
    InternalError(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InternalError(msg) => write!(f, "InternalError: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

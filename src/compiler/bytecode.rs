//! Bytecode definitions.
//!
//! Instructions address a per-activation register file. By convention the
//! destination register is the first operand of any instruction that writes
//! one. Jump targets are absolute addresses within the same [`CodeBlock`],
//! emitted as placeholders and patched once known.

use std::rc::Rc;

/// A register index within one activation record.
pub type RegId = u32;

/// An absolute instruction address within a [`CodeBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr(pub u32);

impl Addr {
    /// Placeholder written by [`CodeBlock::emit_jump`], replaced by
    /// [`CodeBlock::patch`].
    pub const PLACEHOLDER: Addr = Addr(u32::MAX);
}

/// An instruction operand.
///
/// Narrow payloads (`Bool`, `Int32`, `Addr`, `Reg`) fit in four bytes; the
/// remaining payloads are wide.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The constant `undefined`
    Undefined,
    /// The constant `null`
    Null,
    /// Boolean constant
    Bool(bool),
    /// Integer constant (unwind counts, array lengths, small indices)
    Int32(i32),
    /// Number constant
    Number(f64),
    /// String constant
    Str(Rc<str>),
    /// Interned identifier (property or binding name)
    Ident(Rc<str>),
    /// Absolute jump target
    Addr(Addr),
    /// Register reference; read or write depends on operand position
    Reg(RegId),
    /// Compiled function template, consumed by `NewFunction`
    Func(Rc<CompiledFunction>),
}

/// Operation codes for the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // Data movement
    /// `Mov dst, src` — copy a value into a register
    Mov,

    // Arithmetic
    /// `Add dst, lhs, rhs` — addition or string concatenation
    Add,
    /// `Sub dst, lhs, rhs`
    Sub,
    /// `Mul dst, lhs, rhs`
    Mul,
    /// `Div dst, lhs, rhs`
    Div,
    /// `Mod dst, lhs, rhs`
    Mod,
    /// `Neg dst, src` — unary minus
    Neg,
    /// `ToNumber dst, src` — numeric conversion (unary plus)
    ToNumber,

    // Comparison
    /// `Eq dst, lhs, rhs` (`==`)
    Eq,
    /// `Ne dst, lhs, rhs` (`!=`)
    Ne,
    /// `StrictEq dst, lhs, rhs` (`===`)
    StrictEq,
    /// `StrictNe dst, lhs, rhs` (`!==`)
    StrictNe,
    /// `Lt dst, lhs, rhs`
    Lt,
    /// `Le dst, lhs, rhs`
    Le,
    /// `Gt dst, lhs, rhs`
    Gt,
    /// `Ge dst, lhs, rhs`
    Ge,

    // Logical / bitwise
    /// `Not dst, src`
    Not,
    /// `BitAnd dst, lhs, rhs`
    BitAnd,
    /// `BitOr dst, lhs, rhs`
    BitOr,
    /// `BitXor dst, lhs, rhs`
    BitXor,
    /// `BitNot dst, src`
    BitNot,
    /// `Shl dst, lhs, rhs`
    Shl,
    /// `Shr dst, lhs, rhs`
    Shr,
    /// `Ushr dst, lhs, rhs`
    Ushr,
    /// `TypeOf dst, src`
    TypeOf,
    /// `InstanceOf dst, lhs, rhs`
    InstanceOf,
    /// `In dst, lhs, rhs`
    In,

    // Variable access (one opcode family per classification)
    /// `GetGlobal dst, ident` — read a global-object property
    GetGlobal,
    /// `PutGlobal ident, value` — write a global-object property
    PutGlobal,
    /// `DeleteGlobal dst, ident` — delete a global-object property
    DeleteGlobal,
    /// `DeclareVar ident` — declare a binding in the current variable object
    DeclareVar,
    /// `ScopeLookup dst_base, ident` — resolve the binding object for a
    /// write or delete, searching the full scope chain
    ScopeLookup,
    /// `ScopeLookupAndGet dst_val, dst_base, ident` — fused resolve-and-read
    ScopeLookupAndGet,
    /// `OuterScopeLookup dst_base, ident` — as `ScopeLookup`, skipping the
    /// current activation
    OuterScopeLookup,
    /// `OuterScopeLookupAndGet dst_val, dst_base, ident`
    OuterScopeLookupAndGet,

    // Property access
    /// `GetPropById dst, base, ident`
    GetPropById,
    /// `PutPropById base, ident, value`
    PutPropById,
    /// `DeletePropById dst, base, ident`
    DeletePropById,
    /// `GetPropByVal dst, base, index`
    GetPropByVal,
    /// `PutPropByVal base, index, value`
    PutPropByVal,
    /// `DeletePropByVal dst, base, index`
    DeletePropByVal,

    // Construction
    /// `NewObject dst`
    NewObject,
    /// `NewArray dst, length`
    NewArray,
    /// `NewFunction dst, func` — instantiate a function template, capturing
    /// the current scope chain
    NewFunction,

    // Calls
    /// `BeginArgs` — push a fresh argument frame (nested-call safe)
    BeginArgs,
    /// `AddArg value` — append to the current argument frame
    AddArg,
    /// `Call dst, func, this` — call, consuming the argument frame
    Call,
    /// `Construct dst, func` — `new`, consuming the argument frame
    Construct,
    /// `LoadThis dst`
    LoadThis,

    // Control flow
    /// `Jump addr`
    Jump,
    /// `JumpIfTrue cond, addr`
    JumpIfTrue,
    /// `JumpIfFalse cond, addr`
    JumpIfFalse,

    // Scope chain
    /// `EnterWith object` — push an object scope
    EnterWith,
    /// `ExitWith` — pop the innermost object scope
    ExitWith,
    /// `EnterCatch ident` — bind the in-flight exception in a new scope
    EnterCatch,
    /// `ExitCatch` — pop the catch binding scope
    ExitCatch,
    /// `UnwindScopes count` — pop `count` scope/cleanup entries before an
    /// early exit from nested constructs
    UnwindScopes,

    // Enumeration
    /// `ForInBegin dst_state, object` — coerce to object, produce a cursor
    ForInBegin,
    /// `ForInNext dst_name, state, addr` — yield the next property name, or
    /// jump to `addr` when exhausted
    ForInNext,

    // Exceptions and completions
    /// `PushHandler addr` — install an exception handler
    PushHandler,
    /// `PopHandler` — remove the innermost handler
    PopHandler,
    /// `Throw value`
    Throw,
    /// `DeferCompletion` — save the pending completion before a finally body
    DeferCompletion,
    /// `ReactivateCompletion` — re-deliver the saved completion after a
    /// finally body, chaining into the next enclosing finally if one exists
    ReactivateCompletion,
    /// `Return value`
    Return,
    /// `ReturnInTryFinally value` — return that runs enclosing finally
    /// blocks before exiting
    ReturnInTryFinally,
    /// `ContBreakInTryFinally addr` — break/continue whose intent is carried
    /// through every intervening finally block before resuming at `addr`
    ContBreakInTryFinally,

    // Static errors
    /// `RaiseSyntaxError message`
    RaiseSyntaxError,
    /// `RaiseReferenceError message`
    RaiseReferenceError,

    // Special
    /// `Debugger` — breakpoint hook
    Debugger,
    /// `End` — terminate global or eval code
    End,
}

/// A single bytecode instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The operation code
    pub op: OpCode,
    /// The operands, in the order the opcode documents
    pub args: Vec<Operand>,
}

/// A not-yet-patched jump operand within a [`CodeBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpSite {
    /// Index of the instruction holding the placeholder
    pub instruction: usize,
    /// Index of the placeholder operand within that instruction
    pub operand: usize,
}

/// A compiled bytecode block for one program, eval unit or function body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeBlock {
    /// The instructions
    pub instructions: Vec<Instruction>,
    /// Number of registers the activation record needs
    pub register_count: usize,
    /// Markability per register: `true` means the slot may hold a heap
    /// pointer the memory manager must trace
    pub markable: Vec<bool>,
}

impl CodeBlock {
    /// Creates a new empty code block.
    pub fn new() -> Self {
        Self::default()
    }

    /// The address the next emitted instruction will occupy.
    pub fn next_addr(&self) -> Addr {
        Addr(self.instructions.len() as u32)
    }

    /// Appends an instruction and returns its index.
    pub fn emit(&mut self, op: OpCode, args: Vec<Operand>) -> usize {
        let index = self.instructions.len();
        self.instructions.push(Instruction { op, args });
        index
    }

    /// Appends an instruction whose final operand is a jump placeholder,
    /// returning the site to patch later.
    pub fn emit_jump(&mut self, op: OpCode, mut args: Vec<Operand>) -> JumpSite {
        args.push(Operand::Addr(Addr::PLACEHOLDER));
        let operand = args.len() - 1;
        let instruction = self.emit(op, args);
        JumpSite {
            instruction,
            operand,
        }
    }

    /// Resolves a previously emitted jump placeholder.
    pub fn patch(&mut self, site: JumpSite, target: Addr) {
        let slot = &mut self.instructions[site.instruction].args[site.operand];
        debug_assert_eq!(*slot, Operand::Addr(Addr::PLACEHOLDER));
        *slot = Operand::Addr(target);
    }

    /// Number of jump placeholders still unresolved. Zero after any
    /// completed compilation.
    pub fn unresolved_jumps(&self) -> usize {
        self.instructions
            .iter()
            .flat_map(|i| i.args.iter())
            .filter(|a| **a == Operand::Addr(Addr::PLACEHOLDER))
            .count()
    }
}

/// A compiled function template, embedded as a wide operand of
/// `NewFunction` and instantiated by the VM with the scope chain captured
/// at run time.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    /// The function name, if any
    pub name: Option<Rc<str>>,
    /// The parameter names, bound to the lowest registers in order
    pub params: Vec<Rc<str>>,
    /// The function body
    pub block: CodeBlock,
}

//! Compile-time operand descriptions.
//!
//! An [`OpValue`] describes one operand of an instruction about to be
//! emitted: either an immediate constant or a view of a register. Register
//! views come in two flavours, a value view ([`OpValue::Reg`], "the contents
//! of this register") and a name view ([`OpValue::Dest`], "this register as
//! a write target"). A temporary register stays allocated for as long as any
//! view of it is alive; lowering a view into an [`Operand`] drops the
//! ownership handle, which is what makes register reuse line up exactly with
//! the last instruction that mentions the slot.

use std::rc::Rc;

use crate::compiler::bytecode::{Addr, CompiledFunction, Operand, RegId};
use crate::compiler::state::TempSlot;

/// Shared ownership of one allocated temporary register. Dropping the last
/// handle returns the slot to its free list. The field is held only for its
/// drop effect.
#[derive(Debug, Clone)]
pub struct TempHandle(#[allow(dead_code)] pub(crate) Rc<TempSlot>);

/// A register view: the slot id plus, for temporaries, the handle keeping
/// the slot alive. Fixed local-variable registers carry no handle.
#[derive(Debug, Clone)]
pub struct Register {
    /// The register id
    pub id: RegId,
    /// Ownership of the slot, `None` for fixed locals
    pub temp: Option<TempHandle>,
}

impl Register {
    /// A view of a fixed (non-temporary) register.
    pub fn fixed(id: RegId) -> Self {
        Self { id, temp: None }
    }
}

/// A compile-time operand: an immediate constant or a register view.
#[derive(Debug, Clone)]
pub enum OpValue {
    /// The constant `undefined`
    Undefined,
    /// The constant `null`
    Null,
    /// Boolean constant
    Bool(bool),
    /// Integer constant
    Int32(i32),
    /// Number constant
    Number(f64),
    /// String constant
    Str(Rc<str>),
    /// Interned identifier
    Ident(Rc<str>),
    /// Absolute address (backward jumps with a known target)
    Addr(Addr),
    /// Compiled function template
    Func(Rc<CompiledFunction>),
    /// A register currently holding a value of interest
    Reg(Register),
    /// A register name used as a write destination
    Dest(Register),
}

impl OpValue {
    /// Lowers this description into the operand an instruction stores,
    /// releasing any temporary ownership it carried.
    pub fn lower(self) -> Operand {
        match self {
            OpValue::Undefined => Operand::Undefined,
            OpValue::Null => Operand::Null,
            OpValue::Bool(b) => Operand::Bool(b),
            OpValue::Int32(i) => Operand::Int32(i),
            OpValue::Number(n) => Operand::Number(n),
            OpValue::Str(s) => Operand::Str(s),
            OpValue::Ident(i) => Operand::Ident(i),
            OpValue::Addr(a) => Operand::Addr(a),
            OpValue::Func(f) => Operand::Func(f),
            OpValue::Reg(r) | OpValue::Dest(r) => Operand::Reg(r.id),
        }
    }

    /// A write-destination view of a fixed register.
    pub fn fixed_dest(id: RegId) -> Self {
        OpValue::Dest(Register::fixed(id))
    }

    /// A value view of a fixed register.
    pub fn fixed_reg(id: RegId) -> Self {
        OpValue::Reg(Register::fixed(id))
    }

    /// The register id this value names, if it is a register view.
    pub fn reg_id(&self) -> Option<RegId> {
        match self {
            OpValue::Reg(r) | OpValue::Dest(r) => Some(r.id),
            _ => None,
        }
    }

    /// Whether this is an immediate constant rather than a register view.
    pub fn is_immediate(&self) -> bool {
        !matches!(self, OpValue::Reg(_) | OpValue::Dest(_))
    }
}

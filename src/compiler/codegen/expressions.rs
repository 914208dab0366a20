//! Expression lowering and the reference protocol.
//!
//! Assignable expressions (identifiers and member accesses) compile through
//! a [`CompileReference`], which pins the evaluated base (and index) of the
//! lvalue so a read-modify-write sequence evaluates each subexpression
//! exactly once. A reference is consumed by the operation that finishes it;
//! its temporaries are released at that point.

use crate::Error;
use crate::ast::*;
use crate::compiler::bytecode::OpCode;
use crate::compiler::opvalue::OpValue;
use crate::compiler::state::VarClass;

use super::CodeGenerator;

/// A resolved lvalue, holding the operands a later read or write needs.
pub(crate) enum CompileReference {
    /// A local variable register
    Local(u32),
    /// A global-object property
    Global(std::rc::Rc<str>),
    /// A binding object resolved by a scope-chain search
    Scoped {
        /// The resolved binding object
        base: OpValue,
        /// The binding name
        ident: std::rc::Rc<str>,
    },
    /// A named property of an evaluated base object
    Prop {
        /// The evaluated base
        base: OpValue,
        /// The property name
        ident: std::rc::Rc<str>,
    },
    /// A computed property of an evaluated base object
    Index {
        /// The evaluated base
        base: OpValue,
        /// The evaluated property key
        index: OpValue,
    },
}

fn binary_opcode(op: BinaryOperator) -> OpCode {
    match op {
        BinaryOperator::Add => OpCode::Add,
        BinaryOperator::Subtract => OpCode::Sub,
        BinaryOperator::Multiply => OpCode::Mul,
        BinaryOperator::Divide => OpCode::Div,
        BinaryOperator::Modulo => OpCode::Mod,
        BinaryOperator::Equal => OpCode::Eq,
        BinaryOperator::NotEqual => OpCode::Ne,
        BinaryOperator::StrictEqual => OpCode::StrictEq,
        BinaryOperator::StrictNotEqual => OpCode::StrictNe,
        BinaryOperator::LessThan => OpCode::Lt,
        BinaryOperator::LessThanEqual => OpCode::Le,
        BinaryOperator::GreaterThan => OpCode::Gt,
        BinaryOperator::GreaterThanEqual => OpCode::Ge,
        BinaryOperator::BitwiseAnd => OpCode::BitAnd,
        BinaryOperator::BitwiseOr => OpCode::BitOr,
        BinaryOperator::BitwiseXor => OpCode::BitXor,
        BinaryOperator::LeftShift => OpCode::Shl,
        BinaryOperator::RightShift => OpCode::Shr,
        BinaryOperator::UnsignedRightShift => OpCode::Ushr,
        BinaryOperator::InstanceOf => OpCode::InstanceOf,
        BinaryOperator::In => OpCode::In,
    }
}

/// The opcode a compound assignment combines with.
fn compound_opcode(op: AssignmentOperator) -> Option<OpCode> {
    match op {
        AssignmentOperator::Assign => None,
        AssignmentOperator::AddAssign => Some(OpCode::Add),
        AssignmentOperator::SubAssign => Some(OpCode::Sub),
        AssignmentOperator::MulAssign => Some(OpCode::Mul),
        AssignmentOperator::DivAssign => Some(OpCode::Div),
        AssignmentOperator::ModAssign => Some(OpCode::Mod),
        AssignmentOperator::ShlAssign => Some(OpCode::Shl),
        AssignmentOperator::ShrAssign => Some(OpCode::Shr),
        AssignmentOperator::UshrAssign => Some(OpCode::Ushr),
        AssignmentOperator::BitAndAssign => Some(OpCode::BitAnd),
        AssignmentOperator::BitOrAssign => Some(OpCode::BitOr),
        AssignmentOperator::BitXorAssign => Some(OpCode::BitXor),
    }
}

/// Object-literal key spelling for a numeric key, matching the runtime's
/// number-to-string conversion: integral values below 1e21 print in full
/// decimal, larger magnitudes use the `1e+21` exponent form.
fn number_key(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        // i128 holds every integral f64 in this range exactly; i64 would
        // saturate from 2^63 upward.
        return format!("{}", n as i128);
    }
    if n.abs() >= 1e21 {
        let mut s = format!("{n:e}");
        // Positive exponents carry an explicit sign.
        if let Some(pos) = s.find('e')
            && s.as_bytes().get(pos + 1) != Some(&b'-')
        {
            s.insert(pos + 1, '+');
        }
        return s;
    }
    format!("{n}")
}

impl CodeGenerator {
    /// Lowers one expression, returning the operand holding its value.
    pub(super) fn expression(&mut self, expr: &Expression) -> Result<OpValue, Error> {
        match expr {
            Expression::Literal(lit) => Ok(self.literal(lit)),
            Expression::Identifier(_) | Expression::Member(_) => {
                let (value, reference) = self.ref_read(expr)?;
                drop(reference);
                Ok(value)
            }
            Expression::This => {
                let (value, dest) = self.state.request_temporary(true);
                self.emit(OpCode::LoadThis, vec![dest]);
                Ok(value)
            }
            Expression::Array(a) => self.array_literal(a),
            Expression::Object(o) => self.object_literal(o),
            Expression::Function(f) => {
                let template = Self::lower_function(
                    f.id.as_ref().map(|i| i.name.as_str()),
                    &f.params,
                    &f.body,
                )?;
                let (value, dest) = self.state.request_temporary(true);
                self.emit(OpCode::NewFunction, vec![dest, OpValue::Func(template)]);
                Ok(value)
            }
            Expression::Call(c) => self.call_expression(c),
            Expression::New(n) => self.new_expression(n),
            Expression::Unary(u) => self.unary_expression(u),
            Expression::Update(u) => self.update_expression(u),
            Expression::Binary(b) => self.binary_expression(b),
            Expression::Logical(l) => self.logical_expression(l),
            Expression::Assignment(a) => self.assignment_expression(a),
            Expression::Conditional(c) => self.conditional_expression(c),
            Expression::Sequence(s) => {
                let mut result = OpValue::Undefined;
                for e in &s.expressions {
                    result = self.expression(e)?;
                }
                Ok(result)
            }
            Expression::Error(e) => {
                self.raise_static_error(e);
                Ok(OpValue::Undefined)
            }
        }
    }

    fn literal(&mut self, lit: &Literal) -> OpValue {
        match lit {
            Literal::Number(n) => OpValue::Number(*n),
            Literal::String(s) => OpValue::Str(self.state.intern(s)),
            Literal::Boolean(b) => OpValue::Bool(*b),
            Literal::Null => OpValue::Null,
            Literal::Undefined => OpValue::Undefined,
        }
    }

    fn array_literal(&mut self, a: &ArrayExpression) -> Result<OpValue, Error> {
        let (array, dest) = self.state.request_temporary(true);
        self.emit(
            OpCode::NewArray,
            vec![dest, OpValue::Int32(a.elements.len() as i32)],
        );
        for (index, element) in a.elements.iter().enumerate() {
            // Elisions contribute to the length only.
            if let Some(e) = element {
                let value = self.expression(e)?;
                self.emit(
                    OpCode::PutPropByVal,
                    vec![array.clone(), OpValue::Int32(index as i32), value],
                );
            }
        }
        Ok(array)
    }

    fn object_literal(&mut self, o: &ObjectExpression) -> Result<OpValue, Error> {
        let (object, dest) = self.state.request_temporary(true);
        self.emit(OpCode::NewObject, vec![dest]);
        for property in &o.properties {
            let key = match &property.key {
                PropertyKey::Identifier(name) | PropertyKey::String(name) => {
                    self.state.intern(name)
                }
                PropertyKey::Number(n) => self.state.intern(&number_key(*n)),
            };
            let value = self.expression(&property.value)?;
            self.emit(
                OpCode::PutPropById,
                vec![object.clone(), OpValue::Ident(key), value],
            );
        }
        Ok(object)
    }

    fn call_expression(&mut self, c: &CallExpression) -> Result<OpValue, Error> {
        let (func, this) = self.ref_func(&c.callee)?;
        // Each call gets its own argument frame, so arguments may
        // themselves contain calls.
        self.emit(OpCode::BeginArgs, vec![]);
        for argument in &c.arguments {
            let value = self.expression(argument)?;
            self.emit(OpCode::AddArg, vec![value]);
        }
        let (result, dest) = self.state.request_temporary(true);
        self.emit(OpCode::Call, vec![dest, func, this]);
        Ok(result)
    }

    fn new_expression(&mut self, n: &NewExpression) -> Result<OpValue, Error> {
        let callee = self.expression(&n.callee)?;
        self.emit(OpCode::BeginArgs, vec![]);
        for argument in &n.arguments {
            let value = self.expression(argument)?;
            self.emit(OpCode::AddArg, vec![value]);
        }
        let (result, dest) = self.state.request_temporary(true);
        self.emit(OpCode::Construct, vec![dest, callee]);
        Ok(result)
    }

    fn unary_expression(&mut self, u: &UnaryExpression) -> Result<OpValue, Error> {
        match u.operator {
            UnaryOperator::Minus => {
                // Negated number literals become immediates.
                if let Expression::Literal(Literal::Number(n)) = &*u.argument {
                    return Ok(OpValue::Number(-n));
                }
                let value = self.expression(&u.argument)?;
                let (result, dest) = self.state.request_temporary(false);
                self.emit(OpCode::Neg, vec![dest, value]);
                Ok(result)
            }
            UnaryOperator::Plus => {
                if let Expression::Literal(Literal::Number(n)) = &*u.argument {
                    return Ok(OpValue::Number(*n));
                }
                let value = self.expression(&u.argument)?;
                let (result, dest) = self.state.request_temporary(false);
                self.emit(OpCode::ToNumber, vec![dest, value]);
                Ok(result)
            }
            UnaryOperator::LogicalNot => {
                let value = self.expression(&u.argument)?;
                let (result, dest) = self.state.request_temporary(false);
                self.emit(OpCode::Not, vec![dest, value]);
                Ok(result)
            }
            UnaryOperator::BitwiseNot => {
                let value = self.expression(&u.argument)?;
                let (result, dest) = self.state.request_temporary(false);
                self.emit(OpCode::BitNot, vec![dest, value]);
                Ok(result)
            }
            UnaryOperator::Typeof => {
                let value = self.expression(&u.argument)?;
                let (result, dest) = self.state.request_temporary(true);
                self.emit(OpCode::TypeOf, vec![dest, value]);
                Ok(result)
            }
            UnaryOperator::Void => {
                self.expression(&u.argument)?;
                Ok(OpValue::Undefined)
            }
            UnaryOperator::Delete => self.delete_expression(&u.argument),
        }
    }

    fn update_expression(&mut self, u: &UpdateExpression) -> Result<OpValue, Error> {
        let (old, reference) = self.ref_read(&u.argument)?;
        let (old_number, old_dest) = self.state.request_temporary(false);
        self.emit(OpCode::ToNumber, vec![old_dest, old]);
        let opcode = match u.operator {
            UpdateOperator::Increment => OpCode::Add,
            UpdateOperator::Decrement => OpCode::Sub,
        };
        let (new, new_dest) = self.state.request_temporary(false);
        self.emit(
            opcode,
            vec![new_dest, old_number.clone(), OpValue::Number(1.0)],
        );
        self.ref_write(reference, new.clone())?;
        if u.prefix {
            Ok(new)
        } else {
            Ok(old_number)
        }
    }

    fn binary_expression(&mut self, b: &BinaryExpression) -> Result<OpValue, Error> {
        let left = self.expression(&b.left)?;
        let right = self.expression(&b.right)?;
        // `+` may concatenate, so its result can be a heap string.
        let markable = b.operator == BinaryOperator::Add;
        let (result, dest) = self.state.request_temporary(markable);
        self.emit(binary_opcode(b.operator), vec![dest, left, right]);
        Ok(result)
    }

    fn logical_expression(&mut self, l: &LogicalExpression) -> Result<OpValue, Error> {
        let (result, dest) = self.state.request_temporary(true);
        let left = self.expression(&l.left)?;
        self.emit(OpCode::Mov, vec![dest.clone(), left]);
        let short_circuit = match l.operator {
            LogicalOperator::And => self.emit_jump(OpCode::JumpIfFalse, vec![result.clone()]),
            LogicalOperator::Or => self.emit_jump(OpCode::JumpIfTrue, vec![result.clone()]),
        };
        let right = self.expression(&l.right)?;
        self.emit(OpCode::Mov, vec![dest, right]);
        let end = self.next_addr();
        self.patch(short_circuit, end);
        Ok(result)
    }

    fn assignment_expression(&mut self, a: &AssignmentExpression) -> Result<OpValue, Error> {
        match compound_opcode(a.operator) {
            None => {
                let reference = self.ref_bind(&a.left)?;
                let value = self.expression(&a.right)?;
                self.ref_write(reference, value.clone())?;
                Ok(value)
            }
            Some(opcode) => {
                let (old, reference) = self.ref_read(&a.left)?;
                let right = self.expression(&a.right)?;
                let markable = opcode == OpCode::Add;
                let (result, dest) = self.state.request_temporary(markable);
                self.emit(opcode, vec![dest, old, right]);
                self.ref_write(reference, result.clone())?;
                Ok(result)
            }
        }
    }

    fn conditional_expression(&mut self, c: &ConditionalExpression) -> Result<OpValue, Error> {
        let (result, dest) = self.state.request_temporary(true);
        let cond = self.expression(&c.test)?;
        let take_alternate = self.emit_jump(OpCode::JumpIfFalse, vec![cond]);
        let consequent = self.expression(&c.consequent)?;
        self.emit(OpCode::Mov, vec![dest.clone(), consequent]);
        let skip_alternate = self.emit_jump(OpCode::Jump, vec![]);
        let alternate_addr = self.next_addr();
        self.patch(take_alternate, alternate_addr);
        let alternate = self.expression(&c.alternate)?;
        self.emit(OpCode::Mov, vec![dest, alternate]);
        let end = self.next_addr();
        self.patch(skip_alternate, end);
        Ok(result)
    }

    /// Resolves an lvalue for a plain write, evaluating base and index
    /// subexpressions but not reading the current value.
    pub(super) fn ref_bind(&mut self, expr: &Expression) -> Result<CompileReference, Error> {
        match expr {
            Expression::Identifier(id) => self.bind_ident(&id.name),
            Expression::Member(m) => {
                let base = self.expression(&m.object)?;
                match &m.property {
                    MemberProperty::Identifier(name) => {
                        let ident = self.state.intern(name);
                        Ok(CompileReference::Prop { base, ident })
                    }
                    MemberProperty::Expression(e) => {
                        let index = self.expression(e)?;
                        Ok(CompileReference::Index { base, index })
                    }
                }
            }
            _ => Err(Error::InternalError(
                "reference operation on a non-reference expression".into(),
            )),
        }
    }

    fn bind_ident(&mut self, name: &str) -> Result<CompileReference, Error> {
        match self.state.classify_variable(name) {
            VarClass::Local(id) => Ok(CompileReference::Local(id)),
            VarClass::Global => Ok(CompileReference::Global(self.state.intern(name))),
            VarClass::Dynamic => {
                let ident = self.state.intern(name);
                let (base, dest) = self.state.request_temporary(true);
                self.emit(OpCode::ScopeLookup, vec![dest, OpValue::Ident(ident.clone())]);
                Ok(CompileReference::Scoped { base, ident })
            }
            VarClass::NonLocal => {
                let ident = self.state.intern(name);
                let (base, dest) = self.state.request_temporary(true);
                self.emit(
                    OpCode::OuterScopeLookup,
                    vec![dest, OpValue::Ident(ident.clone())],
                );
                Ok(CompileReference::Scoped { base, ident })
            }
        }
    }

    /// Resolves an lvalue and reads its current value in one pass, for
    /// reads, compound assignment and update expressions. Scope-chain
    /// classifications use the fused lookup-and-get opcodes so the chain is
    /// walked once.
    pub(super) fn ref_read(
        &mut self,
        expr: &Expression,
    ) -> Result<(OpValue, CompileReference), Error> {
        match expr {
            Expression::Identifier(id) => {
                let name = &id.name;
                match self.state.classify_variable(name) {
                    VarClass::Local(reg) => {
                        Ok((OpValue::fixed_reg(reg), CompileReference::Local(reg)))
                    }
                    VarClass::Global => {
                        let ident = self.state.intern(name);
                        let (value, dest) = self.state.request_temporary(true);
                        self.emit(
                            OpCode::GetGlobal,
                            vec![dest, OpValue::Ident(ident.clone())],
                        );
                        Ok((value, CompileReference::Global(ident)))
                    }
                    VarClass::Dynamic => {
                        self.scoped_read(name, OpCode::ScopeLookupAndGet)
                    }
                    VarClass::NonLocal => {
                        self.scoped_read(name, OpCode::OuterScopeLookupAndGet)
                    }
                }
            }
            Expression::Member(m) => {
                let base = self.expression(&m.object)?;
                match &m.property {
                    MemberProperty::Identifier(name) => {
                        let ident = self.state.intern(name);
                        let (value, dest) = self.state.request_temporary(true);
                        self.emit(
                            OpCode::GetPropById,
                            vec![dest, base.clone(), OpValue::Ident(ident.clone())],
                        );
                        Ok((value, CompileReference::Prop { base, ident }))
                    }
                    MemberProperty::Expression(e) => {
                        let index = self.expression(e)?;
                        let (value, dest) = self.state.request_temporary(true);
                        self.emit(
                            OpCode::GetPropByVal,
                            vec![dest, base.clone(), index.clone()],
                        );
                        Ok((value, CompileReference::Index { base, index }))
                    }
                }
            }
            _ => Err(Error::InternalError(
                "reference operation on a non-reference expression".into(),
            )),
        }
    }

    fn scoped_read(
        &mut self,
        name: &str,
        opcode: OpCode,
    ) -> Result<(OpValue, CompileReference), Error> {
        let ident = self.state.intern(name);
        let (value, value_dest) = self.state.request_temporary(true);
        let (base, base_dest) = self.state.request_temporary(true);
        self.emit(
            opcode,
            vec![value_dest, base_dest, OpValue::Ident(ident.clone())],
        );
        Ok((value, CompileReference::Scoped { base, ident }))
    }

    /// Stores a value through a resolved reference, consuming it.
    pub(super) fn ref_write(
        &mut self,
        reference: CompileReference,
        value: OpValue,
    ) -> Result<(), Error> {
        match reference {
            CompileReference::Local(reg) => {
                self.emit(OpCode::Mov, vec![OpValue::fixed_dest(reg), value]);
            }
            CompileReference::Global(ident) => {
                self.emit(OpCode::PutGlobal, vec![OpValue::Ident(ident), value]);
            }
            CompileReference::Scoped { base, ident }
            | CompileReference::Prop { base, ident } => {
                self.emit(
                    OpCode::PutPropById,
                    vec![base, OpValue::Ident(ident), value],
                );
            }
            CompileReference::Index { base, index } => {
                self.emit(OpCode::PutPropByVal, vec![base, index, value]);
            }
        }
        Ok(())
    }

    /// Evaluates a call callee, yielding the function value and the `this`
    /// value the call receives. Property callees pass their base object;
    /// scope-resolved callees pass the resolved binding object, which the
    /// VM replaces with the global object when it is an activation.
    pub(super) fn ref_func(&mut self, expr: &Expression) -> Result<(OpValue, OpValue), Error> {
        if expr.is_reference() {
            let (value, reference) = self.ref_read(expr)?;
            let this = match reference {
                CompileReference::Local(_) | CompileReference::Global(_) => OpValue::Undefined,
                CompileReference::Scoped { base, .. } => base,
                CompileReference::Prop { base, .. }
                | CompileReference::Index { base, .. } => base,
            };
            Ok((value, this))
        } else {
            let value = self.expression(expr)?;
            Ok((value, OpValue::Undefined))
        }
    }

    /// Lowers `delete expr`. Deleting a local is statically `false` with
    /// no code; deleting a non-reference evaluates the operand and is
    /// statically `true`.
    pub(super) fn delete_expression(&mut self, expr: &Expression) -> Result<OpValue, Error> {
        match expr {
            Expression::Identifier(id) => {
                let name = &id.name;
                match self.state.classify_variable(name) {
                    VarClass::Local(_) => Ok(OpValue::Bool(false)),
                    VarClass::Global => {
                        let ident = self.state.intern(name);
                        let (result, dest) = self.state.request_temporary(false);
                        self.emit(OpCode::DeleteGlobal, vec![dest, OpValue::Ident(ident)]);
                        Ok(result)
                    }
                    VarClass::Dynamic => self.scoped_delete(name, OpCode::ScopeLookup),
                    VarClass::NonLocal => self.scoped_delete(name, OpCode::OuterScopeLookup),
                }
            }
            Expression::Member(m) => {
                let base = self.expression(&m.object)?;
                let (result, dest) = self.state.request_temporary(false);
                match &m.property {
                    MemberProperty::Identifier(name) => {
                        let ident = self.state.intern(name);
                        self.emit(
                            OpCode::DeletePropById,
                            vec![dest, base, OpValue::Ident(ident)],
                        );
                    }
                    MemberProperty::Expression(e) => {
                        let index = self.expression(e)?;
                        self.emit(OpCode::DeletePropByVal, vec![dest, base, index]);
                    }
                }
                Ok(result)
            }
            other => {
                self.expression(other)?;
                Ok(OpValue::Bool(true))
            }
        }
    }

    fn scoped_delete(&mut self, name: &str, lookup: OpCode) -> Result<OpValue, Error> {
        let ident = self.state.intern(name);
        let (base, base_dest) = self.state.request_temporary(true);
        self.emit(lookup, vec![base_dest, OpValue::Ident(ident.clone())]);
        let (result, dest) = self.state.request_temporary(false);
        self.emit(
            OpCode::DeletePropById,
            vec![dest, base, OpValue::Ident(ident)],
        );
        Ok(result)
    }

    /// Stores a value into a named variable, classification deciding the
    /// opcode family. Used by initializers, hoisted function bindings and
    /// for-in loop variables.
    pub(super) fn write_variable(&mut self, name: &str, value: OpValue) -> Result<(), Error> {
        let reference = self.bind_ident(name)?;
        self.ref_write(reference, value)
    }
}

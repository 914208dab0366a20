//! Bytecode generation.
//!
//! One [`CodeGenerator`] lowers one checked program, eval unit or function
//! body into a [`CodeBlock`]. Nested functions are compiled recursively,
//! each with its own generator, and embedded as [`CompiledFunction`]
//! templates in the enclosing block's instruction stream.
//!
//! Statement lowering lives here; expression lowering and the reference
//! protocol live in [`expressions`].

mod expressions;
#[cfg(test)]
mod tests;

use std::rc::Rc;

use crate::Error;
use crate::ast::*;
use crate::compiler::bytecode::{
    Addr, CodeBlock, CompiledFunction, JumpSite, OpCode,
};
use crate::compiler::opvalue::OpValue;
use crate::compiler::semantic::SemanticChecker;
use crate::compiler::state::{CodeType, CompileState, JumpPath, NestEntry};

/// Compiles a program into global code.
///
/// Runs the semantic pre-pass first; the resulting block ends with `End`.
pub fn compile_program(program: Program) -> Result<CodeBlock, Error> {
    let program = SemanticChecker::new().check_program(program);
    CodeGenerator::new(CodeType::Global).generate_unit(&program.body)
}

/// Compiles a program into eval code. Every variable reference inside
/// classifies as dynamic.
pub fn compile_eval(program: Program) -> Result<CodeBlock, Error> {
    let program = SemanticChecker::new().check_program(program);
    CodeGenerator::new(CodeType::Eval).generate_unit(&program.body)
}

/// Compiles a standalone function into a [`CompiledFunction`] template.
pub fn compile_function(function: FunctionExpression) -> Result<Rc<CompiledFunction>, Error> {
    let body = SemanticChecker::new().check_function_body(function.body);
    CodeGenerator::lower_function(
        function.id.as_ref().map(|i| i.name.as_str()),
        &function.params,
        &body,
    )
}

/// Collects the hoisted declarations of one variable scope: `var` names in
/// source order and function declarations. Does not descend into nested
/// functions.
fn collect_declarations<'a>(
    stmts: &'a [Statement],
    vars: &mut Vec<&'a str>,
    funcs: &mut Vec<&'a FunctionDeclaration>,
) {
    for stmt in stmts {
        collect_from_statement(stmt, vars, funcs);
    }
}

fn collect_from_statement<'a>(
    stmt: &'a Statement,
    vars: &mut Vec<&'a str>,
    funcs: &mut Vec<&'a FunctionDeclaration>,
) {
    match stmt {
        Statement::VariableDeclaration(decl) => {
            for d in &decl.declarations {
                vars.push(&d.id.name);
            }
        }
        Statement::FunctionDeclaration(f) => funcs.push(f),
        Statement::Block(b) => collect_declarations(&b.body, vars, funcs),
        Statement::If(s) => {
            collect_from_statement(&s.consequent, vars, funcs);
            if let Some(alt) = &s.alternate {
                collect_from_statement(alt, vars, funcs);
            }
        }
        Statement::While(s) => collect_from_statement(&s.body, vars, funcs),
        Statement::DoWhile(s) => collect_from_statement(&s.body, vars, funcs),
        Statement::For(s) => {
            if let Some(ForInit::Declaration(decl)) = &s.init {
                for d in &decl.declarations {
                    vars.push(&d.id.name);
                }
            }
            collect_from_statement(&s.body, vars, funcs);
        }
        Statement::ForIn(s) => {
            if let ForInLeft::Declaration(decl) = &s.left {
                for d in &decl.declarations {
                    vars.push(&d.id.name);
                }
            }
            collect_from_statement(&s.body, vars, funcs);
        }
        Statement::With(s) => collect_from_statement(&s.body, vars, funcs),
        Statement::Switch(s) => {
            for case in &s.cases {
                collect_declarations(&case.consequent, vars, funcs);
            }
        }
        Statement::Labeled(s) => collect_from_statement(&s.body, vars, funcs),
        Statement::Try(s) => {
            collect_declarations(&s.block.body, vars, funcs);
            if let Some(h) = &s.handler {
                collect_declarations(&h.body.body, vars, funcs);
            }
            if let Some(f) = &s.finalizer {
                collect_declarations(&f.body, vars, funcs);
            }
        }
        Statement::Expression(_)
        | Statement::Empty
        | Statement::Continue(_)
        | Statement::Break(_)
        | Statement::Return(_)
        | Statement::Throw(_)
        | Statement::Debugger
        | Statement::Error(_) => {}
    }
}

/// Lowers one checked variable scope into bytecode.
pub(crate) struct CodeGenerator {
    state: CompileState,
}

impl CodeGenerator {
    fn new(code_type: CodeType) -> Self {
        Self {
            state: CompileState::new(code_type),
        }
    }

    /// Lowers operand descriptions and appends an instruction, releasing
    /// any consumed temporaries.
    fn emit(&mut self, op: OpCode, args: Vec<OpValue>) -> usize {
        let args = args.into_iter().map(OpValue::lower).collect();
        self.state.block.emit(op, args)
    }

    /// As [`Self::emit`], with a trailing jump placeholder.
    fn emit_jump(&mut self, op: OpCode, args: Vec<OpValue>) -> JumpSite {
        let args = args.into_iter().map(OpValue::lower).collect();
        self.state.block.emit_jump(op, args)
    }

    fn next_addr(&self) -> Addr {
        self.state.block.next_addr()
    }

    fn patch(&mut self, site: JumpSite, target: Addr) {
        self.state.block.patch(site, target);
    }

    /// Compiles global or eval code: hoisted declarations, then the
    /// statements, terminated by `End`.
    fn generate_unit(mut self, body: &[Statement]) -> Result<CodeBlock, Error> {
        let mut vars = Vec::new();
        let mut funcs = Vec::new();
        collect_declarations(body, &mut vars, &mut funcs);
        let mut declared = rustc_hash::FxHashSet::default();
        for name in vars {
            if declared.insert(name) {
                let ident = self.state.intern(name);
                self.emit(OpCode::DeclareVar, vec![OpValue::Ident(ident)]);
            }
        }
        for func in funcs {
            if declared.insert(func.id.name.as_str()) {
                let ident = self.state.intern(&func.id.name);
                self.emit(OpCode::DeclareVar, vec![OpValue::Ident(ident)]);
            }
            let template =
                Self::lower_function(Some(&func.id.name), &func.params, &func.body)?;
            let (value, dest) = self.state.request_temporary(true);
            self.emit(OpCode::NewFunction, vec![dest, OpValue::Func(template)]);
            self.write_variable(&func.id.name, value)?;
        }
        for stmt in body {
            self.statement(stmt)?;
        }
        self.emit(OpCode::End, vec![]);
        Ok(self.state.finish())
    }

    /// Compiles a checked function body into a template. Parameters occupy
    /// the lowest registers in declaration order, then the hoisted locals.
    fn lower_function(
        name: Option<&str>,
        params: &[Identifier],
        body: &[Statement],
    ) -> Result<Rc<CompiledFunction>, Error> {
        let mut generator = CodeGenerator::new(CodeType::Function);
        let mut param_names = Vec::with_capacity(params.len());
        for param in params {
            param_names.push(generator.state.intern(&param.name));
            generator.state.declare_local(&param.name);
        }
        let mut vars = Vec::new();
        let mut funcs = Vec::new();
        collect_declarations(body, &mut vars, &mut funcs);
        for var in vars {
            generator.state.declare_local(var);
        }
        for func in &funcs {
            generator.state.declare_local(&func.id.name);
        }
        for func in funcs {
            let template =
                Self::lower_function(Some(&func.id.name), &func.params, &func.body)?;
            let reg = generator.state.declare_local(&func.id.name);
            generator.emit(
                OpCode::NewFunction,
                vec![OpValue::fixed_dest(reg), OpValue::Func(template)],
            );
        }
        for stmt in body {
            generator.statement(stmt)?;
        }
        // Implicit completion for bodies that run off the end.
        generator.emit(OpCode::Return, vec![OpValue::Undefined]);
        let block = generator.state.finish();
        Ok(Rc::new(CompiledFunction {
            name: name.map(Rc::from),
            params: param_names,
            block,
        }))
    }

    fn statement(&mut self, stmt: &Statement) -> Result<(), Error> {
        match stmt {
            Statement::Expression(s) => {
                self.expression(&s.expression)?;
                Ok(())
            }
            Statement::VariableDeclaration(decl) => {
                // Declarations are hoisted; only initializers emit code.
                for d in &decl.declarations {
                    if let Some(init) = &d.init {
                        let value = self.expression(init)?;
                        self.write_variable(&d.id.name, value)?;
                    }
                }
                Ok(())
            }
            // Instantiated during hoisting.
            Statement::FunctionDeclaration(_) => Ok(()),
            Statement::Block(b) => {
                for s in &b.body {
                    self.statement(s)?;
                }
                Ok(())
            }
            Statement::Empty => Ok(()),
            Statement::If(s) => self.if_statement(s),
            Statement::While(s) => self.while_statement(s),
            Statement::DoWhile(s) => self.do_while_statement(s),
            Statement::For(s) => self.for_statement(s),
            Statement::ForIn(s) => self.for_in_statement(s),
            Statement::Continue(s) => self.continue_statement(s),
            Statement::Break(s) => self.break_statement(s),
            Statement::Return(s) => self.return_statement(s),
            Statement::With(s) => self.with_statement(s),
            Statement::Switch(s) => self.switch_statement(s),
            Statement::Labeled(s) => self.labeled_statement(s),
            Statement::Throw(s) => {
                let value = self.expression(&s.argument)?;
                self.emit(OpCode::Throw, vec![value]);
                Ok(())
            }
            Statement::Try(s) => self.try_statement(s),
            Statement::Debugger => {
                self.emit(OpCode::Debugger, vec![]);
                Ok(())
            }
            Statement::Error(e) => {
                self.raise_static_error(e);
                Ok(())
            }
        }
    }

    fn raise_static_error(&mut self, error: &StaticError) {
        let op = match error.kind {
            StaticErrorKind::Syntax => OpCode::RaiseSyntaxError,
            StaticErrorKind::Reference => OpCode::RaiseReferenceError,
        };
        let message = self.state.intern(&error.message);
        self.emit(op, vec![OpValue::Str(message)]);
    }

    fn if_statement(&mut self, s: &IfStatement) -> Result<(), Error> {
        let cond = self.expression(&s.test)?;
        let skip_then = self.emit_jump(OpCode::JumpIfFalse, vec![cond]);
        self.statement(&s.consequent)?;
        match &s.alternate {
            Some(alternate) => {
                let skip_else = self.emit_jump(OpCode::Jump, vec![]);
                let else_addr = self.next_addr();
                self.patch(skip_then, else_addr);
                self.statement(alternate)?;
                let end = self.next_addr();
                self.patch(skip_else, end);
            }
            None => {
                let end = self.next_addr();
                self.patch(skip_then, end);
            }
        }
        Ok(())
    }

    fn while_statement(&mut self, s: &WhileStatement) -> Result<(), Error> {
        self.state.push_target(s.target);
        let test_addr = self.next_addr();
        let cond = self.expression(&s.test)?;
        let exit = self.emit_jump(OpCode::JumpIfFalse, vec![cond]);
        self.statement(&s.body)?;
        self.emit(OpCode::Jump, vec![OpValue::Addr(test_addr)]);
        let frame = self.state.pop_target()?;
        let end = self.next_addr();
        self.patch(exit, end);
        for site in frame.breaks {
            self.patch(site, end);
        }
        for site in frame.continues {
            self.patch(site, test_addr);
        }
        Ok(())
    }

    fn do_while_statement(&mut self, s: &DoWhileStatement) -> Result<(), Error> {
        self.state.push_target(s.target);
        let body_addr = self.next_addr();
        self.statement(&s.body)?;
        let test_addr = self.next_addr();
        let cond = self.expression(&s.test)?;
        self.emit(OpCode::JumpIfTrue, vec![cond, OpValue::Addr(body_addr)]);
        let frame = self.state.pop_target()?;
        let end = self.next_addr();
        for site in frame.breaks {
            self.patch(site, end);
        }
        for site in frame.continues {
            self.patch(site, test_addr);
        }
        Ok(())
    }

    fn for_statement(&mut self, s: &ForStatement) -> Result<(), Error> {
        match &s.init {
            Some(ForInit::Declaration(decl)) => {
                self.statement(&Statement::VariableDeclaration(decl.clone()))?;
            }
            Some(ForInit::Expression(e)) => {
                self.expression(e)?;
            }
            None => {}
        }
        self.state.push_target(s.target);
        let test_addr = self.next_addr();
        let exit = match &s.test {
            Some(test) => {
                let cond = self.expression(test)?;
                Some(self.emit_jump(OpCode::JumpIfFalse, vec![cond]))
            }
            None => None,
        };
        self.statement(&s.body)?;
        let update_addr = self.next_addr();
        if let Some(update) = &s.update {
            self.expression(update)?;
        }
        self.emit(OpCode::Jump, vec![OpValue::Addr(test_addr)]);
        let frame = self.state.pop_target()?;
        let end = self.next_addr();
        if let Some(site) = exit {
            self.patch(site, end);
        }
        for site in frame.breaks {
            self.patch(site, end);
        }
        for site in frame.continues {
            self.patch(site, update_addr);
        }
        Ok(())
    }

    fn for_in_statement(&mut self, s: &ForInStatement) -> Result<(), Error> {
        // `for (var x = init in o)` runs the initializer once, up front.
        if let ForInLeft::Declaration(decl) = &s.left {
            for d in &decl.declarations {
                if let Some(init) = &d.init {
                    let value = self.expression(init)?;
                    self.write_variable(&d.id.name, value)?;
                }
            }
        }
        let object = self.expression(&s.right)?;
        let (cursor, cursor_dest) = self.state.request_temporary(true);
        self.emit(OpCode::ForInBegin, vec![cursor_dest, object]);
        self.state.push_target(s.target);
        let next_addr = self.next_addr();
        let (name, name_dest) = self.state.request_temporary(true);
        let exhausted =
            self.emit_jump(OpCode::ForInNext, vec![name_dest, cursor.clone()]);
        match &s.left {
            ForInLeft::Declaration(decl) => {
                let declarator = decl.declarations.first().ok_or_else(|| {
                    Error::InternalError("for-in declaration has no declarator".into())
                })?;
                self.write_variable(&declarator.id.name, name)?;
            }
            ForInLeft::Expression(lvalue) => {
                let reference = self.ref_bind(lvalue)?;
                self.ref_write(reference, name)?;
            }
        }
        self.statement(&s.body)?;
        self.emit(OpCode::Jump, vec![OpValue::Addr(next_addr)]);
        let frame = self.state.pop_target()?;
        let end = self.next_addr();
        self.patch(exhausted, end);
        for site in frame.breaks {
            self.patch(site, end);
        }
        for site in frame.continues {
            self.patch(site, next_addr);
        }
        drop(cursor);
        Ok(())
    }

    fn switch_statement(&mut self, s: &SwitchStatement) -> Result<(), Error> {
        let (disc, disc_dest) = self.state.request_temporary(true);
        let value = self.expression(&s.discriminant)?;
        self.emit(OpCode::Mov, vec![disc_dest, value]);
        // Phase one: the dispatch table. The discriminant stays live across
        // every comparison.
        let mut dispatch = Vec::with_capacity(s.cases.len());
        for case in &s.cases {
            match &case.test {
                Some(test) => {
                    let label = self.expression(test)?;
                    let (matched, matched_dest) = self.state.request_temporary(false);
                    self.emit(
                        OpCode::StrictEq,
                        vec![matched_dest, disc.clone(), label],
                    );
                    dispatch.push(Some(self.emit_jump(OpCode::JumpIfTrue, vec![matched])));
                }
                None => dispatch.push(None),
            }
        }
        let no_match = self.emit_jump(OpCode::Jump, vec![]);
        drop(disc);
        // Phase two: the clause bodies, falling through in source order.
        self.state.push_target(s.target);
        let mut starts = Vec::with_capacity(s.cases.len());
        let mut default_start = None;
        for case in &s.cases {
            let start = self.next_addr();
            starts.push(start);
            if case.test.is_none() {
                default_start = Some(start);
            }
            for stmt in &case.consequent {
                self.statement(stmt)?;
            }
        }
        let frame = self.state.pop_target()?;
        let end = self.next_addr();
        for (site, start) in dispatch.into_iter().zip(starts) {
            if let Some(site) = site {
                self.patch(site, start);
            }
        }
        self.patch(no_match, default_start.unwrap_or(end));
        for site in frame.breaks {
            self.patch(site, end);
        }
        debug_assert!(frame.continues.is_empty());
        Ok(())
    }

    fn labeled_statement(&mut self, s: &LabeledStatement) -> Result<(), Error> {
        if s.target == TargetId::UNBOUND {
            // The label binds to an inner loop or switch, or is unused.
            return self.statement(&s.body);
        }
        self.state.push_target(s.target);
        self.statement(&s.body)?;
        let frame = self.state.pop_target()?;
        let end = self.next_addr();
        for site in frame.breaks {
            self.patch(site, end);
        }
        Ok(())
    }

    fn break_statement(&mut self, s: &BreakStatement) -> Result<(), Error> {
        if s.target == TargetId::UNBOUND {
            return Err(Error::InternalError(
                "break reached code generation unresolved".into(),
            ));
        }
        let site = self.exit_jump(s.target)?;
        self.state.register_break(s.target, site)
    }

    fn continue_statement(&mut self, s: &ContinueStatement) -> Result<(), Error> {
        if s.target == TargetId::UNBOUND {
            return Err(Error::InternalError(
                "continue reached code generation unresolved".into(),
            ));
        }
        let site = self.exit_jump(s.target)?;
        self.state.register_continue(s.target, site)
    }

    /// Emits the transfer for a break or continue, honoring intervening
    /// scopes and finally blocks. The returned site is patched when the
    /// target construct finishes.
    fn exit_jump(&mut self, target: TargetId) -> Result<JumpSite, Error> {
        match self.state.jump_path(target)? {
            JumpPath::Direct { scopes } => {
                if scopes > 0 {
                    self.emit(OpCode::UnwindScopes, vec![OpValue::Int32(scopes as i32)]);
                }
                Ok(self.emit_jump(OpCode::Jump, vec![]))
            }
            JumpPath::ThroughFinally => {
                Ok(self.emit_jump(OpCode::ContBreakInTryFinally, vec![]))
            }
        }
    }

    fn return_statement(&mut self, s: &ReturnStatement) -> Result<(), Error> {
        let value = match &s.argument {
            Some(e) => self.expression(e)?,
            None => OpValue::Undefined,
        };
        if self.state.in_try_finally() {
            self.emit(OpCode::ReturnInTryFinally, vec![value]);
        } else {
            self.emit(OpCode::Return, vec![value]);
        }
        Ok(())
    }

    fn with_statement(&mut self, s: &WithStatement) -> Result<(), Error> {
        let object = self.expression(&s.object)?;
        self.emit(OpCode::EnterWith, vec![object]);
        self.state.push_nest(NestEntry::LexicalScope);
        self.state.enter_dynamic_scope();
        self.statement(&s.body)?;
        self.state.exit_dynamic_scope();
        self.state.pop_nest();
        self.emit(OpCode::ExitWith, vec![]);
        Ok(())
    }

    /// Lowers try/catch/finally.
    ///
    /// The finally handler is installed outermost so exceptions thrown in
    /// the catch body still reach it. The normal path falls through into
    /// the finally prologue; the exception path jumps there, with the
    /// pending completion preserved across the finally body by
    /// `DeferCompletion`/`ReactivateCompletion`.
    fn try_statement(&mut self, s: &TryStatement) -> Result<(), Error> {
        let finally_handler = if s.finalizer.is_some() {
            let site = self.emit_jump(OpCode::PushHandler, vec![]);
            self.state.push_nest(NestEntry::TryFinally);
            Some(site)
        } else {
            None
        };
        let catch_handler = if s.handler.is_some() {
            let site = self.emit_jump(OpCode::PushHandler, vec![]);
            self.state.push_nest(NestEntry::OtherCleanup);
            Some(site)
        } else {
            None
        };
        for stmt in &s.block.body {
            self.statement(stmt)?;
        }
        let mut skip_catch = None;
        if let (Some(site), Some(handler)) = (catch_handler, &s.handler) {
            self.emit(OpCode::PopHandler, vec![]);
            self.state.pop_nest();
            skip_catch = Some(self.emit_jump(OpCode::Jump, vec![]));
            let catch_addr = self.next_addr();
            self.patch(site, catch_addr);
            let param = self.state.intern(&handler.param.name);
            self.emit(OpCode::EnterCatch, vec![OpValue::Ident(param)]);
            self.state.push_nest(NestEntry::LexicalScope);
            self.state.enter_dynamic_scope();
            for stmt in &handler.body.body {
                self.statement(stmt)?;
            }
            self.state.exit_dynamic_scope();
            self.state.pop_nest();
            self.emit(OpCode::ExitCatch, vec![]);
        }
        if let Some(site) = skip_catch {
            let after = self.next_addr();
            self.patch(site, after);
        }
        if let (Some(site), Some(finalizer)) = (finally_handler, &s.finalizer) {
            self.emit(OpCode::PopHandler, vec![]);
            self.state.pop_nest();
            let finally_addr = self.next_addr();
            self.patch(site, finally_addr);
            self.emit(OpCode::DeferCompletion, vec![]);
            for stmt in &finalizer.body {
                self.statement(stmt)?;
            }
            self.emit(OpCode::ReactivateCompletion, vec![]);
        }
        Ok(())
    }
}

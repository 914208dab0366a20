//! Semantic pre-pass over the AST.
//!
//! Before code generation every program, eval unit and function body runs
//! through a [`SemanticChecker`] that resolves labels and break/continue
//! targets and replaces statically invalid constructs with error nodes. The
//! checker never fails: a bad label, an invalid assignment target or an
//! illegal `return` turns into a [`Statement::Error`] or
//! [`Expression::Error`] node, which the code generator lowers into an
//! instruction raising the matching error only when execution reaches it.
//! Sibling code compiles unaffected.
//!
//! Labels are per-function. A label wrapping an iteration statement or
//! switch binds to that construct's target; a label wrapping anything else
//! becomes a break-only target of its own, materialized on first use.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::*;

/// Whether a bound label names an iteration statement, a switch, or a
/// plain statement. Plain-statement labels mint their target lazily so a
/// never-referenced label costs nothing at code generation.
#[derive(Debug)]
struct LabelBinding {
    target: TargetId,
    continuable: bool,
    statement: bool,
}

/// Label and jump-target state for one function body.
#[derive(Debug, Default)]
struct FnContext {
    in_function: bool,
    /// Labels declared but not yet attached to a concrete statement
    pending: Vec<String>,
    /// Every label currently in scope, for duplicate detection
    seen: FxHashSet<String>,
    bound: FxHashMap<String, LabelBinding>,
    /// Innermost enclosing targets for unlabeled continue/break
    default_continue: Vec<TargetId>,
    default_break: Vec<TargetId>,
}

/// Resolves labels and break/continue targets and substitutes error nodes
/// for statically invalid constructs.
///
/// Target ids are unique across one checker instance; [`TargetId::UNBOUND`]
/// is never handed out.
#[derive(Debug)]
pub struct SemanticChecker {
    next_target: u32,
    ctx: FnContext,
}

impl Default for SemanticChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticChecker {
    /// Creates a checker for one compilation.
    pub fn new() -> Self {
        Self {
            next_target: 1,
            ctx: FnContext::default(),
        }
    }

    /// Checks a complete program or eval unit.
    pub fn check_program(&mut self, program: Program) -> Program {
        Program {
            body: program
                .body
                .into_iter()
                .map(|s| self.check_statement(s))
                .collect(),
        }
    }

    /// Checks a function body. Labels and `return` legality are scoped to
    /// the function, so the body gets a fresh context.
    pub fn check_function_body(&mut self, body: Vec<Statement>) -> Vec<Statement> {
        let outer = std::mem::take(&mut self.ctx);
        self.ctx.in_function = true;
        let body = body.into_iter().map(|s| self.check_statement(s)).collect();
        self.ctx = outer;
        body
    }

    fn fresh_target(&mut self) -> TargetId {
        let id = TargetId(self.next_target);
        self.next_target += 1;
        id
    }

    /// Attaches pending labels. `construct` carries the target of a loop or
    /// switch; `None` means the labels bind to a plain statement and become
    /// break-only targets of their own.
    fn bind_pending(&mut self, construct: Option<(TargetId, bool)>) {
        for label in std::mem::take(&mut self.ctx.pending) {
            let binding = match construct {
                Some((target, continuable)) => LabelBinding {
                    target,
                    continuable,
                    statement: false,
                },
                None => LabelBinding {
                    target: TargetId::UNBOUND,
                    continuable: false,
                    statement: true,
                },
            };
            self.ctx.bound.insert(label, binding);
        }
    }

    fn syntax_error(message: impl Into<String>) -> Statement {
        Statement::Error(StaticError {
            kind: StaticErrorKind::Syntax,
            message: message.into(),
        })
    }

    fn reference_error_stmt(message: impl Into<String>) -> Statement {
        Statement::Error(StaticError {
            kind: StaticErrorKind::Reference,
            message: message.into(),
        })
    }

    fn reference_error_expr(message: impl Into<String>) -> Expression {
        Expression::Error(StaticError {
            kind: StaticErrorKind::Reference,
            message: message.into(),
        })
    }

    /// Checks one statement, returning its (possibly substituted) form.
    pub fn check_statement(&mut self, stmt: Statement) -> Statement {
        match stmt {
            Statement::Labeled(labeled) => self.check_labeled(labeled),
            other => self.check_concrete(other),
        }
    }

    fn check_labeled(&mut self, labeled: LabeledStatement) -> Statement {
        let LabeledStatement { label, body, .. } = labeled;
        if self.ctx.seen.contains(&label) {
            // The enclosing labels still bind to whatever replaces this.
            return self.check_statement(Self::syntax_error(format!(
                "Label '{label}' has already been declared"
            )));
        }
        self.ctx.seen.insert(label.clone());
        self.ctx.pending.push(label.clone());
        let body = Box::new(self.check_statement(*body));
        self.ctx.seen.remove(&label);
        let target = match self.ctx.bound.remove(&label) {
            Some(binding) if binding.statement => binding.target,
            _ => TargetId::UNBOUND,
        };
        Statement::Labeled(LabeledStatement {
            label,
            body,
            target,
        })
    }

    fn check_concrete(&mut self, stmt: Statement) -> Statement {
        match stmt {
            Statement::While(mut s) => {
                let target = self.fresh_target();
                s.target = target;
                self.bind_pending(Some((target, true)));
                s.test = self.check_expression(s.test);
                self.ctx.default_continue.push(target);
                self.ctx.default_break.push(target);
                s.body = Box::new(self.check_statement(*s.body));
                self.ctx.default_break.pop();
                self.ctx.default_continue.pop();
                Statement::While(s)
            }
            Statement::DoWhile(mut s) => {
                let target = self.fresh_target();
                s.target = target;
                self.bind_pending(Some((target, true)));
                self.ctx.default_continue.push(target);
                self.ctx.default_break.push(target);
                s.body = Box::new(self.check_statement(*s.body));
                self.ctx.default_break.pop();
                self.ctx.default_continue.pop();
                s.test = self.check_expression(s.test);
                Statement::DoWhile(s)
            }
            Statement::For(mut s) => {
                let target = self.fresh_target();
                s.target = target;
                self.bind_pending(Some((target, true)));
                s.init = s.init.map(|init| match init {
                    ForInit::Declaration(d) => {
                        ForInit::Declaration(self.check_var_declaration(d))
                    }
                    ForInit::Expression(e) => ForInit::Expression(self.check_expression(e)),
                });
                s.test = s.test.map(|e| self.check_expression(e));
                s.update = s.update.map(|e| self.check_expression(e));
                self.ctx.default_continue.push(target);
                self.ctx.default_break.push(target);
                s.body = Box::new(self.check_statement(*s.body));
                self.ctx.default_break.pop();
                self.ctx.default_continue.pop();
                Statement::For(s)
            }
            Statement::ForIn(mut s) => {
                let target = self.fresh_target();
                s.target = target;
                self.bind_pending(Some((target, true)));
                match s.left {
                    ForInLeft::Declaration(d) => {
                        s.left = ForInLeft::Declaration(self.check_var_declaration(d));
                    }
                    ForInLeft::Expression(e) => {
                        if !e.is_reference() {
                            // The whole loop is replaced; the error fires
                            // where the loop would have started.
                            return Self::reference_error_stmt(
                                "Left side of for-in is not a reference",
                            );
                        }
                        s.left = ForInLeft::Expression(self.check_expression(e));
                    }
                }
                s.right = self.check_expression(s.right);
                self.ctx.default_continue.push(target);
                self.ctx.default_break.push(target);
                s.body = Box::new(self.check_statement(*s.body));
                self.ctx.default_break.pop();
                self.ctx.default_continue.pop();
                Statement::ForIn(s)
            }
            Statement::Switch(mut s) => {
                let target = self.fresh_target();
                s.target = target;
                // A label on a switch is a break target but never a
                // continue target.
                self.bind_pending(Some((target, false)));
                s.discriminant = self.check_expression(s.discriminant);
                self.ctx.default_break.push(target);
                s.cases = s
                    .cases
                    .into_iter()
                    .map(|case| SwitchCase {
                        test: case.test.map(|e| self.check_expression(e)),
                        consequent: case
                            .consequent
                            .into_iter()
                            .map(|st| self.check_statement(st))
                            .collect(),
                    })
                    .collect();
                self.ctx.default_break.pop();
                Statement::Switch(s)
            }
            Statement::Break(mut s) => {
                self.bind_pending(None);
                match &s.label {
                    Some(name) => match self.ctx.bound.get_mut(name) {
                        Some(binding) => {
                            if binding.statement && binding.target == TargetId::UNBOUND {
                                binding.target = TargetId(self.next_target);
                                self.next_target += 1;
                            }
                            s.target = binding.target;
                            Statement::Break(s)
                        }
                        None => Self::syntax_error(format!("Label '{name}' is not defined")),
                    },
                    None => match self.ctx.default_break.last() {
                        Some(target) => {
                            s.target = *target;
                            Statement::Break(s)
                        }
                        None => Self::syntax_error("Break outside of a loop or switch"),
                    },
                }
            }
            Statement::Continue(mut s) => {
                self.bind_pending(None);
                match &s.label {
                    Some(name) => match self.ctx.bound.get(name) {
                        Some(binding) if binding.continuable => {
                            s.target = binding.target;
                            Statement::Continue(s)
                        }
                        Some(_) => Self::syntax_error(format!(
                            "Continue target '{name}' is not a loop"
                        )),
                        None => Self::syntax_error(format!("Label '{name}' is not defined")),
                    },
                    None => match self.ctx.default_continue.last() {
                        Some(target) => {
                            s.target = *target;
                            Statement::Continue(s)
                        }
                        None => Self::syntax_error("Continue outside of a loop"),
                    },
                }
            }
            Statement::Return(s) => {
                self.bind_pending(None);
                if !self.ctx.in_function {
                    return Self::syntax_error("Return outside of a function");
                }
                Statement::Return(ReturnStatement {
                    argument: s.argument.map(|e| self.check_expression(e)),
                })
            }
            Statement::Expression(s) => {
                self.bind_pending(None);
                Statement::Expression(ExpressionStatement {
                    expression: self.check_expression(s.expression),
                })
            }
            Statement::VariableDeclaration(d) => {
                self.bind_pending(None);
                Statement::VariableDeclaration(self.check_var_declaration(d))
            }
            Statement::FunctionDeclaration(f) => {
                self.bind_pending(None);
                Statement::FunctionDeclaration(FunctionDeclaration {
                    id: f.id,
                    params: f.params,
                    body: self.check_function_body(f.body),
                })
            }
            Statement::Block(b) => {
                self.bind_pending(None);
                Statement::Block(BlockStatement {
                    body: b.body.into_iter().map(|s| self.check_statement(s)).collect(),
                })
            }
            Statement::If(s) => {
                self.bind_pending(None);
                Statement::If(IfStatement {
                    test: self.check_expression(s.test),
                    consequent: Box::new(self.check_statement(*s.consequent)),
                    alternate: s.alternate.map(|a| Box::new(self.check_statement(*a))),
                })
            }
            Statement::With(s) => {
                self.bind_pending(None);
                Statement::With(WithStatement {
                    object: self.check_expression(s.object),
                    body: Box::new(self.check_statement(*s.body)),
                })
            }
            Statement::Throw(s) => {
                self.bind_pending(None);
                Statement::Throw(ThrowStatement {
                    argument: self.check_expression(s.argument),
                })
            }
            Statement::Try(s) => {
                self.bind_pending(None);
                Statement::Try(TryStatement {
                    block: BlockStatement {
                        body: s
                            .block
                            .body
                            .into_iter()
                            .map(|st| self.check_statement(st))
                            .collect(),
                    },
                    handler: s.handler.map(|h| CatchClause {
                        param: h.param,
                        body: BlockStatement {
                            body: h
                                .body
                                .body
                                .into_iter()
                                .map(|st| self.check_statement(st))
                                .collect(),
                        },
                    }),
                    finalizer: s.finalizer.map(|f| BlockStatement {
                        body: f
                            .body
                            .into_iter()
                            .map(|st| self.check_statement(st))
                            .collect(),
                    }),
                })
            }
            Statement::Empty => {
                self.bind_pending(None);
                Statement::Empty
            }
            Statement::Debugger => {
                self.bind_pending(None);
                Statement::Debugger
            }
            err @ Statement::Error(_) => {
                self.bind_pending(None);
                err
            }
            Statement::Labeled(_) => unreachable!("handled by check_statement"),
        }
    }

    fn check_var_declaration(&mut self, decl: VariableDeclaration) -> VariableDeclaration {
        VariableDeclaration {
            declarations: decl
                .declarations
                .into_iter()
                .map(|d| VariableDeclarator {
                    id: d.id,
                    init: d.init.map(|e| self.check_expression(e)),
                })
                .collect(),
        }
    }

    /// Checks one expression, substituting error nodes for invalid
    /// assignment and update targets.
    pub fn check_expression(&mut self, expr: Expression) -> Expression {
        match expr {
            Expression::Assignment(a) => {
                if !a.left.is_reference() {
                    return Self::reference_error_expr(
                        "Left side of assignment is not a reference",
                    );
                }
                Expression::Assignment(AssignmentExpression {
                    operator: a.operator,
                    left: Box::new(self.check_expression(*a.left)),
                    right: Box::new(self.check_expression(*a.right)),
                })
            }
            Expression::Update(u) => {
                if !u.argument.is_reference() {
                    return Self::reference_error_expr("Update target is not a reference");
                }
                Expression::Update(UpdateExpression {
                    operator: u.operator,
                    prefix: u.prefix,
                    argument: Box::new(self.check_expression(*u.argument)),
                })
            }
            Expression::Function(f) => Expression::Function(FunctionExpression {
                id: f.id,
                params: f.params,
                body: self.check_function_body(f.body),
            }),
            Expression::Member(m) => Expression::Member(MemberExpression {
                object: Box::new(self.check_expression(*m.object)),
                property: match m.property {
                    MemberProperty::Identifier(name) => MemberProperty::Identifier(name),
                    MemberProperty::Expression(e) => {
                        MemberProperty::Expression(Box::new(self.check_expression(*e)))
                    }
                },
            }),
            Expression::Call(c) => Expression::Call(CallExpression {
                callee: Box::new(self.check_expression(*c.callee)),
                arguments: c
                    .arguments
                    .into_iter()
                    .map(|e| self.check_expression(e))
                    .collect(),
            }),
            Expression::New(n) => Expression::New(NewExpression {
                callee: Box::new(self.check_expression(*n.callee)),
                arguments: n
                    .arguments
                    .into_iter()
                    .map(|e| self.check_expression(e))
                    .collect(),
            }),
            Expression::Unary(u) => Expression::Unary(UnaryExpression {
                operator: u.operator,
                argument: Box::new(self.check_expression(*u.argument)),
            }),
            Expression::Binary(b) => Expression::Binary(BinaryExpression {
                operator: b.operator,
                left: Box::new(self.check_expression(*b.left)),
                right: Box::new(self.check_expression(*b.right)),
            }),
            Expression::Logical(l) => Expression::Logical(LogicalExpression {
                operator: l.operator,
                left: Box::new(self.check_expression(*l.left)),
                right: Box::new(self.check_expression(*l.right)),
            }),
            Expression::Conditional(c) => Expression::Conditional(ConditionalExpression {
                test: Box::new(self.check_expression(*c.test)),
                consequent: Box::new(self.check_expression(*c.consequent)),
                alternate: Box::new(self.check_expression(*c.alternate)),
            }),
            Expression::Sequence(s) => Expression::Sequence(SequenceExpression {
                expressions: s
                    .expressions
                    .into_iter()
                    .map(|e| self.check_expression(e))
                    .collect(),
            }),
            Expression::Array(a) => Expression::Array(ArrayExpression {
                elements: a
                    .elements
                    .into_iter()
                    .map(|e| e.map(|e| self.check_expression(e)))
                    .collect(),
            }),
            Expression::Object(o) => Expression::Object(ObjectExpression {
                properties: o
                    .properties
                    .into_iter()
                    .map(|p| Property {
                        key: p.key,
                        value: self.check_expression(p.value),
                    })
                    .collect(),
            }),
            leaf @ (Expression::Literal(_)
            | Expression::Identifier(_)
            | Expression::This
            | Expression::Error(_)) => leaf,
        }
    }
}

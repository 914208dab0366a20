use std::rc::Rc;

use super::*;
use crate::compiler::bytecode::{Instruction, Operand};

fn num(n: f64) -> Expression {
    Expression::Literal(Literal::Number(n))
}

fn ident(name: &str) -> Expression {
    Expression::Identifier(Identifier::new(name))
}

fn expr_stmt(e: Expression) -> Statement {
    Statement::Expression(ExpressionStatement { expression: e })
}

fn call(callee: Expression, arguments: Vec<Expression>) -> Expression {
    Expression::Call(CallExpression {
        callee: Box::new(callee),
        arguments,
    })
}

fn assign(left: Expression, op: AssignmentOperator, right: Expression) -> Expression {
    Expression::Assignment(AssignmentExpression {
        operator: op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn var_decl(name: &str, init: Option<Expression>) -> Statement {
    Statement::VariableDeclaration(VariableDeclaration {
        declarations: vec![VariableDeclarator {
            id: Identifier::new(name),
            init,
        }],
    })
}

fn while_true(body: Vec<Statement>) -> Statement {
    Statement::While(WhileStatement {
        test: Expression::Literal(Literal::Boolean(true)),
        body: Box::new(Statement::Block(BlockStatement { body })),
        target: TargetId::UNBOUND,
    })
}

fn break_stmt() -> Statement {
    Statement::Break(BreakStatement {
        label: None,
        target: TargetId::UNBOUND,
    })
}

fn try_stmt(
    block: Vec<Statement>,
    handler: Option<(&str, Vec<Statement>)>,
    finalizer: Option<Vec<Statement>>,
) -> Statement {
    Statement::Try(TryStatement {
        block: BlockStatement { body: block },
        handler: handler.map(|(param, body)| CatchClause {
            param: Identifier::new(param),
            body: BlockStatement { body },
        }),
        finalizer: finalizer.map(|body| BlockStatement { body }),
    })
}

fn program(body: Vec<Statement>) -> CodeBlock {
    compile_program(Program { body }).unwrap()
}

fn function(params: &[&str], body: Vec<Statement>) -> CodeBlock {
    let template = compile_function(FunctionExpression {
        id: None,
        params: params.iter().map(|p| Identifier::new(*p)).collect(),
        body,
    })
    .unwrap();
    Rc::try_unwrap(template).unwrap().block
}

fn count(block: &CodeBlock, op: OpCode) -> usize {
    block.instructions.iter().filter(|i| i.op == op).count()
}

fn find(block: &CodeBlock, op: OpCode) -> Option<usize> {
    block.instructions.iter().position(|i| i.op == op)
}

#[test]
fn test_program_ends_with_end() {
    let block = program(vec![expr_stmt(num(1.0))]);
    assert_eq!(block.instructions.last().unwrap().op, OpCode::End);
    assert_eq!(block.unresolved_jumps(), 0);
}

#[test]
fn test_function_body_ends_with_implicit_return() {
    let block = function(&[], vec![]);
    assert_eq!(
        block.instructions.last().unwrap(),
        &Instruction {
            op: OpCode::Return,
            args: vec![Operand::Undefined],
        }
    );
}

#[test]
fn test_local_access_emits_no_lookup() {
    // var x; x = 1; return x;
    let block = function(
        &[],
        vec![
            var_decl("x", None),
            expr_stmt(assign(ident("x"), AssignmentOperator::Assign, num(1.0))),
            Statement::Return(ReturnStatement {
                argument: Some(ident("x")),
            }),
        ],
    );
    for op in [
        OpCode::GetGlobal,
        OpCode::PutGlobal,
        OpCode::ScopeLookup,
        OpCode::ScopeLookupAndGet,
        OpCode::OuterScopeLookup,
        OpCode::OuterScopeLookupAndGet,
    ] {
        assert_eq!(count(&block, op), 0, "{op:?} emitted for a local");
    }
    // One register for x, no temporaries needed.
    assert_eq!(block.register_count, 1);
    assert_eq!(
        block.instructions[0],
        Instruction {
            op: OpCode::Mov,
            args: vec![Operand::Reg(0), Operand::Number(1.0)],
        }
    );
}

#[test]
fn test_undeclared_in_function_is_outer_lookup() {
    let block = function(&[], vec![expr_stmt(ident("y"))]);
    assert_eq!(count(&block, OpCode::OuterScopeLookupAndGet), 1);
    assert_eq!(count(&block, OpCode::ScopeLookupAndGet), 0);
}

#[test]
fn test_global_code_uses_global_opcodes() {
    let block = program(vec![
        var_decl("x", Some(num(1.0))),
        expr_stmt(ident("x")),
    ]);
    assert_eq!(count(&block, OpCode::DeclareVar), 1);
    assert_eq!(count(&block, OpCode::PutGlobal), 1);
    assert_eq!(count(&block, OpCode::GetGlobal), 1);
    assert_eq!(count(&block, OpCode::Mov), 0);
}

#[test]
fn test_eval_code_is_fully_dynamic() {
    let block = compile_eval(Program {
        body: vec![expr_stmt(ident("x"))],
    })
    .unwrap();
    assert_eq!(count(&block, OpCode::ScopeLookupAndGet), 1);
    assert_eq!(count(&block, OpCode::GetGlobal), 0);
}

#[test]
fn test_arguments_is_dynamic_in_functions() {
    let block = function(&[], vec![expr_stmt(ident("arguments"))]);
    assert_eq!(count(&block, OpCode::ScopeLookupAndGet), 1);
}

#[test]
fn test_delete_local_is_static_false() {
    let block = function(
        &[],
        vec![
            var_decl("x", None),
            Statement::Return(ReturnStatement {
                argument: Some(Expression::Unary(UnaryExpression {
                    operator: UnaryOperator::Delete,
                    argument: Box::new(ident("x")),
                })),
            }),
        ],
    );
    for op in [
        OpCode::DeleteGlobal,
        OpCode::DeletePropById,
        OpCode::DeletePropByVal,
    ] {
        assert_eq!(count(&block, op), 0);
    }
    assert_eq!(
        block.instructions[0],
        Instruction {
            op: OpCode::Return,
            args: vec![Operand::Bool(false)],
        }
    );
}

#[test]
fn test_compound_assignment_evaluates_operands_once() {
    // o[f()] += 1; the index call runs exactly once.
    let block = program(vec![expr_stmt(assign(
        Expression::Member(MemberExpression {
            object: Box::new(ident("o")),
            property: MemberProperty::Expression(Box::new(call(ident("f"), vec![]))),
        }),
        AssignmentOperator::AddAssign,
        num(1.0),
    ))]);
    assert_eq!(count(&block, OpCode::Call), 1);
    assert_eq!(count(&block, OpCode::GetPropByVal), 1);
    assert_eq!(count(&block, OpCode::PutPropByVal), 1);
    // The get and the put address the same base and index registers.
    let get = &block.instructions[find(&block, OpCode::GetPropByVal).unwrap()];
    let put = &block.instructions[find(&block, OpCode::PutPropByVal).unwrap()];
    assert_eq!(get.args[1], put.args[0]);
    assert_eq!(get.args[2], put.args[1]);
}

#[test]
fn test_temporaries_reused_across_statements() {
    // Each statement releases its temporaries, so repeating a statement
    // never grows the register file.
    let once = program(vec![expr_stmt(call(ident("f"), vec![num(1.0)]))]);
    let thrice = program(vec![
        expr_stmt(call(ident("f"), vec![num(1.0)])),
        expr_stmt(call(ident("f"), vec![num(1.0)])),
        expr_stmt(call(ident("f"), vec![num(1.0)])),
    ]);
    assert_eq!(once.register_count, thrice.register_count);
}

#[test]
fn test_nested_calls_get_separate_argument_frames() {
    let block = program(vec![expr_stmt(call(
        ident("f"),
        vec![call(ident("g"), vec![])],
    ))]);
    assert_eq!(count(&block, OpCode::BeginArgs), 2);
    assert_eq!(count(&block, OpCode::Call), 2);
    // The inner call completes before the outer AddArg.
    let inner_call = find(&block, OpCode::Call).unwrap();
    let outer_add = block
        .instructions
        .iter()
        .rposition(|i| i.op == OpCode::AddArg)
        .unwrap();
    assert!(inner_call < outer_add);
}

#[test]
fn test_method_call_passes_base_as_this() {
    let block = program(vec![expr_stmt(call(
        Expression::Member(MemberExpression {
            object: Box::new(ident("o")),
            property: MemberProperty::Identifier("m".into()),
        }),
        vec![],
    ))]);
    let get = &block.instructions[find(&block, OpCode::GetPropById).unwrap()];
    let call_insn = &block.instructions[find(&block, OpCode::Call).unwrap()];
    // Call dst, func, this; this is the base of the property read.
    assert_eq!(call_insn.args[2], get.args[1]);
}

#[test]
fn test_while_break_jumps_to_end() {
    let block = function(&[], vec![while_true(vec![break_stmt()])]);
    // 0: JumpIfFalse true, end; 1: Jump end (break); 2: Jump 0; 3: Return
    assert_eq!(count(&block, OpCode::UnwindScopes), 0);
    assert_eq!(block.unresolved_jumps(), 0);
    assert_eq!(
        block.instructions[1],
        Instruction {
            op: OpCode::Jump,
            args: vec![Operand::Addr(Addr(3))],
        }
    );
    assert_eq!(
        block.instructions[2],
        Instruction {
            op: OpCode::Jump,
            args: vec![Operand::Addr(Addr(0))],
        }
    );
}

#[test]
fn test_for_continue_targets_update_expression() {
    // for (;;) { continue; f(); }
    let block = function(
        &[],
        vec![Statement::For(ForStatement {
            init: None,
            test: None,
            update: Some(call(ident("f"), vec![])),
            body: Box::new(Statement::Block(BlockStatement {
                body: vec![Statement::Continue(ContinueStatement {
                    label: None,
                    target: TargetId::UNBOUND,
                })],
            })),
            target: TargetId::UNBOUND,
        })],
    );
    assert_eq!(block.unresolved_jumps(), 0);
    assert_eq!(count(&block, OpCode::UnwindScopes), 0);
    // The continue jump lands on the update expression's first instruction.
    let update_start = find(&block, OpCode::OuterScopeLookupAndGet).unwrap();
    assert_eq!(
        block.instructions[0],
        Instruction {
            op: OpCode::Jump,
            args: vec![Operand::Addr(Addr(update_start as u32))],
        }
    );
}

#[test]
fn test_do_while_continue_targets_condition() {
    let block = function(
        &[],
        vec![Statement::DoWhile(DoWhileStatement {
            body: Box::new(Statement::Continue(ContinueStatement {
                label: None,
                target: TargetId::UNBOUND,
            })),
            test: ident("more"),
            target: TargetId::UNBOUND,
        })],
    );
    assert_eq!(block.unresolved_jumps(), 0);
    let condition_start = find(&block, OpCode::OuterScopeLookupAndGet).unwrap();
    assert_eq!(
        block.instructions[0].args[0],
        Operand::Addr(Addr(condition_start as u32))
    );
}

#[test]
fn test_switch_dispatch_shape() {
    let cases = vec![
        SwitchCase {
            test: Some(num(1.0)),
            consequent: vec![],
        },
        SwitchCase {
            test: Some(num(2.0)),
            consequent: vec![],
        },
        SwitchCase {
            test: None,
            consequent: vec![],
        },
    ];
    let block = program(vec![Statement::Switch(SwitchStatement {
        discriminant: ident("x"),
        cases,
        target: TargetId::UNBOUND,
    })]);
    assert_eq!(count(&block, OpCode::StrictEq), 2);
    assert_eq!(count(&block, OpCode::JumpIfTrue), 2);
    assert_eq!(count(&block, OpCode::Jump), 1);
    assert_eq!(block.unresolved_jumps(), 0);
}

#[test]
fn test_switch_comparisons_share_discriminant_register() {
    let block = program(vec![Statement::Switch(SwitchStatement {
        discriminant: ident("x"),
        cases: vec![
            SwitchCase {
                test: Some(num(1.0)),
                consequent: vec![],
            },
            SwitchCase {
                test: Some(num(2.0)),
                consequent: vec![],
            },
        ],
        target: TargetId::UNBOUND,
    })]);
    let comparisons: Vec<_> = block
        .instructions
        .iter()
        .filter(|i| i.op == OpCode::StrictEq)
        .collect();
    assert_eq!(comparisons[0].args[1], comparisons[1].args[1]);
}

#[test]
fn test_try_finally_return_defers_completion() {
    let block = function(
        &[],
        vec![try_stmt(
            vec![Statement::Return(ReturnStatement {
                argument: Some(num(1.0)),
            })],
            None,
            Some(vec![]),
        )],
    );
    assert_eq!(count(&block, OpCode::ReturnInTryFinally), 1);
    assert_eq!(count(&block, OpCode::DeferCompletion), 1);
    assert_eq!(count(&block, OpCode::ReactivateCompletion), 1);
    assert!(
        find(&block, OpCode::ReturnInTryFinally).unwrap()
            < find(&block, OpCode::DeferCompletion).unwrap()
    );
    // Only the implicit completion uses the plain return.
    assert_eq!(count(&block, OpCode::Return), 1);
}

#[test]
fn test_return_outside_try_finally_is_plain() {
    let block = function(
        &[],
        vec![Statement::Return(ReturnStatement {
            argument: Some(num(1.0)),
        })],
    );
    assert_eq!(count(&block, OpCode::ReturnInTryFinally), 0);
    assert_eq!(count(&block, OpCode::Return), 2);
}

#[test]
fn test_break_through_nested_finally_is_single_instruction() {
    // while (true) { try { try { break; } finally {} } finally {} }
    let block = function(
        &[],
        vec![while_true(vec![try_stmt(
            vec![try_stmt(vec![break_stmt()], None, Some(vec![]))],
            None,
            Some(vec![]),
        )])],
    );
    assert_eq!(count(&block, OpCode::ContBreakInTryFinally), 1);
    assert_eq!(count(&block, OpCode::UnwindScopes), 0);
    assert_eq!(block.unresolved_jumps(), 0);
}

#[test]
fn test_labeled_continue_through_finally_resumes_at_update() {
    // a: for (;; f()) { try { continue a; } finally {} }
    let block = function(
        &[],
        vec![Statement::Labeled(LabeledStatement {
            label: "a".into(),
            body: Box::new(Statement::For(ForStatement {
                init: None,
                test: None,
                update: Some(call(ident("f"), vec![])),
                body: Box::new(try_stmt(
                    vec![Statement::Continue(ContinueStatement {
                        label: Some("a".into()),
                        target: TargetId::UNBOUND,
                    })],
                    None,
                    Some(vec![]),
                )),
                target: TargetId::UNBOUND,
            })),
            target: TargetId::UNBOUND,
        })],
    );
    assert_eq!(block.unresolved_jumps(), 0);
    let transfer = find(&block, OpCode::ContBreakInTryFinally).unwrap();
    let update_start = find(&block, OpCode::OuterScopeLookupAndGet).unwrap();
    assert_eq!(
        block.instructions[transfer].args[0],
        Operand::Addr(Addr(update_start as u32))
    );
    // The transfer still runs the finally block at run time; the handler
    // is installed around it.
    assert!(find(&block, OpCode::PushHandler).unwrap() < transfer);
}

#[test]
fn test_break_out_of_catch_unwinds_scope() {
    // while (true) { try { f(); } catch (e) { break; } }
    let block = function(
        &[],
        vec![while_true(vec![try_stmt(
            vec![expr_stmt(call(ident("f"), vec![]))],
            Some(("e", vec![break_stmt()])),
            None,
        )])],
    );
    let unwind = find(&block, OpCode::UnwindScopes).unwrap();
    assert_eq!(block.instructions[unwind].args[0], Operand::Int32(1));
    assert_eq!(count(&block, OpCode::ContBreakInTryFinally), 0);
    assert_eq!(block.unresolved_jumps(), 0);
}

#[test]
fn test_break_in_try_with_catch_unwinds_handler() {
    // The active handler region must be popped before a direct break.
    // while (true) { try { break; } catch (e) {} }
    let block = function(
        &[],
        vec![while_true(vec![try_stmt(
            vec![break_stmt()],
            Some(("e", vec![])),
            None,
        )])],
    );
    let unwind = find(&block, OpCode::UnwindScopes).unwrap();
    assert_eq!(block.instructions[unwind].args[0], Operand::Int32(1));
}

#[test]
fn test_try_catch_layout() {
    let block = function(
        &[],
        vec![try_stmt(
            vec![expr_stmt(call(ident("f"), vec![]))],
            Some(("e", vec![expr_stmt(ident("e"))])),
            None,
        )],
    );
    assert_eq!(count(&block, OpCode::PushHandler), 1);
    assert_eq!(count(&block, OpCode::PopHandler), 1);
    let enter = find(&block, OpCode::EnterCatch).unwrap();
    let exit = find(&block, OpCode::ExitCatch).unwrap();
    assert!(enter < exit);
    // The handler target is the EnterCatch instruction.
    let push = &block.instructions[find(&block, OpCode::PushHandler).unwrap()];
    assert_eq!(push.args[0], Operand::Addr(Addr(enter as u32)));
    // The catch binding makes the body dynamically scoped.
    assert_eq!(count(&block, OpCode::ScopeLookupAndGet), 1);
    assert_eq!(block.unresolved_jumps(), 0);
}

#[test]
fn test_with_body_is_dynamically_scoped() {
    let block = function(
        &[],
        vec![
            var_decl("x", None),
            Statement::With(WithStatement {
                object: ident("o"),
                body: Box::new(Statement::Block(BlockStatement {
                    body: vec![expr_stmt(ident("x"))],
                })),
            }),
        ],
    );
    assert_eq!(count(&block, OpCode::EnterWith), 1);
    assert_eq!(count(&block, OpCode::ExitWith), 1);
    // Even the declared local must go through the scope chain inside.
    assert_eq!(count(&block, OpCode::ScopeLookupAndGet), 1);
}

#[test]
fn test_for_in_shape() {
    let block = function(
        &[],
        vec![Statement::ForIn(ForInStatement {
            left: ForInLeft::Declaration(VariableDeclaration {
                declarations: vec![VariableDeclarator {
                    id: Identifier::new("k"),
                    init: None,
                }],
            }),
            right: ident("o"),
            body: Box::new(Statement::Empty),
            target: TargetId::UNBOUND,
        })],
    );
    assert_eq!(count(&block, OpCode::ForInBegin), 1);
    assert_eq!(count(&block, OpCode::ForInNext), 1);
    assert_eq!(block.unresolved_jumps(), 0);
    // The loop variable is a local; the enumerated name moves into it.
    let next = find(&block, OpCode::ForInNext).unwrap();
    assert_eq!(block.instructions[next + 1].op, OpCode::Mov);
}

#[test]
fn test_for_in_with_no_declarator_is_an_error() {
    let result = compile_program(Program {
        body: vec![Statement::ForIn(ForInStatement {
            left: ForInLeft::Declaration(VariableDeclaration {
                declarations: vec![],
            }),
            right: ident("o"),
            body: Box::new(Statement::Empty),
            target: TargetId::UNBOUND,
        })],
    });
    assert!(matches!(result, Err(crate::Error::InternalError(_))));
}

#[test]
fn test_labeled_block_break() {
    let block = function(
        &[],
        vec![Statement::Labeled(LabeledStatement {
            label: "done".into(),
            body: Box::new(Statement::Block(BlockStatement {
                body: vec![
                    Statement::Break(BreakStatement {
                        label: Some("done".into()),
                        target: TargetId::UNBOUND,
                    }),
                    expr_stmt(call(ident("f"), vec![])),
                ],
            })),
            target: TargetId::UNBOUND,
        })],
    );
    assert_eq!(block.unresolved_jumps(), 0);
    // The break jumps past the rest of the labeled body.
    let Instruction { op, args } = &block.instructions[0];
    assert_eq!(*op, OpCode::Jump);
    let Operand::Addr(target) = &args[0] else { panic!() };
    assert!(target.0 as usize > find(&block, OpCode::Call).unwrap());
}

#[test]
fn test_invalid_assignment_compiles_to_reference_error() {
    let block = program(vec![
        expr_stmt(assign(num(1.0), AssignmentOperator::Assign, num(2.0))),
        expr_stmt(call(ident("f"), vec![])),
    ]);
    assert_eq!(count(&block, OpCode::RaiseReferenceError), 1);
    // Sibling code still compiles.
    assert_eq!(count(&block, OpCode::Call), 1);
}

#[test]
fn test_duplicate_label_compiles_to_syntax_error() {
    let inner = Statement::Labeled(LabeledStatement {
        label: "a".into(),
        body: Box::new(expr_stmt(call(ident("x"), vec![]))),
        target: TargetId::UNBOUND,
    });
    let block = program(vec![Statement::Labeled(LabeledStatement {
        label: "a".into(),
        body: Box::new(inner),
        target: TargetId::UNBOUND,
    })]);
    assert_eq!(count(&block, OpCode::RaiseSyntaxError), 1);
    assert_eq!(count(&block, OpCode::Call), 0);
}

#[test]
fn test_logical_and_short_circuits() {
    let block = program(vec![expr_stmt(Expression::Logical(LogicalExpression {
        operator: LogicalOperator::And,
        left: Box::new(ident("a")),
        right: Box::new(call(ident("f"), vec![])),
    }))]);
    let skip = find(&block, OpCode::JumpIfFalse).unwrap();
    let Operand::Addr(target) = &block.instructions[skip].args[1] else {
        panic!()
    };
    assert!((target.0 as usize) > find(&block, OpCode::Call).unwrap());
}

#[test]
fn test_numeric_object_keys_spell_like_runtime_strings() {
    fn key_for(n: f64) -> String {
        let block = program(vec![expr_stmt(Expression::Object(ObjectExpression {
            properties: vec![Property {
                key: PropertyKey::Number(n),
                value: num(0.0),
            }],
        }))]);
        let put = &block.instructions[find(&block, OpCode::PutPropById).unwrap()];
        let Operand::Ident(key) = &put.args[1] else { panic!() };
        key.to_string()
    }
    assert_eq!(key_for(3.0), "3");
    assert_eq!(key_for(1.5), "1.5");
    // Integral keys past 2^63 still print in full decimal.
    assert_eq!(key_for(1e19), "10000000000000000000");
    assert_eq!(key_for(1e20), "100000000000000000000");
    // The exponent threshold carries an explicit sign.
    assert_eq!(key_for(1e21), "1e+21");
    assert_eq!(key_for(1.5e22), "1.5e+22");
}

#[test]
fn test_negated_literal_is_an_immediate() {
    let block = program(vec![var_decl(
        "x",
        Some(Expression::Unary(UnaryExpression {
            operator: UnaryOperator::Minus,
            argument: Box::new(num(3.0)),
        })),
    )]);
    assert_eq!(count(&block, OpCode::Neg), 0);
    let put = &block.instructions[find(&block, OpCode::PutGlobal).unwrap()];
    assert_eq!(put.args[1], Operand::Number(-3.0));
}

#[test]
fn test_function_declarations_are_hoisted() {
    // f is callable before its declaration.
    let block = program(vec![
        expr_stmt(call(ident("f"), vec![])),
        Statement::FunctionDeclaration(FunctionDeclaration {
            id: Identifier::new("f"),
            params: vec![],
            body: vec![],
        }),
    ]);
    assert!(
        find(&block, OpCode::NewFunction).unwrap() < find(&block, OpCode::Call).unwrap()
    );
    assert_eq!(count(&block, OpCode::DeclareVar), 1);
}

#[test]
fn test_function_params_occupy_lowest_registers() {
    let template = compile_function(FunctionExpression {
        id: Some(Identifier::new("add")),
        params: vec![Identifier::new("a"), Identifier::new("b")],
        body: vec![Statement::Return(ReturnStatement {
            argument: Some(Expression::Binary(BinaryExpression {
                operator: BinaryOperator::Add,
                left: Box::new(ident("a")),
                right: Box::new(ident("b")),
            })),
        })],
    })
    .unwrap();
    assert_eq!(template.name.as_deref(), Some("add"));
    assert_eq!(template.params.len(), 2);
    let add = &template.block.instructions[0];
    assert_eq!(add.op, OpCode::Add);
    assert_eq!(add.args[1], Operand::Reg(0));
    assert_eq!(add.args[2], Operand::Reg(1));
}

#[test]
fn test_markable_registers_are_tracked() {
    // One plain temp (comparison) and markable locals.
    let block = function(
        &[],
        vec![
            var_decl("x", None),
            expr_stmt(Expression::Binary(BinaryExpression {
                operator: BinaryOperator::LessThan,
                left: Box::new(ident("x")),
                right: Box::new(num(10.0)),
            })),
        ],
    );
    assert_eq!(block.markable.len(), block.register_count);
    assert!(block.markable[0]);
    assert!(!block.markable[1]);
}

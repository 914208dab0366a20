//! Abstract Syntax Tree (AST) definitions for JavaScript.
//!
//! These structures are designed to be ESTree-compatible where possible and
//! cover the ES3 statement and expression surface. The compiler consumes
//! this tree; producing it (lexing and parsing) is an external concern.
//!
//! Loops, switches and labeled statements carry a [`TargetId`] slot that the
//! semantic checker fills in when it resolves break/continue bindings. A
//! freshly parsed tree uses [`TargetId::UNBOUND`] everywhere.

/// A complete JavaScript program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// The statements in the program
    pub body: Vec<Statement>,
}

/// An identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    /// The name of the identifier
    pub name: String,
}

impl Identifier {
    /// Creates an identifier from anything string-like.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Identity of a break/continue target, assigned by the semantic checker.
///
/// Every iteration statement and switch receives a fresh id; a labeled
/// statement receives one only when the label itself is the jump target
/// (`label: { break label; }`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u32);

impl TargetId {
    /// The id carried by nodes the semantic checker has not visited.
    pub const UNBOUND: TargetId = TargetId(0);
}

/// Classification of a statically detected source error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticErrorKind {
    /// Raises a `SyntaxError` when execution reaches the node
    Syntax,
    /// Raises a `ReferenceError` when execution reaches the node
    Reference,
}

/// A statically invalid construct, substituted by the semantic checker.
///
/// The error is reported at the point it would execute; compilation of
/// sibling code proceeds unaffected.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticError {
    /// Which error constructor the emitted code raises
    pub kind: StaticErrorKind,
    /// The message passed to the error constructor
    pub message: String,
}

/// A JavaScript statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Expression statement
    Expression(ExpressionStatement),
    /// Variable declaration (`var`)
    VariableDeclaration(VariableDeclaration),
    /// Function declaration
    FunctionDeclaration(FunctionDeclaration),
    /// Block statement `{ ... }`
    Block(BlockStatement),
    /// Empty statement (`;`)
    Empty,
    /// If statement
    If(IfStatement),
    /// While statement
    While(WhileStatement),
    /// Do-while statement
    DoWhile(DoWhileStatement),
    /// For statement
    For(ForStatement),
    /// For-in statement
    ForIn(ForInStatement),
    /// Continue statement
    Continue(ContinueStatement),
    /// Break statement
    Break(BreakStatement),
    /// Return statement
    Return(ReturnStatement),
    /// With statement
    With(WithStatement),
    /// Switch statement
    Switch(SwitchStatement),
    /// Labeled statement
    Labeled(LabeledStatement),
    /// Throw statement
    Throw(ThrowStatement),
    /// Try statement
    Try(TryStatement),
    /// Debugger statement
    Debugger,
    /// A statically invalid construct replaced by the semantic checker
    Error(StaticError),
}

/// An expression statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionStatement {
    /// The expression
    pub expression: Expression,
}

/// A variable declaration statement.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    /// The declarators
    pub declarations: Vec<VariableDeclarator>,
}

/// A single variable declarator.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclarator {
    /// The identifier being declared
    pub id: Identifier,
    /// Optional initializer expression
    pub init: Option<Expression>,
}

/// A function declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    /// The function name
    pub id: Identifier,
    /// The parameters
    pub params: Vec<Identifier>,
    /// The function body
    pub body: Vec<Statement>,
}

/// A block statement.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    /// The statements in the block
    pub body: Vec<Statement>,
}

/// An if statement.
#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    /// The condition
    pub test: Expression,
    /// The then branch
    pub consequent: Box<Statement>,
    /// The optional else branch
    pub alternate: Option<Box<Statement>>,
}

/// A while statement.
#[derive(Debug, Clone, PartialEq)]
pub struct WhileStatement {
    /// The loop condition
    pub test: Expression,
    /// The loop body
    pub body: Box<Statement>,
    /// Break/continue target, assigned by the semantic checker
    pub target: TargetId,
}

/// A do-while statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DoWhileStatement {
    /// The loop body
    pub body: Box<Statement>,
    /// The loop condition
    pub test: Expression,
    /// Break/continue target, assigned by the semantic checker
    pub target: TargetId,
}

/// The init part of a for statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    /// `for (var x = ...; ...)`
    Declaration(VariableDeclaration),
    /// `for (expr; ...)`
    Expression(Expression),
}

/// A for statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ForStatement {
    /// The optional initializer
    pub init: Option<ForInit>,
    /// The optional loop condition
    pub test: Option<Expression>,
    /// The optional update expression
    pub update: Option<Expression>,
    /// The loop body
    pub body: Box<Statement>,
    /// Break/continue target, assigned by the semantic checker
    pub target: TargetId,
}

/// The left-hand side of a for-in statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ForInLeft {
    /// `for (var x in ...)`
    Declaration(VariableDeclaration),
    /// `for (lvalue in ...)`
    Expression(Expression),
}

/// A for-in statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ForInStatement {
    /// Receives each enumerated property name
    pub left: ForInLeft,
    /// The object being enumerated
    pub right: Expression,
    /// The loop body
    pub body: Box<Statement>,
    /// Break/continue target, assigned by the semantic checker
    pub target: TargetId,
}

/// A continue statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinueStatement {
    /// Optional label
    pub label: Option<String>,
    /// Resolved jump target, assigned by the semantic checker
    pub target: TargetId,
}

/// A break statement.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakStatement {
    /// Optional label
    pub label: Option<String>,
    /// Resolved jump target, assigned by the semantic checker
    pub target: TargetId,
}

/// A return statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStatement {
    /// The optional return value
    pub argument: Option<Expression>,
}

/// A with statement.
#[derive(Debug, Clone, PartialEq)]
pub struct WithStatement {
    /// The object pushed onto the scope chain
    pub object: Expression,
    /// The body executed with the extended scope chain
    pub body: Box<Statement>,
}

/// A switch statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchStatement {
    /// The value being switched on
    pub discriminant: Expression,
    /// The case clauses, in source order
    pub cases: Vec<SwitchCase>,
    /// Break target, assigned by the semantic checker
    pub target: TargetId,
}

/// A single case (or default) clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// The case label expression; `None` for the default clause
    pub test: Option<Expression>,
    /// The clause body
    pub consequent: Vec<Statement>,
}

/// A labeled statement.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledStatement {
    /// The label name
    pub label: String,
    /// The labeled statement
    pub body: Box<Statement>,
    /// Jump target when the label itself is the break target;
    /// [`TargetId::UNBOUND`] when the label binds to an inner loop or switch
    pub target: TargetId,
}

/// A throw statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrowStatement {
    /// The thrown value
    pub argument: Expression,
}

/// A try statement.
#[derive(Debug, Clone, PartialEq)]
pub struct TryStatement {
    /// The try block
    pub block: BlockStatement,
    /// The optional catch clause
    pub handler: Option<CatchClause>,
    /// The optional finally block
    pub finalizer: Option<BlockStatement>,
}

/// A catch clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// The identifier the exception is bound to
    pub param: Identifier,
    /// The handler body
    pub body: BlockStatement,
}

/// A JavaScript expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Literal value
    Literal(Literal),
    /// Identifier reference
    Identifier(Identifier),
    /// `this`
    This,
    /// Array literal
    Array(ArrayExpression),
    /// Object literal
    Object(ObjectExpression),
    /// Function expression
    Function(FunctionExpression),
    /// Member access (dot or bracket)
    Member(MemberExpression),
    /// Function call
    Call(CallExpression),
    /// `new` expression
    New(NewExpression),
    /// Unary operator application
    Unary(UnaryExpression),
    /// `++`/`--` in prefix or postfix position
    Update(UpdateExpression),
    /// Binary operator application
    Binary(BinaryExpression),
    /// Short-circuiting `&&`/`||`
    Logical(LogicalExpression),
    /// Assignment, simple or compound
    Assignment(AssignmentExpression),
    /// Conditional (ternary) expression
    Conditional(ConditionalExpression),
    /// Comma-sequence expression
    Sequence(SequenceExpression),
    /// A statically invalid construct replaced by the semantic checker
    Error(StaticError),
}

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Number literal
    Number(f64),
    /// String literal
    String(String),
    /// Boolean literal
    Boolean(bool),
    /// `null`
    Null,
    /// `undefined`
    Undefined,
}

/// An array literal. `None` elements are elisions (`[1, , 3]`).
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayExpression {
    /// The elements, holes represented as `None`
    pub elements: Vec<Option<Expression>>,
}

/// An object literal.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectExpression {
    /// The properties, in source order
    pub properties: Vec<Property>,
}

/// One property of an object literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// The property key
    pub key: PropertyKey,
    /// The property value
    pub value: Expression,
}

/// An object-literal property key.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKey {
    /// Bare identifier key
    Identifier(String),
    /// String literal key
    String(String),
    /// Numeric literal key
    Number(f64),
}

/// A function expression.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpression {
    /// The optional function name
    pub id: Option<Identifier>,
    /// The parameters
    pub params: Vec<Identifier>,
    /// The function body
    pub body: Vec<Statement>,
}

/// A member access expression.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberExpression {
    /// The base object
    pub object: Box<Expression>,
    /// The accessed property
    pub property: MemberProperty,
}

/// The property part of a member access.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberProperty {
    /// Dot access: `obj.name`
    Identifier(String),
    /// Bracket access: `obj[expr]`
    Expression(Box<Expression>),
}

/// A call expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpression {
    /// The called expression
    pub callee: Box<Expression>,
    /// The arguments
    pub arguments: Vec<Expression>,
}

/// A `new` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpression {
    /// The constructor expression
    pub callee: Box<Expression>,
    /// The constructor arguments
    pub arguments: Vec<Expression>,
}

/// A unary expression.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpression {
    /// The operator
    pub operator: UnaryOperator,
    /// The operand
    pub argument: Box<Expression>,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// Unary `-`
    Minus,
    /// Unary `+`
    Plus,
    /// `!`
    LogicalNot,
    /// `~`
    BitwiseNot,
    /// `typeof`
    Typeof,
    /// `void`
    Void,
    /// `delete`
    Delete,
}

/// An update (`++`/`--`) expression.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpression {
    /// The operator
    pub operator: UpdateOperator,
    /// Whether the operator appears before the operand
    pub prefix: bool,
    /// The updated lvalue
    pub argument: Box<Expression>,
}

/// Update operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperator {
    /// `++`
    Increment,
    /// `--`
    Decrement,
}

/// A binary expression.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpression {
    /// The operator
    pub operator: BinaryOperator,
    /// The left operand
    pub left: Box<Expression>,
    /// The right operand
    pub right: Box<Expression>,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `===`
    StrictEqual,
    /// `!==`
    StrictNotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanEqual,
    /// `&`
    BitwiseAnd,
    /// `|`
    BitwiseOr,
    /// `^`
    BitwiseXor,
    /// `<<`
    LeftShift,
    /// `>>`
    RightShift,
    /// `>>>`
    UnsignedRightShift,
    /// `instanceof`
    InstanceOf,
    /// `in`
    In,
}

/// A logical (short-circuit) expression.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalExpression {
    /// The operator
    pub operator: LogicalOperator,
    /// The left operand
    pub left: Box<Expression>,
    /// The right operand
    pub right: Box<Expression>,
}

/// Logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    /// `&&`
    And,
    /// `||`
    Or,
}

/// An assignment expression.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentExpression {
    /// The operator
    pub operator: AssignmentOperator,
    /// The assignment target
    pub left: Box<Expression>,
    /// The assigned value
    pub right: Box<Expression>,
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOperator {
    /// `=`
    Assign,
    /// `+=`
    AddAssign,
    /// `-=`
    SubAssign,
    /// `*=`
    MulAssign,
    /// `/=`
    DivAssign,
    /// `%=`
    ModAssign,
    /// `<<=`
    ShlAssign,
    /// `>>=`
    ShrAssign,
    /// `>>>=`
    UshrAssign,
    /// `&=`
    BitAndAssign,
    /// `|=`
    BitOrAssign,
    /// `^=`
    BitXorAssign,
}

/// A conditional (ternary) expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalExpression {
    /// The condition
    pub test: Box<Expression>,
    /// Evaluated when the condition is truthy
    pub consequent: Box<Expression>,
    /// Evaluated when the condition is falsy
    pub alternate: Box<Expression>,
}

/// A comma-sequence expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceExpression {
    /// The expressions; the last one provides the result
    pub expressions: Vec<Expression>,
}

impl Expression {
    /// Whether this expression is a valid assignment target.
    pub fn is_reference(&self) -> bool {
        matches!(self, Expression::Identifier(_) | Expression::Member(_))
    }
}

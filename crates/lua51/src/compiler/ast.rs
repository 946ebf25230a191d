//! The surface AST. Parsing and codegen are split into two passes in this
//! crate (parse source -> this tree -> `Proto`) rather than the reference
//! implementation's single interleaved pass, trading a little memory for an
//! implementation that's far easier to get right without a compiler to
//! check it against. See DESIGN.md.

use smol_str::SmolStr;

#[derive(Debug, Clone)]
pub struct Block {
    pub stats: Vec<Stat>,
}

#[derive(Debug, Clone)]
pub struct Stat {
    pub kind: StatKind,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub enum StatKind {
    Expr(Expr),
    Local {
        names: Vec<SmolStr>,
        exprs: Vec<Expr>,
    },
    Assign {
        targets: Vec<Expr>,
        exprs: Vec<Expr>,
    },
    Do(Block),
    While {
        cond: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Expr,
    },
    If {
        arms: Vec<(Expr, Block)>,
        else_block: Option<Block>,
    },
    NumericFor {
        var: SmolStr,
        start: Expr,
        stop: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        names: Vec<SmolStr>,
        exprs: Vec<Expr>,
        body: Block,
    },
    FunctionDecl {
        /// Dotted/colon path, e.g. `a.b.c` or `a.b:c`; the last segment is
        /// defined with an implicit `self` parameter when `is_method`.
        path: Vec<SmolStr>,
        is_method: bool,
        body: FuncBody,
    },
    LocalFunction {
        name: SmolStr,
        body: FuncBody,
    },
    Return(Vec<Expr>),
    Break,
}

#[derive(Debug, Clone)]
pub struct FuncBody {
    pub params: Vec<SmolStr>,
    pub is_vararg: bool,
    pub block: Block,
    pub line: u32,
    pub name: Option<SmolStr>,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Nil,
    True,
    False,
    Number(f64),
    Str(Vec<u8>),
    Vararg,
    Name(SmolStr),
    Index(Box<Expr>, Box<Expr>),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        method: Option<SmolStr>,
        line: u32,
    },
    Function(Box<FuncBody>),
    Table(Vec<TableField>),
    Binop(BinOp, Box<Expr>, Box<Expr>, u32),
    Unop(UnOp, Box<Expr>, u32),
    /// `(expr)`: truncates a multi-value result to exactly one value.
    Paren(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum TableField {
    Positional(Expr),
    Named(SmolStr, Expr),
    Indexed(Expr, Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add, Sub, Mul, Div, Mod, Pow, Concat,
    Eq, Ne, Lt, Le, Gt, Ge,
    And, Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg, Not, Len,
}

//! Abstract syntax tree for Oaf
//!
//! A compilation unit owns an ordered sequence of statements. Every node
//! carries its starting source position. Expressions additionally carry a
//! parser-assigned id; the type checker publishes inferred types in a side
//! table keyed by those ids, so the tree itself stays immutable after
//! parsing.

use std::fmt;

/// Source span for a single token or node start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    /// Length of the span in characters, at least 1 for diagnostics.
    pub length: usize,
}

impl Span {
    pub fn new(line: usize, column: usize, length: usize) -> Self {
        Span {
            line,
            column,
            length,
        }
    }
}

/// Id of an expression node, unique within one compilation unit.
pub type NodeId = usize;

/// A syntactic type reference: `Name` or `Name<arg, …>`. Bound to a type
/// symbol lazily, by the type checker.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub name: String,
    pub args: Vec<TypeRef>,
    pub span: Span,
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            write!(f, "<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `!`
    Not,
    /// `~`
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    /// `!|`, reserved.
    Nor,
    /// `!&`, reserved.
    Nand,
    /// `^&`, reserved.
    Xand,
    Shl,
    Shr,
    /// `<<<`
    ShlU,
    /// `>>>`
    ShrU,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    /// Reserved operators parse but never type-check.
    pub fn is_reserved(self) -> bool {
        matches!(self, BinaryOp::Nor | BinaryOp::Nand | BinaryOp::Xand)
    }

    pub fn spelling(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Nor => "!|",
            BinaryOp::Nand => "!&",
            BinaryOp::Xand => "^&",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::ShlU => "<<<",
            BinaryOp::ShrU => ">>>",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntLiteral(i64),
    FloatLiteral(f64),
    BoolLiteral(bool),
    StringLiteral(String),
    CharLiteral(char),
    /// Identifier reference.
    Name(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Explicit cast `(T)expr`.
    Cast {
        target: TypeRef,
        operand: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        field: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
}

impl AssignOp {
    pub fn spelling(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::AddAssign => "+=",
            AssignOp::SubAssign => "-=",
            AssignOp::MulAssign => "*=",
            AssignOp::DivAssign => "/=",
        }
    }

    /// The arithmetic carried by a compound assignment, if any.
    pub fn binary_op(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::AddAssign => Some(BinaryOp::Add),
            AssignOp::SubAssign => Some(BinaryOp::Sub),
            AssignOp::MulAssign => Some(BinaryOp::Mul),
            AssignOp::DivAssign => Some(BinaryOp::Div),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDeclKind {
    Struct,
    Class,
    Enum,
}

impl fmt::Display for TypeDeclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDeclKind::Struct => write!(f, "struct"),
            TypeDeclKind::Class => write!(f, "class"),
            TypeDeclKind::Enum => write!(f, "enum"),
        }
    }
}

/// Field of a struct/class declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeRef,
    pub span: Span,
}

/// Variant of an enum declaration, with an optional payload type.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantDecl {
    pub name: String,
    pub payload: Option<TypeRef>,
    pub span: Span,
}

/// A `struct` / `class` / `enum` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub kind: TypeDeclKind,
    pub name: String,
    pub type_params: Vec<String>,
    pub fields: Vec<FieldDecl>,
    pub variants: Vec<VariantDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `flux? Type? name = initializer ;` — a declaration statement is only
    /// parsed when `flux` or a declared type is present; a bare
    /// `name = expr` parses as `Assignment` and may still introduce a
    /// binding during type checking.
    Declaration {
        is_mutable: bool,
        declared_type: Option<TypeRef>,
        name: String,
        initializer: Expr,
    },
    Assignment {
        name: String,
        op: AssignOp,
        value: Expr,
    },
    If {
        condition: Expr,
        body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    Loop {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return {
        value: Option<Expr>,
    },
    Expression(Expr),
    TypeDecl(TypeDecl),
}

/// The root of a parse: an ordered sequence of statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilationUnit {
    pub statements: Vec<Stmt>,
}

impl CompilationUnit {
    pub fn new() -> Self {
        CompilationUnit {
            statements: Vec::new(),
        }
    }
}

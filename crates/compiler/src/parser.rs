//! Recursive-descent parser for Oaf
//!
//! Statement selection is keyword-driven; keywords arrive as identifier
//! tokens and are matched by text. Expressions parse with precedence
//! climbing, lowest binding first:
//!
//! ```text
//! || -> && -> == != -> < <= > >= -> & | ^ -> << >> <<< >>> -> + - -> * / %
//!    -> unary -> cast -> primary
//! ```
//!
//! On an unexpected token the parser emits `PAR001` with the token's
//! position and `length = max(len(text), 1)`, then skips to the next `;`,
//! `}`, or end of file. It never panics.

use crate::ast::{
    AssignOp, BinaryOp, CompilationUnit, Expr, ExprKind, FieldDecl, NodeId, Span, Stmt, StmtKind,
    TypeDecl, TypeDeclKind, TypeRef, UnaryOp, VariantDecl,
};
use crate::diagnostics::{DiagnosticBag, PARSE_ERROR};
use crate::lexer::{Token, TokenKind, tokenize};

/// Primitive type names; the only heads the cast grammar recognizes.
pub const PRIMITIVE_TYPE_NAMES: &[&str] =
    &["int", "float", "bool", "string", "char", "unit", "error"];

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    bag: &'a mut DiagnosticBag,
    next_node_id: NodeId,
}

impl<'a> Parser<'a> {
    pub fn new(source: &str, bag: &'a mut DiagnosticBag) -> Self {
        let tokens = tokenize(source, bag);
        Parser {
            tokens,
            pos: 0,
            bag,
            next_node_id: 0,
        }
    }

    /// Parse a compilation unit: statements until end of file.
    pub fn parse(&mut self) -> CompilationUnit {
        let mut unit = CompilationUnit::new();
        loop {
            match self.current().kind {
                TokenKind::Eof => break,
                // Empty `;` terminators are legal and silent.
                TokenKind::Semicolon => {
                    self.advance();
                }
                // The lexer already reported bad tokens; skip them here so
                // one stray character does not cascade into parse errors.
                TokenKind::Bad => {
                    self.advance();
                }
                _ => {
                    let before = self.pos;
                    match self.parse_statement() {
                        Ok(stmt) => unit.statements.push(stmt),
                        Err(()) => {
                            self.synchronize();
                            if self.pos == before {
                                // A token synchronize will not pass (e.g. a
                                // stray `}` at top level): force progress.
                                self.advance();
                            }
                        }
                    }
                }
            }
        }
        unit
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn peek_text(&self, offset: usize) -> &str {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.text.as_str())
            .unwrap_or("")
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        self.current().kind == TokenKind::Identifier && self.current().text == keyword
    }

    fn span_of(token: &Token) -> Span {
        Span::new(token.line, token.column, token.text.chars().count().max(1))
    }

    fn next_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    fn error_here(&mut self, expected: &str) {
        let token = self.current().clone();
        let found = if token.kind == TokenKind::Eof {
            "end of file".to_string()
        } else {
            format!("'{}'", token.text)
        };
        self.bag.report_error(
            PARSE_ERROR,
            format!("expected {}, found {}", expected, found),
            token.line,
            token.column,
            token.text.chars().count().max(1),
        );
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ()> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            self.error_here(expected);
            Err(())
        }
    }

    /// Skip to the next `;`, `}`, or end of file. The `;` is consumed, the
    /// `}` is left for the enclosing block.
    fn synchronize(&mut self) {
        loop {
            match self.current().kind {
                TokenKind::Eof | TokenKind::RBrace => return,
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Stmt, ()> {
        if self.current().kind == TokenKind::Identifier {
            match self.current().text.as_str() {
                "flux" => return self.parse_declaration(),
                "loop" => return self.parse_loop(),
                "if" => return self.parse_if(),
                "break" => return self.parse_break_continue(true),
                "continue" => return self.parse_break_continue(false),
                "return" => return self.parse_return(),
                "struct" => return self.parse_struct_or_class(TypeDeclKind::Struct),
                "class" => return self.parse_struct_or_class(TypeDeclKind::Class),
                "enum" => return self.parse_enum(),
                "true" | "false" => return self.parse_expression_statement(),
                _ => {}
            }
            // `Type name = …` — two identifiers in a row can only start a
            // typed declaration.
            if self.peek_kind(1) == TokenKind::Identifier {
                return self.parse_typed_declaration(false);
            }
            // `Name<…> ident = …` needs lookahead because `a < b` is also
            // an expression; the scan is silent so no speculative
            // diagnostics leak into the bag.
            if self.peek_kind(1) == TokenKind::Less && self.looks_like_generic_type_decl() {
                let ty = self.try_type_ref()?;
                return self.finish_typed_declaration(false, ty);
            }
            match self.peek_kind(1) {
                TokenKind::Equals
                | TokenKind::PlusEquals
                | TokenKind::MinusEquals
                | TokenKind::StarEquals
                | TokenKind::SlashEquals => return self.parse_assignment(),
                _ => return self.parse_expression_statement(),
            }
        }
        match self.current().kind {
            TokenKind::IntLiteral
            | TokenKind::FloatLiteral
            | TokenKind::StringLiteral
            | TokenKind::CharLiteral
            | TokenKind::LParen
            | TokenKind::Minus
            | TokenKind::Bang
            | TokenKind::Tilde => self.parse_expression_statement(),
            _ => {
                self.error_here("a statement");
                Err(())
            }
        }
    }

    /// `flux [Type] name = expr ;`
    fn parse_declaration(&mut self) -> Result<Stmt, ()> {
        let flux = self.advance();
        let span = Self::span_of(&flux);
        // `flux int x = …` vs `flux x = …`: a type is present when two
        // identifier-ish tokens follow, or a generic head parses cleanly.
        let declared_type = if self.current().kind == TokenKind::Identifier
            && self.peek_kind(1) == TokenKind::Identifier
        {
            Some(self.try_type_ref()?)
        } else if self.current().kind == TokenKind::Identifier
            && self.peek_kind(1) == TokenKind::Less
            && self.looks_like_generic_type_decl()
        {
            Some(self.try_type_ref()?)
        } else {
            None
        };
        let name = self.expect(TokenKind::Identifier, "a variable name")?;
        self.expect(TokenKind::Equals, "'=' in declaration")?;
        let initializer = self.parse_expression()?;
        self.expect(TokenKind::Semicolon, "';' after declaration")?;
        Ok(Stmt {
            span,
            kind: StmtKind::Declaration {
                is_mutable: true,
                declared_type,
                name: name.text,
                initializer,
            },
        })
    }

    /// `Type name = expr ;` without `flux`.
    fn parse_typed_declaration(&mut self, is_mutable: bool) -> Result<Stmt, ()> {
        let ty = self.try_type_ref()?;
        self.finish_typed_declaration(is_mutable, ty)
    }

    fn finish_typed_declaration(&mut self, is_mutable: bool, ty: TypeRef) -> Result<Stmt, ()> {
        let span = ty.span;
        let name = self.expect(TokenKind::Identifier, "a variable name")?;
        self.expect(TokenKind::Equals, "'=' in declaration")?;
        let initializer = self.parse_expression()?;
        self.expect(TokenKind::Semicolon, "';' after declaration")?;
        Ok(Stmt {
            span,
            kind: StmtKind::Declaration {
                is_mutable,
                declared_type: Some(ty),
                name: name.text,
                initializer,
            },
        })
    }

    /// `name (= | += | -= | *= | /=) expr ;`
    fn parse_assignment(&mut self) -> Result<Stmt, ()> {
        let name = self.advance();
        let span = Self::span_of(&name);
        let op = match self.current().kind {
            TokenKind::Equals => AssignOp::Assign,
            TokenKind::PlusEquals => AssignOp::AddAssign,
            TokenKind::MinusEquals => AssignOp::SubAssign,
            TokenKind::StarEquals => AssignOp::MulAssign,
            TokenKind::SlashEquals => AssignOp::DivAssign,
            _ => {
                self.error_here("an assignment operator");
                return Err(());
            }
        };
        self.advance();
        let value = self.parse_expression()?;
        self.expect(TokenKind::Semicolon, "';' after assignment")?;
        Ok(Stmt {
            span,
            kind: StmtKind::Assignment {
                name: name.text,
                op,
                value,
            },
        })
    }

    /// `if COND => BODY [else => BODY]`
    fn parse_if(&mut self) -> Result<Stmt, ()> {
        let keyword = self.advance();
        let span = Self::span_of(&keyword);
        let condition = self.parse_expression()?;
        self.expect(TokenKind::FatArrow, "'=>' after if condition")?;
        let body = self.parse_body()?;
        let else_body = if self.check_keyword("else") {
            self.advance();
            self.expect(TokenKind::FatArrow, "'=>' after else")?;
            Some(self.parse_body()?)
        } else {
            None
        };
        Ok(Stmt {
            span,
            kind: StmtKind::If {
                condition,
                body,
                else_body,
            },
        })
    }

    /// `loop COND => BODY`
    fn parse_loop(&mut self) -> Result<Stmt, ()> {
        let keyword = self.advance();
        let span = Self::span_of(&keyword);
        let condition = self.parse_expression()?;
        self.expect(TokenKind::FatArrow, "'=>' after loop condition")?;
        let body = self.parse_body()?;
        Ok(Stmt {
            span,
            kind: StmtKind::Loop { condition, body },
        })
    }

    /// Control-flow body: a single statement, or a `{ … }` block.
    fn parse_body(&mut self) -> Result<Vec<Stmt>, ()> {
        if self.check(TokenKind::LBrace) {
            self.advance();
            let mut statements = Vec::new();
            loop {
                match self.current().kind {
                    TokenKind::RBrace => {
                        self.advance();
                        break;
                    }
                    TokenKind::Eof => {
                        self.error_here("'}' to close block");
                        return Err(());
                    }
                    TokenKind::Semicolon | TokenKind::Bad => {
                        self.advance();
                    }
                    _ => {
                        let before = self.pos;
                        match self.parse_statement() {
                            Ok(stmt) => statements.push(stmt),
                            Err(()) => {
                                self.synchronize();
                                if self.pos == before {
                                    self.advance();
                                }
                            }
                        }
                    }
                }
            }
            Ok(statements)
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    fn parse_break_continue(&mut self, is_break: bool) -> Result<Stmt, ()> {
        let keyword = self.advance();
        let span = Self::span_of(&keyword);
        self.expect(TokenKind::Semicolon, "';' after statement")?;
        Ok(Stmt {
            span,
            kind: if is_break {
                StmtKind::Break
            } else {
                StmtKind::Continue
            },
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, ()> {
        let keyword = self.advance();
        let span = Self::span_of(&keyword);
        let value = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon, "';' after return")?;
        Ok(Stmt {
            span,
            kind: StmtKind::Return { value },
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, ()> {
        let expr = self.parse_expression()?;
        let span = expr.span;
        self.expect(TokenKind::Semicolon, "';' after expression")?;
        Ok(Stmt {
            span,
            kind: StmtKind::Expression(expr),
        })
    }

    // ------------------------------------------------------------------
    // Type declarations
    // ------------------------------------------------------------------

    /// `struct Name<params> [field: Type, …];` (same shape for `class`).
    /// Fields also accept the `Type name` spelling.
    fn parse_struct_or_class(&mut self, kind: TypeDeclKind) -> Result<Stmt, ()> {
        let keyword = self.advance();
        let span = Self::span_of(&keyword);
        let name = self.expect(TokenKind::Identifier, "a type name")?;
        let type_params = self.parse_type_params()?;
        self.expect(TokenKind::LBracket, "'[' before field list")?;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBracket) {
            if self.check(TokenKind::Eof) {
                self.error_here("']' to close field list");
                return Err(());
            }
            fields.push(self.parse_field()?);
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBracket, "']' after field list")?;
        self.expect(TokenKind::Semicolon, "';' after type declaration")?;
        Ok(Stmt {
            span,
            kind: StmtKind::TypeDecl(TypeDecl {
                kind,
                name: name.text,
                type_params,
                fields,
                variants: Vec::new(),
                span,
            }),
        })
    }

    fn parse_field(&mut self) -> Result<FieldDecl, ()> {
        // `name: Type` when a colon follows the first identifier,
        // otherwise `Type name`.
        if self.current().kind == TokenKind::Identifier && self.peek_kind(1) == TokenKind::Colon {
            let name = self.advance();
            self.advance(); // ':'
            let ty = self.try_type_ref()?;
            Ok(FieldDecl {
                span: Self::span_of(&name),
                name: name.text,
                ty,
            })
        } else {
            let ty = self.try_type_ref()?;
            let name = self.expect(TokenKind::Identifier, "a field name")?;
            Ok(FieldDecl {
                span: ty.span,
                name: name.text,
                ty,
            })
        }
    }

    /// `enum Name<params> => Variant, Variant(PayloadType), …;`
    fn parse_enum(&mut self) -> Result<Stmt, ()> {
        let keyword = self.advance();
        let span = Self::span_of(&keyword);
        let name = self.expect(TokenKind::Identifier, "a type name")?;
        let type_params = self.parse_type_params()?;
        self.expect(TokenKind::FatArrow, "'=>' before enum variants")?;
        let mut variants = Vec::new();
        loop {
            let variant = self.expect(TokenKind::Identifier, "a variant name")?;
            let payload = if self.check(TokenKind::LParen) {
                self.advance();
                let ty = self.try_type_ref()?;
                self.expect(TokenKind::RParen, "')' after variant payload")?;
                Some(ty)
            } else {
                None
            };
            variants.push(VariantDecl {
                span: Self::span_of(&variant),
                name: variant.text,
                payload,
            });
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::Semicolon, "';' after enum declaration")?;
        Ok(Stmt {
            span,
            kind: StmtKind::TypeDecl(TypeDecl {
                kind: TypeDeclKind::Enum,
                name: name.text,
                type_params,
                fields: Vec::new(),
                variants,
                span,
            }),
        })
    }

    fn parse_type_params(&mut self) -> Result<Vec<String>, ()> {
        let mut params = Vec::new();
        if self.check(TokenKind::Less) {
            self.advance();
            loop {
                let param = self.expect(TokenKind::Identifier, "a type parameter")?;
                params.push(param.text);
                if self.check(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.consume_type_close()?;
        }
        Ok(params)
    }

    /// Silent lookahead for `Name<…> ident`: balanced type-argument tokens
    /// followed by an identifier. Never reports and never moves `pos`.
    fn looks_like_generic_type_decl(&self) -> bool {
        let mut offset = 1;
        if self.peek_kind(offset) != TokenKind::Less {
            return false;
        }
        let mut depth: i32 = 0;
        loop {
            match self.peek_kind(offset) {
                TokenKind::Less => depth += 1,
                TokenKind::Greater => depth -= 1,
                // `>>` / `>>>` close several argument lists at once.
                TokenKind::Shr => depth -= 2,
                TokenKind::ShrU => depth -= 3,
                TokenKind::Identifier | TokenKind::Comma => {}
                _ => return false,
            }
            offset += 1;
            if depth <= 0 {
                break;
            }
            if offset > 64 {
                // Unbounded scan means this is not a type head.
                return false;
            }
        }
        self.peek_kind(offset) == TokenKind::Identifier
    }

    /// `Name` or `Name<arg, …>`.
    fn try_type_ref(&mut self) -> Result<TypeRef, ()> {
        let name = self.expect(TokenKind::Identifier, "a type name")?;
        let span = Self::span_of(&name);
        let mut args = Vec::new();
        if self.check(TokenKind::Less) {
            self.advance();
            loop {
                args.push(self.try_type_ref()?);
                if self.check(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.consume_type_close()?;
        }
        Ok(TypeRef {
            name: name.text,
            args,
            span,
        })
    }

    /// Consume one closing `>`, splitting a `>>` token when nested generic
    /// arguments close together (`Box<Box<int>>`).
    fn consume_type_close(&mut self) -> Result<(), ()> {
        match self.current().kind {
            TokenKind::Greater => {
                self.advance();
                Ok(())
            }
            TokenKind::Shr | TokenKind::ShrU => {
                let token = self.current().clone();
                let rest = &token.text[1..];
                let kind = if rest == ">" {
                    TokenKind::Greater
                } else {
                    TokenKind::Shr
                };
                self.tokens[self.pos] = Token {
                    kind,
                    text: rest.to_string(),
                    line: token.line,
                    column: token.column + 1,
                };
                Ok(())
            }
            _ => {
                self.error_here("'>' to close type arguments");
                Err(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expression(&mut self) -> Result<Expr, ()> {
        self.parse_binary(0)
    }

    /// Binary operator tiers, lowest precedence first.
    fn binary_op_at(&self, level: usize) -> Option<BinaryOp> {
        let kind = self.current().kind;
        let op = match (level, kind) {
            (0, TokenKind::PipePipe) => BinaryOp::Or,
            (1, TokenKind::AmpAmp) => BinaryOp::And,
            (2, TokenKind::EqualsEquals) => BinaryOp::Eq,
            (2, TokenKind::BangEquals) => BinaryOp::Ne,
            (3, TokenKind::Less) => BinaryOp::Lt,
            (3, TokenKind::LessEquals) => BinaryOp::Le,
            (3, TokenKind::Greater) => BinaryOp::Gt,
            (3, TokenKind::GreaterEquals) => BinaryOp::Ge,
            (4, TokenKind::Amp) => BinaryOp::BitAnd,
            (4, TokenKind::Pipe) => BinaryOp::BitOr,
            (4, TokenKind::Caret) => BinaryOp::BitXor,
            (4, TokenKind::BangPipe) => BinaryOp::Nor,
            (4, TokenKind::BangAmp) => BinaryOp::Nand,
            (4, TokenKind::CaretAmp) => BinaryOp::Xand,
            (5, TokenKind::Shl) => BinaryOp::Shl,
            (5, TokenKind::Shr) => BinaryOp::Shr,
            (5, TokenKind::ShlU) => BinaryOp::ShlU,
            (5, TokenKind::ShrU) => BinaryOp::ShrU,
            (6, TokenKind::Plus) => BinaryOp::Add,
            (6, TokenKind::Minus) => BinaryOp::Sub,
            (7, TokenKind::Star) => BinaryOp::Mul,
            (7, TokenKind::Slash) => BinaryOp::Div,
            (7, TokenKind::Percent) => BinaryOp::Mod,
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary(&mut self, level: usize) -> Result<Expr, ()> {
        const UNARY_LEVEL: usize = 8;
        if level >= UNARY_LEVEL {
            return self.parse_unary();
        }
        let mut lhs = self.parse_binary(level + 1)?;
        while let Some(op) = self.binary_op_at(level) {
            self.advance();
            let rhs = self.parse_binary(level + 1)?;
            let span = lhs.span;
            lhs = Expr {
                id: self.next_id(),
                span,
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ()> {
        let op = match self.current().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            let token = self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr {
                id: self.next_id(),
                span: Self::span_of(&token),
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
            });
        }
        if self.is_cast_head() {
            return self.parse_cast();
        }
        self.parse_postfix()
    }

    /// `(T)expr` is a cast when `T` is a primitive type name followed by
    /// `)` and then a token that can begin an expression. Anything else in
    /// parentheses is a grouped expression.
    fn is_cast_head(&self) -> bool {
        self.check(TokenKind::LParen)
            && self.peek_kind(1) == TokenKind::Identifier
            && PRIMITIVE_TYPE_NAMES.contains(&self.peek_text(1))
            && self.peek_kind(2) == TokenKind::RParen
            && matches!(
                self.peek_kind(3),
                TokenKind::IntLiteral
                    | TokenKind::FloatLiteral
                    | TokenKind::StringLiteral
                    | TokenKind::CharLiteral
                    | TokenKind::Identifier
                    | TokenKind::LParen
                    | TokenKind::Minus
                    | TokenKind::Bang
                    | TokenKind::Tilde
            )
    }

    fn parse_cast(&mut self) -> Result<Expr, ()> {
        let open = self.advance(); // '('
        let name = self.advance(); // primitive type name
        self.advance(); // ')'
        let operand = self.parse_unary()?;
        Ok(Expr {
            id: self.next_id(),
            span: Self::span_of(&open),
            kind: ExprKind::Cast {
                target: TypeRef {
                    span: Self::span_of(&name),
                    name: name.text,
                    args: Vec::new(),
                },
                operand: Box::new(operand),
            },
        })
    }

    /// Primary expression plus any call / member-access suffixes.
    fn parse_postfix(&mut self) -> Result<Expr, ()> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current().kind {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if self.check(TokenKind::Comma) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "')' after call arguments")?;
                    let span = expr.span;
                    expr = Expr {
                        id: self.next_id(),
                        span,
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect(TokenKind::Identifier, "a member name")?;
                    let span = expr.span;
                    expr = Expr {
                        id: self.next_id(),
                        span,
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            field: field.text,
                        },
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ()> {
        let token = self.current().clone();
        let span = Self::span_of(&token);
        match token.kind {
            TokenKind::IntLiteral => {
                self.advance();
                let value = token.text.parse::<i64>().unwrap_or_default();
                Ok(Expr {
                    id: self.next_id(),
                    span,
                    kind: ExprKind::IntLiteral(value),
                })
            }
            TokenKind::FloatLiteral => {
                self.advance();
                let value = token.text.parse::<f64>().unwrap_or_default();
                Ok(Expr {
                    id: self.next_id(),
                    span,
                    kind: ExprKind::FloatLiteral(value),
                })
            }
            TokenKind::StringLiteral => {
                self.advance();
                Ok(Expr {
                    id: self.next_id(),
                    span,
                    kind: ExprKind::StringLiteral(token.text),
                })
            }
            TokenKind::CharLiteral => {
                self.advance();
                let value = token.text.chars().next().unwrap_or_default();
                Ok(Expr {
                    id: self.next_id(),
                    span,
                    kind: ExprKind::CharLiteral(value),
                })
            }
            TokenKind::Identifier => {
                self.advance();
                let kind = match token.text.as_str() {
                    "true" => ExprKind::BoolLiteral(true),
                    "false" => ExprKind::BoolLiteral(false),
                    _ => ExprKind::Name(token.text),
                };
                Ok(Expr {
                    id: self.next_id(),
                    span,
                    kind,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')' to close expression")?;
                Ok(inner)
            }
            _ => {
                self.error_here("an expression");
                Err(())
            }
        }
    }
}

/// Convenience entry: parse a full source string.
pub fn parse_source(source: &str, bag: &mut DiagnosticBag) -> CompilationUnit {
    Parser::new(source, bag).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> CompilationUnit {
        let mut bag = DiagnosticBag::new();
        let unit = parse_source(source, &mut bag);
        assert!(
            !bag.has_errors(),
            "unexpected diagnostics: {:?}",
            bag.iter().collect::<Vec<_>>()
        );
        unit
    }

    #[test]
    fn test_flux_declaration_without_type() {
        let unit = parse_ok("flux sum = 0;");
        match &unit.statements[0].kind {
            StmtKind::Declaration {
                is_mutable: true,
                declared_type: None,
                name,
                ..
            } => assert_eq!(name, "sum"),
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_typed_declaration() {
        let unit = parse_ok("float f = 1.25;");
        match &unit.statements[0].kind {
            StmtKind::Declaration {
                is_mutable: false,
                declared_type: Some(ty),
                name,
                ..
            } => {
                assert_eq!(ty.name, "float");
                assert_eq!(name, "f");
            }
            other => panic!("expected typed declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_assignment_is_not_a_declaration() {
        let unit = parse_ok("count = 1;");
        assert!(matches!(
            unit.statements[0].kind,
            StmtKind::Assignment {
                op: AssignOp::Assign,
                ..
            }
        ));
    }

    #[test]
    fn test_compound_assignment() {
        let unit = parse_ok("count += 2;");
        assert!(matches!(
            unit.statements[0].kind,
            StmtKind::Assignment {
                op: AssignOp::AddAssign,
                ..
            }
        ));
    }

    #[test]
    fn test_loop_with_block_and_nested_if() {
        let unit = parse_ok(
            "flux i = 3; loop i > 0 => { if i == 3 => { i -= 1; continue; } i -= 1; }",
        );
        match &unit.statements[1].kind {
            StmtKind::Loop { body, .. } => {
                assert!(matches!(body[0].kind, StmtKind::If { .. }));
                assert!(matches!(body[1].kind, StmtKind::Assignment { .. }));
            }
            other => panic!("expected loop, got {:?}", other),
        }
    }

    #[test]
    fn test_single_statement_body() {
        let unit = parse_ok("if x > 0 => x -= 1;");
        match &unit.statements[0].kind {
            StmtKind::If { body, .. } => assert_eq!(body.len(), 1),
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_cast_vs_parenthesized() {
        let unit = parse_ok("int i = (int)f; int j = (int)-1.5; k = (x) - 1;");
        match &unit.statements[0].kind {
            StmtKind::Declaration { initializer, .. } => {
                assert!(matches!(initializer.kind, ExprKind::Cast { .. }));
            }
            other => panic!("expected declaration, got {:?}", other),
        }
        match &unit.statements[1].kind {
            StmtKind::Declaration { initializer, .. } => match &initializer.kind {
                ExprKind::Cast { operand, .. } => {
                    assert!(matches!(operand.kind, ExprKind::Unary { .. }));
                }
                other => panic!("expected cast, got {:?}", other),
            },
            other => panic!("expected declaration, got {:?}", other),
        }
        // `(x) - 1` keeps its parenthesized-expression reading.
        match &unit.statements[2].kind {
            StmtKind::Assignment { value, .. } => {
                assert!(matches!(
                    value.kind,
                    ExprKind::Binary {
                        op: BinaryOp::Sub,
                        ..
                    }
                ));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_declaration_both_field_spellings() {
        let unit = parse_ok("struct Box<T> [T value]; struct Point [x: int, y: int];");
        match &unit.statements[0].kind {
            StmtKind::TypeDecl(decl) => {
                assert_eq!(decl.kind, TypeDeclKind::Struct);
                assert_eq!(decl.type_params, vec!["T".to_string()]);
                assert_eq!(decl.fields[0].name, "value");
                assert_eq!(decl.fields[0].ty.name, "T");
            }
            other => panic!("expected type declaration, got {:?}", other),
        }
        match &unit.statements[1].kind {
            StmtKind::TypeDecl(decl) => {
                assert_eq!(decl.fields.len(), 2);
                assert_eq!(decl.fields[1].name, "y");
            }
            other => panic!("expected type declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_enum_declaration() {
        let unit = parse_ok("enum Option<T> => None, Some(T);");
        match &unit.statements[0].kind {
            StmtKind::TypeDecl(decl) => {
                assert_eq!(decl.kind, TypeDeclKind::Enum);
                assert_eq!(decl.variants.len(), 2);
                assert!(decl.variants[0].payload.is_none());
                assert_eq!(decl.variants[1].payload.as_ref().map(|t| t.name.as_str()), Some("T"));
            }
            other => panic!("expected enum declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_generic_closes_shift_token() {
        let unit = parse_ok("Box<Box<int>> b = x;");
        match &unit.statements[0].kind {
            StmtKind::Declaration {
                declared_type: Some(ty),
                ..
            } => {
                assert_eq!(ty.name, "Box");
                assert_eq!(ty.args[0].name, "Box");
                assert_eq!(ty.args[0].args[0].name, "int");
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let unit = parse_ok("x = 1 + 2 * 3 == 7 && true;");
        match &unit.statements[0].kind {
            StmtKind::Assignment { value, .. } => match &value.kind {
                ExprKind::Binary { op, .. } => assert_eq!(*op, BinaryOp::And),
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_error_recovery_resumes_at_semicolon() {
        let mut bag = DiagnosticBag::new();
        let unit = parse_source("flux = 1; flux ok = 2;", &mut bag);
        assert!(bag.has_errors());
        let d = bag.iter().find(|d| d.code == PARSE_ERROR).unwrap();
        assert!(d.line >= 1 && d.column >= 1);
        // The second statement still parses.
        assert_eq!(unit.statements.len(), 1);
    }

    #[test]
    fn test_empty_semicolons_are_silent() {
        let mut bag = DiagnosticBag::new();
        let unit = parse_source(";;;", &mut bag);
        assert!(bag.is_empty());
        assert!(unit.statements.is_empty());
    }

    #[test]
    fn test_parser_never_panics_on_garbage() {
        let mut bag = DiagnosticBag::new();
        let _ = parse_source("} ) ] => -> ;; flux flux = = { loop", &mut bag);
        assert!(bag.has_errors());
    }
}

//! Lexer for Oaf source
//!
//! Produces a restartable lazy token stream (the lexer is an `Iterator`)
//! terminated by a single `Eof` token. Positions are 1-based line/column.
//!
//! Keywords are deliberately NOT distinguished here: `flux`, `loop`, `if`
//! and friends come out as `Identifier` tokens whose text equals the
//! keyword, and higher phases recognize them. The one exception is `bind`,
//! which the language reserves as a distinguished token.

use crate::diagnostics::{DiagnosticBag, LEX_ERROR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    CharLiteral,

    Identifier,
    /// Reserved `bind` token.
    Bind,

    // Punctuation
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Colon,
    Dot,
    /// `->`
    Arrow,
    /// `=>`
    FatArrow,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    /// `!|` (reserved)
    BangPipe,
    /// `!&` (reserved)
    BangAmp,
    /// `^&` (reserved)
    CaretAmp,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `<<<`
    ShlU,
    /// `>>>`
    ShrU,
    AmpAmp,
    PipePipe,
    Bang,
    Equals,
    EqualsEquals,
    BangEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    PlusEquals,
    MinusEquals,
    StarEquals,
    SlashEquals,

    /// Unknown character; a `LEX001` diagnostic accompanies it.
    Bad,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    bag: &'a mut DiagnosticBag,
    emitted_eof: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &str, bag: &'a mut DiagnosticBag) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            bag,
            emitted_eof: false,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consume whitespace and `//` / `#` line comments. Comment skipping is
    /// string-aware only in the sense that strings are their own tokens, so
    /// a `//` inside a literal never reaches this function.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_number(&mut self, line: usize, column: usize) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if is_float {
            Token::new(TokenKind::FloatLiteral, text, line, column)
        } else {
            if text.parse::<i64>().is_err() {
                self.bag.report_error(
                    LEX_ERROR,
                    format!("integer literal '{}' is out of range", text),
                    line,
                    column,
                    text.chars().count(),
                );
                return Token::new(TokenKind::Bad, text, line, column);
            }
            Token::new(TokenKind::IntLiteral, text, line, column)
        }
    }

    fn lex_identifier(&mut self, line: usize, column: usize) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = if text == "bind" {
            TokenKind::Bind
        } else {
            TokenKind::Identifier
        };
        Token::new(kind, text, line, column)
    }

    /// Shared by string and char literals: reads the body after the opening
    /// quote, resolving the escape set `\" \' \\ \n \t`.
    fn lex_quoted(&mut self, quote: char, line: usize, column: usize) -> Option<String> {
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.bag.report_error(
                        LEX_ERROR,
                        format!("unterminated {} literal", if quote == '"' { "string" } else { "char" }),
                        line,
                        column,
                        1,
                    );
                    return None;
                }
                Some(c) if c == quote => {
                    self.advance();
                    return Some(text);
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('"') => text.push('"'),
                        Some('\'') => text.push('\''),
                        Some('\\') => text.push('\\'),
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        other => {
                            self.bag.report_error(
                                LEX_ERROR,
                                format!(
                                    "unknown escape sequence '\\{}'",
                                    other.map(String::from).unwrap_or_default()
                                ),
                                line,
                                column,
                                1,
                            );
                        }
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
    }

    fn lex_string(&mut self, line: usize, column: usize) -> Token {
        self.advance(); // opening quote
        match self.lex_quoted('"', line, column) {
            Some(text) => Token::new(TokenKind::StringLiteral, text, line, column),
            None => Token::new(TokenKind::Bad, "\"", line, column),
        }
    }

    fn lex_char(&mut self, line: usize, column: usize) -> Token {
        self.advance(); // opening quote
        match self.lex_quoted('\'', line, column) {
            Some(text) => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(_), None) => Token::new(TokenKind::CharLiteral, text, line, column),
                    _ => {
                        self.bag.report_error(
                            LEX_ERROR,
                            "char literal must contain exactly one character",
                            line,
                            column,
                            text.chars().count().max(1),
                        );
                        Token::new(TokenKind::Bad, text, line, column)
                    }
                }
            }
            None => Token::new(TokenKind::Bad, "'", line, column),
        }
    }

    /// Longest-match operator and punctuation lexing.
    fn lex_operator(&mut self, line: usize, column: usize) -> Token {
        use TokenKind::*;
        // (spelling, kind), longest spellings first per leading char.
        const TABLE: &[(&str, TokenKind)] = &[
            ("<<<", ShlU),
            (">>>", ShrU),
            ("<<", Shl),
            (">>", Shr),
            ("<=", LessEquals),
            (">=", GreaterEquals),
            ("==", EqualsEquals),
            ("!=", BangEquals),
            ("=>", FatArrow),
            ("->", Arrow),
            ("+=", PlusEquals),
            ("-=", MinusEquals),
            ("*=", StarEquals),
            ("/=", SlashEquals),
            ("&&", AmpAmp),
            ("||", PipePipe),
            ("!|", BangPipe),
            ("!&", BangAmp),
            ("^&", CaretAmp),
            ("{", LBrace),
            ("}", RBrace),
            ("[", LBracket),
            ("]", RBracket),
            ("(", LParen),
            (")", RParen),
            (",", Comma),
            (";", Semicolon),
            (":", Colon),
            (".", Dot),
            ("+", Plus),
            ("-", Minus),
            ("*", Star),
            ("/", Slash),
            ("%", Percent),
            ("&", Amp),
            ("|", Pipe),
            ("^", Caret),
            ("~", Tilde),
            ("!", Bang),
            ("=", Equals),
            ("<", Less),
            (">", Greater),
        ];

        for (spelling, kind) in TABLE {
            let len = spelling.chars().count();
            let matches = spelling
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if matches {
                for _ in 0..len {
                    self.advance();
                }
                return Token::new(*kind, *spelling, line, column);
            }
        }

        // Unknown character: bad token, length-1 diagnostic, keep lexing.
        let c = self.advance().unwrap_or('\0');
        self.bag.report_error(
            LEX_ERROR,
            format!("unexpected character '{}'", c),
            line,
            column,
            1,
        );
        Token::new(TokenKind::Bad, c.to_string(), line, column)
    }

    fn next_token(&mut self) -> Token {
        self.skip_trivia();
        let (line, column) = (self.line, self.column);
        match self.peek() {
            None => Token::new(TokenKind::Eof, "", line, column),
            Some(c) if c.is_ascii_digit() => self.lex_number(line, column),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.lex_identifier(line, column),
            Some('"') => self.lex_string(line, column),
            Some('\'') => self.lex_char(line, column),
            Some(_) => self.lex_operator(line, column),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.emitted_eof {
            return None;
        }
        let token = self.next_token();
        if token.kind == TokenKind::Eof {
            self.emitted_eof = true;
        }
        Some(token)
    }
}

/// Tokenize a whole source string. The final token is always `Eof`.
pub fn tokenize(source: &str, bag: &mut DiagnosticBag) -> Vec<Token> {
    Lexer::new(source, bag).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut bag = DiagnosticBag::new();
        tokenize(source, &mut bag).iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_longest_match_shifts() {
        use TokenKind::*;
        assert_eq!(kinds("<<< << <= <"), vec![ShlU, Shl, LessEquals, Less, Eof]);
        assert_eq!(kinds(">>> >> >= >"), vec![ShrU, Shr, GreaterEquals, Greater, Eof]);
    }

    #[test]
    fn test_arrows_and_compound_assignment() {
        use TokenKind::*;
        assert_eq!(
            kinds("-> => += -= *= /="),
            vec![Arrow, FatArrow, PlusEquals, MinusEquals, StarEquals, SlashEquals, Eof]
        );
    }

    #[test]
    fn test_reserved_operators_and_bind() {
        use TokenKind::*;
        assert_eq!(kinds("!| !& ^&"), vec![BangPipe, BangAmp, CaretAmp, Eof]);
        assert_eq!(kinds("bind"), vec![Bind, Eof]);
        // ...but `binder` is an ordinary identifier.
        assert_eq!(kinds("binder"), vec![Identifier, Eof]);
    }

    #[test]
    fn test_number_split_on_dot() {
        let mut bag = DiagnosticBag::new();
        let tokens = tokenize("1.25 42 7.only", &mut bag);
        assert_eq!(tokens[0].kind, TokenKind::FloatLiteral);
        assert_eq!(tokens[0].text, "1.25");
        assert_eq!(tokens[1].kind, TokenKind::IntLiteral);
        // `7.only` lexes as int 7, dot, identifier (the dot needs a digit).
        assert_eq!(tokens[2].kind, TokenKind::IntLiteral);
        assert_eq!(tokens[3].kind, TokenKind::Dot);
        assert!(bag.is_empty());
    }

    #[test]
    fn test_positions_are_one_based() {
        let mut bag = DiagnosticBag::new();
        let tokens = tokenize("a\n  b", &mut bag);
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn test_comments_both_styles() {
        let mut bag = DiagnosticBag::new();
        let tokens = tokenize("a // trailing\n# whole line\nb", &mut bag);
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", ""]);
    }

    #[test]
    fn test_hash_inside_string_is_not_a_comment() {
        let mut bag = DiagnosticBag::new();
        let tokens = tokenize("\"a # b // c\"", &mut bag);
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "a # b // c");
    }

    #[test]
    fn test_escape_set() {
        let mut bag = DiagnosticBag::new();
        let tokens = tokenize(r#""line\nquote\"tab\t\\" '\''"#, &mut bag);
        assert_eq!(tokens[0].text, "line\nquote\"tab\t\\");
        assert_eq!(tokens[1].kind, TokenKind::CharLiteral);
        assert_eq!(tokens[1].text, "'");
        assert!(bag.is_empty());
    }

    #[test]
    fn test_unknown_character_is_bad_token_and_continues() {
        let mut bag = DiagnosticBag::new();
        let tokens = tokenize("a @ b", &mut bag);
        assert_eq!(tokens[1].kind, TokenKind::Bad);
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
        assert_eq!(bag.len(), 1);
        let d = bag.iter().next().unwrap();
        assert_eq!(d.code, LEX_ERROR);
        assert_eq!((d.line, d.column, d.length), (1, 3, 1));
    }

    #[test]
    fn test_keywords_stay_identifiers() {
        let mut bag = DiagnosticBag::new();
        let tokens = tokenize("flux loop if true", &mut bag);
        assert!(tokens[..4].iter().all(|t| t.kind == TokenKind::Identifier));
    }

    #[test]
    fn test_stream_is_restartable() {
        let mut bag1 = DiagnosticBag::new();
        let mut bag2 = DiagnosticBag::new();
        let first = tokenize("flux x = 1;", &mut bag1);
        let second = tokenize("flux x = 1;", &mut bag2);
        assert_eq!(first, second);
    }
}

//! Indicator expression tokenizer and parser.
//!
//! Recursive descent with one function per precedence level, lowest first:
//!
//! ```text
//! or         := and ("or" and)*
//! and        := not ("and" not)*
//! not        := "not" not | comparison
//! comparison := additive (("<" | "<=" | ">" | ">=" | "==" | "!=") additive)*
//! additive   := term (("+" | "-") term)*
//! term       := unary (("*" | "/") unary)*
//! unary      := ("-" | "+") unary | power
//! power      := primary ("**" unary)?
//! primary    := number | ident | ident "(" args ")" | "(" or ")"
//! args       := [arg ("," arg)*]     arg := ident "=" or | or
//! ```
//!
//! Binary operators at one level associate to the left, comparisons included:
//! `a < b < c` is `(a < b) < c`, comparing the 1.0/0.0 result of `a < b`
//! with `c`. Only `**` associates to the right.
//!
//! Both the syntactic nesting (recursion) and the depth of the resulting tree
//! are capped while parsing, so adversarial input cannot exhaust the stack.
//! A group charges one nesting level, and a `-` or `not` that opens a group
//! rides on the group's level, so the fully parenthesised `Display` form of
//! any accepted tree nests no deeper than the tree itself.

use crate::domain::error::ParseError;
use crate::domain::expr::{BinaryOp, Expr, KeywordArg, UnaryOp};
use crate::domain::limits::EngineLimits;

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Assign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    And,
    Or,
    Not,
    Eof,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Number(v) => format!("number {}", v),
            TokenKind::Ident(name) => format!("'{}'", name),
            TokenKind::LParen => "'('".into(),
            TokenKind::RParen => "')'".into(),
            TokenKind::Comma => "','".into(),
            TokenKind::Assign => "'='".into(),
            TokenKind::Plus => "'+'".into(),
            TokenKind::Minus => "'-'".into(),
            TokenKind::Star => "'*'".into(),
            TokenKind::StarStar => "'**'".into(),
            TokenKind::Slash => "'/'".into(),
            TokenKind::Lt => "'<'".into(),
            TokenKind::Le => "'<='".into(),
            TokenKind::Gt => "'>'".into(),
            TokenKind::Ge => "'>='".into(),
            TokenKind::EqEq => "'=='".into(),
            TokenKind::NotEq => "'!='".into(),
            TokenKind::And => "'and'".into(),
            TokenKind::Or => "'or'".into(),
            TokenKind::Not => "'not'".into(),
            TokenKind::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.remaining().chars().nth(1)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let position = self.pos;
            let Some(ch) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    position,
                });
                return Ok(tokens);
            };

            let kind = if ch.is_ascii_digit() || (ch == '.' && self.peek_second().is_some_and(|c| c.is_ascii_digit())) {
                self.lex_number()?
            } else if ch.is_ascii_alphabetic() || ch == '_' {
                self.lex_word()
            } else {
                self.lex_symbol()?
            };
            tokens.push(Token { kind, position });
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        let mut has_dot = false;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let mark = self.pos;
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            let mut exp_digits = 0;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                exp_digits += 1;
                self.advance();
            }
            if exp_digits == 0 {
                return Err(ParseError::new("malformed exponent in number", mark));
            }
        }

        let text = &self.input[start..self.pos];
        let value: f64 = text
            .parse()
            .map_err(|_| ParseError::new(format!("invalid number: {}", text), start))?;
        if !value.is_finite() {
            return Err(ParseError::new(
                format!("number out of range: {}", text),
                start,
            ));
        }
        if self.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
            return Err(ParseError::new(
                format!("unexpected character '{}' after number", self.remaining().chars().next().unwrap_or(' ')),
                self.pos,
            ));
        }
        Ok(TokenKind::Number(value))
    }

    fn lex_word(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.advance();
        }
        match &self.input[start..self.pos] {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            word => TokenKind::Ident(word.to_string()),
        }
    }

    fn lex_symbol(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        let ch = self.advance().unwrap_or('\0');
        let next = self.peek();
        let kind = match (ch, next) {
            ('*', Some('*')) => {
                self.advance();
                TokenKind::StarStar
            }
            ('<', Some('=')) => {
                self.advance();
                TokenKind::Le
            }
            ('>', Some('=')) => {
                self.advance();
                TokenKind::Ge
            }
            ('=', Some('=')) => {
                self.advance();
                TokenKind::EqEq
            }
            ('!', Some('=')) => {
                self.advance();
                TokenKind::NotEq
            }
            ('(', _) => TokenKind::LParen,
            (')', _) => TokenKind::RParen,
            (',', _) => TokenKind::Comma,
            ('=', _) => TokenKind::Assign,
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('<', _) => TokenKind::Lt,
            ('>', _) => TokenKind::Gt,
            _ => {
                return Err(ParseError::new(
                    format!("unexpected character '{}'", ch),
                    start,
                ));
            }
        };
        Ok(kind)
    }
}

/// A parsed subtree together with its depth.
type Parsed = (Expr, usize);

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    nesting: usize,
    /// Index of the first token inside the innermost open group.
    group_start: Option<usize>,
    max_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, max_depth: usize) -> Self {
        Self {
            tokens,
            index: 0,
            nesting: 0,
            group_start: None,
            max_depth,
        }
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.index.min(last)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_second_kind(&self) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.index + 1).min(last)].kind
    }

    fn position(&self) -> usize {
        self.peek().position
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(ParseError::new(
                format!(
                    "expected {}, found {}",
                    kind.describe(),
                    self.peek_kind().describe()
                ),
                self.position(),
            ))
        }
    }

    fn check_depth(&self, depth: usize, position: usize) -> Result<usize, ParseError> {
        if depth > self.max_depth {
            return Err(ParseError::new(
                format!("expression nested deeper than {} levels", self.max_depth),
                position,
            ));
        }
        Ok(depth)
    }

    /// Guards every recursive descent step.
    fn enter(&mut self) -> Result<(), ParseError> {
        self.nesting += 1;
        if self.nesting > self.max_depth {
            return Err(ParseError::new(
                format!("expression nested deeper than {} levels", self.max_depth),
                self.position(),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    /// Enter a prefix operator's level unless it directly opens a group,
    /// whose level already covers it. Returns whether a level was taken.
    fn enter_prefix(&mut self) -> Result<bool, ParseError> {
        if self.group_start == Some(self.index) {
            return Ok(false);
        }
        self.enter()?;
        Ok(true)
    }

    fn parse(mut self) -> Result<Expr, ParseError> {
        if *self.peek_kind() == TokenKind::Eof {
            return Err(ParseError::new("empty expression", self.position()));
        }
        let (expr, _) = self.parse_or()?;
        match self.peek_kind() {
            TokenKind::Eof => Ok(expr),
            TokenKind::RParen => Err(ParseError::new("unbalanced ')'", self.position())),
            other => Err(ParseError::new(
                format!("unexpected {} after expression", other.describe()),
                self.position(),
            )),
        }
    }

    fn binary_loop(
        &mut self,
        ops: fn(&TokenKind) -> Option<BinaryOp>,
        operand: fn(&mut Parser) -> Result<Parsed, ParseError>,
    ) -> Result<Parsed, ParseError> {
        let (mut left, mut depth) = operand(self)?;
        while let Some(op) = ops(self.peek_kind()) {
            let position = self.position();
            self.advance();
            let (right, right_depth) = operand(self)?;
            depth = self.check_depth(1 + depth.max(right_depth), position)?;
            left = Expr::binary(op, left, right);
        }
        Ok((left, depth))
    }

    fn parse_or(&mut self) -> Result<Parsed, ParseError> {
        self.enter()?;
        let result = self.binary_loop(
            |k| (*k == TokenKind::Or).then_some(BinaryOp::Or),
            Parser::parse_and,
        );
        self.leave();
        result
    }

    fn parse_and(&mut self) -> Result<Parsed, ParseError> {
        self.binary_loop(
            |k| (*k == TokenKind::And).then_some(BinaryOp::And),
            Parser::parse_not,
        )
    }

    fn parse_not(&mut self) -> Result<Parsed, ParseError> {
        if *self.peek_kind() == TokenKind::Not {
            let position = self.position();
            let entered = self.enter_prefix()?;
            self.advance();
            let result = self.parse_not();
            if entered {
                self.leave();
            }
            let (operand, depth) = result?;
            let depth = self.check_depth(depth + 1, position)?;
            return Ok((Expr::unary(UnaryOp::Not, operand), depth));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Parsed, ParseError> {
        self.binary_loop(
            |k| match k {
                TokenKind::Lt => Some(BinaryOp::Lt),
                TokenKind::Le => Some(BinaryOp::Le),
                TokenKind::Gt => Some(BinaryOp::Gt),
                TokenKind::Ge => Some(BinaryOp::Ge),
                TokenKind::EqEq => Some(BinaryOp::Eq),
                TokenKind::NotEq => Some(BinaryOp::Ne),
                _ => None,
            },
            Parser::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Parsed, ParseError> {
        self.binary_loop(
            |k| match k {
                TokenKind::Plus => Some(BinaryOp::Add),
                TokenKind::Minus => Some(BinaryOp::Sub),
                _ => None,
            },
            Parser::parse_term,
        )
    }

    fn parse_term(&mut self) -> Result<Parsed, ParseError> {
        self.binary_loop(
            |k| match k {
                TokenKind::Star => Some(BinaryOp::Mul),
                TokenKind::Slash => Some(BinaryOp::Div),
                _ => None,
            },
            Parser::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Parsed, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => None,
            _ => return self.parse_power(),
        };
        let position = self.position();
        let entered = self.enter_prefix()?;
        self.advance();
        let result = self.parse_unary();
        if entered {
            self.leave();
        }
        let (operand, depth) = result?;
        match op {
            Some(op) => {
                let depth = self.check_depth(depth + 1, position)?;
                Ok((Expr::unary(op, operand), depth))
            }
            None => Ok((operand, depth)),
        }
    }

    /// `**` chains are collected in a loop and folded right to left.
    fn parse_power(&mut self) -> Result<Parsed, ParseError> {
        let (base, base_depth) = self.parse_primary()?;
        let mut exponents: Vec<(usize, Parsed)> = Vec::new();
        while *self.peek_kind() == TokenKind::StarStar {
            let position = self.position();
            self.advance();
            if matches!(self.peek_kind(), TokenKind::Minus | TokenKind::Plus) {
                exponents.push((position, self.parse_unary()?));
                break;
            }
            exponents.push((position, self.parse_primary()?));
        }

        let mut rest = exponents.into_iter().rev();
        let Some((mut position, (mut exponent, mut depth))) = rest.next() else {
            return Ok((base, base_depth));
        };
        for (prev_position, (operand, operand_depth)) in rest {
            depth = self.check_depth(1 + operand_depth.max(depth), position)?;
            exponent = Expr::binary(BinaryOp::Pow, operand, exponent);
            position = prev_position;
        }
        let depth = self.check_depth(1 + base_depth.max(depth), position)?;
        Ok((Expr::binary(BinaryOp::Pow, base, exponent), depth))
    }

    fn parse_primary(&mut self) -> Result<Parsed, ParseError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(v) => Ok((Expr::Literal(v), 1)),
            TokenKind::Ident(name) => {
                if *self.peek_kind() == TokenKind::LParen {
                    self.advance();
                    self.parse_call(name, token.position)
                } else {
                    Ok((Expr::Ident(name), 1))
                }
            }
            TokenKind::LParen => {
                let outer = self.group_start.replace(self.index);
                let inner = self.parse_or();
                self.group_start = outer;
                let inner = inner?;
                if *self.peek_kind() == TokenKind::Eof {
                    return Err(ParseError::new("unbalanced '(': missing ')'", self.position()));
                }
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Eof => Err(ParseError::new(
                "unexpected end of input, expected operand",
                token.position,
            )),
            TokenKind::RParen => Err(ParseError::new("unbalanced ')'", token.position)),
            other => Err(ParseError::new(
                format!("expected operand, found {}", other.describe()),
                token.position,
            )),
        }
    }

    fn parse_call(&mut self, name: String, position: usize) -> Result<Parsed, ParseError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<KeywordArg> = Vec::new();
        let mut depth = 0;

        if self.eat(&TokenKind::RParen) {
            return Ok((Expr::Call { name, args, kwargs }, 1));
        }

        loop {
            let keyword = match (self.peek_kind(), self.peek_second_kind()) {
                (TokenKind::Ident(kw), TokenKind::Assign) => Some(kw.clone()),
                _ => None,
            };
            if let Some(kw) = keyword {
                self.advance();
                self.advance();
                let (value, value_depth) = self.parse_or()?;
                depth = depth.max(value_depth);
                kwargs.push(KeywordArg { name: kw, value });
            } else {
                if !kwargs.is_empty() {
                    return Err(ParseError::new(
                        "positional argument after keyword argument",
                        self.position(),
                    ));
                }
                let (arg, arg_depth) = self.parse_or()?;
                depth = depth.max(arg_depth);
                args.push(arg);
            }

            if self.eat(&TokenKind::Comma) {
                continue;
            }
            if *self.peek_kind() == TokenKind::Eof {
                return Err(ParseError::new(
                    format!("unbalanced '(' in call to '{}': missing ')'", name),
                    self.position(),
                ));
            }
            self.expect(TokenKind::RParen)?;
            break;
        }

        let depth = self.check_depth(depth + 1, position)?;
        Ok((Expr::Call { name, args, kwargs }, depth))
    }
}

/// Parse with the default limits.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    parse_with_limits(input, &EngineLimits::default())
}

pub fn parse_with_limits(input: &str, limits: &EngineLimits) -> Result<Expr, ParseError> {
    if input.len() > limits.max_source_len {
        return Err(ParseError::new(
            format!(
                "expression is {} bytes, limit is {}",
                input.len(),
                limits.max_source_len
            ),
            limits.max_source_len,
        ));
    }
    let tokens = Lexer::new(input).tokenize()?;
    Parser::new(tokens, limits.max_depth).parse()
}

use crate::ast::{
    ArrowBody, ArrowFunction, AssignOp, BinOp, DeclKind, Expr, LogicalOp, Program, Property, Stmt,
    TemplatePart, UnOp,
};
use crate::error::{Result, ScriptError, Span};
use crate::lexer::{tokenize, tokenize_at, unescape_template, SpannedToken, Token};
use std::rc::Rc;

/// Deepest recursion the parser allows before rejecting a snippet
///
/// Statements, expressions and unary operators each add a level, so a
/// parenthesised group costs about two.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Recursive-descent parser for handler snippets
pub struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
    /// Current recursion depth, bounded by [`MAX_NESTING_DEPTH`]
    depth: usize,
    /// Nesting depth of arrow function bodies
    fn_depth: usize,
    /// Set when an `await` is seen at the top level of the snippet
    top_level_await: bool,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [SpannedToken]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            fn_depth: 0,
            top_level_await: false,
        }
    }

    /// Peek at current token
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or_default()
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|p| self.tokens.get(p))
            .map(|t| t.span)
            .unwrap_or_default()
    }

    /// Advance to next token
    fn advance(&mut self) -> &Token {
        let token = self
            .tokens
            .get(self.pos)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(expected)
    }

    /// Consume token if it matches
    fn consume(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Expect a token, error if not found
    fn expect(&mut self, expected: Token, what: &str) -> Result<Span> {
        if self.check(&expected) {
            self.advance();
            Ok(self.prev_span())
        } else {
            Err(self.error(format!("Expected {}, found {}", what, describe(self.peek()))))
        }
    }

    fn error(&self, message: String) -> ScriptError {
        ScriptError::ParserError {
            span: self.span(),
            message,
        }
    }

    /// Run one recursive production, failing once nesting is too deep
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error(format!(
                "Snippet nests deeper than {} levels",
                MAX_NESTING_DEPTH
            )));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn is_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn identifier(&mut self) -> Result<String> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("Expected identifier, found {}", describe(&other)))),
        }
    }

    /// Parse a whole snippet
    pub fn parse_program(&mut self) -> Result<Program> {
        let mut body = Vec::new();
        while !self.is_eof() {
            body.push(self.parse_statement()?);
        }

        let implicit_value = matches!(body.as_slice(), [Stmt::Expr(_)]);
        Ok(Program {
            body,
            implicit_value,
            has_await: self.top_level_await,
        })
    }

    fn end_statement(&mut self) {
        self.consume(&Token::Semicolon);
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        self.nested(Self::statement)
    }

    fn statement(&mut self) -> Result<Stmt> {
        let start = self.span();
        match self.peek() {
            Token::Semicolon => {
                self.advance();
                Ok(Stmt::Empty(start))
            }
            Token::LBrace => {
                let body = self.parse_block()?;
                Ok(Stmt::Block(body, start.to(self.prev_span())))
            }
            Token::Let | Token::Const | Token::Var => {
                let stmt = self.parse_declaration()?;
                self.end_statement();
                Ok(stmt)
            }
            Token::If => self.parse_if(),
            Token::While => {
                self.advance();
                self.expect(Token::LParen, "'('")?;
                let cond = self.parse_expression()?;
                self.expect(Token::RParen, "')'")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::While {
                    cond,
                    body,
                    span: start.to(self.prev_span()),
                })
            }
            Token::For => self.parse_for(),
            Token::Return => {
                self.advance();
                let value = if matches!(
                    self.peek(),
                    Token::Semicolon | Token::RBrace | Token::Eof
                ) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.end_statement();
                Ok(Stmt::Return(value, start.to(self.prev_span())))
            }
            Token::Break => {
                self.advance();
                self.end_statement();
                Ok(Stmt::Break(start))
            }
            Token::Continue => {
                self.advance();
                self.end_statement();
                Ok(Stmt::Continue(start))
            }
            Token::Throw => {
                self.advance();
                let value = self.parse_expression()?;
                self.end_statement();
                Ok(Stmt::Throw(value, start.to(self.prev_span())))
            }
            Token::Try => self.parse_try(),
            _ => {
                let expr = self.parse_expression()?;
                self.end_statement();
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(Token::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.is_eof() {
                return Err(self.error("Unterminated block, expected '}'".to_string()));
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn decl_kind(&mut self) -> Option<DeclKind> {
        let kind = match self.peek() {
            Token::Let => DeclKind::Let,
            Token::Const => DeclKind::Const,
            Token::Var => DeclKind::Var,
            _ => return None,
        };
        self.advance();
        Some(kind)
    }

    fn parse_declaration(&mut self) -> Result<Stmt> {
        let start = self.span();
        let kind = self
            .decl_kind()
            .ok_or_else(|| self.error("Expected declaration".to_string()))?;
        let name = self.identifier()?;
        let init = if self.consume(&Token::Eq) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        if kind == DeclKind::Const && init.is_none() {
            return Err(ScriptError::ParserError {
                span: start.to(self.prev_span()),
                message: format!("Missing initializer in const declaration of {}", name),
            });
        }
        Ok(Stmt::Decl {
            kind,
            name,
            init,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let start = self.span();
        self.advance();
        self.expect(Token::LParen, "'('")?;
        let cond = self.parse_expression()?;
        self.expect(Token::RParen, "')'")?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.consume(&Token::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let start = self.span();
        self.advance();
        self.expect(Token::LParen, "'('")?;

        let is_for_of = matches!(self.peek(), Token::Let | Token::Const | Token::Var)
            && matches!(self.peek_at(1), Token::Identifier(_))
            && matches!(self.peek_at(2), Token::Of);
        if is_for_of {
            let kind = self.decl_kind().unwrap_or(DeclKind::Let);
            let name = self.identifier()?;
            self.expect(Token::Of, "'of'")?;
            let iterable = self.parse_expression()?;
            self.expect(Token::RParen, "')'")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
                span: start.to(self.prev_span()),
            });
        }

        let init = match self.peek() {
            Token::Semicolon => None,
            Token::Let | Token::Const | Token::Var => Some(Box::new(self.parse_declaration()?)),
            _ => Some(Box::new(Stmt::Expr(self.parse_expression()?))),
        };
        self.expect(Token::Semicolon, "';'")?;
        let cond = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::Semicolon, "';'")?;
        let update = if self.check(&Token::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::RParen, "')'")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            cond,
            update,
            body,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_try(&mut self) -> Result<Stmt> {
        let start = self.span();
        self.advance();
        let body = self.parse_block()?;

        let mut param = None;
        let mut handler = None;
        if self.consume(&Token::Catch) {
            if self.consume(&Token::LParen) {
                param = Some(self.identifier()?);
                self.expect(Token::RParen, "')'")?;
            }
            handler = Some(self.parse_block()?);
        }
        let finalizer = if self.consume(&Token::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("Missing catch or finally after try".to_string()));
        }

        Ok(Stmt::Try {
            body,
            param,
            handler,
            finalizer,
            span: start.to(self.prev_span()),
        })
    }

    /// Parse an expression
    pub fn parse_expression(&mut self) -> Result<Expr> {
        self.nested(Self::parse_assignment)
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        if self.at_arrow_function() {
            return self.parse_arrow();
        }

        let target = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Eq => AssignOp::Assign,
            Token::PlusEq => AssignOp::Add,
            Token::MinusEq => AssignOp::Sub,
            Token::StarEq => AssignOp::Mul,
            Token::SlashEq => AssignOp::Div,
            _ => return Ok(target),
        };
        if !target.is_assignable() {
            return Err(ScriptError::ParserError {
                span: target.span(),
                message: "Invalid assignment target".to_string(),
            });
        }
        self.advance();
        let value = self.parse_expression()?;
        let span = target.span().to(value.span());
        Ok(Expr::Assign(Box::new(target), op, Box::new(value), span))
    }

    /// Lookahead for `x =>`, `(a, b) =>` and their `async` forms
    fn at_arrow_function(&self) -> bool {
        let offset = usize::from(matches!(self.peek(), Token::Async));
        match self.peek_at(offset) {
            Token::Identifier(_) => matches!(self.peek_at(offset + 1), Token::Arrow),
            Token::LParen => {
                let mut depth = 0usize;
                let mut i = offset;
                loop {
                    match self.peek_at(i) {
                        Token::LParen => depth += 1,
                        Token::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(self.peek_at(i + 1), Token::Arrow);
                            }
                        }
                        Token::Eof => return false,
                        _ => {}
                    }
                    i += 1;
                }
            }
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> Result<Expr> {
        let start = self.span();
        self.consume(&Token::Async);

        let mut params = Vec::new();
        if self.consume(&Token::LParen) {
            while !self.check(&Token::RParen) {
                params.push(self.identifier()?);
                if !self.consume(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen, "')'")?;
        } else {
            params.push(self.identifier()?);
        }
        self.expect(Token::Arrow, "'=>'")?;

        self.fn_depth += 1;
        let body = if self.check(&Token::LBrace) {
            self.parse_block().map(ArrowBody::Block)
        } else {
            self.parse_expression().map(ArrowBody::Expr)
        };
        self.fn_depth -= 1;

        Ok(Expr::Arrow(Rc::new(ArrowFunction {
            params,
            body: body?,
            span: start.to(self.prev_span()),
        })))
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let cond = self.parse_or()?;
        if !self.consume(&Token::Question) {
            return Ok(cond);
        }
        let then_expr = self.parse_expression()?;
        self.expect(Token::Colon, "':'")?;
        let else_expr = self.parse_expression()?;
        let span = cond.span().to(else_expr.span());
        Ok(Expr::Conditional(
            Box::new(cond),
            Box::new(then_expr),
            Box::new(else_expr),
            span,
        ))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        loop {
            let op = match self.peek() {
                Token::OrOr => LogicalOp::Or,
                Token::QuestionQuestion => LogicalOp::Coalesce,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_and()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Logical(Box::new(lhs), op, Box::new(rhs), span);
        }
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.consume(&Token::AndAnd) {
            let rhs = self.parse_equality()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Logical(Box::new(lhs), LogicalOp::And, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr>,
        op_for: fn(&Token) -> Option<BinOp>,
    ) -> Result<Expr> {
        let mut lhs = next(self)?;
        while let Some(op) = op_for(self.peek()) {
            self.advance();
            let rhs = next(self)?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        self.parse_binary_level(Self::parse_relational, |t| match t {
            Token::EqEq => Some(BinOp::Eq),
            Token::NotEq => Some(BinOp::Ne),
            Token::EqEqEq => Some(BinOp::StrictEq),
            Token::NotEqEq => Some(BinOp::StrictNe),
            _ => None,
        })
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        self.parse_binary_level(Self::parse_additive, |t| match t {
            Token::Lt => Some(BinOp::Lt),
            Token::Le => Some(BinOp::Le),
            Token::Gt => Some(BinOp::Gt),
            Token::Ge => Some(BinOp::Ge),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.parse_binary_level(Self::parse_multiplicative, |t| match t {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        self.parse_binary_level(Self::parse_unary, |t| match t {
            Token::Star => Some(BinOp::Mul),
            Token::Slash => Some(BinOp::Div),
            Token::Percent => Some(BinOp::Rem),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.nested(Self::unary)
    }

    fn unary(&mut self) -> Result<Expr> {
        let start = self.span();
        let op = match self.peek() {
            Token::Bang => Some(UnOp::Not),
            Token::Minus => Some(UnOp::Neg),
            Token::Plus => Some(UnOp::Plus),
            Token::Typeof => Some(UnOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.to(operand.span());
            return Ok(Expr::Unary(op, Box::new(operand), span));
        }

        match self.peek() {
            Token::Await => {
                self.advance();
                if self.fn_depth == 0 {
                    self.top_level_await = true;
                }
                let operand = self.parse_unary()?;
                let span = start.to(operand.span());
                Ok(Expr::Await(Box::new(operand), span))
            }
            Token::PlusPlus | Token::MinusMinus => {
                let delta = if matches!(self.advance(), Token::PlusPlus) {
                    1.0
                } else {
                    -1.0
                };
                let target = self.parse_unary()?;
                if !target.is_assignable() {
                    return Err(ScriptError::ParserError {
                        span: target.span(),
                        message: "Invalid update target".to_string(),
                    });
                }
                let span = start.to(target.span());
                Ok(Expr::Update {
                    target: Box::new(target),
                    delta,
                    prefix: true,
                    span,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let expr = self.parse_call_member()?;
        let delta = match self.peek() {
            Token::PlusPlus => 1.0,
            Token::MinusMinus => -1.0,
            _ => return Ok(expr),
        };
        if !expr.is_assignable() {
            return Ok(expr);
        }
        self.advance();
        let span = expr.span().to(self.prev_span());
        Ok(Expr::Update {
            target: Box::new(expr),
            delta,
            prefix: false,
            span,
        })
    }

    fn property_name(&mut self) -> Result<String> {
        let token = self.peek().clone();
        if let Token::Identifier(name) = token {
            self.advance();
            return Ok(name);
        }
        if let Some(text) = token.keyword_text() {
            self.advance();
            return Ok(text.to_string());
        }
        Err(self.error(format!(
            "Expected property name, found {}",
            describe(&token)
        )))
    }

    fn parse_call_member(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot | Token::QuestionDot => {
                    let optional = matches!(self.advance(), Token::QuestionDot);
                    let property = self.property_name()?;
                    let span = expr.span().to(self.prev_span());
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional,
                        span,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(Token::RBracket, "']'")?;
                    let span = expr.span().to(self.prev_span());
                    expr = Expr::Index(Box::new(expr), Box::new(index), span);
                }
                Token::LParen => {
                    self.advance();
                    let args = self.parse_list(Token::RParen, "')'")?;
                    let span = expr.span().to(self.prev_span());
                    expr = Expr::Call(Box::new(expr), args, span);
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma separated expressions up to `close`; trailing comma allowed
    fn parse_list(&mut self, close: Token, what: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.check(&close) {
            items.push(self.parse_expression()?);
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        self.expect(close, what)?;
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let span = self.span();
        let token = self.peek().clone();
        match token {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n, span))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::String(s, span))
            }
            Token::Template(raw) => {
                self.advance();
                let parts = self.parse_template(&raw, span)?;
                Ok(Expr::Template(parts, span))
            }
            Token::True | Token::False => {
                self.advance();
                Ok(Expr::Bool(matches!(token, Token::True), span))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Null(span))
            }
            Token::Undefined => {
                self.advance();
                Ok(Expr::Undefined(span))
            }
            Token::Identifier(name) => {
                self.advance();
                Ok(Expr::Ident(name, span))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                let items = self.parse_list(Token::RBracket, "']'")?;
                Ok(Expr::Array(items, span.to(self.prev_span())))
            }
            Token::LBrace => self.parse_object(),
            other => Err(self.error(format!("Expected expression, found {}", describe(&other)))),
        }
    }

    fn parse_object(&mut self) -> Result<Expr> {
        let start = self.span();
        self.expect(Token::LBrace, "'{'")?;
        let mut props = Vec::new();
        while !self.check(&Token::RBrace) {
            let key_span = self.span();
            let key = match self.peek().clone() {
                Token::String(s) => {
                    self.advance();
                    s
                }
                Token::Number(n) => {
                    self.advance();
                    crate::value::format_number(n)
                }
                _ => self.property_name()?,
            };
            let value = if self.consume(&Token::Colon) {
                self.parse_expression()?
            } else {
                Expr::Ident(key.clone(), key_span)
            };
            props.push(Property { key, value });
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(Expr::Object(props, start.to(self.prev_span())))
    }

    /// Split a template body into literal text and `${...}` expressions
    fn parse_template(&mut self, raw: &str, span: Span) -> Result<Vec<TemplatePart>> {
        let mut parts = Vec::new();
        let mut text = String::new();
        let bytes = raw.as_bytes();
        let body_offset = span.start + 1;
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] == b'\\' && i + 1 < bytes.len() {
                text.push_str(&raw[i..i + 2]);
                i += 2;
                continue;
            }
            if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
                let expr_start = i + 2;
                let mut depth = 1usize;
                let mut j = expr_start;
                while j < bytes.len() {
                    match bytes[j] {
                        b'{' => depth += 1,
                        b'}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    j += 1;
                }
                if depth != 0 {
                    return Err(ScriptError::ParserError {
                        span,
                        message: "Unterminated ${ in template string".to_string(),
                    });
                }

                if !text.is_empty() {
                    parts.push(TemplatePart::Text(unescape_template(&text)));
                    text.clear();
                }
                let tokens = tokenize_at(&raw[expr_start..j], body_offset + expr_start)?;
                let mut inner = Parser::new(&tokens);
                inner.depth = self.depth;
                inner.fn_depth = self.fn_depth;
                let expr = inner.parse_expression()?;
                if !inner.is_eof() {
                    return Err(inner.error("Unexpected token in template expression".to_string()));
                }
                self.top_level_await |= inner.top_level_await;
                parts.push(TemplatePart::Expr(expr));
                i = j + 1;
                continue;
            }
            let ch_len = raw[i..].chars().next().map(char::len_utf8).unwrap_or(1);
            text.push_str(&raw[i..i + ch_len]);
            i += ch_len;
        }

        if !text.is_empty() {
            parts.push(TemplatePart::Text(unescape_template(&text)));
        }
        Ok(parts)
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Eof => "end of input".to_string(),
        Token::Identifier(name) => format!("identifier '{}'", name),
        Token::Number(n) => format!("number {}", n),
        Token::String(s) => format!("string \"{}\"", s),
        Token::Template(_) => "template string".to_string(),
        other => match other.keyword_text() {
            Some(kw) => format!("keyword '{}'", kw),
            None => format!("{:?}", other),
        },
    }
}

/// Parse tokens into a program
pub fn parse(tokens: &[SpannedToken]) -> Result<Program> {
    Parser::new(tokens).parse_program()
}

/// Tokenize and parse snippet text
pub fn parse_source(source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    parse(&tokens)
}

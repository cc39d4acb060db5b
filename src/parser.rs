use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::ast::{BinaryOperator, Expression, FunctionDef, Program, Statement};
use crate::lexer::{self, Token, TokenKind};

/// A recoverable syntax problem found while parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct Diagnostic {
    pub message: String,
    pub line: usize,
}

/// Every diagnostic of one parse, displayed one per line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, diagnostic) in self.0.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

/// Outcome of a parse. The program is best effort when `diagnostics` is not
/// empty and must not be handed to the code generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseResult {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn into_program(self) -> Result<Program, Diagnostics> {
        if self.diagnostics.is_empty() {
            Ok(self.program)
        } else {
            Err(Diagnostics(self.diagnostics))
        }
    }
}

/// The current statement was abandoned after a diagnostic was recorded.
struct Abandon;

type ParseStep<T> = Result<T, Abandon>;

/// Deepest combined nesting of blocks, brackets and `**` chains.
const MAX_NESTING: usize = 200;

pub struct Parser<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    in_function: bool,
    depth: usize,
}

impl<'t, 'a> Parser<'t, 'a> {
    pub fn new(tokens: &'t [Token<'a>]) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            in_function: false,
            depth: 0,
        }
    }

    pub fn parse_program(mut self) -> ParseResult {
        let mut program = Program::default();
        loop {
            self.skip_newlines();
            let Some(kind) = self.current_kind() else {
                break;
            };
            let start = self.pos;
            match kind {
                TokenKind::Def => match self.parse_function_def() {
                    Ok(function) => program.functions.push(function),
                    Err(Abandon) => self.synchronize(start),
                },
                TokenKind::Dedent => {
                    let line = self.current_line();
                    self.record("Unexpected token DEDENT", line);
                    self.pos += 1;
                }
                _ => match self.parse_statement() {
                    Ok(statement) => program.statements.push(statement),
                    Err(Abandon) => self.synchronize(start),
                },
            }
        }
        ParseResult {
            program,
            diagnostics: self.diagnostics,
        }
    }

    fn parse_function_def(&mut self) -> ParseStep<FunctionDef> {
        self.eat(TokenKind::Def)?;
        let (name, params) = match self.current_kind() {
            Some(TokenKind::Main) => {
                let line = self.advance().map(Token::line).unwrap_or_default();
                let mut params = Vec::new();
                if self.check(TokenKind::LParen) {
                    self.advance();
                    params = self.parse_parameters()?;
                    self.eat(TokenKind::RParen)?;
                }
                if !params.is_empty() {
                    self.record("'main' does not take parameters", line);
                    params.clear();
                }
                ("main".to_string(), params)
            }
            Some(TokenKind::Identifier) => {
                let name = self.eat(TokenKind::Identifier)?.lexeme.to_string();
                self.eat(TokenKind::LParen)?;
                let params = self.parse_parameters()?;
                self.eat(TokenKind::RParen)?;
                (name, params)
            }
            _ => return Err(self.error_here("function name")),
        };
        self.eat(TokenKind::Colon)?;

        let enclosing = std::mem::replace(&mut self.in_function, true);
        let body = self.parse_block(false);
        self.in_function = enclosing;
        let body = body?;

        debug!(name = %name, params = params.len(), "parsed function");
        Ok(FunctionDef { name, params, body })
    }

    fn parse_parameters(&mut self) -> ParseStep<Vec<String>> {
        let mut params: Vec<String> = Vec::new();
        if self.check(TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let token = self.eat(TokenKind::Identifier)?;
            if params.iter().any(|param| param == token.lexeme) {
                self.record(
                    format!("duplicate parameter '{}'", token.lexeme),
                    token.line(),
                );
            } else {
                params.push(token.lexeme.to_string());
            }
            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(params)
    }

    /// Parses the suite after a `:`: either an indented block or a single
    /// statement on the same line. `if_clause` marks the body of an `if` or
    /// `elif`, where an `elif`/`else` before the closing DEDENT is misaligned.
    fn parse_block(&mut self, if_clause: bool) -> ParseStep<Vec<Statement>> {
        self.nested(|parser| parser.parse_suite(if_clause))
    }

    fn parse_suite(&mut self, if_clause: bool) -> ParseStep<Vec<Statement>> {
        if !matches!(
            self.current_kind(),
            None | Some(TokenKind::Newline | TokenKind::Indent)
        ) {
            return Ok(vec![self.parse_statement()?]);
        }

        self.skip_newlines();
        self.eat(TokenKind::Indent)?;

        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            match self.current_kind() {
                None => break,
                Some(TokenKind::Dedent) => {
                    self.advance();
                    break;
                }
                Some(kind @ (TokenKind::Elif | TokenKind::Else)) if if_clause => {
                    let start = self.pos;
                    let keyword = if kind == TokenKind::Elif { "elif" } else { "else" };
                    let line = self.current_line();
                    self.record(format!("'{keyword}' is not aligned with its 'if'"), line);
                    self.synchronize(start);
                }
                Some(_) => {
                    let start = self.pos;
                    match self.parse_statement() {
                        Ok(statement) => statements.push(statement),
                        Err(Abandon) => self.synchronize(start),
                    }
                }
            }
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> ParseStep<Statement> {
        let Some(token) = self.current() else {
            return Err(self.error_here("statement"));
        };
        match token.kind {
            TokenKind::Print => self.parse_print(),
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            TokenKind::While => self.parse_while(),
            TokenKind::Identifier => self.parse_assignment_or_call(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Elif | TokenKind::Else => {
                self.record(
                    format!("'{}' without a matching 'if'", token.lexeme),
                    token.line(),
                );
                Err(Abandon)
            }
            TokenKind::Def => {
                self.record(
                    "function definitions are only allowed at the top level",
                    token.line(),
                );
                Err(Abandon)
            }
            TokenKind::Error => Err(self.error_here("statement")),
            _ => {
                self.record(format!("Unexpected token {token}"), token.line());
                Err(Abandon)
            }
        }
    }

    fn parse_print(&mut self) -> ParseStep<Statement> {
        self.eat(TokenKind::Print)?;
        self.eat(TokenKind::LParen)?;
        let args = self.parse_arguments(TokenKind::RParen)?;
        self.eat(TokenKind::RParen)?;
        self.expect_statement_end()?;
        Ok(Statement::Print { args })
    }

    fn parse_if(&mut self) -> ParseStep<Statement> {
        self.eat(TokenKind::If)?;
        let condition = self.parse_expression()?;
        self.eat(TokenKind::Colon)?;
        let then_block = self.parse_block(true)?;

        let mut elif_clauses = Vec::new();
        let mut else_block = None;
        loop {
            self.skip_newlines();
            match self.current_kind() {
                Some(TokenKind::Elif) => {
                    self.advance();
                    let condition = self.parse_expression()?;
                    self.eat(TokenKind::Colon)?;
                    elif_clauses.push((condition, self.parse_block(true)?));
                }
                Some(TokenKind::Else) => {
                    self.advance();
                    self.eat(TokenKind::Colon)?;
                    else_block = Some(self.parse_block(false)?);
                    break;
                }
                _ => break,
            }
        }

        Ok(Statement::If {
            condition,
            then_block,
            elif_clauses,
            else_block,
        })
    }

    fn parse_while(&mut self) -> ParseStep<Statement> {
        self.eat(TokenKind::While)?;
        let condition = self.parse_expression()?;
        self.eat(TokenKind::Colon)?;
        let body = self.parse_block(false)?;
        Ok(Statement::While { condition, body })
    }

    fn parse_for(&mut self) -> ParseStep<Statement> {
        self.eat(TokenKind::For)?;
        let var = self.eat(TokenKind::Identifier)?.lexeme.to_string();
        self.eat(TokenKind::In)?;
        let iterable = self.parse_expression()?;
        self.eat(TokenKind::Colon)?;
        let body = self.parse_block(false)?;
        Ok(Statement::For {
            var,
            iterable,
            body,
        })
    }

    fn parse_assignment_or_call(&mut self) -> ParseStep<Statement> {
        if self.peek_kind() == Some(TokenKind::LParen) {
            let call = self.parse_call()?;
            self.expect_statement_end()?;
            return Ok(Statement::Expression(call));
        }

        let target = self.eat(TokenKind::Identifier)?.lexeme.to_string();
        let augmented = match self.current_kind() {
            Some(TokenKind::Assign) => None,
            Some(TokenKind::PlusAssign) => Some(BinaryOperator::Add),
            Some(TokenKind::MinusAssign) => Some(BinaryOperator::Sub),
            Some(TokenKind::StarAssign) => Some(BinaryOperator::Mul),
            Some(TokenKind::SlashAssign) => Some(BinaryOperator::Div),
            Some(TokenKind::PercentAssign) => Some(BinaryOperator::Mod),
            _ => return Err(self.error_here("assignment")),
        };
        self.advance();
        let value = self.parse_expression()?;
        self.expect_statement_end()?;

        Ok(match augmented {
            None => Statement::Assign { target, value },
            Some(op) => Statement::AugmentedAssign { target, op, value },
        })
    }

    fn parse_return(&mut self) -> ParseStep<Statement> {
        let line = self.eat(TokenKind::Return)?.line();
        let value = if self.at_statement_end() {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_statement_end()?;

        if !self.in_function {
            self.record("'return' outside function", line);
            return Err(Abandon);
        }
        Ok(Statement::Return(value))
    }

    fn parse_expression(&mut self) -> ParseStep<Expression> {
        self.nested(Self::parse_additive)
    }

    fn parse_additive(&mut self) -> ParseStep<Expression> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.current_kind() {
                Some(TokenKind::Plus) => BinaryOperator::Add,
                Some(TokenKind::Minus) => BinaryOperator::Sub,
                Some(TokenKind::Greater) => BinaryOperator::Greater,
                Some(TokenKind::Less) => BinaryOperator::Less,
                Some(TokenKind::Eq) => BinaryOperator::Eq,
                Some(TokenKind::NotEq) => BinaryOperator::NotEq,
                Some(TokenKind::LessEq) => BinaryOperator::LessEq,
                Some(TokenKind::GreaterEq) => BinaryOperator::GreaterEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            expr = Expression::BinaryOp {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> ParseStep<Expression> {
        let mut expr = self.parse_power()?;
        loop {
            let op = match self.current_kind() {
                Some(TokenKind::Star) => BinaryOperator::Mul,
                Some(TokenKind::Slash) => BinaryOperator::Div,
                Some(TokenKind::Percent) => BinaryOperator::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_power()?;
            expr = Expression::BinaryOp {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_power(&mut self) -> ParseStep<Expression> {
        let base = self.parse_atom()?;
        if !self.check(TokenKind::StarStar) {
            return Ok(base);
        }
        self.advance();
        let exponent = self.nested(Self::parse_power)?;
        Ok(Expression::BinaryOp {
            left: Box::new(base),
            op: BinaryOperator::Pow,
            right: Box::new(exponent),
        })
    }

    fn parse_atom(&mut self) -> ParseStep<Expression> {
        let Some(token) = self.current() else {
            return Err(self.error_here("expression"));
        };
        match token.kind {
            TokenKind::Identifier | TokenKind::Main
                if self.peek_kind() == Some(TokenKind::LParen) =>
            {
                self.parse_call()
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expression::Identifier(token.lexeme.to_string()))
            }
            TokenKind::Number => {
                self.advance();
                match token.lexeme.parse::<i64>() {
                    Ok(value) => Ok(Expression::Number(value)),
                    Err(_) => {
                        self.record(
                            format!("integer literal '{}' is out of range", token.lexeme),
                            token.line(),
                        );
                        Err(Abandon)
                    }
                }
            }
            TokenKind::Float => {
                self.advance();
                match token.lexeme.parse::<f64>() {
                    Ok(value) => Ok(Expression::Float(value)),
                    Err(_) => {
                        self.record(
                            format!("invalid float literal '{}'", token.lexeme),
                            token.line(),
                        );
                        Err(Abandon)
                    }
                }
            }
            TokenKind::String => {
                self.advance();
                let quoted = token.lexeme;
                Ok(Expression::String(quoted[1..quoted.len() - 1].to_string()))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::Bool(false))
            }
            TokenKind::LBracket => {
                self.advance();
                let elements = self.parse_arguments(TokenKind::RBracket)?;
                self.eat(TokenKind::RBracket)?;
                Ok(Expression::List(elements))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.eat(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::Range => {
                self.advance();
                self.eat(TokenKind::LParen)?;
                let args = self.parse_arguments(TokenKind::RParen)?;
                self.eat(TokenKind::RParen)?;
                if !(1..=3).contains(&args.len()) {
                    self.record(
                        format!("range expects 1 to 3 arguments, got {}", args.len()),
                        token.line(),
                    );
                    return Err(Abandon);
                }
                Ok(Expression::Range { args })
            }
            _ => Err(self.error_here("expression")),
        }
    }

    fn parse_call(&mut self) -> ParseStep<Expression> {
        let name = self
            .advance()
            .map(|token| token.lexeme.to_string())
            .unwrap_or_default();
        self.eat(TokenKind::LParen)?;
        let args = self.parse_arguments(TokenKind::RParen)?;
        self.eat(TokenKind::RParen)?;
        Ok(Expression::Call { name, args })
    }

    /// Comma separated expressions up to (not including) `close`.
    fn parse_arguments(&mut self, close: TokenKind) -> ParseStep<Vec<Expression>> {
        let mut args = Vec::new();
        while !self.check(close) {
            args.push(self.parse_expression()?);
            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(args)
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.current_kind(),
            None | Some(TokenKind::Newline | TokenKind::Dedent)
        )
    }

    fn expect_statement_end(&mut self) -> ParseStep<()> {
        if self.at_statement_end() {
            Ok(())
        } else {
            Err(self.error_here("end of statement"))
        }
    }

    /// Skips the rest of an abandoned statement: always moves past at least
    /// one token, then to the end of the line and over any block indented
    /// under it.
    fn synchronize(&mut self, start: usize) {
        if self.pos == start {
            if self.check(TokenKind::Indent) {
                self.skip_indented_block();
                return;
            }
            self.pos += 1;
        }
        while let Some(kind) = self.current_kind() {
            match kind {
                TokenKind::Newline => {
                    self.pos += 1;
                    break;
                }
                TokenKind::Dedent => return,
                _ => self.pos += 1,
            }
        }
        self.skip_newlines();
        if self.check(TokenKind::Indent) {
            self.skip_indented_block();
        }
    }

    fn skip_indented_block(&mut self) {
        let mut depth = 0usize;
        while let Some(kind) = self.current_kind() {
            self.pos += 1;
            match kind {
                TokenKind::Indent => depth += 1,
                TokenKind::Dedent => {
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    /// Runs `parse` one nesting level deeper, refusing past [`MAX_NESTING`].
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseStep<T>) -> ParseStep<T> {
        if self.depth >= MAX_NESTING {
            let line = self.current_line();
            self.record("nesting too deep", line);
            return Err(Abandon);
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: TokenKind) -> ParseStep<&'t Token<'a>> {
        match self.current() {
            Some(token) if token.kind == expected => {
                self.pos += 1;
                Ok(token)
            }
            _ => Err(self.error_here(expected.name())),
        }
    }

    /// Records an expected-vs-found diagnostic at the current token without
    /// consuming it.
    fn error_here(&mut self, expected: &str) -> Abandon {
        let line = self.current_line();
        let message = match self.current() {
            Some(token) if token.kind == TokenKind::Error => {
                format!("Unrecognized input '{}'", token.lexeme.escape_debug())
            }
            Some(token) => format!("Expected {expected}, found {token}"),
            None => format!("Expected {expected}, found end of input"),
        };
        self.record(message, line);
        Abandon
    }

    fn record(&mut self, message: impl Into<String>, line: usize) {
        let message = message.into();
        debug!(line, %message, "syntax diagnostic");
        self.diagnostics.push(Diagnostic { message, line });
    }

    fn current(&self) -> Option<&'t Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn current_kind(&self) -> Option<TokenKind> {
        self.current().map(|token| token.kind)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos + 1).map(|token| token.kind)
    }

    fn current_line(&self) -> usize {
        self.current()
            .or_else(|| self.tokens.last())
            .map(Token::line)
            .unwrap_or(1)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current_kind() == Some(kind)
    }

    fn advance(&mut self) -> Option<&'t Token<'a>> {
        let token = self.current();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}

pub fn parse_tokens(tokens: &[Token<'_>]) -> ParseResult {
    Parser::new(tokens).parse_program()
}

pub fn parse(input: &str) -> ParseResult {
    parse_tokens(&lexer::tokenize(input))
}

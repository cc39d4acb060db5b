use std::{iter::Peekable, str::CharIndices};

use tracing::trace;

pub mod token;

pub use token::{Span, Token, TokenKind};

const TAB_WIDTH: usize = 4;

/// Operator spellings in match order. A spelling must come before every
/// shorter spelling that is a prefix of it.
const OPERATORS: &[(&str, TokenKind)] = &[
    ("**", TokenKind::StarStar),
    ("==", TokenKind::Eq),
    ("!=", TokenKind::NotEq),
    ("<=", TokenKind::LessEq),
    (">=", TokenKind::GreaterEq),
    ("+=", TokenKind::PlusAssign),
    ("-=", TokenKind::MinusAssign),
    ("*=", TokenKind::StarAssign),
    ("/=", TokenKind::SlashAssign),
    ("%=", TokenKind::PercentAssign),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("<", TokenKind::Less),
    (">", TokenKind::Greater),
    ("=", TokenKind::Assign),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    (":", TokenKind::Colon),
    (",", TokenKind::Comma),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
];

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    indent_stack: Vec<usize>,
    tokens: Vec<Token<'a>>,
    at_line_start: bool,
    bracket_depth: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            indent_stack: vec![0],
            tokens: Vec::new(),
            at_line_start: true,
            bracket_depth: 0,
            line: 1,
            column: 0,
        }
    }

    pub fn tokenize(mut self) -> Vec<Token<'a>> {
        loop {
            if self.at_line_start {
                self.at_line_start = false;
                if self.bracket_depth == 0 {
                    self.measure_indentation();
                }
            }

            self.skip_whitespace();

            let Some(&(start_idx, ch)) = self.chars.peek() else {
                break;
            };

            let start_line = self.line;
            let start_column = self.column;
            match ch {
                '\n' => {
                    self.advance_char();
                    self.at_line_start = true;
                    if self.bracket_depth == 0 {
                        self.push(TokenKind::Newline, start_idx, start_line, start_column);
                    }
                }
                '#' => self.skip_line_comment(),
                '"' | '\'' if self.rest_starts_with_triple_quote(start_idx, ch) => {
                    self.read_block_comment(start_idx, ch, start_line, start_column);
                }
                '"' | '\'' => self.read_string(start_idx, ch, start_line, start_column),
                c if c.is_ascii_alphabetic() || c == '_' => {
                    self.read_identifier(start_idx, start_line, start_column);
                }
                c if c.is_ascii_digit() => self.read_number(start_idx, start_line, start_column),
                _ => self.read_operator(start_idx, ch, start_line, start_column),
            }
        }

        // Close every block still open at end of input.
        let index = self.input.len();
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push_zero_width(TokenKind::Dedent, index);
        }

        self.tokens
    }

    /// Compares the leading whitespace of the line about to be scanned with
    /// the indentation stack and emits INDENT / DEDENT tokens for the change.
    fn measure_indentation(&mut self) {
        let mut lookahead = self.chars.clone();
        let mut width = 0;
        let mut ignorable_line = true;
        while let Some(&(idx, c)) = lookahead.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\r' => {}
                '\n' | '#' => break,
                '"' | '\'' if self.rest_starts_with_triple_quote(idx, c) => break,
                _ => {
                    ignorable_line = false;
                    break;
                }
            }
            lookahead.next();
        }
        if ignorable_line {
            // Blank and comment-only lines never open or close blocks.
            return;
        }

        let start = self.current_index();
        self.skip_whitespace();
        let end = self.current_index();
        let top = self.current_indent();

        if width > top {
            self.indent_stack.push(width);
            self.tokens.push(Token::new(
                TokenKind::Indent,
                &self.input[start..end],
                Span {
                    start,
                    end,
                    line: self.line,
                    column: 0,
                },
            ));
            return;
        }

        while self.current_indent() > width {
            self.indent_stack.pop();
            self.push_zero_width(TokenKind::Dedent, end);
        }
        if self.current_indent() != width {
            trace!(line = self.line, width, "inconsistent dedent");
            self.tokens.push(Token::new(
                TokenKind::Error,
                &self.input[start..end],
                Span {
                    start,
                    end,
                    line: self.line,
                    column: 0,
                },
            ));
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == ' ' || c == '\t' || c == '\r' || (c == '\n' && self.bracket_depth > 0) {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.advance_char();
        }
    }

    fn rest_starts_with_triple_quote(&self, idx: usize, quote: char) -> bool {
        let triple = if quote == '"' { "\"\"\"" } else { "'''" };
        self.input[idx..].starts_with(triple)
    }

    fn read_block_comment(&mut self, start: usize, quote: char, line: usize, column: usize) {
        let delimiter = if quote == '"' { "\"\"\"" } else { "'''" };
        let body_start = start + delimiter.len();
        for _ in 0..delimiter.len() {
            self.advance_char();
        }
        match self.input[body_start..].find(delimiter) {
            Some(offset) => {
                let end = body_start + offset + delimiter.len();
                while self.current_index() < end {
                    self.advance_char();
                }
            }
            None => {
                while self.advance_char().is_some() {}
                self.tokens.push(Token::new(
                    TokenKind::Error,
                    delimiter,
                    Span {
                        start,
                        end: body_start,
                        line,
                        column,
                    },
                ));
            }
        }
    }

    fn read_identifier(&mut self, start: usize, line: usize, column: usize) {
        self.advance_char(); // Consume first char
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance_char();
            } else {
                break;
            }
        }

        let end = self.current_index();
        let word = &self.input[start..end];
        let kind = TokenKind::keyword(word).unwrap_or(TokenKind::Identifier);
        self.tokens.push(Token::new(
            kind,
            word,
            Span {
                start,
                end,
                line,
                column,
            },
        ));
    }

    fn read_number(&mut self, start: usize, line: usize, column: usize) {
        self.consume_digits();

        let mut kind = TokenKind::Number;
        let mut lookahead = self.chars.clone();
        if let Some((_, '.')) = lookahead.next()
            && let Some((_, digit)) = lookahead.next()
            && digit.is_ascii_digit()
        {
            self.advance_char(); // Consume '.'
            self.consume_digits();
            kind = TokenKind::Float;
        }

        let end = self.current_index();
        self.tokens.push(Token::new(
            kind,
            &self.input[start..end],
            Span {
                start,
                end,
                line,
                column,
            },
        ));
    }

    fn consume_digits(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self, start: usize, quote: char, line: usize, column: usize) {
        self.advance_char(); // Consume opening quote
        let mut kind = TokenKind::Error;
        while let Some(&(_, c)) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.advance_char();
            if c == quote {
                kind = TokenKind::String;
                break;
            }
        }

        let end = self.current_index();
        self.tokens.push(Token::new(
            kind,
            &self.input[start..end],
            Span {
                start,
                end,
                line,
                column,
            },
        ));
    }

    fn read_operator(&mut self, start: usize, ch: char, line: usize, column: usize) {
        let rest = &self.input[start..];
        let (lexeme, kind) = match OPERATORS
            .iter()
            .find(|(spelling, _)| rest.starts_with(spelling))
        {
            Some(&(spelling, kind)) => (&rest[..spelling.len()], kind),
            None => (&rest[..ch.len_utf8()], TokenKind::Error),
        };

        for _ in lexeme.chars() {
            self.advance_char();
        }
        match kind {
            TokenKind::LParen | TokenKind::LBracket => self.bracket_depth += 1,
            TokenKind::RParen | TokenKind::RBracket => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
            }
            _ => {}
        }

        let end = start + lexeme.len();
        self.tokens.push(Token::new(
            kind,
            &self.input[start..end],
            Span {
                start,
                end,
                line,
                column,
            },
        ));
    }

    fn push(&mut self, kind: TokenKind, start: usize, line: usize, column: usize) {
        let end = self.current_index();
        self.tokens.push(Token::new(
            kind,
            &self.input[start..end],
            Span {
                start,
                end,
                line,
                column,
            },
        ));
    }

    fn push_zero_width(&mut self, kind: TokenKind, index: usize) {
        self.tokens.push(Token::new(
            kind,
            "",
            Span {
                start: index,
                end: index,
                line: self.line,
                column: self.column,
            },
        ));
    }

    fn current_indent(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    fn advance_char(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn current_index(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(idx, _)| *idx)
            .unwrap_or(self.input.len())
    }
}

/// Splits `input` into significant tokens. Never fails: input that matches
/// no rule becomes an [`TokenKind::Error`] token for the parser to report.
pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    Lexer::new(input).tokenize()
}

//! Hand-written recursive-descent parser for path expressions.
//!
//! ```text
//! expression  := alternative ( '|' alternative )*
//! alternative := '(' path ')' | path
//! path        := '$' tail? | step tail?
//! tail        := ( '.' step | '[' bracket ']' )+
//! step        := '*' | key
//! bracket     := '*' | digits | quoted-key
//! ```

use super::Segment;
use crate::error::ConfigurationError;

/// One parsed alternative: its source text and addressing segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Alternative {
    pub(super) source: String,
    pub(super) segments: Vec<Segment>,
}

impl Alternative {
    pub(super) fn has_wildcard(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Wildcard))
    }
}

pub(super) fn parse_expression(src: &str) -> Result<Vec<Alternative>, ConfigurationError> {
    let mut parser = Parser::new(src);
    let mut alternatives = Vec::new();
    loop {
        alternatives.push(parser.alternative()?);
        parser.skip_ws();
        match parser.bump() {
            None => break,
            Some('|') => continue,
            Some(c) => return Err(parser.error(format!("unexpected '{c}'"))),
        }
    }
    Ok(alternatives)
}

struct Parser<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::InvalidPathExpression {
            expression: self.src.to_string(),
            reason: format!("{} (at offset {})", reason.into(), self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn alternative(&mut self) -> Result<Alternative, ConfigurationError> {
        self.skip_ws();
        if matches!(self.peek(), None | Some('|')) {
            return Err(self.error("empty alternative"));
        }
        let start = self.pos;
        let parenthesized = self.eat('(');
        self.skip_ws();
        let segments = self.path()?;
        self.skip_ws();
        if parenthesized && !self.eat(')') {
            return Err(self.error("unclosed parenthesis"));
        }
        let source: String = self.chars[start..self.pos].iter().collect();
        Ok(Alternative {
            source: source.trim().to_string(),
            segments,
        })
    }

    fn path(&mut self) -> Result<Vec<Segment>, ConfigurationError> {
        let mut segments = Vec::new();
        if self.eat('$') {
            if self.eat('.') {
                segments.push(self.step()?);
            }
        } else if self.peek() != Some('[') {
            segments.push(self.step()?);
        }

        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    segments.push(self.step()?);
                }
                Some('[') => {
                    self.pos += 1;
                    segments.push(self.bracket()?);
                }
                _ => break,
            }
        }
        Ok(segments)
    }

    fn step(&mut self) -> Result<Segment, ConfigurationError> {
        if self.eat('*') {
            return Ok(Segment::Wildcard);
        }
        let start = self.pos;
        while self.peek().is_some_and(is_key_char) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected a key"));
        }
        Ok(Segment::Key(self.chars[start..self.pos].iter().collect()))
    }

    fn bracket(&mut self) -> Result<Segment, ConfigurationError> {
        self.skip_ws();
        let segment = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Segment::Wildcard
            }
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != quote) {
                    self.pos += 1;
                }
                if !self.eat(quote) {
                    return Err(self.error("unterminated quoted key"));
                }
                Segment::Key(self.chars[start..self.pos - 1].iter().collect())
            }
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let digits: String = self.chars[start..self.pos].iter().collect();
                let index = digits
                    .parse::<usize>()
                    .map_err(|e| self.error(format!("bad index '{digits}': {e}")))?;
                Segment::Index(index)
            }
            Some(c) => return Err(self.error(format!("expected index, '*' or quoted key, found '{c}'"))),
            None => return Err(self.error("unclosed bracket")),
        };
        self.skip_ws();
        if !self.eat(']') {
            return Err(self.error("unclosed bracket"));
        }
        Ok(segment)
    }
}

fn is_key_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '.' | '[' | ']' | '(' | ')' | '|' | '$' | '*' | '\'' | '"')
}

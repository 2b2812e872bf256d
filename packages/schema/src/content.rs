//! # Content Patterns
//!
//! A node kind constrains the sequence of its children's kinds with a small
//! regular language:
//!
//! ```text
//! expr  := seq ("|" seq)*
//! seq   := term+
//! term  := atom quant*
//! atom  := NAME | "(" expr ")"
//! quant := "+" | "*" | "?" | "{" N "}" | "{" N "," "}" | "{" N "," M "}"
//! ```
//!
//! `NAME` is a node kind or a group; a group stands for every kind that
//! declares membership. Patterns compile to an NFA (Thompson construction)
//! that is simulated over the child kind sequence.

use crate::error::SchemaError;
use crate::tokenizer::{tokenize, Token};
use std::collections::{BTreeSet, HashMap};

/// Parsed pattern, before name resolution
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Name(String),
    Seq(Vec<Expr>),
    Choice(Vec<Expr>),
    Plus(Box<Expr>),
    Star(Box<Expr>),
    Opt(Box<Expr>),
    Range {
        expr: Box<Expr>,
        min: usize,
        max: Option<usize>,
    },
}

struct Parser<'src> {
    tokens: Vec<(Token<'src>, std::ops::Range<usize>)>,
    pos: usize,
    kind: &'src str,
    source_len: usize,
}

impl<'src> Parser<'src> {
    fn new(kind: &'src str, source: &'src str) -> Result<Self, SchemaError> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            kind,
            source_len: source.len(),
        })
    }

    fn parse(mut self) -> Result<Expr, SchemaError> {
        if self.tokens.is_empty() {
            return Ok(Expr::Seq(Vec::new()));
        }
        let expr = self.parse_choice()?;
        if let Some((token, span)) = self.peek() {
            return Err(self.error(span.start, format!("Unexpected {}", token)));
        }
        Ok(expr)
    }

    fn parse_choice(&mut self) -> Result<Expr, SchemaError> {
        let mut alternatives = vec![self.parse_seq()?];
        while self.match_token(&Token::Pipe) {
            alternatives.push(self.parse_seq()?);
        }
        Ok(if alternatives.len() == 1 {
            alternatives.remove(0)
        } else {
            Expr::Choice(alternatives)
        })
    }

    fn parse_seq(&mut self) -> Result<Expr, SchemaError> {
        let mut terms = Vec::new();
        while matches!(self.peek(), Some((Token::Name(_) | Token::LParen, _))) {
            terms.push(self.parse_term()?);
        }
        match terms.len() {
            0 => Err(self.error(self.peek_pos(), "Expected a node kind, group or '('")),
            1 => Ok(terms.remove(0)),
            _ => Ok(Expr::Seq(terms)),
        }
    }

    fn parse_term(&mut self) -> Result<Expr, SchemaError> {
        let mut expr = self.parse_atom()?;
        loop {
            expr = if self.match_token(&Token::Plus) {
                Expr::Plus(Box::new(expr))
            } else if self.match_token(&Token::Star) {
                Expr::Star(Box::new(expr))
            } else if self.match_token(&Token::Question) {
                Expr::Opt(Box::new(expr))
            } else if self.match_token(&Token::LBrace) {
                self.parse_range(expr)?
            } else {
                return Ok(expr);
            };
        }
    }

    fn parse_range(&mut self, expr: Expr) -> Result<Expr, SchemaError> {
        let min = self.expect_number()?;
        let max = if self.match_token(&Token::Comma) {
            if matches!(self.peek(), Some((Token::Number(_), _))) {
                Some(self.expect_number()?)
            } else {
                None
            }
        } else {
            Some(min)
        };
        if !self.match_token(&Token::RBrace) {
            return Err(self.error(self.peek_pos(), "Expected '}'"));
        }
        if let Some(max) = max {
            if max < min {
                return Err(self.error(self.peek_pos(), format!("Range {{{},{}}} is empty", min, max)));
            }
        }
        Ok(Expr::Range {
            expr: Box::new(expr),
            min,
            max,
        })
    }

    fn parse_atom(&mut self) -> Result<Expr, SchemaError> {
        match self.advance() {
            Some((Token::Name(name), _)) => Ok(Expr::Name(name.to_string())),
            Some((Token::LParen, _)) => {
                let inner = self.parse_choice()?;
                if !self.match_token(&Token::RParen) {
                    return Err(self.error(self.peek_pos(), "Expected ')'"));
                }
                Ok(inner)
            }
            Some((token, span)) => Err(self.error(span.start, format!("Unexpected {}", token))),
            None => Err(self.error(self.source_len, "Unexpected end of pattern")),
        }
    }

    fn expect_number(&mut self) -> Result<usize, SchemaError> {
        match self.advance() {
            Some((Token::Number(n), _)) => Ok(n),
            Some((token, span)) => Err(self.error(span.start, format!("Expected a number, found {}", token))),
            None => Err(self.error(self.source_len, "Expected a number")),
        }
    }

    fn peek(&self) -> Option<(Token<'src>, std::ops::Range<usize>)> {
        self.tokens.get(self.pos).cloned()
    }

    fn peek_pos(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or(self.source_len)
    }

    fn advance(&mut self) -> Option<(Token<'src>, std::ops::Range<usize>)> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn match_token(&mut self, token: &Token<'src>) -> bool {
        match self.tokens.get(self.pos) {
            Some((t, _)) if std::mem::discriminant(t) == std::mem::discriminant(token) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn error(&self, pos: usize, message: impl Into<String>) -> SchemaError {
        SchemaError::InvalidContentExpr {
            kind: self.kind.to_string(),
            pos,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Edge {
    /// Index into `ContentExpr::terms`; `None` is an epsilon edge
    term: Option<usize>,
    to: usize,
}

/// Compiled content pattern
#[derive(Debug, Clone)]
pub struct ContentExpr {
    source: String,
    terms: Vec<BTreeSet<String>>,
    states: Vec<Vec<Edge>>,
    accept: usize,
}

/// Why a child sequence failed to match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMismatch {
    /// Index of the first child that could not be consumed, or `None` when the
    /// sequence ended too early
    pub index: Option<usize>,
    /// Kinds that would have been accepted at that point
    pub expected: Vec<String>,
}

impl ContentExpr {
    /// Parse `source` and resolve its names against `groups`, a map from every
    /// node kind and group name to the set of kinds it stands for.
    pub fn compile(
        kind: &str,
        source: &str,
        groups: &HashMap<String, BTreeSet<String>>,
    ) -> Result<Self, SchemaError> {
        let expr = Parser::new(kind, source)?.parse()?;

        let mut content = Self {
            source: source.to_string(),
            terms: Vec::new(),
            states: vec![Vec::new()],
            accept: 0,
        };
        let end = content.build(&expr, 0, kind, groups)?;
        content.accept = end;
        Ok(content)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether no children is an acceptable sequence
    pub fn allows_empty(&self) -> bool {
        self.closure([0]).contains(&self.accept)
    }

    /// Run the automaton over a sequence of child kinds
    pub fn matches(&self, kinds: &[&str]) -> Result<(), ContentMismatch> {
        let mut current = self.closure([0]);

        for (index, kind) in kinds.iter().enumerate() {
            let mut next = Vec::new();
            for &state in &current {
                for edge in &self.states[state] {
                    if let Some(term) = edge.term {
                        if self.terms[term].contains(*kind) {
                            next.push(edge.to);
                        }
                    }
                }
            }
            if next.is_empty() {
                return Err(ContentMismatch {
                    index: Some(index),
                    expected: self.expected(&current),
                });
            }
            current = self.closure(next);
        }

        if current.contains(&self.accept) {
            Ok(())
        } else {
            Err(ContentMismatch {
                index: None,
                expected: self.expected(&current),
            })
        }
    }

    fn build(
        &mut self,
        expr: &Expr,
        from: usize,
        kind: &str,
        groups: &HashMap<String, BTreeSet<String>>,
    ) -> Result<usize, SchemaError> {
        match expr {
            Expr::Name(name) => {
                let kinds = groups
                    .get(name)
                    .ok_or_else(|| SchemaError::UnknownContentName {
                        kind: kind.to_string(),
                        name: name.clone(),
                    })?;
                self.terms.push(kinds.clone());
                let term = self.terms.len() - 1;
                let to = self.new_state();
                self.edge(from, Some(term), to);
                Ok(to)
            }
            Expr::Seq(items) => {
                let mut cur = from;
                for item in items {
                    cur = self.build(item, cur, kind, groups)?;
                }
                Ok(cur)
            }
            Expr::Choice(alternatives) => {
                let to = self.new_state();
                for alt in alternatives {
                    let end = self.build(alt, from, kind, groups)?;
                    self.edge(end, None, to);
                }
                Ok(to)
            }
            Expr::Star(inner) => self.build_loop(inner, from, kind, groups),
            Expr::Plus(inner) => {
                let once = self.build(inner, from, kind, groups)?;
                self.build_loop(inner, once, kind, groups)
            }
            Expr::Opt(inner) => {
                let to = self.new_state();
                self.edge(from, None, to);
                let end = self.build(inner, from, kind, groups)?;
                self.edge(end, None, to);
                Ok(to)
            }
            Expr::Range { expr, min, max } => {
                let mut cur = from;
                for _ in 0..*min {
                    cur = self.build(expr, cur, kind, groups)?;
                }
                match max {
                    None => self.build_loop(expr, cur, kind, groups),
                    Some(max) => {
                        for _ in *min..*max {
                            let next = self.new_state();
                            self.edge(cur, None, next);
                            let end = self.build(expr, cur, kind, groups)?;
                            self.edge(end, None, next);
                            cur = next;
                        }
                        Ok(cur)
                    }
                }
            }
        }
    }

    // Zero or more repetitions of `inner` starting at `from`
    fn build_loop(
        &mut self,
        inner: &Expr,
        from: usize,
        kind: &str,
        groups: &HashMap<String, BTreeSet<String>>,
    ) -> Result<usize, SchemaError> {
        let hub = self.new_state();
        self.edge(from, None, hub);
        let end = self.build(inner, hub, kind, groups)?;
        self.edge(end, None, hub);
        Ok(hub)
    }

    fn new_state(&mut self) -> usize {
        self.states.push(Vec::new());
        self.states.len() - 1
    }

    fn edge(&mut self, from: usize, term: Option<usize>, to: usize) {
        self.states[from].push(Edge { term, to });
    }

    fn closure(&self, start: impl IntoIterator<Item = usize>) -> Vec<usize> {
        let mut seen = vec![false; self.states.len()];
        let mut stack: Vec<usize> = start.into_iter().collect();
        let mut out = Vec::new();
        while let Some(state) = stack.pop() {
            if seen[state] {
                continue;
            }
            seen[state] = true;
            out.push(state);
            for edge in &self.states[state] {
                if edge.term.is_none() && !seen[edge.to] {
                    stack.push(edge.to);
                }
            }
        }
        out
    }

    fn expected(&self, states: &[usize]) -> Vec<String> {
        let mut kinds = BTreeSet::new();
        for &state in states {
            for edge in &self.states[state] {
                if let Some(term) = edge.term {
                    kinds.extend(self.terms[term].iter().cloned());
                }
            }
        }
        kinds.into_iter().collect()
    }
}

//! # CQL Compiler
//!
//! Purpose: Parse CQL into the canonical RPN tree, mapping indexes and
//! relations through a context profile.
//!
//! The grammar covers boolean `and`/`or`/`not`/`prox` at equal precedence
//! (left associative), parenthesized subqueries, and
//! `index relation term` clauses where the relation is a comparison
//! symbol or the word relations `all`/`any`. A bare term searches the
//! `cql.serverChoice` index. The profile decides which attributes an
//! index compiles to; a connection contributes nothing but its profile.

use std::collections::HashMap;

use crate::error::{QueryError, QueryResult};
use crate::rpn::{Attribute, BoolOp, ProxSpec, Query, RpnNode, RpnTerm};

/// Context profile mapping CQL index names to RPN attributes.
///
/// Lookup is case-insensitive. The default profile carries the well-known
/// `dc`/`bath` indexes; server-specific profiles come from connection
/// options.
#[derive(Debug, Clone)]
pub struct CqlProfile {
    indexes: HashMap<String, Vec<Attribute>>,
}

impl CqlProfile {
    /// Creates an empty profile with no index mappings.
    pub fn empty() -> Self {
        CqlProfile {
            indexes: HashMap::new(),
        }
    }

    /// Adds or replaces an index mapping; `attrs` is a space-separated
    /// list of `type=value` pairs, e.g. `"1=4 6=1"`.
    pub fn add(&mut self, index: &str, attrs: &str) -> QueryResult<()> {
        let mut parsed = Vec::new();
        for pair in attrs.split_whitespace() {
            let attr = pair
                .split_once('=')
                .and_then(|(k, v)| {
                    Some(Attribute::numeric(k.parse().ok()?, v.parse().ok()?))
                })
                .ok_or_else(|| {
                    QueryError::syntax(format!("malformed attribute pair '{pair}'"), 0)
                })?;
            parsed.push(attr);
        }
        self.indexes.insert(index.to_ascii_lowercase(), parsed);
        Ok(())
    }

    /// Returns the attributes for an index, if mapped.
    pub fn lookup(&self, index: &str) -> Option<&[Attribute]> {
        self.indexes
            .get(&index.to_ascii_lowercase())
            .map(Vec::as_slice)
    }
}

impl Default for CqlProfile {
    fn default() -> Self {
        let mut profile = CqlProfile::empty();
        let defaults: &[(&str, &str)] = &[
            ("cql.serverChoice", "1=1016"),
            ("cql.anywhere", "1=1035"),
            ("dc.title", "1=4"),
            ("title", "1=4"),
            ("dc.creator", "1=1003"),
            ("creator", "1=1003"),
            ("author", "1=1003"),
            ("dc.subject", "1=21"),
            ("subject", "1=21"),
            ("dc.date", "1=30"),
            ("date", "1=30"),
            ("dc.identifier", "1=12"),
            ("bath.isbn", "1=7"),
            ("isbn", "1=7"),
            ("bath.issn", "1=8"),
            ("issn", "1=8"),
        ];
        for (index, attrs) in defaults {
            profile.add(index, attrs).expect("static profile entry");
        }
        profile
    }
}

impl Query {
    /// Compiles a CQL string against the built-in default context.
    pub fn from_cql(input: &str) -> QueryResult<Query> {
        Query::from_cql_with(input, &CqlProfile::default())
    }

    /// Compiles a CQL string against a caller-supplied context profile.
    pub fn from_cql_with(input: &str, profile: &CqlProfile) -> QueryResult<Query> {
        let tokens = tokenize(input)?;
        let mut parser = CqlParser {
            tokens,
            idx: 0,
            end: input.len(),
            profile,
        };
        let node = parser.parse_query()?;
        if let Some(tok) = parser.peek() {
            return Err(QueryError::syntax(
                format!("unexpected token '{}' after query", tok.render()),
                tok.pos,
            ));
        }
        Ok(Query::from_node(node))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokKind {
    LParen,
    RParen,
    Relation(String),
    Word(String),
}

#[derive(Debug, Clone)]
struct Tok {
    kind: TokKind,
    pos: usize,
}

impl Tok {
    fn render(&self) -> String {
        match &self.kind {
            TokKind::LParen => "(".into(),
            TokKind::RParen => ")".into(),
            TokKind::Relation(r) => r.clone(),
            TokKind::Word(w) => w.clone(),
        }
    }
}

fn tokenize(input: &str) -> QueryResult<Vec<Tok>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let pos = i;
        match bytes[i] {
            b if b.is_ascii_whitespace() => {
                i += 1;
            }
            b'(' => {
                tokens.push(Tok {
                    kind: TokKind::LParen,
                    pos,
                });
                i += 1;
            }
            b')' => {
                tokens.push(Tok {
                    kind: TokKind::RParen,
                    pos,
                });
                i += 1;
            }
            b'=' | b'<' | b'>' => {
                let next = bytes.get(i + 1).copied();
                let two = match (bytes[i], next) {
                    (b'=', Some(b'=')) => true,
                    (b'<', Some(b'=')) | (b'<', Some(b'>')) => true,
                    (b'>', Some(b'=')) => true,
                    _ => false,
                };
                let len = if two { 2 } else { 1 };
                tokens.push(Tok {
                    kind: TokKind::Relation(input[i..i + len].to_owned()),
                    pos,
                });
                i += len;
            }
            b'"' => {
                let (text, next) = crate::lex::lex_quoted(input, pos)?;
                i = next;
                tokens.push(Tok {
                    kind: TokKind::Word(text),
                    pos,
                });
            }
            _ => {
                let start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(bytes[i], b'(' | b')' | b'=' | b'<' | b'>' | b'"')
                {
                    i += 1;
                }
                tokens.push(Tok {
                    kind: TokKind::Word(input[start..i].to_owned()),
                    pos,
                });
            }
        }
    }
    Ok(tokens)
}

struct CqlParser<'a> {
    tokens: Vec<Tok>,
    idx: usize,
    end: usize,
    profile: &'a CqlProfile,
}

impl CqlParser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.idx)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.idx).cloned();
        if tok.is_some() {
            self.idx += 1;
        }
        tok
    }

    fn parse_query(&mut self) -> QueryResult<RpnNode> {
        let mut node = self.parse_clause()?;
        while let Some(op) = self.peek_bool_op() {
            self.idx += 1;
            let rhs = self.parse_clause()?;
            node = RpnNode::Bool {
                op,
                left: Box::new(node),
                right: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn peek_bool_op(&self) -> Option<BoolOp> {
        match self.peek()?.kind {
            TokKind::Word(ref w) => match w.to_ascii_lowercase().as_str() {
                "and" => Some(BoolOp::And),
                "or" => Some(BoolOp::Or),
                "not" => Some(BoolOp::AndNot),
                "prox" => Some(BoolOp::Prox(ProxSpec::default())),
                _ => None,
            },
            _ => None,
        }
    }

    fn parse_clause(&mut self) -> QueryResult<RpnNode> {
        let tok = self.bump().ok_or_else(|| {
            QueryError::syntax("expected search clause, found end of query", self.end)
        })?;
        match tok.kind {
            TokKind::LParen => {
                let node = self.parse_query()?;
                match self.bump() {
                    Some(Tok {
                        kind: TokKind::RParen,
                        ..
                    }) => Ok(node),
                    Some(other) => Err(QueryError::syntax(
                        format!("expected ')', found '{}'", other.render()),
                        other.pos,
                    )),
                    None => Err(QueryError::syntax("expected ')'", self.end)),
                }
            }
            TokKind::Word(word) => self.parse_search_term(word, tok.pos),
            other => Err(QueryError::syntax(
                format!("unexpected '{}'", Tok { kind: other, pos: tok.pos }.render()),
                tok.pos,
            )),
        }
    }

    /// A word either stands alone (serverChoice search) or is an index
    /// followed by a relation and the search term.
    fn parse_search_term(&mut self, word: String, pos: usize) -> QueryResult<RpnNode> {
        let relation = match self.peek() {
            Some(Tok {
                kind: TokKind::Relation(r),
                ..
            }) => Some(r.clone()),
            Some(Tok {
                kind: TokKind::Word(w),
                ..
            }) if matches!(w.to_ascii_lowercase().as_str(), "all" | "any") => {
                Some(w.to_ascii_lowercase())
            }
            _ => None,
        };

        let Some(relation) = relation else {
            // Bare term against the server-choice index.
            let attrs = self.index_attrs("cql.serverChoice", pos)?;
            return Ok(RpnNode::Term(RpnTerm {
                attributes: attrs,
                term: word,
            }));
        };
        self.idx += 1;

        let term_tok = self.bump().ok_or_else(|| {
            QueryError::syntax("expected search term after relation", self.end)
        })?;
        let term = match term_tok.kind {
            TokKind::Word(w) => w,
            other => {
                return Err(QueryError::syntax(
                    format!(
                        "expected search term, found '{}'",
                        Tok { kind: other, pos: term_tok.pos }.render()
                    ),
                    term_tok.pos,
                ))
            }
        };

        let base_attrs = self.index_attrs(&word, pos)?;
        match relation.as_str() {
            "all" | "any" => {
                let op = if relation == "all" {
                    BoolOp::And
                } else {
                    BoolOp::Or
                };
                let words: Vec<&str> = term.split_whitespace().collect();
                if words.is_empty() {
                    return Err(QueryError::syntax("empty search term", term_tok.pos));
                }
                let mut node = RpnNode::Term(RpnTerm {
                    attributes: base_attrs.clone(),
                    term: words[0].to_owned(),
                });
                for w in &words[1..] {
                    node = RpnNode::Bool {
                        op: op.clone(),
                        left: Box::new(node),
                        right: Box::new(RpnNode::Term(RpnTerm {
                            attributes: base_attrs.clone(),
                            term: (*w).to_owned(),
                        })),
                    };
                }
                Ok(node)
            }
            symbol => {
                let mut attrs = base_attrs;
                if let Some(rel) = relation_attr(symbol) {
                    attrs.push(Attribute::numeric(2, rel));
                }
                Ok(RpnNode::Term(RpnTerm {
                    attributes: attrs,
                    term,
                }))
            }
        }
    }

    fn index_attrs(&self, index: &str, pos: usize) -> QueryResult<Vec<Attribute>> {
        self.profile
            .lookup(index)
            .map(<[Attribute]>::to_vec)
            .ok_or_else(|| QueryError::syntax(format!("unknown index '{index}'"), pos))
    }
}

/// Bib-1 relation attribute for a comparison symbol; `=` maps to the
/// server default (no attribute).
fn relation_attr(symbol: &str) -> Option<i64> {
    match symbol {
        "<" => Some(1),
        "<=" => Some(2),
        "==" => Some(3),
        ">=" => Some(4),
        ">" => Some(5),
        "<>" => Some(6),
        _ => None,
    }
}

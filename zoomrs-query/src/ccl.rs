//! # CCL Compiler
//!
//! Purpose: Parse Common Command Language into the canonical RPN tree
//! using a caller-supplied qualifier profile, reporting failures with the
//! fixed numeric diagnostic codes and byte offsets of the original CCL
//! error taxonomy.
//!
//! ## Design Principles
//! 1. **Bit-Exact Diagnostics**: The code table below is an external
//!    contract; codes and canonical messages must not drift.
//! 2. **Offset Fidelity**: Every error points at the byte offset of the
//!    offending token in the source string.
//! 3. **Profile-Driven**: Qualifier names, their attributes, and their
//!    truncation capabilities come entirely from the profile; the parser
//!    hard-codes no field vocabulary.

use std::collections::HashMap;

use crate::error::{QueryError, QueryResult};
use crate::rpn::{Attribute, BoolOp, ProxSpec, Query, RpnNode, RpnTerm};

pub const CCL_ERR_OK: i32 = 0;
pub const CCL_ERR_TERM_EXPECTED: i32 = 1;
pub const CCL_ERR_RP_EXPECTED: i32 = 2;
pub const CCL_ERR_SETNAME_EXPECTED: i32 = 3;
pub const CCL_ERR_OP_EXPECTED: i32 = 4;
pub const CCL_ERR_BAD_RP: i32 = 5;
pub const CCL_ERR_UNKNOWN_QUAL: i32 = 6;
pub const CCL_ERR_DOUBLE_QUAL: i32 = 7;
pub const CCL_ERR_EQ_EXPECTED: i32 = 8;
pub const CCL_ERR_BAD_RELATION: i32 = 9;
pub const CCL_ERR_TRUNC_NOT_LEFT: i32 = 10;
pub const CCL_ERR_TRUNC_NOT_BOTH: i32 = 11;
pub const CCL_ERR_TRUNC_NOT_RIGHT: i32 = 12;

/// Canonical message for a CCL error code.
pub fn ccl_err_msg(code: i32) -> &'static str {
    match code {
        CCL_ERR_OK => "ok",
        CCL_ERR_TERM_EXPECTED => "search word expected",
        CCL_ERR_RP_EXPECTED => "')' expected",
        CCL_ERR_SETNAME_EXPECTED => "set name expected",
        CCL_ERR_OP_EXPECTED => "operator expected",
        CCL_ERR_BAD_RP => "unbalanced ')'",
        CCL_ERR_UNKNOWN_QUAL => "unknown qualifier",
        CCL_ERR_DOUBLE_QUAL => "qualifiers applied twice",
        CCL_ERR_EQ_EXPECTED => "'=' expected",
        CCL_ERR_BAD_RELATION => "bad relation",
        CCL_ERR_TRUNC_NOT_LEFT => "left truncation not supported",
        CCL_ERR_TRUNC_NOT_BOTH => "both left - and right truncation not supported",
        CCL_ERR_TRUNC_NOT_RIGHT => "right truncation not supported",
        _ => "unknown error",
    }
}

fn ccl_err(code: i32, pos: usize) -> QueryError {
    QueryError::Ccl {
        code,
        message: ccl_err_msg(code),
        pos,
    }
}

/// One qualifier: the attributes it compiles to and which truncation
/// forms the target supports for it.
#[derive(Debug, Clone, Default)]
pub struct CclQualifier {
    pub attributes: Vec<Attribute>,
    pub trunc_left: bool,
    pub trunc_right: bool,
    pub trunc_both: bool,
}

/// Qualifier table for CCL compilation.
///
/// Lookup is case-insensitive. The reserved name `term` supplies the
/// default qualifier applied to unqualified search words; without it,
/// unqualified words compile with no attributes and full truncation
/// support.
#[derive(Debug, Clone, Default)]
pub struct CclProfile {
    qualifiers: HashMap<String, CclQualifier>,
}

#[derive(serde::Deserialize)]
#[serde(transparent)]
struct ProfileSpec(HashMap<String, String>);

impl CclProfile {
    pub fn new() -> Self {
        CclProfile::default()
    }

    /// Adds a qualifier from a spec string of space-separated elements:
    /// numeric `type=value` attribute pairs and an optional `t=` flag
    /// list (`l`, `r`, `b`) naming the supported truncation forms.
    ///
    /// Example: `profile.add("ti", "1=4 t=l,r,b")`.
    pub fn add(&mut self, name: &str, spec: &str) -> QueryResult<()> {
        let mut qual = CclQualifier::default();
        for element in spec.split_whitespace() {
            let (key, value) = element.split_once('=').ok_or_else(|| {
                QueryError::syntax(format!("malformed qualifier element '{element}'"), 0)
            })?;
            if key == "t" {
                for flag in value.split(',') {
                    match flag {
                        "l" => qual.trunc_left = true,
                        "r" => qual.trunc_right = true,
                        "b" => qual.trunc_both = true,
                        other => {
                            return Err(QueryError::syntax(
                                format!("unknown truncation flag '{other}'"),
                                0,
                            ))
                        }
                    }
                }
            } else {
                let kind: u32 = key.parse().map_err(|_| {
                    QueryError::syntax(format!("malformed qualifier element '{element}'"), 0)
                })?;
                let value: i64 = value.parse().map_err(|_| {
                    QueryError::syntax(format!("malformed qualifier element '{element}'"), 0)
                })?;
                qual.attributes.push(Attribute::numeric(kind, value));
            }
        }
        self.qualifiers.insert(name.to_ascii_lowercase(), qual);
        Ok(())
    }

    /// Loads a profile from a JSON object of qualifier name to spec
    /// string, e.g. `{"ti": "1=4 t=l,r", "au": "1=1003"}`.
    pub fn from_json(json: &str) -> QueryResult<Self> {
        let spec: ProfileSpec = serde_json::from_str(json)
            .map_err(|e| QueryError::syntax(format!("invalid profile JSON: {e}"), 0))?;
        let mut profile = CclProfile::new();
        for (name, spec) in &spec.0 {
            profile.add(name, spec)?;
        }
        Ok(profile)
    }

    pub fn lookup(&self, name: &str) -> Option<&CclQualifier> {
        self.qualifiers.get(&name.to_ascii_lowercase())
    }
}

impl Query {
    /// Compiles a CCL string against a qualifier profile.
    pub fn from_ccl(input: &str, profile: &CclProfile) -> QueryResult<Query> {
        let tokens = tokenize(input);
        let mut parser = CclParser {
            tokens,
            idx: 0,
            end: input.len(),
            profile,
        };
        let node = parser.parse_expr()?;
        match parser.cur() {
            None => Ok(Query::from_node(node)),
            Some(tok) if tok.kind == TokKind::RParen => Err(ccl_err(CCL_ERR_BAD_RP, tok.pos)),
            Some(tok) => Err(ccl_err(CCL_ERR_OP_EXPECTED, tok.pos)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokKind {
    LParen,
    RParen,
    Comma,
    /// `%n` (unordered) or `!n` (ordered) proximity operator.
    Prox { ordered: bool, distance: Option<u32> },
    /// Relation other than plain `=`, e.g. `<`, `>=`, `<>`.
    Rel(String),
    Eq,
    Word { text: String, quoted: bool },
}

#[derive(Debug, Clone)]
struct Tok {
    kind: TokKind,
    pos: usize,
}

fn tokenize(input: &str) -> Vec<Tok> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let pos = i;
        match bytes[i] {
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
            b',' => {
                tokens.push(Tok {
                    kind: TokKind::Comma,
                    pos,
                });
                i += 1;
            }
            b'%' | b'!' => {
                let ordered = bytes[i] == b'!';
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let distance = if i > start {
                    input[start..i].parse().ok()
                } else {
                    None
                };
                tokens.push(Tok {
                    kind: TokKind::Prox { ordered, distance },
                    pos,
                });
            }
            b'<' | b'>' | b'=' => {
                // A second relational character joins into one token; the
                // parser decides whether the combination is meaningful.
                if matches!(bytes.get(i + 1), Some(b'<') | Some(b'>') | Some(b'=')) {
                    tokens.push(Tok {
                        kind: TokKind::Rel(input[i..i + 2].to_owned()),
                        pos,
                    });
                    i += 2;
                } else if bytes[i] == b'=' {
                    tokens.push(Tok {
                        kind: TokKind::Eq,
                        pos,
                    });
                    i += 1;
                } else {
                    tokens.push(Tok {
                        kind: TokKind::Rel(input[i..i + 1].to_owned()),
                        pos,
                    });
                    i += 1;
                }
            }
            b'"' => {
                // Quoted words keep '?' literal; lex to the closing quote
                // or end of input.
                let mut text = Vec::new();
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    text.push(bytes[i]);
                    i += 1;
                }
                if i < bytes.len() {
                    i += 1;
                }
                tokens.push(Tok {
                    kind: TokKind::Word {
                        text: String::from_utf8_lossy(&text).into_owned(),
                        quoted: true,
                    },
                    pos,
                });
            }
            _ => {
                let start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(
                        bytes[i],
                        b'(' | b')' | b',' | b'%' | b'!' | b'<' | b'>' | b'=' | b'"'
                    )
                {
                    i += 1;
                }
                tokens.push(Tok {
                    kind: TokKind::Word {
                        text: input[start..i].to_owned(),
                        quoted: false,
                    },
                    pos,
                });
            }
        }
    }
    tokens
}

struct CclParser<'a> {
    tokens: Vec<Tok>,
    idx: usize,
    end: usize,
    profile: &'a CclProfile,
}

impl CclParser<'_> {
    fn cur(&self) -> Option<&Tok> {
        self.tokens.get(self.idx)
    }

    fn keyword(&self) -> Option<&'static str> {
        match self.cur()?.kind {
            TokKind::Word {
                ref text,
                quoted: false,
            } => match text.to_ascii_lowercase().as_str() {
                "and" => Some("and"),
                "or" => Some("or"),
                "not" => Some("not"),
                _ => None,
            },
            _ => None,
        }
    }

    fn parse_expr(&mut self) -> QueryResult<RpnNode> {
        let mut node = self.parse_elements()?;
        loop {
            let op = match (self.keyword(), self.cur().map(|t| t.kind.clone())) {
                (Some("and"), _) => BoolOp::And,
                (Some("or"), _) => BoolOp::Or,
                (Some("not"), _) => BoolOp::AndNot,
                (None, Some(TokKind::Prox { ordered, distance })) => BoolOp::Prox(ProxSpec {
                    ordered,
                    distance: distance.unwrap_or(1),
                    ..ProxSpec::default()
                }),
                _ => break,
            };
            self.idx += 1;
            let rhs = self.parse_elements()?;
            node = RpnNode::Bool {
                op,
                left: Box::new(node),
                right: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn parse_elements(&mut self) -> QueryResult<RpnNode> {
        let Some(tok) = self.cur().cloned() else {
            return Err(ccl_err(CCL_ERR_TERM_EXPECTED, self.end));
        };
        match tok.kind {
            TokKind::LParen => {
                self.idx += 1;
                let node = self.parse_expr()?;
                match self.cur() {
                    Some(t) if t.kind == TokKind::RParen => {
                        self.idx += 1;
                        Ok(node)
                    }
                    Some(t) => Err(ccl_err(CCL_ERR_RP_EXPECTED, t.pos)),
                    None => Err(ccl_err(CCL_ERR_RP_EXPECTED, self.end)),
                }
            }
            TokKind::RParen => Err(ccl_err(CCL_ERR_BAD_RP, tok.pos)),
            TokKind::Word { .. } => self.parse_search_terms(),
            _ => Err(ccl_err(CCL_ERR_TERM_EXPECTED, tok.pos)),
        }
    }

    /// Parses either `qual[,qual...] relation term...` or a plain term
    /// list compiled with the default qualifier.
    fn parse_search_terms(&mut self) -> QueryResult<RpnNode> {
        let start = self.idx;
        if let Some(node) = self.try_parse_qualified()? {
            return Ok(node);
        }
        self.idx = start;

        // Plain term list under the default qualifier.
        let default = CclQualifier {
            trunc_left: true,
            trunc_right: true,
            trunc_both: true,
            ..CclQualifier::default()
        };
        let qual = self
            .profile
            .lookup("term")
            .cloned()
            .unwrap_or(default);
        self.parse_term_node(&qual, Vec::new())
    }

    /// Attempts the qualified form; returns Ok(None) when the tokens are
    /// not a qualifier list, leaving the caller to rewind.
    fn try_parse_qualified(&mut self) -> QueryResult<Option<RpnNode>> {
        let mut names: Vec<(String, usize)> = Vec::new();
        loop {
            match self.cur().cloned() {
                Some(Tok {
                    kind: TokKind::Word { text, quoted: false },
                    pos,
                }) => {
                    names.push((text, pos));
                    self.idx += 1;
                }
                _ => return Ok(None),
            }
            match self.cur().map(|t| t.kind.clone()) {
                Some(TokKind::Comma) => {
                    self.idx += 1;
                    continue;
                }
                Some(TokKind::Eq) | Some(TokKind::Rel(_)) => break,
                // A comma-separated list must end in a relation.
                _ if names.len() > 1 => {
                    let pos = self.cur().map(|t| t.pos).unwrap_or(self.end);
                    return Err(ccl_err(CCL_ERR_EQ_EXPECTED, pos));
                }
                _ => return Ok(None),
            }
        }

        // Relation token.
        let rel_tok = self.cur().cloned().expect("relation token present");
        self.idx += 1;
        let rel_attr = match &rel_tok.kind {
            TokKind::Eq => None,
            TokKind::Rel(text) => match text.as_str() {
                "<" => Some(1),
                "<=" => Some(2),
                ">=" => Some(4),
                ">" => Some(5),
                "<>" => Some(6),
                _ => return Err(ccl_err(CCL_ERR_BAD_RELATION, rel_tok.pos)),
            },
            _ => unreachable!("loop breaks only on Eq/Rel"),
        };

        // Result-set reference: `set=name`.
        if names.len() == 1
            && names[0].0.eq_ignore_ascii_case("set")
            && self.profile.lookup("set").is_none()
        {
            if rel_attr.is_some() {
                return Err(ccl_err(CCL_ERR_EQ_EXPECTED, rel_tok.pos));
            }
            return match self.cur().cloned() {
                Some(Tok {
                    kind: TokKind::Word { text, .. },
                    ..
                }) => {
                    self.idx += 1;
                    Ok(Some(RpnNode::SetRef(text)))
                }
                Some(tok) => Err(ccl_err(CCL_ERR_SETNAME_EXPECTED, tok.pos)),
                None => Err(ccl_err(CCL_ERR_SETNAME_EXPECTED, self.end)),
            };
        }

        // Resolve and merge the qualifier list.
        let mut seen: Vec<String> = Vec::new();
        let mut merged = CclQualifier::default();
        for (name, pos) in &names {
            let lower = name.to_ascii_lowercase();
            if seen.contains(&lower) {
                return Err(ccl_err(CCL_ERR_DOUBLE_QUAL, *pos));
            }
            seen.push(lower);
            let qual = self
                .profile
                .lookup(name)
                .ok_or_else(|| ccl_err(CCL_ERR_UNKNOWN_QUAL, *pos))?;
            merged.attributes.extend(qual.attributes.iter().cloned());
            merged.trunc_left |= qual.trunc_left;
            merged.trunc_right |= qual.trunc_right;
            merged.trunc_both |= qual.trunc_both;
        }

        let mut extra = Vec::new();
        if let Some(rel) = rel_attr {
            extra.push(Attribute::numeric(2, rel));
        }
        self.parse_term_node(&merged, extra).map(Some)
    }

    /// Consumes consecutive word tokens into one phrase term and applies
    /// qualifier attributes plus truncation.
    fn parse_term_node(
        &mut self,
        qual: &CclQualifier,
        extra: Vec<Attribute>,
    ) -> QueryResult<RpnNode> {
        let mut words: Vec<(String, bool)> = Vec::new();
        let mut term_pos = self.end;
        while let Some(Tok {
            kind: TokKind::Word { text, quoted },
            pos,
        }) = self.cur().cloned()
        {
            // Boolean keywords terminate the term list.
            if !quoted
                && matches!(
                    text.to_ascii_lowercase().as_str(),
                    "and" | "or" | "not"
                )
            {
                break;
            }
            if words.is_empty() {
                term_pos = pos;
            }
            words.push((text, quoted));
            self.idx += 1;
        }
        if words.is_empty() {
            let pos = self.cur().map(|t| t.pos).unwrap_or(self.end);
            return Err(ccl_err(CCL_ERR_TERM_EXPECTED, pos));
        }

        let trunc_left = !words[0].1 && words[0].0.starts_with('?');
        let last = words.last().expect("non-empty words");
        let trunc_right = !last.1 && last.0.ends_with('?') && !(words.len() == 1 && last.0 == "?");

        let mut term = words
            .iter()
            .map(|(w, _)| w.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let mut attributes = qual.attributes.clone();
        attributes.extend(extra);

        match (trunc_left, trunc_right) {
            (true, true) => {
                if !qual.trunc_both {
                    return Err(ccl_err(CCL_ERR_TRUNC_NOT_BOTH, term_pos));
                }
                term = term[1..term.len() - 1].to_owned();
                attributes.push(Attribute::numeric(5, 3));
            }
            (true, false) => {
                if !qual.trunc_left {
                    return Err(ccl_err(CCL_ERR_TRUNC_NOT_LEFT, term_pos));
                }
                term = term[1..].to_owned();
                attributes.push(Attribute::numeric(5, 2));
            }
            (false, true) => {
                if !qual.trunc_right {
                    return Err(ccl_err(CCL_ERR_TRUNC_NOT_RIGHT, term_pos));
                }
                term = term[..term.len() - 1].to_owned();
                attributes.push(Attribute::numeric(5, 1));
            }
            (false, false) => {}
        }

        Ok(RpnNode::Term(RpnTerm {
            attributes,
            term,
        }))
    }
}

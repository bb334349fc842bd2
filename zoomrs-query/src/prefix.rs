//! # Prefix (PQF) Compiler
//!
//! Purpose: Parse prefix query format into the canonical RPN tree.
//!
//! Supported operators: `@and`, `@or`, `@not`, `@prox` (six numeric
//! parameters), `@attr [set] type=value`, `@attrset set`, `@set name`.
//! Terms are bare words or double-quoted strings with backslash escapes.
//! Attributes accumulate and apply to every operand below them, so
//! `@attr 1=4 @and a b` attributes both terms.

use crate::error::{QueryError, QueryResult};
use crate::rpn::{AttrValue, Attribute, BoolOp, ProxSpec, Query, RpnNode, RpnTerm};

impl Query {
    /// Compiles a prefix-notation query string.
    pub fn from_prefix(input: &str) -> QueryResult<Query> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens,
            idx: 0,
            end: input.len(),
        };
        let node = parser.parse_node(Vec::new(), None)?;
        if let Some(tok) = parser.peek() {
            return Err(QueryError::syntax(
                format!("unexpected token '{}' after query", tok.text),
                tok.pos,
            ));
        }
        Ok(Query::from_node(node))
    }
}

struct Token {
    text: String,
    pos: usize,
}

fn tokenize(input: &str) -> QueryResult<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let pos = i;
        if bytes[i] == b'"' {
            let (text, next) = crate::lex::lex_quoted(input, pos)?;
            i = next;
            tokens.push(Token { text, pos });
        } else {
            let start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            tokens.push(Token {
                text: input[start..i].to_owned(),
                pos,
            });
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.idx)
    }

    fn next(&mut self, expect: &str) -> QueryResult<&Token> {
        match self.tokens.get(self.idx) {
            Some(_) => {
                let tok = &self.tokens[self.idx];
                self.idx += 1;
                Ok(tok)
            }
            None => Err(QueryError::syntax(
                format!("expected {expect}, found end of query"),
                self.end,
            )),
        }
    }

    fn parse_node(
        &mut self,
        mut attrs: Vec<Attribute>,
        attrset: Option<String>,
    ) -> QueryResult<RpnNode> {
        let tok = self.next("operand")?;
        let text = tok.text.clone();
        let pos = tok.pos;
        match text.as_str() {
            "@and" | "@or" | "@not" => {
                let op = match text.as_str() {
                    "@and" => BoolOp::And,
                    "@or" => BoolOp::Or,
                    _ => BoolOp::AndNot,
                };
                let left = self.parse_node(attrs.clone(), attrset.clone())?;
                let right = self.parse_node(attrs, attrset)?;
                Ok(RpnNode::Bool {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            "@prox" => {
                let exclusion = self.numeric_arg("proximity exclusion")? != 0;
                let distance = self.numeric_arg("proximity distance")? as u32;
                let ordered = self.numeric_arg("proximity ordering")? != 0;
                let relation = self.numeric_arg("proximity relation")? as u32;
                let which = self.numeric_arg("proximity known/private")? as u32;
                let unit = self.numeric_arg("proximity unit")? as u32;
                let left = self.parse_node(attrs.clone(), attrset.clone())?;
                let right = self.parse_node(attrs, attrset)?;
                Ok(RpnNode::Bool {
                    op: BoolOp::Prox(ProxSpec {
                        exclusion,
                        distance,
                        ordered,
                        relation,
                        which,
                        unit,
                    }),
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            "@attr" => {
                let spec = self.next("attribute specification")?;
                let spec_text = spec.text.clone();
                let attr = if let Some(attr) = parse_attr_pair(&spec_text, attrset.as_deref()) {
                    attr
                } else {
                    // First token was a set name; the pair follows.
                    let pair = self.next("attribute type=value")?;
                    let (pair_text, pair_pos) = (pair.text.clone(), pair.pos);
                    parse_attr_pair(&pair_text, Some(&spec_text)).ok_or_else(|| {
                        QueryError::syntax(
                            format!("malformed attribute '{pair_text}'"),
                            pair_pos,
                        )
                    })?
                };
                attrs.push(attr);
                self.parse_node(attrs, attrset)
            }
            "@attrset" => {
                let set = self.next("attribute set name")?.text.clone();
                self.parse_node(attrs, Some(set))
            }
            "@set" => {
                let name = self.next("result set name")?.text.clone();
                Ok(RpnNode::SetRef(name))
            }
            other if other.starts_with('@') => Err(QueryError::syntax(
                format!("unknown operator '{other}'"),
                pos,
            )),
            _ => Ok(RpnNode::Term(RpnTerm {
                attributes: attrs,
                term: text,
            })),
        }
    }

    fn numeric_arg(&mut self, what: &str) -> QueryResult<i64> {
        let tok = self.next(what)?;
        let (text, pos) = (tok.text.clone(), tok.pos);
        text.parse::<i64>()
            .map_err(|_| QueryError::syntax(format!("expected numeric {what}"), pos))
    }
}

/// Parses `type=value`; returns None if the text is not of that shape
/// (meaning it must be a set name instead).
fn parse_attr_pair(text: &str, set: Option<&str>) -> Option<Attribute> {
    let (kind, value) = text.split_once('=')?;
    let kind: u32 = kind.parse().ok()?;
    let value = match value.parse::<i64>() {
        Ok(n) => AttrValue::Numeric(n),
        Err(_) => AttrValue::Str(value.to_owned()),
    };
    Some(Attribute {
        set: set.map(str::to_owned),
        kind,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributed_term() {
        let query = Query::from_prefix("@attr 1=4 smith").unwrap();
        match query.rpn() {
            RpnNode::Term(term) => {
                assert_eq!(term.term, "smith");
                assert_eq!(term.attributes, vec![Attribute::numeric(1, 4)]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_operand_fails() {
        let err = Query::from_prefix("@attr 1=4").unwrap_err();
        assert!(matches!(err, QueryError::Syntax { .. }));
    }

    #[test]
    fn test_boolean_tree() {
        let query = Query::from_prefix("@and @attr 1=4 dog cat").unwrap();
        match query.rpn() {
            RpnNode::Bool { op, left, right } => {
                assert_eq!(*op, BoolOp::And);
                match (left.as_ref(), right.as_ref()) {
                    (RpnNode::Term(l), RpnNode::Term(r)) => {
                        assert_eq!(l.term, "dog");
                        // @attr appeared inside the first operand only.
                        assert_eq!(l.attributes.len(), 1);
                        assert_eq!(r.term, "cat");
                        assert!(r.attributes.is_empty());
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_attr_before_bool_scopes_both_operands() {
        let query = Query::from_prefix("@attr 1=4 @and dog cat").unwrap();
        match query.rpn() {
            RpnNode::Bool { left, right, .. } => {
                for node in [left.as_ref(), right.as_ref()] {
                    match node {
                        RpnNode::Term(t) => assert_eq!(t.attributes.len(), 1),
                        other => panic!("unexpected {other:?}"),
                    }
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_attrset_and_string_value() {
        let query = Query::from_prefix("@attrset exp1 @attr 1=cat term").unwrap();
        match query.rpn() {
            RpnNode::Term(term) => {
                let attr = &term.attributes[0];
                assert_eq!(attr.set.as_deref(), Some("exp1"));
                assert_eq!(attr.value, AttrValue::Str("cat".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_quoted_term() {
        let query = Query::from_prefix("@attr 1=4 \"the \\\"big\\\" dog\"").unwrap();
        match query.rpn() {
            RpnNode::Term(term) => assert_eq!(term.term, "the \"big\" dog"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_quote() {
        assert!(Query::from_prefix("\"dangling").is_err());
    }

    #[test]
    fn test_prox() {
        let query = Query::from_prefix("@prox 0 3 1 2 1 2 dog cat").unwrap();
        match query.rpn() {
            RpnNode::Bool {
                op: BoolOp::Prox(p),
                ..
            } => {
                assert_eq!(p.distance, 3);
                assert!(p.ordered);
                assert!(!p.exclusion);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_set_reference() {
        let query = Query::from_prefix("@set prior").unwrap();
        assert_eq!(*query.rpn(), RpnNode::SetRef("prior".into()));
    }

    #[test]
    fn test_unknown_operator() {
        let err = Query::from_prefix("@frobnicate a b").unwrap_err();
        assert_eq!(err.position(), 0);
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(Query::from_prefix("dog cat").is_err());
    }
}

//! # Canonical RPN Representation
//!
//! Purpose: The single structured query form every compiler targets and
//! the wire layer consumes.
//!
//! ## Design Principles
//! 1. **Immutable After Compile**: A [`Query`] is a value; attaching a
//!    sort specification produces a new value.
//! 2. **Self-Describing Terms**: Attributes travel with each term, so a
//!    query is independent of the language it was compiled from.
//! 3. **Canonical Serialization**: `to_pqf` emits the prefix form used on
//!    the wire and in tests; it round-trips through the prefix compiler.

use std::fmt;

use crate::error::QueryResult;
use crate::sort::SortSpec;

/// Attribute value: most are numeric, a few sets use string values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Numeric(i64),
    Str(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Numeric(n) => write!(f, "{n}"),
            AttrValue::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A single (type, value) attribute, optionally in an explicit set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub set: Option<String>,
    pub kind: u32,
    pub value: AttrValue,
}

impl Attribute {
    /// Numeric attribute in the default set, e.g. `1=4`.
    pub fn numeric(kind: u32, value: i64) -> Self {
        Attribute {
            set: None,
            kind,
            value: AttrValue::Numeric(value),
        }
    }

    /// String-valued attribute in the default set.
    pub fn string(kind: u32, value: impl Into<String>) -> Self {
        Attribute {
            set: None,
            kind,
            value: AttrValue::Str(value.into()),
        }
    }
}

/// Proximity operator parameters, in prefix-notation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxSpec {
    pub exclusion: bool,
    pub distance: u32,
    pub ordered: bool,
    pub relation: u32,
    pub which: u32,
    pub unit: u32,
}

impl Default for ProxSpec {
    fn default() -> Self {
        // distance 1, relation <=, known unit "word".
        ProxSpec {
            exclusion: false,
            distance: 1,
            ordered: false,
            relation: 2,
            which: 1,
            unit: 2,
        }
    }
}

/// Boolean operator joining two RPN operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
    /// And-not: left minus right.
    AndNot,
    Prox(ProxSpec),
}

/// An attributed search term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpnTerm {
    pub attributes: Vec<Attribute>,
    pub term: String,
}

/// Canonical RPN query tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpnNode {
    Bool {
        op: BoolOp,
        left: Box<RpnNode>,
        right: Box<RpnNode>,
    },
    Term(RpnTerm),
    /// Reference to a named server-side result set.
    SetRef(String),
}

/// An immutable compiled query, optionally carrying a sort specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    node: RpnNode,
    sort: Option<SortSpec>,
}

impl Query {
    pub(crate) fn from_node(node: RpnNode) -> Self {
        Query { node, sort: None }
    }

    /// Returns the RPN tree.
    pub fn rpn(&self) -> &RpnNode {
        &self.node
    }

    /// Returns the attached sort specification, if any.
    pub fn sort_spec(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    /// Attaches sort criteria written in the `field [ascending|descending]`
    /// DSL, validating them eagerly.
    pub fn with_sort(mut self, criteria: &str) -> QueryResult<Self> {
        self.sort = Some(SortSpec::parse(criteria)?);
        Ok(self)
    }

    /// Serializes the query to canonical prefix notation.
    pub fn to_pqf(&self) -> String {
        let mut out = String::new();
        write_node(&self.node, &mut out);
        out
    }
}

fn write_node(node: &RpnNode, out: &mut String) {
    match node {
        RpnNode::Bool { op, left, right } => {
            match op {
                BoolOp::And => out.push_str("@and "),
                BoolOp::Or => out.push_str("@or "),
                BoolOp::AndNot => out.push_str("@not "),
                BoolOp::Prox(p) => {
                    out.push_str(&format!(
                        "@prox {} {} {} {} {} {} ",
                        p.exclusion as u32, p.distance, p.ordered as u32, p.relation, p.which,
                        p.unit
                    ));
                }
            }
            write_node(left, out);
            out.push(' ');
            write_node(right, out);
        }
        RpnNode::Term(term) => {
            for attr in &term.attributes {
                out.push_str("@attr ");
                if let Some(set) = &attr.set {
                    out.push_str(set);
                    out.push(' ');
                }
                out.push_str(&format!("{}={} ", attr.kind, attr.value));
            }
            out.push_str(&quote_term(&term.term));
        }
        RpnNode::SetRef(name) => {
            out.push_str("@set ");
            out.push_str(name);
        }
    }
}

fn quote_term(term: &str) -> String {
    if term.is_empty() || term.contains(char::is_whitespace) || term.contains('"') {
        let mut quoted = String::with_capacity(term.len() + 2);
        quoted.push('"');
        for c in term.chars() {
            if c == '"' || c == '\\' {
                quoted.push('\\');
            }
            quoted.push(c);
        }
        quoted.push('"');
        quoted
    } else {
        term.to_owned()
    }
}

//! # Query Compilers
//!
//! Purpose: Compile search expressions written in the prefix (PQF), CQL,
//! and CCL query languages into one canonical RPN representation, plus a
//! small sort-criteria DSL.
//!
//! ## Design Principles
//! 1. **One Canonical Form**: Every compiler produces the same [`Query`]
//!    value; downstream code never sees source-language details.
//! 2. **Synchronous Failure**: Compile errors surface immediately with a
//!    message and byte position; CCL errors additionally carry the fixed
//!    numeric code of the original diagnostic taxonomy.
//! 3. **No Network Use**: Compilation consults only caller-supplied
//!    profiles; a live connection contributes nothing but a profile.

mod ccl;
mod cql;
mod error;
mod lex;
mod prefix;
mod rpn;
mod sort;

pub use ccl::{ccl_err_msg, CclProfile, CclQualifier};
pub use ccl::{
    CCL_ERR_BAD_RELATION, CCL_ERR_BAD_RP, CCL_ERR_DOUBLE_QUAL, CCL_ERR_EQ_EXPECTED,
    CCL_ERR_OK, CCL_ERR_OP_EXPECTED, CCL_ERR_RP_EXPECTED, CCL_ERR_SETNAME_EXPECTED,
    CCL_ERR_TERM_EXPECTED, CCL_ERR_TRUNC_NOT_BOTH, CCL_ERR_TRUNC_NOT_LEFT,
    CCL_ERR_TRUNC_NOT_RIGHT, CCL_ERR_UNKNOWN_QUAL,
};
pub use cql::CqlProfile;
pub use error::{QueryError, QueryResult};
pub use rpn::{AttrValue, Attribute, BoolOp, ProxSpec, Query, RpnNode, RpnTerm};
pub use sort::{SortKey, SortSpec};

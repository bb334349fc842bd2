//! # Diagnostic Code Tables
//!
//! Fixed numeric enumerations for connection-level errors and the common
//! Bib-1 diagnostics, preserved from the original protocol suite so
//! existing consumers of the codes keep working.

/// Diagnostic-set identifier for engine/transport level errors.
pub const DIAGSET_ZOOM: &str = "ZOOM";

/// Diagnostic-set identifier for server-side Bib-1 diagnostics.
pub const DIAGSET_BIB1: &str = "Bib-1";

/// No error.
pub const ERROR_NONE: i32 = 0;
/// Could not connect to the target.
pub const ERROR_CONNECT: i32 = 10000;
/// Out of memory while handling an operation.
pub const ERROR_MEMORY: i32 = 10001;
/// Could not encode an outgoing request.
pub const ERROR_ENCODE: i32 = 10002;
/// Could not decode an incoming response.
pub const ERROR_DECODE: i32 = 10003;
/// Connection lost mid-operation.
pub const ERROR_CONNECTION_LOST: i32 = 10004;
/// Target refused session initialization.
pub const ERROR_INIT: i32 = 10005;
/// Internal engine failure.
pub const ERROR_INTERNAL: i32 = 10006;
/// Operation timed out.
pub const ERROR_TIMEOUT: i32 = 10007;
/// Target speaks an unsupported protocol.
pub const ERROR_UNSUPPORTED_PROTOCOL: i32 = 10008;
/// Query type not supported by the target.
pub const ERROR_UNSUPPORTED_QUERY: i32 = 10009;
/// Query rejected as invalid.
pub const ERROR_INVALID_QUERY: i32 = 10010;

/// Returns the human-readable text for an error or diagnostic code.
///
/// Codes at and above [`ERROR_CONNECT`] are engine-level; smaller positive
/// codes are interpreted against the Bib-1 set (common subset only).
pub fn diag_str(code: i32) -> &'static str {
    match code {
        ERROR_NONE => "No error",
        ERROR_CONNECT => "Connect failed",
        ERROR_MEMORY => "Out of memory",
        ERROR_ENCODE => "Encoding failed",
        ERROR_DECODE => "Decoding failed",
        ERROR_CONNECTION_LOST => "Connection lost",
        ERROR_INIT => "Init rejected",
        ERROR_INTERNAL => "Internal failure",
        ERROR_TIMEOUT => "Timeout",
        ERROR_UNSUPPORTED_PROTOCOL => "Unsupported protocol",
        ERROR_UNSUPPORTED_QUERY => "Unsupported query type",
        ERROR_INVALID_QUERY => "Invalid query",
        1 => "Permanent system error",
        2 => "Temporary system error",
        3 => "Unsupported search",
        4 => "Terms only exclusive (one term) operands supported",
        5 => "Only support for attributes",
        13 => "Present request out-of-range",
        14 => "System error in presenting records",
        17 => "Record exceeds preferred message size",
        23 => "Specified combination of databases not supported",
        109 => "Database unavailable",
        114 => "Unsupported Use attribute",
        121 => "Unsupported Attribute Set",
        230 => "Sort: no sequence",
        236 => "Access to specified database denied",
        239 => "Record syntax not supported",
        _ => "Unknown error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_codes_have_text() {
        assert_eq!(diag_str(ERROR_NONE), "No error");
        assert_eq!(diag_str(ERROR_CONNECT), "Connect failed");
        assert_eq!(diag_str(ERROR_INVALID_QUERY), "Invalid query");
    }

    #[test]
    fn test_bib1_subset() {
        assert_eq!(diag_str(109), "Database unavailable");
        assert_eq!(diag_str(239), "Record syntax not supported");
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(diag_str(-5), "Unknown error code");
        assert_eq!(diag_str(99999), "Unknown error code");
    }
}

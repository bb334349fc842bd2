//! # Hierarchical Options Store
//!
//! Purpose: Provide the cascading key/value configuration used by
//! connections, result sets, and packages.
//!
//! ## Design Principles
//! 1. **Local Writes Only**: `set` always lands in the local map; a child
//!    never mutates a parent.
//! 2. **Weak Parent Chains**: Up to two parents are held as lookup-only
//!    weak references, resolved left to right, so sharing stores across
//!    owners can never form a reference cycle.
//! 3. **Forgiving Typed Getters**: `get_bool`/`get_int` fall back to the
//!    caller's default on malformed values instead of failing.
//! 4. **Cheap Sharing**: An `Options` handle is a clone of a shared map;
//!    owners read-share the same store without implying ownership.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// A single stored option value.
///
/// Binary values round-trip through `get_binary`; `get` only reports
/// values that are valid strings.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OptionValue {
    Str(String),
    Bin(Vec<u8>),
}

struct OptionsInner {
    values: HashMap<String, OptionValue>,
    /// Lookup-only parent chain, searched left to right after the local map.
    parents: Vec<Weak<Mutex<OptionsInner>>>,
}

/// Shared hierarchical options store.
///
/// Cloning yields another handle to the same store. Children created with
/// [`Options::child`] or [`Options::child_of`] consult their parents on
/// lookup but write only locally.
#[derive(Clone)]
pub struct Options {
    inner: Arc<Mutex<OptionsInner>>,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl Options {
    /// Creates an empty store with no parents.
    pub fn new() -> Self {
        Options {
            inner: Arc::new(Mutex::new(OptionsInner {
                values: HashMap::new(),
                parents: Vec::new(),
            })),
        }
    }

    /// Creates a child store that falls back to `self` on lookup.
    pub fn child(&self) -> Options {
        Options::with_parents(vec![Arc::downgrade(&self.inner)])
    }

    /// Creates a child store with two parents, consulted in order.
    pub fn child_of(first: &Options, second: &Options) -> Options {
        Options::with_parents(vec![
            Arc::downgrade(&first.inner),
            Arc::downgrade(&second.inner),
        ])
    }

    fn with_parents(parents: Vec<Weak<Mutex<OptionsInner>>>) -> Options {
        Options {
            inner: Arc::new(Mutex::new(OptionsInner {
                values: HashMap::new(),
                parents,
            })),
        }
    }

    /// Resolves a string value: local map first, then parents left to right.
    ///
    /// Binary values set with [`Options::set_binary`] are reported only if
    /// they are valid UTF-8.
    pub fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.lock().expect("options mutex poisoned");
        if let Some(value) = inner.values.get(key) {
            return match value {
                OptionValue::Str(s) => Some(s.clone()),
                OptionValue::Bin(b) => String::from_utf8(b.clone()).ok(),
            };
        }
        for parent in &inner.parents {
            if let Some(parent) = parent.upgrade() {
                let parent = Options { inner: parent };
                if let Some(value) = parent.get(key) {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Resolves a value as raw bytes, following the same chain as `get`.
    pub fn get_binary(&self, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().expect("options mutex poisoned");
        if let Some(value) = inner.values.get(key) {
            return match value {
                OptionValue::Str(s) => Some(s.clone().into_bytes()),
                OptionValue::Bin(b) => Some(b.clone()),
            };
        }
        for parent in &inner.parents {
            if let Some(parent) = parent.upgrade() {
                let parent = Options { inner: parent };
                if let Some(value) = parent.get_binary(key) {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Resolves a boolean value.
    ///
    /// Recognizes `"1"`/`"true"` and `"0"`/`"false"`; anything else,
    /// including an absent key, yields `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).as_deref() {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") => false,
            _ => default,
        }
    }

    /// Resolves an integer value; malformed or absent values yield `default`.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(default)
    }

    /// Stores a string value in the local map.
    pub fn set(&self, key: &str, value: &str) {
        let mut inner = self.inner.lock().expect("options mutex poisoned");
        inner
            .values
            .insert(key.to_owned(), OptionValue::Str(value.to_owned()));
    }

    /// Stores a raw byte value in the local map.
    pub fn set_binary(&self, key: &str, value: &[u8]) {
        let mut inner = self.inner.lock().expect("options mutex poisoned");
        inner
            .values
            .insert(key.to_owned(), OptionValue::Bin(value.to_vec()));
    }

    /// Stores an integer value in the local map.
    pub fn set_int(&self, key: &str, value: i64) {
        self.set(key, &value.to_string());
    }

    /// Removes a key from the local map. Parent values become visible again.
    pub fn unset(&self, key: &str) {
        let mut inner = self.inner.lock().expect("options mutex poisoned");
        inner.values.remove(key);
    }

    /// Returns the keys and string values of the local map only.
    ///
    /// Used when serializing an extended-service request, which must carry
    /// exactly the options configured on the package itself.
    pub fn local_entries(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock().expect("options mutex poisoned");
        let mut entries: Vec<(String, String)> = inner
            .values
            .iter()
            .filter_map(|(k, v)| match v {
                OptionValue::Str(s) => Some((k.clone(), s.clone())),
                OptionValue::Bin(b) => {
                    String::from_utf8(b.clone()).ok().map(|s| (k.clone(), s))
                }
            })
            .collect();
        entries.sort();
        entries
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("options mutex poisoned");
        f.debug_struct("Options")
            .field("values", &inner.values.len())
            .field("parents", &inner.parents.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_roundtrip() {
        let opts = Options::new();
        opts.set("databaseName", "marc");
        assert_eq!(opts.get("databaseName").as_deref(), Some("marc"));
        assert_eq!(opts.get("missing"), None);
    }

    #[test]
    fn test_child_falls_back_to_parent() {
        let parent = Options::new();
        parent.set("timeout", "30");
        let child = parent.child();
        assert_eq!(child.get("timeout").as_deref(), Some("30"));
    }

    #[test]
    fn test_local_overrides_parent() {
        let parent = Options::new();
        parent.set("timeout", "30");
        let child = parent.child();
        child.set("timeout", "5");
        assert_eq!(child.get("timeout").as_deref(), Some("5"));
        // Parent is untouched.
        assert_eq!(parent.get("timeout").as_deref(), Some("30"));
    }

    #[test]
    fn test_two_parents_resolved_in_order() {
        let first = Options::new();
        let second = Options::new();
        first.set("shared", "first");
        second.set("shared", "second");
        second.set("only", "second");

        let child = Options::child_of(&first, &second);
        assert_eq!(child.get("shared").as_deref(), Some("first"));
        assert_eq!(child.get("only").as_deref(), Some("second"));
    }

    #[test]
    fn test_dropped_parent_falls_out_of_chain() {
        let parent = Options::new();
        parent.set("key", "value");
        let child = parent.child();
        drop(parent);
        assert_eq!(child.get("key"), None);
    }

    #[test]
    fn test_typed_getters_use_default_on_garbage() {
        let opts = Options::new();
        opts.set("count", "not-a-number");
        opts.set("flag", "maybe");
        assert_eq!(opts.get_int("count", 7), 7);
        assert!(!opts.get_bool("flag", false));
        assert!(opts.get_bool("flag", true));
        assert_eq!(opts.get_int("absent", -1), -1);
    }

    #[test]
    fn test_typed_getters_parse_valid_values() {
        let opts = Options::new();
        opts.set_int("count", 42);
        opts.set("flag", "1");
        opts.set("other", "false");
        assert_eq!(opts.get_int("count", 0), 42);
        assert!(opts.get_bool("flag", false));
        assert!(!opts.get_bool("other", true));
    }

    #[test]
    fn test_binary_values() {
        let opts = Options::new();
        opts.set_binary("blob", &[0u8, 159, 146, 150]);
        assert_eq!(opts.get_binary("blob"), Some(vec![0u8, 159, 146, 150]));
        // Not valid UTF-8, so the string getter reports absence.
        assert_eq!(opts.get("blob"), None);
    }

    #[test]
    fn test_unset_reveals_parent_value() {
        let parent = Options::new();
        parent.set("syntax", "usmarc");
        let child = parent.child();
        child.set("syntax", "xml");
        child.unset("syntax");
        assert_eq!(child.get("syntax").as_deref(), Some("usmarc"));
    }

    #[test]
    fn test_local_entries_exclude_parents() {
        let parent = Options::new();
        parent.set("inherited", "yes");
        let child = parent.child();
        child.set("b", "2");
        child.set("a", "1");
        assert_eq!(
            child.local_entries(),
            vec![("a".into(), "1".into()), ("b".into(), "2".into())]
        );
    }
}

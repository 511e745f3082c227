//! Size limits for keys and entities
//!
//! Limits are enforced on the write path (key validation, entity encoding).
//! The defaults follow the reference datastore's published limits.

/// Size limits for keys and property bags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of elements in a key path (default: 100)
    pub max_path_depth: usize,

    /// Maximum kind length in bytes (default: 1500)
    pub max_kind_bytes: usize,

    /// Maximum key name length in bytes (default: 1500)
    pub max_name_bytes: usize,

    /// Maximum nesting depth of structured properties (default: 20)
    pub max_nesting_depth: usize,

    /// Maximum number of values in one repeated property (default: 20000)
    pub max_repeated_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_path_depth: 100,
            max_kind_bytes: 1500,
            max_name_bytes: 1500,
            max_nesting_depth: 20,
            max_repeated_len: 20_000,
        }
    }
}

impl Limits {
    /// Create limits with small values for testing
    pub fn with_small_limits() -> Self {
        Limits {
            max_path_depth: 3,
            max_kind_bytes: 16,
            max_name_bytes: 16,
            max_nesting_depth: 2,
            max_repeated_len: 4,
        }
    }
}

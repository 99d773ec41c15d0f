//! Optimizer configuration
//!
//! Phase switches and limits for one compilation. Every switch defaults to
//! on; the limits default to what a background compile can afford.

use serde::{Deserialize, Serialize};

use crate::error::GlobOptError;

/// Configuration of the global optimizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobOptConfig {
    /// Run the global optimizer at all (default: true)
    pub glob_opt: bool,
    /// Copy-propagate field values (default: true)
    pub field_copy_prop: bool,
    /// Sequence object type checks on property accesses (default: true)
    pub obj_type_spec: bool,
    /// Hoist array type checks out of loops (default: true)
    pub array_check_hoist: bool,
    /// Hoist head segment loads out of loops (default: true)
    pub array_segment_hoist: bool,
    /// Hoist array length loads out of loops (default: true)
    pub array_length_hoist: bool,
    /// Eliminate bound checks proven redundant (default: true)
    pub bound_check_elimination: bool,
    /// Hoist bound checks out of loops (default: true)
    pub bound_check_hoist: bool,
    /// Hoist bound checks using the loop iteration count (default: true)
    pub loop_count_based_bound_check_hoist: bool,
    /// Int-specialize likely-int values (default: true)
    pub aggressive_int_type_spec: bool,
    /// Emit inline fast paths (default: true)
    pub fast_paths: bool,
    /// Optimize functions containing try/catch (default: true)
    pub optimize_try_catch: bool,
    /// Optimize functions containing try/finally (default: true)
    pub optimize_try_finally: bool,
    /// Compile in the simple (non-optimizing) tier (default: false)
    pub simple_jit: bool,
    /// Abandon functions with more instructions than this (default: 50000)
    pub max_instr_count: usize,
    /// Abandon functions with more loops than this (default: 1000)
    pub max_loop_count: usize,
}

impl Default for GlobOptConfig {
    fn default() -> Self {
        GlobOptConfig {
            glob_opt: true,
            field_copy_prop: true,
            obj_type_spec: true,
            array_check_hoist: true,
            array_segment_hoist: true,
            array_length_hoist: true,
            bound_check_elimination: true,
            bound_check_hoist: true,
            loop_count_based_bound_check_hoist: true,
            aggressive_int_type_spec: true,
            fast_paths: true,
            optimize_try_catch: true,
            optimize_try_finally: true,
            simple_jit: false,
            max_instr_count: 50_000,
            max_loop_count: 1_000,
        }
    }
}

impl GlobOptConfig {
    /// Parse a configuration; absent fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, GlobOptError> {
        serde_json::from_str(json).map_err(GlobOptError::Config)
    }

    /// Configuration with every optimization switched off
    pub fn disabled() -> Self {
        GlobOptConfig {
            glob_opt: false,
            field_copy_prop: false,
            obj_type_spec: false,
            array_check_hoist: false,
            array_segment_hoist: false,
            array_length_hoist: false,
            bound_check_elimination: false,
            bound_check_hoist: false,
            loop_count_based_bound_check_hoist: false,
            aggressive_int_type_spec: false,
            ..GlobOptConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_keeps_defaults() {
        let config = GlobOptConfig::from_json(r#"{ "bound_check_hoist": false, "max_loop_count": 4 }"#).unwrap();
        assert!(!config.bound_check_hoist);
        assert_eq!(config.max_loop_count, 4);
        assert!(config.array_check_hoist);
        assert_eq!(config.max_instr_count, GlobOptConfig::default().max_instr_count);
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(matches!(
            GlobOptConfig::from_json("{ \"glob_opt\": 3 }"),
            Err(GlobOptError::Config(_))
        ));
    }

    #[test]
    fn test_disabled() {
        let config = GlobOptConfig::disabled();
        assert!(!config.glob_opt);
        assert!(!config.bound_check_elimination);
        assert!(config.fast_paths);
    }
}

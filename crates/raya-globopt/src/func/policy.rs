//! Per-function optimization policies
//!
//! Decided once before the optimizer runs, from the configuration and what
//! the front end reported about the function. Reading a policy earlier is
//! an ordering bug and reports [`GlobOptError::PolicyNotDecided`].

use serde::Serialize;

use crate::config::GlobOptConfig;
use crate::error::GlobOptError;

/// What the front end knows about the function being compiled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FuncTraits {
    pub has_try: bool,
    pub has_finally: bool,
    /// Compiling a single loop body for on-stack replacement
    pub is_loop_body: bool,
    pub is_generator: bool,
    /// Profile data disabled try/finally optimization
    pub try_finally_disabled_by_profile: bool,
    /// Profile data disabled array check hoisting
    pub array_check_hoist_disabled_by_profile: bool,
    /// Profile data disabled aggressive int specialization
    pub aggressive_int_type_spec_disabled_by_profile: bool,
}

/// Decided policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FuncPolicies {
    pub do_fast_paths: bool,
    pub do_loop_fast_paths: bool,
    pub do_glob_opt: bool,
    pub do_inline: bool,
    pub do_optimize_try: bool,
    pub is_loop_body: bool,
    pub is_simple_jit: bool,
    pub is_array_check_hoist_disabled: bool,
    pub is_aggressive_int_type_spec_disabled: bool,
}

impl FuncPolicies {
    pub fn decide(config: &GlobOptConfig, traits: &FuncTraits) -> Self {
        let is_simple_jit = config.simple_jit;
        let can_optimize_try_catch = !traits.is_loop_body && config.optimize_try_catch;
        let can_optimize_try_finally =
            !traits.is_loop_body && config.optimize_try_finally && !traits.try_finally_disabled_by_profile;

        let do_glob_opt = config.glob_opt
            && !is_simple_jit
            && !traits.is_generator
            && (!traits.has_try || can_optimize_try_catch)
            && (!traits.has_finally || can_optimize_try_finally);
        let do_fast_paths = config.fast_paths && !is_simple_jit;

        FuncPolicies {
            do_fast_paths,
            do_loop_fast_paths: do_fast_paths,
            do_glob_opt,
            do_inline: do_glob_opt && !traits.has_try,
            do_optimize_try: do_glob_opt,
            is_loop_body: traits.is_loop_body,
            is_simple_jit,
            is_array_check_hoist_disabled: !config.array_check_hoist || traits.array_check_hoist_disabled_by_profile,
            is_aggressive_int_type_spec_disabled: !config.aggressive_int_type_spec
                || traits.aggressive_int_type_spec_disabled_by_profile,
        }
    }
}

/// Reads a decided policy, or reports which one was read too early
pub(crate) fn read(
    policies: Option<&FuncPolicies>,
    policy: &'static str,
    get: impl FnOnce(&FuncPolicies) -> bool,
) -> Result<bool, GlobOptError> {
    debug_assert!(policies.is_some(), "policy {} read before it was decided", policy);
    policies.map(get).ok_or(GlobOptError::PolicyNotDecided { policy })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policies() {
        let policies = FuncPolicies::decide(&GlobOptConfig::default(), &FuncTraits::default());
        assert!(policies.do_glob_opt);
        assert!(policies.do_inline);
        assert!(policies.do_fast_paths);
        assert!(!policies.is_array_check_hoist_disabled);
    }

    #[test]
    fn test_try_in_loop_body_disables_glob_opt() {
        let traits = FuncTraits {
            has_try: true,
            is_loop_body: true,
            ..Default::default()
        };
        let policies = FuncPolicies::decide(&GlobOptConfig::default(), &traits);
        assert!(!policies.do_glob_opt);
        assert!(!policies.do_inline);
    }

    #[test]
    fn test_try_disables_inlining_only() {
        let traits = FuncTraits {
            has_try: true,
            ..Default::default()
        };
        let policies = FuncPolicies::decide(&GlobOptConfig::default(), &traits);
        assert!(policies.do_glob_opt);
        assert!(!policies.do_inline);
    }

    #[test]
    fn test_simple_jit() {
        let config = GlobOptConfig {
            simple_jit: true,
            ..Default::default()
        };
        let policies = FuncPolicies::decide(&config, &FuncTraits::default());
        assert!(!policies.do_glob_opt);
        assert!(!policies.do_fast_paths);
        assert!(policies.is_simple_jit);
    }

    #[test]
    fn test_profile_disables_array_check_hoist() {
        let traits = FuncTraits {
            array_check_hoist_disabled_by_profile: true,
            ..Default::default()
        };
        let policies = FuncPolicies::decide(&GlobOptConfig::default(), &traits);
        assert!(policies.is_array_check_hoist_disabled);
    }
}

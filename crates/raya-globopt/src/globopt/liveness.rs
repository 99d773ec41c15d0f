//! Type-specialization liveness
//!
//! Every var sym can be live in several representations at once: boxed
//! (var), int32, float64 or simd128. Int32 liveness is lossy when the int
//! value was produced by a truncating conversion and does not represent the
//! var value exactly. Sets are keyed by the var sym.

use crate::ir::bitset::SymSet;

/// Liveness of every sym per representation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSpecLiveness {
    pub var: SymSet,
    pub int32: SymSet,
    pub lossy_int32: SymSet,
    pub float64: SymSet,
    pub simd128: SymSet,
}

impl TypeSpecLiveness {
    /// Live in any representation
    pub fn live(&self) -> SymSet {
        self.var.union(&self.int32).union(&self.float64).union(&self.simd128)
    }

    /// Int32-live without loss
    pub fn lossless_int32(&self) -> SymSet {
        self.int32.difference(&self.lossy_int32)
    }
}

/// What a loop back edge carries into the header
#[derive(Debug, Clone, Copy)]
pub struct BackEdgeInfo<'a> {
    pub syms_used_before_defined: &'a SymSet,
    /// Syms whose value on the edge is likely an int
    pub likely_int_on_edge: &'a SymSet,
    /// Syms whose value on the edge is likely a number
    pub likely_number_on_edge: &'a SymSet,
}

/// Merged liveness plus the conversions a back edge needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessMerge {
    pub liveness: TypeSpecLiveness,
    /// Var on the edge, kept int32 in the header
    pub int32_to_convert_on_back_edge: SymSet,
    /// Var on the edge, kept float64 in the header
    pub float64_to_convert_on_back_edge: SymSet,
}

impl LivenessMerge {
    pub fn symbols_to_convert_on_back_edge(&self) -> SymSet {
        self.int32_to_convert_on_back_edge
            .union(&self.float64_to_convert_on_back_edge)
    }
}

/// Join the representations of two incoming edges
///
/// A sym stays int32 only when it is int32 on both sides, and its int32
/// value is lossy if it is lossy on either side. It is float64 when it is
/// float64 on both sides, or lossless int32 on one side and float64 on the
/// other. Whatever is live on both sides but no longer specialized falls
/// back to var.
pub fn merge_type_spec_liveness(
    to: &TypeSpecLiveness,
    from: &TypeSpecLiveness,
    back_edge: Option<BackEdgeInfo<'_>>,
) -> LivenessMerge {
    let mut int32 = to.int32.intersection(&from.int32);
    let mut lossy_int32 = to.lossy_int32.union(&from.lossy_int32).intersection(&int32);

    let mut float64 = to.float64.intersection(&from.float64);
    float64.or(&to.lossless_int32().intersection(&from.float64));
    float64.or(&from.lossless_int32().intersection(&to.float64));

    let simd128 = to.simd128.intersection(&from.simd128);

    let live_both = to.live().intersection(&from.live());
    let mut var = to.var.intersection(&from.var);
    var.or(&live_both.difference(&int32.union(&float64).union(&simd128)));

    let mut merge = LivenessMerge::default();
    if let Some(edge) = back_edge {
        let var_only_on_edge = from.var.difference(&from.int32).difference(&from.float64);
        let candidates = var_only_on_edge.intersection(edge.syms_used_before_defined);

        let keep_int = to
            .int32
            .intersection(&candidates)
            .intersection(edge.likely_int_on_edge);
        let keep_float = to
            .float64
            .intersection(&candidates)
            .intersection(edge.likely_number_on_edge)
            .difference(&keep_int);

        int32.or(&keep_int);
        // The conversion on the edge bails out unless the value is an int
        lossy_int32.or(&to.lossy_int32.intersection(&keep_int));
        float64.or(&keep_float);

        merge.int32_to_convert_on_back_edge = keep_int;
        merge.float64_to_convert_on_back_edge = keep_float;
    }

    merge.liveness = TypeSpecLiveness {
        var,
        int32,
        lossy_int32,
        float64,
        simd128,
    };
    merge
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::sym::SymId;

    fn set(ids: &[u32]) -> SymSet {
        ids.iter().map(|&i| SymId(i)).collect()
    }

    #[test]
    fn test_int_on_both_sides_stays_int() {
        let to = TypeSpecLiveness {
            int32: set(&[1, 2]),
            lossy_int32: set(&[2]),
            ..Default::default()
        };
        let from = TypeSpecLiveness {
            int32: set(&[1, 2]),
            ..Default::default()
        };
        let merged = merge_type_spec_liveness(&to, &from, None).liveness;
        assert_eq!(merged.int32, set(&[1, 2]));
        assert_eq!(merged.lossy_int32, set(&[2]));
        assert!(merged.var.is_empty());
    }

    #[test]
    fn test_lossless_int_and_float_become_float() {
        let to = TypeSpecLiveness {
            int32: set(&[1, 2]),
            lossy_int32: set(&[2]),
            ..Default::default()
        };
        let from = TypeSpecLiveness {
            float64: set(&[1, 2]),
            ..Default::default()
        };
        let merged = merge_type_spec_liveness(&to, &from, None).liveness;
        assert_eq!(merged.float64, set(&[1]));
        assert!(merged.int32.is_empty());
        // Lossy int cannot become float; it falls back to var
        assert_eq!(merged.var, set(&[2]));
    }

    #[test]
    fn test_live_on_one_side_only_is_dropped() {
        let to = TypeSpecLiveness {
            var: set(&[1, 3]),
            ..Default::default()
        };
        let from = TypeSpecLiveness {
            var: set(&[1]),
            int32: set(&[3, 4]),
            ..Default::default()
        };
        let merged = merge_type_spec_liveness(&to, &from, None).liveness;
        assert_eq!(merged.var, set(&[1, 3]));
        assert!(merged.int32.is_empty());
        assert!(!merged.live().test(SymId(4)));
    }

    #[test]
    fn test_back_edge_keeps_used_before_defined_int() {
        let to = TypeSpecLiveness {
            var: set(&[1]),
            int32: set(&[1, 2]),
            ..Default::default()
        };
        let from = TypeSpecLiveness {
            var: set(&[1, 2]),
            ..Default::default()
        };
        let used = set(&[1]);
        let likely_int = set(&[1, 2]);
        let empty = SymSet::new();
        let merge = merge_type_spec_liveness(
            &to,
            &from,
            Some(BackEdgeInfo {
                syms_used_before_defined: &used,
                likely_int_on_edge: &likely_int,
                likely_number_on_edge: &empty,
            }),
        );
        assert_eq!(merge.liveness.int32, set(&[1]));
        assert_eq!(merge.int32_to_convert_on_back_edge, set(&[1]));
        assert!(merge.liveness.var.test(SymId(1)));
        assert!(merge.liveness.var.test(SymId(2)));
    }

    #[test]
    fn test_no_back_edge_promotion_on_forward_merge() {
        let to = TypeSpecLiveness {
            int32: set(&[1]),
            ..Default::default()
        };
        let from = TypeSpecLiveness {
            var: set(&[1]),
            ..Default::default()
        };
        let merge = merge_type_spec_liveness(&to, &from, None);
        assert!(merge.liveness.int32.is_empty());
        assert_eq!(merge.liveness.var, set(&[1]));
        assert!(merge.symbols_to_convert_on_back_edge().is_empty());
    }
}

//! Unexecuted range computation.

use crate::source_map::extract::EvaluationSample;
use crate::types::range::{Position, Range};

/// Parts of `evaluation_range` not covered by any executed sample, sorted.
///
/// Samples stepped over in an unexecuted branch do not count as covered.
/// With no samples at all, `start_hint` marks a covered point that splits the
/// result; without it the whole `evaluation_range` is returned.
///
/// Together with the executed sample ranges the result covers every position
/// of `evaluation_range`, and it never overlaps an executed sample.
pub fn unexecuted_ranges(
    samples: &[EvaluationSample],
    evaluation_range: Range,
    start_hint: Option<Position>,
) -> Vec<Range> {
    let mut covered: Vec<Range> = samples
        .iter()
        .filter(|sample| sample.executed)
        .map(|sample| sample.range)
        .collect();
    if samples.is_empty()
        && let Some(hint) = start_hint
    {
        covered.push(Range::point(hint));
    }
    covered.sort_by_key(|range| (range.start(), range.end()));

    let (lower, upper) = (evaluation_range.start(), evaluation_range.end());
    let mut gaps = Vec::new();
    let mut cursor = lower;
    for range in covered {
        let start = range.start().clamp(lower, upper);
        let end = range.end().clamp(lower, upper);
        if start > cursor {
            gaps.push(Range::from_positions(cursor, start));
        }
        cursor = cursor.max(end);
    }
    if cursor < upper {
        gaps.push(Range::from_positions(cursor, upper));
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_map::compiler::compile;
    use crate::source_map::extract::{Extraction, extract};
    use crate::types::range::contains;
    use crate::virtual_machine::vm::config::VmConfig;
    use crate::virtual_machine::vm::context::ProgramContext;
    use crate::virtual_machine::vm::{Completion, Vm};

    fn coverage(source: &str) -> (Range, Extraction, Vec<Range>) {
        let vm = Vm::new(VmConfig::bch_2025());
        let compiled = compile(source, &vm).unwrap();
        let ctx = ProgramContext::default();
        let trace = vm.debug(
            &ctx,
            vm.initial_state(compiled.bytecode(), &ctx),
            Completion::Final,
        );
        let range = compiled.script.range;
        let extraction = extract(&compiled.tree, range, &compiled.script.script, &trace);
        let gaps = unexecuted_ranges(&extraction.samples, range, None);
        (range, extraction, gaps)
    }

    #[test]
    fn code_after_return_is_unexecuted() {
        let (_, extraction, gaps) = coverage("OP_0 OP_RETURN OP_0");
        assert_eq!(extraction.samples.len(), 2);
        assert_eq!(gaps, vec![Range::new(1, 5, 1, 20)]);
        assert!(contains(&gaps[0], &Range::new(1, 6, 1, 15), true));
    }

    #[test]
    fn skipped_branch_is_unexecuted() {
        let (_, _, gaps) = coverage("OP_0 OP_IF <2> OP_ELSE <3> OP_ENDIF");
        let skipped = Range::new(1, 12, 1, 15);
        let taken = Range::new(1, 24, 1, 27);
        assert!(gaps.iter().any(|gap| contains(gap, &skipped, true)));
        assert!(!gaps.iter().any(|gap| gap.overlaps(&taken)));
    }

    #[test]
    fn nested_conditionals_in_dead_branch_are_unexecuted() {
        let (_, extraction, gaps) =
            coverage("OP_0 OP_IF OP_1 OP_IF OP_2 OP_ENDIF OP_ENDIF OP_1");
        let executed: Vec<bool> = extraction.samples.iter().map(|s| s.executed).collect();
        assert_eq!(
            executed,
            vec![true, true, true, false, false, false, false, true, true]
        );
        assert_eq!(
            gaps,
            vec![
                Range::new(1, 5, 1, 6),
                Range::new(1, 11, 1, 37),
                Range::new(1, 45, 1, 46),
            ]
        );
    }

    #[test]
    fn ranges_partition_the_evaluation() {
        let sources = [
            "OP_0 OP_RETURN OP_0",
            "OP_1 OP_IF <2> OP_ELSE <3> OP_ENDIF",
            "OP_0 OP_IF <2>\nOP_ENDIF OP_1",
            "0x02 0xabcd OP_SIZE OP_NIP",
            "OP_0 OP_IF OP_1 OP_IF OP_2 OP_ELSE OP_3 OP_ENDIF OP_ENDIF OP_1",
            "OP_1 OP_VERIFY OP_0 OP_VERIFY OP_1",
        ];
        for source in sources {
            let (range, extraction, gaps) = coverage(source);
            let executed: Vec<Range> = extraction
                .samples
                .iter()
                .filter(|s| s.executed)
                .map(|s| s.range)
                .collect();
            for gap in &gaps {
                assert!(!gap.is_empty(), "{source}");
                assert!(executed.iter().all(|r| !gap.overlaps(r)), "{source}");
            }
            let mut all: Vec<Range> = executed.into_iter().chain(gaps).collect();
            all.sort_by_key(|r| (r.start(), r.end()));
            let mut cursor = range.start();
            for r in &all {
                assert!(r.start() <= cursor, "gap before {r} in {source}");
                cursor = cursor.max(r.end());
            }
            assert_eq!(cursor, range.end(), "{source}");
        }
    }

    #[test]
    fn empty_samples() {
        let whole = Range::new(1, 1, 3, 4);
        assert_eq!(unexecuted_ranges(&[], whole, None), vec![whole]);
        assert_eq!(
            unexecuted_ranges(&[], whole, Some(Position::new(2, 1))),
            vec![Range::new(1, 1, 2, 1), Range::new(2, 1, 3, 4)]
        );
        assert_eq!(
            unexecuted_ranges(&[], whole, Some(Position::new(1, 1))),
            vec![whole]
        );
    }
}

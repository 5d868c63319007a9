//! Default rule set: any counted DNS/DNF makes the whole entry a DNF

use super::{ClassField, RuleParams, ScoredRun, ScoringRules, DEFAULT_RULE_SET};

#[derive(Debug, Clone)]
pub struct DefaultRules {
    params: RuleParams,
}

impl DefaultRules {
    pub fn new(params: RuleParams) -> Self {
        Self { params }
    }
}

impl ScoringRules for DefaultRules {
    fn name(&self) -> &'static str {
        DEFAULT_RULE_SET
    }

    fn params(&self) -> &RuleParams {
        &self.params
    }

    fn calc_dnf(&self, _run: &ScoredRun, _field: &ClassField) -> Option<i64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{RunScore, RunTimes, ScoringRules};
    use super::*;
    use rallyx_common::db::DropReason;

    fn rules(max_runs: i64, min_runs: i64, drop_runs: i64) -> DefaultRules {
        DefaultRules::new(params(max_runs, min_runs, drop_runs))
    }

    fn times(start: Option<i64>, finish: Option<i64>, cones: i64, gates: i64) -> RunTimes {
        RunTimes {
            start_time_ms: start,
            finish_time_ms: finish,
            cones,
            gates,
        }
    }

    #[test]
    fn test_run_with_cone_penalty() {
        let score = rules(5, 0, 0).recalc_run(&times(Some(120_000), Some(125_000), 1, 0));
        assert_eq!(score.raw_time_ms, Some(5000));
        assert_eq!(score.total_time_ms, Some(7000));
        assert_eq!(score.raw_time.as_deref(), Some("5.000"));
        assert_eq!(score.total_time.as_deref(), Some("7.000"));
    }

    #[test]
    fn test_run_with_gate_penalty() {
        let score = rules(5, 0, 0).recalc_run(&times(Some(10_000), Some(52_345), 2, 1));
        assert_eq!(score.raw_time_ms, Some(42_345));
        assert_eq!(score.total_time_ms, Some(42_345 + 4000 + 10_000));
    }

    #[test]
    fn test_unrepresentable_penalty_is_invalid() {
        let rules = rules(5, 0, 0);

        let score = rules.recalc_run(&times(Some(10_000), Some(20_000), i64::MAX / 1000, 0));
        assert_eq!(score.total_time_ms, None);
        assert_eq!(score.total_time.as_deref(), Some("INVALID"));

        let score = rules.recalc_run(&times(Some(10_000), Some(20_000), 0, i64::MAX / 10));
        assert_eq!(score.total_time.as_deref(), Some("INVALID"));
    }

    #[test]
    fn test_entry_sum_overflow_is_invalid() {
        let mut huge = finished(1, 1, 1000);
        huge.total_time_ms = Some(i64::MAX - 10);
        let runs = vec![huge, finished(2, 2, 100)];
        let score = rules(5, 0, 0).recalc_entry(&runs, 0, &ClassField::new());
        assert_eq!(score.event_time_ms, None);
        assert_eq!(score.event_time.as_deref(), Some("INVALID"));
        assert_eq!(score.event_runs, 2);
    }

    #[test]
    fn test_dns_run() {
        let score = rules(5, 0, 0).recalc_run(&times(Some(0), Some(125_000), 0, 0));
        assert_eq!(score.raw_time.as_deref(), Some("DNS"));
        assert_eq!(score.total_time.as_deref(), Some("DNS"));
        assert_eq!(score.total_time_ms, None);
        assert_eq!(score.raw_time_ms, None);
    }

    #[test]
    fn test_dns_wins_over_dnf() {
        let score = rules(5, 0, 0).recalc_run(&times(Some(0), Some(0), 0, 0));
        assert_eq!(score.total_time.as_deref(), Some("DNS"));
    }

    #[test]
    fn test_dnf_run() {
        let score = rules(5, 0, 0).recalc_run(&times(None, Some(0), 0, 0));
        assert_eq!(score.total_time.as_deref(), Some("DNF"));
        assert_eq!(score.total_time_ms, None);
    }

    #[test]
    fn test_pending_run() {
        let r = rules(5, 0, 0);
        assert_eq!(r.recalc_run(&times(Some(1000), None, 0, 0)), RunScore::pending());
        assert_eq!(r.recalc_run(&times(None, Some(1000), 0, 0)), RunScore::pending());
    }

    #[test]
    fn test_finish_before_start_is_invalid() {
        let r = rules(5, 0, 0);
        let score = r.recalc_run(&times(Some(5000), Some(5000), 0, 0));
        assert_eq!(score.total_time.as_deref(), Some("INVALID"));
        assert_eq!(score.total_time_ms, None);

        let score = r.recalc_run(&times(Some(5000), Some(4000), 3, 0));
        assert_eq!(score.raw_time.as_deref(), Some("INVALID"));
    }

    #[test]
    fn test_recalc_run_is_idempotent() {
        let r = rules(5, 0, 0);
        let input = times(Some(61_000), Some(118_432), 3, 1);
        assert_eq!(r.recalc_run(&input), r.recalc_run(&input));
    }

    #[test]
    fn test_entry_sums_runs_and_penalties() {
        let runs = vec![finished(1, 1, 40_000), finished(2, 2, 42_000), finished(3, 3, 41_000)];
        let score = rules(5, 0, 0).recalc_entry(&runs, 2000, &ClassField::new());
        assert_eq!(score.event_time_ms, Some(125_000));
        assert_eq!(score.event_time.as_deref(), Some("2:05.000"));
        assert_eq!(score.event_penalties.as_deref(), Some("2.000"));
        assert_eq!(score.event_runs, 3);
        assert!(score.dropped.is_empty());
    }

    #[test]
    fn test_single_dnf_makes_entry_dnf() {
        let runs = vec![
            finished(1, 1, 40_000),
            dnf(2, 2),
            finished(3, 3, 41_000),
            finished(4, 4, 39_000),
        ];
        let score = rules(5, 0, 0).recalc_entry(&runs, 0, &ClassField::new());
        assert_eq!(score.event_time.as_deref(), Some("DNF"));
        assert_eq!(score.event_time_ms, Some(0));
        assert_eq!(score.event_runs, 4);
    }

    #[test]
    fn test_dns_run_also_forces_dnf() {
        let runs = vec![finished(1, 1, 40_000), dns(2, 2)];
        let score = rules(5, 0, 0).recalc_entry(&runs, 0, &ClassField::new());
        assert_eq!(score.event_time.as_deref(), Some("DNF"));
    }

    #[test]
    fn test_overflow_drops_numerically_worst() {
        let runs = vec![
            finished(1, 1, 45_000),
            finished(2, 2, 40_000),
            finished(3, 3, 50_000),
            finished(4, 4, 41_000),
            finished(5, 5, 39_000),
        ];
        let score = rules(3, 0, 0).recalc_entry(&runs, 0, &ClassField::new());

        assert_eq!(score.event_runs, 3);
        assert_eq!(score.dropped.len(), 2);
        assert_eq!(score.drop_reason(3), Some(DropReason::Overflow));
        assert_eq!(score.drop_reason(1), Some(DropReason::Overflow));
        assert_eq!(score.event_time_ms, Some(120_000));
    }

    #[test]
    fn test_overflow_sorts_dnf_last() {
        let runs = vec![dnf(1, 1), finished(2, 2, 40_000), finished(3, 3, 41_000)];
        let score = rules(2, 0, 0).recalc_entry(&runs, 0, &ClassField::new());
        assert_eq!(score.drop_reason(1), Some(DropReason::Overflow));
        assert_eq!(score.event_time_ms, Some(81_000));
    }

    #[test]
    fn test_drop_worst_above_min_runs() {
        let runs = vec![
            finished(1, 1, 45_000),
            finished(2, 2, 40_000),
            finished(3, 3, 50_000),
            finished(4, 4, 41_000),
        ];
        let score = rules(5, 2, 1).recalc_entry(&runs, 0, &ClassField::new());

        assert_eq!(score.event_runs, 4);
        assert_eq!(score.dropped, vec![(3, DropReason::Worst)]);
        assert_eq!(score.event_time_ms, Some(126_000));
    }

    #[test]
    fn test_no_drop_at_min_runs() {
        let runs = vec![finished(1, 1, 45_000), finished(2, 2, 40_000)];
        let score = rules(5, 2, 1).recalc_entry(&runs, 0, &ClassField::new());
        assert!(score.dropped.is_empty());
        assert_eq!(score.event_time_ms, Some(85_000));
    }

    #[test]
    fn test_drop_count_clamped_to_min_runs() {
        let runs = vec![
            finished(1, 1, 45_000),
            finished(2, 2, 40_000),
            finished(3, 3, 50_000),
        ];
        let score = rules(5, 2, 2).recalc_entry(&runs, 0, &ClassField::new());
        assert_eq!(score.dropped, vec![(3, DropReason::Worst)]);
    }

    #[test]
    fn test_dropped_dnf_does_not_force_entry_dnf() {
        let runs = vec![
            finished(1, 1, 45_000),
            dnf(2, 2),
            finished(3, 3, 50_000),
            finished(4, 4, 41_000),
        ];
        let score = rules(5, 3, 1).recalc_entry(&runs, 0, &ClassField::new());
        assert_eq!(score.dropped, vec![(2, DropReason::Worst)]);
        assert_eq!(score.event_time_ms, Some(136_000));
    }

    #[test]
    fn test_overflow_and_worst_combined() {
        let runs: Vec<ScoredRun> = (1..=7)
            .map(|i| finished(i, i, 40_000 + i * 1000))
            .collect();
        let score = rules(5, 3, 1).recalc_entry(&runs, 0, &ClassField::new());

        assert_eq!(score.event_runs, 5);
        assert_eq!(score.drop_reason(7), Some(DropReason::Overflow));
        assert_eq!(score.drop_reason(6), Some(DropReason::Overflow));
        assert_eq!(score.drop_reason(5), Some(DropReason::Worst));
        assert_eq!(score.event_time_ms, Some(41_000 + 42_000 + 43_000 + 44_000));
    }

    #[test]
    fn test_ties_break_by_creation_order() {
        let runs = vec![
            finished(9, 3, 40_000),
            finished(4, 1, 40_000),
            finished(6, 2, 40_000),
        ];
        let score = rules(2, 0, 0).recalc_entry(&runs, 0, &ClassField::new());
        assert_eq!(score.dropped, vec![(9, DropReason::Overflow)]);
    }

    #[test]
    fn test_entry_result_independent_of_input_order() {
        let mut runs = vec![
            finished(1, 1, 45_000),
            finished(2, 2, 40_000),
            dnf(3, 3),
            finished(4, 4, 41_000),
            finished(5, 5, 44_000),
            finished(6, 6, 39_000),
        ];
        let r = rules(5, 3, 1);
        let forward = r.recalc_entry(&runs, 500, &ClassField::new());
        runs.reverse();
        let backward = r.recalc_entry(&runs, 500, &ClassField::new());

        let mut a = forward.dropped.clone();
        let mut b = backward.dropped.clone();
        a.sort_by_key(|(id, _)| *id);
        b.sort_by_key(|(id, _)| *id);
        assert_eq!(a, b);
        assert_eq!(forward.event_time_ms, backward.event_time_ms);
        assert_eq!(forward.event_runs, backward.event_runs);
    }

    #[test]
    fn test_entry_without_runs() {
        let score = rules(5, 0, 0).recalc_entry(&[], 0, &ClassField::new());
        assert_eq!(score.event_time_ms, None);
        assert_eq!(score.event_time, None);
        assert_eq!(score.event_runs, 0);
    }
}

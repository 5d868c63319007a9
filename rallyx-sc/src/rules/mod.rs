//! Scoring rule strategies
//!
//! Every rule set shares one interface, [`ScoringRules`]. Variants are plain
//! data-driven structs selected by the `rule_set` identifier stored on the
//! event; they differ only in how an unresolved (DNS/DNF) run is scored.
//!
//! The strategies are pure: callers load the stored fields, hand them over and
//! persist whatever comes back. That keeps recomputation a deterministic
//! function of stored inputs, so it can be repeated any number of times.

mod class_bogey;
mod default;

pub use class_bogey::ClassBogeyRules;
pub use default::DefaultRules;

use rallyx_common::config::RulesConfig;
use rallyx_common::db::{DropReason, Event, Run};
use rallyx_common::time::{compare_times, format_time};
use std::collections::HashMap;

/// Rule set identifier of [`DefaultRules`]
pub const DEFAULT_RULE_SET: &str = "default";
/// Rule set identifier of [`ClassBogeyRules`]
pub const CLASS_BOGEY_RULE_SET: &str = "class_bogey";

const MS_PER_SECOND: i64 = 1000;

/// Numeric parameters every rule set carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleParams {
    pub cone_penalty_s: i64,
    pub gate_penalty_s: i64,
    pub dnf_penalty_s: i64,
    pub max_runs: i64,
    pub min_runs: i64,
    pub drop_runs: i64,
    pub car_classes: Vec<String>,
}

impl RuleParams {
    /// Combine configured penalties with an event's run limits
    pub fn for_event(event: &Event, config: &RulesConfig) -> Self {
        Self {
            cone_penalty_s: config.cone_penalty_s,
            gate_penalty_s: config.gate_penalty_s,
            dnf_penalty_s: config.dnf_penalty_s,
            max_runs: event.max_runs,
            min_runs: event.min_runs,
            drop_runs: event.drop_runs,
            car_classes: config.car_classes.clone(),
        }
    }

    pub fn is_valid_class(&self, car_class: &str) -> bool {
        self.car_classes.iter().any(|c| c == car_class)
    }
}

/// Stored inputs of a run's time calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunTimes {
    pub start_time_ms: Option<i64>,
    pub finish_time_ms: Option<i64>,
    pub cones: i64,
    pub gates: i64,
}

impl From<&Run> for RunTimes {
    fn from(run: &Run) -> Self {
        Self {
            start_time_ms: run.start_time_ms,
            finish_time_ms: run.finish_time_ms,
            cones: run.cones,
            gates: run.gates,
        }
    }
}

/// Derived time fields of a run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunScore {
    pub raw_time_ms: Option<i64>,
    pub total_time_ms: Option<i64>,
    pub raw_time: Option<String>,
    pub total_time: Option<String>,
}

impl RunScore {
    /// Inputs incomplete, nothing to show yet
    pub fn pending() -> Self {
        Self::default()
    }

    fn labelled(label: &str) -> Self {
        Self {
            raw_time_ms: None,
            total_time_ms: None,
            raw_time: Some(label.to_string()),
            total_time: Some(label.to_string()),
        }
    }
}

/// One `scored` run as seen by entry aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredRun {
    pub run_id: i64,
    pub run_number: Option<i64>,
    pub start_time_ms: Option<i64>,
    pub finish_time_ms: Option<i64>,
    pub total_time_ms: Option<i64>,
}

impl ScoredRun {
    /// A DNS or DNF sentinel, or a run whose total could not be computed
    pub fn is_unresolved(&self) -> bool {
        self.start_time_ms == Some(0)
            || self.finish_time_ms == Some(0)
            || self.total_time_ms.is_none()
    }
}

impl From<&Run> for ScoredRun {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.run_id,
            run_number: run.run_number,
            start_time_ms: run.start_time_ms,
            finish_time_ms: run.finish_time_ms,
            total_time_ms: run.total_time_ms,
        }
    }
}

/// Slowest recorded raw time per run number among one class's entrants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassField {
    slowest_raw_ms: HashMap<i64, i64>,
}

impl ClassField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one raw time, keeping the slowest per run number
    pub fn record(&mut self, run_number: i64, raw_time_ms: i64) {
        let slot = self.slowest_raw_ms.entry(run_number).or_insert(raw_time_ms);
        if raw_time_ms > *slot {
            *slot = raw_time_ms;
        }
    }

    pub fn slowest_raw(&self, run_number: i64) -> Option<i64> {
        self.slowest_raw_ms.get(&run_number).copied()
    }
}

/// Aggregated result for one entry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryScore {
    pub event_time_ms: Option<i64>,
    pub event_time: Option<String>,
    pub event_penalties: Option<String>,
    /// Counted runs after the `max_runs` cut
    pub event_runs: i64,
    /// Runs excluded from the sum and why
    pub dropped: Vec<(i64, DropReason)>,
}

impl EntryScore {
    /// Aggregate too large to represent
    fn invalid(
        event_penalties: Option<String>,
        event_runs: i64,
        dropped: Vec<(i64, DropReason)>,
    ) -> Self {
        Self {
            event_time_ms: None,
            event_time: Some("INVALID".to_string()),
            event_penalties,
            event_runs,
            dropped,
        }
    }

    pub fn drop_reason(&self, run_id: i64) -> Option<DropReason> {
        self.dropped
            .iter()
            .find(|(id, _)| *id == run_id)
            .map(|(_, reason)| *reason)
    }
}

/// `count` penalties of `seconds` each, in milliseconds; `None` on overflow
pub(crate) fn penalty_ms(count: i64, seconds: i64) -> Option<i64> {
    count.checked_mul(seconds)?.checked_mul(MS_PER_SECOND)
}

/// Scoring policy shared by all rule-set variants
pub trait ScoringRules: Send + Sync {
    /// Rule set identifier as stored on events
    fn name(&self) -> &'static str;

    fn params(&self) -> &RuleParams;

    /// Substitute time for an unresolved run.
    ///
    /// `None` means the run cannot be substituted and forces the whole entry
    /// to DNF.
    fn calc_dnf(&self, run: &ScoredRun, field: &ClassField) -> Option<i64>;

    /// Whether [`calc_dnf`](Self::calc_dnf) reads other entrants' times
    fn needs_class_field(&self) -> bool {
        false
    }

    /// Compute a run's derived time fields
    fn recalc_run(&self, times: &RunTimes) -> RunScore {
        let params = self.params();
        match (times.start_time_ms, times.finish_time_ms) {
            (Some(0), _) => RunScore::labelled("DNS"),
            (_, Some(0)) => RunScore::labelled("DNF"),
            (Some(start), Some(finish)) if finish <= start => RunScore::labelled("INVALID"),
            (Some(start), Some(finish)) => {
                let raw_time_ms = finish - start;
                let Some(total_time_ms) = penalty_ms(times.cones, params.cone_penalty_s)
                    .zip(penalty_ms(times.gates, params.gate_penalty_s))
                    .and_then(|(cones, gates)| raw_time_ms.checked_add(cones)?.checked_add(gates))
                else {
                    return RunScore::labelled("INVALID");
                };
                RunScore {
                    raw_time_ms: Some(raw_time_ms),
                    total_time_ms: Some(total_time_ms),
                    raw_time: Some(format_time(raw_time_ms)),
                    total_time: Some(format_time(total_time_ms)),
                }
            }
            _ => RunScore::pending(),
        }
    }

    /// Aggregate an entry's scored runs and penalty time.
    ///
    /// `runs` must hold only the entry's `scored` runs; order does not matter.
    fn recalc_entry(&self, runs: &[ScoredRun], penalty_ms: i64, field: &ClassField) -> EntryScore {
        let params = self.params();

        let event_penalties = (penalty_ms != 0).then(|| format_time(penalty_ms));
        if runs.is_empty() {
            return EntryScore {
                event_penalties,
                ..EntryScore::default()
            };
        }

        let mut ranked: Vec<(&ScoredRun, Option<i64>)> = runs
            .iter()
            .map(|run| {
                let effective = if run.is_unresolved() {
                    self.calc_dnf(run, field)
                } else {
                    run.total_time_ms
                };
                (run, effective)
            })
            .collect();
        ranked.sort_by(|(a, a_time), (b, b_time)| {
            compare_times(*a_time, *b_time).then(a.run_id.cmp(&b.run_id))
        });

        let max_runs = params.max_runs.max(0) as usize;
        let mut dropped: Vec<(i64, DropReason)> = ranked
            .iter()
            .skip(max_runs)
            .map(|(run, _)| (run.run_id, DropReason::Overflow))
            .collect();
        ranked.truncate(max_runs);
        let event_runs = ranked.len() as i64;

        if params.drop_runs > 0 && event_runs > params.min_runs {
            let worst = params.drop_runs.min(event_runs - params.min_runs) as usize;
            let keep = ranked.len() - worst;
            dropped.extend(
                ranked
                    .iter()
                    .skip(keep)
                    .map(|(run, _)| (run.run_id, DropReason::Worst)),
            );
            ranked.truncate(keep);
        }

        let mut sum: i64 = 0;
        for (_, effective) in &ranked {
            match effective {
                Some(time_ms) if *time_ms > 0 => match sum.checked_add(*time_ms) {
                    Some(total) => sum = total,
                    None => return EntryScore::invalid(event_penalties, event_runs, dropped),
                },
                _ => {
                    return EntryScore {
                        event_time_ms: Some(0),
                        event_time: Some("DNF".to_string()),
                        event_penalties,
                        event_runs,
                        dropped,
                    };
                }
            }
        }

        let Some(event_time_ms) = sum.checked_add(penalty_ms) else {
            return EntryScore::invalid(event_penalties, event_runs, dropped);
        };
        EntryScore {
            event_time_ms: Some(event_time_ms),
            event_time: Some(format_time(event_time_ms)),
            event_penalties,
            event_runs,
            dropped,
        }
    }
}

/// Select the rule set named by an event.
///
/// Unknown identifiers fall back to [`DefaultRules`].
pub fn for_event(event: &Event, config: &RulesConfig) -> Box<dyn ScoringRules> {
    let params = RuleParams::for_event(event, config);
    match event.rule_set.as_str() {
        CLASS_BOGEY_RULE_SET => Box::new(ClassBogeyRules::new(params)),
        DEFAULT_RULE_SET => Box::new(DefaultRules::new(params)),
        other => {
            tracing::warn!(
                event_id = event.event_id,
                rule_set = other,
                "Unknown rule set, using default"
            );
            Box::new(DefaultRules::new(params))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn event(rule_set: &str) -> Event {
        Event {
            event_id: 1,
            name: "Round 1".to_string(),
            event_date: None,
            max_runs: 6,
            min_runs: 3,
            drop_runs: 1,
            rule_set: rule_set.to_string(),
        }
    }

    #[test]
    fn test_for_event_selects_variant() {
        let config = RulesConfig::default();
        assert_eq!(for_event(&event("default"), &config).name(), DEFAULT_RULE_SET);
        assert_eq!(
            for_event(&event("class_bogey"), &config).name(),
            CLASS_BOGEY_RULE_SET
        );
        assert_eq!(for_event(&event("nonsense"), &config).name(), DEFAULT_RULE_SET);
    }

    #[test]
    fn test_params_take_limits_from_event() {
        let params = RuleParams::for_event(&event("default"), &RulesConfig::default());
        assert_eq!(params.max_runs, 6);
        assert_eq!(params.min_runs, 3);
        assert_eq!(params.drop_runs, 1);
        assert_eq!(params.cone_penalty_s, 2);
        assert!(params.is_valid_class("PF"));
        assert!(!params.is_valid_class("XX"));
    }

    #[test]
    fn test_class_field_keeps_slowest() {
        let mut field = ClassField::new();
        field.record(1, 45_000);
        field.record(1, 52_000);
        field.record(1, 48_000);
        assert_eq!(field.slowest_raw(1), Some(52_000));
        assert_eq!(field.slowest_raw(2), None);
    }

    #[test]
    fn test_unresolved_runs() {
        assert!(dnf(1, 1).is_unresolved());
        assert!(dns(2, 2).is_unresolved());
        assert!(!finished(3, 3, 40_000).is_unresolved());
    }
}

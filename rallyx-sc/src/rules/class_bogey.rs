//! Class-bogey rule set
//!
//! An unresolved run is scored as the slowest raw time any entrant of the same
//! class recorded on the same run number, plus the DNF penalty. One DNF costs
//! time instead of zeroing the entry.

use super::{penalty_ms, ClassField, RuleParams, ScoredRun, ScoringRules, CLASS_BOGEY_RULE_SET};

#[derive(Debug, Clone)]
pub struct ClassBogeyRules {
    params: RuleParams,
}

impl ClassBogeyRules {
    pub fn new(params: RuleParams) -> Self {
        Self { params }
    }
}

impl ScoringRules for ClassBogeyRules {
    fn name(&self) -> &'static str {
        CLASS_BOGEY_RULE_SET
    }

    fn params(&self) -> &RuleParams {
        &self.params
    }

    fn needs_class_field(&self) -> bool {
        true
    }

    fn calc_dnf(&self, run: &ScoredRun, field: &ClassField) -> Option<i64> {
        let bogey = field.slowest_raw(run.run_number?)?;
        bogey.checked_add(penalty_ms(1, self.params.dnf_penalty_s)?)
    }
}

use chrono::{Days, Months, NaiveDate};

use crate::errors::AppError;
use crate::models::{Frequency, RecurrenceRule, Slot};

/// Finite iterator over the occurrences of a rule. Occurrence `n` is computed
/// from the base date, so a monthly series started on the 31st returns to the
/// 31st after clamping into a shorter month.
#[derive(Debug, Clone)]
pub struct Occurrences {
    base: Slot,
    frequency: Frequency,
    until: Option<NaiveDate>,
    limit: u32,
    index: u32,
}

impl Occurrences {
    pub fn new(base: Slot, rule: &RecurrenceRule, ceiling: u32) -> Self {
        let limit = rule.count.map_or(ceiling, |count| count.min(ceiling));
        Self {
            base,
            frequency: rule.frequency,
            until: rule.until,
            limit,
            index: 0,
        }
    }
}

impl Iterator for Occurrences {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        if self.index >= self.limit {
            return None;
        }
        let date = nth_date(self.base.date, self.frequency, self.index)?;
        if self.until.is_some_and(|until| date > until) {
            // dates only grow, so nothing later can qualify either
            self.index = self.limit;
            return None;
        }
        self.index += 1;
        Some(self.base.on(date))
    }
}

fn nth_date(base: NaiveDate, frequency: Frequency, n: u32) -> Option<NaiveDate> {
    let n64 = u64::from(n);
    match frequency {
        Frequency::Daily => base.checked_add_days(Days::new(n64)),
        Frequency::Weekly => base.checked_add_days(Days::new(n64 * 7)),
        Frequency::Biweekly => base.checked_add_days(Days::new(n64 * 14)),
        Frequency::Monthly => base.checked_add_months(Months::new(n)),
        Frequency::Yearly => base.checked_add_months(Months::new(n.checked_mul(12)?)),
    }
}

/// Checks that the rule is bounded and starts no earlier than its base.
pub fn validate_rule(base: &Slot, rule: &RecurrenceRule) -> Result<(), AppError> {
    if rule.until.is_none() && rule.count.is_none() {
        return Err(AppError::Validation(
            "recurrence needs an end date or an occurrence count".to_string(),
        ));
    }
    if rule.count == Some(0) {
        return Err(AppError::Validation(
            "occurrence count must be at least 1".to_string(),
        ));
    }
    if let Some(until) = rule.until {
        if until < base.date {
            return Err(AppError::Validation(format!(
                "recurrence end date {until} is before the first occurrence {}",
                base.date
            )));
        }
    }
    Ok(())
}

/// Whether the ceiling stops the series before the rule's own bound would.
pub fn cut_by_ceiling(base: &Slot, rule: &RecurrenceRule, ceiling: u32) -> bool {
    if rule.count.is_some_and(|count| count <= ceiling) {
        return false;
    }
    // the first occurrence the ceiling drops
    match nth_date(base.date, rule.frequency, ceiling) {
        Some(next) => rule.until.map_or(true, |until| next <= until),
        None => false,
    }
}

/// Expands a base slot into its ordered occurrences, the base included.
pub fn expand(base: Slot, rule: &RecurrenceRule, ceiling: u32) -> Result<Vec<Slot>, AppError> {
    validate_rule(&base, rule)?;
    Ok(Occurrences::new(base, rule, ceiling).collect())
}

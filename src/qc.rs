//! Range checks on scenario attributes.
//!
//! Each rule carries a min/max and a severity flag. Out-of-range values are
//! kept and reported; missing values are replaced by the rule's fill value and
//! reported with the rule's blank flag.

use crate::error::{SamError, SamResult};
use crate::scenario::Scenario;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct QcRule {
    pub parameter: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default = "default_flag")]
    pub flag: u8, // Severity of an out-of-range value
    #[serde(default = "default_flag")]
    pub blank_flag: u8, // Severity of a missing value
    #[serde(default)]
    pub fill_value: Option<f64>,
}

fn default_flag() -> u8 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QcIssue {
    Missing,
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcFlag {
    pub record: String,
    pub parameter: String,
    pub value: f64, // Value after filling
    pub issue: QcIssue,
    pub severity: u8,
}

#[derive(Debug, Clone, Default)]
pub struct QcReport {
    pub flags: Vec<QcFlag>,
}

impl QcReport {
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn extend(&mut self, flags: impl IntoIterator<Item = QcFlag>) {
        self.flags.extend(flags);
    }

    pub fn max_severity(&self) -> u8 {
        self.flags.iter().map(|f| f.severity).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QcTable {
    rules: Vec<QcRule>,
}

impl QcTable {
    pub fn new(rules: Vec<QcRule>) -> SamResult<Self> {
        for rule in &rules {
            if !Scenario::ATTRIBUTES.contains(&rule.parameter.as_str()) {
                return Err(SamError::config(format!(
                    "qc rule names unknown parameter '{}'",
                    rule.parameter
                )));
            }
            if let (Some(min), Some(max)) = (rule.min, rule.max) {
                if min > max {
                    return Err(SamError::config(format!(
                        "qc rule for '{}' has min {} above max {}",
                        rule.parameter, min, max
                    )));
                }
            }
        }
        Ok(QcTable { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    // Fill and flag a single value against one rule
    fn check(rule: &QcRule, record: &str, value: &mut f64) -> Option<QcFlag> {
        if value.is_nan() {
            *value = rule.fill_value.unwrap_or(0.0);
            return Some(QcFlag {
                record: record.to_string(),
                parameter: rule.parameter.clone(),
                value: *value,
                issue: QcIssue::Missing,
                severity: rule.blank_flag,
            });
        }
        let below = rule.min.is_some_and(|min| *value < min);
        let above = rule.max.is_some_and(|max| *value > max);
        if below || above {
            return Some(QcFlag {
                record: record.to_string(),
                parameter: rule.parameter.clone(),
                value: *value,
                issue: QcIssue::OutOfRange,
                severity: rule.flag,
            });
        }
        None
    }

    pub fn apply(&self, scenario: &mut Scenario) -> Vec<QcFlag> {
        let record = scenario.id.clone();
        let mut flags = Vec::new();
        for rule in &self.rules {
            if let Some(value) = scenario.attribute_mut(&rule.parameter) {
                if let Some(flag) = Self::check(rule, &record, value) {
                    flags.push(flag);
                }
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(parameter: &str, min: f64, max: f64) -> QcRule {
        QcRule {
            parameter: parameter.to_string(),
            min: Some(min),
            max: Some(max),
            flag: 2,
            blank_flag: 3,
            fill_value: Some(0.01),
        }
    }

    #[test]
    fn missing_value_is_filled_and_flagged() {
        let table = QcTable::new(vec![rule("org_carbon", 0.0, 0.5)]).unwrap();
        let mut scenario = Scenario::uniform("s1", 5, 0.0, 0.0);
        scenario.org_carbon = f64::NAN;
        let flags = table.apply(&mut scenario);
        assert_eq!(scenario.org_carbon, 0.01);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].issue, QcIssue::Missing);
        assert_eq!(flags[0].severity, 3);
    }

    #[test]
    fn out_of_range_value_is_kept_and_flagged() {
        let table = QcTable::new(vec![rule("bulk_density", 1.0, 2.0)]).unwrap();
        let mut scenario = Scenario::uniform("s1", 5, 0.0, 0.0);
        scenario.bulk_density = 2.6;
        let flags = table.apply(&mut scenario);
        assert_eq!(scenario.bulk_density, 2.6);
        assert_eq!(flags[0].issue, QcIssue::OutOfRange);

        let mut report = QcReport::default();
        report.extend(flags);
        assert_eq!(report.max_severity(), 2);
    }

    #[test]
    fn unknown_parameter_is_a_config_error() {
        assert!(QcTable::new(vec![rule("cintcp", 0.0, 1.0)]).is_err());
    }
}

//! Case conventions for metric name fragments.
//!
//! All conversions are total: any input, including the empty string,
//! produces an output and none of them can fail.

use once_cell::sync::Lazy;
use regex::Regex;

static LOWER_UPPER_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z])([A-Z])").unwrap());

/// A single case conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseType {
    /// `BytesIn-Total` -> `bytesin-total`
    Lower,
    /// Lower case with `-` and `_` removed: `broker-id` -> `brokerid`
    LowerSingleWord,
    /// `bytesInPerSec` -> `bytes_in_per_sec`, `request-rate` -> `request_rate`
    Snake,
    /// `request-rate` -> `requestRate`, `cluster.id` -> `clusterId`
    Camel,
    FirstUpper,
    FirstLower,
}

impl CaseType {
    /// Apply this conversion to `value`.
    pub fn apply(self, value: &str) -> String {
        match self {
            CaseType::Lower => value.to_lowercase(),
            CaseType::LowerSingleWord => value.to_lowercase().replace(&['-', '_'][..], ""),
            CaseType::Snake => snake(value),
            CaseType::Camel => camel(value),
            CaseType::FirstUpper => map_first(value, char::to_uppercase),
            CaseType::FirstLower => map_first(value, char::to_lowercase),
        }
    }
}

fn snake(value: &str) -> String {
    let bounded = LOWER_UPPER_BOUNDARY.replace_all(value, "${1}_${2}");
    let mut out = String::with_capacity(bounded.len());
    let mut chars = bounded.chars().peekable();
    while let Some(c) = chars.next() {
        // Only separators between two characters are rewritten.
        if matches!(c, '-' | '.') && !out.is_empty() && chars.peek().is_some() {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out.to_lowercase()
}

/// Joins words around `-`, `_` and `.`: the character before a separator is
/// lower-cased and the one after it upper-cased. A character upper-cased by
/// an earlier join keeps its case.
fn camel(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut joined_last = false;
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if matches!(c, '-' | '_' | '.') && !out.is_empty() {
            if let Some(&next) = chars.peek() {
                if next.is_alphanumeric() {
                    chars.next();
                    if !joined_last {
                        if let Some(previous) = out.pop() {
                            out.extend(previous.to_lowercase());
                        }
                    }
                    out.extend(next.to_uppercase());
                    joined_last = true;
                    continue;
                }
            }
        }
        out.push(c);
        joined_last = false;
    }
    out
}

fn map_first<I>(value: &str, convert: fn(char) -> I) -> String
where
    I: Iterator<Item = char>,
{
    if value.trim().is_empty() {
        return value.to_string();
    }
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => convert(first).chain(chars).collect(),
        None => String::new(),
    }
}

/// An ordered chain of case conversions applied to name fragments.
///
/// The empty chain is the identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameManipulator {
    steps: Vec<CaseType>,
}

impl NameManipulator {
    /// The identity manipulator.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Build a chain from conversions applied left to right.
    pub fn of(steps: &[CaseType]) -> Self {
        Self {
            steps: steps.to_vec(),
        }
    }

    /// Append a conversion to the chain.
    #[must_use]
    pub fn then(mut self, step: CaseType) -> Self {
        self.steps.push(step);
        self
    }

    pub fn apply(&self, value: &str) -> String {
        self.steps
            .iter()
            .fold(value.to_string(), |acc, step| step.apply(&acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower() {
        assert_eq!(CaseType::Lower.apply("BytesIn-Total"), "bytesin-total");
        assert_eq!(CaseType::Lower.apply(""), "");
    }

    #[test]
    fn test_lower_single_word() {
        assert_eq!(CaseType::LowerSingleWord.apply("Broker-Id"), "brokerid");
        assert_eq!(CaseType::LowerSingleWord.apply("broker_id"), "brokerid");
    }

    #[test]
    fn test_snake() {
        assert_eq!(CaseType::Snake.apply("bytesInPerSec"), "bytes_in_per_sec");
        assert_eq!(CaseType::Snake.apply("request-rate"), "request_rate");
        assert_eq!(CaseType::Snake.apply("kafka.server"), "kafka_server");
        assert_eq!(CaseType::Snake.apply("a-b-c"), "a_b_c");
        assert_eq!(CaseType::Snake.apply(""), "");
    }

    #[test]
    fn test_camel() {
        assert_eq!(CaseType::Camel.apply("request-rate"), "requestRate");
        assert_eq!(CaseType::Camel.apply("cluster.id"), "clusterId");
        assert_eq!(CaseType::Camel.apply("records_lag_max"), "recordsLagMax");
        assert_eq!(CaseType::Camel.apply("a-b-c"), "aBC");
        assert_eq!(CaseType::Camel.apply("BytesInPerSec"), "BytesInPerSec");
    }

    #[test]
    fn test_camel_lowers_character_before_separator() {
        assert_eq!(CaseType::Camel.apply("ID-value"), "IdValue");
        assert_eq!(CaseType::Camel.apply("broker.ID.count"), "brokerIdCount");
        assert_eq!(CaseType::Camel.apply("Bytes-In-PerSec"), "BytesInPerSec");
    }

    #[test]
    fn test_camel_keeps_edge_separators() {
        assert_eq!(CaseType::Camel.apply("-leading"), "-leading");
        assert_eq!(CaseType::Camel.apply("trailing-"), "trailing-");
    }

    #[test]
    fn test_first_letter_variants() {
        assert_eq!(CaseType::FirstUpper.apply("count"), "Count");
        assert_eq!(CaseType::FirstLower.apply("BytesIn"), "bytesIn");
        assert_eq!(CaseType::FirstUpper.apply(""), "");
        assert_eq!(CaseType::FirstLower.apply("   "), "   ");
    }

    #[test]
    fn test_manipulator_chain() {
        let manipulator = NameManipulator::of(&[CaseType::Camel, CaseType::FirstLower]);
        assert_eq!(manipulator.apply("Bytes-In-PerSec"), "bytesInPerSec");

        let manipulator = NameManipulator::identity().then(CaseType::Camel).then(CaseType::FirstUpper);
        assert_eq!(manipulator.apply("std-dev"), "StdDev");
        assert_eq!(NameManipulator::identity().apply("as-is"), "as-is");
    }
}

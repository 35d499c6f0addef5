//! Parsing and total ordering of message serials.
//!
//! Wire format: `seriesId@timestamp-counter[:index]`.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// A parsed message serial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Serial {
    series_id: String,
    timestamp: u64,
    counter: u64,
    index: Option<u64>,
}

impl Serial {
    pub fn new(series_id: impl Into<String>, timestamp: u64, counter: u64, index: Option<u64>) -> Self {
        Self {
            series_id: series_id.into(),
            timestamp,
            counter,
            index,
        }
    }

    pub fn parse(value: &str) -> Result<Self, ChatError> {
        let parts: Vec<&str> = value.split('@').collect();
        let [series_id, rest] = parts.as_slice() else {
            return Err(ChatError::format(format!(
                "invalid serial '{value}': expected exactly one '@'"
            )));
        };

        let parts: Vec<&str> = rest.split('-').collect();
        let [timestamp, counter_and_index] = parts.as_slice() else {
            return Err(ChatError::format(format!(
                "invalid serial '{value}': expected 'timestamp-counter' after '@'"
            )));
        };

        let (counter, index) = match counter_and_index.split_once(':') {
            Some((counter, index)) => (counter, Some(parse_field(value, "index", index)?)),
            None => (*counter_and_index, None),
        };

        Ok(Self {
            series_id: (*series_id).to_owned(),
            timestamp: parse_field(value, "timestamp", timestamp)?,
            counter: parse_field(value, "counter", counter)?,
            index,
        })
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn index(&self) -> Option<u64> {
        self.index
    }

    /// Compare by timestamp, then counter, then series id, then index when
    /// both sides carry one. A missing index on either side compares equal.
    pub fn compare(&self, other: &Serial) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.series_id.cmp(&other.series_id))
            .then_with(|| match (self.index, other.index) {
                (Some(mine), Some(theirs)) => mine.cmp(&theirs),
                _ => Ordering::Equal,
            })
    }

    /// [`Serial::compare`] with a missing index ordered before any index, so
    /// sorting and binary search see a total order.
    pub fn total_cmp(&self, other: &Serial) -> Ordering {
        self.compare(other)
            .then_with(|| self.index.cmp(&other.index))
    }

    pub fn before(&self, other: &Serial) -> bool {
        self.compare(other) == Ordering::Less
    }

    pub fn after(&self, other: &Serial) -> bool {
        self.compare(other) == Ordering::Greater
    }

    pub fn equal(&self, other: &Serial) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

// Unparseable numeric fields are rejected rather than read as 0, so corrupt
// serials never sort as if they were the oldest message.
fn parse_field(serial: &str, field: &str, raw: &str) -> Result<u64, ChatError> {
    raw.parse::<u64>().map_err(|err| {
        ChatError::format(format!("invalid serial '{serial}': bad {field} '{raw}': {err}"))
    })
}

impl FromStr for Serial {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Serial {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Serial> for String {
    fn from(serial: Serial) -> Self {
        serial.to_string()
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}-{}", self.series_id, self.timestamp, self.counter)?;
        if let Some(index) = self.index {
            write!(f, ":{index}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatErrorKind;

    fn serial(value: &str) -> Serial {
        Serial::parse(value).expect("serial should parse")
    }

    #[test]
    fn parses_without_index() {
        let parsed = serial("abc@100-5");
        assert_eq!(parsed.series_id(), "abc");
        assert_eq!(parsed.timestamp(), 100);
        assert_eq!(parsed.counter(), 5);
        assert_eq!(parsed.index(), None);
    }

    #[test]
    fn parses_with_index() {
        let parsed = serial("abc@100-5:2");
        assert_eq!(parsed.series_id(), "abc");
        assert_eq!(parsed.counter(), 5);
        assert_eq!(parsed.index(), Some(2));
        assert_eq!(parsed.to_string(), "abc@100-5:2");
    }

    #[test]
    fn rejects_missing_or_repeated_separators() {
        for value in ["abc100-5", "a@b@100-5", "abc@1005", "abc@100-5-1"] {
            let err = Serial::parse(value).expect_err("malformed serial must fail");
            assert_eq!(err.kind, ChatErrorKind::Format, "{value}");
        }
    }

    #[test]
    fn rejects_non_numeric_fields_instead_of_defaulting_to_zero() {
        for value in ["abc@x-5", "abc@100-y", "abc@100-5:z", "abc@-5"] {
            let err = Serial::parse(value).expect_err("non-numeric field must fail");
            assert_eq!(err.kind, ChatErrorKind::Format, "{value}");
        }
    }

    #[test]
    fn timestamp_dominates() {
        assert!(serial("abc@100-5").before(&serial("abc@200-1")));
        assert!(serial("zzz@200-0").after(&serial("aaa@100-9")));
    }

    #[test]
    fn counter_breaks_timestamp_ties() {
        assert!(serial("abc@100-5").before(&serial("abc@100-6")));
    }

    #[test]
    fn series_id_breaks_counter_ties() {
        assert_eq!(
            serial("abc@100-5").before(&serial("xyz@100-5")),
            "abc" < "xyz"
        );
        assert!(serial("xyz@100-5").after(&serial("abc@100-5")));
    }

    #[test]
    fn index_only_compared_when_both_present() {
        assert!(serial("abc@100-5:1").before(&serial("abc@100-5:2")));
        assert!(serial("abc@100-5:1").equal(&serial("abc@100-5")));
        assert!(serial("abc@100-5").equal(&serial("abc@100-5:9")));
    }

    #[test]
    fn total_cmp_separates_missing_index() {
        assert_eq!(
            serial("abc@100-5").total_cmp(&serial("abc@100-5:1")),
            Ordering::Less
        );
        assert_eq!(
            serial("abc@100-5:1").total_cmp(&serial("abc@100-5")),
            Ordering::Greater
        );
        assert_eq!(
            serial("abc@100-5:1").total_cmp(&serial("abc@100-5:1")),
            Ordering::Equal
        );
    }

    #[test]
    fn exactly_one_relation_holds_and_order_is_transitive() {
        let values: Vec<Serial> = [
            "abc@100-5",
            "abc@100-6",
            "xyz@100-5",
            "abc@200-1",
            "abc@200-1:0",
            "abc@200-1:3",
            "b@50-50",
        ]
        .iter()
        .map(|value| serial(value))
        .collect();

        for a in &values {
            for b in &values {
                let relations = [a.before(b), a.after(b), a.equal(b)];
                assert_eq!(relations.iter().filter(|held| **held).count(), 1);
                assert_eq!(a.before(b), b.after(a));
                for c in &values {
                    if a.before(b) && b.before(c) {
                        assert!(a.before(c), "{a} < {b} < {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn serde_uses_wire_string() {
        let json = serde_json::to_string(&serial("abc@100-5:2")).expect("serialize");
        assert_eq!(json, "\"abc@100-5:2\"");
        let back: Serial = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, serial("abc@100-5:2"));
        assert!(serde_json::from_str::<Serial>("\"nope\"").is_err());
    }
}

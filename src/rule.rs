//! Per-record filter and rewrite rule
//!
//! [`OffNetBillingRule`] keeps only records whose charging characteristics
//! code is `400` and whose billing flag is `Y`, and rewrites their
//! `recordStartTime` from `yy-MM-dd HH:mm:ss` into the sortable
//! `yyyyMMddHHmmss` form. Any missing field or bad timestamp aborts the cycle.

use crate::error::{ProcessError, ProcessResult};
use crate::record::{FieldValue, Record};
use chrono::NaiveDateTime;
use tracing::debug;

pub const CHARGING_CHARACTERISTICS_FIELD: &str = "chargingCharacteristics";
pub const BILLING_FIELD: &str = "billing";
pub const RECORD_START_TIME_FIELD: &str = "recordStartTime";

/// Charging characteristics code of off-network billed records
pub const OFF_NET_CHARGING_CODE: &str = "400";
pub const BILLED_FLAG: &str = "Y";

/// `yy-MM-dd HH:mm:ss`
pub const SOURCE_DATE_FORMAT: &str = "%y-%m-%d %H:%M:%S";
/// `yyyyMMddHHmmss`
pub const TARGET_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

/// What a rule decided for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleDecision {
    Keep,
    Discard,
}

/// Per-record filter-and-rewrite step
///
/// Rules run inside a cycle and may be shared between concurrent cycles.
pub trait RecordRule: Send + Sync {
    /// Decide whether `record` is kept, rewriting it in place if so.
    ///
    /// `position` is the 1-based index of the record in its stream.
    fn apply(&self, record: &mut Record, position: u64) -> ProcessResult<RuleDecision>;

    fn name(&self) -> &str {
        "rule"
    }
}

/// Keeps off-network billed records and normalizes their start time
#[derive(Debug, Clone, Copy, Default)]
pub struct OffNetBillingRule;

impl OffNetBillingRule {
    pub fn new() -> Self {
        Self
    }

    fn matches(&self, record: &Record, position: u64) -> ProcessResult<bool> {
        let charging = required_value(record, CHARGING_CHARACTERISTICS_FIELD, position)?;
        let billing = required_value(record, BILLING_FIELD, position)?;

        Ok(charging.as_str() == Some(OFF_NET_CHARGING_CODE) && billing.as_str() == Some(BILLED_FLAG))
    }
}

impl RecordRule for OffNetBillingRule {
    fn apply(&self, record: &mut Record, position: u64) -> ProcessResult<RuleDecision> {
        if !self.matches(record, position)? {
            return Ok(RuleDecision::Discard);
        }

        let raw = required_value(record, RECORD_START_TIME_FIELD, position)?.to_string();
        let normalized = reformat_start_time(&raw).map_err(|source| ProcessError::DateFormat {
            field: RECORD_START_TIME_FIELD.to_string(),
            value: raw.clone(),
            position,
            source,
        })?;

        debug!(
            "Keeping record {}: {} '{}' -> '{}'",
            position, RECORD_START_TIME_FIELD, raw, normalized
        );

        record.set_value(RECORD_START_TIME_FIELD, FieldValue::String(normalized));
        Ok(RuleDecision::Keep)
    }

    fn name(&self) -> &str {
        "off-net-billing"
    }
}

/// Look up a field that must be present and non-null
fn required_value<'a>(
    record: &'a Record,
    field: &str,
    position: u64,
) -> ProcessResult<&'a FieldValue> {
    match record.get_value(field) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(ProcessError::FieldAccess {
            field: field.to_string(),
            position,
        }),
    }
}

/// Reparse a `yy-MM-dd HH:mm:ss` timestamp as `yyyyMMddHHmmss`
pub fn reformat_start_time(value: &str) -> Result<String, chrono::ParseError> {
    let parsed = NaiveDateTime::parse_from_str(value, SOURCE_DATE_FORMAT)?;
    Ok(parsed.format(TARGET_DATE_FORMAT).to_string())
}

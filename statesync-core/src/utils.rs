use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde_json::Value;

use crate::params::value_id_form;

/// A record's identity in normalized string form. Numeric ids become
/// their decimal rendering; lookups always use this form.
pub fn record_id(record: &Value) -> Option<String> {
    record.get("id").map(value_id_form)
}

/// Milliseconds since epoch, the store's `last_updated` clock.
///
/// Wall-clock on purpose: `last_updated` is consumer-visible and must be
/// comparable across processes, unlike the cache's monotonic timestamps.
#[inline]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

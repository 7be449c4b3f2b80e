//! Output blob naming: `{input_id}-{completion time}.txt`.

use chrono::{DateTime, Utc};

use docpipe_core::InputId;

pub const OUTPUT_EXTENSION: &str = "txt";

/// UTC completion time as `2024-01-01T00:00:00`, with `.mmm` appended only
/// when the millisecond part is non-zero.
pub fn completion_timestamp(at: DateTime<Utc>) -> String {
    let base = at.format("%Y-%m-%dT%H:%M:%S").to_string();
    match at.timestamp_subsec_millis() {
        0 => base,
        ms => format!("{base}.{ms:03}"),
    }
}

/// Replace the characters that are ambiguous in blob names (`.` and `:`).
pub fn sanitize(raw: &str) -> String {
    raw.replace(['.', ':'], "-")
}

/// Name of the summary blob for `input_id` completed at `at`.
///
/// Only the timestamp is sanitized; the input identifier keeps its own dots.
pub fn output_name(input_id: &InputId, at: DateTime<Utc>) -> String {
    format!(
        "{}-{}.{OUTPUT_EXTENSION}",
        input_id,
        sanitize(&completion_timestamp(at))
    )
}

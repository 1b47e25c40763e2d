// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset, Local};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error_recording::{record_error, ErrorType};
use crate::metrics::TimeUnit;
use crate::CommonMetricData;
use crate::Glean;

/// Turns an application id into the form used in submission paths.
///
/// ASCII alphanumerics are lowercased, every run of other characters
/// collapses into a single dash.
pub fn sanitize_application_id(application_id: &str) -> String {
    let mut sanitized = String::with_capacity(application_id.len());
    for c in application_id.chars() {
        if c.is_ascii_alphanumeric() {
            sanitized.push(c.to_ascii_lowercase());
        } else if !sanitized.ends_with('-') {
            sanitized.push('-');
        }
    }
    sanitized
}

/// Formats `datetime` as ISO 8601, dropping everything finer than `precision`.
pub fn format_iso8601(datetime: DateTime<FixedOffset>, precision: TimeUnit) -> String {
    datetime.format(precision.format_pattern()).to_string()
}

/// The current local time, keeping the offset it was taken in.
pub(crate) fn local_now_with_offset() -> DateTime<FixedOffset> {
    let now = Local::now();
    now.with_timezone(now.offset())
}

/// Cuts `value` down to at most `max_bytes`, backing off to the previous
/// character boundary if needed.
pub(crate) fn truncate_to_char_boundary<S: Into<String>>(value: S, max_bytes: usize) -> String {
    let mut value = value.into();
    if value.len() > max_bytes {
        let boundary = (0..=max_bytes)
            .rev()
            .find(|&idx| value.is_char_boundary(idx))
            .unwrap_or(0);
        value.truncate(boundary);
    }
    value
}

/// Like [`truncate_to_char_boundary`], but an over-long value also counts
/// an [`ErrorType::InvalidOverflow`] on `meta`.
pub(crate) fn truncate_with_overflow_error<S: Into<String>>(
    glean: &Glean,
    meta: &CommonMetricData,
    value: S,
    max_bytes: usize,
) -> String {
    let value = value.into();
    if value.len() <= max_bytes {
        return value;
    }

    record_error(
        glean,
        meta,
        ErrorType::InvalidOverflow,
        format!("Value length {} exceeds maximum of {}", value.len(), max_bytes),
        None,
    );
    truncate_to_char_boundary(value, max_bytes)
}

/// Checks a debug view or source tag.
///
/// Tags are sent as HTTP header values, so only ASCII alphanumerics and dashes
/// are allowed, up to 20 characters.
pub(crate) fn validate_tag(value: &str) -> bool {
    static TAG_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new("^[a-zA-Z0-9-]{1,20}$").expect("tag regex must compile"));

    let valid = TAG_REGEX.is_match(value);
    if !valid {
        log::error!("Invalid tag '{}'. Tags must match [a-zA-Z0-9-]{{1,20}}", value);
    }
    valid
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Counting recording errors.
//!
//! A metric that rejects or alters a value counts it in a Ping lifetime
//! counter named `glean.error.<error type>/<category>.<name>`. The counter is
//! sent with every ping the metric is sent in, and with the "metrics" ping.

use std::convert::TryFrom;
use std::fmt::Display;

use crate::error::{Error, ErrorKind};
use crate::metrics::CounterMetric;
use crate::CommonMetricData;
use crate::Glean;
use crate::Lifetime;

const ERROR_CATEGORY: &str = "glean.error";
const METRICS_PING: &str = "metrics";

/// Why a recording was rejected or altered.
///
/// The discriminants are the values used at the binding boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// The value broke a restriction of the metric type
    InvalidValue = 0,
    /// A dynamic label was malformed
    InvalidLabel = 1,
    /// The metric was used in a way its state doesn't allow
    InvalidState = 2,
    /// The value exceeded a size or count limit and was cut or clamped
    InvalidOverflow = 3,
    /// The value could not be persisted
    IoError = 4,
}

impl ErrorType {
    const ALL: [ErrorType; 5] = [
        ErrorType::InvalidValue,
        ErrorType::InvalidLabel,
        ErrorType::InvalidState,
        ErrorType::InvalidOverflow,
        ErrorType::IoError,
    ];

    /// The prefix of the error counter's name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::InvalidValue => "invalid_value",
            ErrorType::InvalidLabel => "invalid_label",
            ErrorType::InvalidState => "invalid_state",
            ErrorType::InvalidOverflow => "invalid_overflow",
            ErrorType::IoError => "io_error",
        }
    }
}

impl TryFrom<i32> for ErrorType {
    type Error = Error;

    fn try_from(value: i32) -> Result<ErrorType, Self::Error> {
        ErrorType::ALL
            .iter()
            .copied()
            .find(|error| *error as i32 == value)
            .ok_or_else(|| ErrorKind::ErrorType(value).into())
    }
}

/// The counter errors of type `error` on `meta` are counted in.
fn error_counter(meta: &CommonMetricData, error: ErrorType) -> CounterMetric {
    let mut send_in_pings = meta.send_in_pings.clone();
    if !send_in_pings.iter().any(|ping| ping == METRICS_PING) {
        send_in_pings.push(METRICS_PING.into());
    }

    // The base identifier, never the labeled one: resolving a label may itself
    // record an error.
    CounterMetric::new(CommonMetricData {
        name: format!("{}/{}", error.as_str(), meta.base_identifier()),
        category: ERROR_CATEGORY.into(),
        lifetime: Lifetime::Ping,
        send_in_pings,
        ..Default::default()
    })
}

/// Counts `num_errors` (default 1) errors of type `error` on `meta`.
///
/// `message` only goes to the log, prefixed with the metric's identifier.
/// Error counters are plain counters, so no label limit applies to them.
pub fn record_error<O: Into<Option<i32>>>(
    glean: &Glean,
    meta: &CommonMetricData,
    error: ErrorType,
    message: impl Display,
    num_errors: O,
) {
    log::warn!("{}: {}", meta.base_identifier(), message);

    let count = num_errors.into().unwrap_or(1);
    debug_assert!(count > 0);
    error_counter(meta, error).add_sync(glean, count);
}

/// **Test-only API.**
///
/// The number of errors of type `error` counted on `meta`, as stored for its
/// first ping. An `Err` describes what was missing if nothing was counted.
pub fn test_get_num_recorded_errors(
    glean: &Glean,
    meta: &CommonMetricData,
    error: ErrorType,
) -> Result<i32, String> {
    let storage = meta.default_storage();
    error_counter(meta, error)
        .get_value(glean, storage)
        .ok_or_else(|| {
            format!(
                "No {} recorded for {} in '{}'",
                error.as_str(),
                meta.base_identifier(),
                storage
            )
        })
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset};

use crate::Context;
use crate::ErrorType;

/// A description for the [`DatetimeMetric`](crate::metrics::DatetimeMetric) type.
///
/// When changing this trait, make sure all the operations are
/// implemented in the related type in `../metrics/`.
pub trait Datetime {
    /// Sets the metric to a date/time including the timezone offset.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context the recording is queued on.
    /// * `value` - Some date/time value, with offset, to set the metric to.
    ///   If none, the current local time is used.
    fn set(&self, ctx: &Context, value: Option<DateTime<FixedOffset>>);

    /// **Test-only API.**
    ///
    /// Gets the currently stored value as a datetime.
    ///
    /// This doesn't clear the stored value.
    fn test_get_value(
        &self,
        ctx: &Context,
        ping_name: Option<&str>,
    ) -> Option<DateTime<FixedOffset>>;

    /// **Test-only API.**
    ///
    /// Gets the currently stored value as an ISO 8601 string.
    fn test_get_value_as_string(&self, ctx: &Context, ping_name: Option<&str>) -> Option<String>;

    /// **Exported for test purposes.**
    ///
    /// Gets the number of recorded errors for the given metric and error type.
    fn test_get_num_recorded_errors(&self, ctx: &Context, error: ErrorType) -> i32;
}

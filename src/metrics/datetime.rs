// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use inherent::inherent;

use crate::error_recording::{test_get_num_recorded_errors, ErrorType};
use crate::metrics::time_unit::TimeUnit;
use crate::metrics::Metric;
use crate::metrics::MetricType;
use crate::storage::StorageManager;
use crate::util::{format_iso8601, local_now_with_offset};
use crate::CommonMetricData;
use crate::Context;
use crate::Glean;

/// A datetime metric.
///
/// Used to record an absolute date and time, such as the time the user first ran
/// the application.
#[derive(Clone, Debug)]
pub struct DatetimeMetric {
    meta: Arc<CommonMetricData>,
    time_unit: TimeUnit,
}

impl_metric_type!(DatetimeMetric);

// IMPORTANT:
//
// When changing this implementation, make sure all the operations are
// also declared in the related trait in `../traits/`.
impl DatetimeMetric {
    /// Creates a new datetime metric.
    pub fn new(meta: CommonMetricData, time_unit: TimeUnit) -> Self {
        Self {
            meta: Arc::new(meta),
            time_unit,
        }
    }

    /// Sets the metric to a date/time value synchronously.
    #[doc(hidden)]
    pub fn set_sync(&self, glean: &Glean, value: DateTime<FixedOffset>) {
        if !self.should_record(glean) {
            return;
        }

        let value = Metric::Datetime(value, self.time_unit);
        glean.storage().record(glean, &self.meta, &value)
    }

    /// Gets the stored datetime value.
    ///
    /// The precision of this value is truncated to the `time_unit` precision
    /// only when serialized.
    #[doc(hidden)]
    pub fn get_value<'a, S: Into<Option<&'a str>>>(
        &self,
        glean: &Glean,
        ping_name: S,
    ) -> Option<DateTime<FixedOffset>> {
        let queried_ping_name = ping_name
            .into()
            .unwrap_or_else(|| self.meta.default_storage());

        match StorageManager.snapshot_metric(
            glean.storage(),
            queried_ping_name,
            &self.meta.identifier(glean),
            self.meta.lifetime,
        ) {
            Some(Metric::Datetime(dt, _)) => Some(dt),
            _ => None,
        }
    }

    /// Gets the stored datetime value as an ISO 8601 string,
    /// truncated to the metric's time unit.
    #[doc(hidden)]
    pub fn get_value_as_string<'a, S: Into<Option<&'a str>>>(
        &self,
        glean: &Glean,
        ping_name: S,
    ) -> Option<String> {
        self.get_value(glean, ping_name)
            .map(|dt| format_iso8601(dt, self.time_unit))
    }
}

#[inherent]
impl crate::traits::Datetime for DatetimeMetric {
    /// Sets the metric to a date/time including the timezone offset.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context the recording is queued on.
    /// * `value` - Some date/time value, with offset, to set the metric to.
    ///   If none, the current local time is used.
    pub fn set(&self, ctx: &Context, value: Option<DateTime<FixedOffset>>) {
        let value = value.unwrap_or_else(local_now_with_offset);
        let metric = self.clone();
        ctx.launch_with_glean(move |glean| metric.set_sync(glean, value))
    }

    /// **Test-only API.**
    ///
    /// Gets the currently stored value as a datetime.
    ///
    /// This doesn't clear the stored value.
    pub fn test_get_value(
        &self,
        ctx: &Context,
        ping_name: Option<&str>,
    ) -> Option<DateTime<FixedOffset>> {
        ctx.block_on_dispatcher();
        ctx.with_glean(|glean| self.get_value(glean, ping_name))
            .flatten()
    }

    /// **Test-only API.**
    ///
    /// Gets the currently stored value as an ISO 8601 string.
    pub fn test_get_value_as_string(&self, ctx: &Context, ping_name: Option<&str>) -> Option<String> {
        ctx.block_on_dispatcher();
        ctx.with_glean(|glean| self.get_value_as_string(glean, ping_name))
            .flatten()
    }

    /// **Exported for test purposes.**
    ///
    /// Gets the number of recorded errors for the given metric and error type.
    pub fn test_get_num_recorded_errors(&self, ctx: &Context, error: ErrorType) -> i32 {
        ctx.block_on_dispatcher();

        ctx.with_glean(|glean| {
            test_get_num_recorded_errors(glean, self.meta(), error).unwrap_or(0)
        })
        .unwrap_or(0)
    }
}

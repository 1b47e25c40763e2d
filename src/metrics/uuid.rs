// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use uuid::Uuid;

use inherent::inherent;

use crate::error_recording::{record_error, test_get_num_recorded_errors, ErrorType};
use crate::metrics::Metric;
use crate::metrics::MetricType;
use crate::storage::StorageManager;
use crate::CommonMetricData;
use crate::Context;
use crate::Glean;

/// An UUID metric.
///
/// Stores UUID v4 (randomly generated) values.
#[derive(Clone, Debug)]
pub struct UuidMetric {
    meta: Arc<CommonMetricData>,
}

impl_metric_type!(UuidMetric);

// IMPORTANT:
//
// When changing this implementation, make sure all the operations are
// also declared in the related trait in `../traits/`.
impl UuidMetric {
    /// Creates a new UUID metric
    pub fn new(meta: CommonMetricData) -> Self {
        Self {
            meta: Arc::new(meta),
        }
    }

    /// Sets to the specified value, from a string.
    ///
    /// This should only be used from FFI. When calling directly from Rust, it
    /// is better to use [`set`](UuidMetric::set).
    #[doc(hidden)]
    pub fn set_sync<S: Into<String>>(&self, glean: &Glean, value: S) {
        if !self.should_record(glean) {
            return;
        }

        let value = value.into();

        if let Ok(uuid) = Uuid::parse_str(&value) {
            let value = Metric::Uuid(uuid.as_hyphenated().to_string());
            glean.storage().record(glean, &self.meta, &value)
        } else {
            let msg = format!("Unexpected UUID value '{}'", value);
            record_error(glean, &self.meta, ErrorType::InvalidValue, msg, None);
        }
    }

    /// Sets to the specified value, from a [`Uuid`].
    #[doc(hidden)]
    pub(crate) fn set_from_uuid_sync(&self, glean: &Glean, value: Uuid) {
        self.set_sync(glean, value.to_string())
    }

    /// Generates a new random [`Uuid`] and sets the metric to it synchronously.
    #[doc(hidden)]
    pub fn generate_and_set_sync(&self, storage: &Glean) -> Uuid {
        let uuid = Uuid::new_v4();
        self.set_sync(storage, uuid.to_string());
        uuid
    }

    /// Gets the current-stored value as a string, or None if there is no value.
    #[doc(hidden)]
    pub fn get_value<'a, S: Into<Option<&'a str>>>(
        &self,
        glean: &Glean,
        ping_name: S,
    ) -> Option<Uuid> {
        let queried_ping_name = ping_name
            .into()
            .unwrap_or_else(|| self.meta.default_storage());

        match StorageManager.snapshot_metric(
            glean.storage(),
            queried_ping_name,
            &self.meta.identifier(glean),
            self.meta.lifetime,
        ) {
            Some(Metric::Uuid(uuid)) => Uuid::parse_str(&uuid).ok(),
            _ => None,
        }
    }
}

#[inherent]
impl crate::traits::Uuid for UuidMetric {
    /// Sets to the specified value.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context the recording is queued on.
    /// * `value` - The [`Uuid`] to set the metric to.
    pub fn set(&self, ctx: &Context, value: Uuid) {
        let metric = self.clone();
        ctx.launch_with_glean(move |glean| metric.set_from_uuid_sync(glean, value))
    }

    /// Sets to the value parsed from the given string.
    ///
    /// Records an [`ErrorType::InvalidValue`] if the string isn't a valid UUID.
    pub fn set_from_str(&self, ctx: &Context, value: String) {
        let metric = self.clone();
        ctx.launch_with_glean(move |glean| metric.set_sync(glean, &value))
    }

    /// Generates a new random [`Uuid`] and sets the metric to it.
    pub fn generate_and_set(&self, ctx: &Context) -> Uuid {
        let uuid = Uuid::new_v4();
        self.set(ctx, uuid);
        uuid
    }

    /// **Test-only API.**
    ///
    /// Gets the currently stored value as a [`Uuid`].
    ///
    /// This doesn't clear the stored value.
    pub fn test_get_value(&self, ctx: &Context, ping_name: Option<&str>) -> Option<Uuid> {
        ctx.block_on_dispatcher();
        ctx.with_glean(|glean| self.get_value(glean, ping_name))
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

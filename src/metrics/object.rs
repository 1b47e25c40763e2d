// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use inherent::inherent;

use crate::error_recording::{record_error, test_get_num_recorded_errors, ErrorType};
use crate::metrics::JsonValue;
use crate::metrics::Metric;
use crate::metrics::MetricType;
use crate::storage::StorageManager;
use crate::CommonMetricData;
use crate::Context;
use crate::Glean;

/// An object metric.
///
/// Record structured data.
/// The value must adhere to a predefined structure and is serialized into JSON,
/// which is stored and sent as-is.
#[derive(Clone, Debug)]
pub struct ObjectMetric {
    meta: Arc<CommonMetricData>,
}

impl_metric_type!(ObjectMetric);

impl ObjectMetric {
    /// Creates a new object metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self {
            meta: Arc::new(meta),
        }
    }

    /// Sets to the specified structure synchronously.
    #[doc(hidden)]
    pub fn set_sync(&self, glean: &Glean, value: JsonValue) {
        if !self.should_record(glean) {
            return;
        }

        let value = Metric::Object(value.to_string());
        glean.storage().record(glean, &self.meta, &value)
    }

    /// Sets to the specified serialized JSON synchronously.
    #[doc(hidden)]
    pub fn set_string_sync(&self, glean: &Glean, object: String) {
        if !self.should_record(glean) {
            return;
        }

        match serde_json::from_str::<JsonValue>(&object) {
            Ok(value) => self.set_sync(glean, value),
            Err(e) => {
                let msg = format!("Value did not match predefined schema: {}", e);
                record_error(glean, &self.meta, ErrorType::InvalidValue, msg, None);
            }
        }
    }

    /// Gets the currently stored value as JSON.
    #[doc(hidden)]
    pub fn get_value<'a, S: Into<Option<&'a str>>>(
        &self,
        glean: &Glean,
        ping_name: S,
    ) -> Option<JsonValue> {
        let queried_ping_name = ping_name
            .into()
            .unwrap_or_else(|| self.meta.default_storage());

        match StorageManager.snapshot_metric(
            glean.storage(),
            queried_ping_name,
            &self.meta.identifier(glean),
            self.meta.lifetime,
        ) {
            Some(Metric::Object(o)) => serde_json::from_str(&o).ok(),
            _ => None,
        }
    }
}

#[inherent]
impl crate::traits::Object for ObjectMetric {
    /// Sets to the specified structure.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context the recording is queued on.
    /// * `value` - the value to set.
    pub fn set(&self, ctx: &Context, value: JsonValue) {
        let metric = self.clone();
        ctx.launch_with_glean(move |glean| metric.set_sync(glean, value))
    }

    /// Sets to the specified structure, given as serialized JSON.
    ///
    /// Records an [`ErrorType::InvalidValue`] if the string is not valid JSON.
    pub fn set_string(&self, ctx: &Context, object: String) {
        let metric = self.clone();
        ctx.launch_with_glean(move |glean| metric.set_string_sync(glean, object))
    }

    /// **Test-only API.**
    ///
    /// Gets the currently stored value as JSON.
    ///
    /// This doesn't clear the stored value.
    pub fn test_get_value(&self, ctx: &Context, ping_name: Option<&str>) -> Option<JsonValue> {
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::tests::new_glean;
    use crate::Lifetime;
    use serde_json::json;

    fn object() -> ObjectMetric {
        ObjectMetric::new(CommonMetricData {
            name: "object".into(),
            category: "telemetry".into(),
            send_in_pings: vec!["store1".into()],
            lifetime: Lifetime::Ping,
            ..Default::default()
        })
    }

    #[test]
    fn stores_serialized_json() {
        let (glean, _t) = new_glean(None);
        let metric = object();

        metric.set_string_sync(&glean, r#"{"colour":"red","diameter":5}"#.into());
        assert_eq!(
            Some(json!({"colour": "red", "diameter": 5})),
            metric.get_value(&glean, None)
        );
    }

    #[test]
    fn invalid_json_is_rejected() {
        let (glean, _t) = new_glean(None);
        let metric = object();

        metric.set_string_sync(&glean, "{not json".into());
        assert_eq!(None, metric.get_value(&glean, None));
        assert_eq!(
            Ok(1),
            test_get_num_recorded_errors(&glean, metric.meta(), ErrorType::InvalidValue)
        );
    }
}

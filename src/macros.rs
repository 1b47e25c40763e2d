// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Implements [`MetricType`](crate::metrics::MetricType) for a metric struct
/// that keeps its metadata in an `Arc<CommonMetricData>` field named `meta`.
///
/// Renaming and labeling clone the metric, so any other state it carries
/// (time units, bucketing parameters) is carried over to the new instance.
macro_rules! impl_metric_type {
    ($ty:ident) => {
        impl crate::metrics::MetricType for $ty {
            fn meta(&self) -> &crate::CommonMetricData {
                &self.meta
            }

            fn with_name(&self, name: String) -> Self {
                let mut meta = (*self.meta).clone();
                meta.name = name;
                let mut metric = self.clone();
                metric.meta = std::sync::Arc::new(meta);
                metric
            }

            fn with_dynamic_label(&self, label: crate::common_metric_data::DynamicLabel) -> Self {
                let mut meta = (*self.meta).clone();
                meta.dynamic_label = Some(label);
                let mut metric = self.clone();
                metric.meta = std::sync::Arc::new(meta);
                metric
            }
        }
    };
}

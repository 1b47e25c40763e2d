// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Metric types, and the value representation they share.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::json;
pub use serde_json::Value as JsonValue;

mod boolean;
mod counter;
mod custom_distribution;
mod datetime;
pub(crate) mod labeled;
mod memory_distribution;
mod memory_unit;
mod object;
mod ping;
mod string;
mod string_list;
mod time_unit;
mod timing_distribution;
mod uuid;

use crate::histogram::{Functional, Histogram, PrecomputedExponential, PrecomputedLinear};
use crate::util::format_iso8601;
use crate::CommonMetricData;
use crate::Glean;

pub use self::boolean::BooleanMetric;
pub use self::counter::CounterMetric;
pub use self::custom_distribution::CustomDistributionMetric;
pub use self::datetime::DatetimeMetric;
pub use self::labeled::{
    AllowLabeled, AnyLabeledMetric, LabelOverflow, LabeledBoolean, LabeledCounter,
    LabeledCustomDistribution, LabeledMemoryDistribution, LabeledMetric, LabeledString,
    LabeledSubmetric, LabeledTimingDistribution,
};
pub use self::memory_distribution::MemoryDistributionMetric;
pub use self::memory_unit::MemoryUnit;
pub use self::object::ObjectMetric;
pub use self::ping::PingType;
pub use self::string::StringMetric;
pub use self::string_list::StringListMetric;
pub use self::time_unit::TimeUnit;
pub use self::timing_distribution::{TimerId, TimingDistributionMetric};
pub use self::uuid::UuidMetric;
pub use crate::histogram::HistogramType;

/// Behavior shared by every metric type.
pub trait MetricType {
    /// The metric's metadata.
    fn meta(&self) -> &CommonMetricData;

    /// A copy of this metric under another name.
    fn with_name(&self, name: String) -> Self
    where
        Self: Sized;

    /// A copy of this metric recording under `label`.
    ///
    /// The label is validated lazily, on the first recording.
    fn with_dynamic_label(&self, label: crate::common_metric_data::DynamicLabel) -> Self
    where
        Self: Sized;

    /// Recordings are accepted while upload is enabled and the metric isn't disabled.
    fn should_record(&self, glean: &Glean) -> bool {
        glean.is_upload_enabled() && !self.meta().disabled
    }
}

/// What a distribution looks like in a ping: bucket minimum to count, and the sum.
///
/// Buckets between the lowest and one past the highest filled bucket are
/// included with a count of 0.
#[derive(Debug, Serialize)]
pub struct DistributionData {
    /// Bucket minimum to number of samples.
    pub values: HashMap<i64, i64>,

    /// Sum of all samples.
    pub sum: i64,

    /// Number of samples. Only used by test getters, never serialized.
    #[serde(skip)]
    pub count: i64,
}

/// A stored metric value.
///
/// Values are persisted with `bincode`, which encodes the variant by its
/// position: append new variants, never reorder or remove them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Metric {
    /// [`BooleanMetric`]
    Boolean(bool),
    /// [`CounterMetric`]
    Counter(i32),
    /// [`CustomDistributionMetric`] with [`HistogramType::Exponential`] buckets
    CustomDistributionExponential(Histogram<PrecomputedExponential>),
    /// [`CustomDistributionMetric`] with [`HistogramType::Linear`] buckets
    CustomDistributionLinear(Histogram<PrecomputedLinear>),
    /// [`DatetimeMetric`], with the precision it is reported in
    Datetime(DateTime<FixedOffset>, TimeUnit),
    /// [`StringMetric`]
    String(String),
    /// [`StringListMetric`]
    StringList(Vec<String>),
    /// [`UuidMetric`], hyphenated
    Uuid(String),
    /// [`TimingDistributionMetric`], samples in nanoseconds
    TimingDistribution(Histogram<Functional>),
    /// [`MemoryDistributionMetric`], samples in bytes
    MemoryDistribution(Histogram<Functional>),
    /// [`ObjectMetric`], as serialized JSON
    Object(String),
}

impl Metric {
    /// The value as it appears in a ping payload.
    pub fn as_json(&self) -> JsonValue {
        match self {
            Metric::Boolean(b) => json!(b),
            Metric::Counter(c) => json!(c),
            Metric::String(s) | Metric::Uuid(s) => json!(s),
            Metric::StringList(list) => json!(list),
            Metric::Datetime(dt, precision) => json!(format_iso8601(*dt, *precision)),
            Metric::CustomDistributionExponential(hist) => {
                json!(custom_distribution::snapshot(hist))
            }
            Metric::CustomDistributionLinear(hist) => json!(custom_distribution::snapshot(hist)),
            Metric::TimingDistribution(hist) => json!(timing_distribution::snapshot(hist)),
            Metric::MemoryDistribution(hist) => json!(memory_distribution::snapshot(hist)),
            Metric::Object(serialized) => serde_json::from_str(serialized).unwrap_or_else(|e| {
                log::error!("Stored object is not valid JSON: {}", e);
                JsonValue::Null
            }),
        }
    }
}

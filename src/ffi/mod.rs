// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The handle-based surface language bindings are generated against.
//!
//! Bindings never hold Rust objects. Every metric, ping and returned string
//! lives in a [`ConcurrentHandleMap`] owned by [`Bindings`] and is referred
//! to by a plain `u64`; every one of them has an explicit destructor.
//! Invalid or destroyed handles are logged and ignored.

use std::convert::TryFrom;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use ffi_support::ConcurrentHandleMap;

use crate::configuration::{ClientInfoMetrics, Configuration};
use crate::error::Result;
use crate::metrics::{
    AnyLabeledMetric, BooleanMetric, CounterMetric, CustomDistributionMetric, DatetimeMetric,
    HistogramType, LabeledMetric, LabeledSubmetric, MemoryDistributionMetric, MemoryUnit,
    MetricType, ObjectMetric, PingType, StringListMetric, StringMetric, TimeUnit,
    TimingDistributionMetric, UuidMetric,
};
use crate::{CommonMetricData, Context, ErrorType, Lifetime};

mod handlemap_ext;

use self::handlemap_ext::HandleMapExtension;

fn common_metric_data(
    category: &str,
    name: &str,
    send_in_pings: Vec<String>,
    lifetime: i32,
    disabled: bool,
) -> Result<CommonMetricData> {
    Ok(CommonMetricData {
        name: name.into(),
        category: category.into(),
        send_in_pings,
        lifetime: Lifetime::try_from(lifetime)?,
        disabled,
        ..Default::default()
    })
}

/// Generates the handle-based operations of one metric type.
///
/// Every metric type gets a constructor, `should_record`, `test_has_value`,
/// `test_get_num_recorded_errors` and a destructor. Each further line maps a
/// method of the metric type to a binding function with the same arguments.
macro_rules! define_metric {
    ($metric_type:ident => $arena:ident {
        new -> $new_fn:ident($($new_arg:ident: $new_ty:ty),* $(,)?),
        should_record -> $should_record_fn:ident,
        test_has_value -> $has_value_fn:ident,
        test_get_num_recorded_errors -> $errors_fn:ident,
        destroy -> $destroy_fn:ident,
        $($op:ident -> $op_fn:ident($($op_arg:ident: $op_ty:ty),* $(,)?)),* $(,)?
    }) => {
        impl Bindings {
            #[allow(missing_docs)]
            pub fn $new_fn(
                &self,
                category: &str,
                name: &str,
                send_in_pings: Vec<String>,
                lifetime: i32,
                disabled: bool,
                $($new_arg: $new_ty),*
            ) -> Result<u64> {
                let meta = common_metric_data(category, name, send_in_pings, lifetime, disabled)?;
                Ok(self.$arena.insert_u64($metric_type::new(meta, $($new_arg),*)))
            }

            #[allow(missing_docs)]
            pub fn $should_record_fn(&self, handle: u64) -> bool {
                self.$arena.call_infallible(handle, |metric| {
                    self.ctx
                        .with_glean(|glean| metric.should_record(glean))
                        .unwrap_or(false)
                })
                .unwrap_or(false)
            }

            #[allow(missing_docs)]
            pub fn $has_value_fn(&self, handle: u64, ping_name: Option<&str>) -> bool {
                self.$arena.call_infallible(handle, |metric| {
                    metric.test_get_value(&self.ctx, ping_name).is_some()
                })
                .unwrap_or(false)
            }

            #[allow(missing_docs)]
            pub fn $errors_fn(&self, handle: u64, error_type: i32) -> i32 {
                let error_type = match ErrorType::try_from(error_type) {
                    Ok(error_type) => error_type,
                    Err(e) => {
                        log::error!("{}", e);
                        return 0;
                    }
                };
                self.$arena.call_infallible(handle, |metric| {
                    metric.test_get_num_recorded_errors(&self.ctx, error_type)
                })
                .unwrap_or(0)
            }

            #[allow(missing_docs)]
            pub fn $destroy_fn(&self, handle: u64) {
                self.$arena.destroy(handle)
            }

            $(
                #[allow(missing_docs)]
                pub fn $op_fn(&self, handle: u64, $($op_arg: $op_ty),*) {
                    let _ = self.$arena.call_infallible(handle, |metric| {
                        metric.$op(&self.ctx, $($op_arg),*);
                    });
                }
            )*
        }
    };
}

/// A [`Context`] plus handle maps for everything handed across the boundary.
pub struct Bindings {
    ctx: Context,
    booleans: ConcurrentHandleMap<BooleanMetric>,
    counters: ConcurrentHandleMap<CounterMetric>,
    strings: ConcurrentHandleMap<StringMetric>,
    string_lists: ConcurrentHandleMap<StringListMetric>,
    uuids: ConcurrentHandleMap<UuidMetric>,
    datetimes: ConcurrentHandleMap<DatetimeMetric>,
    objects: ConcurrentHandleMap<ObjectMetric>,
    memory_distributions: ConcurrentHandleMap<MemoryDistributionMetric>,
    timing_distributions: ConcurrentHandleMap<TimingDistributionMetric>,
    custom_distributions: ConcurrentHandleMap<CustomDistributionMetric>,
    labeled: ConcurrentHandleMap<AnyLabeledMetric>,
    pings: ConcurrentHandleMap<PingType>,
    returned_strings: ConcurrentHandleMap<String>,
}

define_metric!(BooleanMetric => booleans {
    new -> new_boolean_metric(),
    should_record -> boolean_should_record,
    test_has_value -> boolean_test_has_value,
    test_get_num_recorded_errors -> boolean_test_get_num_recorded_errors,
    destroy -> destroy_boolean_metric,

    set -> boolean_set(value: bool),
});

define_metric!(CounterMetric => counters {
    new -> new_counter_metric(),
    should_record -> counter_should_record,
    test_has_value -> counter_test_has_value,
    test_get_num_recorded_errors -> counter_test_get_num_recorded_errors,
    destroy -> destroy_counter_metric,

    add -> counter_add(amount: i32),
});

define_metric!(StringMetric => strings {
    new -> new_string_metric(),
    should_record -> string_should_record,
    test_has_value -> string_test_has_value,
    test_get_num_recorded_errors -> string_test_get_num_recorded_errors,
    destroy -> destroy_string_metric,

    set -> string_set(value: String),
});

define_metric!(StringListMetric => string_lists {
    new -> new_string_list_metric(),
    should_record -> string_list_should_record,
    test_has_value -> string_list_test_has_value,
    test_get_num_recorded_errors -> string_list_test_get_num_recorded_errors,
    destroy -> destroy_string_list_metric,

    add -> string_list_add(value: String),
    set -> string_list_set(values: Vec<String>),
});

define_metric!(UuidMetric => uuids {
    new -> new_uuid_metric(),
    should_record -> uuid_should_record,
    test_has_value -> uuid_test_has_value,
    test_get_num_recorded_errors -> uuid_test_get_num_recorded_errors,
    destroy -> destroy_uuid_metric,

    set_from_str -> uuid_set(value: String),
});

define_metric!(DatetimeMetric => datetimes {
    new -> new_datetime_metric(time_unit: TimeUnit),
    should_record -> datetime_should_record,
    test_has_value -> datetime_test_has_value,
    test_get_num_recorded_errors -> datetime_test_get_num_recorded_errors,
    destroy -> destroy_datetime_metric,

    set -> datetime_set(value: Option<DateTime<FixedOffset>>),
});

define_metric!(ObjectMetric => objects {
    new -> new_object_metric(),
    should_record -> object_should_record,
    test_has_value -> object_test_has_value,
    test_get_num_recorded_errors -> object_test_get_num_recorded_errors,
    destroy -> destroy_object_metric,

    set_string -> object_set_string(object: String),
});

define_metric!(MemoryDistributionMetric => memory_distributions {
    new -> new_memory_distribution_metric(memory_unit: MemoryUnit),
    should_record -> memory_distribution_should_record,
    test_has_value -> memory_distribution_test_has_value,
    test_get_num_recorded_errors -> memory_distribution_test_get_num_recorded_errors,
    destroy -> destroy_memory_distribution_metric,

    accumulate -> memory_distribution_accumulate(sample: i64),
    accumulate_samples -> memory_distribution_accumulate_samples(samples: Vec<i64>),
});

define_metric!(TimingDistributionMetric => timing_distributions {
    new -> new_timing_distribution_metric(time_unit: TimeUnit),
    should_record -> timing_distribution_should_record,
    test_has_value -> timing_distribution_test_has_value,
    test_get_num_recorded_errors -> timing_distribution_test_get_num_recorded_errors,
    destroy -> destroy_timing_distribution_metric,

    accumulate_samples -> timing_distribution_accumulate_samples(samples: Vec<i64>),
});

define_metric!(CustomDistributionMetric => custom_distributions {
    new -> new_custom_distribution_metric(
        range_min: i64,
        range_max: i64,
        bucket_count: i64,
        histogram_type: HistogramType,
    ),
    should_record -> custom_distribution_should_record,
    test_has_value -> custom_distribution_test_has_value,
    test_get_num_recorded_errors -> custom_distribution_test_get_num_recorded_errors,
    destroy -> destroy_custom_distribution_metric,

    accumulate_samples -> custom_distribution_accumulate_samples(samples: Vec<i64>),
});

impl Default for Bindings {
    fn default() -> Self {
        Self {
            ctx: Context::default(),
            booleans: ConcurrentHandleMap::new(),
            counters: ConcurrentHandleMap::new(),
            strings: ConcurrentHandleMap::new(),
            string_lists: ConcurrentHandleMap::new(),
            uuids: ConcurrentHandleMap::new(),
            datetimes: ConcurrentHandleMap::new(),
            objects: ConcurrentHandleMap::new(),
            memory_distributions: ConcurrentHandleMap::new(),
            timing_distributions: ConcurrentHandleMap::new(),
            custom_distributions: ConcurrentHandleMap::new(),
            labeled: ConcurrentHandleMap::new(),
            pings: ConcurrentHandleMap::new(),
            returned_strings: ConcurrentHandleMap::new(),
        }
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindings")
            .field("ctx", &self.ctx)
            .field("live_metrics", &self.live_metrics())
            .field("pings", &self.pings.len())
            .field("returned_strings", &self.returned_strings.len())
            .finish()
    }
}

impl Bindings {
    /// Creates bindings around a fresh, uninitialized context.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of metric handles that were not destroyed yet.
    pub fn live_metrics(&self) -> usize {
        self.booleans.len()
            + self.counters.len()
            + self.strings.len()
            + self.string_lists.len()
            + self.uuids.len()
            + self.datetimes.len()
            + self.objects.len()
            + self.memory_distributions.len()
            + self.timing_distributions.len()
            + self.custom_distributions.len()
            + self.labeled.len()
    }

    /// The context all recordings are queued on.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Initializes the engine. Returns whether that worked.
    pub fn initialize(&mut self, cfg: Configuration, client_info: ClientInfoMetrics) -> bool {
        match self.ctx.initialize(cfg, client_info) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to initialize: {}", e);
                false
            }
        }
    }

    #[allow(missing_docs)]
    pub fn is_initialized(&self) -> bool {
        self.ctx.is_initialized()
    }

    #[allow(missing_docs)]
    pub fn shutdown(&mut self) {
        self.ctx.shutdown()
    }

    #[allow(missing_docs)]
    pub fn set_upload_enabled(&self, flag: bool) {
        self.ctx.set_upload_enabled(flag)
    }

    #[allow(missing_docs)]
    pub fn is_upload_enabled(&self) -> bool {
        self.ctx.is_upload_enabled()
    }

    /// Creates a ping type. It still needs to be registered.
    pub fn new_ping_type(
        &self,
        ping_name: &str,
        include_client_id: bool,
        send_if_empty: bool,
        reason_codes: Vec<String>,
    ) -> u64 {
        self.pings.insert_u64(PingType::new(
            ping_name,
            include_client_id,
            send_if_empty,
            reason_codes,
        ))
    }

    #[allow(missing_docs)]
    pub fn destroy_ping_type(&self, handle: u64) {
        self.pings.destroy(handle)
    }

    #[allow(missing_docs)]
    pub fn register_ping_type(&self, handle: u64) {
        let _ = self.pings.call_infallible(handle, |ping| self.ctx.register_ping_type(ping));
    }

    #[allow(missing_docs)]
    pub fn submit_ping_by_name(&self, ping_name: &str, reason: Option<&str>) {
        self.ctx.submit_ping_by_name(ping_name, reason)
    }

    /// Stores `value` in the returned-string arena.
    fn return_string(&self, value: Option<String>) -> Option<u64> {
        value.map(|value| self.returned_strings.insert_u64(value))
    }

    /// The contents of a returned string.
    pub fn string_value(&self, handle: u64) -> Option<String> {
        self.returned_strings.call_infallible(handle, String::clone)
    }

    /// Frees a returned string.
    pub fn destroy_string(&self, handle: u64) {
        self.returned_strings.destroy(handle)
    }

    #[allow(missing_docs)]
    pub fn boolean_test_get_value(&self, handle: u64, ping_name: Option<&str>) -> Option<bool> {
        self.booleans.call_infallible(handle, |metric| {
            metric.test_get_value(&self.ctx, ping_name)
        })
        .flatten()
    }

    #[allow(missing_docs)]
    pub fn counter_test_get_value(&self, handle: u64, ping_name: Option<&str>) -> Option<i32> {
        self.counters.call_infallible(handle, |metric| {
            metric.test_get_value(&self.ctx, ping_name)
        })
        .flatten()
    }

    /// Returns a string handle.
    pub fn string_test_get_value(&self, handle: u64, ping_name: Option<&str>) -> Option<u64> {
        let value = self.strings.call_infallible(handle, |metric| {
            metric.test_get_value(&self.ctx, ping_name)
        })
        .flatten();
        self.return_string(value)
    }

    /// Returns a string handle to a JSON array.
    pub fn string_list_test_get_value(&self, handle: u64, ping_name: Option<&str>) -> Option<u64> {
        let value = self.string_lists.call_infallible(handle, |metric| {
            metric.test_get_value(&self.ctx, ping_name)
        })
        .flatten()
        .and_then(|list| serde_json::to_string(&list).ok());
        self.return_string(value)
    }

    /// Returns a string handle.
    pub fn uuid_test_get_value(&self, handle: u64, ping_name: Option<&str>) -> Option<u64> {
        let value = self.uuids.call_infallible(handle, |metric| {
            metric.test_get_value(&self.ctx, ping_name)
        })
        .flatten()
        .map(|uuid| uuid.to_string());
        self.return_string(value)
    }

    /// Returns a string handle to the ISO 8601 representation.
    pub fn datetime_test_get_value_as_string(
        &self,
        handle: u64,
        ping_name: Option<&str>,
    ) -> Option<u64> {
        let value = self.datetimes.call_infallible(handle, |metric| {
            metric.test_get_value_as_string(&self.ctx, ping_name)
        })
        .flatten();
        self.return_string(value)
    }

    /// Returns a string handle to the JSON text.
    pub fn object_test_get_value(&self, handle: u64, ping_name: Option<&str>) -> Option<u64> {
        let value = self.objects.call_infallible(handle, |metric| {
            metric.test_get_value(&self.ctx, ping_name)
        })
        .flatten()
        .map(|object| object.to_string());
        self.return_string(value)
    }

    /// Returns a string handle to `{"sum": .., "values": {..}}`.
    pub fn memory_distribution_test_get_value_as_json_string(
        &self,
        handle: u64,
        ping_name: Option<&str>,
    ) -> Option<u64> {
        let value = self.memory_distributions.call_infallible(handle, |metric| {
            metric.test_get_value(&self.ctx, ping_name)
        })
        .flatten()
        .and_then(|data| serde_json::to_string(&data).ok());
        self.return_string(value)
    }

    /// Returns a string handle to `{"sum": .., "values": {..}}`.
    pub fn timing_distribution_test_get_value_as_json_string(
        &self,
        handle: u64,
        ping_name: Option<&str>,
    ) -> Option<u64> {
        let value = self.timing_distributions.call_infallible(handle, |metric| {
            metric.test_get_value(&self.ctx, ping_name)
        })
        .flatten()
        .and_then(|data| serde_json::to_string(&data).ok());
        self.return_string(value)
    }

    /// Returns a string handle to `{"sum": .., "values": {..}}`.
    pub fn custom_distribution_test_get_value_as_json_string(
        &self,
        handle: u64,
        ping_name: Option<&str>,
    ) -> Option<u64> {
        let value = self.custom_distributions.call_infallible(handle, |metric| {
            metric.test_get_value(&self.ctx, ping_name)
        })
        .flatten()
        .and_then(|data| serde_json::to_string(&data).ok());
        self.return_string(value)
    }

    #[allow(clippy::too_many_arguments)]
    fn new_labeled(
        &self,
        category: &str,
        name: &str,
        send_in_pings: Vec<String>,
        lifetime: i32,
        disabled: bool,
        labels: Option<Vec<String>>,
        wrap: fn(CommonMetricData, Option<Vec<String>>) -> AnyLabeledMetric,
    ) -> Result<u64> {
        let meta = common_metric_data(category, name, send_in_pings, lifetime, disabled)?;
        Ok(self.labeled.insert_u64(wrap(meta, labels)))
    }

    /// Creates a labeled counter, optionally restricted to `labels`.
    pub fn new_labeled_counter_metric(
        &self,
        category: &str,
        name: &str,
        send_in_pings: Vec<String>,
        lifetime: i32,
        disabled: bool,
        labels: Option<Vec<String>>,
    ) -> Result<u64> {
        self.new_labeled(category, name, send_in_pings, lifetime, disabled, labels, |meta, labels| {
            AnyLabeledMetric::Counter(LabeledMetric::new(CounterMetric::new(meta), labels))
        })
    }

    /// Creates a labeled boolean, optionally restricted to `labels`.
    pub fn new_labeled_boolean_metric(
        &self,
        category: &str,
        name: &str,
        send_in_pings: Vec<String>,
        lifetime: i32,
        disabled: bool,
        labels: Option<Vec<String>>,
    ) -> Result<u64> {
        self.new_labeled(category, name, send_in_pings, lifetime, disabled, labels, |meta, labels| {
            AnyLabeledMetric::Boolean(LabeledMetric::new(BooleanMetric::new(meta), labels))
        })
    }

    /// Creates a labeled string, optionally restricted to `labels`.
    pub fn new_labeled_string_metric(
        &self,
        category: &str,
        name: &str,
        send_in_pings: Vec<String>,
        lifetime: i32,
        disabled: bool,
        labels: Option<Vec<String>>,
    ) -> Result<u64> {
        self.new_labeled(category, name, send_in_pings, lifetime, disabled, labels, |meta, labels| {
            AnyLabeledMetric::String(LabeledMetric::new(StringMetric::new(meta), labels))
        })
    }

    #[allow(missing_docs)]
    pub fn destroy_labeled_metric(&self, handle: u64) {
        self.labeled.destroy(handle)
    }

    #[allow(missing_docs)]
    pub fn labeled_test_get_num_recorded_errors(&self, handle: u64, error_type: i32) -> i32 {
        let error_type = match ErrorType::try_from(error_type) {
            Ok(error_type) => error_type,
            Err(e) => {
                log::error!("{}", e);
                return 0;
            }
        };
        self.labeled.call_infallible(handle, |metric| {
            metric.error_count(&self.ctx, error_type)
        })
        .unwrap_or(0)
    }

    fn resolve_label(&self, handle: u64, label: &str) -> Option<LabeledSubmetric> {
        self.labeled.call_infallible(handle, |metric| metric.resolve(label))
    }

    /// Gets the counter for `label`, as a counter handle.
    pub fn labeled_counter_get(&self, handle: u64, label: &str) -> Option<u64> {
        match self.resolve_label(handle, label)? {
            LabeledSubmetric::Counter(metric) => Some(self.counters.insert_u64(metric)),
            _ => {
                log::error!("Labeled metric {:#x} is not a labeled counter", handle);
                None
            }
        }
    }

    /// Gets the boolean for `label`, as a boolean handle.
    pub fn labeled_boolean_get(&self, handle: u64, label: &str) -> Option<u64> {
        match self.resolve_label(handle, label)? {
            LabeledSubmetric::Boolean(metric) => Some(self.booleans.insert_u64(metric)),
            _ => {
                log::error!("Labeled metric {:#x} is not a labeled boolean", handle);
                None
            }
        }
    }

    /// Gets the string for `label`, as a string metric handle.
    pub fn labeled_string_get(&self, handle: u64, label: &str) -> Option<u64> {
        match self.resolve_label(handle, label)? {
            LabeledSubmetric::String(metric) => Some(self.strings.insert_u64(metric)),
            _ => {
                log::error!("Labeled metric {:#x} is not a labeled string", handle);
                None
            }
        }
    }
}

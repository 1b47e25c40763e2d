// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use inherent::inherent;

use crate::error_recording::{record_error, test_get_num_recorded_errors, ErrorType};
use crate::histogram::{Bucketing, Histogram, HistogramType};
use crate::metrics::{DistributionData, Metric, MetricType};
use crate::storage::StorageManager;
use crate::CommonMetricData;
use crate::Context;
use crate::Glean;

/// A custom distribution metric.
///
/// Custom distributions are used to record the distribution of arbitrary values
/// into buckets defined by the instrumentation.
#[derive(Clone, Debug)]
pub struct CustomDistributionMetric {
    meta: Arc<CommonMetricData>,
    range_min: u64,
    range_max: u64,
    bucket_count: u64,
    histogram_type: HistogramType,
}

impl_metric_type!(CustomDistributionMetric);

/// Create a snapshot of the histogram.
///
/// The snapshot can be serialized into the payload format.
pub(crate) fn snapshot<B: Bucketing>(hist: &Histogram<B>) -> DistributionData {
    DistributionData {
        values: hist
            .snapshot_values()
            .into_iter()
            .map(|(k, v)| (k as i64, v as i64))
            .collect(),
        sum: hist.sum().min(i64::MAX as u64) as i64,
        count: hist.count() as i64,
    }
}

// Adds the non-negative samples to `hist`, returning how many were negative.
fn accumulate<B: Bucketing>(samples: &[i64], hist: &mut Histogram<B>) -> i32 {
    let mut num_negative_samples = 0;
    for &sample in samples.iter() {
        if sample < 0 {
            num_negative_samples += 1;
        } else {
            hist.accumulate(sample as u64);
        }
    }
    num_negative_samples
}

// IMPORTANT:
//
// When changing this implementation, make sure all the operations are
// also declared in the related trait in `../traits/`.
impl CustomDistributionMetric {
    /// Creates a new custom distribution metric.
    pub fn new(
        meta: CommonMetricData,
        range_min: i64,
        range_max: i64,
        bucket_count: i64,
        histogram_type: HistogramType,
    ) -> Self {
        let range_min = range_min.max(0) as u64;
        Self {
            meta: Arc::new(meta),
            range_min,
            range_max: (range_max.max(0) as u64).max(range_min),
            bucket_count: bucket_count.max(0) as u64,
            histogram_type,
        }
    }

    /// Accumulates the provided signed samples in the metric synchronously.
    #[doc(hidden)]
    pub fn accumulate_samples_sync(&self, glean: &Glean, samples: Vec<i64>) {
        if !self.should_record(glean) {
            return;
        }

        let mut num_negative_samples = 0;

        glean.storage().record_with(glean, &self.meta, |old_value| {
            match self.histogram_type {
                HistogramType::Linear => {
                    let mut hist = match old_value {
                        Some(Metric::CustomDistributionLinear(hist)) => hist,
                        _ => Histogram::linear(
                            self.range_min,
                            self.range_max,
                            self.bucket_count as usize,
                        ),
                    };
                    num_negative_samples = accumulate(&samples, &mut hist);
                    Metric::CustomDistributionLinear(hist)
                }
                HistogramType::Exponential => {
                    let mut hist = match old_value {
                        Some(Metric::CustomDistributionExponential(hist)) => hist,
                        _ => Histogram::exponential(
                            self.range_min,
                            self.range_max,
                            self.bucket_count as usize,
                        ),
                    };
                    num_negative_samples = accumulate(&samples, &mut hist);
                    Metric::CustomDistributionExponential(hist)
                }
            }
        });

        if num_negative_samples > 0 {
            let msg = format!("Accumulated {} negative samples", num_negative_samples);
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidValue,
                msg,
                num_negative_samples,
            );
        }
    }

    /// Gets the currently stored histogram.
    #[doc(hidden)]
    pub fn get_value<'a, S: Into<Option<&'a str>>>(
        &self,
        glean: &Glean,
        ping_name: S,
    ) -> Option<DistributionData> {
        let queried_ping_name = ping_name
            .into()
            .unwrap_or_else(|| self.meta.default_storage());

        match StorageManager.snapshot_metric(
            glean.storage(),
            queried_ping_name,
            &self.meta.identifier(glean),
            self.meta.lifetime,
        ) {
            Some(Metric::CustomDistributionExponential(hist)) => Some(snapshot(&hist)),
            Some(Metric::CustomDistributionLinear(hist)) => Some(snapshot(&hist)),
            _ => None,
        }
    }
}

#[inherent]
impl crate::traits::CustomDistribution for CustomDistributionMetric {
    /// Accumulates the provided signed samples in the metric.
    ///
    /// This is required so that the platform-specific code can provide us with
    /// 64 bit signed integers if no `u64` comparable type is available. This
    /// will take care of filtering and reporting errors for any provided negative
    /// sample.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context the recording is queued on.
    /// * `samples` - The vector holding the samples to be recorded by the metric.
    ///
    /// ## Notes
    ///
    /// Discards any negative value in `samples` and report an [`ErrorType::InvalidValue`]
    /// for each of them.
    pub fn accumulate_samples(&self, ctx: &Context, samples: Vec<i64>) {
        let metric = self.clone();
        ctx.launch_with_glean(move |glean| metric.accumulate_samples_sync(glean, samples))
    }

    /// Accumulates a single signed sample in the metric.
    pub fn accumulate_single_sample(&self, ctx: &Context, sample: i64) {
        self.accumulate_samples(ctx, vec![sample])
    }

    /// **Test-only API.**
    ///
    /// Gets the currently stored value.
    ///
    /// This doesn't clear the stored value.
    pub fn test_get_value(&self, ctx: &Context, ping_name: Option<&str>) -> Option<DistributionData> {
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

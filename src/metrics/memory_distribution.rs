// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use inherent::inherent;

use crate::error_recording::{record_error, test_get_num_recorded_errors, ErrorType};
use crate::histogram::{Functional, Histogram};
use crate::metrics::memory_unit::MemoryUnit;
use crate::metrics::{DistributionData, Metric, MetricType};
use crate::storage::StorageManager;
use crate::CommonMetricData;
use crate::Context;
use crate::Glean;

// The base of the logarithm used to determine bucketing
const LOG_BASE: f64 = 2.0;

// The buckets per each order of magnitude of the logarithm.
const BUCKETS_PER_MAGNITUDE: f64 = 16.0;

// Set a maximum recordable value of 1 terabyte so the buckets aren't
// completely unbounded.
const MAX_BYTES: u64 = 1 << 40;

/// A memory distribution metric.
///
/// Memory distributions are used to accumulate and store memory sizes.
#[derive(Clone, Debug)]
pub struct MemoryDistributionMetric {
    meta: Arc<CommonMetricData>,
    memory_unit: MemoryUnit,
}

impl_metric_type!(MemoryDistributionMetric);

/// Create a snapshot of the histogram.
///
/// The snapshot can be serialized into the payload format.
pub(crate) fn snapshot(hist: &Histogram<Functional>) -> DistributionData {
    DistributionData {
        // **Caution**: This cannot use `Histogram::snapshot_values` and needs to use the more
        // specialized snapshot function.
        values: hist
            .snapshot()
            .into_iter()
            .map(|(k, v)| (k as i64, v as i64))
            .collect(),
        sum: hist.sum() as i64,
        count: hist.count() as i64,
    }
}

fn new_histogram() -> Histogram<Functional> {
    Histogram::functional(LOG_BASE, BUCKETS_PER_MAGNITUDE)
}

// IMPORTANT:
//
// When changing this implementation, make sure all the operations are
// also declared in the related trait in `../traits/`.
impl MemoryDistributionMetric {
    /// Creates a new memory distribution metric.
    pub fn new(meta: CommonMetricData, memory_unit: MemoryUnit) -> Self {
        Self {
            meta: Arc::new(meta),
            memory_unit,
        }
    }

    /// Accumulates the provided sample in the metric synchronously.
    #[doc(hidden)]
    pub fn accumulate_sync(&self, glean: &Glean, sample: i64) {
        if !self.should_record(glean) {
            return;
        }

        if sample < 0 {
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidValue,
                "Accumulated a negative sample",
                None,
            );
            return;
        }

        let mut sample = self.memory_unit.as_bytes(sample as u64);

        if sample > MAX_BYTES {
            let msg = "Sample is bigger than 1 terabyte";
            record_error(glean, &self.meta, ErrorType::InvalidValue, msg, None);
            sample = MAX_BYTES;
        }

        glean
            .storage()
            .record_with(glean, &self.meta, |old_value| match old_value {
                Some(Metric::MemoryDistribution(mut hist)) => {
                    hist.accumulate(sample);
                    Metric::MemoryDistribution(hist)
                }
                _ => {
                    let mut hist = new_histogram();
                    hist.accumulate(sample);
                    Metric::MemoryDistribution(hist)
                }
            });
    }

    /// Accumulates the provided signed samples in the metric synchronously.
    #[doc(hidden)]
    pub fn accumulate_samples_sync(&self, glean: &Glean, samples: Vec<i64>) {
        if !self.should_record(glean) {
            return;
        }

        let mut num_negative_samples = 0;
        let mut num_too_large_samples = 0;

        let samples: Vec<u64> = samples
            .into_iter()
            .filter_map(|sample| {
                if sample < 0 {
                    num_negative_samples += 1;
                    return None;
                }

                let sample = self.memory_unit.as_bytes(sample as u64);
                if sample > MAX_BYTES {
                    num_too_large_samples += 1;
                    Some(MAX_BYTES)
                } else {
                    Some(sample)
                }
            })
            .collect();

        glean.storage().record_with(glean, &self.meta, |old_value| {
            let mut hist = match old_value {
                Some(Metric::MemoryDistribution(hist)) => hist,
                _ => new_histogram(),
            };

            for &sample in samples.iter() {
                hist.accumulate(sample);
            }

            Metric::MemoryDistribution(hist)
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

        if num_too_large_samples > 0 {
            let msg = format!(
                "Accumulated {} samples larger than 1TB",
                num_too_large_samples
            );
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidValue,
                msg,
                num_too_large_samples,
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
            Some(Metric::MemoryDistribution(hist)) => Some(snapshot(&hist)),
            _ => None,
        }
    }
}

#[inherent]
impl crate::traits::MemoryDistribution for MemoryDistributionMetric {
    /// Accumulates the provided sample in the metric.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context the recording is queued on.
    /// * `sample` - The sample to be recorded by the metric. The sample is assumed to be in the
    ///   configured memory unit of the metric.
    ///
    /// ## Notes
    ///
    /// Values bigger than 1 Terabyte (2<sup>40</sup> bytes) are truncated
    /// and an [`ErrorType::InvalidValue`] error is recorded.
    pub fn accumulate(&self, ctx: &Context, sample: i64) {
        let metric = self.clone();
        ctx.launch_with_glean(move |glean| metric.accumulate_sync(glean, sample))
    }

    /// Accumulates the provided signed samples in the metric.
    ///
    /// This is required so that the platform-specific code can provide us with
    /// 64 bit signed integers if no `u64` comparable type is available. This
    /// will take care of filtering and reporting errors for any provided negative
    /// sample.
    ///
    /// Please note that this assumes that the provided samples are already in
    /// the "unit" declared by the instance of the metric type (e.g. if the the
    /// instance this method was called on is using [`MemoryUnit::Kilobyte`], then
    /// `samples` are assumed to be in that unit).
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
    ///
    /// Values bigger than 1 Terabyte (2<sup>40</sup> bytes) are truncated
    /// and an [`ErrorType::InvalidValue`] error is recorded.
    pub fn accumulate_samples(&self, ctx: &Context, samples: Vec<i64>) {
        let metric = self.clone();
        ctx.launch_with_glean(move |glean| metric.accumulate_samples_sync(glean, samples))
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
    ///
    /// # Arguments
    ///
    /// * `error` - The type of error
    ///
    /// # Returns
    ///
    /// The number of errors recorded.
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

    fn distribution(memory_unit: MemoryUnit) -> MemoryDistributionMetric {
        MemoryDistributionMetric::new(
            CommonMetricData {
                name: "distribution".into(),
                category: "telemetry".into(),
                send_in_pings: vec!["store1".into()],
                disabled: false,
                lifetime: Lifetime::Ping,
                ..Default::default()
            },
            memory_unit,
        )
    }

    #[test]
    fn serializer_should_correctly_serialize_memory_distribution() {
        let (glean, _t) = new_glean(None);
        let metric = distribution(MemoryUnit::Kilobyte);

        metric.accumulate_sync(&glean, 100_000);

        let snapshot = metric.get_value(&glean, None).unwrap();
        assert_eq!(1, snapshot.count);
        assert_eq!(100_000 * 1024, snapshot.sum);
    }

    #[test]
    fn kilobytes_are_stored_as_bytes() {
        let (glean, _t) = new_glean(None);
        let metric = distribution(MemoryUnit::Kilobyte);

        metric.accumulate_sync(&glean, 42);

        let snapshot = metric.get_value(&glean, None).unwrap();
        assert_eq!(43008, snapshot.sum);
        assert_eq!(Some(&1), snapshot.values.get(&42494));
        assert_eq!(Some(&0), snapshot.values.get(&44376));
        assert_eq!(2, snapshot.values.len());
    }

    #[test]
    fn the_accumulate_samples_api_correctly_stores_memory_values() {
        let (glean, _t) = new_glean(None);
        let metric = distribution(MemoryUnit::Kilobyte);

        // Accumulate the samples. We intentionally do not report
        // negative values to not trigger error reporting.
        metric.accumulate_samples_sync(&glean, [1, 2, 3].to_vec());

        let snapshot = metric.get_value(&glean, None).unwrap();

        let kb = 1024;

        // Check that we got the right sum of samples.
        assert_eq!(snapshot.sum, 6 * kb);

        // We should get a sample in 3 buckets.
        // These numbers are a bit magic, but they correspond to
        // `hist.sample_to_bucket_minimum(i * kb)` for `i = 1..=3`.
        assert_eq!(1, snapshot.values[&1023]);
        assert_eq!(1, snapshot.values[&2047]);
        assert_eq!(1, snapshot.values[&3024]);

        // No errors should be reported.
        assert!(
            test_get_num_recorded_errors(&glean, metric.meta(), ErrorType::InvalidValue).is_err()
        );
    }

    #[test]
    fn the_accumulate_samples_api_correctly_handles_negative_values() {
        let (glean, _t) = new_glean(None);
        let metric = distribution(MemoryUnit::Kilobyte);

        // Accumulate the samples.
        metric.accumulate_samples_sync(&glean, [-1, 1, 2, 3].to_vec());

        let snapshot = metric.get_value(&glean, None).unwrap();

        let kb = 1024;

        // Check that we got the right sum of number of samples.
        assert_eq!(snapshot.sum, 6 * kb);

        // We should get a sample in each of the first 3 buckets.
        assert_eq!(1, snapshot.values[&1023]);
        assert_eq!(1, snapshot.values[&2047]);
        assert_eq!(1, snapshot.values[&3024]);

        // 1 error should be reported.
        assert_eq!(
            Ok(1),
            test_get_num_recorded_errors(&glean, metric.meta(), ErrorType::InvalidValue)
        );
    }

    #[test]
    fn samples_above_the_ceiling_are_clipped() {
        let (glean, _t) = new_glean(None);
        let metric = distribution(MemoryUnit::Gigabyte);

        // 2 TiB
        metric.accumulate_sync(&glean, 2048);

        let snapshot = metric.get_value(&glean, None).unwrap();
        assert_eq!(MAX_BYTES as i64, snapshot.sum);
        assert_eq!(Some(&1), snapshot.values.get(&((MAX_BYTES - 1) as i64)));
        assert_eq!(
            Ok(1),
            test_get_num_recorded_errors(&glean, metric.meta(), ErrorType::InvalidValue)
        );
    }
}

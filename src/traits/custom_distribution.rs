// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::metrics::DistributionData;
use crate::Context;
use crate::ErrorType;

/// A description for the [`CustomDistributionMetric`](crate::metrics::CustomDistributionMetric) type.
///
/// When changing this trait, make sure all the operations are
/// implemented in the related type in `../metrics/`.
pub trait CustomDistribution {
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
    fn accumulate_samples(&self, ctx: &Context, samples: Vec<i64>);

    /// Accumulates a single signed sample in the metric.
    fn accumulate_single_sample(&self, ctx: &Context, sample: i64);

    /// **Test-only API.**
    ///
    /// Gets the currently stored value.
    ///
    /// This doesn't clear the stored value.
    fn test_get_value(&self, ctx: &Context, ping_name: Option<&str>) -> Option<DistributionData>;

    /// **Exported for test purposes.**
    ///
    /// Gets the number of recorded errors for the given metric and error type.
    fn test_get_num_recorded_errors(&self, ctx: &Context, error: ErrorType) -> i32;
}

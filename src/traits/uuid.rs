// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Context;
use crate::ErrorType;

/// A description for the [`UuidMetric`](crate::metrics::UuidMetric) type.
///
/// When changing this trait, make sure all the operations are
/// implemented in the related type in `../metrics/`.
pub trait Uuid {
    /// Sets to the specified value.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context the recording is queued on.
    /// * `value` - The [`Uuid`] to set the metric to.
    fn set(&self, ctx: &Context, value: ::uuid::Uuid);

    /// Sets to the value parsed from the given string.
    ///
    /// Records an [`ErrorType::InvalidValue`] if the string isn't a valid UUID.
    fn set_from_str(&self, ctx: &Context, value: String);

    /// Generates a new random [`Uuid`] and sets the metric to it.
    fn generate_and_set(&self, ctx: &Context) -> ::uuid::Uuid;

    /// **Test-only API.**
    ///
    /// Gets the currently stored value as a [`Uuid`].
    ///
    /// This doesn't clear the stored value.
    fn test_get_value(&self, ctx: &Context, ping_name: Option<&str>) -> Option<::uuid::Uuid>;

    /// **Exported for test purposes.**
    ///
    /// Gets the number of recorded errors for the given metric and error type.
    fn test_get_num_recorded_errors(&self, ctx: &Context, error: ErrorType) -> i32;
}

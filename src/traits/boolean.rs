// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Context;
use crate::ErrorType;

/// A description for the [`BooleanMetric`](crate::metrics::BooleanMetric) type.
///
/// When changing this trait, make sure all the operations are
/// implemented in the related type in `../metrics/`.
pub trait Boolean {
    /// Sets to the specified boolean value.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context the recording is queued on.
    /// * `value` - the value to set.
    fn set(&self, ctx: &Context, value: bool);

    /// **Test-only API.**
    ///
    /// Gets the currently stored value as a boolean,
    /// after all previously queued recordings ran.
    ///
    /// This doesn't clear the stored value.
    fn test_get_value(&self, ctx: &Context, ping_name: Option<&str>) -> Option<bool>;

    /// **Exported for test purposes.**
    ///
    /// Gets the number of recorded errors for the given metric and error type.
    ///
    /// # Returns
    ///
    /// The number of errors reported.
    fn test_get_num_recorded_errors(&self, ctx: &Context, error: ErrorType) -> i32;
}

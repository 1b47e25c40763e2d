// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use ffi_support::{ConcurrentHandleMap, HandleError};

/// Handle lookups that log failures instead of returning them.
///
/// Bindings have no way to react to a bad handle, so an invalid, stale or
/// foreign handle turns the call into a no-op.
pub(crate) trait HandleMapExtension {
    type Output;

    /// Runs `callback` on the object behind `handle`.
    ///
    /// Returns `None` if the handle doesn't resolve.
    fn call_infallible<R, F>(&self, handle: u64, callback: F) -> Option<R>
    where
        F: FnOnce(&Self::Output) -> R;

    /// Stores `value` and returns its handle in its packed form.
    fn insert_u64(&self, value: Self::Output) -> u64;

    /// Drops the object behind `handle`.
    fn destroy(&self, handle: u64);
}

impl<T> HandleMapExtension for ConcurrentHandleMap<T> {
    type Output = T;

    fn call_infallible<R, F>(&self, handle: u64, callback: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        match self.get_u64(handle, |obj| Ok::<R, HandleError>(callback(obj))) {
            Ok(output) => Some(output),
            Err(e) => {
                log::error!("Ignoring call with handle {:#x}: {}", handle, e);
                None
            }
        }
    }

    fn insert_u64(&self, value: T) -> u64 {
        self.insert(value).into_u64()
    }

    fn destroy(&self, handle: u64) {
        if let Err(e) = self.delete_u64(handle) {
            log::error!("Ignoring destruction of handle {:#x}: {}", handle, e);
        }
    }
}

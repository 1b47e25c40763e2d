// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use inherent::inherent;

use crate::error_recording::{record_error, test_get_num_recorded_errors, ErrorType};
use crate::metrics::Metric;
use crate::metrics::MetricType;
use crate::storage::StorageManager;
use crate::util::truncate_with_overflow_error;
use crate::CommonMetricData;
use crate::Context;
use crate::Glean;

/// Entries a list keeps; more are rejected with [`ErrorType::InvalidValue`].
const MAX_LIST_LENGTH: usize = 20;
/// Bytes an entry keeps; longer entries are cut with [`ErrorType::InvalidOverflow`].
const MAX_STRING_LENGTH: usize = 50;

/// A list of short strings, appended to or replaced as a whole.
#[derive(Clone, Debug)]
pub struct StringListMetric {
    meta: Arc<CommonMetricData>,
}

impl_metric_type!(StringListMetric);

impl StringListMetric {
    /// Creates a new string list metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self {
            meta: Arc::new(meta),
        }
    }

    fn entry(&self, glean: &Glean, value: String) -> String {
        truncate_with_overflow_error(glean, &self.meta, value, MAX_STRING_LENGTH)
    }

    #[doc(hidden)]
    pub fn add_sync<S: Into<String>>(&self, glean: &Glean, value: S) {
        if !self.should_record(glean) {
            return;
        }

        let value = self.entry(glean, value.into());
        let mut rejected = false;
        glean.storage().record_with(glean, &self.meta, |old_value| {
            let mut list = match old_value {
                Some(Metric::StringList(list)) => list,
                _ => Vec::new(),
            };
            if list.len() < MAX_LIST_LENGTH {
                list.push(value.clone());
            } else {
                rejected = true;
            }
            Metric::StringList(list)
        });

        if rejected {
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidValue,
                format!("String list is full at {} entries", MAX_LIST_LENGTH),
                None,
            );
        }
    }

    #[doc(hidden)]
    pub fn set_sync(&self, glean: &Glean, mut values: Vec<String>) {
        if !self.should_record(glean) {
            return;
        }

        if values.len() > MAX_LIST_LENGTH {
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidValue,
                format!(
                    "String list of {} entries cut to {}",
                    values.len(),
                    MAX_LIST_LENGTH
                ),
                None,
            );
            values.truncate(MAX_LIST_LENGTH);
        }

        let list = values
            .into_iter()
            .map(|value| self.entry(glean, value))
            .collect();
        glean
            .storage()
            .record(glean, &self.meta, &Metric::StringList(list));
    }

    /// The stored list, without clearing it.
    #[doc(hidden)]
    pub fn get_value<'a, S: Into<Option<&'a str>>>(
        &self,
        glean: &Glean,
        ping_name: S,
    ) -> Option<Vec<String>> {
        let storage = ping_name
            .into()
            .unwrap_or_else(|| self.meta.default_storage());

        match StorageManager.snapshot_metric(
            glean.storage(),
            storage,
            &self.meta.identifier(glean),
            self.meta.lifetime,
        ) {
            Some(Metric::StringList(list)) => Some(list),
            _ => None,
        }
    }
}

#[inherent]
impl crate::traits::StringList for StringListMetric {
    /// Appends `value`, cut to 50 bytes. A full list (20 entries) stays as it is.
    pub fn add(&self, ctx: &Context, value: String) {
        let metric = self.clone();
        ctx.launch_with_glean(move |glean| metric.add_sync(glean, value))
    }

    /// Replaces the list. Only the first 20 entries are kept, each cut to 50 bytes.
    pub fn set(&self, ctx: &Context, values: Vec<String>) {
        let metric = self.clone();
        ctx.launch_with_glean(move |glean| metric.set_sync(glean, values))
    }

    /// **Test-only API.**
    pub fn test_get_value(&self, ctx: &Context, ping_name: Option<&str>) -> Option<Vec<String>> {
        ctx.block_on_dispatcher();
        ctx.with_glean(|glean| self.get_value(glean, ping_name))
            .flatten()
    }

    /// **Test-only API.**
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

    fn list() -> StringListMetric {
        StringListMetric::new(CommonMetricData {
            name: "list".into(),
            category: "telemetry".into(),
            send_in_pings: vec!["store1".into()],
            lifetime: Lifetime::Application,
            ..Default::default()
        })
    }

    #[test]
    fn appending_past_the_limit_records_an_error() {
        let (glean, _t) = new_glean(None);
        let metric = list();

        for i in 0..=MAX_LIST_LENGTH {
            metric.add_sync(&glean, i.to_string());
        }

        let value = metric.get_value(&glean, None).unwrap();
        assert_eq!(MAX_LIST_LENGTH, value.len());
        assert_eq!(
            Ok(1),
            test_get_num_recorded_errors(&glean, metric.meta(), ErrorType::InvalidValue)
        );
    }

    #[test]
    fn long_entries_are_truncated() {
        let (glean, _t) = new_glean(None);
        let metric = list();

        metric.set_sync(&glean, vec!["a".repeat(60), "short".into()]);

        let value = metric.get_value(&glean, None).unwrap();
        assert_eq!(vec!["a".repeat(MAX_STRING_LENGTH), "short".to_string()], value);
        assert_eq!(
            Ok(1),
            test_get_num_recorded_errors(&glean, metric.meta(), ErrorType::InvalidOverflow)
        );
    }

    #[test]
    fn adding_to_a_full_list_after_set_is_rejected() {
        let (glean, _t) = new_glean(None);
        let metric = list();

        let values: Vec<String> = (0..MAX_LIST_LENGTH).map(|i| i.to_string()).collect();
        metric.set_sync(&glean, values.clone());
        metric.add_sync(&glean, "late");

        assert_eq!(values, metric.get_value(&glean, None).unwrap());
        assert_eq!(
            Ok(1),
            test_get_num_recorded_errors(&glean, metric.meta(), ErrorType::InvalidValue)
        );
    }

    #[test]
    fn setting_too_many_entries_keeps_the_first_ones() {
        let (glean, _t) = new_glean(None);
        let metric = list();

        let values: Vec<String> = (0..25).map(|i| i.to_string()).collect();
        metric.set_sync(&glean, values.clone());

        assert_eq!(
            values[..MAX_LIST_LENGTH].to_vec(),
            metric.get_value(&glean, None).unwrap()
        );
        assert_eq!(
            Ok(1),
            test_get_num_recorded_errors(&glean, metric.meta(), ErrorType::InvalidValue)
        );
    }
}

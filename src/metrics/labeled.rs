// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::common_metric_data::DynamicLabel;
use crate::error_recording::{record_error, test_get_num_recorded_errors, ErrorType};
use crate::metrics::{
    BooleanMetric, CounterMetric, CustomDistributionMetric, MemoryDistributionMetric, MetricType,
    StringMetric, TimingDistributionMetric,
};
use crate::CommonMetricData;
use crate::Context;
use crate::Glean;

/// The label every invalid or overflowing label is routed to.
pub(crate) const OTHER_LABEL: &str = "__other__";

const MAX_LABELS: usize = 16;
const MAX_LABEL_LENGTH: usize = 30;

static LABEL_REGEX: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!("^[a-z][a-z0-9_]{{0,{}}}$", MAX_LABEL_LENGTH - 1);
    Regex::new(&pattern).expect("label pattern is valid")
});

/// What happens to a new dynamic label once a labeled metric holds
/// the maximum number of distinct labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelOverflow {
    /// Record into `__other__` without counting an error.
    RouteToOther,
    /// Record into `__other__` and count an [`ErrorType::InvalidOverflow`].
    RecordError,
}

impl Default for LabelOverflow {
    fn default() -> Self {
        LabelOverflow::RouteToOther
    }
}

fn combine_base_identifier_and_label(base_identifer: &str, label: &str) -> String {
    format!("{}/{}", base_identifer, label)
}

/// Resolves the storage key for a labeled submetric.
///
/// Checked against the data currently stored for the metric, in order:
///
/// 1. labels from a static list map to themselves, anything else to `__other__`;
/// 2. labels already stored map to themselves;
/// 3. labels not matching `^[a-z][a-z0-9_]{0,29}$` map to `__other__`;
/// 4. once [`MAX_LABELS`] distinct labels are stored, new ones map to `__other__`.
///
/// Errors are only counted when `record_errors` is set, so readers can resolve
/// labels without side effects.
/// Must not be called while holding a lock on the database.
pub(crate) fn resolve_label(
    glean: &Glean,
    meta: &CommonMetricData,
    base_identifier: &str,
    dynamic: &DynamicLabel,
    record_errors: bool,
) -> String {
    let label = dynamic.label.as_str();

    if let Some(allowed) = &dynamic.allowed_labels {
        if allowed.iter().any(|l| l == label) {
            return combine_base_identifier_and_label(base_identifier, label);
        }

        if record_errors {
            let msg = format!("Label '{}' is not in the list of allowed labels", label);
            record_error(glean, meta, ErrorType::InvalidLabel, msg, None);
        }
        return combine_base_identifier_and_label(base_identifier, OTHER_LABEL);
    }

    let key = combine_base_identifier_and_label(base_identifier, label);
    let prefix = format!("{}/", base_identifier);

    let mut known = false;
    let mut seen_labels = HashSet::new();
    for store in meta.storage_names() {
        glean
            .storage()
            .iter_store_from(meta.lifetime, store, Some(&prefix), |metric_id, _| {
                if metric_id == key {
                    known = true;
                }
                let stored_label = &metric_id[prefix.len()..];
                if stored_label != OTHER_LABEL {
                    seen_labels.insert(stored_label.to_string());
                }
            });
    }

    if known {
        return key;
    }

    if !LABEL_REGEX.is_match(label) {
        if record_errors {
            let msg = format!("Label must be snake_case, got '{}'", label);
            record_error(glean, meta, ErrorType::InvalidLabel, msg, None);
        }
        return combine_base_identifier_and_label(base_identifier, OTHER_LABEL);
    }

    if seen_labels.len() >= MAX_LABELS {
        if record_errors && dynamic.overflow == LabelOverflow::RecordError {
            let msg = format!(
                "Label '{}' exceeds the maximum of {} distinct labels",
                label, MAX_LABELS
            );
            record_error(glean, meta, ErrorType::InvalidOverflow, msg, None);
        }
        return combine_base_identifier_and_label(base_identifier, OTHER_LABEL);
    }

    key
}

/// Metric types that can be used as submetrics of a [`LabeledMetric`].
pub trait AllowLabeled: MetricType + Clone {}

impl AllowLabeled for BooleanMetric {}
impl AllowLabeled for CounterMetric {}
impl AllowLabeled for StringMetric {}
impl AllowLabeled for MemoryDistributionMetric {}
impl AllowLabeled for TimingDistributionMetric {}
impl AllowLabeled for CustomDistributionMetric {}

/// A labeled metric.
///
/// Labeled metrics allow to record multiple sub-metrics of the same type under different string labels.
#[derive(Clone, Debug)]
pub struct LabeledMetric<T> {
    labels: Option<Arc<Vec<String>>>,
    overflow: LabelOverflow,
    /// Type of the underlying metric.
    ///
    /// Every submetric is a copy of it with a dynamic label attached.
    submetric: T,
}

/// A labeled counter.
pub type LabeledCounter = LabeledMetric<CounterMetric>;

/// A labeled boolean.
pub type LabeledBoolean = LabeledMetric<BooleanMetric>;

/// A labeled string.
pub type LabeledString = LabeledMetric<StringMetric>;

/// A labeled memory distribution.
pub type LabeledMemoryDistribution = LabeledMetric<MemoryDistributionMetric>;

/// A labeled timing distribution.
pub type LabeledTimingDistribution = LabeledMetric<TimingDistributionMetric>;

/// A labeled custom distribution.
pub type LabeledCustomDistribution = LabeledMetric<CustomDistributionMetric>;

impl<T> LabeledMetric<T>
where
    T: AllowLabeled,
{
    /// Creates a new labeled metric from the given metric instance and optional list of labels.
    ///
    /// The `submetric` carries the metadata and type specific parameters
    /// (units, bucketing) every label shares.
    ///
    /// See [`get`](LabeledMetric::get) for information on how static or dynamic labels are handled.
    pub fn new(submetric: T, labels: Option<Vec<String>>) -> LabeledMetric<T> {
        LabeledMetric {
            labels: labels.map(Arc::new),
            overflow: LabelOverflow::default(),
            submetric,
        }
    }

    /// Sets what happens to new labels once the metric holds the maximum number of labels.
    pub fn with_overflow(mut self, overflow: LabelOverflow) -> Self {
        self.overflow = overflow;
        self
    }

    /// The metadata shared by all submetrics.
    pub fn meta(&self) -> &CommonMetricData {
        self.submetric.meta()
    }

    /// Gets a specific metric for a given label.
    ///
    /// If the metric was created with a set of acceptable labels and the
    /// given label is not in the set, it will be recorded under the special `OTHER_LABEL` label.
    ///
    /// Without a set of acceptable labels, only the first 16 unique labels will be used.
    /// After that, any additional labels will be recorded under the special `OTHER_LABEL` label.
    ///
    /// Labels must be `snake_case` and less than 30 characters.
    /// If an invalid label is used, the metric will be recorded in the special `OTHER_LABEL` label.
    ///
    /// The label is resolved when a value gets recorded.
    pub fn get<S: AsRef<str>>(&self, label: S) -> T {
        self.submetric.with_dynamic_label(DynamicLabel {
            label: label.as_ref().to_string(),
            allowed_labels: self.labels.clone(),
            overflow: self.overflow,
        })
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

/// Any labeled metric, as a closed set of the supported submetric types.
#[derive(Clone, Debug)]
pub enum AnyLabeledMetric {
    /// A [`LabeledCounter`].
    Counter(LabeledCounter),
    /// A [`LabeledBoolean`].
    Boolean(LabeledBoolean),
    /// A [`LabeledString`].
    String(LabeledString),
    /// A [`LabeledMemoryDistribution`].
    MemoryDistribution(LabeledMemoryDistribution),
    /// A [`LabeledTimingDistribution`].
    TimingDistribution(LabeledTimingDistribution),
    /// A [`LabeledCustomDistribution`].
    CustomDistribution(LabeledCustomDistribution),
}

/// A submetric handed out by an [`AnyLabeledMetric`].
#[derive(Clone, Debug)]
pub enum LabeledSubmetric {
    /// A counter submetric.
    Counter(CounterMetric),
    /// A boolean submetric.
    Boolean(BooleanMetric),
    /// A string submetric.
    String(StringMetric),
    /// A memory distribution submetric.
    MemoryDistribution(MemoryDistributionMetric),
    /// A timing distribution submetric.
    TimingDistribution(TimingDistributionMetric),
    /// A custom distribution submetric.
    CustomDistribution(CustomDistributionMetric),
}

impl AnyLabeledMetric {
    /// Gets the submetric for `label`.
    pub fn resolve(&self, label: &str) -> LabeledSubmetric {
        match self {
            AnyLabeledMetric::Counter(m) => LabeledSubmetric::Counter(m.get(label)),
            AnyLabeledMetric::Boolean(m) => LabeledSubmetric::Boolean(m.get(label)),
            AnyLabeledMetric::String(m) => LabeledSubmetric::String(m.get(label)),
            AnyLabeledMetric::MemoryDistribution(m) => {
                LabeledSubmetric::MemoryDistribution(m.get(label))
            }
            AnyLabeledMetric::TimingDistribution(m) => {
                LabeledSubmetric::TimingDistribution(m.get(label))
            }
            AnyLabeledMetric::CustomDistribution(m) => {
                LabeledSubmetric::CustomDistribution(m.get(label))
            }
        }
    }

    /// **Test-only API.**
    ///
    /// The number of errors of type `error` recorded for this labeled metric.
    pub fn error_count(&self, ctx: &Context, error: ErrorType) -> i32 {
        match self {
            AnyLabeledMetric::Counter(m) => m.test_get_num_recorded_errors(ctx, error),
            AnyLabeledMetric::Boolean(m) => m.test_get_num_recorded_errors(ctx, error),
            AnyLabeledMetric::String(m) => m.test_get_num_recorded_errors(ctx, error),
            AnyLabeledMetric::MemoryDistribution(m) => m.test_get_num_recorded_errors(ctx, error),
            AnyLabeledMetric::TimingDistribution(m) => m.test_get_num_recorded_errors(ctx, error),
            AnyLabeledMetric::CustomDistribution(m) => m.test_get_num_recorded_errors(ctx, error),
        }
    }
}

impl LabeledSubmetric {
    /// The submetric's metadata, including its dynamic label.
    pub fn meta(&self) -> &CommonMetricData {
        match self {
            LabeledSubmetric::Counter(m) => m.meta(),
            LabeledSubmetric::Boolean(m) => m.meta(),
            LabeledSubmetric::String(m) => m.meta(),
            LabeledSubmetric::MemoryDistribution(m) => m.meta(),
            LabeledSubmetric::TimingDistribution(m) => m.meta(),
            LabeledSubmetric::CustomDistribution(m) => m.meta(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tests::new_glean;
    use crate::Lifetime;

    fn labeled_counter(labels: Option<Vec<String>>) -> LabeledCounter {
        LabeledMetric::new(
            CounterMetric::new(CommonMetricData {
                name: "labeled_metric".into(),
                category: "telemetry".into(),
                send_in_pings: vec!["store1".into()],
                lifetime: Lifetime::Ping,
                ..Default::default()
            }),
            labels,
        )
    }

    fn invalid_labels(glean: &Glean, metric: &LabeledCounter) -> Option<i32> {
        test_get_num_recorded_errors(glean, metric.meta(), ErrorType::InvalidLabel).ok()
    }

    #[test]
    fn the_label_regex_allows_snake_case() {
        assert!(LABEL_REGEX.is_match("snake_case_1"));
        assert!(LABEL_REGEX.is_match(&"a".repeat(30)));
        assert!(!LABEL_REGEX.is_match(&"a".repeat(31)));
        assert!(!LABEL_REGEX.is_match("Capital"));
        assert!(!LABEL_REGEX.is_match("1number"));
        assert!(!LABEL_REGEX.is_match("with.dot"));
        assert!(!LABEL_REGEX.is_match(""));
    }

    #[test]
    fn dynamic_labels_get_their_own_key() {
        let (glean, _t) = new_glean(None);
        let metric = labeled_counter(None);

        metric.get("label1").add_sync(&glean, 1);
        metric.get("label1").add_sync(&glean, 2);
        metric.get("label2").add_sync(&glean, 5);

        assert_eq!(Some(3), metric.get("label1").get_value(&glean, None));
        assert_eq!(Some(5), metric.get("label2").get_value(&glean, None));
        assert_eq!(None, invalid_labels(&glean, &metric));
    }

    #[test]
    fn the_seventeenth_label_goes_to_other() {
        let (glean, _t) = new_glean(None);
        let metric = labeled_counter(None);

        for i in 0..=MAX_LABELS {
            metric.get(format!("label_{}", i)).add_sync(&glean, 1);
        }

        assert_eq!(Some(1), metric.get("label_15").get_value(&glean, None));
        assert_eq!(Some(1), metric.get(OTHER_LABEL).get_value(&glean, None));
        assert!(!glean.storage().has_metric(
            Lifetime::Ping,
            "store1",
            "telemetry.labeled_metric/label_16"
        ));
        // Known labels keep working after the limit is hit.
        metric.get("label_0").add_sync(&glean, 1);
        assert_eq!(Some(2), metric.get("label_0").get_value(&glean, None));

        // Routing to `__other__` is silent by default.
        assert!(test_get_num_recorded_errors(&glean, metric.meta(), ErrorType::InvalidOverflow)
            .is_err());
    }

    #[test]
    fn overflow_can_be_counted() {
        let (glean, _t) = new_glean(None);
        let metric = labeled_counter(None).with_overflow(LabelOverflow::RecordError);

        for i in 0..MAX_LABELS + 2 {
            metric.get(format!("label_{}", i)).add_sync(&glean, 1);
        }

        assert_eq!(Some(2), metric.get(OTHER_LABEL).get_value(&glean, None));
        assert_eq!(
            Ok(2),
            test_get_num_recorded_errors(&glean, metric.meta(), ErrorType::InvalidOverflow)
        );
    }

    #[test]
    fn invalid_labels_go_to_other() {
        let (glean, _t) = new_glean(None);
        let metric = labeled_counter(None);

        metric.get("notSnakeCase").add_sync(&glean, 1);
        metric.get("this_label_is_far_too_long_to_be_valid").add_sync(&glean, 1);

        assert_eq!(Some(2), metric.get(OTHER_LABEL).get_value(&glean, None));
        assert_eq!(Some(2), invalid_labels(&glean, &metric));
    }

    #[test]
    fn invalid_labels_are_counted_after_the_cap() {
        let (glean, _t) = new_glean(None);
        let metric = labeled_counter(None);

        for i in 0..MAX_LABELS {
            metric.get(format!("label_{}", i)).add_sync(&glean, 1);
        }
        metric.get("Not Snake").add_sync(&glean, 1);
        metric.get("label_16").add_sync(&glean, 1);

        assert_eq!(Some(2), metric.get(OTHER_LABEL).get_value(&glean, None));
        assert_eq!(Some(1), invalid_labels(&glean, &metric));
    }

    #[test]
    fn static_labels_reject_unknown_labels() {
        let (glean, _t) = new_glean(None);
        let metric = labeled_counter(Some(vec!["label1".into(), "label2".into()]));

        metric.get("label1").add_sync(&glean, 1);
        metric.get("label3").add_sync(&glean, 1);

        assert_eq!(Some(1), metric.get("label1").get_value(&glean, None));
        assert_eq!(Some(1), metric.get(OTHER_LABEL).get_value(&glean, None));
        assert_eq!(Some(1), invalid_labels(&glean, &metric));
    }

    #[test]
    fn reading_an_invalid_label_records_nothing() {
        let (glean, _t) = new_glean(None);
        let metric = labeled_counter(None);

        assert_eq!(None, metric.get("Invalid").get_value(&glean, None));
        assert_eq!(None, invalid_labels(&glean, &metric));
    }

    #[test]
    fn any_labeled_metric_resolves_to_the_matching_submetric() {
        let metric = AnyLabeledMetric::Counter(labeled_counter(None));

        match metric.resolve("label1") {
            LabeledSubmetric::Counter(c) => {
                let label = c.meta().dynamic_label.as_ref().map(|d| d.label.as_str());
                assert_eq!(Some("label1"), label);
            }
            other => panic!("Unexpected submetric {:?}", other),
        }
    }
}

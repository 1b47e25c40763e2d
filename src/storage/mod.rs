// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Storage snapshotting.

use serde_json::{json, Map, Value as JsonValue};

use crate::database::Database;
use crate::metrics::Metric;
use crate::Lifetime;

/// Snapshot metrics from the underlying database.
pub struct StorageManager;

/// Splits a stored identifier into its category, name and label.
///
/// `category.name/label` turns into `(Some("category"), "name", Some("label"))`.
/// The category is everything up to the last dot before the label.
fn split_identifier(identifier: &str) -> (Option<&str>, &str, Option<&str>) {
    let (base, label) = match identifier.split_once('/') {
        Some((base, label)) => (base, Some(label)),
        None => (identifier, None),
    };

    match base.rsplit_once('.') {
        Some((category, name)) => (Some(category), name, label),
        None => (None, base, label),
    }
}

/// Get the object at `key`, creating it if it doesn't exist.
///
/// Returns `None` if a non-object value already lives at `key`.
fn object_entry<'a>(map: &'a mut Map<String, JsonValue>, key: &str) -> Option<&'a mut Map<String, JsonValue>> {
    map.entry(key.to_string())
        .or_insert_with(|| json!({}))
        .as_object_mut()
}

/// Inserts a metric value into a `{category: {name: value}}` snapshot.
///
/// Labeled values end up as `{category: {name: {label: value}}}`.
fn snapshot_metric_into(snapshot: &mut Map<String, JsonValue>, identifier: &str, metric: &Metric) {
    let (category, name, label) = split_identifier(identifier);

    let target = match category {
        Some(category) => match object_entry(snapshot, category) {
            Some(target) => target,
            None => {
                log::warn!("Snapshot conflict for category '{}', skipping '{}'", category, identifier);
                return;
            }
        },
        None => snapshot,
    };

    match label {
        Some(label) => match object_entry(target, name) {
            Some(labels) => {
                labels.insert(label.to_string(), metric.as_json());
            }
            None => log::warn!("Snapshot conflict for '{}', skipping label '{}'", name, label),
        },
        None => {
            target.insert(name.to_string(), metric.as_json());
        }
    }
}

impl StorageManager {
    /// Snapshots the given store and optionally clear it.
    ///
    /// # Arguments
    ///
    /// * `storage` - the database to read from.
    /// * `store_name` - the store to snapshot.
    /// * `clear_store` - whether to clear the data after snapshotting.
    ///
    /// # Returns
    ///
    /// The stored data in a string encoded as JSON.
    /// If no data for the store exists, `None` is returned.
    pub fn snapshot(
        &self,
        storage: &Database,
        store_name: &str,
        clear_store: bool,
    ) -> Option<String> {
        self.snapshot_as_json(storage, store_name, clear_store)
            .map(|data| ::serde_json::to_string_pretty(&data).unwrap_or_default())
    }

    /// Snapshots the given store and optionally clear it.
    ///
    /// Values of all lifetimes are grouped by category, then name.
    /// Keys come out sorted, so the output is stable.
    ///
    /// # Arguments
    ///
    /// * `storage` - the database to read from.
    /// * `store_name` - the store to snapshot.
    /// * `clear_store` - whether to clear the Ping lifetime data after snapshotting.
    ///
    /// # Returns
    ///
    /// A JSON representation of the stored data.
    /// If no data for the store exists, `None` is returned.
    pub fn snapshot_as_json(
        &self,
        storage: &Database,
        store_name: &str,
        clear_store: bool,
    ) -> Option<JsonValue> {
        let mut snapshot = Map::new();

        if clear_store {
            let entries = storage.take_ping_lifetime_storage(store_name);
            for (identifier, metric) in entries.iter() {
                snapshot_metric_into(&mut snapshot, identifier, metric);
            }
        } else {
            storage.iter_store_from(Lifetime::Ping, store_name, None, |identifier, metric| {
                snapshot_metric_into(&mut snapshot, identifier, metric);
            });
        }

        for lifetime in [Lifetime::Application, Lifetime::User].iter() {
            storage.iter_store_from(*lifetime, store_name, None, |identifier, metric| {
                snapshot_metric_into(&mut snapshot, identifier, metric);
            });
        }

        if snapshot.is_empty() {
            None
        } else {
            Some(JsonValue::Object(snapshot))
        }
    }

    /// Gets the current value of a single metric identified by name.
    ///
    /// # Arguments
    ///
    /// * `storage` - The database to get data from.
    /// * `store_name` - The store name to look into.
    /// * `metric_id` - The full metric identifier.
    ///
    /// # Returns
    ///
    /// The decoded metric or `None` if no data is found.
    pub fn snapshot_metric(
        &self,
        storage: &Database,
        store_name: &str,
        metric_id: &str,
        metric_lifetime: Lifetime,
    ) -> Option<Metric> {
        storage.get_metric(metric_lifetime, store_name, metric_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    fn record(db: &Database, lifetime: Lifetime, id: &str, metric: Metric) {
        db.record_per_lifetime(lifetime, "store1", id, &metric).unwrap();
    }

    #[test]
    fn identifiers_split_into_category_name_and_label() {
        assert_eq!((Some("telemetry"), "flag", None), split_identifier("telemetry.flag"));
        assert_eq!(
            (Some("glean.error"), "invalid_label", Some("telemetry.labeled")),
            split_identifier("glean.error.invalid_label/telemetry.labeled")
        );
        assert_eq!((None, "dirtybit", None), split_identifier("dirtybit"));
        assert_eq!(
            (Some("cat"), "labeled", Some("__other__")),
            split_identifier("cat.labeled/__other__")
        );
    }

    #[test]
    fn snapshot_groups_by_category_then_name() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path(), false).unwrap();

        record(&db, Lifetime::Application, "telemetry.flag", Metric::Boolean(true));
        record(&db, Lifetime::Ping, "telemetry.count", Metric::Counter(2));
        record(&db, Lifetime::User, "other.name", Metric::String("x".into()));
        record(&db, Lifetime::Ping, "telemetry.labeled/a", Metric::Counter(1));
        record(&db, Lifetime::Ping, "telemetry.labeled/b", Metric::Counter(3));
        record(
            &db,
            Lifetime::Ping,
            "glean.error.invalid_label/telemetry.labeled",
            Metric::Counter(1),
        );

        let snapshot = StorageManager
            .snapshot_as_json(&db, "store1", false)
            .unwrap();
        assert_eq!(
            json!({
                "telemetry": {
                    "flag": true,
                    "count": 2,
                    "labeled": {"a": 1, "b": 3},
                },
                "other": {"name": "x"},
                "glean.error": {
                    "invalid_label": {"telemetry.labeled": 1},
                },
            }),
            snapshot
        );
    }

    #[test]
    fn clearing_only_drops_ping_lifetime_data() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path(), false).unwrap();

        record(&db, Lifetime::Application, "telemetry.flag", Metric::Boolean(true));
        record(&db, Lifetime::Ping, "telemetry.count", Metric::Counter(2));

        let first = StorageManager.snapshot_as_json(&db, "store1", true).unwrap();
        assert_eq!(json!({"telemetry": {"flag": true, "count": 2}}), first);

        let second = StorageManager.snapshot_as_json(&db, "store1", true).unwrap();
        assert_eq!(json!({"telemetry": {"flag": true}}), second);
    }

    #[test]
    fn empty_store_has_no_snapshot() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path(), false).unwrap();

        assert_eq!(None, StorageManager.snapshot_as_json(&db, "store1", true));
        assert_eq!(None, StorageManager.snapshot(&db, "store1", false));
    }

    #[test]
    fn serialized_snapshot_keys_are_sorted() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path(), false).unwrap();

        record(&db, Lifetime::Ping, "zeta.b", Metric::Counter(1));
        record(&db, Lifetime::User, "alpha.a", Metric::Counter(1));

        let snapshot = StorageManager.snapshot(&db, "store1", false).unwrap();
        let alpha = snapshot.find("alpha").unwrap();
        let zeta = snapshot.find("zeta").unwrap();
        assert!(alpha < zeta);
    }
}

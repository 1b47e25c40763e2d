// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifetime-scoped metric storage.
//!
//! User and Ping lifetime data lives in an [`rkv`] safe-mode environment under
//! `<data_path>/db`, one single store per lifetime. Keys are
//! `{storage_name}#{metric_identifier}`, values are `bincode`-encoded [`Metric`]s.
//! Application lifetime data only lives in memory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rkv::{StoreError, StoreOptions, Value};

use crate::error::Result;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::Metric;
use crate::CommonMetricData;
use crate::Glean;
use crate::Lifetime;

type Rkv = rkv::Rkv<rkv::backend::SafeModeEnvironment>;
type SingleStore = rkv::SingleStore<rkv::backend::SafeModeDatabase>;
type Writer<'t> = rkv::Writer<rkv::backend::SafeModeRwTransaction<'t>>;

/// storage name -> metric identifier -> value
type Store = BTreeMap<String, BTreeMap<String, Metric>>;

/// The file the safe-mode backend keeps all stores in.
const SAFE_MODE_FILE: &str = "data.safe.bin";

/// The category internal error counters live in.
///
/// Failing to persist one of those must not try to record yet another error.
const ERROR_CATEGORY: &str = "glean.error";

fn read(lock: &RwLock<Store>) -> RwLockReadGuard<'_, Store> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(lock: &RwLock<Store>) -> RwLockWriteGuard<'_, Store> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn storage_prefix(storage_name: &str) -> String {
    format!("{}#", storage_name)
}

fn storage_key(storage_name: &str, metric_identifier: &str) -> String {
    format!("{}#{}", storage_name, metric_identifier)
}

fn decode(value: Value) -> Option<Metric> {
    match value {
        Value::Blob(blob) => match bincode::deserialize(blob) {
            Ok(metric) => Some(metric),
            Err(e) => {
                log::warn!("Skipping undecodable stored metric: {}", e);
                None
            }
        },
        _ => None,
    }
}

/// Opens the environment, starting over if the file on disk is unreadable.
fn open_rkv(path: &Path) -> std::result::Result<Rkv, StoreError> {
    match Rkv::new::<rkv::backend::SafeMode>(path) {
        Err(StoreError::FileInvalid) | Err(StoreError::DatabaseCorrupted) => {
            let file = path.join(SAFE_MODE_FILE);
            log::error!(
                "Database file {} is corrupted, starting fresh",
                file.display()
            );
            fs::remove_file(&file).map_err(|_| StoreError::FileInvalid)?;
            Rkv::new::<rkv::backend::SafeMode>(path)
        }
        other => other,
    }
}

/// Where the data of a lifetime is read from and written to.
enum Backing<'a> {
    Memory(&'a RwLock<Store>),
    Disk(&'a SingleStore),
}

/// The metric store.
#[derive(Debug)]
pub struct Database {
    rkv: Rkv,

    /// Data with `User` lifetime.
    user_store: SingleStore,

    /// Data with `Ping` lifetime.
    ///
    /// Written through on every change, unless `delay_ping_lifetime_io` is set.
    ping_store: SingleStore,

    /// Data with `Application` lifetime. Never persisted.
    app_store: RwLock<Store>,

    /// Ping lifetime data while its IO is delayed.
    ///
    /// Loaded from `ping_store` on start, written back by
    /// [`Database::persist_ping_lifetime_data`].
    ping_lifetime_data: Option<RwLock<Store>>,

    /// The directory holding the environment.
    path: PathBuf,
}

impl Database {
    /// Initializes the data store.
    ///
    /// This opens the underlying environment and creates it if it doesn't exist.
    /// An environment that can't be decoded is removed and starts out empty.
    pub fn new(data_path: &Path, delay_ping_lifetime_io: bool) -> Result<Self> {
        let path = data_path.join("db");
        log::debug!("Database path: {:?}", path.display());
        fs::create_dir_all(&path)?;

        let rkv = open_rkv(&path)?;
        let user_store = rkv.open_single(Lifetime::User.as_str(), StoreOptions::create())?;
        let ping_store = rkv.open_single(Lifetime::Ping.as_str(), StoreOptions::create())?;

        let mut db = Self {
            rkv,
            user_store,
            ping_store,
            app_store: RwLock::new(Store::new()),
            ping_lifetime_data: None,
            path,
        };

        if delay_ping_lifetime_io {
            let loaded = db.load_ping_lifetime_data()?;
            db.ping_lifetime_data = Some(RwLock::new(loaded));
        }

        Ok(db)
    }

    fn load_ping_lifetime_data(&self) -> Result<Store> {
        let mut data = Store::new();
        let reader = self.rkv.read()?;
        for entry in self.ping_store.iter_start(&reader)? {
            let (key, value) = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable Ping lifetime entry: {}", e);
                    continue;
                }
            };
            let key = match str::from_utf8(key) {
                Ok(key) => key,
                Err(_) => continue,
            };
            let (storage_name, metric_id) = match key.find('#') {
                Some(split) => (&key[..split], &key[split + 1..]),
                None => continue,
            };
            if let Some(metric) = decode(value) {
                data.entry(storage_name.to_string())
                    .or_default()
                    .insert(metric_id.to_string(), metric);
            }
        }
        Ok(data)
    }

    fn backing(&self, lifetime: Lifetime) -> Backing<'_> {
        match lifetime {
            Lifetime::User => Backing::Disk(&self.user_store),
            Lifetime::Ping => match &self.ping_lifetime_data {
                Some(data) => Backing::Memory(data),
                None => Backing::Disk(&self.ping_store),
            },
            Lifetime::Application => Backing::Memory(&self.app_store),
        }
    }

    /// The store persisted data of `lifetime` lives in, if any.
    fn disk_store(&self, lifetime: Lifetime) -> Option<&SingleStore> {
        match lifetime {
            Lifetime::User => Some(&self.user_store),
            Lifetime::Ping => Some(&self.ping_store),
            Lifetime::Application => None,
        }
    }

    /// Iterates with the provided transaction function
    /// over the requested data from the given storage.
    ///
    /// Entries that can't be read or decoded are skipped.
    /// `metric_key` narrows the iteration to identifiers starting with it,
    /// e.g. `{category}.{name}/` visits all labels of a labeled metric.
    /// The callback receives `(metric_id, metric)`.
    pub fn iter_store_from<F>(
        &self,
        lifetime: Lifetime,
        storage_name: &str,
        metric_key: Option<&str>,
        mut transaction_fn: F,
    ) where
        F: FnMut(&str, &Metric),
    {
        let prefix = metric_key.unwrap_or("");
        match self.backing(lifetime) {
            Backing::Memory(lock) => {
                let data = read(lock);
                let entries = match data.get(storage_name) {
                    Some(entries) => entries,
                    None => return,
                };
                for (id, metric) in entries.range(prefix.to_string()..) {
                    if !id.starts_with(prefix) {
                        break;
                    }
                    transaction_fn(id, metric);
                }
            }
            Backing::Disk(store) => {
                let skip = storage_prefix(storage_name).len();
                let iter_start = storage_key(storage_name, prefix);
                if let Err(e) = self.iter_disk(store, &iter_start, |key, metric| {
                    if let Ok(id) = str::from_utf8(&key[skip..]) {
                        transaction_fn(id, &metric);
                    }
                }) {
                    log::warn!("Could not iterate over '{}': {}", storage_name, e);
                }
            }
        }
    }

    fn iter_disk<F>(&self, store: &SingleStore, iter_start: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], Metric),
    {
        let reader = self.rkv.read()?;
        for entry in store.iter_from(&reader, iter_start)? {
            let (key, value) = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !key.starts_with(iter_start.as_bytes()) {
                break;
            }
            if let Some(metric) = decode(value) {
                f(key, metric);
            }
        }
        Ok(())
    }

    /// Determines if the storage has the given metric.
    ///
    /// If data for this metric identifier is found, `true` is returned.
    pub fn has_metric(&self, lifetime: Lifetime, storage_name: &str, metric_identifier: &str) -> bool {
        self.get_metric(lifetime, storage_name, metric_identifier)
            .is_some()
    }

    /// Gets a copy of a single stored value.
    pub fn get_metric(
        &self,
        lifetime: Lifetime,
        storage_name: &str,
        metric_identifier: &str,
    ) -> Option<Metric> {
        match self.backing(lifetime) {
            Backing::Memory(lock) => read(lock)
                .get(storage_name)
                .and_then(|entries| entries.get(metric_identifier))
                .cloned(),
            Backing::Disk(store) => {
                let reader = self.rkv.read().ok()?;
                let key = storage_key(storage_name, metric_identifier);
                let metric = match store.get(&reader, &key) {
                    Ok(value) => value.and_then(decode),
                    Err(e) => {
                        log::warn!("Could not read '{}': {}", key, e);
                        None
                    }
                };
                metric
            }
        }
    }

    /// Records a metric in the underlying storage system.
    ///
    /// The value is written into every store the metric is sent in,
    /// within one transaction.
    /// Nothing is recorded while upload is disabled.
    pub fn record(&self, glean: &Glean, data: &CommonMetricData, value: &Metric) {
        // If upload is disabled we don't want to record.
        if !glean.is_upload_enabled() {
            return;
        }

        let name = data.recording_identifier(glean);
        let result = self.write_with(data.lifetime, data.storage_names(), &name, |_| {
            value.clone()
        });
        self.report_write_result(glean, data, result);
    }

    /// Records a metric in the underlying storage system,
    /// for a single lifetime and storage.
    ///
    /// Returns an error if the value could not be persisted.
    pub fn record_per_lifetime(
        &self,
        lifetime: Lifetime,
        storage_name: &str,
        key: &str,
        metric: &Metric,
    ) -> Result<()> {
        self.write_with(lifetime, &[storage_name.to_string()], key, |_| metric.clone())
    }

    /// Records the provided value, with the given lifetime,
    /// after applying a transformation function.
    ///
    /// The transformation receives the currently stored value (if any)
    /// and returns the value to store. It is applied once per store.
    pub fn record_with<F>(&self, glean: &Glean, data: &CommonMetricData, transform: F)
    where
        F: FnMut(Option<Metric>) -> Metric,
    {
        // If upload is disabled we don't want to record.
        if !glean.is_upload_enabled() {
            return;
        }

        let name = data.recording_identifier(glean);
        let result = self.write_with(data.lifetime, data.storage_names(), &name, transform);
        self.report_write_result(glean, data, result);
    }

    fn write_with<F>(
        &self,
        lifetime: Lifetime,
        storage_names: &[String],
        key: &str,
        mut transform: F,
    ) -> Result<()>
    where
        F: FnMut(Option<Metric>) -> Metric,
    {
        match self.backing(lifetime) {
            Backing::Memory(lock) => {
                let mut data = write(lock);
                for storage_name in storage_names {
                    let entries = data.entry(storage_name.clone()).or_default();
                    let old_value = entries.remove(key);
                    entries.insert(key.to_string(), transform(old_value));
                }
                Ok(())
            }
            Backing::Disk(store) => {
                let mut writer = self.rkv.write()?;
                for storage_name in storage_names {
                    let full_key = storage_key(storage_name, key);
                    let old_value = store.get(&writer, &full_key)?.and_then(decode);
                    let encoded = bincode::serialize(&transform(old_value))?;
                    store.put(&mut writer, &full_key, &Value::Blob(&encoded))?;
                }
                writer.commit()?;
                Ok(())
            }
        }
    }

    fn report_write_result(&self, glean: &Glean, data: &CommonMetricData, result: Result<()>) {
        if let Err(e) = result {
            log::error!("Failed to persist '{}': {}", data.base_identifier(), e);
            if data.category != ERROR_CATEGORY {
                record_error(
                    glean,
                    data,
                    ErrorType::IoError,
                    format!("Failed to persist value: {}", e),
                    None,
                );
            }
        }
    }

    /// Removes every key starting with `prefix` from `store` and returns the
    /// decoded values, keyed by what follows the prefix.
    fn drain_disk_prefix(
        writer: &mut Writer<'_>,
        store: &SingleStore,
        prefix: &str,
    ) -> Result<BTreeMap<String, Metric>> {
        let mut keys = Vec::new();
        let mut drained = BTreeMap::new();
        for entry in store.iter_from(&*writer, prefix)? {
            let (key, value) = entry?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            if let (Ok(id), Some(metric)) = (str::from_utf8(&key[prefix.len()..]), decode(value)) {
                drained.insert(id.to_string(), metric);
            }
            keys.push(key.to_vec());
        }

        for key in keys {
            store.delete(writer, &key)?;
        }
        Ok(drained)
    }

    /// Takes all Ping lifetime data of a storage out of the store.
    ///
    /// Reading and clearing happen in one transaction, so no concurrent
    /// write can slip in between.
    fn drain_ping_lifetime_storage(&self, storage_name: &str) -> Result<BTreeMap<String, Metric>> {
        // Anything flushed earlier goes too, even while IO is delayed.
        let mut writer = self.rkv.write()?;
        let mut entries =
            Self::drain_disk_prefix(&mut writer, &self.ping_store, &storage_prefix(storage_name))?;
        writer.commit()?;

        if let Some(data) = &self.ping_lifetime_data {
            entries = write(data).remove(storage_name).unwrap_or_default();
        }
        Ok(entries)
    }

    /// Clears a storage (only Ping Lifetime).
    ///
    /// Returns an error if the persisted entries could not be removed.
    pub fn clear_ping_lifetime_storage(&self, storage_name: &str) -> Result<()> {
        self.drain_ping_lifetime_storage(storage_name).map(|_| ())
    }

    /// Takes all Ping lifetime data of a storage out of the store.
    ///
    /// A failure to clear the persisted entries is logged; whatever could be
    /// read is still returned.
    pub(crate) fn take_ping_lifetime_storage(&self, storage_name: &str) -> BTreeMap<String, Metric> {
        match self.drain_ping_lifetime_storage(storage_name) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Could not clear storage '{}': {}", storage_name, e);
                let mut entries = BTreeMap::new();
                self.iter_store_from(Lifetime::Ping, storage_name, None, |id, metric| {
                    entries.insert(id.to_string(), metric.clone());
                });
                entries
            }
        }
    }

    /// Removes a single metric from the storage.
    ///
    /// A metric that isn't stored is not an error.
    pub fn remove_single_metric(
        &self,
        lifetime: Lifetime,
        storage_name: &str,
        metric_id: &str,
    ) -> Result<()> {
        if let Backing::Memory(lock) = self.backing(lifetime) {
            if let Some(entries) = write(lock).get_mut(storage_name) {
                entries.remove(metric_id);
            }
        }

        if let Some(store) = self.disk_store(lifetime) {
            let mut writer = self.rkv.write()?;
            match store.delete(&mut writer, storage_key(storage_name, metric_id)) {
                Ok(()) | Err(StoreError::KeyValuePairNotFound) => {}
                Err(e) => return Err(e.into()),
            }
            writer.commit()?;
        }
        Ok(())
    }

    /// Clears all the metrics in the database, for the provided lifetime.
    ///
    /// Errors are logged.
    pub fn clear_lifetime(&self, lifetime: Lifetime) {
        if let Backing::Memory(lock) = self.backing(lifetime) {
            write(lock).clear();
        }

        if let Some(store) = self.disk_store(lifetime) {
            let result = self.rkv.write().and_then(|mut writer| {
                store.clear(&mut writer)?;
                writer.commit()
            });
            if let Err(e) = result {
                log::warn!(
                    "Could not clear store for lifetime {:?}: {:?}",
                    lifetime,
                    e
                );
            }
        }
    }

    /// Clears all metrics in the database.
    ///
    /// Errors are logged.
    pub fn clear_all(&self) {
        for lifetime in [Lifetime::User, Lifetime::Ping, Lifetime::Application].iter() {
            self.clear_lifetime(*lifetime);
        }
    }

    /// Persists ping_lifetime_data to disk.
    ///
    /// Does nothing unless Ping lifetime IO is delayed.
    pub fn persist_ping_lifetime_data(&self) -> Result<()> {
        let data = match &self.ping_lifetime_data {
            Some(data) => read(data),
            None => return Ok(()),
        };

        let mut writer = self.rkv.write()?;
        self.ping_store.clear(&mut writer)?;
        for (storage_name, entries) in data.iter() {
            for (id, metric) in entries {
                let encoded = bincode::serialize(metric)?;
                self.ping_store.put(
                    &mut writer,
                    storage_key(storage_name, id),
                    &Value::Blob(&encoded),
                )?;
            }
        }
        writer.commit()?;
        Ok(())
    }

    /// The size of the persisted environment, in bytes.
    ///
    /// `None` until something was written.
    pub fn file_size(&self) -> Option<u64> {
        fs::metadata(self.path.join(SAFE_MODE_FILE))
            .ok()
            .map(|meta| meta.len())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};

use crate::configuration::{ClientInfoMetrics, Configuration};
use crate::database::Database;
use crate::error::{ErrorKind, Result};
use crate::internal_metrics::{AdditionalMetrics, CoreMetrics};
use crate::internal_pings::InternalPings;
use crate::metrics::{self, Metric, MetricType, PingType};
use crate::ping::PingMaker;
use crate::storage::StorageManager;
use crate::upload::{PingUploadManager, PingUploadTask, UploadResult, UploadTaskAction};
use crate::util::{local_now_with_offset, sanitize_application_id, validate_tag};
use crate::{
    CommonMetricData, Lifetime, CLIENT_INFO_STORAGE, GLEAN_SCHEMA_VERSION, INTERNAL_STORAGE,
    KNOWN_CLIENT_ID,
};

/// The maximum number of source tags a ping may carry.
const MAX_SOURCE_TAGS: usize = 5;

/// Checks a list of source tags: between one and five valid tags.
pub(crate) fn validate_source_tags(tags: &[String]) -> bool {
    if tags.is_empty() || tags.len() > MAX_SOURCE_TAGS {
        log::error!(
            "A list of at least one and at most {} source tags is required, got {}",
            MAX_SOURCE_TAGS,
            tags.len()
        );
        return false;
    }

    tags.iter().all(|tag| validate_tag(tag))
}

/// Debug settings attached to every ping submitted while they are set.
#[derive(Debug, Default)]
struct DebugOptions {
    /// Log every ping payload handed out for upload.
    log_pings: bool,
    /// Sent as `X-Debug-ID`, routes pings to the debug viewer.
    debug_view_tag: Option<String>,
    /// Sent as `X-Source-Tags`.
    source_tags: Option<Vec<String>>,
}

/// The object holding meta information about a Glean instance.
///
/// ## Example
///
/// Create a new Glean instance, register a ping, record a simple counter and then send the final
/// ping.
///
/// ```rust,no_run
/// # use glean_engine::{ClientInfoMetrics, Glean, Configuration, CommonMetricData, metrics::*};
/// let cfg = Configuration::builder(true, "/tmp/data", "org.mozilla.engine.sample").build();
/// let mut glean = Glean::new(&cfg, &ClientInfoMetrics::unknown()).unwrap();
/// let ping = PingType::new("sample", true, false, vec![]);
/// glean.register_ping_type(&ping);
///
/// let call_counter: CounterMetric = CounterMetric::new(CommonMetricData {
///     name: "calls".into(),
///     category: "local".into(),
///     send_in_pings: vec!["sample".into()],
///     ..Default::default()
/// });
///
/// call_counter.add_sync(&glean, 1);
///
/// glean.submit_ping(&ping, None);
/// ```
///
/// ## Note
///
/// Outside of tests this is owned by a [`Context`](crate::Context),
/// which runs every operation on its dispatcher thread.
#[derive(Debug)]
pub struct Glean {
    upload_enabled: bool,
    data_store: Database,
    core_metrics: CoreMetrics,
    pub(crate) additional_metrics: AdditionalMetrics,
    pub(crate) internal_pings: InternalPings,
    pub(crate) upload_manager: PingUploadManager,
    data_path: PathBuf,
    application_id: String,
    client_info: ClientInfoMetrics,
    ping_registry: HashMap<String, PingType>,
    start_time: DateTime<FixedOffset>,
    is_first_run: bool,
    debug: DebugOptions,
}

impl Glean {
    /// Creates and initializes a new Glean object.
    ///
    /// This will create the necessary directories and files in
    /// [`cfg.data_path`](Configuration::data_path). This will also initialize
    /// the core metrics.
    pub fn new(cfg: &Configuration, client_info: &ClientInfoMetrics) -> Result<Self> {
        log::info!("Creating new Glean v{}", crate::GLEAN_VERSION);

        if let Some(level) = cfg.log_level {
            log::set_max_level(level);
        }

        let application_id = sanitize_application_id(&cfg.application_id);
        if application_id.is_empty() {
            return Err(ErrorKind::InvalidConfig("application_id must not be empty".into()).into());
        }

        // Creating the data store creates the necessary path as well.
        // If that fails we bail out and don't initialize further.
        let data_store = Database::new(&cfg.data_path, cfg.delay_ping_lifetime_io)?;

        let mut upload_manager =
            PingUploadManager::new(&cfg.data_path, &cfg.language_binding_name);
        if let Some(rate_limit) = &cfg.rate_limit {
            upload_manager.set_rate_limiter(
                rate_limit.seconds_per_interval,
                rate_limit.pings_per_interval,
            );
        }

        let mut glean = Self {
            upload_enabled: cfg.upload_enabled,
            data_store,
            core_metrics: CoreMetrics::new(),
            additional_metrics: AdditionalMetrics::new(),
            internal_pings: InternalPings::new(),
            upload_manager,
            data_path: cfg.data_path.clone(),
            application_id,
            client_info: client_info.clone(),
            ping_registry: HashMap::new(),
            start_time: local_now_with_offset(),
            is_first_run: false,
            debug: DebugOptions::default(),
        };

        let deletion_request = glean.internal_pings.deletion_request.clone();
        glean.register_ping_type(&deletion_request);

        if cfg.upload_enabled {
            glean.on_upload_enabled();
        } else {
            match glean
                .core_metrics
                .client_id
                .get_value(&glean, CLIENT_INFO_STORAGE)
            {
                // Nothing was ever recorded, start out clean.
                None => glean.clear_metrics(),
                // Already opted out on a previous run.
                Some(uuid) if uuid == KNOWN_CLIENT_ID => {}
                // Upload was disabled while the engine wasn't running:
                // there's data to delete, so tell the server.
                Some(_) => {
                    glean.upload_enabled = true;
                    glean.on_upload_disabled(true);
                }
            }
        }

        if let Some(size) = glean.data_store.file_size() {
            glean
                .additional_metrics
                .database_size
                .accumulate_sync(&glean, size as i64);
        }

        // Scan for leftovers last, so that pings deleted above aren't picked up.
        glean.upload_manager.scan_pending_pings_directories(false);

        Ok(glean)
    }

    /// Initializes the core metrics managed by the engine itself.
    fn initialize_core_metrics(&mut self) {
        let need_new_client_id = match self
            .core_metrics
            .client_id
            .get_value(self, CLIENT_INFO_STORAGE)
        {
            None => true,
            Some(uuid) => uuid == KNOWN_CLIENT_ID,
        };
        if need_new_client_id {
            self.core_metrics.client_id.generate_and_set_sync(self);
        }

        if self
            .core_metrics
            .first_run_date
            .get_value(self, CLIENT_INFO_STORAGE)
            .is_none()
        {
            self.core_metrics
                .first_run_date
                .set_sync(self, local_now_with_offset());
            // The `first_run_date` field is generated on the very first run
            // and persisted across upload toggling. We can assume that, the only
            // time it is set, that's indeed our "first run".
            self.is_first_run = true;
        }

        self.core_metrics
            .os
            .set_sync(self, std::env::consts::OS);
        self.core_metrics
            .architecture
            .set_sync(self, std::env::consts::ARCH);
        self.core_metrics
            .app_build
            .set_sync(self, self.client_info.app_build.as_str());
        self.core_metrics
            .app_display_version
            .set_sync(self, self.client_info.app_display_version.as_str());
        if let Some(channel) = &self.client_info.channel {
            self.core_metrics.app_channel.set_sync(self, channel.as_str());
        }
    }

    /// Sets whether upload is enabled or not.
    ///
    /// When uploading is disabled, metrics aren't recorded at all and no
    /// data is uploaded.
    ///
    /// When disabling, all pending metrics and queued pings are cleared
    /// and a `deletion-request` ping is submitted.
    ///
    /// When enabling, the core metrics are recreated.
    ///
    /// If the value of this flag is not actually changed, this is a no-op.
    ///
    /// # Arguments
    ///
    /// * `flag` - When true, enable metric collection.
    ///
    /// # Returns
    ///
    /// Whether the flag was different from the current value,
    /// and actual work was done to clear or reinstate metrics.
    pub fn set_upload_enabled(&mut self, flag: bool) -> bool {
        log::info!("Upload enabled: {:?}", flag);

        if self.upload_enabled == flag {
            return false;
        }

        if flag {
            self.on_upload_enabled();
        } else {
            self.on_upload_disabled(false);
        }
        true
    }

    /// Determines whether upload is enabled.
    ///
    /// When upload is disabled, no data will be recorded.
    pub fn is_upload_enabled(&self) -> bool {
        self.upload_enabled
    }

    /// Handles the changing of state from upload disabled to enabled.
    ///
    /// Should only be called when the state actually changes.
    fn on_upload_enabled(&mut self) {
        self.upload_enabled = true;
        self.initialize_core_metrics();
    }

    /// Handles the changing of state from upload enabled to disabled.
    ///
    /// Should only be called when the state actually changes.
    ///
    /// A deletion_request ping is sent, all pending metrics and queued pings
    /// are cleared.
    ///
    /// # Arguments
    ///
    /// * `during_init` - Whether the change happens while initializing.
    fn on_upload_disabled(&mut self, during_init: bool) {
        // The upload_enabled flag is still true at this point,
        // so the deletion-request ping can be assembled.
        let reason = if during_init {
            Some("at_init")
        } else {
            Some("set_upload_enabled")
        };
        if !self
            .internal_pings
            .deletion_request
            .submit_sync(self, reason)
        {
            log::error!("Failed to submit deletion-request ping on optout.");
        }
        self.upload_enabled = false;
        self.clear_metrics();
    }

    /// Clears any pending metrics when telemetry is disabled.
    fn clear_metrics(&mut self) {
        // Clear the pending pings queue and acquire the lock
        // so that it can't be accessed until this function is done.
        let _lock = self.upload_manager.clear_ping_queue();

        // There is only one metric that we want to survive after clearing all
        // metrics: first_run_date. Here, we store its value so we can restore
        // it after clearing the metrics.
        let existing_first_run_date = self
            .core_metrics
            .first_run_date
            .get_value(self, CLIENT_INFO_STORAGE);

        // Clear any pending pings.
        let ping_maker = PingMaker::new();
        if let Err(err) = ping_maker.clear_pending_pings(self.get_data_path()) {
            log::warn!("Error clearing pending pings: {}", err);
        }

        // Delete all stored metrics.
        // Note that this also includes the ping sequence numbers, so it has
        // the effect of resetting those to their initial values.
        self.data_store.clear_all();

        {
            // We need to briefly set upload_enabled to true here so that `set`
            // is not a no-op. This is safe, since nothing else can run
            // concurrently to this since we hold a mutable reference to the
            // Glean object. Additionally, the pending pings have been cleared
            // from disk, so the uploader can't wake up and start sending
            // pings.
            self.upload_enabled = true;

            // Store a "dummy" KNOWN_CLIENT_ID in the client_id metric. This will
            // make it easier to detect if pings were unintentionally sent after
            // uploading is disabled.
            self.core_metrics
                .client_id
                .set_from_uuid_sync(self, KNOWN_CLIENT_ID);

            // Restore the first_run_date.
            if let Some(existing_first_run_date) = existing_first_run_date {
                self.core_metrics
                    .first_run_date
                    .set_sync(self, existing_first_run_date);
            }

            self.upload_enabled = false;
        }
    }

    /// Gets the application ID as specified on instantiation.
    pub fn get_application_id(&self) -> &str {
        &self.application_id
    }

    /// Gets the data path of this instance.
    pub fn get_data_path(&self) -> &Path {
        &self.data_path
    }

    /// Gets a handle to the database.
    pub fn storage(&self) -> &Database {
        &self.data_store
    }

    /// Gets the next task for an uploader.
    ///
    /// This can be one of:
    ///
    /// * [`Wait`](PingUploadTask::Wait) - which means the requester should ask
    ///   again later;
    /// * [`Upload(PingRequest)`](PingUploadTask::Upload) - which means there is
    ///   a ping to upload. This wraps the actual request object;
    /// * [`Done`](PingUploadTask::Done) - which means requester should stop
    ///   asking for now.
    ///
    /// # Returns
    ///
    /// A [`PingUploadTask`] representing the next task.
    pub fn get_upload_task(&self) -> PingUploadTask {
        self.upload_manager.get_upload_task(self, self.log_pings())
    }

    /// Processes the response from an attempt to upload a ping.
    ///
    /// # Arguments
    ///
    /// * `uuid` - The UUID of the ping in question.
    /// * `status` - The upload result.
    pub fn process_ping_upload_response(
        &self,
        uuid: &str,
        status: UploadResult,
    ) -> UploadTaskAction {
        self.upload_manager
            .process_ping_upload_response(self, uuid, status)
    }

    /// Takes a snapshot for the given store and optionally clear it.
    ///
    /// # Arguments
    ///
    /// * `store_name` - The store to snapshot.
    /// * `clear_store` - Whether to clear the store after snapshotting.
    ///
    /// # Returns
    ///
    /// The snapshot in a string encoded as JSON. If the snapshot is empty, returns an empty string.
    pub fn snapshot(&self, store_name: &str, clear_store: bool) -> String {
        StorageManager
            .snapshot(self.storage(), store_name, clear_store)
            .unwrap_or_else(|| String::from(""))
    }

    pub(crate) fn make_path(&self, ping_name: &str, doc_id: &str) -> String {
        format!(
            "/submit/{}/{}/{}/{}",
            self.get_application_id(),
            ping_name,
            GLEAN_SCHEMA_VERSION,
            doc_id
        )
    }

    /// Collects and submits a ping for eventual uploading.
    ///
    /// The ping content is assembled as soon as possible, but upload is not
    /// guaranteed to happen immediately, as that depends on the upload policies.
    ///
    /// If the ping currently contains no content, it will not be sent,
    /// unless it is configured to be sent if empty.
    ///
    /// # Arguments
    ///
    /// * `ping` - The ping to submit
    /// * `reason` - A reason code to include in the ping
    ///
    /// # Returns
    ///
    /// Whether the ping was succesfully assembled and queued.
    pub fn submit_ping(&self, ping: &PingType, reason: Option<&str>) -> bool {
        ping.submit_sync(self, reason)
    }

    /// Collects and submits a ping by name for eventual uploading.
    ///
    /// # Arguments
    ///
    /// * `ping_name` - The name of the ping to submit
    /// * `reason` - A reason code to include in the ping
    ///
    /// # Returns
    ///
    /// Whether the ping was succesfully assembled and queued.
    /// Unknown pings are logged and never submitted.
    pub fn submit_ping_by_name(&self, ping_name: &str, reason: Option<&str>) -> bool {
        match self.get_ping_by_name(ping_name) {
            None => {
                log::error!("Attempted to submit unknown ping '{}'", ping_name);
                false
            }
            Some(ping) => ping.submit_sync(self, reason),
        }
    }

    /// Gets a [`PingType`] by name.
    ///
    /// # Returns
    ///
    /// The [`PingType`] of a ping if the given name was registered before, [`None`]
    /// otherwise.
    pub fn get_ping_by_name(&self, ping_name: &str) -> Option<&PingType> {
        self.ping_registry.get(ping_name)
    }

    /// Register a new [`PingType`](metrics/struct.PingType.html).
    pub fn register_ping_type(&mut self, ping: &PingType) {
        if self.ping_registry.contains_key(ping.name()) {
            log::debug!("Duplicate ping named '{}'", ping.name())
        }

        self.ping_registry
            .insert(ping.name().to_string(), ping.clone());
    }

    /// Gets the creation time of the Glean object.
    pub(crate) fn start_time(&self) -> DateTime<FixedOffset> {
        self.start_time
    }

    /// Persists [`Lifetime::Ping`] data that might be in memory in case
    /// [`delay_ping_lifetime_io`](Configuration::delay_ping_lifetime_io) is set
    /// or was set at a previous time.
    ///
    /// If there is no data to persist, this function does nothing.
    pub fn persist_ping_lifetime_data(&self) -> Result<()> {
        self.data_store.persist_ping_lifetime_data()
    }

    /// Returns whether or not this is the first run on this profile.
    pub fn is_first_run(&self) -> bool {
        self.is_first_run
    }

    /// Sets a debug view tag.
    ///
    /// This will return `false` in case `value` is not a valid tag.
    ///
    /// When the debug view tag is set, pings are sent with a `X-Debug-ID` header with the value of the tag
    /// and are sent to the ["Ping Debug Viewer"](https://mozilla.github.io/glean/book/dev/core/internal/debug-pings.html).
    ///
    /// # Arguments
    ///
    /// * `value` - A valid HTTP header value. Must match the regex: "[a-zA-Z0-9-]{1,20}".
    pub fn set_debug_view_tag(&mut self, value: &str) -> bool {
        if !validate_tag(value) {
            return false;
        }
        self.debug.debug_view_tag = Some(value.to_string());
        true
    }

    /// Return the value for the debug view tag or [`None`] if it hasn't been set.
    pub(crate) fn debug_view_tag(&self) -> Option<&String> {
        self.debug.debug_view_tag.as_ref()
    }

    /// Sets source tags.
    ///
    /// This will return `false` in case `value` contains invalid tags
    /// or more than five of them.
    ///
    /// Ping tags will show in the destination datasets, after ingestion.
    ///
    /// # Arguments
    ///
    /// * `value` - A vector of at most 5 valid HTTP header values. Individual tags must match the regex: "[a-zA-Z0-9-]{1,20}".
    pub fn set_source_tags(&mut self, value: Vec<String>) -> bool {
        if !validate_source_tags(&value) {
            return false;
        }

        self.debug.source_tags = Some(value);
        true
    }

    /// Return the value for the source tags or [`None`] if it hasn't been set.
    pub(crate) fn source_tags(&self) -> Option<&Vec<String>> {
        self.debug.source_tags.as_ref()
    }

    /// Sets the log pings debug option.
    ///
    /// When the log pings debug option is `true`,
    /// we log the payload of all succesfully assembled pings.
    pub fn set_log_pings(&mut self, value: bool) {
        self.debug.log_pings = value;
    }

    /// Return the value for the log pings debug option.
    pub fn log_pings(&self) -> bool {
        self.debug.log_pings
    }

    fn get_dirty_bit_metric(&self) -> metrics::BooleanMetric {
        metrics::BooleanMetric::new(CommonMetricData {
            name: "dirtybit".into(),
            // We don't need a category, the name is already unique
            category: "".into(),
            send_in_pings: vec![INTERNAL_STORAGE.into()],
            lifetime: Lifetime::User,
            ..Default::default()
        })
    }

    /// **This is not meant to be used directly.**
    ///
    /// Sets the value of a "dirty flag" in the permanent storage.
    ///
    /// The "dirty flag" is set to `true` on initialization and to `false`
    /// on a clean shutdown.
    /// At startup, before setting its new value, if the "dirty flag" value is
    /// `true`, then the engine knows it did not exit cleanly.
    pub fn set_dirty_flag(&self, new_value: bool) {
        self.get_dirty_bit_metric().set_sync(self, new_value);
    }

    /// **This is not meant to be used directly.**
    ///
    /// Checks the stored value of the "dirty flag".
    pub fn is_dirty_flag_set(&self) -> bool {
        let dirty_bit_metric = self.get_dirty_bit_metric();
        match StorageManager.snapshot_metric(
            self.storage(),
            INTERNAL_STORAGE,
            &dirty_bit_metric.meta().identifier(self),
            dirty_bit_metric.meta().lifetime,
        ) {
            Some(Metric::Boolean(b)) => b,
            _ => false,
        }
    }

    /// Waits for the startup scan of the pending pings directories to finish.
    #[doc(hidden)]
    pub fn test_block_on_ping_scan(&self) {
        self.upload_manager.block_on_scan();
    }

    /// **Test-only API (exported for FFI purposes).**
    ///
    /// Deletes all stored metrics and queued pings.
    ///
    /// Note that this also includes the ping sequence numbers, so it has
    /// the effect of resetting those to their initial values.
    pub fn test_clear_all_stores(&self) {
        self.data_store.clear_all();

        drop(self.upload_manager.clear_ping_queue());
        // We don't care about this failing, maybe the data does just not exist.
        let _ = PingMaker::new().clear_pending_pings(self.get_data_path());
    }
}

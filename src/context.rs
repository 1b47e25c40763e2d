// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::convert::TryFrom;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::configuration::{ClientInfoMetrics, Configuration};
use crate::core::validate_source_tags;
use crate::dispatcher::{Dispatcher, GLOBAL_DISPATCHER_LIMIT};
use crate::error::{ErrorKind, Result};
use crate::metrics::PingType;
use crate::net::UploadWorker;
use crate::util::validate_tag;
use crate::Glean;

/// An engine instance together with the queue that owns it.
///
/// Everything that changes state is launched on a single dispatcher thread,
/// in call order. Calls made before [`initialize`](Context::initialize) are
/// buffered (up to a limit) and replayed once the instance exists.
///
/// There is no global instance: whoever creates the context owns it, and a
/// test reset is an explicit [`test_reset_glean`](Context::test_reset_glean).
#[derive(Debug)]
pub struct Context {
    glean: Arc<Mutex<Option<Glean>>>,
    dispatcher: Dispatcher,
    preinit_limit: usize,
    upload_worker: Option<UploadWorker>,
    initialized: bool,
}

fn lock(glean: &Mutex<Option<Glean>>) -> MutexGuard<'_, Option<Glean>> {
    glean.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates an uninitialized context with the default pre-init buffer size.
    pub fn new() -> Self {
        Self::with_preinit_limit(GLOBAL_DISPATCHER_LIMIT)
    }

    /// Creates an uninitialized context buffering at most `limit` calls
    /// before initialization.
    pub fn with_preinit_limit(limit: usize) -> Self {
        Self {
            glean: Arc::new(Mutex::new(None)),
            dispatcher: Dispatcher::new(limit),
            preinit_limit: limit,
            upload_worker: None,
            initialized: false,
        }
    }

    /// Creates the engine instance and replays everything recorded so far.
    ///
    /// If the configuration carries an uploader, the upload thread is
    /// started and pending pings from earlier runs are uploaded.
    ///
    /// # Errors
    ///
    /// Fails if this context is already initialized or the instance can't be
    /// created, e.g. because the data path is unusable.
    pub fn initialize(
        &mut self,
        mut cfg: Configuration,
        client_info: ClientInfoMetrics,
    ) -> Result<()> {
        if self.initialized {
            log::error!("Glean should not be initialized multiple times");
            return Err(ErrorKind::AlreadyInitialized.into());
        }

        let uploader = cfg.uploader.take();
        let glean = Glean::new(&cfg, &client_info)?;

        if glean.is_dirty_flag_set() {
            log::info!("The previous session did not shut down cleanly");
        }
        glean.set_dirty_flag(true);

        // The lock must be released before flushing: buffered tasks need it.
        *lock(&self.glean) = Some(glean);

        if let Some(uploader) = uploader {
            self.upload_worker = Some(UploadWorker::start(
                Arc::clone(&self.glean),
                uploader,
                cfg.endpoint(),
                cfg.upload_timeout,
            ));
        }

        match self.dispatcher.flush_init() {
            Ok(0) => {}
            Ok(overflow) => {
                log::warn!("{} tasks were dropped before initialization", overflow);
                let overflow = i32::try_from(overflow).unwrap_or(i32::MAX);
                self.launch_with_glean(move |glean| {
                    glean
                        .additional_metrics
                        .preinit_tasks_overflow
                        .add_sync(glean, overflow)
                });
            }
            Err(e) => log::error!("Unable to flush the pre-init queue: {}", e),
        }

        self.initialized = true;
        self.trigger_upload();
        Ok(())
    }

    /// Whether [`initialize`](Context::initialize) completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Shuts down cleanly.
    ///
    /// Waits for all queued work, marks the session as cleanly finished,
    /// persists delayed ping-lifetime data and stops the worker threads.
    pub fn shutdown(&mut self) {
        if !self.initialized {
            log::info!("Shutdown called before initialization, nothing to do");
            return;
        }

        self.launch_with_glean(|glean| {
            glean.set_dirty_flag(false);
            if let Err(e) = glean.persist_ping_lifetime_data() {
                log::error!("Can't persist ping lifetime data: {}", e);
            }
        });

        if let Err(e) = self.dispatcher.shutdown() {
            log::error!("Can't shut down the dispatcher: {}", e);
        }
        if let Some(mut worker) = self.upload_worker.take() {
            worker.shutdown();
        }
        self.initialized = false;
    }

    /// Enables or disables upload.
    ///
    /// Disabling cancels a running upload attempt, deletes pending pings and
    /// stored metrics, and submits a `deletion-request` ping.
    pub fn set_upload_enabled(&self, enabled: bool) {
        let cancellation = match &self.upload_worker {
            Some(worker) if !enabled => {
                worker.cancel();
                Some(worker.cancel_handle())
            }
            _ => None,
        };

        self.launch_with_glean_mut(move |glean| {
            glean.set_upload_enabled(enabled);
            // Also stops a retry that started before the queue was cleared.
            if let Some(cancellation) = cancellation {
                cancellation.cancel();
            }
        });
        self.trigger_upload();
    }

    /// Whether upload is currently enabled.
    ///
    /// Waits for all queued work. `false` before initialization.
    pub fn is_upload_enabled(&self) -> bool {
        self.block_on_dispatcher();
        self.with_glean(|glean| glean.is_upload_enabled())
            .unwrap_or(false)
    }

    /// Makes a ping known by name.
    pub fn register_ping_type(&self, ping: &PingType) {
        let ping = ping.clone();
        self.launch_with_glean_mut(move |glean| glean.register_ping_type(&ping));
    }

    /// Collects and submits a ping, then wakes the uploader.
    pub fn submit_ping(&self, ping: &PingType, reason: Option<&str>) {
        let ping = ping.clone();
        let reason = reason.map(str::to_string);
        self.launch_with_glean(move |glean| {
            ping.submit_sync(glean, reason.as_deref());
        });
        self.trigger_upload();
    }

    /// Collects and submits a registered ping by name, then wakes the uploader.
    pub fn submit_ping_by_name(&self, ping_name: &str, reason: Option<&str>) {
        let ping_name = ping_name.to_string();
        let reason = reason.map(str::to_string);
        self.launch_with_glean(move |glean| {
            glean.submit_ping_by_name(&ping_name, reason.as_deref());
        });
        self.trigger_upload();
    }

    /// Tags all future pings for the debug viewer.
    ///
    /// Returns `false`, changing nothing, if the tag is invalid.
    pub fn set_debug_view_tag(&self, tag: &str) -> bool {
        if !validate_tag(tag) {
            return false;
        }
        let tag = tag.to_string();
        self.launch_with_glean_mut(move |glean| {
            glean.set_debug_view_tag(&tag);
        });
        true
    }

    /// Adds source tags to all future pings.
    ///
    /// Returns `false`, changing nothing, if any tag is invalid or there are
    /// more than five.
    pub fn set_source_tags(&self, tags: Vec<String>) -> bool {
        if !validate_source_tags(&tags) {
            return false;
        }
        self.launch_with_glean_mut(move |glean| {
            glean.set_source_tags(tags);
        });
        true
    }

    /// Logs the payload of every ping handed out for upload.
    pub fn set_log_pings(&self, value: bool) {
        self.launch_with_glean_mut(move |glean| glean.set_log_pings(value));
    }

    /// Waits until every previously launched task ran.
    pub fn block_on_dispatcher(&self) {
        if let Err(e) = self.dispatcher.block_on_queue() {
            log::error!("Failed to wait for the dispatcher: {}", e);
        }
    }

    /// Runs `f` on the instance, right now, from the calling thread.
    ///
    /// Returns `None` before initialization.
    /// Does not wait for queued work; see
    /// [`block_on_dispatcher`](Context::block_on_dispatcher).
    pub fn with_glean<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&Glean) -> R,
    {
        lock(&self.glean).as_ref().map(f)
    }

    /// Runs `f` on the instance with mutable access, right now.
    pub fn with_glean_mut<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut Glean) -> R,
    {
        lock(&self.glean).as_mut().map(f)
    }

    /// Queues `f` to run on the instance.
    pub fn launch_with_glean<F>(&self, f: F)
    where
        F: FnOnce(&Glean) + Send + 'static,
    {
        let glean = Arc::clone(&self.glean);
        self.launch(move || {
            if let Some(glean) = lock(&glean).as_ref() {
                f(glean)
            }
        })
    }

    /// Queues `f` to run on the instance with mutable access.
    pub fn launch_with_glean_mut<F>(&self, f: F)
    where
        F: FnOnce(&mut Glean) + Send + 'static,
    {
        let glean = Arc::clone(&self.glean);
        self.launch(move || {
            if let Some(glean) = lock(&glean).as_mut() {
                f(glean)
            }
        })
    }

    fn launch(&self, task: impl FnOnce() + Send + 'static) {
        if let Err(e) = self.dispatcher.launch(task) {
            log::info!("Task not queued: {}", e);
        }
    }

    /// Wakes the upload thread once everything queued so far ran.
    fn trigger_upload(&self) {
        if let Some(worker) = &self.upload_worker {
            let trigger = worker.trigger_handle();
            // Queued behind the submission, so the ping is on disk by then.
            self.launch(move || trigger.fire());
        }
    }

    /// **Test-only API.**
    ///
    /// Shuts down the current instance, optionally wiping its data, and
    /// initializes a fresh one.
    pub fn test_reset_glean(
        &mut self,
        cfg: Configuration,
        client_info: ClientInfoMetrics,
        clear_stores: bool,
    ) {
        self.block_on_dispatcher();
        if clear_stores {
            self.with_glean(|glean| glean.test_clear_all_stores());
        }
        self.shutdown();
        *lock(&self.glean) = None;
        self.dispatcher = Dispatcher::new(self.preinit_limit);

        if let Err(e) = self.initialize(cfg, client_info) {
            log::error!("Failed to reinitialize: {}", e);
        }
    }

    /// **Test-only API.**
    ///
    /// Deletes all stored metrics and pending pings.
    pub fn test_clear_all_stores(&self) {
        self.block_on_dispatcher();
        self.with_glean(|glean| glean.test_clear_all_stores());
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}

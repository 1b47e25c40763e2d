// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handling the upload of pings.
//!
//! The engine never talks to the network itself. An embedder hands a
//! [`PingUploader`] to the configuration; a single `glean.upload` thread asks
//! the engine for upload tasks, runs them through the uploader one at a time
//! and reports every outcome back.
//!
//! The uploader is called on the upload thread itself, so a new attempt only
//! starts once the previous call returned. Every call gets an
//! [`UploadDeadline`] the transport must honor.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, select, unbounded, Receiver, Sender};
use url::Url;

use crate::upload::{PingRequest, PingUploadTask, UploadResult, UploadTaskAction};
use crate::Glean;

/// A description of a request to upload a ping, as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingUploadRequest {
    /// The full URL to POST to.
    pub url: String,
    /// The body, possibly gzip-encoded.
    pub body: Vec<u8>,
    /// Headers to send along.
    pub headers: Vec<(String, String)>,
    /// Whether the body has {client|ping}_info sections.
    pub body_has_info_sections: bool,
    /// The name of the ping.
    pub ping_name: String,
}

/// An upload request that is only handed out to uploaders with the right capabilities.
#[derive(Debug)]
pub struct CapablePingUploadRequest {
    request: PingUploadRequest,
    capabilities: Vec<String>,
}

impl CapablePingUploadRequest {
    /// Wraps a request together with the capabilities it requires.
    pub fn new(request: PingUploadRequest, capabilities: Vec<String>) -> Self {
        Self {
            request,
            capabilities,
        }
    }

    /// Hands out the request if `func` accepts the required capabilities.
    ///
    /// Requests requiring nothing are always handed out.
    pub fn capable<F>(self, func: F) -> Option<PingUploadRequest>
    where
        F: FnOnce(Vec<String>) -> bool,
    {
        if self.capabilities.is_empty() || func(self.capabilities) {
            Some(self.request)
        } else {
            None
        }
    }
}

/// Cookies shared with the transport.
///
/// Telemetry uploads must never carry cookies, so entries for the upload host
/// are removed before every attempt.
pub trait CookieStore: Debug + Send + Sync {
    /// Removes every cookie scoped to `host`.
    fn purge_host(&self, host: &str);
}

/// Wakes waiting uploads when the current attempt gets cancelled.
///
/// Every cancellation bumps the epoch; an attempt is cancelled once the epoch
/// moved past the one it started with, so cancelling while idle has no effect
/// on later attempts.
#[derive(Debug)]
pub(crate) struct Cancellation {
    epoch: AtomicU64,
    wake_sender: Sender<()>,
    wake: Receiver<()>,
}

impl Cancellation {
    fn new() -> Self {
        let (wake_sender, wake) = bounded(1);
        Self {
            epoch: AtomicU64::new(0),
            wake_sender,
            wake,
        }
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Aborts whatever runs right now.
    pub(crate) fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        // A full channel already holds a wake-up.
        let _ = self.wake_sender.try_send(());
    }

    /// Blocks until `until`, or until cancelled after `epoch`.
    ///
    /// Returns whether it was cancelled.
    fn wait(&self, epoch: u64, until: Instant) -> bool {
        loop {
            if self.epoch() != epoch {
                return true;
            }
            let now = Instant::now();
            if now >= until {
                return false;
            }
            select! {
                recv(self.wake) -> _ => {},
                recv(after(until - now)) -> _ => {},
            }
        }
    }
}

/// The time budget of a single upload attempt.
///
/// Transports check it between steps and give up with
/// [`UploadResult::recoverable_failure`] once [`should_abort`](UploadDeadline::should_abort)
/// turns true, be it because the attempt timed out or because upload was disabled.
#[derive(Debug)]
pub struct UploadDeadline {
    deadline: Instant,
    epoch: u64,
    cancellation: Arc<Cancellation>,
}

impl UploadDeadline {
    fn new(cancellation: &Arc<Cancellation>, timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            epoch: cancellation.epoch(),
            cancellation: Arc::clone(cancellation),
        }
    }

    /// Time left before the attempt counts as timed out.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Whether the engine cancelled this attempt.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.epoch() != self.epoch
    }

    /// Whether the transport should stop and report a recoverable failure.
    pub fn should_abort(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    /// Sleeps for `duration`, waking early on cancellation or at the deadline.
    ///
    /// Returns `true` if the whole duration passed and the attempt may go on.
    pub fn sleep(&self, duration: Duration) -> bool {
        let target = Instant::now() + duration;
        if self.cancellation.wait(self.epoch, target.min(self.deadline)) {
            return false;
        }
        target <= self.deadline
    }
}

/// A pluggable transport for pings.
pub trait PingUploader: Debug + Send + Sync {
    /// Uploads a ping and reports how it went.
    ///
    /// Runs on the upload thread, no other attempt starts before it returns.
    /// Must return a [`UploadResult::recoverable_failure`] once `deadline`
    /// says to abort.
    fn upload(&self, upload_request: PingUploadRequest, deadline: &UploadDeadline)
        -> UploadResult;

    /// The capabilities this uploader supports.
    fn capabilities(&self) -> &[String] {
        &[]
    }

    /// The cookie store shared with this transport, if any.
    fn cookie_store(&self) -> Option<&dyn CookieStore> {
        None
    }
}

/// Wakes the upload thread.
enum Trigger {
    Upload,
    Shutdown,
}

/// Asks the upload thread to upload whatever is pending.
#[derive(Clone, Debug)]
pub(crate) struct UploadTrigger(Sender<Trigger>);

impl UploadTrigger {
    pub(crate) fn fire(&self) {
        if self.0.send(Trigger::Upload).is_err() {
            log::warn!("Upload thread is gone, not triggering an upload");
        }
    }
}

fn lock(glean: &Mutex<Option<Glean>>) -> MutexGuard<'_, Option<Glean>> {
    glean.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The state shared by the upload thread.
#[derive(Debug)]
struct Uploader {
    glean: Arc<Mutex<Option<Glean>>>,
    uploader: Arc<dyn PingUploader>,
    server_endpoint: String,
    timeout: Duration,
    shutting_down: Arc<AtomicBool>,
    cancellation: Arc<Cancellation>,
}

impl Uploader {
    fn with_glean<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&Glean) -> R,
    {
        lock(&self.glean).as_ref().map(f)
    }

    fn run(&self, triggers: Receiver<Trigger>) {
        for trigger in triggers.iter() {
            if let Trigger::Shutdown = trigger {
                break;
            }
            self.process_tasks();
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
        }
        log::trace!("Upload thread done");
    }

    /// Works through upload tasks until the engine says it's done.
    fn process_tasks(&self) {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }

            let task = match self.with_glean(|glean| glean.get_upload_task()) {
                Some(task) => task,
                None => return,
            };

            match task {
                PingUploadTask::Upload { request } => {
                    let document_id = request.document_id.clone();
                    let deadline = UploadDeadline::new(&self.cancellation, self.timeout);
                    let result = self.attempt(request, &deadline);
                    let action = self.with_glean(|glean| {
                        glean.process_ping_upload_response(&document_id, result)
                    });
                    // The next trigger starts over once the canceller is done.
                    if deadline.is_cancelled() {
                        log::info!("Upload attempt cancelled, ending the uploading window");
                        return;
                    }
                    if action != Some(UploadTaskAction::Next) {
                        return;
                    }
                }
                PingUploadTask::Wait { time } => {
                    log::trace!("Waiting {}ms before asking for another upload task", time);
                    let until = Instant::now() + Duration::from_millis(time);
                    if self.cancellation.wait(self.cancellation.epoch(), until) {
                        log::debug!("Upload wait cancelled");
                        return;
                    }
                }
                PingUploadTask::Done => return,
            }
        }
    }

    /// Runs a single upload attempt through the transport.
    fn attempt(&self, request: PingRequest, deadline: &UploadDeadline) -> UploadResult {
        let url = format!("{}{}", self.server_endpoint, request.path);
        let parsed = match Url::parse(&url) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Invalid upload URL '{}': {}", url, e);
                return UploadResult::unrecoverable_failure();
            }
        };

        let upload_request = PingUploadRequest {
            url: parsed.to_string(),
            body: request.body,
            headers: request.headers.into_iter().collect(),
            body_has_info_sections: request.body_has_info_sections,
            ping_name: request.ping_name,
        };
        let capable = CapablePingUploadRequest::new(upload_request, request.uploader_capabilities);
        let supported = self.uploader.capabilities();
        let upload_request = match capable.capable(|required| {
            required
                .iter()
                .all(|capability| supported.contains(capability))
        }) {
            Some(upload_request) => upload_request,
            None => {
                log::info!("Uploader lacks the capabilities required by a ping");
                return UploadResult::incapable();
            }
        };

        if deadline.should_abort() {
            return UploadResult::recoverable_failure();
        }

        if let (Some(store), Some(host)) = (self.uploader.cookie_store(), parsed.host_str()) {
            store.purge_host(host);
        }

        let result = self.uploader.upload(upload_request, deadline);
        if deadline.is_expired() {
            log::warn!("Upload attempt ran past its {:?} deadline", self.timeout);
        }
        result
    }
}

/// The handle to the `glean.upload` thread.
#[derive(Debug)]
pub(crate) struct UploadWorker {
    triggers: Sender<Trigger>,
    cancellation: Arc<Cancellation>,
    shutting_down: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UploadWorker {
    /// Starts the upload thread.
    pub(crate) fn start(
        glean: Arc<Mutex<Option<Glean>>>,
        uploader: Box<dyn PingUploader>,
        server_endpoint: &str,
        timeout: Duration,
    ) -> Self {
        let (triggers, trigger_receiver) = unbounded();
        let cancellation = Arc::new(Cancellation::new());
        let shutting_down = Arc::new(AtomicBool::new(false));

        let state = Uploader {
            glean,
            uploader: Arc::from(uploader),
            server_endpoint: server_endpoint.trim_end_matches('/').to_string(),
            timeout,
            shutting_down: Arc::clone(&shutting_down),
            cancellation: Arc::clone(&cancellation),
        };

        let handle = thread::Builder::new()
            .name("glean.upload".into())
            .spawn(move || state.run(trigger_receiver));

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to spawn the upload thread: {}", e);
                None
            }
        };

        Self {
            triggers,
            cancellation,
            shutting_down,
            handle,
        }
    }

    /// A handle that can wake the thread from anywhere.
    pub(crate) fn trigger_handle(&self) -> UploadTrigger {
        UploadTrigger(self.triggers.clone())
    }

    /// A handle that aborts the current attempt or wait from anywhere.
    pub(crate) fn cancel_handle(&self) -> Arc<Cancellation> {
        Arc::clone(&self.cancellation)
    }

    /// Aborts the current attempt or wait at the next checkpoint.
    pub(crate) fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Stops the thread and waits for it.
    pub(crate) fn shutdown(&mut self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.cancel();
        let _ = self.triggers.send(Trigger::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("The upload thread panicked");
            }
        }
    }
}

impl Drop for UploadWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// #[allow(dead_code)] is required on this module as a workaround for
// https://github.com/rust-lang/rust/issues/46379
#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs::{read_dir, File};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use flate2::read::GzDecoder;
use serde_json::Value as JsonValue;

use glean_engine::metrics::{CounterMetric, LabeledMetric};
use glean_engine::net::{CookieStore, PingUploadRequest, PingUploader, UploadDeadline};
use glean_engine::{
    ClientInfoMetrics, CommonMetricData, Configuration, Context, Glean, Lifetime, Result,
    UploadResult,
};

pub const GLOBAL_APPLICATION_ID: &str = "org.mozilla.glean.test.app";

/// How long tests wait for an upload before giving up.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(5);

pub fn enable_test_logging() {
    // When testing we want all logs to go to stdout/stderr by default,
    // without requiring each individual test to activate it.
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn tempdir() -> (tempfile::TempDir, String) {
    let t = tempfile::tempdir().unwrap();
    let name = t.path().display().to_string();
    (t, name)
}

/// Creates a new instance without a running context.
///
/// If `tempdir` is provided it is used as the data directory,
/// a fresh temporary directory otherwise.
pub fn new_glean(tempdir: Option<tempfile::TempDir>) -> (Glean, tempfile::TempDir) {
    enable_test_logging();

    let dir = match tempdir {
        Some(tempdir) => tempdir,
        None => tempfile::tempdir().unwrap(),
    };

    let cfg = Configuration::builder(true, dir.path(), GLOBAL_APPLICATION_ID).build();
    let glean = Glean::new(&cfg, &ClientInfoMetrics::unknown()).unwrap();
    glean.test_block_on_ping_scan();

    (glean, dir)
}

/// Polls `condition` until it holds or [`UPLOAD_TIMEOUT`] passed.
pub fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + UPLOAD_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// The number of upload attempts that failed with `label`.
pub fn upload_failures(ctx: &Context, label: &str) -> i32 {
    let failures = LabeledMetric::new(
        CounterMetric::new(CommonMetricData {
            name: "ping_upload_failure".into(),
            category: "glean.upload".into(),
            send_in_pings: vec!["metrics".into()],
            lifetime: Lifetime::Ping,
            ..Default::default()
        }),
        None,
    );
    failures
        .get(label)
        .test_get_value(ctx, None)
        .unwrap_or(0)
}

/// Reads all the pings in a directory.
///
/// Every ping is returned as its URL path, its JSON body and, if present, its metadata.
fn get_pings(pings_dir: &Path) -> Result<Vec<(String, JsonValue, Option<JsonValue>)>> {
    let entries = read_dir(pings_dir)?;
    Ok(entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| match entry.file_type() {
            Ok(file_type) => file_type.is_file(),
            Err(_) => false,
        })
        .filter_map(|entry| File::open(entry.path()).ok())
        .filter_map(|file| {
            let mut lines = BufReader::new(file).lines();
            if let (Some(Ok(url)), Some(Ok(body)), Ok(metadata)) =
                (lines.next(), lines.next(), lines.next().transpose())
            {
                let parsed_metadata = metadata.map(|m| {
                    serde_json::from_str::<JsonValue>(&m).expect("metadata should be valid JSON")
                });
                if let Ok(parsed_body) = serde_json::from_str::<JsonValue>(&body) {
                    Some((url, parsed_body, parsed_metadata))
                } else {
                    None
                }
            } else {
                None
            }
        })
        .collect())
}

/// Gets a vector of the currently queued pings.
pub fn get_queued_pings(data_path: &Path) -> Result<Vec<(String, JsonValue, Option<JsonValue>)>> {
    get_pings(&data_path.join("pending_pings"))
}

/// Gets a vector of the currently queued `deletion-request` pings.
pub fn get_deletion_pings(data_path: &Path) -> Result<Vec<(String, JsonValue, Option<JsonValue>)>> {
    get_pings(&data_path.join("deletion_request"))
}

/// Decodes the body of an upload request, gunzipping it if needed.
pub fn decode_body(request: &PingUploadRequest) -> JsonValue {
    let gzipped = request
        .headers
        .iter()
        .any(|(name, value)| name == "Content-Encoding" && value == "gzip");

    let body = if gzipped {
        let mut decoder = GzDecoder::new(&request.body[..]);
        let mut body = String::new();
        decoder.read_to_string(&mut body).unwrap();
        body
    } else {
        String::from_utf8(request.body.clone()).unwrap()
    };

    serde_json::from_str(&body).unwrap()
}

/// Gets the value of the header named `name`, if any.
pub fn header<'a>(request: &'a PingUploadRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Records every host the engine asked to purge cookies for.
#[derive(Debug, Default)]
pub struct RecordingCookieStore {
    pub purged: Mutex<Vec<String>>,
}

impl CookieStore for RecordingCookieStore {
    fn purge_host(&self, host: &str) {
        self.purged.lock().unwrap().push(host.to_string());
    }
}

/// An uploader that hands every request to the test through a channel.
///
/// Results are taken from a scripted list, falling back to `HTTP 200`.
#[derive(Debug)]
pub struct FakeUploader {
    sender: Sender<PingUploadRequest>,
    results: Mutex<VecDeque<UploadResult>>,
    capabilities: Vec<String>,
    delay: Option<Duration>,
    cookies: Option<Arc<RecordingCookieStore>>,
}

impl FakeUploader {
    pub fn new() -> (Self, Receiver<PingUploadRequest>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let uploader = FakeUploader {
            sender,
            results: Mutex::new(VecDeque::new()),
            capabilities: vec![],
            delay: None,
            cookies: None,
        };
        (uploader, receiver)
    }

    /// Answers the next uploads with `results`, in order.
    pub fn with_results(self, results: Vec<UploadResult>) -> Self {
        *self.results.lock().unwrap() = results.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Waits this long before answering, giving up when the attempt is aborted.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_cookie_store(mut self, cookies: Arc<RecordingCookieStore>) -> Self {
        self.cookies = Some(cookies);
        self
    }
}

impl PingUploader for FakeUploader {
    fn upload(&self, upload_request: PingUploadRequest, deadline: &UploadDeadline) -> UploadResult {
        let _ = self.sender.send(upload_request);
        if let Some(delay) = self.delay {
            if !deadline.sleep(delay) {
                return UploadResult::recoverable_failure();
            }
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| UploadResult::http_status(200))
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn cookie_store(&self) -> Option<&dyn CookieStore> {
        self.cookies
            .as_ref()
            .map(|cookies| cookies.as_ref() as &dyn CookieStore)
    }
}

/// Configuration for a context uploading through `uploader`.
pub fn upload_config(data_path: &Path, uploader: FakeUploader) -> Configuration {
    Configuration::builder(true, data_path, GLOBAL_APPLICATION_ID)
        .with_server_endpoint("https://incoming.example.com")
        .with_uploader(uploader)
        .build()
}

/// Creates and initializes a context, without an uploader.
pub fn new_context(data_path: &Path) -> Context {
    enable_test_logging();

    let mut ctx = Context::new();
    let cfg = Configuration::builder(true, data_path, GLOBAL_APPLICATION_ID).build();
    ctx.initialize(cfg, ClientInfoMetrics::unknown()).unwrap();
    ctx
}

/// Creates and initializes a context uploading through `uploader`.
pub fn new_uploading_context(data_path: &Path, uploader: FakeUploader) -> Context {
    enable_test_logging();

    let mut ctx = Context::new();
    ctx.initialize(upload_config(data_path, uploader), ClientInfoMetrics::unknown())
        .unwrap();
    ctx
}

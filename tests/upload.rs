// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;
use crate::common::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use glean_engine::metrics::*;
use glean_engine::net::{PingUploadRequest, PingUploader, UploadDeadline};
use glean_engine::{ClientInfoMetrics, CommonMetricData, Configuration, Context, Lifetime, UploadResult};

fn flag() -> BooleanMetric {
    BooleanMetric::new(CommonMetricData {
        name: "flag".into(),
        category: "telemetry".into(),
        send_in_pings: vec!["store1".into()],
        lifetime: Lifetime::Application,
        ..Default::default()
    })
}

fn store1() -> PingType {
    PingType::new("store1", true, true, vec![])
}

#[test]
fn flag_recorded_before_init_is_uploaded() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let (uploader, requests) = FakeUploader::new();

    let mut ctx = Context::new();
    flag().set(&ctx, true);

    ctx.initialize(upload_config(tmp.path(), uploader), ClientInfoMetrics::unknown())
        .unwrap();
    ctx.register_ping_type(&store1());
    store1().submit(&ctx, None);

    let request = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    assert!(request
        .url
        .starts_with("https://incoming.example.com/submit/org-mozilla-glean-test-app/store1/1/"));
    assert_eq!("store1", request.ping_name);
    assert!(request.body_has_info_sections);
    assert!(header(&request, "Date").is_some());
    assert!(header(&request, "X-Telemetry-Agent")
        .unwrap()
        .starts_with("Glean/"));

    let body = decode_body(&request);
    assert_eq!(true, body["metrics"]["telemetry"]["flag"]);
    assert_eq!(0, body["ping_info"]["seq"]);
    assert!(body["client_info"]["client_id"].is_string());

    // A successful upload removes the ping from disk.
    assert!(wait_until(|| get_queued_pings(tmp.path())
        .map(|pings| pings.is_empty())
        .unwrap_or(false)));
}

#[test]
fn recoverable_failures_keep_the_ping_for_later() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let (uploader, requests) = FakeUploader::new();
    let uploader = uploader.with_results(vec![
        UploadResult::recoverable_failure(),
        UploadResult::recoverable_failure(),
        UploadResult::recoverable_failure(),
    ]);

    // Submitted before initialization, so only the initial trigger runs an uploading window.
    let mut ctx = Context::new();
    store1().submit(&ctx, None);
    ctx.initialize(upload_config(tmp.path(), uploader), ClientInfoMetrics::unknown())
        .unwrap();

    let first = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    for _ in 0..2 {
        let retry = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
        assert_eq!(first.url, retry.url);
    }
    assert!(wait_until(|| upload_failures(&ctx, "recoverable") == 3));

    // Three failures end the uploading window, the ping stays on disk.
    assert!(requests.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(1, get_queued_pings(tmp.path()).unwrap().len());

    // The next submission wakes the uploader and both pings go out.
    store1().submit(&ctx, None);
    let retried = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    let second = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    assert_eq!(first.url, retried.url);
    assert_ne!(first.url, second.url);
    assert!(wait_until(|| get_queued_pings(tmp.path())
        .map(|pings| pings.is_empty())
        .unwrap_or(false)));
}

#[test]
fn client_errors_drop_the_ping() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let (uploader, requests) = FakeUploader::new();
    let uploader = uploader.with_results(vec![UploadResult::http_status(404)]);
    let ctx = new_uploading_context(tmp.path(), uploader);

    store1().submit(&ctx, None);

    requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    assert!(wait_until(|| upload_failures(&ctx, "status_code_4xx") == 1));
    assert!(requests.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(get_queued_pings(tmp.path()).unwrap().is_empty());
}

#[test]
fn throttled_uploads_are_retried() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let (uploader, requests) = FakeUploader::new();
    let uploader = uploader.with_results(vec![UploadResult::http_status(429)]);
    let ctx = new_uploading_context(tmp.path(), uploader);

    store1().submit(&ctx, None);

    let throttled = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    let accepted = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    assert_eq!(throttled.url, accepted.url);
    assert!(wait_until(|| get_queued_pings(tmp.path())
        .map(|pings| pings.is_empty())
        .unwrap_or(false)));
    drop(ctx);
}

#[test]
fn uploaders_lacking_capabilities_never_see_the_ping() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let (uploader, requests) = FakeUploader::new();
    let ctx = new_uploading_context(tmp.path(), uploader);

    let ping = PingType::new("private", false, true, vec![])
        .with_uploader_capabilities(vec!["ohttp".to_string()]);
    ping.submit(&ctx, None);

    assert!(wait_until(|| upload_failures(&ctx, "incapable") >= 3));
    assert!(requests.try_recv().is_err());
    assert_eq!(1, get_queued_pings(tmp.path()).unwrap().len());
}

#[test]
fn capable_uploaders_get_the_ping() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let (uploader, requests) = FakeUploader::new();
    let uploader = uploader.with_capabilities(vec!["ohttp".to_string()]);
    let ctx = new_uploading_context(tmp.path(), uploader);

    let ping = PingType::new("private", false, true, vec![])
        .with_uploader_capabilities(vec!["ohttp".to_string()]);
    ping.submit(&ctx, None);

    let request = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    assert_eq!("private", request.ping_name);
    drop(ctx);
}

#[test]
fn malformed_endpoints_drop_the_ping() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let (uploader, requests) = FakeUploader::new();

    let mut ctx = Context::new();
    let cfg = Configuration::builder(true, tmp.path(), GLOBAL_APPLICATION_ID)
        .with_server_endpoint("not a url")
        .with_uploader(uploader)
        .build();
    ctx.initialize(cfg, ClientInfoMetrics::unknown()).unwrap();

    store1().submit(&ctx, None);

    assert!(wait_until(|| upload_failures(&ctx, "unrecoverable") == 1));
    assert!(requests.try_recv().is_err());
    assert!(get_queued_pings(tmp.path()).unwrap().is_empty());
}

#[test]
fn slow_uploads_time_out_as_recoverable() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let (uploader, _requests) = FakeUploader::new();
    let uploader = uploader.with_delay(Duration::from_secs(2));

    let mut ctx = Context::new();
    let cfg = Configuration::builder(true, tmp.path(), GLOBAL_APPLICATION_ID)
        .with_server_endpoint("https://incoming.example.com")
        .with_uploader(uploader)
        .with_upload_timeout(Duration::from_millis(50))
        .build();
    ctx.initialize(cfg, ClientInfoMetrics::unknown()).unwrap();

    store1().submit(&ctx, None);

    assert!(wait_until(|| upload_failures(&ctx, "recoverable") >= 3));
    assert_eq!(1, get_queued_pings(tmp.path()).unwrap().len());
}

#[test]
fn cookies_for_the_upload_host_are_purged() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let cookies = Arc::new(RecordingCookieStore::default());
    let (uploader, requests) = FakeUploader::new();
    let uploader = uploader.with_cookie_store(Arc::clone(&cookies));
    let ctx = new_uploading_context(tmp.path(), uploader);

    store1().submit(&ctx, None);

    requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    assert_eq!(
        vec!["incoming.example.com".to_string()],
        *cookies.purged.lock().unwrap()
    );
    drop(ctx);
}

#[test]
fn debug_tags_are_sent_as_headers() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let (uploader, requests) = FakeUploader::new();
    let ctx = new_uploading_context(tmp.path(), uploader);

    assert!(!ctx.set_debug_view_tag("not valid!"));
    assert!(ctx.set_debug_view_tag("my-tag"));
    assert!(!ctx.set_source_tags(vec!["a".to_string(); 6]));
    assert!(ctx.set_source_tags(vec!["a".to_string(), "b".to_string()]));

    store1().submit(&ctx, None);

    let request = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    assert_eq!(Some("my-tag"), header(&request, "X-Debug-ID"));
    assert_eq!(Some("a,b"), header(&request, "X-Source-Tags"));
}

#[test]
fn disabling_upload_uploads_a_deletion_request() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let (uploader, requests) = FakeUploader::new();
    let ctx = new_uploading_context(tmp.path(), uploader);

    flag().set(&ctx, true);
    ctx.set_upload_enabled(false);
    assert!(!ctx.is_upload_enabled());
    assert_eq!(None, flag().test_get_value(&ctx, None));

    let request = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    assert_eq!("deletion-request", request.ping_name);
    let body = decode_body(&request);
    assert_eq!("set_upload_enabled", body["ping_info"]["reason"]);
    assert!(body["client_info"]["client_id"].is_string());

    // Nothing is recorded while upload is disabled.
    flag().set(&ctx, true);
    assert_eq!(None, flag().test_get_value(&ctx, None));
}

#[test]
fn incapable_uploads_leave_cookies_alone() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let cookies = Arc::new(RecordingCookieStore::default());
    let (uploader, requests) = FakeUploader::new();
    let uploader = uploader.with_cookie_store(Arc::clone(&cookies));
    let ctx = new_uploading_context(tmp.path(), uploader);

    let ping = PingType::new("private", false, true, vec![])
        .with_uploader_capabilities(vec!["ohttp".to_string()]);
    ping.submit(&ctx, None);

    assert!(wait_until(|| upload_failures(&ctx, "incapable") >= 3));
    assert!(requests.try_recv().is_err());
    assert!(cookies.purged.lock().unwrap().is_empty());
}

#[derive(Debug, Default)]
struct Calls {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    total: AtomicUsize,
}

/// Ignores its deadline and records how many calls overlap.
#[derive(Debug)]
struct SlowUploader(Arc<Calls>);

impl PingUploader for SlowUploader {
    fn upload(&self, _request: PingUploadRequest, _deadline: &UploadDeadline) -> UploadResult {
        let calls = &self.0;
        calls.total.fetch_add(1, Ordering::SeqCst);
        let now = calls.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        calls.max_in_flight.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(400));
        calls.in_flight.fetch_sub(1, Ordering::SeqCst);
        UploadResult::http_status(200)
    }
}

#[test]
fn timed_out_attempts_never_overlap_the_next_one() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let calls = Arc::new(Calls::default());

    let mut ctx = Context::new();
    store1().submit(&ctx, None);
    store1().submit(&ctx, None);
    let cfg = Configuration::builder(true, tmp.path(), GLOBAL_APPLICATION_ID)
        .with_server_endpoint("https://incoming.example.com")
        .with_uploader(SlowUploader(Arc::clone(&calls)))
        .with_upload_timeout(Duration::from_millis(50))
        .build();
    ctx.initialize(cfg, ClientInfoMetrics::unknown()).unwrap();

    assert!(wait_until(|| get_queued_pings(tmp.path())
        .map(|pings| pings.is_empty())
        .unwrap_or(false)));
    assert!(wait_until(|| calls.in_flight.load(Ordering::SeqCst) == 0));

    // Each ping went out once, one after the other.
    assert_eq!(1, calls.max_in_flight.load(Ordering::SeqCst));
    assert_eq!(2, calls.total.load(Ordering::SeqCst));
}

#[test]
fn disabling_upload_aborts_the_running_attempt() {
    enable_test_logging();
    let (tmp, _) = tempdir();
    let (uploader, requests) = FakeUploader::new();
    let uploader = uploader.with_delay(Duration::from_secs(3));
    let ctx = new_uploading_context(tmp.path(), uploader);

    store1().submit(&ctx, None);
    let started = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    assert_eq!("store1", started.ping_name);

    ctx.set_upload_enabled(false);

    // The aborted ping is deleted, not retried; only the deletion-request follows.
    let next = requests.recv_timeout(UPLOAD_TIMEOUT).unwrap();
    assert_eq!("deletion-request", next.ping_name);
    assert!(get_queued_pings(tmp.path())
        .map(|pings| pings.is_empty())
        .unwrap_or(true));
    assert!(requests.recv_timeout(Duration::from_millis(200)).is_err());
}

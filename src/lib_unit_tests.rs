// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// NOTE: This is a test-only file that contains unit tests for
// the lib.rs file.

use std::fs;
use std::path::Path;

use super::*;
use crate::internal_metrics::CoreMetrics;
use crate::metrics::{CounterMetric, PingType};

const GLOBAL_APPLICATION_ID: &str = "org.mozilla.glean.test.app";

pub fn enable_test_logging() {
    // When testing we want all logs to go to stdout/stderr by default,
    // without requiring each individual test to activate it.
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn new_glean(tempdir: Option<tempfile::TempDir>) -> (Glean, tempfile::TempDir) {
    enable_test_logging();

    let dir = match tempdir {
        Some(tempdir) => tempdir,
        None => tempfile::tempdir().unwrap(),
    };
    let glean = open_glean(dir.path(), true);
    (glean, dir)
}

fn open_glean(path: &Path, upload_enabled: bool) -> Glean {
    let cfg = Configuration::builder(upload_enabled, path, GLOBAL_APPLICATION_ID).build();
    let glean = Glean::new(&cfg, &ClientInfoMetrics::unknown()).unwrap();
    glean.test_block_on_ping_scan();
    glean
}

fn count_pings(data_path: &Path, directory: &str) -> usize {
    match fs::read_dir(data_path.join(directory)) {
        Ok(entries) => entries.filter_map(|entry| entry.ok()).count(),
        Err(_) => 0,
    }
}

fn store1_counter() -> CounterMetric {
    CounterMetric::new(CommonMetricData {
        name: "calls".into(),
        category: "local".into(),
        send_in_pings: vec!["store1".into()],
        ..Default::default()
    })
}

#[test]
fn path_is_constructed_from_data() {
    let (glean, _t) = new_glean(None);

    assert_eq!(
        "/submit/org-mozilla-glean-test-app/baseline/1/this-is-a-docid",
        glean.make_path("baseline", "this-is-a-docid")
    );
}

#[test]
fn application_id_is_sanitized() {
    let (glean, _t) = new_glean(None);
    assert_eq!("org-mozilla-glean-test-app", glean.get_application_id());
}

#[test]
fn empty_application_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Configuration::builder(true, dir.path(), "").build();

    let err = Glean::new(&cfg, &ClientInfoMetrics::unknown()).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidConfig(_)));
}

#[test]
fn client_id_and_first_run_date_must_be_regenerated() {
    let (mut glean, _t) = new_glean(None);
    let core = CoreMetrics::new();

    let first_client_id = core.client_id.get_value(&glean, CLIENT_INFO_STORAGE);
    let first_run_date = core.first_run_date.get_value(&glean, CLIENT_INFO_STORAGE);
    assert!(first_client_id.is_some());
    assert!(first_run_date.is_some());
    assert_ne!(Some(KNOWN_CLIENT_ID), first_client_id);

    assert!(glean.set_upload_enabled(false));
    assert_eq!(
        Some(KNOWN_CLIENT_ID),
        core.client_id.get_value(&glean, CLIENT_INFO_STORAGE)
    );
    assert_eq!(
        first_run_date,
        core.first_run_date.get_value(&glean, CLIENT_INFO_STORAGE)
    );

    assert!(glean.set_upload_enabled(true));
    let second_client_id = core.client_id.get_value(&glean, CLIENT_INFO_STORAGE);
    assert!(second_client_id.is_some());
    assert_ne!(Some(KNOWN_CLIENT_ID), second_client_id);
    assert_ne!(first_client_id, second_client_id);
    assert_eq!(
        first_run_date,
        core.first_run_date.get_value(&glean, CLIENT_INFO_STORAGE)
    );
}

#[test]
fn setting_the_same_upload_state_is_a_noop() {
    let (mut glean, _t) = new_glean(None);

    assert!(!glean.set_upload_enabled(true));
    assert!(glean.is_upload_enabled());
    assert_eq!(0, count_pings(glean.get_data_path(), DELETION_REQUEST_PINGS_DIRECTORY));
}

#[test]
fn disabling_upload_submits_a_deletion_request() {
    let (mut glean, dir) = new_glean(None);
    let ping = PingType::new("store1", true, false, vec![]);
    glean.register_ping_type(&ping);

    store1_counter().add_sync(&glean, 1);
    assert!(glean.submit_ping(&ping, None));
    assert_eq!(1, count_pings(dir.path(), PENDING_PINGS_DIRECTORY));

    glean.set_upload_enabled(false);

    assert_eq!(0, count_pings(dir.path(), PENDING_PINGS_DIRECTORY));
    assert_eq!(1, count_pings(dir.path(), DELETION_REQUEST_PINGS_DIRECTORY));
}

#[test]
fn nothing_is_recorded_while_upload_is_disabled() {
    let (mut glean, _t) = new_glean(None);
    let counter = store1_counter();

    glean.set_upload_enabled(false);
    counter.add_sync(&glean, 1);
    assert_eq!(None, counter.get_value(&glean, "store1"));

    glean.set_upload_enabled(true);
    counter.add_sync(&glean, 1);
    assert_eq!(Some(1), counter.get_value(&glean, "store1"));
}

#[test]
fn first_run_with_upload_disabled_sends_no_deletion_request() {
    enable_test_logging();
    let dir = tempfile::tempdir().unwrap();

    let glean = open_glean(dir.path(), false);

    assert!(!glean.is_upload_enabled());
    assert_eq!(0, count_pings(dir.path(), DELETION_REQUEST_PINGS_DIRECTORY));
    assert_eq!(
        Some(KNOWN_CLIENT_ID),
        CoreMetrics::new()
            .client_id
            .get_value(&glean, CLIENT_INFO_STORAGE)
    );
}

#[test]
fn opting_out_between_runs_sends_a_deletion_request_at_init() {
    enable_test_logging();
    let dir = tempfile::tempdir().unwrap();

    {
        let glean = open_glean(dir.path(), true);
        assert!(glean.is_first_run());
    }

    let glean = open_glean(dir.path(), false);
    assert!(!glean.is_upload_enabled());
    assert_eq!(1, count_pings(dir.path(), DELETION_REQUEST_PINGS_DIRECTORY));

    let stored = fs::read_dir(dir.path().join(DELETION_REQUEST_PINGS_DIRECTORY))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| fs::read_to_string(entry.path()).unwrap())
        .next()
        .unwrap();
    assert!(stored.contains("\"reason\":\"at_init\""));
    drop(glean);

    // Already opted out: nothing more to delete.
    let _glean = open_glean(dir.path(), false);
    assert_eq!(1, count_pings(dir.path(), DELETION_REQUEST_PINGS_DIRECTORY));
}

#[test]
fn first_run_is_only_reported_once() {
    let (glean, dir) = new_glean(None);
    assert!(glean.is_first_run());
    drop(glean);

    let (glean, _t) = new_glean(Some(dir));
    assert!(!glean.is_first_run());
}

#[test]
fn database_size_is_recorded_on_restart() {
    let (glean, dir) = new_glean(None);
    drop(glean);

    let (glean, _t) = new_glean(Some(dir));
    let size = glean
        .additional_metrics
        .database_size
        .get_value(&glean, "metrics")
        .unwrap();
    assert!(size.count >= 1);
    assert!(size.sum > 0);
}

#[test]
fn dirty_flag_is_persisted_across_runs() {
    let (glean, dir) = new_glean(None);
    assert!(!glean.is_dirty_flag_set());

    glean.set_dirty_flag(true);
    assert!(glean.is_dirty_flag_set());
    drop(glean);

    let (glean, dir) = new_glean(Some(dir));
    assert!(glean.is_dirty_flag_set());
    glean.set_dirty_flag(false);
    drop(glean);

    let (glean, _t) = new_glean(Some(dir));
    assert!(!glean.is_dirty_flag_set());
}

#[test]
fn source_tags_are_validated() {
    let (mut glean, _t) = new_glean(None);

    assert!(!glean.set_source_tags(vec![]));
    assert!(!glean.set_source_tags(vec!["a".into(); 6]));
    assert!(!glean.set_source_tags(vec!["valid".into(), "in valid".into()]));
    assert!(glean.source_tags().is_none());

    assert!(glean.set_source_tags(vec!["a".into(); 5]));
    assert_eq!(5, glean.source_tags().map_or(0, |tags| tags.len()));
}

#[test]
fn debug_view_tag_is_validated() {
    let (mut glean, _t) = new_glean(None);

    assert!(!glean.set_debug_view_tag("invalid tag"));
    assert!(!glean.set_debug_view_tag("this-tag-is-longer-than-twenty"));
    assert!(glean.debug_view_tag().is_none());

    assert!(glean.set_debug_view_tag("valid-tag"));
    assert_eq!(Some(&"valid-tag".to_string()), glean.debug_view_tag());
}

#[test]
fn unknown_pings_are_not_submitted() {
    let (glean, dir) = new_glean(None);

    assert!(!glean.submit_ping_by_name("not-registered", None));
    assert_eq!(0, count_pings(dir.path(), PENDING_PINGS_DIRECTORY));
}

#[test]
fn registered_pings_are_found_by_name() {
    let (mut glean, _t) = new_glean(None);
    assert!(glean.get_ping_by_name("deletion-request").is_some());

    let ping = PingType::new("store1", true, true, vec![]);
    glean.register_ping_type(&ping);
    assert_eq!(
        Some("store1"),
        glean.get_ping_by_name("store1").map(|ping| ping.name())
    );
    assert!(glean.submit_ping_by_name("store1", None));
}

#[test]
fn snapshots_are_json_and_can_clear_the_store() {
    let (glean, _t) = new_glean(None);
    assert_eq!("", glean.snapshot("store1", false));

    store1_counter().add_sync(&glean, 3);

    let snapshot: serde_json::Value =
        serde_json::from_str(&glean.snapshot("store1", true)).unwrap();
    assert_eq!(
        serde_json::json!({"local": {"calls": 3}}),
        snapshot
    );
    assert_eq!("", glean.snapshot("store1", false));
}

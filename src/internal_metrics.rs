// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::{metrics::*, CommonMetricData, Lifetime, CLIENT_INFO_STORAGE};

/// Metrics reported in the `client_info` section of every ping.
#[derive(Debug)]
pub struct CoreMetrics {
    pub client_id: UuidMetric,
    pub first_run_date: DatetimeMetric,
    pub os: StringMetric,
    pub architecture: StringMetric,
    pub app_build: StringMetric,
    pub app_display_version: StringMetric,
    pub app_channel: StringMetric,
}

fn client_info(name: &str, lifetime: Lifetime) -> CommonMetricData {
    CommonMetricData {
        name: name.into(),
        category: "".into(),
        send_in_pings: vec![CLIENT_INFO_STORAGE.into()],
        lifetime,
        ..Default::default()
    }
}

impl CoreMetrics {
    pub fn new() -> CoreMetrics {
        CoreMetrics {
            client_id: UuidMetric::new(client_info("client_id", Lifetime::User)),

            first_run_date: DatetimeMetric::new(
                client_info("first_run_date", Lifetime::User),
                TimeUnit::Day,
            ),

            os: StringMetric::new(client_info("os", Lifetime::Application)),
            architecture: StringMetric::new(client_info("architecture", Lifetime::Application)),
            app_build: StringMetric::new(client_info("app_build", Lifetime::Application)),
            app_display_version: StringMetric::new(client_info(
                "app_display_version",
                Lifetime::Application,
            )),
            app_channel: StringMetric::new(client_info("app_channel", Lifetime::Application)),
        }
    }
}

/// Health metrics about the engine itself.
#[derive(Debug)]
pub struct AdditionalMetrics {
    /// The number of times we encountered an IO error
    /// when writing a pending ping to disk.
    pub io_errors: CounterMetric,

    /// The number of tasks dropped because the pre-init queue was full.
    pub preinit_tasks_overflow: CounterMetric,

    /// The size of the persisted metric store when the engine starts.
    pub database_size: MemoryDistributionMetric,
}

impl AdditionalMetrics {
    pub fn new() -> AdditionalMetrics {
        AdditionalMetrics {
            io_errors: CounterMetric::new(CommonMetricData {
                name: "io".into(),
                category: "glean.error".into(),
                send_in_pings: vec!["metrics".into()],
                lifetime: Lifetime::Ping,
                ..Default::default()
            }),

            preinit_tasks_overflow: CounterMetric::new(CommonMetricData {
                name: "preinit_tasks_overflow".into(),
                category: "glean.error".into(),
                send_in_pings: vec!["metrics".into()],
                lifetime: Lifetime::Ping,
                ..Default::default()
            }),

            database_size: MemoryDistributionMetric::new(
                CommonMetricData {
                    name: "size".into(),
                    category: "glean.database".into(),
                    send_in_pings: vec!["metrics".into()],
                    lifetime: Lifetime::Ping,
                    ..Default::default()
                },
                MemoryUnit::Byte,
            ),
        }
    }
}

/// Metrics describing the health of ping uploading.
#[derive(Debug)]
pub struct UploadMetrics {
    pub ping_upload_failure: LabeledCounter,
    pub discarded_exceeding_pings_size: MemoryDistributionMetric,
    pub pending_pings_directory_size: MemoryDistributionMetric,
    pub deleted_pings_after_quota_hit: CounterMetric,
    pub pending_pings: CounterMetric,
}

fn upload_meta(name: &str) -> CommonMetricData {
    CommonMetricData {
        name: name.into(),
        category: "glean.upload".into(),
        send_in_pings: vec!["metrics".into()],
        lifetime: Lifetime::Ping,
        ..Default::default()
    }
}

impl UploadMetrics {
    pub fn new() -> UploadMetrics {
        UploadMetrics {
            ping_upload_failure: LabeledMetric::new(
                CounterMetric::new(upload_meta("ping_upload_failure")),
                Some(
                    [
                        "status_code_4xx",
                        "status_code_5xx",
                        "status_code_unknown",
                        "unrecoverable",
                        "recoverable",
                        "incapable",
                    ]
                    .iter()
                    .map(|label| label.to_string())
                    .collect(),
                ),
            ),

            discarded_exceeding_pings_size: MemoryDistributionMetric::new(
                upload_meta("discarded_exceeding_ping_size"),
                MemoryUnit::Kilobyte,
            ),

            pending_pings_directory_size: MemoryDistributionMetric::new(
                upload_meta("pending_pings_directory_size"),
                MemoryUnit::Kilobyte,
            ),

            deleted_pings_after_quota_hit: CounterMetric::new(upload_meta(
                "deleted_pings_after_quota_hit",
            )),

            pending_pings: CounterMetric::new(upload_meta("pending_pings")),
        }
    }
}

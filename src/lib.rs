// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A client-side telemetry engine.
//!
//! Instrumented code records typed metrics, the engine groups them into named pings,
//! assembles ping documents from lifetime-scoped storage and hands them to an uploader
//! that classifies every attempt as sent, retried or dropped.
//!
//! All recording goes through a single ordered task queue owned by a [`Context`].
//!
//! ## Example
//!
//! ```rust,no_run
//! # use glean_engine::{ClientInfoMetrics, CommonMetricData, Configuration, Context, Lifetime};
//! # use glean_engine::metrics::{BooleanMetric, PingType};
//! let mut ctx = Context::new();
//!
//! let flag = BooleanMetric::new(CommonMetricData {
//!     name: "flag".into(),
//!     category: "telemetry".into(),
//!     send_in_pings: vec!["store1".into()],
//!     lifetime: Lifetime::Application,
//!     ..Default::default()
//! });
//! // Recorded before initialization, replayed once `initialize` ran.
//! flag.set(&ctx, true);
//!
//! let cfg = Configuration::builder(true, "/tmp/data", "org.mozilla.engine.example").build();
//! ctx.initialize(cfg, ClientInfoMetrics::unknown()).unwrap();
//!
//! let ping = PingType::new("store1", true, false, vec![]);
//! ctx.register_ping_type(&ping);
//! ping.submit(&ctx, None);
//! ```

// This needs to be included first, and the space below prevents rustfmt from
// alphabetizing it.
#[macro_use]
mod macros;

mod common_metric_data;
mod configuration;
mod context;
mod core;
mod database;
mod dispatcher;
mod error;
mod error_recording;
pub mod ffi;
mod histogram;
mod internal_metrics;
mod internal_pings;
pub mod metrics;
pub mod net;
pub mod ping;
pub mod storage;
pub mod traits;
pub mod upload;
mod util;

use uuid::Uuid;

pub use crate::common_metric_data::{CommonMetricData, Lifetime};
pub use crate::configuration::{Builder as ConfigurationBuilder, ClientInfoMetrics, Configuration};
pub use crate::context::Context;
pub use crate::core::Glean;
pub use crate::database::Database;
pub use crate::dispatcher::DispatchError;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::error_recording::{test_get_num_recorded_errors, ErrorType};
pub use crate::histogram::{
    Bucketing, Functional, Histogram, HistogramType, PrecomputedExponential, PrecomputedLinear,
};
pub use crate::upload::{PingRateLimit, PingUploadTask, UploadResult, UploadTaskAction};

/// The version of this crate, reported as `telemetry_sdk_build`.
pub const GLEAN_VERSION: &str = env!("CARGO_PKG_VERSION");

const GLEAN_SCHEMA_VERSION: u32 = 1;

/// The client id stored after upload was disabled.
///
/// Makes pings sent by accident after opting out easy to spot.
pub(crate) const KNOWN_CLIENT_ID: Uuid = Uuid::from_u128(0xc0ffeec0_ffee_c0ff_eec0_ffeec0ffeec0);

// An internal ping name, not to be touched by anything else
pub(crate) const INTERNAL_STORAGE: &str = "glean_internal_info";

// The store holding everything that ends up in `client_info`.
pub(crate) const CLIENT_INFO_STORAGE: &str = "glean_client_info";

// The names of the pings directories.
pub(crate) const PENDING_PINGS_DIRECTORY: &str = "pending_pings";
pub(crate) const DELETION_REQUEST_PINGS_DIRECTORY: &str = "deletion_request";

#[cfg(test)]
#[path = "lib_unit_tests.rs"]
mod tests;

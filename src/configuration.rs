// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::time::Duration;

use log::LevelFilter;

use crate::net::PingUploader;
use crate::upload::PingRateLimit;

/// The default server pings are sent to.
pub(crate) const DEFAULT_GLEAN_ENDPOINT: &str = "https://incoming.telemetry.mozilla.org";

/// How long a single upload attempt may take before it counts as a recoverable failure.
pub(crate) const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// The language binding reported in the `X-Telemetry-Agent` header by default.
const DEFAULT_LANGUAGE_BINDING_NAME: &str = "Rust";

/// The engine configuration.
///
/// Optional values will be filled in with default values.
#[derive(Debug)]
pub struct Configuration {
    /// Whether upload should be enabled.
    pub upload_enabled: bool,
    /// Path to a directory to store all data in.
    pub data_path: PathBuf,
    /// The application ID (will be sanitized during initialization).
    pub application_id: String,
    /// The name of the language binding, reported in the upload user agent.
    pub language_binding_name: String,
    /// Whether to delay persistence of data from metrics with ping lifetime.
    pub delay_ping_lifetime_io: bool,
    /// The server pings are sent to.
    pub server_endpoint: Option<String>,
    /// The instance of the uploader used to send pings.
    pub uploader: Option<Box<dyn PingUploader + 'static>>,
    /// The internal logging level.
    pub log_level: Option<LevelFilter>,
    /// The rate pings may be uploaded before they are throttled.
    pub rate_limit: Option<PingRateLimit>,
    /// How long a single upload attempt may take.
    pub upload_timeout: Duration,
}

impl Configuration {
    /// Starts building a configuration from the required fields.
    pub fn builder<P: Into<PathBuf>, S: Into<String>>(
        upload_enabled: bool,
        data_path: P,
        application_id: S,
    ) -> Builder {
        Builder::new(upload_enabled, data_path, application_id)
    }

    /// The server endpoint, falling back to the default one.
    pub(crate) fn endpoint(&self) -> &str {
        self.server_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_GLEAN_ENDPOINT)
    }
}

/// Configuration builder.
///
/// Let's you build a configuration from the required fields
/// and let you set optional fields individually.
#[derive(Debug)]
pub struct Builder {
    upload_enabled: bool,
    data_path: PathBuf,
    application_id: String,
    language_binding_name: String,
    delay_ping_lifetime_io: bool,
    server_endpoint: Option<String>,
    uploader: Option<Box<dyn PingUploader + 'static>>,
    log_level: Option<LevelFilter>,
    rate_limit: Option<PingRateLimit>,
    upload_timeout: Duration,
}

impl Builder {
    /// A new configuration builder.
    pub fn new<P: Into<PathBuf>, S: Into<String>>(
        upload_enabled: bool,
        data_path: P,
        application_id: S,
    ) -> Self {
        Self {
            upload_enabled,
            data_path: data_path.into(),
            application_id: application_id.into(),
            language_binding_name: DEFAULT_LANGUAGE_BINDING_NAME.into(),
            delay_ping_lifetime_io: false,
            server_endpoint: None,
            uploader: None,
            log_level: None,
            rate_limit: None,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }

    /// Generate the full configuration.
    pub fn build(self) -> Configuration {
        Configuration {
            upload_enabled: self.upload_enabled,
            data_path: self.data_path,
            application_id: self.application_id,
            language_binding_name: self.language_binding_name,
            delay_ping_lifetime_io: self.delay_ping_lifetime_io,
            server_endpoint: self.server_endpoint,
            uploader: self.uploader,
            log_level: self.log_level,
            rate_limit: self.rate_limit,
            upload_timeout: self.upload_timeout,
        }
    }

    /// Set the name of the language binding.
    pub fn with_language_binding_name<S: Into<String>>(mut self, name: S) -> Self {
        self.language_binding_name = name.into();
        self
    }

    /// Set whether to delay persistence of data from metrics with ping lifetime.
    pub fn with_delay_ping_lifetime_io(mut self, value: bool) -> Self {
        self.delay_ping_lifetime_io = value;
        self
    }

    /// Set the server pings are sent to.
    pub fn with_server_endpoint<S: Into<String>>(mut self, server_endpoint: S) -> Self {
        self.server_endpoint = Some(server_endpoint.into());
        self
    }

    /// Set the instance of the uploader used to send pings.
    pub fn with_uploader<U: PingUploader + 'static>(mut self, uploader: U) -> Self {
        self.uploader = Some(Box::new(uploader));
        self
    }

    /// Set the internal logging level.
    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Set the ping upload rate limit.
    pub fn with_rate_limit(mut self, rate_limit: PingRateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Set how long a single upload attempt may take.
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }
}

/// Metrics describing the embedding application, reported in `client_info`.
#[derive(Clone, Debug, Default)]
pub struct ClientInfoMetrics {
    /// The build identifier generated by the CI system (e.g. "1234/A").
    pub app_build: String,
    /// The user visible version string (e.g. "1.0.3").
    pub app_display_version: String,
    /// The product-provided release channel (e.g. "beta").
    pub channel: Option<String>,
}

impl ClientInfoMetrics {
    /// Creates the client info with dummy values for all.
    pub fn unknown() -> Self {
        ClientInfoMetrics {
            app_build: "Unknown".to_string(),
            app_display_version: "Unknown".to_string(),
            channel: None,
        }
    }
}

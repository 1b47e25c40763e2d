// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use inherent::inherent;

use crate::ping::PingMaker;
use crate::upload::PingPayload;
use crate::Context;
use crate::Glean;

/// Stores information about a ping.
///
/// This is required so that given metric data queued on disk we can send
/// pings with the correct settings, e.g. whether it has a client_id.
#[derive(Clone)]
pub struct PingType(Arc<InnerPing>);

struct InnerPing {
    /// The name of the ping.
    name: String,
    /// Whether the ping should include the client ID.
    include_client_id: bool,
    /// Whether the ping should be sent if it is empty
    send_if_empty: bool,
    /// The "reason" codes that this ping can send
    reason_codes: Vec<String>,
    /// The capabilities an uploader must have to send this ping.
    uploader_capabilities: Vec<String>,
}

impl fmt::Debug for PingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PingType")
            .field("name", &self.0.name)
            .field("include_client_id", &self.0.include_client_id)
            .field("send_if_empty", &self.0.send_if_empty)
            .field("reason_codes", &self.0.reason_codes)
            .field("uploader_capabilities", &self.0.uploader_capabilities)
            .finish()
    }
}

// IMPORTANT:
//
// When changing this implementation, make sure all the operations are
// also declared in the related trait in `../traits/`.
impl PingType {
    /// Creates a new ping type for the given name, whether to include the client ID and whether to
    /// send this ping empty.
    ///
    /// The ping needs to be registered on the [`Context`] before it can be submitted.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the ping.
    /// * `include_client_id` - Whether to include the client ID in the assembled ping when submitting.
    /// * `send_if_empty` - Whether the ping should be sent empty or not.
    /// * `reason_codes` - The valid reason codes for this ping.
    pub fn new<A: Into<String>>(
        name: A,
        include_client_id: bool,
        send_if_empty: bool,
        reason_codes: Vec<String>,
    ) -> Self {
        Self(Arc::new(InnerPing {
            name: name.into(),
            include_client_id,
            send_if_empty,
            reason_codes,
            uploader_capabilities: vec![],
        }))
    }

    /// Requires uploaders of this ping to declare the given capabilities.
    ///
    /// Uploaders lacking any of them report [`UploadResult::Incapable`](crate::UploadResult)
    /// and the ping stays queued.
    pub fn with_uploader_capabilities(self, capabilities: Vec<String>) -> Self {
        let inner = &self.0;
        Self(Arc::new(InnerPing {
            name: inner.name.clone(),
            include_client_id: inner.include_client_id,
            send_if_empty: inner.send_if_empty,
            reason_codes: inner.reason_codes.clone(),
            uploader_capabilities: capabilities,
        }))
    }

    /// The ping's name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub(crate) fn include_client_id(&self) -> bool {
        self.0.include_client_id
    }

    pub(crate) fn send_if_empty(&self) -> bool {
        self.0.send_if_empty
    }

    pub(crate) fn uploader_capabilities(&self) -> &[String] {
        &self.0.uploader_capabilities
    }

    /// Collects and submits a ping for eventual uploading.
    ///
    /// # Returns
    ///
    /// Whether the ping was succesfully assembled and queued.
    #[doc(hidden)]
    pub fn submit_sync(&self, glean: &Glean, reason: Option<&str>) -> bool {
        if !glean.is_upload_enabled() {
            log::info!("Glean disabled: not submitting any pings.");
            return false;
        }

        let ping = &self.0;

        let corrected_reason = reason.filter(|reason| {
            let known = ping.reason_codes.iter().any(|code| code == reason);
            if !known {
                log::error!("Invalid reason code {} for ping {}", reason, ping.name);
            }
            known
        });

        let ping_maker = PingMaker::new();
        let doc_id = Uuid::new_v4().to_string();
        let url_path = glean.make_path(&ping.name, &doc_id);
        match ping_maker.collect(glean, self, corrected_reason, &doc_id, &url_path) {
            None => {
                log::info!(
                    "No content for ping '{}', therefore no ping queued.",
                    ping.name
                );
                false
            }
            Some(ping) => {
                if let Err(e) = ping_maker.store_ping(glean.get_data_path(), &ping) {
                    log::warn!(
                        "IO error while writing ping to file: {}. Enqueuing upload of what we have in memory.",
                        e
                    );
                    glean.additional_metrics.io_errors.add_sync(glean, 1);

                    let content = match serde_json::to_string(&ping.content) {
                        Ok(content) => content,
                        Err(e) => {
                            log::error!("Failed to serialize ping '{}': {}", ping.name, e);
                            return false;
                        }
                    };
                    let payload = PingPayload {
                        document_id: ping.doc_id.to_string(),
                        upload_path: ping.url_path.to_string(),
                        json_body: content,
                        headers: Some(ping.headers),
                        body_has_info_sections: true,
                        ping_name: ping.name.to_string(),
                        uploader_capabilities: ping.uploader_capabilities,
                    };

                    glean.upload_manager.enqueue_ping(glean, payload);
                    return true;
                }

                glean
                    .upload_manager
                    .enqueue_ping_from_file(glean, &doc_id);

                log::info!(
                    "The ping '{}' was submitted and will be sent as soon as possible",
                    ping.name
                );

                true
            }
        }
    }
}

#[inherent]
impl crate::traits::Ping for PingType {
    /// Submits the ping for eventual uploading.
    ///
    /// The ping content is assembled as soon as possible, but upload is not
    /// guaranteed to happen immediately, as that depends on the upload policies.
    ///
    /// If the ping currently contains no content, it will not be sent,
    /// unless it is configured to be sent if empty.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context the submission is queued on.
    /// * `reason` - the reason the ping was triggered. Included in the
    ///   `ping_info.reason` part of the payload.
    pub fn submit(&self, ctx: &Context, reason: Option<&str>) {
        ctx.submit_ping(self, reason)
    }
}

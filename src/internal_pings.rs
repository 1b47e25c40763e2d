// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::metrics::PingType;

/// Pings owned by the engine itself, registered on every instance.
#[derive(Debug, Clone)]
pub struct InternalPings {
    pub deletion_request: PingType,
}

impl InternalPings {
    pub fn new() -> InternalPings {
        InternalPings {
            deletion_request: PingType::new(
                "deletion-request",
                true,
                true,
                vec!["at_init".to_string(), "set_upload_enabled".to_string()],
            ),
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::convert::TryFrom;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use crate::metrics::labeled::{resolve_label, LabelOverflow};
use crate::Glean;

/// The supported metrics' lifetimes.
///
/// A metric's lifetime determines when its stored data gets reset.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[repr(i32)] // Use i32 to be compatible with our JNA definition
#[serde(rename_all = "lowercase")]
pub enum Lifetime {
    /// The metric is reset with each sent ping
    Ping,
    /// The metric is reset on application restart
    Application,
    /// The metric is reset with each user profile
    User,
}

impl Default for Lifetime {
    fn default() -> Self {
        Lifetime::Ping
    }
}

impl Lifetime {
    /// String representation of the lifetime.
    pub fn as_str(self) -> &'static str {
        match self {
            Lifetime::Ping => "ping",
            Lifetime::Application => "app",
            Lifetime::User => "user",
        }
    }
}

impl TryFrom<i32> for Lifetime {
    type Error = Error;

    fn try_from(value: i32) -> Result<Lifetime, Self::Error> {
        match value {
            0 => Ok(Lifetime::Ping),
            1 => Ok(Lifetime::Application),
            2 => Ok(Lifetime::User),
            e => Err(ErrorKind::Lifetime(e).into()),
        }
    }
}

/// A label requested by the caller, not yet checked against storage.
///
/// Handed out by labeled metrics; the final storage key is decided when a value
/// is recorded, because it depends on the labels already stored.
#[derive(Clone, Debug)]
pub struct DynamicLabel {
    pub(crate) label: String,
    pub(crate) allowed_labels: Option<Arc<Vec<String>>>,
    pub(crate) overflow: LabelOverflow,
}

/// The common set of data shared across all different metric types.
#[derive(Default, Debug, Clone)]
pub struct CommonMetricData {
    /// The metric's name.
    pub name: String,
    /// The metric's category.
    pub category: String,
    /// List of ping names to include this metric in.
    pub send_in_pings: Vec<String>,
    /// The metric's lifetime.
    pub lifetime: Lifetime,
    /// Whether or not the metric is disabled.
    ///
    /// Disabled metrics are never recorded.
    pub disabled: bool,
    /// Dynamic label.
    ///
    /// Set by labeled metrics on the submetrics they hand out.
    #[doc(hidden)]
    pub dynamic_label: Option<DynamicLabel>,
}

impl CommonMetricData {
    /// The metric's base identifier, including the category and name, but not the label.
    ///
    /// If `category` is empty, it's ommitted.
    /// Otherwise, it's the combination of the metric's `category` and `name`.
    pub fn base_identifier(&self) -> String {
        if self.category.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.category, self.name)
        }
    }

    /// The metric's unique identifier, including the category, name and label.
    ///
    /// Resolves a dynamic label against the stored labels without recording
    /// any errors, so it's safe to call from readers.
    pub(crate) fn identifier(&self, glean: &Glean) -> String {
        let base_identifier = self.base_identifier();

        if let Some(dynamic) = &self.dynamic_label {
            resolve_label(glean, self, &base_identifier, dynamic, false)
        } else {
            base_identifier
        }
    }

    /// Like [`identifier`](Self::identifier), but invalid or overflowing labels
    /// are counted by the error recorder.
    ///
    /// Only writers call this.
    pub(crate) fn recording_identifier(&self, glean: &Glean) -> String {
        let base_identifier = self.base_identifier();

        if let Some(dynamic) = &self.dynamic_label {
            resolve_label(glean, self, &base_identifier, dynamic, true)
        } else {
            base_identifier
        }
    }

    /// The list of storages this metric should be recorded into.
    pub fn storage_names(&self) -> &[String] {
        &self.send_in_pings
    }

    /// The ping a test accessor reads from when none is given.
    pub(crate) fn default_storage(&self) -> &str {
        self.send_in_pings.first().map(String::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lifetime_i32_mapping() {
        assert_eq!(Lifetime::Ping, Lifetime::try_from(0).unwrap());
        assert_eq!(Lifetime::Application, Lifetime::try_from(1).unwrap());
        assert_eq!(Lifetime::User, Lifetime::try_from(2).unwrap());
        assert!(Lifetime::try_from(3).is_err());
    }

    #[test]
    fn base_identifier_skips_empty_category() {
        let meta = CommonMetricData {
            name: "dirtybit".into(),
            ..Default::default()
        };
        assert_eq!("dirtybit", meta.base_identifier());

        let meta = CommonMetricData {
            name: "flag".into(),
            category: "telemetry".into(),
            ..Default::default()
        };
        assert_eq!("telemetry.flag", meta.base_identifier());
    }
}

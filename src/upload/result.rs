// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// The result of an attempted ping upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    /// A recoverable failure.
    ///
    /// During upload something went wrong,
    /// e.g. the network connection failed or the attempt timed out.
    /// The upload should be retried at a later time.
    RecoverableFailure,

    /// An unrecoverable upload failure.
    ///
    /// A possible cause might be a malformed URL.
    UnrecoverableFailure,

    /// The uploader lacks a capability the ping requires.
    ///
    /// No transport was attempted; the ping stays queued.
    Incapable,

    /// A HTTP response code.
    ///
    /// This can still indicate an error, depending on the status code.
    HttpStatus {
        /// The HTTP status code
        code: i32,
    },

    /// Signal that this uploader is done with work
    /// and won't accept new work.
    Done,
}

impl UploadResult {
    /// Gets the label to be used in recording error counts for upload.
    ///
    /// Returns `None` if the upload finished succesfully.
    /// Failures are recorded in the `ping_upload_failure` metric.
    pub fn get_label(&self) -> Option<&'static str> {
        match self {
            UploadResult::HttpStatus { code: 200..=299 } => None,
            UploadResult::HttpStatus { code: 400..=499 } => Some("status_code_4xx"),
            UploadResult::HttpStatus { code: 500..=599 } => Some("status_code_5xx"),
            UploadResult::HttpStatus { .. } => Some("status_code_unknown"),
            UploadResult::UnrecoverableFailure => Some("unrecoverable"),
            UploadResult::RecoverableFailure => Some("recoverable"),
            UploadResult::Incapable => Some("incapable"),
            UploadResult::Done => None,
        }
    }

    /// A recoverable failure.
    ///
    /// During upload something went wrong,
    /// e.g. the network connection failed.
    /// The upload should be retried at a later time.
    pub fn recoverable_failure() -> Self {
        Self::RecoverableFailure
    }

    /// An unrecoverable upload failure.
    ///
    /// A possible cause might be a malformed URL.
    pub fn unrecoverable_failure() -> Self {
        Self::UnrecoverableFailure
    }

    /// The uploader can't handle the capabilities this ping requires.
    pub fn incapable() -> Self {
        Self::Incapable
    }

    /// A HTTP response code.
    ///
    /// This can still indicate an error, depending on the status code.
    pub fn http_status(code: i32) -> Self {
        Self::HttpStatus { code }
    }

    /// This uploader is done.
    pub fn done() -> Self {
        Self::Done
    }
}

/// Communication back whether the uploader loop should continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTaskAction {
    /// Instruct the caller to continue with work.
    Next,
    /// Instruct the caller to end work.
    End,
}

/// What happened to a ping after an upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingUploadState {
    /// Accepted by the server, the ping file is gone.
    Sent,
    /// Kept on disk and queued again.
    Retry,
    /// Deleted without being accepted.
    Dropped,
}

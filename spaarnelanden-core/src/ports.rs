//! Traits describing the fetcher and consumer seams plus the shared error types.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Error as ReqwestError;
use serde_json::Error as JsonError;

use crate::model::{ContainerDataset, RegistrationId};

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while refreshing or reading container data.
pub enum PortError {
    /// Transport failure, timeout, or non-success HTTP status.
    #[error("Network error: {0}")]
    Network(#[from] ReqwestError),
    /// The page no longer has the expected structure.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    /// Container is not part of an otherwise valid dataset.
    #[error("Container not found: {0}")]
    ContainerNotFound(RegistrationId),
}

#[derive(thiserror::Error, Debug)]
/// Whole-page extraction failures. Any of these aborts the refresh.
pub enum ParseError {
    /// No `#MapPartial` element, or no script inside it.
    #[error("script-not-found")]
    ScriptNotFound,
    /// The script does not assign the container model.
    #[error("payload-not-found")]
    PayloadNotFound,
    /// The container model is not a JSON array.
    #[error("invalid-json: {0}")]
    InvalidJson(#[from] JsonError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Problem with a single record. Absorbed during extraction, never fails a batch.
pub enum RecordError {
    /// The last-emptied field did not carry a usable `Date(<millis>)` literal.
    #[error("bad-timestamp for {registration_id}: {raw:?}")]
    BadTimestamp {
        /// Record the value belongs to.
        registration_id: RegistrationId,
        /// Value as found on the page.
        raw: Option<String>,
    },
    /// A field had a type the record cannot use; its default was taken instead.
    #[error("bad-field {field} for {registration_id}")]
    BadField {
        /// Record the value belongs to.
        registration_id: RegistrationId,
        /// Wire name of the field.
        field: &'static str,
    },
    /// Entry without a string registration number, skipped.
    #[error("missing-registration at index {index}")]
    MissingRegistration {
        /// Position in the container model.
        index: usize,
    },
}

#[async_trait]
/// Source of the raw page text.
pub trait PagePort: Send + Sync {
    /// Perform one request for the page.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Network`] on connection failure, timeout or a non-success status.
    async fn fetch(&self) -> Result<String, PortError>;
}

#[derive(Debug, Clone, Copy)]
/// Result of a refresh as delivered to consumers.
pub enum RefreshOutcome<'outcome> {
    /// A new dataset replaced the previous one.
    Updated(&'outcome Arc<ContainerDataset>),
    /// The refresh failed; the previous dataset, if any, is still current.
    Failed(&'outcome PortError),
}

/// Anything that wants to hear about refreshes, typically a [`crate::view::ContainerView`].
pub trait DatasetConsumer: Send + Sync {
    /// Receive the outcome of the latest refresh.
    fn refresh(&self, outcome: RefreshOutcome<'_>);
}

//! Domain data structures for containers, datasets, and derived readings.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::RecordError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Registration number printed on a street container.
///
/// Used as the join key between fetches. Not assumed to be numeric or of any
/// particular length.
pub struct RegistrationId(pub String);

impl RegistrationId {
    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl From<&str> for RegistrationId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One container as reported by the upstream page.
pub struct RawContainerRecord {
    /// Registration number of the container.
    pub registration_id: RegistrationId,
    /// How full the container is, usually in percent.
    pub fill_degree: f64,
    /// Whether the container is currently taken out of service.
    pub out_of_use: bool,
    /// Moment the container was last emptied, unset when the page value was malformed.
    pub last_emptied: Option<DateTime<Utc>>,
    /// Product name, e.g. "underground" or "Rest".
    pub product_name: String,
}

/// Snapshot of every container reported by a single successful fetch.
///
/// Built once and never mutated; a newer fetch produces a new dataset.
#[derive(Debug, Clone, Default)]
pub struct ContainerDataset {
    records: HashMap<RegistrationId, RawContainerRecord>,
    diagnostics: Vec<RecordError>,
}

impl ContainerDataset {
    /// Assemble a dataset from already keyed records and the problems found while decoding them.
    #[must_use]
    pub fn new(
        records: HashMap<RegistrationId, RawContainerRecord>,
        diagnostics: Vec<RecordError>,
    ) -> Self {
        Self {
            records,
            diagnostics,
        }
    }

    /// Look up a single container.
    #[must_use]
    pub fn get(&self, id: &RegistrationId) -> Option<&RawContainerRecord> {
        self.records.get(id)
    }

    /// Whether the container is present in this snapshot.
    #[must_use]
    pub fn contains(&self, id: &RegistrationId) -> bool {
        self.records.contains_key(id)
    }

    /// Number of distinct containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the page reported no containers at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Per-record problems that were absorbed while building the dataset.
    #[must_use]
    pub fn diagnostics(&self) -> &[RecordError] {
        &self.diagnostics
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Normalized attributes of a container, derived from a [`RawContainerRecord`].
pub struct ContainerAttributes {
    /// Registration number echoed back.
    pub registration_id: RegistrationId,
    /// Fill degree as reported.
    pub fill_degree: f64,
    /// Out-of-use flag.
    pub out_of_use: bool,
    /// Last time the container was emptied.
    pub last_emptied: Option<DateTime<Utc>>,
    /// Kind of container.
    pub container_type: String,
}

impl From<&RawContainerRecord> for ContainerAttributes {
    fn from(record: &RawContainerRecord) -> Self {
        Self {
            registration_id: record.registration_id.clone(),
            fill_degree: record.fill_degree,
            out_of_use: record.out_of_use,
            last_emptied: record.last_emptied,
            container_type: record.product_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// What a host needs to display one tracked container.
pub struct ContainerReading {
    /// Container this reading belongs to.
    pub registration_id: RegistrationId,
    /// Primary value (fill degree), absent while unavailable.
    pub state: Option<f64>,
    /// Last known attributes, possibly stale.
    pub attributes: Option<ContainerAttributes>,
    /// Whether the host should consider the container available.
    pub available: bool,
    /// Whether the attributes come from the most recent refresh.
    pub fresh: bool,
}

//! Per-container projection of the shared dataset.

use parking_lot::RwLock;
use tracing::debug;

use crate::model::{ContainerAttributes, ContainerDataset, ContainerReading, RegistrationId};
use crate::ports::{DatasetConsumer, PortError, RefreshOutcome};

#[derive(Debug, Default)]
struct ViewState {
    attributes: Option<ContainerAttributes>,
    available: bool,
    fresh: bool,
}

/// Read-only sensor for one tracked container.
///
/// Starts unavailable. A failed refresh never clears attributes that were
/// read before; it only marks them as not fresh.
#[derive(Debug)]
pub struct ContainerView {
    registration_id: RegistrationId,
    state: RwLock<ViewState>,
}

impl ContainerView {
    /// Create a view that has not seen any data yet.
    #[must_use]
    pub fn new(registration_id: RegistrationId) -> Self {
        Self {
            registration_id,
            state: RwLock::new(ViewState::default()),
        }
    }

    /// Container this view tracks.
    #[must_use]
    pub fn registration_id(&self) -> &RegistrationId {
        &self.registration_id
    }

    /// Fill degree, while available.
    #[must_use]
    pub fn state(&self) -> Option<f64> {
        let state = self.state.read();
        state
            .attributes
            .as_ref()
            .filter(|_| state.available)
            .map(|attributes| attributes.fill_degree)
    }

    /// Last successfully derived attributes, possibly stale.
    #[must_use]
    pub fn attributes(&self) -> Option<ContainerAttributes> {
        self.state.read().attributes.clone()
    }

    /// Whether the container should be shown as available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state.read().available
    }

    /// Whether the last refresh succeeded.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.state.read().fresh
    }

    /// Consistent snapshot for the host.
    #[must_use]
    pub fn reading(&self) -> ContainerReading {
        let state = self.state.read();
        ContainerReading {
            registration_id: self.registration_id.clone(),
            state: state
                .attributes
                .as_ref()
                .filter(|_| state.available)
                .map(|attributes| attributes.fill_degree),
            attributes: state.attributes.clone(),
            available: state.available,
            fresh: state.fresh,
        }
    }
}

impl DatasetConsumer for ContainerView {
    fn refresh(&self, outcome: RefreshOutcome<'_>) {
        let mut state = self.state.write();

        match outcome {
            RefreshOutcome::Updated(dataset) => match lookup(dataset, &self.registration_id) {
                Ok(attributes) => {
                    state.attributes = Some(attributes);
                    state.available = true;
                    state.fresh = true;
                }
                Err(err) => {
                    debug!(%err, "marking container unavailable");
                    state.available = false;
                    state.fresh = true;
                }
            },
            RefreshOutcome::Failed(err) => {
                debug!(
                    container = %self.registration_id,
                    %err,
                    "refresh failed, keeping last known reading"
                );
                state.fresh = false;
                if state.attributes.is_none() {
                    state.available = false;
                }
            }
        }
    }
}

/// Derive the attributes of one container.
///
/// # Errors
///
/// Returns [`PortError::ContainerNotFound`] when the dataset does not report `id`.
pub fn lookup(
    dataset: &ContainerDataset,
    id: &RegistrationId,
) -> Result<ContainerAttributes, PortError> {
    dataset
        .get(id)
        .map(ContainerAttributes::from)
        .ok_or_else(|| PortError::ContainerNotFound(id.clone()))
}

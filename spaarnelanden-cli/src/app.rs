use std::future::Future;
use std::sync::Arc;

use chrono::Local;
use spaarnelanden_core::{
    cache::RefreshCache,
    config::TrackerConfig,
    coordinator::UpdateCoordinator,
    model::ContainerReading,
    ports::{DatasetConsumer, PagePort, RefreshOutcome},
    view::ContainerView,
};
use tracing::{info, warn};

/// Host side of the sensors: owns the views and drives the coordinator.
pub(crate) struct App {
    coordinator: Arc<UpdateCoordinator>,
    views: Vec<Arc<ContainerView>>,
}

impl App {
    pub(crate) fn new(port: Arc<dyn PagePort>, config: &TrackerConfig) -> Self {
        let cache = RefreshCache::new(port, config.cache_ttl());
        let coordinator = Arc::new(UpdateCoordinator::new(cache, config.refresh_interval()));
        let views = config
            .containers()
            .iter()
            .cloned()
            .map(|id| Arc::new(ContainerView::new(id)))
            .collect();

        Self { coordinator, views }
    }

    /// Register every view, then the reporter so it logs after the views were updated.
    pub(crate) async fn start(&self) {
        for view in &self.views {
            self.coordinator
                .register(Arc::clone(view) as Arc<dyn DatasetConsumer>)
                .await;
        }

        let reporter = Reporter {
            views: self.views.clone(),
        };
        self.coordinator.register(Arc::new(reporter)).await;
    }

    pub(crate) fn readings(&self) -> Vec<ContainerReading> {
        self.views.iter().map(|view| view.reading()).collect()
    }

    pub(crate) async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        Arc::clone(&self.coordinator).run(shutdown).await;
    }
}

/// Logs every tracked reading after each refresh.
struct Reporter {
    views: Vec<Arc<ContainerView>>,
}

impl DatasetConsumer for Reporter {
    fn refresh(&self, outcome: RefreshOutcome<'_>) {
        if let RefreshOutcome::Failed(err) = outcome {
            warn!(%err, "showing last known readings");
        }

        for view in &self.views {
            let reading = view.reading();
            let last_emptied = reading
                .attributes
                .as_ref()
                .and_then(|attributes| attributes.last_emptied)
                .map(|at| at.with_timezone(&Local).format("%d.%m.%Y %H:%M").to_string());
            let container_type = reading
                .attributes
                .as_ref()
                .map(|attributes| attributes.container_type.as_str());

            info!(
                container = %reading.registration_id,
                fill_degree = reading.state,
                available = reading.available,
                fresh = reading.fresh,
                out_of_use = reading.attributes.as_ref().map(|attributes| attributes.out_of_use),
                container_type,
                last_emptied = last_emptied.as_deref(),
                "container reading"
            );
        }
    }
}

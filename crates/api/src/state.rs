//! Shared application state for the Axum API server.

use std::sync::Arc;

use herald_engine::dispatch::DispatchTrigger;
use herald_engine::intake::Intake;
use herald_engine::repository::DeliveryRepository;
use herald_engine::status::StatusService;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub intake: Intake,
    pub status: Arc<StatusService>,
    /// Which dispatch queue intake schedules onto.
    pub queue_backend: &'static str,
}

impl AppState {
    pub fn new(repository: Arc<dyn DeliveryRepository>, trigger: DispatchTrigger) -> Self {
        Self {
            queue_backend: trigger.backend(),
            intake: Intake::new(repository.clone(), trigger),
            status: Arc::new(StatusService::new(repository)),
        }
    }
}

pub mod error;
pub mod ingest;
pub mod vehicles;

pub use error::{not_found, ErrorResponse};

use std::sync::Arc;
use tokio::sync::mpsc;
use utoipa::OpenApi;

use crate::models::PushEnvelope;
use crate::services::tracker::VehicleStateCache;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<VehicleStateCache>,
    pub push_tx: mpsc::Sender<PushEnvelope>,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "FleetTrack API",
        description = "Real-time fleet state synchronization engine"
    ),
    tags(
        (name = "vehicles", description = "Fused vehicle state and map projections"),
        (name = "push", description = "Push event ingest")
    )
)]
pub struct ApiDoc;

use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use crate::content_index::ContentIndexManager;
use crate::streaming::StreamDelivery;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedIndexManager = Arc<ContentIndexManager>;
pub type GuardedStreamDelivery = Arc<StreamDelivery>;
pub type OptionalSchedulerHandle = Option<SchedulerHandle>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub index: GuardedIndexManager,
    pub delivery: GuardedStreamDelivery,
    pub scheduler_handle: OptionalSchedulerHandle,
    pub hash: String,
}

impl FromRef<ServerState> for GuardedIndexManager {
    fn from_ref(input: &ServerState) -> Self {
        input.index.clone()
    }
}

impl FromRef<ServerState> for GuardedStreamDelivery {
    fn from_ref(input: &ServerState) -> Self {
        input.delivery.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for OptionalSchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}

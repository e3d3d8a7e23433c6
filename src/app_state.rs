use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::{config::AppConfig, models::ProjectIdentity, pipeline::UpdatePipeline, session::Session};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub session: Arc<Session>,
    pub pipeline: UpdatePipeline,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub pending: usize,
    pub node_count: usize,
    pub message: String,
    pub project: Option<ProjectIdentity>,
    pub backend_configured: bool,
}

impl AppState {
    pub fn status(&self) -> Status {
        let pending = self.pipeline.in_flight();
        Status {
            is_busy: pending > 0,
            pending,
            node_count: self.session.store().len(),
            message: self.session.status(),
            project: self.session.project(),
            backend_configured: self.pipeline.has_backend(),
        }
    }
}

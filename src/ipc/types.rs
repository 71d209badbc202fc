use crate::config::MigrateConfig;
use crate::progress::ProgressTracker;
use crate::store::SqliteStore;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<Arc<SqliteStore>>,
    /// Workspace defaults; request params override per run.
    pub config: MigrateConfig,
    /// Step statuses of the latest import run.
    pub progress: ProgressTracker,
}

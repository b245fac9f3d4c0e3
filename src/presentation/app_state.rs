// Application state for HTTP handlers
use crate::application::connection_manager::ConnectionManager;
use crate::application::ingest_service::SessionControl;
use crate::application::view_controller::ViewController;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Clone)]
pub struct AppState {
    pub connection: Arc<Mutex<ConnectionManager>>,
    pub view: Arc<RwLock<ViewController>>,
    pub sessions: SessionControl,
}

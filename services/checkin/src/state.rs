//! Application state shared across handlers

use std::sync::Arc;

use crate::{config::Settings, middleware::OperatorAuth, store::SharedStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub settings: Arc<Settings>,
    pub auth: Arc<OperatorAuth>,
}

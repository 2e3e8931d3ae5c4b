//! Application state shared across every axum handler: just the instance
//! and the `Server` it runs requests through.

use crate::instance::Instance;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub instance: Arc<Instance>,
}

impl AppState {
    pub fn new(instance: Arc<Instance>) -> Self {
        AppState { instance }
    }
}

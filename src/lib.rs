pub mod api;
pub mod bloom;
pub mod cdc;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod graphcol;
pub mod handlers;
pub mod index;
pub mod models;
pub mod object_store;
pub mod query;
pub mod retry;
pub mod store;

use std::sync::Arc;

use coordinator::Coordinator;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

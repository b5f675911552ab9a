//! HTTP gateway for the USSD engine
//!
//! Parses aggregator requests, hands them to the runtime and encodes the
//! reply in the aggregator's wire format.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::runtime::ProductionManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ProductionManager>,
}

impl AppState {
    pub fn new(runtime: Arc<ProductionManager>) -> Self {
        Self { runtime }
    }
}

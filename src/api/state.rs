use std::sync::Arc;

use crate::pipeline::Pipeline;
use crate::storage::Pool;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub pool: Pool,
}

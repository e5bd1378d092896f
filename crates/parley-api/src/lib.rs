pub mod auth;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod search;

use std::sync::Arc;

use parley_core::Lifecycle;
use parley_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub lifecycle: Arc<Lifecycle>,
    pub jwt_secret: String,
}

//! HTTP surface: reload trigger, link click redirects and health.

pub mod handlers;
pub mod router;

use crate::auth::ReloadAuthorizer;
use crate::db::Database;
use crate::source::SourceLoader;
use std::sync::Arc;

pub use router::build_router;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub source: Arc<dyn SourceLoader>,
    pub authorizer: Arc<dyn ReloadAuthorizer>,
}

impl AppState {
    pub fn new(
        db: Database,
        source: impl SourceLoader + 'static,
        authorizer: impl ReloadAuthorizer + 'static,
    ) -> Self {
        Self {
            db: Arc::new(db),
            source: Arc::new(source),
            authorizer: Arc::new(authorizer),
        }
    }
}

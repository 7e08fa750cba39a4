//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the database pool, the parsed configuration and the cache of
//! successful access-token lookups. Clones share the pool and the cache.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::models::token_cache::AccessTokenCache;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub token_cache: AccessTokenCache,
}

impl AppState {
    #[must_use]
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        let token_cache = AccessTokenCache::new(config.successful_tokens_cache_size);
        Self { pool, config: Arc::new(config), token_cache }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;

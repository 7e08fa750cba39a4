//! Database initialization, migration runner and small query helpers.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup uses this module to create the shared SQLx pool and enforce schema
//! migrations before accepting API traffic. Model modules share the
//! pagination and timestamp helpers defined here.

pub mod fixtures;
#[cfg(all(test, feature = "live-db-tests"))]
pub(crate) mod testing;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Page size used when a caller asks for a page without a size.
pub const DEFAULT_PAGE_SIZE: i64 = 50;
/// Upper bound on any requested page size.
pub const MAX_PAGE_SIZE: i64 = 500;

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}

/// Current time as unix seconds.
#[must_use]
pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Pagination shared by every `find`/`list` option struct. `page` is 1-based;
/// `page == 0` means "no pagination".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
pub struct ListOptions {
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub page_size: i64,
}

impl ListOptions {
    #[must_use]
    pub fn paginated(page: i64, page_size: i64) -> Self {
        Self { page, page_size }
    }

    #[must_use]
    pub fn is_paginated(&self) -> bool {
        self.page > 0
    }

    /// `(limit, offset)` after clamping the page size into `1..=MAX_PAGE_SIZE`.
    #[must_use]
    pub fn limit_offset(&self) -> (i64, i64) {
        let size = if self.page_size <= 0 { DEFAULT_PAGE_SIZE } else { self.page_size.min(MAX_PAGE_SIZE) };
        let page = self.page.max(1);
        (size, (page - 1) * size)
    }

    /// Append `LIMIT .. OFFSET ..` to a query when pagination is requested.
    pub fn push_limit(&self, builder: &mut sqlx::QueryBuilder<'_, sqlx::Postgres>) {
        if !self.is_paginated() {
            return;
        }
        let (limit, offset) = self.limit_offset();
        builder.push(" LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

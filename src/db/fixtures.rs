//! YAML fixture loader for database-backed tests.
//!
//! DESIGN
//! ======
//! A fixture directory holds one `<table>.yml` per table: a YAML sequence of
//! mappings from column name to scalar. Loading replaces the table contents
//! inside a single transaction, then moves every serial `id` sequence past the
//! highest fixture id so rows inserted by the test itself never collide.
//!
//! Identifiers cannot be bound as parameters, so table and column names are
//! validated against a conservative pattern and always quoted.

use std::path::{Path, PathBuf};

use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use crate::error::{ErrorKind, ModelError};

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("failed to read fixture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse fixture for table {table}: {source}")]
    Parse {
        table: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("malformed fixture for table {table}: {message}")]
    Shape { table: String, message: String },
    #[error("invalid SQL identifier in fixture: {0:?}")]
    InvalidIdentifier(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ModelError for FixtureError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::Db(_) => ErrorKind::Internal,
            Self::Parse { .. } | Self::Shape { .. } | Self::InvalidIdentifier(_) => ErrorKind::InvalidArgument,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "E_FIXTURE_IO",
            Self::Parse { .. } => "E_FIXTURE_PARSE",
            Self::Shape { .. } => "E_FIXTURE_SHAPE",
            Self::InvalidIdentifier(_) => "E_FIXTURE_IDENTIFIER",
            Self::Db(_) => "E_DATABASE",
        }
    }
}

/// A single scalar cell.
#[derive(Debug, Clone, PartialEq)]
pub enum FixtureValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FixtureValue {
    fn from_yaml(value: serde_yaml::Value) -> Option<Self> {
        match value {
            serde_yaml::Value::Null => Some(Self::Null),
            serde_yaml::Value::Bool(b) => Some(Self::Bool(b)),
            serde_yaml::Value::Number(n) => n.as_i64().map(Self::Int).or_else(|| n.as_f64().map(Self::Float)),
            serde_yaml::Value::String(s) => Some(Self::Text(s)),
            serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_) | serde_yaml::Value::Tagged(_) => None,
        }
    }
}

/// Row columns in file order.
pub type FixtureRow = Vec<(String, FixtureValue)>;

/// All rows for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableFixture {
    pub table: String,
    pub rows: Vec<FixtureRow>,
}

impl TableFixture {
    /// Parse the YAML body of `<table>.yml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is not a plain identifier, the YAML
    /// is malformed, or a row is not a mapping of column name to scalar.
    pub fn parse(table: &str, source: &str) -> Result<Self, FixtureError> {
        ensure_identifier(table)?;
        let doc: serde_yaml::Value = serde_yaml::from_str(source).map_err(|source| FixtureError::Parse {
            table: table.to_owned(),
            source,
        })?;

        let items = match doc {
            serde_yaml::Value::Null => Vec::new(),
            serde_yaml::Value::Sequence(items) => items,
            _ => return Err(shape(table, "expected a sequence of rows")),
        };

        let mut rows = Vec::with_capacity(items.len());
        for (idx, item) in items.into_iter().enumerate() {
            let serde_yaml::Value::Mapping(mapping) = item else {
                return Err(shape(table, &format!("row {idx} is not a mapping")));
            };
            let mut row = Vec::with_capacity(mapping.len());
            for (key, value) in mapping {
                let serde_yaml::Value::String(column) = key else {
                    return Err(shape(table, &format!("row {idx} has a non-string column name")));
                };
                ensure_identifier(&column)?;
                let Some(value) = FixtureValue::from_yaml(value) else {
                    return Err(shape(table, &format!("row {idx} column {column} is not a scalar")));
                };
                row.push((column, value));
            }
            if row.is_empty() {
                return Err(shape(table, &format!("row {idx} has no columns")));
            }
            rows.push(row);
        }

        Ok(Self { table: table.to_owned(), rows })
    }

    fn has_id_column(&self) -> bool {
        self.rows.iter().any(|row| row.iter().any(|(col, _)| col == "id"))
    }

    /// Build the parameterized `INSERT` for one row.
    pub(crate) fn insert_query<'a>(&self, row: &'a FixtureRow) -> QueryBuilder<'a, Postgres> {
        let mut builder = QueryBuilder::new(format!("INSERT INTO \"{}\" (", self.table));
        {
            let mut columns = builder.separated(", ");
            for (column, _) in row {
                columns.push(format!("\"{column}\""));
            }
        }
        builder.push(") VALUES (");
        {
            let mut values = builder.separated(", ");
            for (_, value) in row {
                match value {
                    FixtureValue::Null => values.push("NULL"),
                    FixtureValue::Bool(b) => values.push_bind(*b),
                    FixtureValue::Int(i) => values.push_bind(*i),
                    FixtureValue::Float(f) => values.push_bind(*f),
                    FixtureValue::Text(s) => values.push_bind(s.as_str()),
                };
            }
        }
        builder.push(")");
        builder
    }
}

fn shape(table: &str, message: &str) -> FixtureError {
    FixtureError::Shape { table: table.to_owned(), message: message.to_owned() }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn ensure_identifier(name: &str) -> Result<(), FixtureError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(FixtureError::InvalidIdentifier(name.to_owned()))
    }
}

/// A set of table fixtures, loaded in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixtureSet {
    tables: Vec<TableFixture>,
}

impl FixtureSet {
    #[must_use]
    pub fn new(tables: Vec<TableFixture>) -> Self {
        Self { tables }
    }

    /// Load every `*.yml` / `*.yaml` file in `dir`, sorted by file name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or any file cannot be read or parsed.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| FixtureError::Io { path: dir.to_path_buf(), source })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| FixtureError::Io { path: dir.to_path_buf(), source })?;
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let tables = paths.iter().map(|p| read_table_file(p)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tables })
    }

    /// Load only the named tables from `dir/<table>.yml`.
    ///
    /// # Errors
    ///
    /// Returns an error if any named file is missing or malformed.
    pub fn from_files(dir: impl AsRef<Path>, tables: &[&str]) -> Result<Self, FixtureError> {
        let dir = dir.as_ref();
        let tables = tables
            .iter()
            .map(|table| {
                ensure_identifier(table)?;
                read_table_file(&dir.join(format!("{table}.yml")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tables })
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.table.as_str())
    }

    #[must_use]
    pub fn get(&self, table: &str) -> Option<&TableFixture> {
        self.tables.iter().find(|t| t.table == table)
    }

    /// Replace the contents of every fixture table inside one transaction.
    ///
    /// # Errors
    ///
    /// Returns a database error if any statement fails; nothing is committed
    /// in that case.
    pub async fn load(&self, pool: &PgPool) -> Result<(), FixtureError> {
        let mut tx = pool.begin().await?;
        for fixture in &self.tables {
            let delete = format!("DELETE FROM \"{}\"", fixture.table);
            sqlx::query(&delete).execute(tx.as_mut()).await?;

            for row in &fixture.rows {
                fixture.insert_query(row).build().execute(tx.as_mut()).await?;
            }

            if fixture.has_id_column() {
                let reset = format!(
                    "SELECT setval(pg_get_serial_sequence($1, 'id'), COALESCE((SELECT MAX(id) FROM \"{}\"), 0) + 1, false)",
                    fixture.table
                );
                sqlx::query(&reset).bind(&fixture.table).execute(tx.as_mut()).await?;
            }
            debug!(table = %fixture.table, rows = fixture.rows.len(), "fixture loaded");
        }
        tx.commit().await?;
        Ok(())
    }
}

fn read_table_file(path: &Path) -> Result<TableFixture, FixtureError> {
    let table = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| FixtureError::InvalidIdentifier(path.display().to_string()))?;
    let source = std::fs::read_to_string(path).map_err(|source| FixtureError::Io { path: path.to_path_buf(), source })?;
    TableFixture::parse(table, &source)
}

/// Number of rows in `table`, optionally restricted to `column = value`.
///
/// # Errors
///
/// Returns an error for invalid identifiers or a failed query.
pub async fn count_rows(pool: &PgPool, table: &str, filter: Option<(&str, i64)>) -> Result<i64, FixtureError> {
    ensure_identifier(table)?;
    let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM \"{table}\""));
    if let Some((column, value)) = filter {
        ensure_identifier(column)?;
        builder.push(format!(" WHERE \"{column}\" = "));
        builder.push_bind(value);
    }
    let (count,): (i64,) = builder.build_query_as().fetch_one(pool).await?;
    Ok(count)
}

#[cfg(test)]
#[path = "fixtures_test.rs"]
mod tests;

//! Database adapter layer.
//!
//! Adapters translate destination-neutral schema descriptions into
//! destination-specific DDL/DML strings and drive the CSV-based bulk
//! merge-upsert. There are exactly two families: a relational row store
//! ([`PostgresAdapter`]) and a warehouse ([`SnowflakeAdapter`]); selection is
//! purely by destination URL scheme via [`adapter_for`].

pub mod identifiers;
mod postgres;
mod snowflake;

use std::path::Path;

use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use url::Url;

use crate::bail;
use crate::connections::DestinationConnection;
use crate::error::{ErrorKind, SyncResult};

pub use postgres::PostgresAdapter;
pub use snowflake::SnowflakeAdapter;

/// URL schemes routed to [`PostgresAdapter`].
pub const POSTGRES_SCHEMES: &[&str] = &["postgres", "postgresql"];

/// URL schemes routed to [`SnowflakeAdapter`].
pub const SNOWFLAKE_SCHEMES: &[&str] = &["snowflake"];

/// Length of the random suffix appended to staging table names.
const STAGING_SUFFIX_LEN: usize = 8;

/// A destination namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSpec {
    pub name: String,
}

/// A destination table, qualified by its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub schema: String,
    pub name: String,
}

/// Adapter-neutral column types.
///
/// These cover exactly what the upstream replicator produces: a numeric
/// primary key, text remote keys, denormalized scalar columns, and one
/// structured catch-all column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    BigInt,
    Integer,
    Boolean,
    Text,
    DoublePrecision,
    TimestampTz,
    Date,
    Json,
}

/// A destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
}

impl ColumnSpec {
    /// A nullable, non-unique column of the given kind.
    pub fn plain(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            unique: false,
            primary_key: false,
        }
    }

    /// A non-null primary key column of the given kind.
    pub fn primary_key(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            unique: false,
            primary_key: true,
        }
    }
}

/// A secondary index over one or more columns of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub table: TableSpec,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Partitioning strategy for destinations that support table partitioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionSpec {
    Hash { column: String },
    Range { column: String },
}

/// Contract implemented once per destination family.
///
/// DDL builders are pure: they validate identifiers and return SQL strings
/// without touching the network. [`DatabaseAdapter::merge_from_csv`] is the
/// only operation that executes against a live connection.
#[async_trait]
pub trait DatabaseAdapter: std::fmt::Debug + Send + Sync {
    /// Human-readable family name, used in logs.
    fn name(&self) -> &'static str;

    /// Returns DDL creating a namespace.
    fn create_schema(&self, schema: &SchemaSpec, if_not_exists: bool) -> SyncResult<String>;

    /// Returns DDL creating a table with the given columns.
    fn create_table(
        &self,
        table: &TableSpec,
        columns: &[ColumnSpec],
        if_not_exists: bool,
        partition: Option<&PartitionSpec>,
    ) -> SyncResult<String>;

    /// Returns DDL statements creating a secondary index.
    ///
    /// Destination families without a first-class index concept return an
    /// [`ErrorKind::IndexesNotSupported`] error rather than a no-op.
    fn create_index(&self, index: &IndexSpec, concurrently: bool) -> SyncResult<Vec<String>>;

    /// Returns DDL adding a column to an existing table.
    ///
    /// Destination tables only ever evolve additively; columns are never
    /// dropped or retyped by this engine.
    fn add_column(
        &self,
        table: &TableSpec,
        column: &ColumnSpec,
        if_not_exists: bool,
    ) -> SyncResult<String>;

    /// Trivial statement used by the connection layer to verify liveness.
    fn verify_statement(&self) -> &'static str {
        "SELECT 1"
    }

    /// Bulk merge-upserts the CSV file into the destination table.
    ///
    /// The procedure stages the CSV into a randomly-suffixed staging table,
    /// updates destination rows whose primary key already exists, and inserts
    /// the rest. Returns the number of rows staged.
    async fn merge_from_csv(
        &self,
        connection: &dyn DestinationConnection,
        csv_path: &Path,
        table: &TableSpec,
        primary_key: &str,
        columns: &[ColumnSpec],
    ) -> SyncResult<u64>;
}

/// Selects the adapter for a destination URL, purely on its scheme.
///
/// An unrecognized scheme is a hard configuration error enumerating the
/// supported schemes.
pub fn adapter_for(url: &Url) -> SyncResult<&'static dyn DatabaseAdapter> {
    static POSTGRES: PostgresAdapter = PostgresAdapter;
    static SNOWFLAKE: SnowflakeAdapter = SnowflakeAdapter;

    let scheme = url.scheme();
    if POSTGRES_SCHEMES.contains(&scheme) {
        return Ok(&POSTGRES);
    }
    if SNOWFLAKE_SCHEMES.contains(&scheme) {
        return Ok(&SNOWFLAKE);
    }

    bail!(
        ErrorKind::UnsupportedScheme,
        "Destination URL scheme has no adapter",
        format!(
            "'{scheme}' is not a supported database scheme; supported schemes are: {}, {}",
            POSTGRES_SCHEMES.join(", "),
            SNOWFLAKE_SCHEMES.join(", ")
        )
    );
}

/// Returns a staging table name derived from the destination table.
///
/// The suffix is random so concurrent syncs sharing a connection never
/// collide on staging names. The result still satisfies the identifier rule.
pub(crate) fn staging_table_name(table: &TableSpec) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .filter(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        .take(STAGING_SUFFIX_LEN)
        .map(char::from)
        .collect();

    format!("{}_staging_{}", table.name, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_on_scheme() {
        let url = Url::parse("postgres://u:p@localhost/db").unwrap();
        assert_eq!(adapter_for(&url).unwrap().name(), "postgres");

        let url = Url::parse("postgresql://localhost/db").unwrap();
        assert_eq!(adapter_for(&url).unwrap().name(), "postgres");

        let url = Url::parse("snowflake://acme.snowflakecomputing.com/db").unwrap();
        assert_eq!(adapter_for(&url).unwrap().name(), "snowflake");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let url = Url::parse("mysql://localhost/db").unwrap();
        let err = adapter_for(&url).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedScheme);
        assert!(err.detail().unwrap().contains("postgres"));
        assert!(err.detail().unwrap().contains("snowflake"));
    }

    #[test]
    fn staging_names_are_unpredictable_and_valid() {
        let table = TableSpec {
            schema: "public".into(),
            name: "events".into(),
        };

        let a = staging_table_name(&table);
        let b = staging_table_name(&table);
        assert_ne!(a, b);
        identifiers::validate_identifier(&a).unwrap();
        assert!(a.starts_with("events_staging_"));
    }
}

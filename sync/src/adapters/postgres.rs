//! Adapter for relational row-store destinations speaking the Postgres dialect.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::adapters::identifiers::quoted;
use crate::adapters::{
    ColumnKind, ColumnSpec, DatabaseAdapter, IndexSpec, PartitionSpec, SchemaSpec, TableSpec,
    staging_table_name,
};
use crate::connections::DestinationConnection;
use crate::error::SyncResult;

/// Relational row-store adapter.
///
/// Emits Postgres DDL and merges CSV exports through a `TEMP` staging table
/// bulk-loaded with `COPY`.
#[derive(Debug)]
pub struct PostgresAdapter;

impl PostgresAdapter {
    fn sql_type(kind: ColumnKind) -> &'static str {
        match kind {
            ColumnKind::BigInt => "bigint",
            ColumnKind::Integer => "integer",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Text => "text",
            ColumnKind::DoublePrecision => "double precision",
            ColumnKind::TimestampTz => "timestamptz",
            ColumnKind::Date => "date",
            ColumnKind::Json => "jsonb",
        }
    }

    fn qualified(table: &TableSpec) -> SyncResult<String> {
        Ok(format!(
            "{}.{}",
            quoted(&table.schema)?,
            quoted(&table.name)?
        ))
    }

    fn column_definition(column: &ColumnSpec) -> SyncResult<String> {
        let mut definition = format!(
            "{} {}",
            quoted(&column.name)?,
            Self::sql_type(column.kind)
        );

        if column.primary_key {
            definition.push_str(" PRIMARY KEY");
        } else {
            if !column.nullable {
                definition.push_str(" NOT NULL");
            }
            if column.unique {
                definition.push_str(" UNIQUE");
            }
        }

        Ok(definition)
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn create_schema(&self, schema: &SchemaSpec, if_not_exists: bool) -> SyncResult<String> {
        Ok(format!(
            "CREATE SCHEMA{} {}",
            if if_not_exists { " IF NOT EXISTS" } else { "" },
            quoted(&schema.name)?
        ))
    }

    fn create_table(
        &self,
        table: &TableSpec,
        columns: &[ColumnSpec],
        if_not_exists: bool,
        partition: Option<&PartitionSpec>,
    ) -> SyncResult<String> {
        let definitions = columns
            .iter()
            .map(Self::column_definition)
            .collect::<SyncResult<Vec<_>>>()?;

        let mut ddl = format!(
            "CREATE TABLE{} {} ({})",
            if if_not_exists { " IF NOT EXISTS" } else { "" },
            Self::qualified(table)?,
            definitions.join(", ")
        );

        if let Some(partition) = partition {
            let clause = match partition {
                PartitionSpec::Hash { column } => {
                    format!(" PARTITION BY HASH ({})", quoted(column)?)
                }
                PartitionSpec::Range { column } => {
                    format!(" PARTITION BY RANGE ({})", quoted(column)?)
                }
            };
            ddl.push_str(&clause);
        }

        Ok(ddl)
    }

    fn create_index(&self, index: &IndexSpec, concurrently: bool) -> SyncResult<Vec<String>> {
        let columns = index
            .columns
            .iter()
            .map(|column| quoted(column).map(|q| q.into_owned()))
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(vec![format!(
            "CREATE{} INDEX{} IF NOT EXISTS {} ON {} ({})",
            if index.unique { " UNIQUE" } else { "" },
            if concurrently { " CONCURRENTLY" } else { "" },
            quoted(&index.name)?,
            Self::qualified(&index.table)?,
            columns.join(", ")
        )])
    }

    fn add_column(
        &self,
        table: &TableSpec,
        column: &ColumnSpec,
        if_not_exists: bool,
    ) -> SyncResult<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN{} {} {}",
            Self::qualified(table)?,
            if if_not_exists { " IF NOT EXISTS" } else { "" },
            quoted(&column.name)?,
            Self::sql_type(column.kind)
        ))
    }

    async fn merge_from_csv(
        &self,
        connection: &dyn DestinationConnection,
        csv_path: &Path,
        table: &TableSpec,
        primary_key: &str,
        columns: &[ColumnSpec],
    ) -> SyncResult<u64> {
        let destination = Self::qualified(table)?;
        let pk = quoted(primary_key)?.into_owned();

        let staging = staging_table_name(table);
        let staging_quoted = quoted(&staging)?.into_owned();

        let column_names = columns
            .iter()
            .map(|column| quoted(&column.name).map(|q| q.into_owned()))
            .collect::<SyncResult<Vec<_>>>()?;

        connection
            .execute(&format!(
                "CREATE TEMP TABLE {staging_quoted} (LIKE {destination} INCLUDING DEFAULTS)"
            ))
            .await?;

        let merge_result: SyncResult<u64> = async {
            let staged = connection
                .load_csv(&staging_quoted, &column_names, csv_path)
                .await?;

            let assignments: Vec<String> = column_names
                .iter()
                .filter(|name| **name != pk)
                .map(|name| format!("{name} = stg.{name}"))
                .collect();

            // A table whose only column is the primary key has nothing to update.
            if !assignments.is_empty() {
                connection
                    .execute(&format!(
                        "UPDATE {destination} AS dst SET {} FROM {staging_quoted} AS stg \
                         WHERE dst.{pk} = stg.{pk}",
                        assignments.join(", ")
                    ))
                    .await?;
            }

            let column_list = column_names.join(", ");
            let select_list = column_names
                .iter()
                .map(|name| format!("stg.{name}"))
                .collect::<Vec<_>>()
                .join(", ");

            connection
                .execute(&format!(
                    "INSERT INTO {destination} ({column_list}) \
                     SELECT {select_list} FROM {staging_quoted} AS stg \
                     LEFT JOIN {destination} AS dst ON dst.{pk} = stg.{pk} \
                     WHERE dst.{pk} IS NULL"
                ))
                .await?;

            Ok(staged)
        }
        .await;

        // The staging table dies with the session, but cached connections are
        // long-lived, so drop it eagerly on both paths.
        let drop_result = connection
            .execute(&format!("DROP TABLE IF EXISTS {staging_quoted}"))
            .await;
        if let Err(drop_err) = drop_result {
            warn!(staging = %staging, error = %drop_err, "failed to drop staging table");
        }

        let staged = merge_result?;
        debug!(table = %destination, rows = staged, "merged csv into destination");

        Ok(staged)
    }
}

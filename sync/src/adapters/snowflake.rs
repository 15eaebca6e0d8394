//! Adapter for warehouse destinations speaking the Snowflake dialect.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::adapters::identifiers::quoted;
use crate::adapters::{
    ColumnKind, ColumnSpec, DatabaseAdapter, IndexSpec, PartitionSpec, SchemaSpec, TableSpec,
    staging_table_name,
};
use crate::connections::DestinationConnection;
use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// Warehouse adapter.
///
/// Emits Snowflake DDL. Bulk merges go through a temporary staging table whose
/// table stage receives the CSV via `PUT` before a `COPY INTO`; the staged
/// file is removed afterward even when the merge fails.
#[derive(Debug)]
pub struct SnowflakeAdapter;

impl SnowflakeAdapter {
    fn sql_type(kind: ColumnKind) -> &'static str {
        match kind {
            ColumnKind::BigInt => "BIGINT",
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Boolean => "BOOLEAN",
            ColumnKind::Text => "TEXT",
            ColumnKind::DoublePrecision => "DOUBLE",
            ColumnKind::TimestampTz => "TIMESTAMP_TZ",
            ColumnKind::Date => "DATE",
            ColumnKind::Json => "VARIANT",
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

        // Snowflake treats PRIMARY KEY and UNIQUE as informational
        // constraints; they are still emitted for schema fidelity.
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
impl DatabaseAdapter for SnowflakeAdapter {
    fn name(&self) -> &'static str {
        "snowflake"
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

        // The warehouse has no table partitioning; a partition column maps to
        // a clustering key, which serves the same pruning purpose.
        if let Some(partition) = partition {
            let column = match partition {
                PartitionSpec::Hash { column } | PartitionSpec::Range { column } => column,
            };
            ddl.push_str(&format!(" CLUSTER BY ({})", quoted(column)?));
        }

        Ok(ddl)
    }

    fn create_index(&self, _index: &IndexSpec, _concurrently: bool) -> SyncResult<Vec<String>> {
        bail!(
            ErrorKind::IndexesNotSupported,
            "Snowflake destinations do not support secondary indexes"
        );
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
        let staging_qualified = format!("{}.{}", quoted(&table.schema)?, quoted(&staging)?);
        // Table stage of the staging table; unique per merge because the
        // staging name is.
        let stage = format!("@%{staging}");

        let column_names = columns
            .iter()
            .map(|column| quoted(&column.name).map(|q| q.into_owned()))
            .collect::<SyncResult<Vec<_>>>()?;

        connection
            .execute(&format!(
                "CREATE TEMPORARY TABLE {staging_qualified} LIKE {destination}"
            ))
            .await?;

        let merge_result: SyncResult<u64> = async {
            connection.stage_put(&stage, csv_path).await?;

            let staged = connection
                .execute(&format!(
                    "COPY INTO {staging_qualified} FROM {stage} \
                     FILE_FORMAT = (TYPE = CSV FIELD_OPTIONALLY_ENCLOSED_BY = '\"' SKIP_HEADER = 1)"
                ))
                .await?;

            let assignments: Vec<String> = column_names
                .iter()
                .filter(|name| **name != pk)
                .map(|name| format!("{name} = stg.{name}"))
                .collect();

            if !assignments.is_empty() {
                connection
                    .execute(&format!(
                        "UPDATE {destination} AS dst SET {} FROM {staging_qualified} AS stg \
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
                     SELECT {select_list} FROM {staging_qualified} AS stg \
                     LEFT JOIN {destination} AS dst ON dst.{pk} = stg.{pk} \
                     WHERE dst.{pk} IS NULL"
                ))
                .await?;

            Ok(staged)
        }
        .await;

        // Cleanup runs on both paths: the staged file first, then the
        // staging table itself.
        if let Err(remove_err) = connection.stage_remove(&stage).await {
            warn!(stage = %stage, error = %remove_err, "failed to remove staged file");
        }
        if let Err(drop_err) = connection
            .execute(&format!("DROP TABLE IF EXISTS {staging_qualified}"))
            .await
        {
            warn!(staging = %staging, error = %drop_err, "failed to drop staging table");
        }

        let staged = merge_result?;
        debug!(table = %destination, rows = staged, "merged csv into warehouse destination");

        Ok(staged)
    }
}

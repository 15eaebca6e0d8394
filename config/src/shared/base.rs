use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The destination schema name is empty.
    #[error("`default_schema` cannot be empty")]
    DefaultSchemaEmpty,
    /// The maximum sync period cannot be zero.
    #[error("`max_period_secs` cannot be zero")]
    MaxPeriodZero,
    /// The connection prune interval cannot be zero.
    #[error("`prune_interval_secs` cannot be zero")]
    PruneIntervalZero,
    /// The rolling statistics cap cannot be zero.
    #[error("`stats_cap` cannot be zero")]
    StatsCapZero,
    /// Generic constraint violation on a named field.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}

use crate::import::Issue;
use crate::model::EntityType;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("{entity} {import_key}: required reference {field} points to missing {target} key {key:?}")]
    UnresolvedReference {
        entity: EntityType,
        import_key: String,
        field: &'static str,
        target: EntityType,
        key: String,
    },

    #[error("{entity} key {import_key} is already registered to {existing}")]
    DuplicateRegistration {
        entity: EntityType,
        import_key: String,
        existing: String,
    },

    #[error("store returned {got} records for a batch of {expected} {entity}")]
    CorrelationMismatch {
        entity: EntityType,
        expected: usize,
        got: usize,
    },

    #[error("store echoed unknown {entity} key {key:?}")]
    UnknownCorrelation { entity: EntityType, key: String },

    #[error("store echoed {entity} key {key:?} more than once")]
    DuplicateCorrelation { entity: EntityType, key: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("validation found {} blocking issue(s)", .0.len())]
    Validation(Vec<Issue>),

    #[error(
        "step {step} failed: {message}; completed steps stay in the store and re-running \
         the import will create them again"
    )]
    StepFailed {
        step: &'static str,
        message: String,
        completed: Vec<&'static str>,
    },

    #[error("import cancelled before step {next}")]
    Cancelled {
        next: &'static str,
        completed: Vec<&'static str>,
    },

    #[error("archive {fingerprint} was already imported into this store")]
    AlreadyImported { fingerprint: String },

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MigrateError>;

impl MigrateError {
    /// Stable code for request responses.
    pub fn code(&self) -> &'static str {
        match self {
            MigrateError::UnresolvedReference { .. } => "unresolved_reference",
            MigrateError::DuplicateRegistration { .. } => "duplicate_key",
            MigrateError::CorrelationMismatch { .. }
            | MigrateError::UnknownCorrelation { .. }
            | MigrateError::DuplicateCorrelation { .. } => "correlation_mismatch",
            MigrateError::Store(_) => "store_failed",
            MigrateError::Validation(_) => "validation_failed",
            MigrateError::StepFailed { .. } => "step_failed",
            MigrateError::Cancelled { .. } => "cancelled",
            MigrateError::AlreadyImported { .. } => "already_imported",
            MigrateError::Pool(_) => "pool_failed",
            MigrateError::Csv(_) => "csv_failed",
            MigrateError::Json(_) => "json_failed",
        }
    }
}

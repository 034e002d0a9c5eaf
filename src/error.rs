use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowgateErrorCode {
    InvalidConfig,
    InvalidRule,
    PermissionDenied,
    NeedReload,
    NoActiveBroadcast,
    TableNotFound,
    ColumnNotFound,
    Fetch,
    Predicate,
}

impl RowgateErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RowgateErrorCode::InvalidConfig => "invalid_config",
            RowgateErrorCode::InvalidRule => "invalid_rule",
            RowgateErrorCode::PermissionDenied => "permission_denied",
            RowgateErrorCode::NeedReload => "need_reload",
            RowgateErrorCode::NoActiveBroadcast => "no_active_broadcast",
            RowgateErrorCode::TableNotFound => "table_not_found",
            RowgateErrorCode::ColumnNotFound => "column_not_found",
            RowgateErrorCode::Fetch => "fetch",
            RowgateErrorCode::Predicate => "predicate",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RowgateError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid rule on {scope}: {message}")]
    InvalidRule { scope: String, message: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The recipient's schema view has diverged; the broadcast loop must drop
    /// the outgoing stream for this session and request a full resync.
    #[error("client schema view diverged; full reload required")]
    NeedReload,
    #[error("no broadcast in progress")]
    NoActiveBroadcast,
    #[error("table '{0}' not found")]
    TableNotFound(String),
    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },
    #[error("store fetch failed: {0}")]
    Fetch(String),
    #[error("predicate error: {0}")]
    Predicate(String),
}

impl RowgateError {
    pub fn code(&self) -> RowgateErrorCode {
        match self {
            RowgateError::InvalidConfig(_) => RowgateErrorCode::InvalidConfig,
            RowgateError::InvalidRule { .. } => RowgateErrorCode::InvalidRule,
            RowgateError::PermissionDenied(_) => RowgateErrorCode::PermissionDenied,
            RowgateError::NeedReload => RowgateErrorCode::NeedReload,
            RowgateError::NoActiveBroadcast => RowgateErrorCode::NoActiveBroadcast,
            RowgateError::TableNotFound(_) => RowgateErrorCode::TableNotFound,
            RowgateError::ColumnNotFound { .. } => RowgateErrorCode::ColumnNotFound,
            RowgateError::Fetch(_) => RowgateErrorCode::Fetch,
            RowgateError::Predicate(_) => RowgateErrorCode::Predicate,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}

use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] finsight_core::ValidationError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Engine(#[from] finsight_core::EngineError),

    #[error(transparent)]
    Warehouse(#[from] finsight_warehouse::WarehouseError),

    #[error("{path}:{line}: {message}")]
    HistoryFile {
        path: String,
        line: usize,
        message: String,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Command(_) => 2,
            Self::Engine(_) => 3,
            Self::Serialization(_) => 4,
            Self::HistoryFile { .. } => 6,
            Self::Warehouse(_) => 7,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_category() {
        let validation = CliError::from(finsight_core::ValidationError::EmptyInstrumentId);
        assert_eq!(validation.exit_code(), 2);

        let engine = CliError::from(finsight_core::EngineError::BackfillRunFailed { attempted: 2 });
        assert_eq!(engine.exit_code(), 3);

        let file = CliError::HistoryFile {
            path: "SPY.csv".to_string(),
            line: 4,
            message: "bad date".to_string(),
        };
        assert_eq!(file.exit_code(), 6);
        assert_eq!(file.to_string(), "SPY.csv:4: bad date");
    }
}

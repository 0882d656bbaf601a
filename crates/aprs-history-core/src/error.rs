use std::fmt;

/// Machine-readable error codes attached to log events as the `code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    StoreOpenError,
    UpstreamParseFailure,
    ValidationRejection,
    StoreReadError,
    StoreWriteError,
    TrimError,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::StoreOpenError => "E1002",
            Self::UpstreamParseFailure => "E2001",
            Self::ValidationRejection => "E2002",
            Self::StoreReadError => "E3001",
            Self::StoreWriteError => "E3002",
            Self::TrimError => "E3003",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Configuration file parse error",
            Self::StoreOpenError => "History store could not be opened",
            Self::UpstreamParseFailure => "Upstream message could not be decoded",
            Self::ValidationRejection => "Report rejected by filters",
            Self::StoreReadError => "History lookup failed",
            Self::StoreWriteError => "History write failed",
            Self::TrimError => "History retention trim failed",
        }
    }

    /// Whether the process has to stop when this error occurs.
    ///
    /// Everything on the per-report path is survivable; only startup
    /// collaborators are fatal.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::ConfigParseError | Self::StoreOpenError)
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix the YAML syntax or values in the configuration file."),
            Self::StoreOpenError => Some("Check the database path and its directory permissions."),
            Self::UpstreamParseFailure | Self::ValidationRejection => None,
            Self::StoreReadError | Self::StoreWriteError => {
                Some("Check disk space and whether another process holds a write lock.")
            }
            Self::TrimError => Some("Trimming is retried on the next interval; run `trim` manually to inspect."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Write mode is disabled; mutating requests are rejected")]
    ReadOnly,

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Status class surfaced to callers of the request/response surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorStatus {
    pub fn code(self) -> u16 {
        match self {
            ErrorStatus::BadRequest => 400,
            ErrorStatus::Forbidden => 403,
            ErrorStatus::NotFound => 404,
            ErrorStatus::Conflict => 409,
            ErrorStatus::Internal => 500,
        }
    }
}

impl Error {
    pub fn status(&self) -> ErrorStatus {
        match self {
            Error::Validation(_) => ErrorStatus::BadRequest,
            Error::ReadOnly => ErrorStatus::Forbidden,
            Error::NotFound(_) => ErrorStatus::NotFound,
            Error::Conflict(_) | Error::Cancelled => ErrorStatus::Conflict,
            Error::Io(_) | Error::Config(_) | Error::Database(_) | Error::Other(_) => {
                ErrorStatus::Internal
            }
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::ReadOnly.status().code(), 403);
        assert_eq!(Error::Conflict("scan running".into()).status().code(), 409);
        assert_eq!(Error::Validation("bad id".into()).status().code(), 400);
        assert_eq!(Error::NotFound("item 3".into()).status().code(), 404);
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.status(), ErrorStatus::Internal);
    }
}

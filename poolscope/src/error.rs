//! Error types shared across the crate.

use std::fmt;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure talking to an HTTP service.
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered, but not with a success status.
    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),

    /// Response body was not valid JSON.
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    /// An environment setting could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Dashboard data sections that fail independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Pools,
    Blocks,
    Payments,
    Miner,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Pools => "pool list",
            Section::Blocks => "blocks",
            Section::Payments => "payments",
            Section::Miner => "miner statistics",
        };
        f.write_str(name)
    }
}

impl Error {
    /// User-facing message shown in place of a section's data.
    ///
    /// The raw error is for logs only; the advisory never includes it.
    pub fn advisory(&self, section: Section) -> String {
        match self {
            Error::Status(status) if status.as_u16() == 404 => {
                format!("The {section} endpoint is unavailable for this pool.")
            }
            Error::Http(e) if e.is_timeout() => {
                format!("The pool API did not answer in time; {section} will retry shortly.")
            }
            Error::Decode(_) => {
                format!("The pool API returned unreadable {section} data.")
            }
            _ => format!("The pool API is unreachable; {section} will retry shortly."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_status_reads_as_unavailable_endpoint() {
        let err = Error::Status(reqwest::StatusCode::NOT_FOUND);
        assert_eq!(
            err.advisory(Section::Payments),
            "The payments endpoint is unavailable for this pool."
        );
    }

    #[test]
    fn advisory_hides_raw_error_text() {
        let err = Error::Other("connection reset by peer".into());
        let advisory = err.advisory(Section::Blocks);
        assert!(!advisory.contains("reset"), "{advisory}");
        assert!(advisory.contains("blocks"));
    }

    #[test]
    fn decode_failure_names_section() {
        let err = Error::from(serde_json::from_str::<u32>("{").unwrap_err());
        assert!(err.advisory(Section::Pools).contains("pool list"));
    }
}

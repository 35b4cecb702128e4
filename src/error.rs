use thiserror::Error;

use crate::shape::ResponseShape;
use crate::util::xml_error_message;

/// Errors returned by every [`Project`](crate::Project) operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any request was built (bad url/token, unknown or non-file field).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A format tag or format/request combination the API does not support.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The server answered with a non-success status, or reported an error in-band.
    #[error("REDCap API request failed (HTTP {status}): {message}")]
    Remote { status: u16, message: String },

    /// The response body does not match the shape the request expected.
    #[error("failed to decode {shape} response: {message}")]
    Decode {
        shape: ResponseShape,
        message: String,
    },

    /// A decoded [`Response`](crate::Response) was asked for a different variant.
    #[error("expected a {expected} response, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    /// Import data could not be serialized into the request body.
    #[error("failed to serialize import data: {0}")]
    Serialization(String),

    #[error("HTTP transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("configuration error: {0:#}")]
    Config(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// Lowercased fragments of the message REDCap sends when form/event mappings are
// requested from a project without events.
// TODO: confirm the exact wording against REDCap 13+ servers.
const NO_EVENTS_MARKERS: &[&str] = &[
    "classic project",
    "no events",
    "not longitudinal",
];

impl Error {
    /// Whether this is the remote failure REDCap returns when a project defines no events.
    pub fn is_no_events(&self) -> bool {
        match self {
            Error::Remote { message, .. } => {
                let message = message.to_lowercase();
                NO_EVENTS_MARKERS.iter().any(|m| message.contains(m))
            }
            _ => false,
        }
    }

    pub(crate) fn decode(shape: ResponseShape, message: impl ToString) -> Self {
        Error::Decode {
            shape,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct RedcapErrorResponse {
    error: String,
}

/// Builds an [`Error::Remote`] from a failed response body.
///
/// REDCap reports failures as `{"error": "..."}` for JSON requests and
/// `<hash><error>...</error></hash>` for XML ones; anything else is kept verbatim.
pub(crate) fn remote_error(status: u16, body: &str) -> Error {
    let message = match serde_json::from_str::<RedcapErrorResponse>(body) {
        Ok(e) => e.error,
        Err(_) => xml_error_message(body)
            .map(str::to_string)
            .unwrap_or_else(|| body.trim().to_string()),
    };
    Error::Remote { status, message }
}

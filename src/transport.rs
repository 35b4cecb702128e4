use reqwest::blocking::Client as HttpClient;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::decode::RawResponse;
use crate::error::{Error, Result, remote_error};
use crate::payload::{FileUpload, Payload, UploadSource};

/// Sends a payload to the API and returns the raw response.
///
/// Implementations turn non-2xx statuses into [`Error::Remote`](crate::Error::Remote)
/// carrying the response body, so callers only ever see successful responses.
pub trait Transport: Send + Sync {
    /// `expects_binary` is set for file exports; headers only need to be kept then.
    ///
    /// The payload is taken by value so an attached file moves into the body.
    fn submit(&self, url: &str, payload: Payload, expects_binary: bool) -> Result<RawResponse>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn submit(&self, url: &str, payload: Payload, expects_binary: bool) -> Result<RawResponse> {
        (**self).submit(url, payload, expects_binary)
    }
}

/// Blocking HTTP transport: form posts, multipart when a file is attached.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(verify_ssl: bool) -> Result<Self> {
        Self::with_timeout(verify_ssl, Duration::from_secs(60))
    }

    pub fn with_timeout(verify_ssl: bool, timeout: Duration) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("redcap-api-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("redcap-api-rs")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(timeout);

        if !verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            http: builder.build()?,
        })
    }
}

impl Transport for HttpTransport {
    fn submit(&self, url: &str, payload: Payload, expects_binary: bool) -> Result<RawResponse> {
        let req = self.http.post(url);
        let (fields, file) = payload.into_parts();
        let req = match file {
            Some(file) => {
                let form = fields
                    .into_iter()
                    .fold(Form::new(), |form, (k, v)| form.text(k, v));
                req.multipart(form.part("file", upload_part(file)?))
            }
            None => req.form(&fields),
        };

        let resp = req.send()?;
        let status = resp.status();
        let headers = if expects_binary {
            resp.headers()
                .iter()
                .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
                .collect()
        } else {
            Vec::new()
        };
        let body = resp.bytes()?.to_vec();
        debug!(status = status.as_u16(), bytes = body.len(), "received response");

        if !status.is_success() {
            return Err(remote_error(
                status.as_u16(),
                &String::from_utf8_lossy(&body),
            ));
        }

        Ok(RawResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

fn upload_part(file: FileUpload) -> Result<Part> {
    let part = match file.source {
        UploadSource::Bytes(bytes) => Part::bytes(bytes),
        UploadSource::Path(path) => Part::file(&path).map_err(|e| {
            Error::Precondition(format!("failed to open {}: {e}", path.display()))
        })?,
    };
    Ok(part.file_name(file.file_name))
}

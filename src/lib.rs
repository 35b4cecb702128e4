//! A small Rust client for the REDCap API.
//!
//! Every call follows the same flow: build a form payload, work out which
//! response shape the request produces, post it, and decode the reply into
//! that shape (JSON, counts, id lists, raw csv/xml text, tables or files).
//!
//! ## Quick start
//! - Configure the API url and token via environment variables (`REDCAP_API_URL`,
//!   `REDCAP_API_TOKEN`) or a `.redcaprc` file (current directory or home directory).
//! - Create a [`Project`] and call its export/import methods.
//!
//! ```no_run
//! use redcap_api::{ExportRecords, Format, Project};
//!
//! fn main() -> redcap_api::Result<()> {
//!     let project = Project::from_env()?;
//!     println!("record id field: {}", project.def_field()?);
//!
//!     let records = project
//!         .export_records(&ExportRecords {
//!             format: Format::Table,
//!             fields: vec!["age".into()],
//!             ..ExportRecords::default()
//!         })?
//!         .into_table()?;
//!     println!("{} row(s)", records.len());
//!     Ok(())
//! }
//! ```
//!
//! Requests can be routed through any [`Transport`]; [`HttpTransport`] is the
//! blocking `reqwest` implementation used by [`Project::new`].

#![forbid(unsafe_code)]

mod client;
mod config;
mod context;
mod decode;
mod error;
mod payload;
mod shape;
mod table;
mod transport;
mod util;

pub use client::{ExportRecords, FileRequest, ImportRecords, Project};
pub use config::ProjectConfig;
pub use context::FieldMetadata;
pub use decode::{FileMap, RawResponse, Response, decode};
pub use error::{Error, Result};
pub use payload::{
    DataType, DateFormat, EVENT_NAME_FIELD, FileUpload, ImportData, Payload, RecordType,
    UploadSource, base_payload, import_payload, record_row_labels,
};
pub use shape::{Format, RequestType, ResponseShape, ReturnContent, resolve, resolve_str};
pub use table::{Row, Table};
pub use transport::{HttpTransport, Transport};

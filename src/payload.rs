//! Request payload construction.
//!
//! A [`Payload`] is the flat string map REDCap expects as a form body, plus an
//! optional file attachment for file imports.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::shape::Format;
use crate::table::Table;

/// Column holding the unique event name in longitudinal record data.
pub const EVENT_NAME_FIELD: &str = "redcap_event_name";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    fields: BTreeMap<String, String>,
    file: Option<FileUpload>,
}

/// A file sent with `content=file&action=import`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub source: UploadSource,
}

/// Where the bytes of an upload come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// Already in memory, moved into the request body.
    Bytes(Vec<u8>),
    /// Read from disk while the request is sent.
    Path(PathBuf),
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            source: UploadSource::Bytes(content.into()),
        }
    }

    /// Uploads the file at `path` under its own file name.
    ///
    /// The file is only checked here; its content is streamed when the
    /// request goes out.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let meta = std::fs::File::open(path)
            .and_then(|f| f.metadata())
            .map_err(|e| Error::Precondition(format!("failed to open {}: {e}", path.display())))?;
        if !meta.is_file() {
            return Err(Error::Precondition(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self {
            file_name,
            source: UploadSource::Path(path.to_path_buf()),
        })
    }
}

impl Payload {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Adds `key[0]`, `key[1]`, ... for each value, as REDCap expects for array parameters.
    pub fn insert_indexed<S: AsRef<str>>(&mut self, key: &str, values: &[S]) {
        for (i, value) in values.iter().enumerate() {
            self.insert(format!("{key}[{i}]"), value.as_ref());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn attach(&mut self, file: FileUpload) {
        self.file = Some(file);
    }

    pub fn file(&self) -> Option<&FileUpload> {
        self.file.as_ref()
    }

    pub fn into_parts(self) -> (BTreeMap<String, String>, Option<FileUpload>) {
        (self.fields, self.file)
    }
}

/// Row layout of exported/imported record data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordType {
    /// One row per record (per event on longitudinal projects).
    #[default]
    Flat,
    /// One row per record, field and value.
    Eav,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Flat => "flat",
            RecordType::Eav => "eav",
        }
    }
}

/// What an import writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Record,
    Metadata,
}

impl DataType {
    pub fn content(self) -> &'static str {
        match self {
            DataType::Record => "record",
            DataType::Metadata => "metadata",
        }
    }
}

/// Date layout of imported values (`dateFormat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFormat {
    #[default]
    Ymd,
    Dmy,
    Mdy,
}

impl DateFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DateFormat::Ymd => "YMD",
            DateFormat::Dmy => "DMY",
            DateFormat::Mdy => "MDY",
        }
    }
}

/// Data handed to an import.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportData {
    /// Structured records, sent as compact JSON.
    Json(Value),
    /// Csv text, sent verbatim.
    Csv(String),
    /// Xml text, sent verbatim.
    Xml(String),
    /// A table, sent as csv.
    Table(Table),
}

impl ImportData {
    /// Format the data goes out in.
    pub fn wire_format(&self) -> Format {
        match self {
            ImportData::Json(_) => Format::Json,
            ImportData::Csv(_) | ImportData::Table(_) => Format::Csv,
            ImportData::Xml(_) => Format::Xml,
        }
    }
}

/// Starts a payload with the keys every request shares.
///
/// `record_type` only applies when `content` is `record`, where `type` is
/// always sent (`flat` unless given).
pub fn base_payload(
    token: &str,
    content: &str,
    format: Option<Format>,
    return_format: Option<Format>,
    record_type: Option<RecordType>,
) -> Payload {
    let mut payload = Payload::default();
    payload.insert("token", token);
    payload.insert("content", content);

    if let Some(format) = format {
        payload.insert("format", format.wire_value());
    }
    if let Some(return_format) = return_format {
        payload.insert("returnFormat", return_format.wire_value());
    }
    if content == "record" {
        payload.insert("type", record_type.unwrap_or_default().as_str());
    }

    payload
}

/// Adds import data to `payload` as `data`, with the matching `format`.
///
/// `row_labels` renames the index columns of tabular data and is ignored for
/// the other variants.
pub fn import_payload(
    mut payload: Payload,
    data: &ImportData,
    row_labels: Option<&[String]>,
) -> Result<Payload> {
    let body = match data {
        ImportData::Table(table) => table.to_csv(row_labels)?,
        ImportData::Json(value) => {
            serde_json::to_string(value).map_err(|e| Error::Serialization(e.to_string()))?
        }
        ImportData::Csv(text) | ImportData::Xml(text) => text.clone(),
    };

    payload.insert("data", body);
    payload.insert("format", data.wire_format().wire_value());
    Ok(payload)
}

/// Index labels for a record table: the record id field, plus the event name
/// on longitudinal projects.
pub fn record_row_labels(default_field: &str, longitudinal: bool) -> Vec<String> {
    let mut labels = vec![default_field.to_string()];
    if longitudinal {
        labels.push(EVENT_NAME_FIELD.to_string());
    }
    labels
}

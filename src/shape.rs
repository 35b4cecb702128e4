//! Response-shape selection.
//!
//! Every request resolves the shape of its response here before it is sent;
//! the decoder then interprets the body according to that shape alone.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Data format of a request or response.
///
/// `Table` is not a wire format: it is sent as `csv` and the text is parsed
/// into a [`Table`](crate::Table) locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Json,
    Csv,
    Xml,
    Table,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Csv => "csv",
            Format::Xml => "xml",
            Format::Table => "df",
        }
    }

    /// Value sent in the `format` / `returnFormat` payload keys.
    pub fn wire_value(self) -> &'static str {
        match self {
            Format::Table => "csv",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Format::Json),
            "csv" => Ok(Format::Csv),
            "xml" => Ok(Format::Xml),
            "df" => Ok(Format::Table),
            other => Err(Error::InvalidFormat(format!("unknown format type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestType {
    #[default]
    Export,
    Import,
    Delete,
}

/// What a record import should report back (`returnContent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReturnContent {
    #[default]
    Count,
    Ids,
    AutoIds,
    Nothing,
}

impl ReturnContent {
    pub fn as_str(self) -> &'static str {
        match self {
            ReturnContent::Count => "count",
            ReturnContent::Ids => "ids",
            ReturnContent::AutoIds => "auto_ids",
            ReturnContent::Nothing => "nothing",
        }
    }
}

impl FromStr for ReturnContent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(ReturnContent::Count),
            "ids" => Ok(ReturnContent::Ids),
            "auto_ids" => Ok(ReturnContent::AutoIds),
            "nothing" => Ok(ReturnContent::Nothing),
            other => Err(Error::InvalidFormat(format!("unknown return content '{other}'"))),
        }
    }
}

/// The shape a response body is decoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseShape {
    /// Parsed JSON, returned as-is.
    JsonRecords,
    /// JSON that is expected to be empty (`[]`); an empty body counts as empty.
    EmptyJson,
    /// A single integer: number of records or fields affected.
    Count,
    /// JSON object mapping keys to integers, e.g. `{"count": 3}`.
    CountMapping,
    /// JSON array of record ids.
    IdList,
    /// Text returned verbatim (csv, xml).
    RawText,
    /// File bytes plus the attributes of the `content-type` header.
    FileMap,
}

impl ResponseShape {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseShape::JsonRecords => "json-records",
            ResponseShape::EmptyJson => "empty-json",
            ResponseShape::Count => "count",
            ResponseShape::CountMapping => "count-mapping",
            ResponseShape::IdList => "id-list",
            ResponseShape::RawText => "raw-text",
            ResponseShape::FileMap => "byte-content-with-headers",
        }
    }
}

impl fmt::Display for ResponseShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Looks up the response shape for a format and request kind.
///
/// `import_subtype` only applies to JSON record imports. File exports and
/// file imports/deletes use fixed shapes and do not go through here.
pub fn resolve(
    format: Format,
    request_type: RequestType,
    import_subtype: Option<ReturnContent>,
) -> Result<ResponseShape> {
    use RequestType::*;
    use ResponseShape::*;

    match (format, request_type, import_subtype) {
        (Format::Csv | Format::Xml | Format::Table, _, _) => Ok(RawText),
        (Format::Json, Export, _) => Ok(JsonRecords),
        (Format::Json, Import | Delete, None) => Ok(Count),
        (Format::Json, Import, Some(ReturnContent::Count | ReturnContent::AutoIds)) => {
            Ok(CountMapping)
        }
        (Format::Json, Import, Some(ReturnContent::Ids)) => Ok(IdList),
        (Format::Json, Import, Some(ReturnContent::Nothing)) => Ok(EmptyJson),
        (Format::Json, Delete, Some(subtype)) => Err(Error::InvalidFormat(format!(
            "return content '{}' only applies to imports",
            subtype.as_str()
        ))),
    }
}

/// [`resolve`] for a format given as a string tag (`json`, `csv`, `xml`, `df`).
pub fn resolve_str(
    format: &str,
    request_type: RequestType,
    import_subtype: Option<ReturnContent>,
) -> Result<ResponseShape> {
    resolve(format.parse()?, request_type, import_subtype)
}

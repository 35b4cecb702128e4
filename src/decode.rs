//! Turning raw transport responses into typed values.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::shape::ResponseShape;
use crate::table::Table;
use crate::util::content_type_attributes;

/// A successful (2xx) response as handed over by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Exported file content with the attributes REDCap sends in `content-type`
/// (`name`, `charset`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMap {
    pub content: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

impl FileMap {
    /// The stored file name, when the server sent one.
    pub fn name(&self) -> Option<&str> {
        self.attributes.get("name").map(String::as_str)
    }
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Json(Value),
    Count(u64),
    CountMapping(BTreeMap<String, u64>),
    Ids(Vec<String>),
    Text(String),
    Table(Table),
    File(FileMap),
}

macro_rules! into_variant {
    ($name:ident, $variant:ident, $ty:ty, $expected:literal) => {
        pub fn $name(self) -> Result<$ty> {
            match self {
                Response::$variant(v) => Ok(v),
                other => Err(Error::UnexpectedResponse {
                    expected: $expected,
                    actual: other.kind(),
                }),
            }
        }
    };
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Json(_) => "json",
            Response::Count(_) => "count",
            Response::CountMapping(_) => "count mapping",
            Response::Ids(_) => "id list",
            Response::Text(_) => "text",
            Response::Table(_) => "table",
            Response::File(_) => "file",
        }
    }

    into_variant!(into_json, Json, Value, "json");
    into_variant!(into_count, Count, u64, "count");
    into_variant!(into_count_mapping, CountMapping, BTreeMap<String, u64>, "count mapping");
    into_variant!(into_ids, Ids, Vec<String>, "id list");
    into_variant!(into_text, Text, String, "text");
    into_variant!(into_table, Table, Table, "table");
    into_variant!(into_file, File, FileMap, "file");

    /// Deserializes a JSON response into typed rows.
    pub fn into_records<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        let value = self.into_json()?;
        serde_json::from_value(value).map_err(|e| Error::decode(ResponseShape::JsonRecords, e))
    }
}

/// Decodes `raw` according to `shape`.
pub fn decode(shape: ResponseShape, raw: RawResponse) -> Result<Response> {
    match shape {
        ResponseShape::JsonRecords => parse_json(shape, &raw).map(Response::Json),
        ResponseShape::EmptyJson => decode_empty_json(&raw),
        ResponseShape::Count => decode_count(&raw),
        ResponseShape::CountMapping => {
            let value = parse_json(shape, &raw)?;
            serde_json::from_value(value)
                .map(Response::CountMapping)
                .map_err(|e| Error::decode(shape, e))
        }
        ResponseShape::IdList => decode_ids(&raw),
        ResponseShape::RawText => String::from_utf8(raw.body)
            .map(Response::Text)
            .map_err(|e| Error::decode(shape, e)),
        ResponseShape::FileMap => {
            let attributes = raw
                .header("content-type")
                .map(content_type_attributes)
                .unwrap_or_default();
            Ok(Response::File(FileMap {
                content: raw.body,
                attributes,
            }))
        }
    }
}

fn parse_json(shape: ResponseShape, raw: &RawResponse) -> Result<Value> {
    let value: Value = serde_json::from_slice(&raw.body).map_err(|e| Error::decode(shape, e))?;

    // REDCap occasionally reports failures with a 2xx status.
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        return Err(Error::Remote {
            status: raw.status,
            message: message.to_string(),
        });
    }

    Ok(value)
}

fn decode_empty_json(raw: &RawResponse) -> Result<Response> {
    if raw.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Response::Json(Value::Array(Vec::new())));
    }
    parse_json(ResponseShape::EmptyJson, raw).map(Response::Json)
}

fn decode_count(raw: &RawResponse) -> Result<Response> {
    let shape = ResponseShape::Count;
    let value = parse_json(shape, raw)?;
    let count = match &value {
        Value::Object(map) => map.get("count").and_then(Value::as_u64),
        other => other.as_u64(),
    };
    count
        .map(Response::Count)
        .ok_or_else(|| Error::decode(shape, format!("expected an integer count, got {value}")))
}

fn decode_ids(raw: &RawResponse) -> Result<Response> {
    let shape = ResponseShape::IdList;
    let value = parse_json(shape, raw)?;
    let Value::Array(items) = value else {
        return Err(Error::decode(shape, format!("expected an array of ids, got {value}")));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(Error::decode(shape, format!("unexpected id {other}"))),
        })
        .collect::<Result<Vec<_>>>()
        .map(Response::Ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(body: &str) -> RawResponse {
        RawResponse::new(200, body)
    }

    #[test]
    fn file_map_reads_content_type_attributes() {
        let raw = ok("hi").with_header("Content-Type", r#"attachment; name="x.txt"; charset=UTF-8"#);
        let file = decode(ResponseShape::FileMap, raw).unwrap().into_file().unwrap();
        assert_eq!(file.content, b"hi");
        assert_eq!(file.attributes.len(), 2);
        assert_eq!(file.name(), Some("x.txt"));
        assert_eq!(file.attributes["charset"], "UTF-8");
    }

    #[test]
    fn file_map_without_content_type_has_no_attributes() {
        let file = decode(ResponseShape::FileMap, ok("raw")).unwrap().into_file().unwrap();
        assert!(file.attributes.is_empty());
    }

    #[test]
    fn empty_json_keeps_empty_sequence() {
        let value = decode(ResponseShape::EmptyJson, ok("[]")).unwrap().into_json().unwrap();
        assert_eq!(value, json!([]));

        let blank = decode(ResponseShape::EmptyJson, ok("")).unwrap().into_json().unwrap();
        assert_eq!(blank, json!([]));
    }

    #[test]
    fn json_records_returned_as_is() {
        let body = r#"[{"field_name":"record_id","field_type":"text"}]"#;
        let value = decode(ResponseShape::JsonRecords, ok(body)).unwrap().into_json().unwrap();
        assert_eq!(value, json!([{ "field_name": "record_id", "field_type": "text" }]));
    }

    #[test]
    fn non_json_body_is_a_decode_error() {
        let err = decode(ResponseShape::JsonRecords, ok("<html>")).unwrap_err();
        assert!(matches!(err, Error::Decode { shape: ResponseShape::JsonRecords, .. }));
    }

    #[test]
    fn in_band_error_is_remote() {
        let err = decode(ResponseShape::JsonRecords, ok(r#"{"error":"bad field"}"#)).unwrap_err();
        assert!(matches!(err, Error::Remote { status: 200, ref message } if message == "bad field"));
    }

    #[test]
    fn count_accepts_bare_integer_and_object() {
        assert_eq!(decode(ResponseShape::Count, ok("4")).unwrap(), Response::Count(4));
        assert_eq!(
            decode(ResponseShape::Count, ok(r#"{"count": 2}"#)).unwrap(),
            Response::Count(2)
        );
        assert!(decode(ResponseShape::Count, ok(r#""four""#)).is_err());
    }

    #[test]
    fn count_mapping_and_ids() {
        let mapping = decode(ResponseShape::CountMapping, ok(r#"{"count":3}"#))
            .unwrap()
            .into_count_mapping()
            .unwrap();
        assert_eq!(mapping["count"], 3);

        let ids = decode(ResponseShape::IdList, ok(r#"["1", 2]"#)).unwrap().into_ids().unwrap();
        assert_eq!(ids, ["1", "2"]);
    }

    #[test]
    fn raw_text_is_verbatim() {
        let text = "record_id,age\n1,32\n";
        assert_eq!(
            decode(ResponseShape::RawText, ok(text)).unwrap(),
            Response::Text(text.to_string())
        );
    }

    #[test]
    fn wrong_accessor_reports_both_kinds() {
        let err = Response::Count(1).into_text().unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedResponse { expected: "text", actual: "count" }
        ));
    }
}

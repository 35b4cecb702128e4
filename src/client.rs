use std::fmt;

use tracing::debug;

use crate::config::{ProjectConfig, load_config, validate_url_and_token};
use crate::context::{FieldMetadata, ProjectContext};
use crate::decode::{FileMap, Response, decode};
use crate::error::{Error, Result};
use crate::payload::{
    DataType, DateFormat, FileUpload, ImportData, Payload, RecordType, base_payload,
    import_payload, record_row_labels,
};
use crate::shape::{Format, RequestType, ResponseShape, ReturnContent, resolve};
use crate::table::Table;
use crate::transport::{HttpTransport, Transport};

/// Endpoint, credentials and transport shared by every request of a project.
pub(crate) struct Api {
    url: String,
    token: String,
    transport: Box<dyn Transport>,
}

impl Api {
    pub(crate) fn new(url: String, token: String, transport: Box<dyn Transport>) -> Self {
        Self {
            url,
            token,
            transport,
        }
    }

    pub(crate) fn payload(
        &self,
        content: &str,
        format: Option<Format>,
        return_format: Option<Format>,
        record_type: Option<RecordType>,
    ) -> Payload {
        base_payload(&self.token, content, format, return_format, record_type)
    }

    /// Submits `payload` and decodes the response as `shape`.
    pub(crate) fn call(&self, payload: Payload, shape: ResponseShape) -> Result<Response> {
        debug!(
            content = payload.get("content").unwrap_or_default(),
            action = payload.get("action").unwrap_or_default(),
            format = payload.get("format").unwrap_or_default(),
            shape = %shape,
            attachment = payload.file().is_some(),
            "submitting REDCap API request"
        );
        let raw = self
            .transport
            .submit(&self.url, payload, shape == ResponseShape::FileMap)?;
        decode(shape, raw)
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// A REDCap project, reached through its API url and token.
#[derive(Debug)]
pub struct Project {
    api: Api,
    context: ProjectContext,
}

/// Record export filters. Empty lists mean "everything".
#[derive(Debug, Clone, Default)]
pub struct ExportRecords {
    pub format: Format,
    pub record_type: RecordType,
    pub records: Vec<String>,
    pub fields: Vec<String>,
    pub forms: Vec<String>,
    pub events: Vec<String>,
}

/// Record import options.
#[derive(Debug, Clone, Default)]
pub struct ImportRecords {
    pub return_format: Format,
    pub return_content: ReturnContent,
    /// Blank values overwrite existing data (`overwriteBehavior=overwrite`).
    pub overwrite: bool,
    pub force_auto_number: bool,
    pub date_format: DateFormat,
    pub record_type: RecordType,
}

/// Identifies one file field value.
#[derive(Debug, Clone, Default)]
pub struct FileRequest {
    pub record: String,
    pub field: String,
    /// Unique event name, for longitudinal projects.
    pub event: Option<String>,
    /// Instance of a repeating instrument or event. `Some(0)` is not sent.
    pub repeat_instance: Option<u32>,
}

impl FileRequest {
    pub fn new(record: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            field: field.into(),
            ..Self::default()
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_repeat_instance(mut self, instance: u32) -> Self {
        self.repeat_instance = Some(instance);
        self
    }
}

impl Project {
    /// Creates a project using environment variables and/or `.redcaprc`.
    ///
    /// This is equivalent to `Project::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a project using (in order of precedence):
    /// - explicit `url`/`token` arguments
    /// - environment variables `REDCAP_API_URL` / `REDCAP_API_TOKEN`
    /// - config file from `REDCAP_RC` or `.redcaprc`
    pub fn new(url: Option<String>, token: Option<String>, verify: Option<bool>) -> Result<Self> {
        let cfg = load_config(url, token, verify).map_err(Error::Config)?;
        Self::from_config(cfg)
    }

    /// Creates a project over HTTP from an already resolved configuration.
    pub fn from_config(cfg: ProjectConfig) -> Result<Self> {
        validate_url_and_token(&cfg.url, &cfg.token)?;
        let transport = HttpTransport::new(cfg.verify)?;
        Self::with_transport(cfg.url, cfg.token, transport)
    }

    /// Creates a project that sends its requests through `transport`.
    pub fn with_transport(
        url: impl Into<String>,
        token: impl Into<String>,
        transport: impl Transport + 'static,
    ) -> Result<Self> {
        let url = url.into();
        let token = token.into();
        validate_url_and_token(&url, &token)?;
        Ok(Self {
            api: Api::new(url, token, Box::new(transport)),
            context: ProjectContext::default(),
        })
    }

    pub fn url(&self) -> &str {
        &self.api.url
    }

    pub fn token(&self) -> &str {
        &self.api.token
    }

    /// The project's data dictionary, fetched on first use.
    pub fn metadata(&self) -> Result<&[FieldMetadata]> {
        self.context.metadata(&self.api)
    }

    pub fn field_names(&self) -> Result<&[String]> {
        self.context.field_names(&self.api)
    }

    /// The record id field (first field of the data dictionary).
    pub fn def_field(&self) -> Result<&str> {
        self.context.default_field(&self.api)
    }

    pub fn is_longitudinal(&self) -> Result<bool> {
        self.context.is_longitudinal(&self.api)
    }

    /// Exports the data dictionary, optionally limited to some fields or forms.
    ///
    /// [`Format::Table`] returns a [`Response::Table`] indexed on `field_name`.
    pub fn export_metadata(
        &self,
        format: Format,
        fields: &[&str],
        forms: &[&str],
    ) -> Result<Response> {
        let mut payload = self.api.payload("metadata", Some(format), None, None);
        payload.insert_indexed("fields", fields);
        payload.insert_indexed("forms", forms);

        let shape = resolve(format, RequestType::Export, None)?;
        let response = self.api.call(payload, shape)?;
        into_format(response, format, &["field_name"])
    }

    /// Imports a data dictionary. Returns the number of fields imported for
    /// JSON, or the raw server reply for csv/xml.
    pub fn import_metadata(
        &self,
        data: &ImportData,
        return_format: Format,
        date_format: DateFormat,
    ) -> Result<Response> {
        let base = self
            .api
            .payload(DataType::Metadata.content(), None, Some(return_format), None);
        let mut payload = import_payload(base, data, None)?;
        payload.insert("dateFormat", date_format.as_str());

        let shape = resolve(return_format, RequestType::Import, None)?;
        self.api.call(payload, shape)
    }

    /// Exports records.
    ///
    /// [`Format::Table`] returns a table indexed on the record id field, plus
    /// `redcap_event_name` on longitudinal projects (flat exports only).
    pub fn export_records(&self, params: &ExportRecords) -> Result<Response> {
        let indexed = params.format == Format::Table && params.record_type == RecordType::Flat;
        let fields = if indexed {
            self.backfill_fields(&params.fields, &params.forms)?
        } else {
            params.fields.clone()
        };

        let mut payload = self.api.payload(
            DataType::Record.content(),
            Some(params.format),
            None,
            Some(params.record_type),
        );
        payload.insert_indexed("records", &params.records);
        payload.insert_indexed("fields", &fields);
        payload.insert_indexed("forms", &params.forms);
        payload.insert_indexed("events", &params.events);

        let shape = resolve(params.format, RequestType::Export, None)?;
        let response = self.api.call(payload, shape)?;
        if !indexed {
            return into_format(response, params.format, &[]);
        }

        let labels = self.record_row_labels()?;
        let index: Vec<&str> = labels.iter().map(String::as_str).collect();
        into_format(response, params.format, &index)
    }

    /// Imports records. The decoded reply depends on `return_format` and
    /// `return_content`: counts, ids, nothing, or raw text.
    pub fn import_records(&self, data: &ImportData, params: &ImportRecords) -> Result<Response> {
        let base = self.api.payload(
            DataType::Record.content(),
            None,
            Some(params.return_format),
            Some(params.record_type),
        );
        let labels = match data {
            ImportData::Table(_) => Some(self.record_row_labels()?),
            _ => None,
        };
        let mut payload = import_payload(base, data, labels.as_deref())?;
        payload.insert(
            "overwriteBehavior",
            if params.overwrite { "overwrite" } else { "normal" },
        );
        payload.insert("returnContent", params.return_content.as_str());
        payload.insert(
            "forceAutoNumber",
            if params.force_auto_number { "true" } else { "false" },
        );
        payload.insert("dateFormat", params.date_format.as_str());

        let shape = resolve(
            params.return_format,
            RequestType::Import,
            Some(params.return_content),
        )?;
        self.api.call(payload, shape)
    }

    /// Deletes records, optionally only within one arm. Returns the number deleted.
    pub fn delete_records(&self, records: &[&str], arm: Option<&str>) -> Result<Response> {
        let mut payload =
            self.api
                .payload(DataType::Record.content(), None, Some(Format::Json), None);
        payload.insert("action", "delete");
        payload.insert_indexed("records", records);
        if let Some(arm) = arm {
            payload.insert("arm", arm);
        }

        let shape = resolve(Format::Json, RequestType::Delete, None)?;
        self.api.call(payload, shape)
    }

    /// Downloads the file stored in one record's file field.
    pub fn export_file(&self, file: &FileRequest) -> Result<FileMap> {
        self.check_file_field(&file.field)?;
        let payload = self.file_payload("export", file);
        self.api.call(payload, ResponseShape::FileMap)?.into_file()
    }

    /// Uploads `upload` into one record's file field.
    pub fn import_file(&self, file: &FileRequest, upload: FileUpload) -> Result<Response> {
        self.check_file_field(&file.field)?;
        let mut payload = self.file_payload("import", file);
        payload.attach(upload);
        self.api.call(payload, ResponseShape::EmptyJson)
    }

    /// Removes the file stored in one record's file field.
    pub fn delete_file(&self, file: &FileRequest) -> Result<Response> {
        self.check_file_field(&file.field)?;
        let payload = self.file_payload("delete", file);
        self.api.call(payload, ResponseShape::EmptyJson)
    }

    fn file_payload(&self, action: &str, file: &FileRequest) -> Payload {
        // file requests carry no format
        let mut payload = self.api.payload("file", None, None, None);
        payload.insert("action", action);
        payload.insert("record", file.record.as_str());
        payload.insert("field", file.field.as_str());
        if let Some(event) = &file.event {
            payload.insert("event", event.as_str());
        }
        // instance 0 does not exist, REDCap numbers instances from 1
        if let Some(instance) = file.repeat_instance.filter(|&n| n > 0) {
            payload.insert("repeat_instance", instance.to_string());
        }
        payload
    }

    fn check_file_field(&self, field: &str) -> Result<()> {
        match self.context.field_type(&self.api, field)? {
            Some("file") => Ok(()),
            _ => Err(Error::Precondition(format!(
                "'{field}' is not a field or not a 'file' field"
            ))),
        }
    }

    /// A filtered export only returns the requested fields, so the record id
    /// field the table is indexed on has to be asked for explicitly.
    fn backfill_fields(&self, fields: &[String], forms: &[String]) -> Result<Vec<String>> {
        if fields.is_empty() && forms.is_empty() {
            return Ok(Vec::new());
        }
        let def_field = self.def_field()?;
        let mut fields = fields.to_vec();
        if !fields.iter().any(|f| f == def_field) {
            fields.push(def_field.to_string());
        }
        Ok(fields)
    }

    fn record_row_labels(&self) -> Result<Vec<String>> {
        let default_field = self.def_field()?.to_string();
        Ok(record_row_labels(&default_field, self.is_longitudinal()?))
    }
}

/// Parses raw csv into a table when the caller asked for [`Format::Table`].
fn into_format(response: Response, format: Format, index: &[&str]) -> Result<Response> {
    if format != Format::Table {
        return Ok(response);
    }
    let text = response.into_text()?;
    Table::from_csv(&text, index).map(Response::Table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RawResponse;
    use crate::payload::EVENT_NAME_FIELD;
    use crate::transport::testing::RecordingTransport;
    use serde_json::json;
    use std::sync::Arc;

    const URL: &str = "https://redcap.example.edu/api/";
    const TOKEN: &str = "0123456789ABCDEF0123456789ABCDEF";
    const METADATA: &str = r#"[
        {"field_name":"record_id","field_type":"text"},
        {"field_name":"age","field_type":"text"},
        {"field_name":"upload_field","field_type":"file"}
    ]"#;
    const CLASSIC: &str = r#"{"error":"You cannot export form/event mappings for classic projects"}"#;

    fn project() -> (Project, Arc<RecordingTransport>) {
        let transport = RecordingTransport::new();
        let project = Project::with_transport(URL, TOKEN, transport.clone()).unwrap();
        (project, transport)
    }

    #[test]
    fn bad_url_or_token_is_rejected_up_front() {
        let transport = RecordingTransport::new();
        let err = Project::with_transport("https://redcap.example.edu/", TOKEN, transport.clone())
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
        let err = Project::with_transport(URL, "abc", transport.clone()).unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn debug_output_hides_token() {
        let (project, _) = project();
        let out = format!("{project:?}");
        assert!(!out.contains(TOKEN));
        assert!(out.contains("<redacted>"));
    }

    #[test]
    fn export_metadata_adds_indexed_filters() {
        let (project, transport) = project();
        transport.push_json("[]");

        let response = project
            .export_metadata(Format::Json, &["record_id", "age"], &["demographics"])
            .unwrap();
        assert_eq!(response.into_json().unwrap(), json!([]));

        let sent = &transport.requests()[0];
        assert_eq!(sent.get("fields[0]"), Some("record_id"));
        assert_eq!(sent.get("fields[1]"), Some("age"));
        assert_eq!(sent.get("forms[0]"), Some("demographics"));
        assert!(!sent.contains_key("type"));
    }

    #[test]
    fn export_metadata_as_table_is_indexed_on_field_name() {
        let (project, transport) = project();
        transport.push(Ok(RawResponse::new(
            200,
            "field_name,form_name,field_type\nrecord_id,demographics,text\n",
        )));

        let table = project
            .export_metadata(Format::Table, &[], &[])
            .unwrap()
            .into_table()
            .unwrap();
        assert_eq!(table.index_names(), ["field_name"]);
        assert_eq!(table.get(0, "field_type"), Some("text"));
        assert_eq!(transport.requests()[0].get("format"), Some("csv"));
    }

    #[test]
    fn import_metadata_always_sends_date_format() {
        let (project, transport) = project();
        transport.push_json("3");

        let data = ImportData::Json(json!([{ "field_name": "record_id" }]));
        let count = project
            .import_metadata(&data, Format::Json, DateFormat::default())
            .unwrap()
            .into_count()
            .unwrap();
        assert_eq!(count, 3);

        let sent = &transport.requests()[0];
        assert_eq!(sent.get("dateFormat"), Some("YMD"));
        assert_eq!(sent.get("returnFormat"), Some("json"));
        assert_eq!(sent.get("content"), Some("metadata"));
        assert_eq!(sent.get("format"), Some("json"));
    }

    #[test]
    fn empty_record_table_export_is_not_an_error() {
        let (project, transport) = project();
        transport.push(Ok(RawResponse::new(200, "\n")));
        transport.push_json(METADATA);
        transport.push_remote(400, CLASSIC);

        let params = ExportRecords {
            format: Format::Table,
            ..ExportRecords::default()
        };
        let table = project.export_records(&params).unwrap().into_table().unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn record_table_export_on_longitudinal_project() {
        let (project, transport) = project();
        transport.push(Ok(RawResponse::new(
            200,
            "record_id,redcap_event_name,age\n1,baseline_arm_1,32\n",
        )));
        transport.push_json(METADATA);
        transport.push_json(r#"[{"arm_num":1,"unique_event_name":"baseline_arm_1","form":"demographics"}]"#);

        let params = ExportRecords {
            format: Format::Table,
            records: vec!["1".into()],
            ..ExportRecords::default()
        };
        let table = project.export_records(&params).unwrap().into_table().unwrap();
        assert_eq!(table.index_names(), ["record_id", EVENT_NAME_FIELD]);
        assert_eq!(table.get(0, "age"), Some("32"));

        let sent = &transport.requests()[0];
        assert_eq!(sent.get("type"), Some("flat"));
        assert_eq!(sent.get("records[0]"), Some("1"));
    }

    #[test]
    fn filtered_table_export_requests_record_id_field() {
        let (project, transport) = project();
        transport.push_json(METADATA);
        transport.push(Ok(RawResponse::new(200, "age,record_id\n32,1\n")));
        transport.push_remote(400, CLASSIC);

        let params = ExportRecords {
            format: Format::Table,
            fields: vec!["age".into()],
            ..ExportRecords::default()
        };
        let table = project.export_records(&params).unwrap().into_table().unwrap();
        assert_eq!(table.index_names(), ["record_id"]);
        assert_eq!(table.get(0, "age"), Some("32"));

        let sent = &transport.requests()[1];
        assert_eq!(sent.get("fields[0]"), Some("age"));
        assert_eq!(sent.get("fields[1]"), Some("record_id"));
    }

    #[test]
    fn form_filtered_table_export_requests_record_id_field() {
        let (project, transport) = project();
        transport.push_json(METADATA);
        transport.push(Ok(RawResponse::new(200, "record_id,age\n1,32\n")));
        transport.push_remote(400, CLASSIC);

        let params = ExportRecords {
            format: Format::Table,
            fields: vec!["record_id".into()],
            forms: vec!["demographics".into()],
            ..ExportRecords::default()
        };
        project.export_records(&params).unwrap().into_table().unwrap();

        let sent = &transport.requests()[1];
        assert_eq!(sent.get("fields[0]"), Some("record_id"));
        assert!(!sent.contains_key("fields[1]"));
        assert_eq!(sent.get("forms[0]"), Some("demographics"));
    }

    #[test]
    fn filtered_json_export_is_sent_as_given() {
        let (project, transport) = project();
        transport.push_json(r#"[{"age":"32"}]"#);

        let params = ExportRecords {
            fields: vec!["age".into()],
            ..ExportRecords::default()
        };
        let records = project.export_records(&params).unwrap().into_json().unwrap();
        assert_eq!(records, json!([{ "age": "32" }]));

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].contains_key("fields[1]"));
    }

    #[test]
    fn classic_record_table_import_labels_default_field_only() {
        let (project, transport) = project();
        transport.push_json(METADATA);
        transport.push_remote(400, CLASSIC);
        transport.push_json(r#"{"count": 1}"#);

        let mut table = Table::new(["id"], ["age"]);
        table.push_row(["1"], ["32"]).unwrap();
        let result = project
            .import_records(&ImportData::Table(table), &ImportRecords::default())
            .unwrap()
            .into_count_mapping()
            .unwrap();
        assert_eq!(result["count"], 1);

        let sent = transport.requests().pop().unwrap();
        assert_eq!(sent.get("data"), Some("record_id,age\n1,32\n"));
        assert_eq!(sent.get("format"), Some("csv"));
        assert_eq!(sent.get("returnContent"), Some("count"));
        assert_eq!(sent.get("overwriteBehavior"), Some("normal"));
        assert_eq!(sent.get("forceAutoNumber"), Some("false"));
        assert_eq!(sent.get("type"), Some("flat"));
    }

    #[test]
    fn longitudinal_record_table_import_labels_event_name() {
        let (project, transport) = project();
        transport.push_json(METADATA);
        transport.push_json("[]");
        transport.push_json(r#"["1"]"#);

        let mut table = Table::new(["id", "event"], ["age"]);
        table.push_row(["1", "baseline_arm_1"], ["32"]).unwrap();
        let params = ImportRecords {
            return_content: ReturnContent::Ids,
            ..ImportRecords::default()
        };
        let ids = project
            .import_records(&ImportData::Table(table), &params)
            .unwrap()
            .into_ids()
            .unwrap();
        assert_eq!(ids, ["1"]);

        let sent = transport.requests().pop().unwrap();
        assert_eq!(
            sent.get("data"),
            Some("record_id,redcap_event_name,age\n1,baseline_arm_1,32\n")
        );
    }

    #[test]
    fn json_record_import_skips_context_lookups() {
        let (project, transport) = project();
        transport.push_json("[]");

        let params = ImportRecords {
            return_content: ReturnContent::Nothing,
            ..ImportRecords::default()
        };
        let data = ImportData::Json(json!([{ "record_id": "1" }]));
        let response = project.import_records(&data, &params).unwrap();
        assert_eq!(response, Response::Json(json!([])));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn delete_records_returns_count() {
        let (project, transport) = project();
        transport.push_json("2");

        let deleted = project
            .delete_records(&["1", "2"], Some("1"))
            .unwrap()
            .into_count()
            .unwrap();
        assert_eq!(deleted, 2);

        let sent = &transport.requests()[0];
        assert_eq!(sent.get("action"), Some("delete"));
        assert_eq!(sent.get("records[1]"), Some("2"));
        assert_eq!(sent.get("arm"), Some("1"));
    }

    #[test]
    fn export_file_returns_content_and_attributes() {
        let (project, transport) = project();
        transport.push_json(METADATA);
        transport.push(Ok(RawResponse::new(200, "test upload\n").with_header(
            "content-type",
            r#"text/plain; name="test_upload.txt"; charset=UTF-8"#,
        )));

        let request = FileRequest::new("1", "upload_field")
            .with_event("baseline_arm_1")
            .with_repeat_instance(2);
        let file = project.export_file(&request).unwrap();
        assert_eq!(file.content, b"test upload\n");
        assert_eq!(file.name(), Some("test_upload.txt"));
        assert_eq!(file.attributes["charset"], "UTF-8");

        let sent = &transport.requests()[1];
        assert_eq!(sent.get("action"), Some("export"));
        assert_eq!(sent.get("event"), Some("baseline_arm_1"));
        assert_eq!(sent.get("repeat_instance"), Some("2"));
        assert!(!sent.contains_key("format"));
        assert_eq!(transport.binary_flags(), [false, true]);
    }

    #[test]
    fn zero_repeat_instance_is_not_sent() {
        let (project, transport) = project();
        transport.push_json(METADATA);
        transport.push(Ok(RawResponse::new(200, "")));

        project
            .delete_file(&FileRequest::new("1", "upload_field").with_repeat_instance(0))
            .unwrap();

        let sent = &transport.requests()[1];
        assert_eq!(sent.get("action"), Some("delete"));
        assert!(!sent.contains_key("repeat_instance"));
    }

    #[test]
    fn file_operations_reject_non_file_fields() {
        let (project, transport) = project();
        transport.push_json(METADATA);

        for field in ["age", "missing"] {
            let err = project.export_file(&FileRequest::new("1", field)).unwrap_err();
            assert!(matches!(err, Error::Precondition(ref m) if m.contains(field)));
        }
        // only the metadata fetch went out
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn import_file_attaches_upload() {
        let (project, transport) = project();
        transport.push_json(METADATA);
        transport.push(Ok(RawResponse::new(200, "")));

        let response = project
            .import_file(
                &FileRequest::new("2", "upload_field"),
                FileUpload::new("myupload.txt", b"hello".to_vec()),
            )
            .unwrap();
        assert_eq!(response, Response::Json(json!([])));

        let sent = &transport.requests()[1];
        assert_eq!(sent.get("action"), Some("import"));
        assert_eq!(sent.file().map(|f| f.file_name.as_str()), Some("myupload.txt"));
    }

    #[test]
    fn delete_file_surfaces_remote_errors() {
        let (project, transport) = project();
        transport.push_json(METADATA);
        transport.push_remote(400, r#"{"error":"There is no file to delete for this record"}"#);

        let err = project
            .delete_file(&FileRequest::new("9", "upload_field"))
            .unwrap_err();
        assert!(matches!(err, Error::Remote { status: 400, .. }));
        assert!(!err.is_no_events());
    }
}

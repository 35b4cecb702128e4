//! Project-level facts fetched on first use and cached for the project's lifetime.

use std::sync::OnceLock;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::client::Api;
use crate::error::{Error, Result};
use crate::shape::{Format, RequestType, resolve};

/// One row of the project's data dictionary.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FieldMetadata {
    pub field_name: String,
    pub field_type: String,
    #[serde(default)]
    pub form_name: Option<String>,
    /// Remaining data dictionary columns (labels, validation, branching logic, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Lazily populated project facts.
///
/// Each value is fetched at most once and never refreshed. Two threads racing
/// on the first access may both fetch, but only one result is kept.
#[derive(Debug, Default)]
pub struct ProjectContext {
    metadata: OnceLock<Vec<FieldMetadata>>,
    field_names: OnceLock<Vec<String>>,
    default_field: OnceLock<String>,
    is_longitudinal: OnceLock<bool>,
}

impl ProjectContext {
    pub(crate) fn metadata(&self, api: &Api) -> Result<&[FieldMetadata]> {
        if let Some(metadata) = self.metadata.get() {
            return Ok(metadata.as_slice());
        }

        let payload = api.payload("metadata", Some(Format::Json), None, None);
        let shape = resolve(Format::Json, RequestType::Export, None)?;
        let rows: Vec<FieldMetadata> = api.call(payload, shape)?.into_records()?;
        debug!(fields = rows.len(), "cached project metadata");

        Ok(self.metadata.get_or_init(|| rows).as_slice())
    }

    pub(crate) fn field_names(&self, api: &Api) -> Result<&[String]> {
        if let Some(names) = self.field_names.get() {
            return Ok(names.as_slice());
        }
        let names: Vec<String> = self
            .metadata(api)?
            .iter()
            .map(|row| row.field_name.clone())
            .collect();
        Ok(self.field_names.get_or_init(|| names).as_slice())
    }

    /// The record id field: the first field of the data dictionary.
    pub(crate) fn default_field(&self, api: &Api) -> Result<&str> {
        if let Some(field) = self.default_field.get() {
            return Ok(field.as_str());
        }
        let field = self
            .field_names(api)?
            .first()
            .cloned()
            .ok_or_else(|| Error::Precondition("project metadata has no fields".into()))?;
        Ok(self.default_field.get_or_init(|| field).as_str())
    }

    /// Probes the form/event mapping: projects without events reject it.
    pub(crate) fn is_longitudinal(&self, api: &Api) -> Result<bool> {
        if let Some(longitudinal) = self.is_longitudinal.get() {
            return Ok(*longitudinal);
        }

        let payload = api.payload("formEventMapping", Some(Format::Json), None, None);
        let shape = resolve(Format::Json, RequestType::Export, None)?;
        let longitudinal = match api.call(payload, shape) {
            Ok(_) => true,
            Err(e) if e.is_no_events() => {
                warn!(error = %e, "form/event mapping unavailable, treating project as classic");
                false
            }
            Err(e) => return Err(e),
        };
        debug!(longitudinal, "cached longitudinal flag");

        Ok(*self.is_longitudinal.get_or_init(|| longitudinal))
    }

    /// `field_type` of `field_name`, if the field exists.
    pub(crate) fn field_type(&self, api: &Api, field_name: &str) -> Result<Option<&str>> {
        Ok(self
            .metadata(api)?
            .iter()
            .find(|row| row.field_name == field_name)
            .map(|row| row.field_type.as_str()))
    }
}

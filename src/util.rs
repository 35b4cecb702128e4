use std::collections::BTreeMap;

/// Splits a `content-type` header into its `key=value` attributes.
///
/// REDCap puts the stored file name and charset there, e.g.
/// `text/plain; name="upload.txt"; charset=UTF-8`. Segments without `=` are skipped.
pub(crate) fn content_type_attributes(content_type: &str) -> BTreeMap<String, String> {
    content_type
        .split(';')
        .map(str::trim)
        .filter_map(|segment| segment.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().replace('"', "")))
        .collect()
}

pub(crate) fn xml_error_message(body: &str) -> Option<&str> {
    let start = body.find("<error>")? + "<error>".len();
    let len = body[start..].find("</error>")?;
    Some(body[start..start + len].trim())
}

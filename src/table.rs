//! A small labelled table used for `df`-style imports and exports.
//!
//! Rows carry an index (one or more label columns such as `record_id` and
//! `redcap_event_name`) and a value per column. Tables are written to and read
//! from the csv text the API speaks.

use crate::error::{Error, Result};
use crate::shape::ResponseShape;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    index_names: Vec<String>,
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub index: Vec<String>,
    pub values: Vec<String>,
}

impl Table {
    pub fn new<I, C>(index_names: I, columns: C) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            index_names: index_names.into_iter().map(Into::into).collect(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row<I, V>(&mut self, index: I, values: V) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        let row = Row {
            index: index.into_iter().map(Into::into).collect(),
            values: values.into_iter().map(Into::into).collect(),
        };
        if row.index.len() != self.index_names.len() || row.values.len() != self.columns.len() {
            return Err(Error::Serialization(format!(
                "row has {} index value(s) and {} value(s), table expects {} and {}",
                row.index.len(),
                row.values.len(),
                self.index_names.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn index_names(&self) -> &[String] {
        &self.index_names
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in the row at position `row`.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).map(|r| r.values[col].as_str())
    }

    /// Writes the table as csv.
    ///
    /// `index_label` replaces the table's own index names in the header; it must
    /// name exactly as many columns as the index has.
    pub fn to_csv(&self, index_label: Option<&[String]>) -> Result<String> {
        let labels = index_label.unwrap_or(&self.index_names);
        if labels.len() != self.index_names.len() {
            return Err(Error::Serialization(format!(
                "table index has {} level(s) but {} row label(s) were given: {}",
                self.index_names.len(),
                labels.len(),
                labels.join(", ")
            )));
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(labels.iter().chain(&self.columns))
            .map_err(|e| Error::Serialization(e.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row.index.iter().chain(&row.values))
                .map_err(|e| Error::Serialization(e.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Serialization(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parses csv text, moving `index_cols` into the row index.
    ///
    /// Blank input (REDCap answers an empty export with a lone newline) gives an
    /// empty table.
    pub fn from_csv(text: &str, index_cols: &[&str]) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Table::default());
        }

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| Error::decode(ResponseShape::RawText, e))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut index_pos = Vec::with_capacity(index_cols.len());
        for name in index_cols {
            let pos = headers.iter().position(|h| h.as_str() == *name).ok_or_else(|| {
                Error::decode(
                    ResponseShape::RawText,
                    format!("index column '{name}' not found in csv header"),
                )
            })?;
            index_pos.push(pos);
        }

        let column_pos: Vec<usize> = (0..headers.len())
            .filter(|i| !index_pos.contains(i))
            .collect();
        let mut table = Table {
            index_names: index_pos.iter().map(|&i| headers[i].clone()).collect(),
            columns: column_pos.iter().map(|&i| headers[i].clone()).collect(),
            rows: Vec::new(),
        };

        for record in reader.records() {
            let record = record.map_err(|e| Error::decode(ResponseShape::RawText, e))?;
            let field = |i: usize| record.get(i).unwrap_or_default().to_string();
            table.rows.push(Row {
                index: index_pos.iter().map(|&i| field(i)).collect(),
                values: column_pos.iter().map(|&i| field(i)).collect(),
            });
        }

        Ok(table)
    }
}

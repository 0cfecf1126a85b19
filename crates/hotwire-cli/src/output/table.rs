//! Table formatting for CLI output

use comfy_table::{ContentArrangement, Table as ComfyTable};
use serde_json::Value;

/// Table builder for CLI output
#[derive(Debug, Clone, Default)]
pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableBuilder {
    /// Set table headers
    pub fn headers(mut self, headers: &[&str]) -> Self {
        self.headers = headers.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Add a row to the table
    pub fn add_row<S: AsRef<str>>(mut self, row: &[S]) -> Self {
        self.rows
            .push(row.iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    #[must_use]
    pub fn build(self) -> Table {
        let mut table = ComfyTable::new();
        table.set_header(&self.headers);
        for row in self.rows {
            table.add_row(row);
        }
        table
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_width(120);
        Table { inner: table }
    }
}

/// Table for CLI output
#[derive(Debug, Clone)]
pub struct Table {
    inner: ComfyTable,
}

impl Table {
    pub fn builder() -> TableBuilder {
        TableBuilder::default()
    }

    /// Create a table from a JSON array of objects; keys of the first
    /// object become the headers.
    pub fn from_json_array(arr: &[Value]) -> Self {
        let mut builder = Self::builder();
        if let Some(obj) = arr.first().and_then(Value::as_object) {
            let headers: Vec<&str> = obj.keys().map(String::as_str).collect();
            builder = builder.headers(&headers);
        }
        for obj in arr.iter().filter_map(Value::as_object) {
            let row: Vec<String> = obj
                .values()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    _ => v.to_string(),
                })
                .collect();
            builder = builder.add_row(&row);
        }
        builder.build()
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_renders_headers_and_rows() {
        let table = Table::builder()
            .headers(&["File", "Handlers"])
            .add_row(&["base/ping.rhai", "1"])
            .build();

        let output = table.to_string();
        assert!(output.contains("File"));
        assert!(output.contains("Handlers"));
        assert!(output.contains("base/ping.rhai"));
    }

    #[test]
    fn json_array_renders_one_row_per_object() {
        let json = serde_json::json!([
            {"path": "/panel", "menu": "Panel"},
            {"path": "/stats", "menu": null}
        ]);

        let output = Table::from_json_array(json.as_array().unwrap()).to_string();
        assert!(output.contains("path"));
        assert!(output.contains("/stats"));
        assert!(!output.contains("null"));
    }

    #[test]
    fn empty_json_array_renders_without_rows() {
        let output = Table::from_json_array(&[]).to_string();
        assert!(!output.contains("path"));
    }
}

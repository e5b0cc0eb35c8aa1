//! Builders for workbook fixtures.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;

#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Number(f64),
    Empty,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Value::Empty
        } else {
            Value::Text(s.to_string())
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

/// Builds a minimal but complete `.xlsx` package: content types, workbook,
/// workbook relationships, shared strings and one worksheet.
pub struct WorkbookBuilder {
    sheet_name: String,
    rows: Vec<Vec<Value>>,
}

impl WorkbookBuilder {
    pub fn new() -> Self {
        Self {
            sheet_name: "Employees".to_string(),
            rows: Vec::new(),
        }
    }

    /// Standard header row.
    pub fn employees() -> Self {
        Self::new().row(&["Emp ID", "National ID", "Name"])
    }

    pub fn row(mut self, cells: &[&str]) -> Self {
        self.rows.push(cells.iter().map(|c| Value::from(*c)).collect());
        self
    }

    pub fn values(mut self, cells: Vec<Value>) -> Self {
        self.rows.push(cells);
        self
    }

    pub fn blank_row(mut self) -> Self {
        self.rows.push(Vec::new());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut shared: Vec<String> = Vec::new();
        let mut sheet = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
        );

        for (r, cells) in self.rows.iter().enumerate() {
            let row_number = r + 1;
            sheet.push_str(&format!(r#"<row r="{}">"#, row_number));
            for (c, value) in cells.iter().enumerate() {
                let reference = format!("{}{}", column_letter(c), row_number);
                match value {
                    Value::Text(text) => {
                        let index = shared.iter().position(|s| s == text).unwrap_or_else(|| {
                            shared.push(text.clone());
                            shared.len() - 1
                        });
                        sheet.push_str(&format!(r#"<c r="{reference}" t="s"><v>{index}</v></c>"#));
                    }
                    Value::Number(n) => {
                        sheet.push_str(&format!(r#"<c r="{reference}"><v>{n}</v></c>"#));
                    }
                    Value::Empty => {}
                }
            }
            sheet.push_str("</row>");
        }
        sheet.push_str("</sheetData></worksheet>");

        let mut strings = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{0}" uniqueCount="{0}">"#,
            shared.len()
        );
        for s in &shared {
            strings.push_str(&format!("<si><t>{}</t></si>", escape(s)));
        }
        strings.push_str("</sst>");

        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
            escape(&self.sheet_name)
        );
        let rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/employees.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#;
        let content_types = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/></Types>"#;

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let parts: [(&str, &str); 5] = [
            ("[Content_Types].xml", content_types),
            ("xl/workbook.xml", &workbook),
            ("xl/_rels/workbook.xml.rels", rels),
            ("xl/sharedStrings.xml", &strings),
            ("xl/worksheets/employees.xml", &sheet),
        ];
        for (name, content) in parts {
            zip.start_file(name, SimpleFileOptions::default())
                .expect("start zip entry");
            zip.write_all(content.as_bytes()).expect("write zip entry");
        }
        zip.finish().expect("finish workbook").into_inner()
    }
}

fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

//! Minimal reader for the first worksheet of an OOXML workbook.

use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::Reader;

use crate::error::WorkbookError;

const ZIP_SIGNATURE: &[u8; 4] = b"PK\x03\x04";
const DEFAULT_SHEET: &str = "xl/worksheets/sheet1.xml";
/// Columns per worksheet (`A` through `XFD`).
pub const MAX_COLUMNS: usize = 16_384;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Error cell, or a value that could not be decoded.
    Error(String),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Renders the cell as trimmed text. `Ok(None)` for blank cells.
    pub fn to_text(&self) -> Result<Option<String>, String> {
        match self {
            Self::Empty => Ok(None),
            Self::Text(s) => {
                let trimmed = s.trim();
                Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
            }
            Self::Number(n) => Ok(Some(format_number(*n))),
            Self::Bool(b) => Ok(Some(if *b { "TRUE" } else { "FALSE" }.to_string())),
            Self::Error(e) => Err(e.clone()),
        }
    }
}

/// Integral numbers render without a fractional part, so an id typed as
/// `100` does not become `100.0`.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkbookRow {
    /// 1-based row number as shown in a spreadsheet application.
    pub number: u32,
    pub cells: Vec<Cell>,
}

impl WorkbookRow {
    pub fn cell(&self, index: usize) -> &Cell {
        self.cells.get(index).unwrap_or(&Cell::Empty)
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(Cell::is_empty)
    }
}

/// Reads every row of the first worksheet in workbook order.
pub fn read_first_sheet(path: &Path) -> Result<Vec<WorkbookRow>, WorkbookError> {
    let mut file = std::fs::File::open(path).map_err(|e| WorkbookError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut signature = [0u8; 4];
    let signature_ok = file.read_exact(&mut signature).is_ok() && &signature == ZIP_SIGNATURE;
    if !signature_ok {
        return Err(WorkbookError::NotAWorkbook(path.to_path_buf()));
    }
    file.rewind().map_err(|e| WorkbookError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| WorkbookError::Archive(e.to_string()))?;

    let shared_strings = match read_part(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => parse_shared_strings(&xml)?,
        Err(WorkbookError::MissingPart(_)) => Vec::new(),
        Err(e) => return Err(e),
    };

    let sheet_part = first_sheet_part(&mut archive);
    let sheet_xml = read_part(&mut archive, &sheet_part)?;
    parse_sheet(&sheet_xml, &shared_strings, &sheet_part)
}

fn read_part<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<String, WorkbookError> {
    let mut part = archive
        .by_name(name)
        .map_err(|_| WorkbookError::MissingPart(name.to_string()))?;
    let mut content = String::new();
    part.read_to_string(&mut content)
        .map_err(|e| WorkbookError::Archive(format!("Failed to read {}: {}", name, e)))?;
    Ok(content)
}

/// Resolves the first `<sheet>` of `xl/workbook.xml` through the workbook
/// relationships. Falls back to `sheet1.xml` when either part is unusable.
fn first_sheet_part<R: Read + Seek>(archive: &mut zip::ZipArchive<R>) -> String {
    let Ok(workbook) = read_part(archive, "xl/workbook.xml") else {
        return DEFAULT_SHEET.to_string();
    };
    let Some(rel_id) = first_sheet_rel_id(&workbook) else {
        return DEFAULT_SHEET.to_string();
    };
    let Ok(rels) = read_part(archive, "xl/_rels/workbook.xml.rels") else {
        return DEFAULT_SHEET.to_string();
    };

    match relationship_target(&rels, &rel_id) {
        Some(target) if target.starts_with('/') => target.trim_start_matches('/').to_string(),
        Some(target) => format!("xl/{}", target),
        None => DEFAULT_SHEET.to_string(),
    }
}

fn attribute(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.local_name().as_ref() == local)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn first_sheet_rel_id(workbook_xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(workbook_xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"sheet" =>
            {
                return attribute(e, b"id");
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn relationship_target(rels_xml: &str, rel_id: &str) -> Option<String> {
    let mut reader = Reader::from_str(rels_xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if attribute(e, b"Id").as_deref() == Some(rel_id) {
                    return attribute(e, b"Target");
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn xml_error(part: &str, e: impl std::fmt::Display) -> WorkbookError {
    WorkbookError::Xml {
        part: part.to_string(),
        reason: e.to_string(),
    }
}

/// Text for an entity or character reference. The reader reports these
/// separately from the surrounding text.
fn reference_text(e: &BytesRef<'_>, part: &str) -> Result<String, WorkbookError> {
    if let Some(ch) = e.resolve_char_ref().map_err(|err| xml_error(part, err))? {
        return Ok(ch.to_string());
    }
    let name = e.decode().map_err(|err| xml_error(part, err))?;
    resolve_predefined_entity(&name)
        .map(str::to_string)
        .ok_or_else(|| xml_error(part, format!("unknown entity '&{};'", name)))
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, WorkbookError> {
    const PART: &str = "xl/sharedStrings.xml";
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" if !in_phonetic => in_text = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                let decoded = e.decode().map_err(|e| xml_error(PART, e))?;
                current.push_str(&decoded);
            }
            Ok(Event::GeneralRef(e)) if in_text => {
                current.push_str(&reference_text(&e, PART)?);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(PART, e)),
            _ => {}
        }
    }

    Ok(strings)
}

/// Zero-based column index of a cell reference such as `AB12`. `Ok(None)`
/// when the reference carries no column letters.
fn column_index(reference: &str) -> Result<Option<usize>, WorkbookError> {
    let mut index = 0usize;
    let mut seen = false;
    for c in reference.chars().take_while(|c| c.is_ascii_alphabetic()) {
        seen = true;
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        index = index
            .checked_mul(26)
            .and_then(|i| i.checked_add(digit))
            .filter(|i| *i <= MAX_COLUMNS)
            .ok_or_else(|| WorkbookError::ColumnOutOfRange(reference.to_string()))?;
    }
    Ok(seen.then(|| index - 1))
}

fn cell_column(e: &BytesStart<'_>, next_column: usize) -> Result<usize, WorkbookError> {
    let column = match attribute(e, b"r") {
        Some(reference) => column_index(&reference)?.unwrap_or(next_column),
        None => next_column,
    };
    if column >= MAX_COLUMNS {
        return Err(WorkbookError::ColumnOutOfRange(format!("column {}", column + 1)));
    }
    Ok(column)
}

fn row_number(reference: &str) -> Option<u32> {
    reference.parse().ok()
}

#[derive(Default)]
struct PendingCell {
    column: usize,
    kind: Option<String>,
    value: String,
}

impl PendingCell {
    fn finish(self, shared: &[String]) -> Cell {
        let value = self.value;
        match self.kind.as_deref() {
            Some("s") => match value.trim().parse::<usize>() {
                Ok(idx) => shared
                    .get(idx)
                    .map(|s| Cell::Text(s.clone()))
                    .unwrap_or_else(|| Cell::Error(format!("shared string {} not found", idx))),
                Err(_) => Cell::Error(format!("invalid shared string index '{}'", value)),
            },
            Some("inlineStr") | Some("str") => Cell::Text(value),
            Some("b") => Cell::Bool(value.trim() == "1"),
            Some("e") => Cell::Error(format!("error value {}", value.trim())),
            _ => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    Cell::Empty
                } else {
                    trimmed
                        .parse::<f64>()
                        .map(Cell::Number)
                        .unwrap_or_else(|_| Cell::Error(format!("unparseable number '{}'", trimmed)))
                }
            }
        }
    }
}

fn place(cells: &mut Vec<Cell>, column: usize, cell: Cell) {
    if cells.len() <= column {
        cells.resize(column + 1, Cell::Empty);
    }
    cells[column] = cell;
}

fn parse_sheet(xml: &str, shared: &[String], part: &str) -> Result<Vec<WorkbookRow>, WorkbookError> {
    let mut reader = Reader::from_str(xml);
    let mut rows = Vec::new();

    let mut current_row: Option<WorkbookRow> = None;
    let mut current_cell: Option<PendingCell> = None;
    let mut next_column = 0usize;
    let mut last_row_number = 0u32;
    let mut in_value = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"row" => {
                    let number = attribute(e, b"r")
                        .and_then(|r| row_number(&r))
                        .unwrap_or(last_row_number + 1);
                    last_row_number = number;
                    next_column = 0;
                    current_row = Some(WorkbookRow {
                        number,
                        cells: Vec::new(),
                    });
                }
                b"c" => {
                    let column = cell_column(e, next_column)?;
                    next_column = column + 1;
                    current_cell = Some(PendingCell {
                        column,
                        kind: attribute(e, b"t"),
                        value: String::new(),
                    });
                }
                b"v" | b"t" if current_cell.is_some() => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"row" => {
                    let number = attribute(e, b"r")
                        .and_then(|r| row_number(&r))
                        .unwrap_or(last_row_number + 1);
                    last_row_number = number;
                    rows.push(WorkbookRow {
                        number,
                        cells: Vec::new(),
                    });
                }
                b"c" => {
                    next_column = cell_column(e, next_column)? + 1;
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_value => {
                let decoded = e.decode().map_err(|e| xml_error(part, e))?;
                if let Some(cell) = current_cell.as_mut() {
                    cell.value.push_str(&decoded);
                }
            }
            Ok(Event::GeneralRef(e)) if in_value => {
                let text = reference_text(&e, part)?;
                if let Some(cell) = current_cell.as_mut() {
                    cell.value.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let (Some(cell), Some(row)) = (current_cell.take(), current_row.as_mut()) {
                        let column = cell.column;
                        let value = cell.finish(shared);
                        place(&mut row.cells, column, value);
                    }
                }
                b"row" => {
                    if let Some(row) = current_row.take() {
                        rows.push(row);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A1").unwrap(), Some(0));
        assert_eq!(column_index("C7").unwrap(), Some(2));
        assert_eq!(column_index("Z3").unwrap(), Some(25));
        assert_eq!(column_index("AA3").unwrap(), Some(26));
        assert_eq!(column_index("XFD1").unwrap(), Some(MAX_COLUMNS - 1));
        assert_eq!(column_index("12").unwrap(), None);
    }

    #[test]
    fn test_column_beyond_last_is_an_error() {
        assert!(matches!(
            column_index("XFE1"),
            Err(WorkbookError::ColumnOutOfRange(_))
        ));
        assert!(matches!(
            column_index("ZZZZZZZZZZZZZZZ2"),
            Err(WorkbookError::ColumnOutOfRange(_))
        ));

        let xml = r#"<worksheet><sheetData><row r="1"><c r="ZZZZZZ1"><v>1</v></c></row></sheetData></worksheet>"#;
        assert!(matches!(
            parse_sheet(xml, &[], "sheet"),
            Err(WorkbookError::ColumnOutOfRange(_))
        ));
    }

    #[test]
    fn test_entity_references_are_decoded() {
        let shared = parse_shared_strings(
            r#"<sst><si><t>Smith &amp; Sons</t></si><si><t>O&#39;Neil &#x263A;</t></si></sst>"#,
        )
        .unwrap();
        assert_eq!(shared, vec!["Smith & Sons".to_string(), "O'Neil \u{263A}".to_string()]);

        let xml = r#"<worksheet><sheetData><row r="1">
            <c r="A1" t="inlineStr"><is><t>Smith &amp; Sons &lt;x&gt;</t></is></c>
            <c r="B1" t="s"><v>0</v></c>
        </row></sheetData></worksheet>"#;
        let rows = parse_sheet(xml, &shared, "sheet").unwrap();
        assert_eq!(rows[0].cells[0], Cell::Text("Smith & Sons <x>".into()));
        assert_eq!(rows[0].cells[1], Cell::Text("Smith & Sons".into()));
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(Cell::Number(100.0).to_text().unwrap().unwrap(), "100");
        assert_eq!(Cell::Number(12.5).to_text().unwrap().unwrap(), "12.5");
        assert_eq!(Cell::Text("  x ".into()).to_text().unwrap().unwrap(), "x");
        assert_eq!(Cell::Text("   ".into()).to_text().unwrap(), None);
        assert!(Cell::Error("#N/A".into()).to_text().is_err());
    }

    #[test]
    fn test_parse_sheet_with_shared_and_inline_strings() {
        let shared = parse_shared_strings(
            r#"<sst><si><t>Emp ID</t></si><si><r><t>Na</t></r><r><t>me</t></r></si></sst>"#,
        )
        .unwrap();
        assert_eq!(shared, vec!["Emp ID".to_string(), "Name".to_string()]);

        let xml = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="C1" t="s"><v>1</v></c></row>
            <row r="2"><c r="A2"><v>100</v></c><c r="B2" t="b"><v>1</v></c><c r="C2" t="inlineStr"><is><t>Jane</t></is></c></row>
            <row r="4"><c r="A4" t="e"><v>#REF!</v></c><c r="B4"><v>abc</v></c></row>
        </sheetData></worksheet>"#;

        let rows = parse_sheet(xml, &shared, "sheet").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].cells[0], Cell::Text("Emp ID".into()));
        assert_eq!(rows[0].cells[1], Cell::Empty);
        assert_eq!(rows[0].cells[2], Cell::Text("Name".into()));
        assert_eq!(rows[1].cells[0], Cell::Number(100.0));
        assert_eq!(rows[1].cells[1], Cell::Bool(true));
        assert_eq!(rows[1].cells[2], Cell::Text("Jane".into()));
        assert_eq!(rows[2].number, 4);
        assert!(matches!(rows[2].cells[0], Cell::Error(_)));
        assert!(matches!(rows[2].cells[1], Cell::Error(_)));
    }

    #[test]
    fn test_rejects_non_zip_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.xlsx");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"not a workbook")
            .unwrap();

        assert!(matches!(
            read_first_sheet(&path),
            Err(WorkbookError::NotAWorkbook(_))
        ));
    }

    #[test]
    fn test_reads_sheet_resolved_through_relationships() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.xlsx");
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("xl/workbook.xml", SimpleFileOptions::default()).unwrap();
        zip.write_all(br#"<workbook xmlns:r="urn:r"><sheets><sheet name="Staff" sheetId="1" r:id="rId7"/></sheets></workbook>"#).unwrap();
        zip.start_file("xl/_rels/workbook.xml.rels", SimpleFileOptions::default()).unwrap();
        zip.write_all(br#"<Relationships><Relationship Id="rId7" Target="worksheets/staff.xml"/></Relationships>"#).unwrap();
        zip.start_file("xl/worksheets/staff.xml", SimpleFileOptions::default()).unwrap();
        zip.write_all(br#"<worksheet><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>Name</t></is></c></row></sheetData></worksheet>"#).unwrap();
        zip.finish().unwrap();

        let rows = read_first_sheet(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells[0], Cell::Text("Name".into()));
    }
}

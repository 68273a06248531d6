// Product table: positional rows over named columns, tab-separated on disk
//
// Cells are kept as text. An empty cell is the null value; the pipeline only
// interprets `code` and `image_1..image_4`, everything else passes through.

use std::collections::HashMap;

use crate::core::errors::{TableError, TableResult};
use crate::core::types::ImageSlot;

pub const CODE_COLUMN: &str = "code";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductTable {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl ProductTable {
    pub fn new(columns: Vec<String>) -> TableResult<Self> {
        let mut index = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(TableError::DuplicateColumn(name.clone()));
            }
        }
        Ok(Self {
            columns,
            index,
            rows: Vec::new(),
        })
    }

    /// Decode a tab-separated table with a header row.
    ///
    /// Fields may be double-quoted (as written by pandas and most
    /// spreadsheet exports) to carry tabs, newlines or `""`-escaped quotes.
    /// Short rows are padded with nulls; rows with more fields than the
    /// header are rejected. Blank lines are skipped.
    pub fn from_tsv(bytes: &[u8]) -> TableResult<Self> {
        let text = String::from_utf8(bytes.to_vec())?;
        let mut records = parse_records(&text).into_iter();

        let header = records
            .next()
            .filter(|(_, fields)| fields.iter().any(|f| !f.trim().is_empty()))
            .ok_or(TableError::Empty)?;
        let columns: Vec<String> = header.1.iter().map(|c| c.trim().to_string()).collect();
        let mut table = Self::new(columns)?;
        let width = table.columns.len();

        for (line, mut fields) in records {
            if fields.len() > width {
                return Err(TableError::RaggedRow {
                    line,
                    expected: width,
                    found: fields.len(),
                });
            }
            fields.resize(width, String::new());
            table.rows.push(fields);
        }

        Ok(table)
    }

    /// Encode as tab-separated text; fields holding a tab, newline or quote
    /// are quoted so `from_tsv` reads them back unchanged.
    pub fn to_tsv(&self) -> Vec<u8> {
        let mut out = String::new();
        write_record(&mut out, &self.columns);
        for row in &self.rows {
            write_record(&mut out, row);
        }
        out.into_bytes()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Append `name` as an all-null column unless it already exists
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(i) = self.column_index(name) {
            return i;
        }
        let i = self.columns.len();
        self.columns.push(name.to_string());
        self.index.insert(name.to_string(), i);
        for row in &mut self.rows {
            row.push(String::new());
        }
        i
    }

    pub fn ensure_image_columns(&mut self) {
        for slot in ImageSlot::ALL {
            self.ensure_column(&slot.column());
        }
    }

    pub fn push_row(&mut self, mut fields: Vec<String>) {
        fields.resize(self.columns.len(), String::new());
        self.rows.push(fields);
    }

    /// Cell value, `None` for a null cell or an unknown column
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows
            .get(row)
            .map(|r| r[col].as_str())
            .filter(|v| !v.is_empty())
    }

    /// Write a cell. Unknown columns and out-of-range rows are ignored.
    pub fn set(&mut self, row: usize, column: &str, value: Option<String>) {
        let Some(col) = self.column_index(column) else {
            return;
        };
        if let Some(r) = self.rows.get_mut(row) {
            r[col] = value.unwrap_or_default();
        }
    }

    pub fn code(&self, row: usize) -> Option<&str> {
        self.get(row, CODE_COLUMN).map(str::trim).filter(|c| !c.is_empty())
    }

    pub fn image(&self, row: usize, slot: ImageSlot) -> Option<&str> {
        self.get(row, &slot.column())
    }

    pub fn set_image(&mut self, row: usize, slot: ImageSlot, url: Option<String>) {
        self.set(row, &slot.column(), url);
    }

    /// Column values for the given rows, in the order of `rows`
    pub fn images_at(&self, rows: &[usize], slot: ImageSlot) -> Vec<Option<String>> {
        rows.iter()
            .map(|&r| self.image(r, slot).map(str::to_string))
            .collect()
    }

    /// Exchange the URLs held by two slots of one row
    pub fn swap_images(&mut self, row: usize, a: ImageSlot, b: ImageSlot) {
        if a == b {
            return;
        }
        let (Some(ca), Some(cb)) = (
            self.column_index(&a.column()),
            self.column_index(&b.column()),
        ) else {
            return;
        };
        if let Some(r) = self.rows.get_mut(row) {
            r.swap(ca, cb);
        }
    }

    pub fn clear_images(&mut self, row: usize) {
        for slot in ImageSlot::ALL {
            self.set_image(row, slot, None);
        }
    }

    /// Keep rows for which `keep(table, row_index)` holds; returns the number removed
    pub fn retain_rows<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&ProductTable, usize) -> bool,
    {
        let flags: Vec<bool> = {
            let this: &ProductTable = self;
            (0..this.rows.len()).map(|i| keep(this, i)).collect()
        };
        let before = self.rows.len();
        let mut flags = flags.into_iter();
        self.rows.retain(|_| flags.next().unwrap_or(true));
        before - self.rows.len()
    }
}

/// Split text into records of fields, each tagged with its starting line.
///
/// A field opening with `"` runs to the matching closing quote; `""` inside
/// it is a literal quote. A quote anywhere else is ordinary text. An
/// unterminated quoted field runs to the end of the input.
fn parse_records(text: &str) -> Vec<(usize, Vec<String>)> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut line = 1;
    let mut record_line = 1;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => {
                    if c == '\n' {
                        line += 1;
                    }
                    field.push(c);
                }
            }
            continue;
        }

        match c {
            '"' if at_field_start => {
                in_quotes = true;
                at_field_start = false;
            }
            '\t' => {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                push_record(&mut records, record_line, std::mem::take(&mut fields));
                line += 1;
                record_line = line;
                at_field_start = true;
            }
            _ => {
                field.push(c);
                at_field_start = false;
            }
        }
    }

    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        push_record(&mut records, record_line, fields);
    }
    records
}

fn push_record(records: &mut Vec<(usize, Vec<String>)>, line: usize, fields: Vec<String>) {
    let blank = fields.len() == 1 && fields[0].is_empty();
    if !blank {
        records.push((line, fields));
    }
}

fn write_record(out: &mut String, fields: &[String]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        if field.contains(['\t', '\n', '\r', '"']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "code\tproduct_name\timage_1\timage_2\timage_3\timage_4\n\
                          123\tOats\thttp://a/1.jpg\thttp://a/2.jpg\t\t\n\
                          0456\tMilk\t\t\t\t\n";

    #[test]
    fn test_decode_encode() {
        let table = ProductTable::from_tsv(SAMPLE.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.code(1), Some("0456"));
        assert_eq!(table.image(0, ImageSlot::FRONT), Some("http://a/1.jpg"));
        assert_eq!(table.image(1, ImageSlot::FRONT), None);
        assert_eq!(String::from_utf8(table.to_tsv()).unwrap(), SAMPLE);
    }

    #[test]
    fn test_short_rows_padded_long_rows_rejected() {
        let table = ProductTable::from_tsv(b"code\tname\n1\n").unwrap();
        assert_eq!(table.get(0, "name"), None);

        let err = ProductTable::from_tsv(b"code\tname\n1\ta\tb\n").unwrap_err();
        assert!(matches!(err, TableError::RaggedRow { line: 2, expected: 2, found: 3 }));
    }

    #[test]
    fn test_empty_and_duplicate_header() {
        assert!(matches!(ProductTable::from_tsv(b""), Err(TableError::Empty)));
        assert!(matches!(
            ProductTable::from_tsv(b"code\tcode\n"),
            Err(TableError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn test_swap_and_clear() {
        let mut table = ProductTable::from_tsv(SAMPLE.as_bytes()).unwrap();
        let slot2 = ImageSlot::new(2).unwrap();
        table.swap_images(0, ImageSlot::FRONT, slot2);
        assert_eq!(table.image(0, ImageSlot::FRONT), Some("http://a/2.jpg"));
        assert_eq!(table.image(0, slot2), Some("http://a/1.jpg"));

        table.clear_images(0);
        assert!(ImageSlot::ALL.iter().all(|&s| table.image(0, s).is_none()));
        assert_eq!(table.get(0, "product_name"), Some("Oats"));
    }

    #[test]
    fn test_retain_rows_by_position() {
        let mut table = ProductTable::from_tsv(SAMPLE.as_bytes()).unwrap();
        let removed = table.retain_rows(|t, i| t.image(i, ImageSlot::FRONT).is_some());
        assert_eq!(removed, 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.code(0), Some("123"));
    }

    #[test]
    fn test_ensure_image_columns() {
        let mut table = ProductTable::from_tsv(b"code\n1\n2\n").unwrap();
        table.ensure_image_columns();
        assert_eq!(table.columns().len(), 5);
        table.set_image(1, ImageSlot::new(4).unwrap(), Some("http://x".to_string()));
        assert_eq!(table.image(1, ImageSlot::new(4).unwrap()), Some("http://x"));
    }

    #[test]
    fn test_quoted_fields_keep_tabs_and_newlines() {
        let input = "code\tproduct_name\timage_1\n\
                     1\t\"Tea\tbag\"\t\n\
                     2\t\"Two\nlines, \"\"quoted\"\"\"\thttp://x/1.jpg\n\
                     3\t5\" pizza\t\n";
        let table = ProductTable::from_tsv(input.as_bytes()).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0, "product_name"), Some("Tea\tbag"));
        assert_eq!(table.get(1, "product_name"), Some("Two\nlines, \"quoted\""));
        assert_eq!(table.image(1, ImageSlot::FRONT), Some("http://x/1.jpg"));
        // A quote inside an unquoted field is plain text
        assert_eq!(table.get(2, "product_name"), Some("5\" pizza"));

        let reread = ProductTable::from_tsv(&table.to_tsv()).unwrap();
        assert_eq!(reread, table);
    }

    #[test]
    fn test_crlf_and_ragged_line_numbers() {
        let table = ProductTable::from_tsv(b"code\tname\r\n1\ta\r\n\r\n2\tb\r\n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1, "name"), Some("b"));

        // Line numbers count the newlines inside quoted fields
        let err = ProductTable::from_tsv(b"code\tname\n1\t\"a\nb\"\n2\tc\td\n").unwrap_err();
        assert!(matches!(err, TableError::RaggedRow { line: 4, expected: 2, found: 3 }));
    }
}

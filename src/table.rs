//! In-Memory Table (§4.E): a column-oriented map from column name to an
//! ordered vector of cells, all columns equal length, column order preserved
//! in order of first appearance. Grounded in `csv`'s `Reader`/`Writer` for
//! ingest/serialisation and in the `ByteRecord`-reuse pattern already used by
//! `csvsink.rs`.

use std::collections::HashMap;
use std::io::Read as _;

use csv::{ReaderBuilder, WriterBuilder};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
}

impl Serialize for Cell {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Cell::Number(n) => serializer.serialize_f64(*n),
            Cell::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(_) => None,
        }
    }

    fn parse(raw: &str) -> Cell {
        match raw.parse::<f64>() {
            Ok(n) => Cell::Number(n),
            Err(_) => Cell::Text(raw.to_string()),
        }
    }

    fn to_csv_field(&self, quote_strings: bool) -> String {
        match self {
            Cell::Number(n) => format_number(*n),
            Cell::Text(s) => {
                if quote_strings {
                    format!("\"{}\"", s.replace('"', "\"\""))
                } else {
                    crate::util::csv_quote(s)
                }
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableError {
    ColumnNotFound(String),
    LengthMismatch { expected: usize, got: usize },
    InvalidIndex(String),
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::ColumnNotFound(name) => write!(f, "no such column: {name}"),
            TableError::LengthMismatch { expected, got } => {
                write!(f, "length mismatch: table has {expected} rows, got {got}")
            }
            TableError::InvalidIndex(msg) => write!(f, "invalid index: {msg}"),
        }
    }
}

impl std::error::Error for TableError {}

/// A column-oriented table: `columns` holds the ordered list of names,
/// `data` the cells for each. `len()` is the common row count of every
/// column (enforced at construction and on every mutation).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    data: HashMap<String, Vec<Cell>>,
}

impl Table {
    pub fn empty() -> Table {
        Table {
            columns: Vec::new(),
            data: HashMap::new(),
        }
    }

    /// Build from an ordered list of `(name, values)` pairs — the
    /// column-map constructor (§4.E).
    pub fn from_columns(columns: Vec<(String, Vec<Cell>)>) -> Result<Table, TableError> {
        let mut table = Table::empty();
        let len = columns.first().map(|(_, v)| v.len());
        for (name, values) in columns {
            if let Some(expected) = len {
                if values.len() != expected {
                    return Err(TableError::LengthMismatch {
                        expected,
                        got: values.len(),
                    });
                }
            }
            table.columns.push(name.clone());
            table.data.insert(name, values);
        }
        Ok(table)
    }

    /// Build from a row-list of labelled cells — the row-list constructor
    /// (§4.E). Column order follows first appearance across rows.
    pub fn from_rows(rows: Vec<Vec<(String, Cell)>>) -> Table {
        let mut columns: Vec<String> = Vec::new();
        let mut data: HashMap<String, Vec<Cell>> = HashMap::new();
        for row in &rows {
            for (name, _) in row {
                if !data.contains_key(name) {
                    columns.push(name.clone());
                    data.insert(name.clone(), Vec::new());
                }
            }
        }
        for row in rows {
            let present: HashMap<&String, &Cell> = row.iter().map(|(n, c)| (n, c)).collect();
            for name in &columns {
                let cell = present.get(name).cloned().cloned().unwrap_or(Cell::Number(0.0));
                data.get_mut(name).unwrap().push(cell);
            }
        }
        Table { columns, data }
    }

    /// Read a CSV from a local path or an `http(s)://` URL. Numeric cells
    /// are parsed as floats, everything else kept as text (§4.E).
    pub fn from_csv_source(source: &str) -> Result<Table, String> {
        let contents = if source.starts_with("http://") || source.starts_with("https://") {
            let response = ureq::get(source)
                .call()
                .map_err(|e| format!("GET {source} failed: {e}"))?;
            let mut body = String::new();
            response
                .into_reader()
                .read_to_string(&mut body)
                .map_err(|e| format!("could not read body of {source}: {e}"))?;
            body
        } else {
            std::fs::read_to_string(source).map_err(|e| format!("could not read {source}: {e}"))?
        };
        Table::from_csv_str(&contents)
    }

    pub fn from_csv_str(contents: &str) -> Result<Table, String> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(contents.as_bytes());
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| e.to_string())?
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut data: HashMap<String, Vec<Cell>> = headers.iter().map(|h| (h.clone(), Vec::new())).collect();
        for record in reader.records() {
            let record = record.map_err(|e| e.to_string())?;
            for (name, raw) in headers.iter().zip(record.iter()) {
                data.get_mut(name).unwrap().push(Cell::parse(raw));
            }
        }
        Ok(Table {
            columns: headers,
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.columns.first().map(|c| self.data[c].len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Result<&[Cell], TableError> {
        self.data
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))
    }

    /// Sub-table containing only the named columns, in the order given.
    pub fn select(&self, names: &[&str]) -> Result<Table, TableError> {
        let mut table = Table::empty();
        for name in names {
            let values = self.column(name)?.to_vec();
            table.columns.push(name.to_string());
            table.data.insert(name.to_string(), values);
        }
        Ok(table)
    }

    /// Single row as a labelled tuple, by integer position.
    pub fn row(&self, ix: usize) -> Result<Vec<(String, Cell)>, TableError> {
        if ix >= self.len() {
            return Err(TableError::InvalidIndex(format!("row {ix} out of range (len {})", self.len())));
        }
        Ok(self
            .columns
            .iter()
            .map(|name| (name.clone(), self.data[name][ix].clone()))
            .collect())
    }

    /// Contiguous row slice `[start, end)` as a sub-table with every column.
    pub fn slice(&self, start: usize, end: usize) -> Result<Table, TableError> {
        let len = self.len();
        if start > end || end > len {
            return Err(TableError::InvalidIndex(format!(
                "slice {start}..{end} out of range (len {len})"
            )));
        }
        let mut table = Table::empty();
        for name in &self.columns {
            table.columns.push(name.clone());
            table.data.insert(name.clone(), self.data[name][start..end].to_vec());
        }
        Ok(table)
    }

    pub fn head(&self, n: usize) -> Table {
        self.slice(0, n.min(self.len())).expect("head bound is always in range")
    }

    pub fn tail(&self, n: usize) -> Table {
        let len = self.len();
        let start = len.saturating_sub(n);
        self.slice(start, len).expect("tail bound is always in range")
    }

    /// Assign or append a column; the length must match the table's
    /// existing row count (unless the table is currently empty).
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) -> Result<(), TableError> {
        if !self.columns.is_empty() && values.len() != self.len() {
            return Err(TableError::LengthMismatch {
                expected: self.len(),
                got: values.len(),
            });
        }
        if !self.data.contains_key(name) {
            self.columns.push(name.to_string());
        }
        self.data.insert(name.to_string(), values);
        Ok(())
    }

    /// Rename columns `{old -> new}`, preserving column order.
    pub fn rename(&mut self, renames: &[(&str, &str)]) -> Result<(), TableError> {
        for (old, _) in renames {
            if !self.data.contains_key(*old) {
                return Err(TableError::ColumnNotFound(old.to_string()));
            }
        }
        for (old, new) in renames {
            if let Some(values) = self.data.remove(*old) {
                self.data.insert(new.to_string(), values);
            }
            if let Some(slot) = self.columns.iter_mut().find(|c| c.as_str() == *old) {
                *slot = new.to_string();
            }
        }
        Ok(())
    }

    /// Truncate to the shorter of `self`/`other`'s row count (§5 "Ordering").
    pub fn truncated_to_shorter(&self, other: &Table) -> Table {
        let n = self.len().min(other.len());
        self.head(n)
    }

    pub fn to_csv_string(&self, quote_strings: bool) -> Result<String, String> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer
            .write_record(self.columns.iter())
            .map_err(|e| e.to_string())?;
        for ix in 0..self.len() {
            let row: Vec<String> = self
                .columns
                .iter()
                .map(|name| self.data[name][ix].to_csv_field(quote_strings))
                .collect();
            writer.write_record(&row).map_err(|e| e.to_string())?;
        }
        let bytes = writer.into_inner().map_err(|e| e.to_string())?;
        String::from_utf8(bytes).map_err(|e| e.to_string())
    }

    pub fn to_csv_path(&self, path: &str, quote_strings: bool) -> Result<(), String> {
        let contents = self.to_csv_string(quote_strings)?;
        std::fs::write(path, contents).map_err(|e| e.to_string())
    }
}

/// Serialises as a JSON array of row objects (`[{"col": value, ...}, ...]`),
/// column order preserved per row — the natural shape for the per-interval
/// rows callers keep slicing/projecting per §4.E, as opposed to flattening
/// to CSV text.
impl Serialize for Table {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for ix in 0..self.len() {
            seq.serialize_element(&TableRow { table: self, ix })?;
        }
        seq.end()
    }
}

struct TableRow<'a> {
    table: &'a Table,
    ix: usize,
}

impl Serialize for TableRow<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.table.columns.len()))?;
        for name in &self.table.columns {
            map.serialize_entry(name, &self.table.data[name][self.ix])?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_columns(vec![
            ("a".to_string(), vec![Cell::Number(1.0), Cell::Number(2.0), Cell::Number(3.0), Cell::Number(4.0)]),
            ("b".to_string(), vec![Cell::Number(10.0), Cell::Number(20.0), Cell::Number(30.0), Cell::Number(40.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn projection_then_slice_then_column_chains_correctly() {
        let t = sample();
        let projected = t.select(&["a", "b"]).unwrap();
        let sliced = projected.slice(1, 3).unwrap();
        let column = sliced.column("a").unwrap();
        assert_eq!(column, &[Cell::Number(2.0), Cell::Number(3.0)]);
    }

    #[test]
    fn set_column_enforces_length_match() {
        let mut t = sample();
        let err = t.set_column("c", vec![Cell::Number(1.0)]).unwrap_err();
        assert_eq!(
            err,
            TableError::LengthMismatch {
                expected: 4,
                got: 1
            }
        );
    }

    #[test]
    fn rename_preserves_order() {
        let mut t = sample();
        t.rename(&[("a", "x")]).unwrap();
        assert_eq!(t.columns(), &["x".to_string(), "b".to_string()]);
    }

    #[test]
    fn unknown_column_is_column_not_found() {
        let t = sample();
        assert_eq!(t.column("z"), Err(TableError::ColumnNotFound("z".to_string())));
    }

    #[test]
    fn csv_round_trip_preserves_numeric_values() {
        let t = sample();
        let csv_text = t.to_csv_string(false).unwrap();
        let read_back = Table::from_csv_str(&csv_text).unwrap();
        assert_eq!(read_back.head(t.len()).column("a"), t.column("a"));
    }

    #[test]
    fn head_and_tail_select_expected_rows() {
        let t = sample();
        assert_eq!(t.head(2).column("a").unwrap(), &[Cell::Number(1.0), Cell::Number(2.0)]);
        assert_eq!(t.tail(2).column("a").unwrap(), &[Cell::Number(3.0), Cell::Number(4.0)]);
    }

    // A tiny hand-rolled serialiser, matching the one in artifact.rs's own
    // tests, so this doesn't need serde_json as an extra dev-dependency.
    fn serde_json_lite_row(table: &Table, ix: usize) -> String {
        let fields: Vec<String> = table
            .columns()
            .iter()
            .map(|name| match &table.column(name).unwrap()[ix] {
                Cell::Number(n) => format!("\"{name}\":{n}"),
                Cell::Text(s) => format!("\"{name}\":\"{s}\""),
            })
            .collect();
        format!("{{{}}}", fields.join(","))
    }

    #[test]
    fn table_row_serialisation_preserves_column_order() {
        let t = sample();
        assert_eq!(serde_json_lite_row(&t, 0), "{\"a\":1,\"b\":10}");
        assert_eq!(serde_json_lite_row(&t, 1), "{\"a\":2,\"b\":20}");
    }
}

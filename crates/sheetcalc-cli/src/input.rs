//! JSON snapshots and command-line cell input

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use sheetcalc::CalculationOptions;
use sheetcalc_core::{CellError, CellLocation, CellValue, NamedRange, Snapshot, Workbook, Worksheet};

/// A snapshot file: units with sheets, cells and defined names
///
/// ```json
/// {
///   "units": [{
///     "id": "book1",
///     "sheets": [{ "name": "Sheet1", "cells": { "A1": 10, "A2": "=A1*2" } }],
///     "names": [{ "name": "Rate", "refers_to": "=Sheet1!$A$1" }]
///   }]
/// }
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotFile {
    pub units: Vec<UnitFile>,
    #[serde(default)]
    pub options: Option<CalculationOptions>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitFile {
    pub id: String,
    #[serde(default)]
    pub date_1904: bool,
    pub sheets: Vec<SheetFile>,
    #[serde(default)]
    pub names: Vec<NameFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SheetFile {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub rows: Option<u32>,
    #[serde(default)]
    pub cols: Option<u16>,
    /// A1 address → number, boolean, text, `=formula`, `#ERROR` or null
    #[serde(default)]
    pub cells: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameFile {
    pub name: String,
    pub refers_to: String,
    /// Sheet name for a sheet-scoped name
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl SnapshotFile {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("'{}' is not a valid snapshot", path.display()))
    }

    pub fn into_snapshot(self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        for unit in self.units {
            let id = unit.id.clone();
            let book = unit
                .into_workbook()
                .with_context(|| format!("Unit '{}'", id))?;
            snapshot.add_unit(book)?;
        }
        Ok(snapshot)
    }
}

impl UnitFile {
    fn into_workbook(self) -> Result<Workbook> {
        let mut book = Workbook::empty(self.id);
        book.settings_mut().date_1904 = self.date_1904;

        for sheet in self.sheets {
            let mut ws = Worksheet::with_id(sheet.id.unwrap_or_else(|| sheet.name.clone()), &sheet.name);
            if sheet.rows.is_some() || sheet.cols.is_some() {
                let rows = sheet.rows.unwrap_or(ws.row_count());
                let cols = sheet.cols.unwrap_or(ws.col_count());
                ws = ws.with_bounds(rows, cols);
            }
            for (address, value) in &sheet.cells {
                match CellInput::from_json(value)
                    .with_context(|| format!("{}!{}", sheet.name, address))?
                {
                    CellInput::Formula(text) => ws.set_formula(address, &text)?,
                    CellInput::Value(value) => ws.set_value(address, value)?,
                }
            }
            book.add_existing_worksheet(ws)?;
        }

        for name in self.names {
            let range = match &name.sheet {
                Some(sheet) => {
                    let index = book
                        .sheet_index(sheet)
                        .ok_or_else(|| anyhow!("Name '{}' is scoped to unknown sheet '{}'", name.name, sheet))?;
                    NamedRange::sheet_scope(&name.name, &name.refers_to, index)
                }
                None => NamedRange::workbook_scope(&name.name, &name.refers_to),
            };
            let range = match name.comment {
                Some(comment) => range.with_comment(comment),
                None => range,
            };
            book.define_name(range)?;
        }
        Ok(book)
    }
}

/// What the user typed for a cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellInput {
    Formula(String),
    Value(CellValue),
}

impl CellInput {
    /// Interpret command-line text the way a formula bar would
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.starts_with('=') && trimmed.len() > 1 {
            return CellInput::Formula(trimmed.to_string());
        }
        if trimmed.is_empty() {
            return CellInput::Value(CellValue::Empty);
        }
        if trimmed.eq_ignore_ascii_case("TRUE") {
            return CellInput::Value(CellValue::Boolean(true));
        }
        if trimmed.eq_ignore_ascii_case("FALSE") {
            return CellInput::Value(CellValue::Boolean(false));
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            if n.is_finite() {
                return CellInput::Value(CellValue::Number(n));
            }
        }
        if let Some(err) = CellError::parse(trimmed) {
            return CellInput::Value(CellValue::Error(err));
        }
        CellInput::Value(CellValue::string(text))
    }

    fn from_json(value: &serde_json::Value) -> Result<Self> {
        Ok(match value {
            serde_json::Value::Null => CellInput::Value(CellValue::Empty),
            serde_json::Value::Bool(b) => CellInput::Value(CellValue::Boolean(*b)),
            serde_json::Value::Number(n) => {
                let n = n.as_f64().ok_or_else(|| anyhow!("Number {} out of range", n))?;
                CellInput::Value(CellValue::Number(n))
            }
            serde_json::Value::String(s) if s.starts_with('=') => CellInput::Formula(s.clone()),
            serde_json::Value::String(s) => match CellError::parse(s) {
                Some(err) => CellInput::Value(CellValue::Error(err)),
                None => CellInput::Value(CellValue::string(s.as_str())),
            },
            other => bail!("Unsupported cell content: {}", other),
        })
    }
}

/// Parse `Sheet!A1` (first unit) or `unit/Sheet!A1`
pub fn locate(snapshot: &Snapshot, reference: &str) -> Result<CellLocation> {
    let (unit, rest) = match reference.split_once('/') {
        Some((unit, rest)) => (unit.to_string(), rest),
        None => {
            let first = snapshot
                .unit(0)
                .ok_or_else(|| anyhow!("The snapshot has no units"))?;
            (first.unit_id().to_string(), reference)
        }
    };
    let (sheet, address) = rest
        .rsplit_once('!')
        .ok_or_else(|| anyhow!("Expected Sheet!A1, got '{}'", reference))?;
    let sheet = sheet.trim_matches('\'');
    snapshot
        .locate(&unit, sheet, address)
        .with_context(|| format!("Cannot resolve '{}'", reference))
}

/// `REF=VALUE` from `--set`
pub fn parse_assignment(text: &str) -> Result<(String, CellInput)> {
    let (reference, value) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected REF=VALUE, got '{}'", text))?;
    Ok((reference.trim().to_string(), CellInput::parse(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SNAPSHOT: &str = r##"{
        "units": [{
            "id": "book1",
            "sheets": [
                { "name": "Sheet1", "cells": { "A1": 10, "A2": "=A1*Rate", "A3": true, "A4": "#N/A" } },
                { "name": "Tiny", "id": "s2", "rows": 5, "cols": 2 }
            ],
            "names": [{ "name": "Rate", "refers_to": "=3" }]
        }],
        "options": { "chunk_size": 4, "calculate_volatile": false, "max_passes": 2, "max_depth": 64 }
    }"##;

    #[test]
    fn test_read_snapshot_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SNAPSHOT.as_bytes()).unwrap();
        let parsed = SnapshotFile::read(file.path()).unwrap();
        assert_eq!(parsed.options.as_ref().map(|o| o.chunk_size), Some(4));

        let snapshot = parsed.into_snapshot().unwrap();
        let a2 = snapshot.locate("book1", "Sheet1", "A2").unwrap();
        let ws = snapshot.worksheet(a2.sheet_key()).unwrap();
        assert_eq!(ws.formula_at(1, 0), Some("=A1*Rate"));
        assert_eq!(ws.value_at(2, 0), CellValue::Boolean(true));
        assert_eq!(ws.value_at(3, 0), CellValue::Error(CellError::Na));

        let tiny = snapshot.locate("book1", "s2", "A1").unwrap();
        let tiny = snapshot.worksheet(tiny.sheet_key()).unwrap();
        assert_eq!((tiny.row_count(), tiny.col_count()), (5, 2));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = serde_json::from_str::<SnapshotFile>(r#"{ "units": [], "extra": 1 }"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_cell_input() {
        assert_eq!(CellInput::parse("=A1+1"), CellInput::Formula("=A1+1".into()));
        assert_eq!(CellInput::parse(" 2.5 "), CellInput::Value(CellValue::Number(2.5)));
        assert_eq!(CellInput::parse("true"), CellInput::Value(CellValue::Boolean(true)));
        assert_eq!(
            CellInput::parse("#div/0!"),
            CellInput::Value(CellValue::Error(CellError::Div0))
        );
        assert_eq!(CellInput::parse("hello"), CellInput::Value(CellValue::string("hello")));
        assert_eq!(CellInput::parse(""), CellInput::Value(CellValue::Empty));
    }

    #[test]
    fn test_locate_and_assignment() {
        let snapshot = serde_json::from_str::<SnapshotFile>(SNAPSHOT)
            .unwrap()
            .into_snapshot()
            .unwrap();
        let cell = locate(&snapshot, "Sheet1!B3").unwrap();
        assert_eq!((cell.row, cell.col), (2, 1));
        let cell = locate(&snapshot, "book1/'Tiny'!A2").unwrap();
        assert_eq!(cell.sheet, 1);
        assert!(locate(&snapshot, "B3").is_err());
        assert!(locate(&snapshot, "nope/Sheet1!A1").is_err());

        let (reference, input) = parse_assignment("Sheet1!A1==B1*2").unwrap();
        assert_eq!(reference, "Sheet1!A1");
        assert_eq!(input, CellInput::Formula("=B1*2".into()));
    }
}

//! Worksheet type

use ahash::AHashMap;

use crate::cell::{CellAddress, CellData, CellRange, CellValue};
use crate::error::{Error, Result};
use crate::{MAX_COLS, MAX_ROWS};

/// A worksheet: a sparse grid of cells with declared bounds
///
/// References that reach past `row_count`/`col_count` evaluate to `#REF!`.
#[derive(Debug, Clone)]
pub struct Worksheet {
    /// Stable sheet id (survives renames)
    id: String,
    /// Display name used in formulas
    name: String,
    /// Number of rows the sheet declares
    row_count: u32,
    /// Number of columns the sheet declares
    col_count: u16,
    /// Cell storage keyed by (row, col)
    cells: AHashMap<(u32, u16), CellData>,
}

impl Worksheet {
    /// Create a new worksheet whose id equals its name
    pub fn new<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        Self::with_id(name.clone(), name)
    }

    /// Create a new worksheet with an explicit id
    pub fn with_id<I: Into<String>, S: Into<String>>(id: I, name: S) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            row_count: MAX_ROWS,
            col_count: MAX_COLS,
            cells: AHashMap::new(),
        }
    }

    /// Restrict the declared bounds of the sheet
    pub fn with_bounds(mut self, row_count: u32, col_count: u16) -> Self {
        self.row_count = row_count.clamp(1, MAX_ROWS);
        self.col_count = col_count.clamp(1, MAX_COLS);
        self
    }

    /// Get the sheet id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the sheet name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the sheet name
    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    /// Declared number of rows
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Declared number of columns
    pub fn col_count(&self) -> u16 {
        self.col_count
    }

    /// The whole declared area as a range
    pub fn bounds(&self) -> CellRange {
        CellRange::from_indices(0, 0, self.row_count - 1, self.col_count - 1)
    }

    /// Whether (row, col) lies inside the declared bounds
    pub fn in_bounds(&self, row: u32, col: u16) -> bool {
        row < self.row_count && col < self.col_count
    }

    fn check_bounds(&self, row: u32, col: u16) -> Result<()> {
        if row >= self.row_count {
            return Err(Error::RowOutOfBounds(row, self.row_count - 1));
        }
        if col >= self.col_count {
            return Err(Error::ColumnOutOfBounds(col, self.col_count - 1));
        }
        Ok(())
    }

    // === Cell access ===

    /// Get cell data by address string
    pub fn cell(&self, address: &str) -> Result<Option<&CellData>> {
        let addr = CellAddress::parse(address)?;
        Ok(self.cell_at(addr.row, addr.col))
    }

    /// Get cell data at (row, col)
    pub fn cell_at(&self, row: u32, col: u16) -> Option<&CellData> {
        self.cells.get(&(row, col))
    }

    /// Get the stored value at (row, col), `Empty` if the cell does not exist
    pub fn value_at(&self, row: u32, col: u16) -> CellValue {
        self.cells
            .get(&(row, col))
            .map(|c| c.value.clone())
            .unwrap_or_default()
    }

    /// Get the formula text at (row, col)
    pub fn formula_at(&self, row: u32, col: u16) -> Option<&str> {
        self.cells.get(&(row, col)).and_then(|c| c.formula.as_deref())
    }

    /// Whether (row, col) holds neither a value nor a formula
    pub fn is_blank_at(&self, row: u32, col: u16) -> bool {
        self.cells.get(&(row, col)).map_or(true, CellData::is_blank)
    }

    // === Mutation ===

    /// Set a plain value by address string (replaces any formula)
    pub fn set_value<V: Into<CellValue>>(&mut self, address: &str, value: V) -> Result<()> {
        let addr = CellAddress::parse(address)?;
        self.set_value_at(addr.row, addr.col, value)
    }

    /// Set a plain value at (row, col) (replaces any formula)
    pub fn set_value_at<V: Into<CellValue>>(&mut self, row: u32, col: u16, value: V) -> Result<()> {
        self.check_bounds(row, col)?;
        let value = value.into();
        if value.is_empty() {
            self.cells.remove(&(row, col));
        } else {
            self.cells.insert((row, col), CellData::value(value));
        }
        Ok(())
    }

    /// Set formula text by address string
    pub fn set_formula(&mut self, address: &str, formula: &str) -> Result<()> {
        let addr = CellAddress::parse(address)?;
        self.set_formula_at(addr.row, addr.col, formula)
    }

    /// Set formula text at (row, col)
    ///
    /// A leading `=` is added when missing. The previous result stays in place until the
    /// engine commits a new one.
    pub fn set_formula_at(&mut self, row: u32, col: u16, formula: &str) -> Result<()> {
        self.check_bounds(row, col)?;
        let text = if formula.starts_with('=') {
            formula.to_string()
        } else {
            format!("={}", formula)
        };
        self.cells.entry((row, col)).or_default().formula = Some(text);
        Ok(())
    }

    /// Store a computed result for a formula cell
    ///
    /// Returns `false` (and stores nothing) if the cell holds no formula.
    pub fn set_formula_result(&mut self, row: u32, col: u16, value: CellValue) -> bool {
        match self.cells.get_mut(&(row, col)) {
            Some(cell) if cell.is_formula() => {
                cell.value = value;
                true
            }
            _ => false,
        }
    }

    /// Clear a cell completely
    pub fn clear_at(&mut self, row: u32, col: u16) -> Option<CellData> {
        self.cells.remove(&(row, col))
    }

    // === Iteration ===

    /// Iterate over every stored cell as ((row, col), data)
    pub fn cells(&self) -> impl Iterator<Item = ((u32, u16), &CellData)> {
        self.cells.iter().map(|(k, v)| (*k, v))
    }

    /// Iterate over formula cells as (row, col, text)
    pub fn formula_cells(&self) -> impl Iterator<Item = (u32, u16, &str)> {
        self.cells
            .iter()
            .filter_map(|((r, c), d)| d.formula.as_deref().map(|f| (*r, *c, f)))
    }

    /// Number of stored cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Smallest range containing every stored cell
    pub fn used_range(&self) -> Option<CellRange> {
        self.cells.keys().fold(None, |acc, &(r, c)| {
            let here = CellRange::from_indices(r, c, r, c);
            Some(match acc {
                Some(range) => here.bounding(&range),
                None => here,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_and_formulas() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_value("A1", 10.0).unwrap();
        ws.set_formula("B1", "A1*2").unwrap();

        assert_eq!(ws.value_at(0, 0), CellValue::Number(10.0));
        assert_eq!(ws.formula_at(0, 1), Some("=A1*2"));
        assert!(ws.set_formula_result(0, 1, CellValue::Number(20.0)));
        assert!(!ws.set_formula_result(0, 0, CellValue::Number(1.0)));
        assert_eq!(ws.value_at(0, 1), CellValue::Number(20.0));
    }

    #[test]
    fn test_setting_value_replaces_formula() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_formula("A1", "=1+1").unwrap();
        ws.set_value("A1", "text").unwrap();
        assert_eq!(ws.formula_at(0, 0), None);
        assert_eq!(ws.formula_cells().count(), 0);
    }

    #[test]
    fn test_bounds() {
        let mut ws = Worksheet::new("Small").with_bounds(10, 5);
        assert!(ws.in_bounds(9, 4));
        assert!(!ws.in_bounds(10, 0));
        assert!(ws.set_value_at(10, 0, 1.0).is_err());
        assert_eq!(ws.bounds().to_string(), "A1:E10");
    }

    #[test]
    fn test_blank_and_used_range() {
        let mut ws = Worksheet::new("Sheet1");
        assert!(ws.is_blank_at(0, 0));
        assert_eq!(ws.used_range(), None);
        ws.set_value("B2", 1.0).unwrap();
        ws.set_value("D5", 1.0).unwrap();
        assert_eq!(ws.used_range().unwrap().to_string(), "B2:D5");
        ws.set_value("B2", CellValue::Empty).unwrap();
        assert!(ws.is_blank_at(1, 1));
    }
}

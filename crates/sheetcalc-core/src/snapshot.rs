//! Multi-unit cell snapshot
//!
//! A [`Snapshot`] holds every loaded unit. Cells are addressed by [`CellLocation`], an
//! index-based (unit, sheet, row, column) tuple that is cheap to copy and hash. The
//! evaluator never sees the snapshot directly; it reads through [`CellSource`], which the
//! engine layers over the snapshot to expose values computed earlier in the same pass.

use std::fmt;

use crate::cell::{CellAddress, CellData, CellValue};
use crate::error::{Error, Result};
use crate::workbook::Workbook;
use crate::worksheet::Worksheet;

/// A sheet inside a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SheetKey {
    /// Unit index in the snapshot
    pub unit: usize,
    /// Sheet index in the unit
    pub sheet: usize,
}

impl SheetKey {
    /// Create a new sheet key
    pub fn new(unit: usize, sheet: usize) -> Self {
        Self { unit, sheet }
    }

    /// A cell location on this sheet
    pub fn cell(&self, row: u32, col: u16) -> CellLocation {
        CellLocation::new(self.unit, self.sheet, row, col)
    }
}

/// A cell inside the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellLocation {
    /// Unit index in the snapshot
    pub unit: usize,
    /// Sheet index in the unit
    pub sheet: usize,
    /// Row (0-based)
    pub row: u32,
    /// Column (0-based)
    pub col: u16,
}

impl CellLocation {
    /// Create a new location
    pub fn new(unit: usize, sheet: usize, row: u32, col: u16) -> Self {
        Self {
            unit,
            sheet,
            row,
            col,
        }
    }

    /// The sheet this location is on
    pub fn sheet_key(&self) -> SheetKey {
        SheetKey::new(self.unit, self.sheet)
    }

    /// The location as a relative A1 address
    pub fn address(&self) -> CellAddress {
        CellAddress::new(self.row, self.col)
    }
}

impl fmt::Display for CellLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}!{}", self.unit, self.sheet, self.address())
    }
}

/// Read-only view of cell data consumed by a recalculation pass
pub trait CellSource {
    /// The current value at a location (`Empty` for missing cells)
    fn cell_value(&self, location: CellLocation) -> CellValue;

    /// Declared (row_count, col_count) of a sheet, `None` if the sheet does not exist
    fn sheet_bounds(&self, sheet: SheetKey) -> Option<(u32, u16)>;

    /// (rows, cols) from A1 that can hold data; whole-row and whole-column reads stop here
    fn used_extent(&self, sheet: SheetKey) -> Option<(u32, u16)> {
        self.sheet_bounds(sheet)
    }

    /// Index of a unit by id
    fn resolve_unit(&self, unit_id: &str) -> Option<usize>;

    /// Index of a sheet by name or id within a unit
    fn resolve_sheet(&self, unit: usize, name: &str) -> Option<usize>;

    /// Refers-to text of a defined name visible from `sheet`
    fn defined_name(&self, sheet: SheetKey, name: &str) -> Option<&str>;

    /// Whether the unit uses the 1904 date system
    fn date_1904(&self, unit: usize) -> bool;
}

/// Every loaded unit
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    units: Vec<Workbook>,
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit, returning its index
    pub fn add_unit(&mut self, workbook: Workbook) -> Result<usize> {
        if self.unit_index(workbook.unit_id()).is_some() {
            return Err(Error::DuplicateUnit(workbook.unit_id().to_string()));
        }
        self.units.push(workbook);
        Ok(self.units.len() - 1)
    }

    /// Number of units
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Get a unit by index
    pub fn unit(&self, index: usize) -> Option<&Workbook> {
        self.units.get(index)
    }

    /// Get a mutable unit by index
    pub fn unit_mut(&mut self, index: usize) -> Option<&mut Workbook> {
        self.units.get_mut(index)
    }

    /// Iterate over units
    pub fn units(&self) -> impl Iterator<Item = &Workbook> {
        self.units.iter()
    }

    /// Index of a unit by id
    pub fn unit_index(&self, unit_id: &str) -> Option<usize> {
        self.units.iter().position(|u| u.unit_id() == unit_id)
    }

    /// Get a worksheet by key
    pub fn worksheet(&self, key: SheetKey) -> Option<&Worksheet> {
        self.units.get(key.unit)?.worksheet(key.sheet)
    }

    /// Get a mutable worksheet by key
    pub fn worksheet_mut(&mut self, key: SheetKey) -> Option<&mut Worksheet> {
        self.units.get_mut(key.unit)?.worksheet_mut(key.sheet)
    }

    /// Resolve (unit id, sheet name or id) to a sheet key
    pub fn sheet_key(&self, unit_id: &str, sheet: &str) -> Result<SheetKey> {
        let unit = self
            .unit_index(unit_id)
            .ok_or_else(|| Error::UnitNotFound(unit_id.to_string()))?;
        let sheet_index = self.units[unit]
            .resolve_sheet(sheet)
            .ok_or_else(|| Error::SheetNotFound(sheet.to_string()))?;
        Ok(SheetKey::new(unit, sheet_index))
    }

    /// Resolve (unit id, sheet name or id, A1 address) to a location
    pub fn locate(&self, unit_id: &str, sheet: &str, address: &str) -> Result<CellLocation> {
        let key = self.sheet_key(unit_id, sheet)?;
        let addr = CellAddress::parse(address)?;
        Ok(key.cell(addr.row, addr.col))
    }

    /// Stored cell at a location
    pub fn cell_at(&self, location: CellLocation) -> Option<&CellData> {
        self.worksheet(location.sheet_key())?
            .cell_at(location.row, location.col)
    }

    /// Stored value at a location (`Empty` if missing)
    pub fn value_at(&self, location: CellLocation) -> CellValue {
        self.cell_at(location)
            .map(|c| c.value.clone())
            .unwrap_or_default()
    }

    /// (unit id, sheet id) of a location, for output records
    pub fn ids(&self, key: SheetKey) -> Option<(&str, &str)> {
        let unit = self.units.get(key.unit)?;
        let sheet = unit.worksheet(key.sheet)?;
        Some((unit.unit_id(), sheet.id()))
    }

    /// Human-readable `[unit]Sheet!A1` form of a location
    pub fn describe(&self, location: CellLocation) -> String {
        match (self.units.get(location.unit), self.worksheet(location.sheet_key())) {
            (Some(unit), Some(sheet)) => format!(
                "[{}]{}!{}",
                unit.unit_id(),
                sheet.name(),
                location.address()
            ),
            _ => location.to_string(),
        }
    }

    /// Iterate over every formula cell as (location, text)
    pub fn formula_cells(&self) -> impl Iterator<Item = (CellLocation, &str)> {
        self.units.iter().enumerate().flat_map(|(u, unit)| {
            unit.worksheets().enumerate().flat_map(move |(s, sheet)| {
                sheet
                    .formula_cells()
                    .map(move |(row, col, text)| (CellLocation::new(u, s, row, col), text))
            })
        })
    }
}

impl CellSource for Snapshot {
    fn cell_value(&self, location: CellLocation) -> CellValue {
        self.value_at(location)
    }

    fn sheet_bounds(&self, sheet: SheetKey) -> Option<(u32, u16)> {
        self.worksheet(sheet).map(|ws| (ws.row_count(), ws.col_count()))
    }

    fn used_extent(&self, sheet: SheetKey) -> Option<(u32, u16)> {
        let ws = self.worksheet(sheet)?;
        Some(
            ws.used_range()
                .map_or((0, 0), |r| (r.end.row + 1, r.end.col + 1)),
        )
    }

    fn resolve_unit(&self, unit_id: &str) -> Option<usize> {
        self.unit_index(unit_id)
    }

    fn resolve_sheet(&self, unit: usize, name: &str) -> Option<usize> {
        self.units.get(unit)?.resolve_sheet(name)
    }

    fn defined_name(&self, sheet: SheetKey, name: &str) -> Option<&str> {
        self.units
            .get(sheet.unit)?
            .named_ranges()
            .get(name, sheet.sheet)
            .map(|nr| nr.refers_to.as_str())
    }

    fn date_1904(&self, unit: usize) -> bool {
        self.units
            .get(unit)
            .map_or(false, |u| u.settings().date_1904)
    }
}

//! Spilled array results
//!
//! An array result occupies a block anchored at its formula cell. The block may only cover
//! cells that are blank, inside the sheet, and not claimed by another spill. The store keeps
//! committed blocks plus the blocks that were refused, so a later edit that frees the
//! space can retry the origin.

use ahash::AHashMap;
use sheetcalc_core::{CellLocation, CellRange, CellValue, SheetKey};
use sheetcalc_formula::ArrayValue;

/// A committed (or pending) spill block
#[derive(Debug, Clone, PartialEq)]
pub struct SpillArea {
    /// The whole block, origin included
    pub range: CellRange,
    pub values: ArrayValue,
}

impl SpillArea {
    pub fn new(origin: CellLocation, values: ArrayValue) -> Self {
        let range = CellRange::from_indices(
            origin.row,
            origin.col,
            origin.row + values.rows() as u32 - 1,
            origin.col + values.cols() as u16 - 1,
        );
        Self { range, values }
    }

    /// Value at an absolute position inside the block
    pub fn value_at(&self, row: u32, col: u16) -> Option<CellValue> {
        if !self.range.contains_cell(row, col) {
            return None;
        }
        self.values
            .get(
                (row - self.range.start.row) as usize,
                (col - self.range.start.col) as usize,
            )
            .map(|v| v.to_cell_value())
    }

    /// Every cell except the origin, row-major, with its value
    pub fn targets(&self, sheet: SheetKey) -> impl Iterator<Item = (CellLocation, CellValue)> + '_ {
        let origin = self.range.start;
        self.range
            .cells()
            .filter(move |addr| *addr != origin)
            .filter_map(move |addr| {
                self.value_at(addr.row, addr.col)
                    .map(|v| (sheet.cell(addr.row, addr.col), v))
            })
    }
}

/// Where an array result wants to go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpillPlan {
    /// 1x1 result, nothing to spill
    Scalar,
    /// The block is free
    Spill(CellRange),
    /// Some cell in the block is occupied
    Blocked(CellRange),
    /// The block runs past the sheet edge
    OutOfBounds,
}

/// Decide whether a `rows` x `cols` result anchored at `origin` can spill
///
/// `occupied` is asked about every cell of the block except the origin.
pub fn plan(
    origin: CellLocation,
    rows: usize,
    cols: usize,
    bounds: (u32, u16),
    occupied: impl Fn(CellLocation) -> bool,
) -> SpillPlan {
    if rows <= 1 && cols <= 1 {
        return SpillPlan::Scalar;
    }
    let end_row = u64::from(origin.row) + rows as u64 - 1;
    let end_col = u64::from(origin.col) + cols as u64 - 1;
    if end_row >= u64::from(bounds.0) || end_col >= u64::from(bounds.1) {
        return SpillPlan::OutOfBounds;
    }

    let range = CellRange::from_indices(origin.row, origin.col, end_row as u32, end_col as u16);
    let sheet = origin.sheet_key();
    let blocked = range
        .cells()
        .map(|addr| sheet.cell(addr.row, addr.col))
        .any(|cell| cell != origin && occupied(cell));
    if blocked {
        SpillPlan::Blocked(range)
    } else {
        SpillPlan::Spill(range)
    }
}

/// Committed spill blocks, keyed by origin
#[derive(Debug, Default, Clone)]
pub struct SpillStore {
    areas: AHashMap<CellLocation, SpillArea>,
    blocked: AHashMap<CellLocation, CellRange>,
}

impl SpillStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// The block spilled by `origin`
    pub fn get(&self, origin: CellLocation) -> Option<&SpillArea> {
        self.areas.get(&origin)
    }

    /// The origin whose block covers `cell`, not counting the origin cell itself
    pub fn covering(&self, cell: CellLocation) -> Option<CellLocation> {
        self.areas
            .iter()
            .find(|(origin, area)| {
                **origin != cell
                    && origin.sheet_key() == cell.sheet_key()
                    && area.range.contains_cell(cell.row, cell.col)
            })
            .map(|(origin, _)| *origin)
    }

    /// Origins refused because their block overlapped `cell`
    pub fn blocked_by(&self, cell: CellLocation) -> Vec<CellLocation> {
        let mut origins: Vec<CellLocation> = self
            .blocked
            .iter()
            .filter(|(origin, range)| {
                origin.sheet_key() == cell.sheet_key() && range.contains_cell(cell.row, cell.col)
            })
            .map(|(origin, _)| *origin)
            .collect();
        origins.sort();
        origins
    }

    /// Record a committed block, returning the block it replaces
    pub fn insert(&mut self, origin: CellLocation, area: SpillArea) -> Option<SpillArea> {
        self.blocked.remove(&origin);
        self.areas.insert(origin, area)
    }

    /// Forget the block of `origin`
    pub fn remove(&mut self, origin: CellLocation) -> Option<SpillArea> {
        self.blocked.remove(&origin);
        self.areas.remove(&origin)
    }

    /// Remember that `origin` wanted `range` but could not have it
    pub fn set_blocked(&mut self, origin: CellLocation, range: CellRange) {
        self.areas.remove(&origin);
        self.blocked.insert(origin, range);
    }

    /// Furthest (rows, cols) from A1 covered by any block on `sheet`
    pub fn extent(&self, sheet: SheetKey) -> Option<(u32, u16)> {
        self.areas
            .iter()
            .filter(|(origin, _)| origin.sheet_key() == sheet)
            .map(|(_, area)| (area.range.end.row + 1, area.range.end.col + 1))
            .reduce(|a, b| (a.0.max(b.0), a.1.max(b.1)))
    }

    pub fn clear(&mut self) {
        self.areas.clear();
        self.blocked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sheetcalc_formula::FormulaValue;

    fn column(values: &[f64]) -> ArrayValue {
        ArrayValue::from_rows(
            values
                .iter()
                .map(|n| vec![FormulaValue::Number(*n)])
                .collect(),
        )
    }

    #[test]
    fn test_plan() {
        let origin = CellLocation::new(0, 0, 0, 0);
        assert_eq!(plan(origin, 1, 1, (10, 10), |_| true), SpillPlan::Scalar);
        assert_eq!(
            plan(origin, 3, 1, (10, 10), |_| false),
            SpillPlan::Spill(CellRange::from_indices(0, 0, 2, 0))
        );
        assert_eq!(
            plan(origin, 3, 1, (10, 10), |c| c.row == 2),
            SpillPlan::Blocked(CellRange::from_indices(0, 0, 2, 0))
        );
        assert_eq!(plan(origin, 11, 1, (10, 10), |_| false), SpillPlan::OutOfBounds);
        // The origin itself is never asked about
        assert_eq!(
            plan(origin, 2, 1, (10, 10), |c| c == origin),
            SpillPlan::Spill(CellRange::from_indices(0, 0, 1, 0))
        );
    }

    #[test]
    fn test_store_lookup() {
        let sheet = SheetKey::new(0, 0);
        let origin = sheet.cell(1, 1);
        let mut store = SpillStore::new();
        store.insert(origin, SpillArea::new(origin, column(&[1.0, 2.0, 3.0])));

        assert_eq!(store.covering(sheet.cell(3, 1)), Some(origin));
        assert_eq!(store.covering(origin), None);
        assert_eq!(store.covering(sheet.cell(4, 1)), None);
        assert_eq!(store.covering(CellLocation::new(0, 1, 2, 1)), None);
        assert_eq!(store.extent(sheet), Some((4, 2)));

        let area = store.get(origin).unwrap();
        assert_eq!(area.value_at(3, 1), Some(CellValue::Number(3.0)));
        let targets: Vec<_> = area.targets(sheet).collect();
        assert_eq!(
            targets,
            vec![
                (sheet.cell(2, 1), CellValue::Number(2.0)),
                (sheet.cell(3, 1), CellValue::Number(3.0)),
            ]
        );
    }

    #[test]
    fn test_blocked_origins() {
        let sheet = SheetKey::new(0, 0);
        let origin = sheet.cell(0, 0);
        let mut store = SpillStore::new();
        store.set_blocked(origin, CellRange::from_indices(0, 0, 4, 0));
        assert_eq!(store.blocked_by(sheet.cell(2, 0)), vec![origin]);
        assert!(store.blocked_by(sheet.cell(2, 1)).is_empty());

        store.insert(origin, SpillArea::new(origin, column(&[1.0, 2.0])));
        assert!(store.blocked_by(sheet.cell(2, 0)).is_empty());
        assert_eq!(store.len(), 1);
    }
}

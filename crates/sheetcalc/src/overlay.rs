//! The view a recalculation pass reads through
//!
//! Values computed earlier in the batch live in [`Pending`] until the batch commits. The
//! overlay serves them first, then committed spill blocks, then the snapshot itself, so
//! later formulas observe earlier results while the snapshot stays untouched.

use ahash::AHashMap;
use sheetcalc_core::{CellLocation, CellSource, CellValue, SheetKey, Snapshot};
use sheetcalc_formula::FormulaValue;

use crate::spill::{SpillArea, SpillStore};

/// Results of the batch in progress
#[derive(Debug, Default)]
pub struct Pending {
    /// Latest value of every formula evaluated so far
    pub values: AHashMap<CellLocation, FormulaValue>,
    /// Spill decision of every origin evaluated so far; `None` means no block
    pub spills: AHashMap<CellLocation, Option<SpillArea>>,
}

impl Pending {
    /// The pending block covering `cell`, not counting its origin
    pub fn spill_covering(&self, cell: CellLocation) -> Option<(CellLocation, &SpillArea)> {
        self.spills.iter().find_map(|(origin, area)| {
            let area = area.as_ref()?;
            (*origin != cell
                && origin.sheet_key() == cell.sheet_key()
                && area.range.contains_cell(cell.row, cell.col))
            .then_some((*origin, area))
        })
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.spills.clear();
    }
}

/// Snapshot + committed spills + pending results
pub struct Overlay<'a> {
    pub snapshot: &'a Snapshot,
    pub spills: &'a SpillStore,
    pub pending: &'a Pending,
}

impl Overlay<'_> {
    /// The origin whose block covers `cell` as the batch currently sees it
    pub fn spill_owner(&self, cell: CellLocation) -> Option<CellLocation> {
        if let Some((origin, _)) = self.pending.spill_covering(cell) {
            return Some(origin);
        }
        self.spills
            .covering(cell)
            .filter(|origin| !self.pending.spills.contains_key(origin))
    }

    /// Whether a spill from `origin` would collide with something at `cell`
    pub fn is_occupied(&self, origin: CellLocation, cell: CellLocation) -> bool {
        let stored = self
            .snapshot
            .worksheet(cell.sheet_key())
            .map_or(false, |ws| !ws.is_blank_at(cell.row, cell.col));
        stored || self.spill_owner(cell).map_or(false, |owner| owner != origin)
    }
}

impl CellSource for Overlay<'_> {
    fn cell_value(&self, location: CellLocation) -> CellValue {
        if let Some(value) = self.pending.values.get(&location) {
            return value.to_cell_value();
        }
        if let Some((_, area)) = self.pending.spill_covering(location) {
            return area
                .value_at(location.row, location.col)
                .unwrap_or_default();
        }
        if let Some(origin) = self.spills.covering(location) {
            if !self.pending.spills.contains_key(&origin) {
                if let Some(value) = self
                    .spills
                    .get(origin)
                    .and_then(|area| area.value_at(location.row, location.col))
                {
                    return value;
                }
            }
        }
        self.snapshot.cell_value(location)
    }

    fn sheet_bounds(&self, sheet: SheetKey) -> Option<(u32, u16)> {
        self.snapshot.sheet_bounds(sheet)
    }

    fn used_extent(&self, sheet: SheetKey) -> Option<(u32, u16)> {
        let (mut rows, mut cols) = self.snapshot.used_extent(sheet)?;
        let spilled = self.spills.extent(sheet).into_iter().chain(
            self.pending
                .spills
                .iter()
                .filter(|(origin, _)| origin.sheet_key() == sheet)
                .filter_map(|(_, area)| area.as_ref())
                .map(|area| (area.range.end.row + 1, area.range.end.col + 1)),
        );
        for (r, c) in spilled {
            rows = rows.max(r);
            cols = cols.max(c);
        }
        Some((rows, cols))
    }

    fn resolve_unit(&self, unit_id: &str) -> Option<usize> {
        self.snapshot.resolve_unit(unit_id)
    }

    fn resolve_sheet(&self, unit: usize, name: &str) -> Option<usize> {
        self.snapshot.resolve_sheet(unit, name)
    }

    fn defined_name(&self, sheet: SheetKey, name: &str) -> Option<&str> {
        self.snapshot.defined_name(sheet, name)
    }

    fn date_1904(&self, unit: usize) -> bool {
        self.snapshot.date_1904(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sheetcalc_core::Workbook;
    use sheetcalc_formula::ArrayValue;

    fn snapshot() -> Snapshot {
        let mut book = Workbook::new("book1");
        let ws = book.worksheet_mut(0).unwrap();
        ws.set_value("A1", 1.0).unwrap();
        ws.set_formula("B1", "=SEQUENCE(3)").unwrap();
        ws.set_formula_result(0, 1, CellValue::Number(1.0));
        let mut snapshot = Snapshot::new();
        snapshot.add_unit(book).unwrap();
        snapshot
    }

    fn column(values: &[f64]) -> ArrayValue {
        ArrayValue::from_rows(values.iter().map(|n| vec![FormulaValue::Number(*n)]).collect())
    }

    #[test]
    fn test_layering() {
        let snapshot = snapshot();
        let sheet = SheetKey::new(0, 0);
        let origin = sheet.cell(0, 1);
        let mut spills = SpillStore::new();
        spills.insert(origin, SpillArea::new(origin, column(&[1.0, 2.0, 3.0])));
        let mut pending = Pending::default();

        {
            let overlay = Overlay { snapshot: &snapshot, spills: &spills, pending: &pending };
            assert_eq!(overlay.cell_value(sheet.cell(0, 0)), CellValue::Number(1.0));
            assert_eq!(overlay.cell_value(sheet.cell(2, 1)), CellValue::Number(3.0));
            assert_eq!(overlay.used_extent(sheet), Some((3, 2)));
            assert!(overlay.is_occupied(sheet.cell(1, 0), sheet.cell(1, 1)));
            assert!(!overlay.is_occupied(origin, sheet.cell(1, 1)));
        }

        // Re-evaluated origin: the pending block replaces the committed one
        pending.values.insert(origin, FormulaValue::Number(10.0));
        pending
            .spills
            .insert(origin, Some(SpillArea::new(origin, column(&[10.0, 20.0]))));
        let overlay = Overlay { snapshot: &snapshot, spills: &spills, pending: &pending };
        assert_eq!(overlay.cell_value(origin), CellValue::Number(10.0));
        assert_eq!(overlay.cell_value(sheet.cell(1, 1)), CellValue::Number(20.0));
        assert_eq!(overlay.cell_value(sheet.cell(2, 1)), CellValue::Empty);
    }
}

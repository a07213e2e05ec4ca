//! Mutations coming in and calculation events going out
//!
//! The host changes cell data through [`Mutation`]s applied with
//! [`crate::Engine::apply`]. Recalculated values leave the engine as
//! [`CalculationEvent`]s published on a [`MutationSink`].

use std::sync::mpsc;

use sheetcalc_core::{CellLocation, CellRange, CellValue, NamedRange, SheetKey};

/// A change to the loaded cell data
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Store a plain value, replacing any formula
    SetValue {
        location: CellLocation,
        value: CellValue,
    },
    /// Store formula text; the previous value stays until the next commit
    SetFormula {
        location: CellLocation,
        formula: String,
    },
    /// Remove the cell's value and formula
    Clear { location: CellLocation },
    /// Define or redefine a name in a unit
    DefineName { unit: usize, name: NamedRange },
}

impl Mutation {
    pub fn set_value(location: CellLocation, value: impl Into<CellValue>) -> Self {
        Mutation::SetValue {
            location,
            value: value.into(),
        }
    }

    pub fn set_formula(location: CellLocation, formula: impl Into<String>) -> Self {
        Mutation::SetFormula {
            location,
            formula: formula.into(),
        }
    }

    pub fn clear(location: CellLocation) -> Self {
        Mutation::Clear { location }
    }
}

/// A block of cells whose values are about to change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyRange {
    pub sheet: SheetKey,
    pub unit_id: String,
    pub sheet_id: String,
    pub range: CellRange,
}

/// A cell an array result spilled into
#[derive(Debug, Clone, PartialEq)]
pub struct SpillTarget {
    pub location: CellLocation,
    pub value: CellValue,
}

/// The committed result of one recalculated formula
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub location: CellLocation,
    pub unit_id: String,
    pub sheet_id: String,
    /// Value shown in the formula cell (top-left element for arrays)
    pub value: CellValue,
    /// Display string when `value` is an error, e.g. `#DIV/0!`
    pub display_error: Option<String>,
    /// Cells beyond the origin filled by an array result, row-major
    pub spill: Vec<SpillTarget>,
}

/// Notifications published by a recalculation batch
#[derive(Debug, Clone, PartialEq)]
pub enum CalculationEvent {
    /// Cells that a pass is going to recompute
    DirtyRanges(Vec<DirtyRange>),
    /// New values, published once when the batch commits
    ValuesUpdated(Vec<CellUpdate>),
}

/// Receives calculation events
pub trait MutationSink {
    fn publish(&mut self, event: CalculationEvent);
}

impl MutationSink for Vec<CalculationEvent> {
    fn publish(&mut self, event: CalculationEvent) {
        self.push(event);
    }
}

impl MutationSink for mpsc::Sender<CalculationEvent> {
    fn publish(&mut self, event: CalculationEvent) {
        if self.send(event).is_err() {
            tracing::warn!("calculation event dropped: receiver disconnected");
        }
    }
}

/// Coalesce cells into column runs, one [`DirtyRange`] per run
///
/// `ids` maps a sheet to its (unit id, sheet id).
pub(crate) fn coalesce<'a>(
    cells: impl IntoIterator<Item = CellLocation>,
    ids: impl Fn(SheetKey) -> Option<(&'a str, &'a str)>,
) -> Vec<DirtyRange> {
    let mut cells: Vec<CellLocation> = cells.into_iter().collect();
    cells.sort_by_key(|c| (c.unit, c.sheet, c.col, c.row));
    cells.dedup();

    let mut runs: Vec<(SheetKey, CellRange)> = Vec::new();
    for cell in cells {
        if let Some((sheet, range)) = runs.last_mut() {
            if *sheet == cell.sheet_key()
                && range.start.col == cell.col
                && range.end.row + 1 == cell.row
            {
                range.end.row = cell.row;
                continue;
            }
        }
        runs.push((
            cell.sheet_key(),
            CellRange::from_indices(cell.row, cell.col, cell.row, cell.col),
        ));
    }

    runs.into_iter()
        .filter_map(|(sheet, range)| {
            let (unit_id, sheet_id) = ids(sheet)?;
            Some(DirtyRange {
                sheet,
                unit_id: unit_id.to_string(),
                sheet_id: sheet_id.to_string(),
                range,
            })
        })
        .collect()
}

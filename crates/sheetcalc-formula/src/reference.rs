//! Resolved references
//!
//! A [`Reference`] names one or more rectangular areas on a single sheet. It does not hold
//! cell data; values are read from a [`CellSource`] only when an operation needs them.

use sheetcalc_core::{CellError, CellLocation, CellRange, CellSource, SheetKey};

use crate::ast::{RefKind, ReferenceExpr};
use crate::value::{ArrayValue, FormulaValue};

/// One rectangular area of a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Area {
    pub kind: RefKind,
    pub range: CellRange,
}

impl Area {
    pub fn new(kind: RefKind, range: CellRange) -> Self {
        Self { kind, range }
    }

    fn from_range(range: CellRange) -> Self {
        let kind = if range.is_single_cell() {
            RefKind::Cell
        } else {
            RefKind::Range
        };
        Self { kind, range }
    }
}

/// A reference resolved to a sheet of the snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    sheet: SheetKey,
    /// Never empty
    areas: Vec<Area>,
}

impl Reference {
    /// A single-area reference
    pub fn new(sheet: SheetKey, kind: RefKind, range: CellRange) -> Self {
        Self {
            sheet,
            areas: vec![Area::new(kind, range)],
        }
    }

    /// A reference to one cell
    pub fn cell(location: CellLocation) -> Self {
        Self::new(
            location.sheet_key(),
            RefKind::Cell,
            CellRange::from_indices(location.row, location.col, location.row, location.col),
        )
    }

    /// Resolve a reference literal relative to the sheet holding the formula
    ///
    /// Unknown units or sheets, and areas outside the sheet's declared bounds, are `#REF!`.
    /// Whole-row and whole-column references are clipped to the sheet bounds.
    pub fn resolve(
        expr: &ReferenceExpr,
        source: &dyn CellSource,
        current: SheetKey,
    ) -> Result<Self, CellError> {
        let unit = match &expr.unit {
            Some(id) => source.resolve_unit(id).ok_or(CellError::Ref)?,
            None => current.unit,
        };
        let sheet = match &expr.sheet {
            Some(name) => source.resolve_sheet(unit, name).ok_or(CellError::Ref)?,
            None if unit == current.unit => current.sheet,
            None => 0,
        };
        let key = SheetKey::new(unit, sheet);
        let reference = Self::new(key, expr.kind, expr.range);
        reference.check_bounds(source)
    }

    /// Clip row/column areas to the sheet and reject anything outside it
    fn check_bounds(mut self, source: &dyn CellSource) -> Result<Self, CellError> {
        let (rows, cols) = source.sheet_bounds(self.sheet).ok_or(CellError::Ref)?;
        if rows == 0 || cols == 0 {
            return Err(CellError::Ref);
        }
        for area in &mut self.areas {
            let r = area.range;
            area.range = match area.kind {
                RefKind::Row => {
                    if r.end.row >= rows {
                        return Err(CellError::Ref);
                    }
                    CellRange::from_indices(r.start.row, 0, r.end.row, cols - 1)
                }
                RefKind::Column => {
                    if r.end.col >= cols {
                        return Err(CellError::Ref);
                    }
                    CellRange::from_indices(0, r.start.col, rows - 1, r.end.col)
                }
                RefKind::Cell | RefKind::Range => {
                    if r.end.row >= rows || r.end.col >= cols {
                        return Err(CellError::Ref);
                    }
                    r
                }
            };
        }
        Ok(self)
    }

    pub fn sheet(&self) -> SheetKey {
        self.sheet
    }

    pub fn areas(&self) -> &[Area] {
        &self.areas
    }

    /// The first area
    pub fn area(&self) -> Area {
        self.areas[0]
    }

    pub fn is_multi_area(&self) -> bool {
        self.areas.len() > 1
    }

    pub fn is_single_cell(&self) -> bool {
        !self.is_multi_area() && self.area().range.is_single_cell()
    }

    /// Top-left cell of the first area
    pub fn top_left(&self) -> CellLocation {
        let start = self.area().range.start;
        self.sheet.cell(start.row, start.col)
    }

    /// Rows of the first area
    pub fn rows(&self) -> u32 {
        self.area().range.row_count()
    }

    /// Columns of the first area
    pub fn cols(&self) -> u16 {
        self.area().range.col_count()
    }

    /// Range operator (`a:b`): the bounding box of two single-area references
    ///
    /// Cells and ranges combine freely, rows only with rows and columns only with
    /// columns. Other kinds, multi-area operands or different sheets are `#REF!`.
    pub fn union_by(&self, other: &Reference) -> Result<Reference, CellError> {
        if self.sheet != other.sheet || self.is_multi_area() || other.is_multi_area() {
            return Err(CellError::Ref);
        }
        let (a, b) = (self.area(), other.area());
        let kind = match (a.kind, b.kind) {
            (RefKind::Cell | RefKind::Range, RefKind::Cell | RefKind::Range) => RefKind::Range,
            (RefKind::Row, RefKind::Row) => RefKind::Row,
            (RefKind::Column, RefKind::Column) => RefKind::Column,
            _ => return Err(CellError::Ref),
        };
        let range = a.range.bounding(&b.range);
        let kind = if kind == RefKind::Range && range.is_single_cell() {
            RefKind::Cell
        } else {
            kind
        };
        Ok(Reference::new(self.sheet, kind, range))
    }

    /// Union operator (`(a, b)`): a multi-area reference
    ///
    /// Areas on different sheets cannot be combined and yield `#VALUE!`.
    pub fn union(&self, other: &Reference) -> Result<Reference, CellError> {
        if self.sheet != other.sheet {
            return Err(CellError::Value);
        }
        let mut areas = self.areas.clone();
        areas.extend(other.areas.iter().copied());
        Ok(Reference {
            sheet: self.sheet,
            areas,
        })
    }

    /// Intersection operator (`a b`): the cells both references cover
    ///
    /// No overlap is `#NULL!`; different sheets are `#VALUE!`.
    pub fn intersect(&self, other: &Reference) -> Result<Reference, CellError> {
        if self.sheet != other.sheet {
            return Err(CellError::Value);
        }
        let mut areas = Vec::new();
        for a in &self.areas {
            for b in &other.areas {
                if let Some(range) = a.range.intersect(&b.range) {
                    let kind = match (a.kind, b.kind) {
                        (RefKind::Row, RefKind::Row) => RefKind::Row,
                        (RefKind::Column, RefKind::Column) => RefKind::Column,
                        _ => Area::from_range(range).kind,
                    };
                    areas.push(Area::new(kind, range));
                }
            }
        }
        if areas.is_empty() {
            return Err(CellError::Null);
        }
        Ok(Reference {
            sheet: self.sheet,
            areas,
        })
    }

    /// Shift and resize the first area (`OFFSET`)
    pub fn offset(
        &self,
        source: &dyn CellSource,
        rows: i64,
        cols: i64,
        height: Option<i64>,
        width: Option<i64>,
    ) -> Result<Reference, CellError> {
        let range = self.area().range;
        let height = height.unwrap_or(i64::from(range.row_count()));
        let width = width.unwrap_or(i64::from(range.col_count()));
        if height < 1 || width < 1 {
            return Err(CellError::Ref);
        }
        let start = range.start.offset(rows, cols).ok_or(CellError::Ref)?;
        let end = start.offset(height - 1, width - 1).ok_or(CellError::Ref)?;
        let moved = CellRange::new(start, end);
        Reference {
            sheet: self.sheet,
            areas: vec![Area::from_range(moved)],
        }
        .check_bounds(source)
    }

    /// Every cell location, area by area in row-major order
    pub fn locations(&self) -> impl Iterator<Item = CellLocation> + '_ {
        let sheet = self.sheet;
        self.areas
            .iter()
            .flat_map(move |area| area.range.cells().map(move |addr| sheet.cell(addr.row, addr.col)))
    }

    /// Materialize the first area as an array
    ///
    /// Whole-row and whole-column areas stop at the sheet's used extent. Multi-area
    /// references have no array form and yield `#VALUE!`; areas larger than
    /// [`MAX_ARRAY_CELLS`](crate::value::MAX_ARRAY_CELLS) yield `#NUM!`.
    pub fn to_array_value(&self, source: &dyn CellSource) -> Result<ArrayValue, CellError> {
        if self.is_multi_area() {
            return Err(CellError::Value);
        }
        let range = self.materialized_range(self.area(), source);
        let rows = range.row_count() as usize;
        let cols = range.col_count() as usize;
        let (r0, c0) = (range.start.row, range.start.col);
        ArrayValue::try_from_fn(rows, cols, |r, c| {
            let loc = self.sheet.cell(r0 + r as u32, c0 + c as u16);
            FormulaValue::from(source.cell_value(loc))
        })
    }

    /// Dereference for value contexts: a single cell is its value, anything else an array
    pub fn to_value(&self, source: &dyn CellSource) -> FormulaValue {
        if self.is_single_cell() {
            return FormulaValue::from(source.cell_value(self.top_left()));
        }
        match self.to_array_value(source) {
            Ok(arr) => FormulaValue::Array(arr),
            Err(e) => FormulaValue::Error(e),
        }
    }

    /// Values of every area, skipping cells past the used extent
    ///
    /// Aggregate functions use this; blanks inside the extent are still reported.
    pub fn values(&self, source: &dyn CellSource) -> Vec<FormulaValue> {
        let mut out = Vec::new();
        for area in &self.areas {
            let range = match area.kind {
                RefKind::Cell => area.range,
                _ => self.used_part(area.range, source),
            };
            for addr in range.cells() {
                let loc = self.sheet.cell(addr.row, addr.col);
                out.push(FormulaValue::from(source.cell_value(loc)));
            }
        }
        out
    }

    /// Number of cells across all areas
    pub fn cell_count(&self) -> u64 {
        self.areas.iter().map(|a| a.range.cell_count()).sum()
    }

    fn materialized_range(&self, area: Area, source: &dyn CellSource) -> CellRange {
        match area.kind {
            RefKind::Row | RefKind::Column => self.used_part(area.range, source),
            RefKind::Cell | RefKind::Range => area.range,
        }
    }

    /// `range` cut back to the used extent, keeping at least its top-left cell
    fn used_part(&self, range: CellRange, source: &dyn CellSource) -> CellRange {
        let (used_rows, used_cols) = source
            .used_extent(self.sheet)
            .unwrap_or((range.end.row + 1, range.end.col + 1));
        let end_row = range
            .end
            .row
            .min(used_rows.saturating_sub(1))
            .max(range.start.row);
        let end_col = range
            .end
            .col
            .min(used_cols.saturating_sub(1))
            .max(range.start.col);
        CellRange::from_indices(range.start.row, range.start.col, end_row, end_col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_reference;
    use pretty_assertions::assert_eq;
    use sheetcalc_core::{CellValue, Snapshot, Workbook, Worksheet};

    fn snapshot() -> Snapshot {
        let mut book = Workbook::new("book1");
        book.add_existing_worksheet(Worksheet::new("Small").with_bounds(10, 5))
            .unwrap();
        let ws = book.worksheet_mut(0).unwrap();
        ws.set_value("A1", 1.0).unwrap();
        ws.set_value("A2", 2.0).unwrap();
        ws.set_value("B1", "x").unwrap();
        let mut snapshot = Snapshot::new();
        snapshot.add_unit(book).unwrap();
        snapshot
    }

    fn resolve(s: &Snapshot, text: &str) -> Result<Reference, CellError> {
        Reference::resolve(&parse_reference(text).unwrap(), s, SheetKey::new(0, 0))
    }

    #[test]
    fn test_resolve_and_bounds() {
        let s = snapshot();
        assert_eq!(resolve(&s, "Small!E10").unwrap().sheet(), SheetKey::new(0, 1));
        assert_eq!(resolve(&s, "Small!F1"), Err(CellError::Ref));
        assert_eq!(resolve(&s, "Small!A11"), Err(CellError::Ref));
        assert_eq!(resolve(&s, "Missing!A1"), Err(CellError::Ref));
        assert_eq!(resolve(&s, "[other]Sheet1!A1"), Err(CellError::Ref));
        assert_eq!(resolve(&s, "Small!11:11"), Err(CellError::Ref));

        let col = resolve(&s, "Small!B:B").unwrap();
        assert_eq!(col.area().range.to_a1_string(), "B1:B10");
    }

    #[test]
    fn test_union_by_kinds() {
        let s = snapshot();
        let a1 = resolve(&s, "A1").unwrap();
        let c3 = resolve(&s, "C3").unwrap();
        let r = a1.union_by(&c3).unwrap();
        assert_eq!(r.area().kind, RefKind::Range);
        assert_eq!(r.area().range.to_a1_string(), "A1:C3");

        let rows = resolve(&s, "1:2").unwrap().union_by(&resolve(&s, "5:5").unwrap()).unwrap();
        assert_eq!(rows.area().kind, RefKind::Row);
        assert_eq!(rows.rows(), 5);

        let row = resolve(&s, "1:1").unwrap();
        let col = resolve(&s, "A:A").unwrap();
        assert_eq!(row.union_by(&col), Err(CellError::Ref));
        assert_eq!(a1.union_by(&row), Err(CellError::Ref));
    }

    #[test]
    fn test_union_and_intersect() {
        let s = snapshot();
        let a = resolve(&s, "A1:B2").unwrap();
        let b = resolve(&s, "A1:A5").unwrap();
        let both = a.intersect(&b).unwrap();
        assert_eq!(both.area().range.to_a1_string(), "A1:A2");

        let far = resolve(&s, "D4").unwrap();
        assert_eq!(a.intersect(&far), Err(CellError::Null));

        let multi = a.union(&far).unwrap();
        assert!(multi.is_multi_area());
        assert_eq!(multi.cell_count(), 5);
        assert_eq!(multi.to_array_value(&s), Err(CellError::Value));

        let other_sheet = resolve(&s, "Small!A1").unwrap();
        assert_eq!(a.union(&other_sheet), Err(CellError::Value));
    }

    #[test]
    fn test_materialize() {
        let s = snapshot();
        let r = resolve(&s, "A1:B2").unwrap();
        let arr = r.to_array_value(&s).unwrap();
        assert_eq!(
            arr.to_rows(),
            vec![
                vec![FormulaValue::Number(1.0), FormulaValue::String("x".into())],
                vec![FormulaValue::Number(2.0), FormulaValue::Empty],
            ]
        );
        assert_eq!(resolve(&s, "A2").unwrap().to_value(&s), FormulaValue::Number(2.0));

        // Whole column stops at the used extent
        let col = resolve(&s, "A:A").unwrap();
        assert_eq!(col.to_array_value(&s).unwrap().rows(), 2);
        assert_eq!(col.rows(), 1_048_576);
    }

    #[test]
    fn test_explicit_range_values_stop_at_used_extent() {
        let s = snapshot();
        let whole = resolve(&s, "A1:XFD1048576").unwrap();
        assert_eq!(whole.cell_count(), 1_048_576 * 16_384);
        assert_eq!(
            whole.values(&s),
            vec![
                FormulaValue::Number(1.0),
                FormulaValue::String("x".into()),
                FormulaValue::Number(2.0),
                FormulaValue::Empty,
            ]
        );

        // Past the used extent only the top-left cell is read
        let far = resolve(&s, "D5:Z900").unwrap();
        assert_eq!(far.values(&s), vec![FormulaValue::Empty]);

        assert_eq!(whole.to_array_value(&s), Err(CellError::Num));
    }

    #[test]
    fn test_offset() {
        let s = snapshot();
        let a1 = resolve(&s, "A1").unwrap();
        let moved = a1.offset(&s, 1, 0, None, None).unwrap();
        assert_eq!(moved.to_value(&s), FormulaValue::from(CellValue::Number(2.0)));
        let grown = a1.offset(&s, 0, 0, Some(2), Some(2)).unwrap();
        assert_eq!(grown.area().range.to_a1_string(), "A1:B2");
        assert_eq!(a1.offset(&s, -1, 0, None, None), Err(CellError::Ref));
        assert_eq!(a1.offset(&s, 0, 0, Some(0), None), Err(CellError::Ref));
    }
}

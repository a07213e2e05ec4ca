//! Dependency tracking for incremental recalculation
//!
//! The [`DependencyGraph`] records what each formula cell reads: single cells, ranges
//! and defined names. Reverse indices map a changed cell, range or name to the formulas
//! that read it. Changes accumulate in a [`DirtySet`] until [`DependencyGraph::take_dirty`]
//! expands them to every affected formula and orders the result so that each formula
//! comes after the formulas it reads. Formulas on a dependency cycle are reported
//! separately and are never part of the evaluation order.

use ahash::{AHashMap, AHashSet};
use sheetcalc_core::{CellLocation, CellRange, CellSource, SheetKey};

use crate::ast::{BinaryOperator, FormulaExpr};
use crate::functions::FunctionRegistry;
use crate::parser::parse_formula;
use crate::reference::Reference;

/// Something a formula reads
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Precedent {
    /// A block of cells on one sheet; single cells are one-cell ranges
    Range { sheet: SheetKey, range: CellRange },
    /// A defined name of a unit, upper-cased
    Name { unit: usize, name: String },
}

impl Precedent {
    /// A single cell
    pub fn cell(location: CellLocation) -> Self {
        Precedent::Range {
            sheet: location.sheet_key(),
            range: CellRange::from_indices(location.row, location.col, location.row, location.col),
        }
    }

    /// A defined name
    pub fn name(unit: usize, name: &str) -> Self {
        Precedent::Name {
            unit,
            name: name.to_uppercase(),
        }
    }

    /// Collect what `expr`, written in a cell of `sheet`, reads
    ///
    /// References that do not resolve are skipped; they evaluate to `#REF!` whatever
    /// the data. Defined names contribute the name itself and, transitively, whatever
    /// their definitions read.
    pub fn collect(expr: &FormulaExpr, source: &dyn CellSource, sheet: SheetKey) -> Vec<Precedent> {
        let mut out = Vec::new();
        let mut seen_names = AHashSet::new();
        collect_into(expr, source, sheet, &mut seen_names, &mut out);
        let mut unique = AHashSet::with_capacity(out.len());
        out.retain(|p| unique.insert(p.clone()));
        out
    }
}

fn collect_into(
    expr: &FormulaExpr,
    source: &dyn CellSource,
    sheet: SheetKey,
    seen_names: &mut AHashSet<String>,
    out: &mut Vec<Precedent>,
) {
    let mut names = Vec::new();
    expr.walk(&mut |node| match node {
        FormulaExpr::Reference(reference) => {
            if let Ok(resolved) = Reference::resolve(reference, source, sheet) {
                push_areas(&resolved, out);
            }
        }
        FormulaExpr::BinaryOp {
            op: BinaryOperator::Range,
            left,
            right,
        } => {
            // `A1:INDEX(B1:B9, n)` can end anywhere inside the references it mentions
            let mut corners = Vec::new();
            for side in [&**left, &**right] {
                side.walk(&mut |inner| {
                    if let FormulaExpr::Reference(reference) = inner {
                        if let Ok(resolved) = Reference::resolve(reference, source, sheet) {
                            corners.push(resolved);
                        }
                    }
                });
            }
            let bounding = corners.iter().try_fold(None::<Reference>, |acc, r| match acc {
                None => Ok(Some(r.clone())),
                Some(a) => a.union_by(r).map(Some),
            });
            if let Ok(Some(bounded)) = bounding {
                push_areas(&bounded, out);
            }
        }
        FormulaExpr::Name(name) => names.push(name.clone()),
        _ => {}
    });

    for name in names {
        let upper = name.to_uppercase();
        out.push(Precedent::name(sheet.unit, &upper));
        if !seen_names.insert(upper) {
            continue;
        }
        let Some(refers_to) = source.defined_name(sheet, &name) else {
            continue;
        };
        match parse_formula(refers_to) {
            Ok(definition) => collect_into(&definition, source, sheet, seen_names, out),
            Err(err) => log::debug!("skipping precedents of name {}: {}", name, err),
        }
    }
}

fn push_areas(reference: &Reference, out: &mut Vec<Precedent>) {
    for area in reference.areas() {
        out.push(Precedent::Range {
            sheet: reference.sheet(),
            range: area.range,
        });
    }
}

/// Whether `expr` calls a volatile function
pub fn is_volatile(expr: &FormulaExpr, registry: &FunctionRegistry) -> bool {
    let mut volatile = false;
    expr.walk(&mut |node| {
        if let FormulaExpr::Function { name, .. } = node {
            volatile |= registry.is_volatile(name);
        }
    });
    volatile
}

/// Changes not yet expanded to the formulas they affect
#[derive(Debug, Clone, Default)]
pub struct DirtySet {
    cells: AHashSet<CellLocation>,
    ranges: Vec<(SheetKey, CellRange)>,
    names: AHashSet<(usize, String)>,
    everything: bool,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_cell(&mut self, location: CellLocation) {
        self.cells.insert(location);
    }

    pub fn mark_range(&mut self, sheet: SheetKey, range: CellRange) {
        if range.is_single_cell() {
            self.cells.insert(sheet.cell(range.start.row, range.start.col));
        } else {
            self.ranges.push((sheet, range));
        }
    }

    pub fn mark_name(&mut self, unit: usize, name: &str) {
        self.names.insert((unit, name.to_uppercase()));
    }

    /// Every formula is dirty
    pub fn mark_all(&mut self) {
        self.everything = true;
    }

    pub fn is_empty(&self) -> bool {
        !self.everything && self.cells.is_empty() && self.ranges.is_empty() && self.names.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Result of expanding the dirty set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecalcOrder {
    /// Formulas to evaluate, each after everything it reads
    pub order: Vec<CellLocation>,
    /// Formulas on a dependency cycle, sorted
    pub circular: Vec<CellLocation>,
}

impl RecalcOrder {
    /// Number of formulas affected
    pub fn len(&self) -> usize {
        self.order.len() + self.circular.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty() && self.circular.is_empty()
    }
}

/// Rows covered by one bucket of a [`RangeIndex`]
const BAND_ROWS: u32 = 256;

/// Ranges covering more buckets than this are kept in a single list
const MAX_BANDS: u32 = 16;

/// Multi-cell ranges read on one sheet, bucketed by row band
///
/// A changed cell only looks at the ranges of its own band plus the few ranges that
/// span many bands (whole columns and other tall blocks).
#[derive(Debug, Default)]
struct RangeIndex {
    bands: AHashMap<u32, Vec<(CellRange, CellLocation)>>,
    tall: Vec<(CellRange, CellLocation)>,
}

impl RangeIndex {
    fn band_span(range: &CellRange) -> (u32, u32) {
        (range.start.row / BAND_ROWS, range.end.row / BAND_ROWS)
    }

    fn insert(&mut self, range: CellRange, reader: CellLocation) {
        let (first, last) = Self::band_span(&range);
        if last - first >= MAX_BANDS {
            self.tall.push((range, reader));
            return;
        }
        for band in first..=last {
            self.bands.entry(band).or_default().push((range, reader));
        }
    }

    fn remove(&mut self, range: &CellRange, reader: CellLocation) {
        let (first, last) = Self::band_span(range);
        if last - first >= MAX_BANDS {
            self.tall.retain(|(_, r)| *r != reader);
            return;
        }
        for band in first..=last {
            if let Some(entries) = self.bands.get_mut(&band) {
                entries.retain(|(_, r)| *r != reader);
                if entries.is_empty() {
                    self.bands.remove(&band);
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.bands.is_empty() && self.tall.is_empty()
    }

    /// Readers of ranges containing the cell
    fn containing(&self, row: u32, col: u16) -> impl Iterator<Item = CellLocation> + '_ {
        self.bands
            .get(&(row / BAND_ROWS))
            .into_iter()
            .flatten()
            .chain(&self.tall)
            .filter(move |(range, _)| range.contains_cell(row, col))
            .map(|(_, reader)| *reader)
    }

    /// Readers of ranges overlapping `changed`
    fn overlapping(&self, changed: &CellRange, out: &mut AHashSet<CellLocation>) {
        let (first, last) = Self::band_span(changed);
        let hit = |entries: &Vec<(CellRange, CellLocation)>, out: &mut AHashSet<CellLocation>| {
            out.extend(
                entries
                    .iter()
                    .filter(|(read, _)| read.overlaps(changed))
                    .map(|(_, reader)| *reader),
            );
        };
        if ((last - first) as usize) < self.bands.len() {
            for band in first..=last {
                if let Some(entries) = self.bands.get(&band) {
                    hit(entries, out);
                }
            }
        } else {
            for entries in self.bands.values() {
                hit(entries, out);
            }
        }
        hit(&self.tall, out);
    }
}

/// Formula cells and what they read
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Formula cell -> what it reads
    formulas: AHashMap<CellLocation, Vec<Precedent>>,
    /// Cell -> formulas reading exactly that cell
    cell_index: AHashMap<CellLocation, AHashSet<CellLocation>>,
    /// Sheet -> multi-cell ranges and the formula reading each
    range_index: AHashMap<SheetKey, RangeIndex>,
    /// (unit, NAME) -> formulas reading the name
    name_index: AHashMap<(usize, String), AHashSet<CellLocation>>,
    volatile: AHashSet<CellLocation>,
    dirty: DirtySet,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of formula cells
    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    pub fn is_formula(&self, cell: CellLocation) -> bool {
        self.formulas.contains_key(&cell)
    }

    /// Formula cells, in no particular order
    pub fn formula_cells(&self) -> impl Iterator<Item = CellLocation> + '_ {
        self.formulas.keys().copied()
    }

    /// What a formula cell reads
    pub fn precedents(&self, cell: CellLocation) -> &[Precedent] {
        self.formulas
            .get(&cell)
            .map_or(&[], Vec::as_slice)
    }

    pub fn is_volatile(&self, cell: CellLocation) -> bool {
        self.volatile.contains(&cell)
    }

    /// Pending changes
    pub fn dirty(&self) -> &DirtySet {
        &self.dirty
    }

    /// Record or replace the formula at `cell`; the cell becomes dirty
    pub fn set_formula(&mut self, cell: CellLocation, precedents: Vec<Precedent>, volatile: bool) {
        self.unlink(cell);
        for precedent in &precedents {
            match precedent {
                Precedent::Range { sheet, range } if range.is_single_cell() => {
                    self.cell_index
                        .entry(sheet.cell(range.start.row, range.start.col))
                        .or_default()
                        .insert(cell);
                }
                Precedent::Range { sheet, range } => {
                    self.range_index.entry(*sheet).or_default().insert(*range, cell);
                }
                Precedent::Name { unit, name } => {
                    self.name_index
                        .entry((*unit, name.clone()))
                        .or_default()
                        .insert(cell);
                }
            }
        }
        if volatile {
            self.volatile.insert(cell);
        }
        log::trace!("formula at {} reads {} precedents", cell, precedents.len());
        self.formulas.insert(cell, precedents);
        self.dirty.mark_cell(cell);
    }

    /// Forget the formula at `cell`; formulas reading the cell become dirty
    pub fn remove_formula(&mut self, cell: CellLocation) -> bool {
        let existed = self.unlink(cell);
        self.dirty.mark_cell(cell);
        existed
    }

    /// A cell's value changed
    pub fn mark_changed(&mut self, cell: CellLocation) {
        self.dirty.mark_cell(cell);
    }

    /// Every cell of a range may have changed
    pub fn mark_range_changed(&mut self, sheet: SheetKey, range: CellRange) {
        self.dirty.mark_range(sheet, range);
    }

    /// A defined name was created, redefined or removed
    pub fn mark_name_changed(&mut self, unit: usize, name: &str) {
        self.dirty.mark_name(unit, name);
    }

    /// Volatile formulas must be evaluated again
    pub fn mark_volatile_dirty(&mut self) {
        for cell in &self.volatile {
            self.dirty.cells.insert(*cell);
        }
    }

    /// Every formula must be evaluated again
    pub fn mark_all_dirty(&mut self) {
        self.dirty.mark_all();
    }

    /// Drop every formula and pending change
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn unlink(&mut self, cell: CellLocation) -> bool {
        let Some(precedents) = self.formulas.remove(&cell) else {
            return false;
        };
        for precedent in &precedents {
            match precedent {
                Precedent::Range { sheet, range } if range.is_single_cell() => {
                    let key = sheet.cell(range.start.row, range.start.col);
                    if let Some(readers) = self.cell_index.get_mut(&key) {
                        readers.remove(&cell);
                        if readers.is_empty() {
                            self.cell_index.remove(&key);
                        }
                    }
                }
                Precedent::Range { sheet, range } => {
                    if let Some(index) = self.range_index.get_mut(sheet) {
                        index.remove(range, cell);
                        if index.is_empty() {
                            self.range_index.remove(sheet);
                        }
                    }
                }
                Precedent::Name { unit, name } => {
                    let key = (*unit, name.clone());
                    if let Some(readers) = self.name_index.get_mut(&key) {
                        readers.remove(&cell);
                        if readers.is_empty() {
                            self.name_index.remove(&key);
                        }
                    }
                }
            }
        }
        self.volatile.remove(&cell);
        true
    }

    /// Formulas reading `cell`
    pub fn dependents(&self, cell: CellLocation) -> Vec<CellLocation> {
        let mut out: Vec<CellLocation> = self
            .cell_index
            .get(&cell)
            .into_iter()
            .flatten()
            .copied()
            .collect();
        if let Some(index) = self.range_index.get(&cell.sheet_key()) {
            out.extend(index.containing(cell.row, cell.col));
        }
        out.sort();
        out.dedup();
        out
    }

    /// Formulas reading any cell of `range`
    fn range_dependents(&self, sheet: SheetKey, range: &CellRange, out: &mut AHashSet<CellLocation>) {
        // Walk whichever is smaller: the changed cells or the cell index
        if range.cell_count() <= self.cell_index.len() as u64 {
            for addr in range.cells() {
                if let Some(readers) = self.cell_index.get(&sheet.cell(addr.row, addr.col)) {
                    out.extend(readers.iter().copied());
                }
            }
        } else {
            for (cell, readers) in &self.cell_index {
                if cell.sheet_key() == sheet && range.contains_cell(cell.row, cell.col) {
                    out.extend(readers.iter().copied());
                }
            }
        }
        if let Some(index) = self.range_index.get(&sheet) {
            index.overlapping(range, out);
        }
    }

    /// Expand pending changes to every affected formula, in evaluation order
    ///
    /// The pending set is cleared, so a second call with no change in between returns
    /// an empty order.
    pub fn take_dirty(&mut self) -> RecalcOrder {
        let dirty = std::mem::take(&mut self.dirty);
        if dirty.is_empty() {
            return RecalcOrder::default();
        }

        let mut seeds: AHashSet<CellLocation> = AHashSet::new();
        if dirty.everything {
            seeds.extend(self.formulas.keys().copied());
        }
        for cell in &dirty.cells {
            if self.formulas.contains_key(cell) {
                seeds.insert(*cell);
            }
            seeds.extend(self.dependents(*cell));
        }
        for (sheet, range) in &dirty.ranges {
            self.range_dependents(*sheet, range, &mut seeds);
        }
        for key in &dirty.names {
            if let Some(readers) = self.name_index.get(key) {
                seeds.extend(readers.iter().copied());
            }
        }

        // Everything downstream of a seed
        let mut affected: AHashSet<CellLocation> = AHashSet::new();
        let mut queue: Vec<CellLocation> = seeds.into_iter().collect();
        while let Some(cell) = queue.pop() {
            if !self.formulas.contains_key(&cell) || !affected.insert(cell) {
                continue;
            }
            queue.extend(self.dependents(cell));
        }

        let mut nodes: Vec<CellLocation> = affected.into_iter().collect();
        nodes.sort();
        let position: AHashMap<CellLocation, usize> =
            nodes.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        let edges: Vec<Vec<usize>> = nodes
            .iter()
            .map(|cell| {
                self.dependents(*cell)
                    .into_iter()
                    .filter_map(|d| position.get(&d).copied())
                    .collect()
            })
            .collect();

        let mut result = RecalcOrder::default();
        // Components come out sinks first
        for component in strongly_connected(&edges).into_iter().rev() {
            let cyclic = component.len() > 1 || edges[component[0]].contains(&component[0]);
            if cyclic {
                result.circular.extend(component.iter().map(|&i| nodes[i]));
            } else {
                result.order.push(nodes[component[0]]);
            }
        }
        result.circular.sort();
        if !result.circular.is_empty() {
            log::debug!("{} formulas on dependency cycles", result.circular.len());
        }
        result
    }

    /// Make cells dirty again, as after a cancelled recalculation
    pub fn requeue(&mut self, cells: impl IntoIterator<Item = CellLocation>) {
        for cell in cells {
            if self.formulas.contains_key(&cell) {
                self.dirty.mark_cell(cell);
            }
        }
    }
}

const UNVISITED: usize = usize::MAX;

/// Tarjan's strongly connected components, iteratively; components in reverse
/// topological order
fn strongly_connected(edges: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = edges.len();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut next = 0;
    let mut components = Vec::new();
    let mut work: Vec<(usize, usize)> = Vec::new();

    for root in (0..n).rev() {
        if index[root] != UNVISITED {
            continue;
        }
        work.push((root, 0));
        while let Some((v, edge)) = work.pop() {
            if edge == 0 && index[v] == UNVISITED {
                index[v] = next;
                low[v] = next;
                next += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if let Some(&w) = edges[v].get(edge) {
                work.push((v, edge + 1));
                if index[w] == UNVISITED {
                    work.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }
            if low[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
            if let Some(&(parent, _)) = work.last() {
                low[parent] = low[parent].min(low[v]);
            }
        }
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sheet_with;
    use pretty_assertions::assert_eq;

    fn cell(row: u32, col: u16) -> CellLocation {
        CellLocation::new(0, 0, row, col)
    }

    fn range(a: (u32, u16), b: (u32, u16)) -> Precedent {
        Precedent::Range {
            sheet: SheetKey::new(0, 0),
            range: CellRange::from_indices(a.0, a.1, b.0, b.1),
        }
    }

    #[test]
    fn test_collect_precedents() {
        let snapshot = sheet_with(&[]);
        let sheet = SheetKey::new(0, 0);
        let expr = parse_formula("=A1+SUM(B1:B3)+A1+Nowhere!A1").unwrap();
        assert_eq!(
            Precedent::collect(&expr, &snapshot, sheet),
            vec![Precedent::cell(cell(0, 0)), range((0, 1), (2, 1))]
        );

        let expr = parse_formula("=SUM(A1:INDEX(B1:B5, 2))").unwrap();
        assert!(Precedent::collect(&expr, &snapshot, sheet).contains(&range((0, 0), (4, 1))));

        let expr = parse_formula("=Rate*2").unwrap();
        assert_eq!(
            Precedent::collect(&expr, &snapshot, sheet),
            vec![Precedent::name(0, "RATE")]
        );
    }

    #[test]
    fn test_volatile_detection() {
        let registry = FunctionRegistry::builtin();
        assert!(is_volatile(&parse_formula("=1+NOW()").unwrap(), registry));
        assert!(is_volatile(&parse_formula("=IF(A1, 1, RAND())").unwrap(), registry));
        assert!(!is_volatile(&parse_formula("=SUM(A1:A3)").unwrap(), registry));
    }

    #[test]
    fn test_chain_orders_precedents_first() {
        let mut graph = DependencyGraph::new();
        // C1 = B1 + 1, B1 = A1 + 1, D1 = SUM(A1:C1)
        graph.set_formula(cell(0, 2), vec![Precedent::cell(cell(0, 1))], false);
        graph.set_formula(cell(0, 1), vec![Precedent::cell(cell(0, 0))], false);
        graph.set_formula(cell(0, 3), vec![range((0, 0), (0, 2))], false);
        graph.take_dirty();

        graph.mark_changed(cell(0, 0));
        let order = graph.take_dirty();
        assert_eq!(order.order, vec![cell(0, 1), cell(0, 2), cell(0, 3)]);
        assert!(order.circular.is_empty());
    }

    #[test]
    fn test_take_dirty_is_idempotent() {
        let mut graph = DependencyGraph::new();
        graph.set_formula(cell(1, 0), vec![Precedent::cell(cell(0, 0))], false);
        assert_eq!(graph.take_dirty().order, vec![cell(1, 0)]);
        assert!(graph.take_dirty().is_empty());

        graph.mark_changed(cell(5, 5));
        assert!(graph.take_dirty().is_empty());
    }

    #[test]
    fn test_cycles_are_reported() {
        let mut graph = DependencyGraph::new();
        // A1 = B1, B1 = A1, C1 = A1 + 1
        graph.set_formula(cell(0, 0), vec![Precedent::cell(cell(0, 1))], false);
        graph.set_formula(cell(0, 1), vec![Precedent::cell(cell(0, 0))], false);
        graph.set_formula(cell(0, 2), vec![Precedent::cell(cell(0, 0))], false);
        let order = graph.take_dirty();
        assert_eq!(order.circular, vec![cell(0, 0), cell(0, 1)]);
        assert_eq!(order.order, vec![cell(0, 2)]);
    }

    #[test]
    fn test_self_reference_through_range() {
        let mut graph = DependencyGraph::new();
        graph.set_formula(cell(0, 0), vec![range((0, 0), (9, 0))], false);
        let order = graph.take_dirty();
        assert_eq!(order.circular, vec![cell(0, 0)]);
        assert!(order.order.is_empty());
    }

    #[test]
    fn test_names_and_volatile_cells() {
        let mut graph = DependencyGraph::new();
        graph.set_formula(cell(0, 0), vec![Precedent::name(0, "rate")], false);
        graph.set_formula(cell(1, 0), vec![], true);
        graph.take_dirty();

        graph.mark_name_changed(0, "Rate");
        assert_eq!(graph.take_dirty().order, vec![cell(0, 0)]);

        graph.mark_volatile_dirty();
        assert_eq!(graph.take_dirty().order, vec![cell(1, 0)]);
    }

    #[test]
    fn test_range_change_and_removal() {
        let mut graph = DependencyGraph::new();
        graph.set_formula(cell(0, 5), vec![Precedent::cell(cell(3, 0))], false);
        graph.set_formula(cell(1, 5), vec![range((10, 0), (20, 0))], false);
        graph.take_dirty();

        graph.mark_range_changed(SheetKey::new(0, 0), CellRange::from_indices(0, 0, 15, 0));
        assert_eq!(graph.take_dirty().order, vec![cell(0, 5), cell(1, 5)]);

        assert!(graph.remove_formula(cell(0, 5)));
        graph.take_dirty();
        graph.mark_changed(cell(3, 0));
        assert!(graph.take_dirty().is_empty());
    }

    #[test]
    fn test_ranges_across_row_bands() {
        let mut graph = DependencyGraph::new();
        // B1 reads A250:A260 (two bands), B2 reads A:A, B3 reads C1:C2
        graph.set_formula(cell(0, 1), vec![range((249, 0), (259, 0))], false);
        graph.set_formula(cell(1, 1), vec![range((0, 0), (1_048_575, 0))], false);
        graph.set_formula(cell(2, 1), vec![range((0, 2), (1, 2))], false);
        graph.take_dirty();

        assert_eq!(graph.dependents(cell(255, 0)), vec![cell(0, 1), cell(1, 1)]);
        assert_eq!(graph.dependents(cell(600, 0)), vec![cell(1, 1)]);
        assert_eq!(graph.dependents(cell(1, 2)), vec![cell(2, 1)]);
        assert!(graph.dependents(cell(255, 3)).is_empty());

        graph.mark_range_changed(SheetKey::new(0, 0), CellRange::from_indices(0, 0, 1_048_575, 16_383));
        assert_eq!(graph.take_dirty().len(), 3);

        graph.mark_range_changed(SheetKey::new(0, 0), CellRange::from_indices(255, 0, 255, 0));
        assert_eq!(graph.take_dirty().order, vec![cell(0, 1), cell(1, 1)]);
    }

    #[test]
    fn test_removal_drops_index_entries() {
        let mut graph = DependencyGraph::new();
        graph.set_formula(cell(0, 5), vec![Precedent::cell(cell(0, 0))], false);
        graph.set_formula(cell(1, 5), vec![range((0, 0), (9, 0)), range((0, 0), (99_999, 0))], false);
        graph.set_formula(cell(2, 5), vec![Precedent::name(0, "Rate")], false);
        for row in 0..3 {
            graph.remove_formula(cell(row, 5));
        }
        assert!(graph.cell_index.is_empty());
        assert!(graph.range_index.is_empty());
        assert!(graph.name_index.is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_requeue_after_cancel() {
        let mut graph = DependencyGraph::new();
        graph.set_formula(cell(0, 0), vec![], false);
        let order = graph.take_dirty();
        graph.requeue(order.order.iter().copied().chain([cell(9, 9)]));
        assert_eq!(graph.take_dirty().order, vec![cell(0, 0)]);
    }

    #[test]
    fn test_long_chain_does_not_recurse() {
        let mut graph = DependencyGraph::new();
        for row in 1..20_000 {
            graph.set_formula(cell(row, 0), vec![Precedent::cell(cell(row - 1, 0))], false);
        }
        let order = graph.take_dirty();
        assert_eq!(order.order.len(), 19_999);
        assert_eq!(order.order.first(), Some(&cell(1, 0)));
        assert_eq!(order.order.last(), Some(&cell(19_999, 0)));
    }
}

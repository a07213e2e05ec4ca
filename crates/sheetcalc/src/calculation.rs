//! Incremental recalculation engine
//!
//! The [`Engine`] owns a loaded [`Snapshot`], the dependency graph of its formulas and the
//! committed spill blocks. Mutations mark cells dirty; a [`RecalcBatch`] then evaluates the
//! dirty formulas in dependency order, a chunk at a time, and commits every result at once
//! when it finishes.
//!
//! # Example
//!
//! ```rust
//! use sheetcalc::{CalculationEvent, CalculationOptions, Engine, Mutation};
//! use sheetcalc_core::{CellValue, Snapshot, Workbook};
//!
//! let mut book = Workbook::new("book1");
//! let sheet = book.worksheet_mut(0).unwrap();
//! sheet.set_value("A1", 10.0).unwrap();
//! sheet.set_formula("A2", "=A1*2").unwrap();
//! let mut snapshot = Snapshot::new();
//! snapshot.add_unit(book).unwrap();
//!
//! let mut engine = Engine::new(CalculationOptions::default());
//! engine.load(snapshot);
//! let mut events = Vec::new();
//! engine.recalculate(&mut events).unwrap();
//!
//! let a1 = engine.snapshot().locate("book1", "Sheet1", "A1").unwrap();
//! let a2 = engine.snapshot().locate("book1", "Sheet1", "A2").unwrap();
//! assert_eq!(engine.value(a2), CellValue::Number(20.0));
//!
//! engine.apply(Mutation::set_value(a1, 5.0)).unwrap();
//! engine.recalculate(&mut events).unwrap();
//! assert_eq!(engine.value(a2), CellValue::Number(10.0));
//! assert!(matches!(events.last(), Some(CalculationEvent::ValuesUpdated(_))));
//! ```

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use sheetcalc_core::{
    CellError, CellLocation, CellRange, CellSource, CellValue, SheetKey, Snapshot, Worksheet,
};
use sheetcalc_formula::dependency::is_volatile;
use sheetcalc_formula::{
    evaluate, parse_formula, Clock, DependencyGraph, EvaluationContext, FormulaExpr, FormulaValue,
    FunctionDescriptor, FunctionRegistry, Precedent, RecalcOrder, SystemClock,
};

use crate::error::{Error, Result};
use crate::events::{
    coalesce, CalculationEvent, CellUpdate, DirtyRange, Mutation, MutationSink, SpillTarget,
};
use crate::overlay::{Overlay, Pending};
use crate::spill::{self, SpillArea, SpillPlan, SpillStore};

/// Options for recalculation
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalculationOptions {
    /// Formulas evaluated per [`Engine::step`] (default: 256)
    pub chunk_size: usize,
    /// Re-evaluate volatile functions (NOW, TODAY, RAND, ...) on every batch
    pub calculate_volatile: bool,
    /// Follow-up passes allowed when spill blocks change (default: 8)
    pub max_passes: usize,
    /// Evaluation recursion limit per formula (default: 256)
    pub max_depth: usize,
}

impl Default for CalculationOptions {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            calculate_volatile: true,
            max_passes: 8,
            max_depth: 256,
        }
    }
}

impl CalculationOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_volatile(mut self, calculate_volatile: bool) -> Self {
        self.calculate_volatile = calculate_volatile;
        self
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Statistics from a recalculation batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalculationStats {
    /// Formula cells known to the engine
    pub formula_count: usize,
    /// Formula evaluations performed (a cell evaluated in two passes counts twice)
    pub cells_calculated: usize,
    /// Passes run, including follow-ups for spill changes
    pub passes: usize,
    /// Calls to [`Engine::step`] that evaluated formulas
    pub chunks: usize,
    /// Cells found on dependency cycles
    pub circular_references: usize,
    /// Volatile cells recalculated
    pub volatile_cells: usize,
    /// Committed results that are error values
    pub errors: usize,
    /// Array results that spilled
    pub spills: usize,
    /// Array results refused with `#SPILL!`
    pub spills_blocked: usize,
}

/// Result of one [`Engine::step`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Work remains; call `step` again
    Yielded { completed: usize, remaining: usize },
    /// Every result was committed and published
    Complete(CalculationStats),
}

/// A recalculation in progress
///
/// Nothing a batch computes is visible outside it until the last step commits. Dropping
/// a batch without finishing it leaves its cells dirty for the next batch.
#[derive(Debug)]
pub struct RecalcBatch {
    id: u64,
    pass: usize,
    queue: Vec<CellLocation>,
    cursor: usize,
    announce: Vec<DirtyRange>,
    pending: Pending,
    /// Spill blocks as they were when the current pass first touched each origin
    pass_spills: AHashMap<CellLocation, Option<SpillArea>>,
    blocked: AHashMap<CellLocation, CellRange>,
    circular: AHashSet<CellLocation>,
    touched: Vec<CellLocation>,
    seen: AHashSet<CellLocation>,
    stats: CalculationStats,
    finished: bool,
}

impl RecalcBatch {
    fn new(id: u64) -> Self {
        Self {
            id,
            pass: 0,
            queue: Vec::new(),
            cursor: 0,
            announce: Vec::new(),
            pending: Pending::default(),
            pass_spills: AHashMap::new(),
            blocked: AHashMap::new(),
            circular: AHashSet::new(),
            touched: Vec::new(),
            seen: AHashSet::new(),
            stats: CalculationStats::default(),
            finished: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current pass, starting at 1
    pub fn pass(&self) -> usize {
        self.pass
    }

    /// Formulas evaluated so far
    pub fn completed(&self) -> usize {
        self.stats.cells_calculated
    }

    /// Formulas left in the current pass
    pub fn remaining(&self) -> usize {
        self.queue.len() - self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Uncommitted value of a cell evaluated by this batch
    pub fn pending_value(&self, cell: CellLocation) -> Option<&FormulaValue> {
        self.pending.values.get(&cell)
    }

    fn record(
        &mut self,
        cell: CellLocation,
        value: FormulaValue,
        placement: Placement,
        committed: &SpillStore,
    ) {
        let (area, blocked) = match placement {
            Placement::Scalar => (None, None),
            Placement::Spill(area) => (Some(area), None),
            Placement::Blocked(range) => (None, Some(range)),
        };
        match blocked {
            Some(range) => self.blocked.insert(cell, range),
            None => self.blocked.remove(&cell),
        };

        let tracked = area.is_some()
            || self.pending.spills.contains_key(&cell)
            || committed.get(cell).is_some();
        if tracked {
            if !self.pass_spills.contains_key(&cell) {
                let before = match self.pending.spills.get(&cell) {
                    Some(area) => area.clone(),
                    None => committed.get(cell).cloned(),
                };
                self.pass_spills.insert(cell, before);
            }
            self.pending.spills.insert(cell, area);
        }

        self.pending.values.insert(cell, value);
        if self.seen.insert(cell) {
            self.touched.push(cell);
        }
    }

    /// Blocks that differ from what readers saw during the pass
    fn changed_spills(&mut self) -> Vec<(SheetKey, CellRange)> {
        let mut changed = Vec::new();
        for (origin, before) in self.pass_spills.drain() {
            let after = self.pending.spills.get(&origin).cloned().flatten();
            if before != after {
                changed.extend(
                    before
                        .into_iter()
                        .chain(after)
                        .map(|area| (origin.sheet_key(), area.range)),
                );
            }
        }
        changed
    }
}

/// Where a formula result goes
enum Placement {
    Scalar,
    Spill(SpillArea),
    Blocked(CellRange),
}

/// Cells the engine handed to the batch in flight
struct ActiveBatch {
    id: u64,
    cells: Vec<CellLocation>,
}

/// The recalculation engine
pub struct Engine {
    options: CalculationOptions,
    snapshot: Snapshot,
    registry: FunctionRegistry,
    clock: Arc<dyn Clock>,
    graph: DependencyGraph,
    /// Parsed formulas; `None` marks text that failed to parse
    compiled: AHashMap<CellLocation, Option<FormulaExpr>>,
    spills: SpillStore,
    active: Option<ActiveBatch>,
    next_batch: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(CalculationOptions::default())
    }
}

impl Engine {
    /// An engine with an empty snapshot and the built-in functions
    pub fn new(options: CalculationOptions) -> Self {
        Self {
            options,
            snapshot: Snapshot::new(),
            registry: FunctionRegistry::new(),
            clock: Arc::new(SystemClock),
            graph: DependencyGraph::new(),
            compiled: AHashMap::new(),
            spills: SpillStore::new(),
            active: None,
            next_batch: 1,
        }
    }

    /// Use `clock` for TODAY and NOW
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn options(&self) -> &CalculationOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: CalculationOptions) {
        self.options = options;
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Whether any mutation awaits recalculation
    pub fn is_dirty(&self) -> bool {
        !self.graph.dirty().is_empty()
    }

    /// Committed value of a cell, spilled values included
    pub fn value(&self, location: CellLocation) -> CellValue {
        let pending = Pending::default();
        self.overlay(&pending).cell_value(location)
    }

    /// The committed spill block anchored at `origin`
    pub fn spill_area(&self, origin: CellLocation) -> Option<&SpillArea> {
        self.spills.get(origin)
    }

    fn overlay<'a>(&'a self, pending: &'a Pending) -> Overlay<'a> {
        Overlay {
            snapshot: &self.snapshot,
            spills: &self.spills,
            pending,
        }
    }

    // === Loading and mutation ===

    /// Replace the loaded data and index every formula in it
    ///
    /// Every formula starts dirty. Formula text that does not parse is logged and will
    /// evaluate to `#NAME?`. Returns the number of formulas found.
    pub fn load(&mut self, snapshot: Snapshot) -> usize {
        let _span = tracing::debug_span!("load", units = snapshot.unit_count()).entered();
        self.active = None;
        self.snapshot = snapshot;
        self.graph.clear();
        self.compiled.clear();
        self.spills.clear();

        let formulas: Vec<(CellLocation, String)> = self
            .snapshot
            .formula_cells()
            .map(|(cell, text)| (cell, text.to_string()))
            .collect();
        for (cell, text) in &formulas {
            let expr = match parse_formula(text) {
                Ok(expr) => Some(expr),
                Err(err) => {
                    tracing::warn!(
                        cell = %self.snapshot.describe(*cell),
                        error = %err,
                        "formula does not parse"
                    );
                    None
                }
            };
            self.link(*cell, expr);
        }
        tracing::debug!(formulas = formulas.len(), "snapshot loaded");
        formulas.len()
    }

    /// Apply a change to the loaded data
    ///
    /// A batch in flight is abandoned: its cells stay dirty and its next step reports
    /// [`Error::StaleBatch`]. Formula text that fails to lex or parse is returned as
    /// [`Error::Formula`] and the cell is left unchanged.
    pub fn apply(&mut self, mutation: Mutation) -> Result<()> {
        match mutation {
            Mutation::SetValue { location, value } => {
                self.worksheet_mut(location)?
                    .set_value_at(location.row, location.col, value)?;
                self.abandon_active();
                self.unlink(location);
                self.touch(location);
            }
            Mutation::SetFormula { location, formula } => {
                let expr = parse_formula(&formula)?;
                self.worksheet_mut(location)?
                    .set_formula_at(location.row, location.col, &formula)?;
                self.abandon_active();
                self.link(location, Some(expr));
                self.touch(location);
            }
            Mutation::Clear { location } => {
                self.worksheet_mut(location)?
                    .clear_at(location.row, location.col);
                self.abandon_active();
                self.unlink(location);
                self.touch(location);
            }
            Mutation::DefineName { unit, name } => {
                let key = name.name.clone();
                self.snapshot
                    .unit_mut(unit)
                    .ok_or_else(|| sheetcalc_core::Error::UnitNotFound(unit.to_string()))?
                    .define_or_update_name(name)?;
                self.abandon_active();
                self.graph.mark_name_changed(unit, &key);
                self.relink_name_readers(unit, &key);
            }
        }
        Ok(())
    }

    /// Add or replace a function; formulas evaluated from now on see it
    pub fn register_function(
        &mut self,
        descriptor: FunctionDescriptor,
    ) -> Option<Arc<FunctionDescriptor>> {
        tracing::debug!(function = descriptor.name(), "function registered");
        self.registry.register(descriptor)
    }

    fn worksheet_mut(
        &mut self,
        location: CellLocation,
    ) -> Result<&mut Worksheet> {
        self.snapshot
            .worksheet_mut(location.sheet_key())
            .ok_or(Error::InvalidLocation(location))
    }

    /// Index a formula cell in the graph
    fn link(&mut self, cell: CellLocation, expr: Option<FormulaExpr>) {
        let (precedents, volatile) = match &expr {
            Some(expr) => (
                Precedent::collect(expr, &self.snapshot, cell.sheet_key()),
                is_volatile(expr, &self.registry),
            ),
            None => (Vec::new(), false),
        };
        self.graph.set_formula(cell, precedents, volatile);
        self.compiled.insert(cell, expr);
    }

    /// Drop the formula at `cell`, if any, together with its spill block
    fn unlink(&mut self, cell: CellLocation) {
        if self.compiled.remove(&cell).is_none() {
            return;
        }
        self.graph.remove_formula(cell);
        if let Some(area) = self.spills.remove(cell) {
            self.graph.mark_range_changed(cell.sheet_key(), area.range);
        }
    }

    /// `cell` changed: dirty its readers and any spill origin it collides with or frees
    fn touch(&mut self, cell: CellLocation) {
        self.graph.mark_changed(cell);
        if let Some(owner) = self.spills.covering(cell) {
            self.graph.mark_changed(owner);
        }
        for origin in self.spills.blocked_by(cell) {
            self.graph.mark_changed(origin);
        }
    }

    /// Re-collect precedents of formulas reading a redefined name
    fn relink_name_readers(&mut self, unit: usize, name: &str) {
        let key = Precedent::name(unit, name);
        let readers: Vec<CellLocation> = self
            .graph
            .formula_cells()
            .filter(|cell| self.graph.precedents(*cell).contains(&key))
            .collect();
        for cell in readers {
            let expr = self.compiled.get(&cell).cloned().flatten();
            self.link(cell, expr);
        }
    }

    fn abandon_active(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!(batch = active.id, "recalculation abandoned by mutation");
            self.graph.requeue(active.cells);
        }
    }

    // === Recalculation ===

    /// Take the dirty formulas and start a batch over them
    ///
    /// Only one batch runs at a time; starting another abandons the previous one.
    pub fn begin_recalculation(&mut self) -> RecalcBatch {
        self.abandon_active();
        if self.options.calculate_volatile {
            self.graph.mark_volatile_dirty();
        }
        let id = self.next_batch;
        self.next_batch += 1;
        self.active = Some(ActiveBatch {
            id,
            cells: Vec::new(),
        });

        let mut batch = RecalcBatch::new(id);
        batch.stats.formula_count = self.graph.len();
        let order = self.graph.take_dirty();
        self.start_pass(&mut batch, order, Vec::new());
        batch
    }

    fn start_pass(
        &mut self,
        batch: &mut RecalcBatch,
        order: RecalcOrder,
        spilled: Vec<(SheetKey, CellRange)>,
    ) {
        batch.pass += 1;
        batch.stats.passes = batch.pass;

        let snapshot = &self.snapshot;
        let cells = order.order.iter().chain(&order.circular).copied();
        let mut announce = coalesce(cells, |sheet| snapshot.ids(sheet));
        announce.extend(spilled.into_iter().filter_map(|(sheet, range)| {
            let (unit_id, sheet_id) = snapshot.ids(sheet)?;
            Some(DirtyRange {
                sheet,
                unit_id: unit_id.to_string(),
                sheet_id: sheet_id.to_string(),
                range,
            })
        }));
        batch.announce = announce;

        if let Some(active) = self.active.as_mut() {
            active.cells.extend(order.order.iter().chain(&order.circular).copied());
        }

        tracing::debug!(
            batch = batch.id,
            pass = batch.pass,
            formulas = order.order.len(),
            circular = order.circular.len(),
            "recalculation pass started"
        );
        for cell in &order.circular {
            tracing::debug!(cell = %self.snapshot.describe(*cell), "circular reference");
            batch.circular.insert(*cell);
            batch.record(
                *cell,
                FormulaValue::Error(CellError::Circle),
                Placement::Scalar,
                &self.spills,
            );
        }
        batch.stats.circular_references = batch.circular.len();
        batch.queue = order.order;
        batch.cursor = 0;
    }

    /// Evaluate the next chunk of the batch
    ///
    /// Results stay private to the batch until the final step commits them, publishes
    /// [`CalculationEvent::ValuesUpdated`] and returns [`StepOutcome::Complete`].
    pub fn step(
        &mut self,
        batch: &mut RecalcBatch,
        sink: &mut dyn MutationSink,
    ) -> Result<StepOutcome> {
        if batch.finished {
            return Err(Error::BatchFinished(batch.id));
        }
        if self.active.as_ref().map(|a| a.id) != Some(batch.id) {
            batch.finished = true;
            return Err(Error::StaleBatch(batch.id));
        }

        let _span = tracing::debug_span!("recalc_step", batch = batch.id, pass = batch.pass)
            .entered();
        if !batch.announce.is_empty() {
            sink.publish(CalculationEvent::DirtyRanges(std::mem::take(
                &mut batch.announce,
            )));
        }

        let end = (batch.cursor + self.options.chunk_size.max(1)).min(batch.queue.len());
        if batch.cursor < end {
            batch.stats.chunks += 1;
        }
        while batch.cursor < end {
            let cell = batch.queue[batch.cursor];
            batch.cursor += 1;
            self.evaluate_cell(batch, cell);
        }
        if batch.cursor < batch.queue.len() {
            return Ok(StepOutcome::Yielded {
                completed: batch.completed(),
                remaining: batch.remaining(),
            });
        }

        // Pass finished: readers of changed spill blocks need another look
        let changed = batch.changed_spills();
        if !changed.is_empty() {
            if batch.pass < self.options.max_passes {
                for (sheet, range) in &changed {
                    self.graph.mark_range_changed(*sheet, *range);
                }
                let order = self.graph.take_dirty();
                if !order.is_empty() {
                    self.start_pass(batch, order, changed);
                    return Ok(StepOutcome::Yielded {
                        completed: batch.completed(),
                        remaining: batch.remaining(),
                    });
                }
            } else {
                tracing::warn!(
                    batch = batch.id,
                    passes = batch.pass,
                    "spill results still changing; committing after the last pass"
                );
            }
        }

        Ok(StepOutcome::Complete(self.commit(batch, sink)))
    }

    /// Run a batch to completion
    pub fn recalculate(&mut self, sink: &mut dyn MutationSink) -> Result<CalculationStats> {
        let mut batch = self.begin_recalculation();
        loop {
            if let StepOutcome::Complete(stats) = self.step(&mut batch, sink)? {
                return Ok(stats);
            }
        }
    }

    /// Stop a batch between chunks
    ///
    /// Cells keep their pre-batch values and stay dirty for the next batch.
    pub fn cancel(&mut self, mut batch: RecalcBatch) {
        batch.finished = true;
        if self.active.as_ref().map(|a| a.id) == Some(batch.id) {
            tracing::debug!(
                batch = batch.id,
                completed = batch.completed(),
                "recalculation cancelled"
            );
            self.abandon_active();
        }
    }

    fn evaluate_cell(&self, batch: &mut RecalcBatch, cell: CellLocation) {
        let value = match self.compiled.get(&cell) {
            Some(Some(expr)) => {
                let overlay = self.overlay(&batch.pending);
                let ctx = EvaluationContext::new(&overlay, &self.registry, cell)
                    .with_clock(self.clock.as_ref())
                    .with_max_depth(self.options.max_depth);
                match evaluate(expr, &ctx) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!(
                            cell = %self.snapshot.describe(cell),
                            error = %err,
                            "formula evaluation failed"
                        );
                        FormulaValue::Error(CellError::Calc)
                    }
                }
            }
            Some(None) => FormulaValue::Error(CellError::Name),
            None => return,
        };
        batch.stats.cells_calculated += 1;

        let (value, placement) = self.place(cell, value, &batch.pending);
        batch.record(cell, value, placement, &self.spills);
    }

    /// Decide what the formula cell shows and where an array result goes
    fn place(
        &self,
        origin: CellLocation,
        value: FormulaValue,
        pending: &Pending,
    ) -> (FormulaValue, Placement) {
        let array = match value {
            FormulaValue::Array(array) => array,
            FormulaValue::Empty => return (FormulaValue::Number(0.0), Placement::Scalar),
            other => return (other, Placement::Scalar),
        };
        let overlay = self.overlay(pending);
        let bounds = self
            .snapshot
            .worksheet(origin.sheet_key())
            .map_or((0, 0), |ws| (ws.row_count(), ws.col_count()));
        let plan = spill::plan(origin, array.rows(), array.cols(), bounds, |cell| {
            overlay.is_occupied(origin, cell)
        });
        let top_left = match array.top_left() {
            FormulaValue::Empty => FormulaValue::Number(0.0),
            v => v.clone(),
        };
        match plan {
            SpillPlan::Scalar => (top_left, Placement::Scalar),
            SpillPlan::Spill(_) => (top_left, Placement::Spill(SpillArea::new(origin, array))),
            SpillPlan::Blocked(range) => {
                tracing::debug!(cell = %self.snapshot.describe(origin), range = %range, "spill blocked");
                (FormulaValue::Error(CellError::Spill), Placement::Blocked(range))
            }
            SpillPlan::OutOfBounds => {
                tracing::debug!(cell = %self.snapshot.describe(origin), "spill past sheet edge");
                (FormulaValue::Error(CellError::Spill), Placement::Scalar)
            }
        }
    }

    /// Write the batch's results into the snapshot and publish them
    fn commit(&mut self, batch: &mut RecalcBatch, sink: &mut dyn MutationSink) -> CalculationStats {
        let _span = tracing::debug_span!("recalc_commit", batch = batch.id).entered();
        batch.finished = true;
        self.active = None;

        let mut updates = Vec::with_capacity(batch.touched.len());
        for cell in &batch.touched {
            let Some(value) = batch.pending.values.get(cell) else {
                continue;
            };
            let value = value.to_cell_value();
            if let Some(ws) = self.snapshot.worksheet_mut(cell.sheet_key()) {
                ws.set_formula_result(cell.row, cell.col, value.clone());
            }

            match batch.pending.spills.get(cell) {
                Some(Some(area)) => {
                    self.spills.insert(*cell, area.clone());
                    batch.stats.spills += 1;
                }
                _ => match batch.blocked.get(cell) {
                    Some(range) => {
                        self.spills.set_blocked(*cell, *range);
                        batch.stats.spills_blocked += 1;
                    }
                    None => {
                        self.spills.remove(*cell);
                    }
                },
            }

            if value.is_error() {
                batch.stats.errors += 1;
            }
            if self.graph.is_volatile(*cell) {
                batch.stats.volatile_cells += 1;
            }
            let spill = self
                .spills
                .get(*cell)
                .map(|area| {
                    area.targets(cell.sheet_key())
                        .map(|(location, value)| SpillTarget { location, value })
                        .collect()
                })
                .unwrap_or_default();
            let (unit_id, sheet_id) = self.snapshot.ids(cell.sheet_key()).unwrap_or(("", ""));
            updates.push(CellUpdate {
                location: *cell,
                unit_id: unit_id.to_string(),
                sheet_id: sheet_id.to_string(),
                display_error: value.error().map(|e| e.to_string()),
                value,
                spill,
            });
        }

        tracing::debug!(
            batch = batch.id,
            cells = updates.len(),
            passes = batch.pass,
            errors = batch.stats.errors,
            "recalculation committed"
        );
        if !updates.is_empty() {
            sink.publish(CalculationEvent::ValuesUpdated(updates));
        }
        batch.pending.clear();
        batch.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sheetcalc_core::{NamedRange, Workbook};
    use sheetcalc_formula::{FixedClock, FunctionCategory};

    fn engine_with(cells: &[(&str, &str)]) -> Engine {
        let mut book = Workbook::new("book1");
        let sheet = book.worksheet_mut(0).unwrap();
        for (address, content) in cells {
            if content.starts_with('=') {
                sheet.set_formula(address, content).unwrap();
            } else if let Ok(n) = content.parse::<f64>() {
                sheet.set_value(address, n).unwrap();
            } else {
                sheet.set_value(address, *content).unwrap();
            }
        }
        let mut snapshot = Snapshot::new();
        snapshot.add_unit(book).unwrap();
        let mut engine = Engine::new(CalculationOptions::default());
        engine.load(snapshot);
        engine
    }

    fn at(engine: &Engine, address: &str) -> CellLocation {
        engine.snapshot().locate("book1", "Sheet1", address).unwrap()
    }

    fn value(engine: &Engine, address: &str) -> CellValue {
        engine.value(at(engine, address))
    }

    fn run(engine: &mut Engine) -> CalculationStats {
        let mut events = Vec::new();
        engine.recalculate(&mut events).unwrap()
    }

    #[test]
    fn test_simple_calculation() {
        let mut engine = engine_with(&[("A1", "10"), ("A2", "20"), ("A3", "=A1+A2")]);
        let stats = run(&mut engine);

        assert_eq!(stats.formula_count, 1);
        assert_eq!(stats.cells_calculated, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(value(&engine, "A3"), CellValue::Number(30.0));
    }

    #[test]
    fn test_chain_calculation() {
        let mut engine = engine_with(&[
            ("A1", "5"),
            ("A2", "=A1*2"),
            ("A3", "=A2+10"),
            ("A4", "=A3*A1"),
        ]);
        let stats = run(&mut engine);

        assert_eq!(stats.formula_count, 3);
        assert_eq!(stats.cells_calculated, 3);
        assert_eq!(value(&engine, "A2"), CellValue::Number(10.0));
        assert_eq!(value(&engine, "A3"), CellValue::Number(20.0));
        assert_eq!(value(&engine, "A4"), CellValue::Number(100.0));
    }

    #[test]
    fn test_only_dirty_formulas_recalculate() {
        let mut engine = engine_with(&[("A1", "1"), ("B1", "=A1+1"), ("C1", "=5*2")]);
        run(&mut engine);

        let a1 = at(&engine, "A1");
        engine.apply(Mutation::set_value(a1, 41.0)).unwrap();
        let stats = run(&mut engine);
        assert_eq!(stats.cells_calculated, 1);
        assert_eq!(value(&engine, "B1"), CellValue::Number(42.0));

        // Nothing changed since
        assert_eq!(run(&mut engine).cells_calculated, 0);
    }

    #[test]
    fn test_circular_reference_detection() {
        let mut engine = engine_with(&[("A1", "=B1"), ("B1", "=A1"), ("C1", "=A1+1")]);
        let stats = run(&mut engine);

        assert_eq!(stats.circular_references, 2);
        assert_eq!(stats.errors, 3);
        assert_eq!(value(&engine, "A1"), CellValue::Error(CellError::Circle));
        assert_eq!(value(&engine, "B1"), CellValue::Error(CellError::Circle));
        assert_eq!(value(&engine, "C1"), CellValue::Error(CellError::Circle));
    }

    #[test]
    fn test_unparseable_formula_is_name_error() {
        let mut engine = engine_with(&[("A1", "=1+"), ("A2", "=A1")]);
        run(&mut engine);
        assert_eq!(value(&engine, "A1"), CellValue::Error(CellError::Name));
        assert_eq!(value(&engine, "A2"), CellValue::Error(CellError::Name));
    }

    #[test]
    fn test_set_formula_parse_error_leaves_cell() {
        let mut engine = engine_with(&[("A1", "=2*3")]);
        run(&mut engine);
        let a1 = at(&engine, "A1");
        let err = engine.apply(Mutation::set_formula(a1, "=(1+")).unwrap_err();
        assert!(matches!(err, Error::Formula(_)));
        assert_eq!(
            engine.snapshot().worksheet(a1.sheet_key()).unwrap().formula_at(0, 0),
            Some("=2*3")
        );
        assert!(!engine.is_dirty());
    }

    #[test]
    fn test_empty_reference_shows_zero() {
        let mut engine = engine_with(&[("A1", "=B7")]);
        run(&mut engine);
        assert_eq!(value(&engine, "A1"), CellValue::Number(0.0));
    }

    #[test]
    fn test_volatile_cells_rerun() {
        let mut engine = engine_with(&[("A1", "=TODAY()"), ("A2", "=A1+1"), ("A3", "=1+1")])
            .with_clock(FixedClock::on_date(2020, 1, 1).unwrap());
        run(&mut engine);
        assert_eq!(value(&engine, "A1"), CellValue::Number(43831.0));

        let stats = run(&mut engine);
        assert_eq!(stats.cells_calculated, 2);
        assert_eq!(stats.volatile_cells, 1);

        engine.set_options(CalculationOptions::default().with_volatile(false));
        assert_eq!(run(&mut engine).cells_calculated, 0);
    }

    #[test]
    fn test_defined_name_redefinition() {
        let mut engine = engine_with(&[("A1", "2"), ("B1", "3"), ("C1", "=Rate*10")]);
        engine
            .apply(Mutation::DefineName {
                unit: 0,
                name: NamedRange::workbook_scope("Rate", "=Sheet1!A1"),
            })
            .unwrap();
        run(&mut engine);
        assert_eq!(value(&engine, "C1"), CellValue::Number(20.0));

        engine
            .apply(Mutation::DefineName {
                unit: 0,
                name: NamedRange::workbook_scope("Rate", "=Sheet1!B1"),
            })
            .unwrap();
        run(&mut engine);
        assert_eq!(value(&engine, "C1"), CellValue::Number(30.0));

        // The new definition's cell is now a precedent
        let b1 = at(&engine, "B1");
        engine.apply(Mutation::set_value(b1, 4.0)).unwrap();
        run(&mut engine);
        assert_eq!(value(&engine, "C1"), CellValue::Number(40.0));
    }

    #[test]
    fn test_registered_function() {
        let mut engine = engine_with(&[("A1", "=TRIPLE(2)")]);
        run(&mut engine);
        assert_eq!(value(&engine, "A1"), CellValue::Error(CellError::Name));

        let triple = FunctionDescriptor::builder("TRIPLE", FunctionCategory::User)
            .args(1, 1)
            .scalar(|args, ctx| {
                Ok(FormulaValue::Number(ctx.value(&args[0]).scalar().to_number()? * 3.0))
            })
            .build()
            .unwrap();
        assert!(engine.register_function(triple).is_none());

        // No retroactive recalculation
        assert_eq!(run(&mut engine).cells_calculated, 0);
        let a1 = at(&engine, "A1");
        engine.apply(Mutation::set_formula(a1, "=TRIPLE(2)")).unwrap();
        run(&mut engine);
        assert_eq!(value(&engine, "A1"), CellValue::Number(6.0));
    }

    #[test]
    fn test_sequence_spilling() {
        let mut engine = engine_with(&[("A1", "=SEQUENCE(5)"), ("C1", "=SUM(A1:A5)")]);
        let stats = run(&mut engine);
        assert_eq!(stats.spills, 1);
        assert!(stats.passes >= 2);

        assert_eq!(value(&engine, "A1"), CellValue::Number(1.0));
        assert_eq!(value(&engine, "A5"), CellValue::Number(5.0));
        assert_eq!(value(&engine, "A6"), CellValue::Empty);
        assert_eq!(value(&engine, "C1"), CellValue::Number(15.0));
    }

    #[test]
    fn test_sequence_spill_blocked() {
        let mut engine = engine_with(&[("A3", "999"), ("A1", "=SEQUENCE(5)")]);
        let stats = run(&mut engine);
        assert_eq!(stats.spills_blocked, 1);
        assert_eq!(value(&engine, "A1"), CellValue::Error(CellError::Spill));
        assert_eq!(value(&engine, "A3"), CellValue::Number(999.0));

        // Freeing the block lets the origin spill
        let a3 = at(&engine, "A3");
        engine.apply(Mutation::clear(a3)).unwrap();
        run(&mut engine);
        assert_eq!(value(&engine, "A1"), CellValue::Number(1.0));
        assert_eq!(value(&engine, "A3"), CellValue::Number(3.0));

        // Typing into the block blocks it again
        engine.apply(Mutation::set_value(a3, "x")).unwrap();
        run(&mut engine);
        assert_eq!(value(&engine, "A1"), CellValue::Error(CellError::Spill));
        assert_eq!(value(&engine, "A3"), CellValue::string("x"));
    }
}

//! # sheetcalc
//!
//! Incremental recalculation of spreadsheet formulas.
//!
//! The [`Engine`] loads a [`Snapshot`] of workbooks, tracks which formulas depend on which
//! cells, and recomputes only what a mutation affects. Recalculation runs in cooperative
//! chunks so a host can interleave it with other work:
//!
//! - [`Mutation`]s change values, formulas and defined names
//! - [`Engine::begin_recalculation`] starts a [`RecalcBatch`] over the dirty formulas
//! - [`Engine::step`] evaluates up to [`CalculationOptions::chunk_size`] formulas
//! - The last step commits and publishes [`CalculationEvent::ValuesUpdated`]
//!
//! Array results spill into the cells below and to the right of the formula, or show
//! `#SPILL!` when that space is taken.
//!
//! ## Example
//!
//! ```rust
//! use sheetcalc::prelude::*;
//!
//! let mut book = Workbook::new("book1");
//! let sheet = book.worksheet_mut(0).unwrap();
//! sheet.set_formula("A1", "=SEQUENCE(3)").unwrap();
//! sheet.set_formula("B1", "=SUM(A1:A3)").unwrap();
//! let mut snapshot = Snapshot::new();
//! snapshot.add_unit(book).unwrap();
//!
//! let mut engine = Engine::new(CalculationOptions::default().with_chunk_size(1));
//! engine.load(snapshot);
//!
//! let mut events: Vec<CalculationEvent> = Vec::new();
//! let mut batch = engine.begin_recalculation();
//! let stats = loop {
//!     match engine.step(&mut batch, &mut events).unwrap() {
//!         StepOutcome::Yielded { .. } => continue,
//!         StepOutcome::Complete(stats) => break stats,
//!     }
//! };
//! assert_eq!(stats.spills, 1);
//!
//! let b1 = engine.snapshot().locate("book1", "Sheet1", "B1").unwrap();
//! assert_eq!(engine.value(b1), CellValue::Number(6.0));
//! ```

pub mod calculation;
pub mod error;
pub mod events;
pub mod overlay;
pub mod prelude;
pub mod spill;

pub use calculation::{CalculationOptions, CalculationStats, Engine, RecalcBatch, StepOutcome};
pub use error::{Error, Result};
pub use events::{CalculationEvent, CellUpdate, DirtyRange, Mutation, MutationSink, SpillTarget};
pub use spill::{SpillArea, SpillStore};

// Re-export the data model and formula layer
pub use sheetcalc_core::{
    CellAddress, CellError, CellLocation, CellRange, CellSource, CellValue, NameScope,
    NamedRange, SheetKey, Snapshot, Workbook, Worksheet,
};
pub use sheetcalc_formula::{
    Clock, FixedClock, FormulaError, FormulaValue, FunctionCategory, FunctionDescriptor,
    FunctionRegistry, SystemClock,
};

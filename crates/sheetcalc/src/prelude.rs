//! Prelude module - common imports for sheetcalc users
//!
//! ```rust
//! use sheetcalc::prelude::*;
//! ```

pub use crate::{
    // Engine
    CalculationEvent,
    CalculationOptions,
    CalculationStats,
    CellUpdate,
    Engine,
    Mutation,
    MutationSink,
    RecalcBatch,
    StepOutcome,

    // Data model
    CellError,
    CellLocation,
    CellRange,
    CellValue,
    NamedRange,
    SheetKey,
    Snapshot,
    Workbook,
    Worksheet,

    // Formulas
    FixedClock,
    FormulaValue,
    FunctionCategory,
    FunctionDescriptor,
};

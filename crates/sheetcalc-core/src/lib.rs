//! # sheetcalc-core
//!
//! Data model shared by the sheetcalc formula engine.
//!
//! This crate provides the types the evaluator reads from and the engine writes to:
//! - [`CellValue`] and [`CellError`] - Stored cell values and the error vocabulary
//! - [`CellAddress`] and [`CellRange`] - A1 addressing and rectangular ranges
//! - [`Workbook`], [`Worksheet`] - A unit and its sheets, with declared bounds
//! - [`Snapshot`] - Every loaded unit, addressed by [`CellLocation`]
//! - [`CellSource`] - The read-only view consumed during a recalculation pass
//!
//! ## Example
//!
//! ```rust
//! use sheetcalc_core::{CellValue, Snapshot, Workbook};
//!
//! let mut book = Workbook::new("book1");
//! let sheet = book.worksheet_mut(0).unwrap();
//! sheet.set_value("A1", 42.0).unwrap();
//! sheet.set_formula("B1", "=A1*2").unwrap();
//!
//! let mut snapshot = Snapshot::new();
//! snapshot.add_unit(book).unwrap();
//! let a1 = snapshot.locate("book1", "Sheet1", "A1").unwrap();
//! assert_eq!(snapshot.value_at(a1), CellValue::Number(42.0));
//! ```

pub mod cell;
pub mod error;
pub mod named_range;
pub mod snapshot;
pub mod workbook;
pub mod worksheet;

pub use cell::{CellAddress, CellData, CellError, CellRange, CellValue, SharedString};
pub use error::{Error, Result};
pub use named_range::{NameScope, NamedRange, NamedRangeCollection};
pub use snapshot::{CellLocation, CellSource, SheetKey, Snapshot};
pub use workbook::{Workbook, WorkbookSettings};
pub use worksheet::Worksheet;

/// Maximum number of rows in a worksheet (Excel limit)
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of columns in a worksheet (Excel limit)
pub const MAX_COLS: u16 = 16_384;

/// Maximum length of a sheet name
pub const MAX_SHEET_NAME_LEN: usize = 31;

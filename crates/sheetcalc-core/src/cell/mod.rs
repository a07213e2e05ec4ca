//! Cell-related types
//!
//! - [`CellValue`] - The value stored in (or computed for) a cell
//! - [`CellAddress`] - A cell's location (e.g., "A1")
//! - [`CellRange`] - A rectangular range of cells (e.g., "A1:B10")
//! - [`CellData`] - A stored cell: its value and optional formula text

mod address;
mod value;

pub use address::{CellAddress, CellRange, CellRangeIterator};
pub use value::{CellData, CellError, CellValue, SharedString};

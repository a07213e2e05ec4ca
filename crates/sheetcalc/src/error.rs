//! Error types for the recalculation engine

use sheetcalc_core::CellLocation;
use sheetcalc_formula::FormulaError;
use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned to the host by [`crate::Engine`]
///
/// Formula failures inside a recalculation never show up here; they become error values
/// in the affected cells.
#[derive(Debug, Error)]
pub enum Error {
    /// Snapshot or addressing failure
    #[error(transparent)]
    Core(#[from] sheetcalc_core::Error),

    /// Formula text that does not lex or parse, or a rejected function registration
    #[error(transparent)]
    Formula(#[from] FormulaError),

    /// The location names a unit or sheet that is not loaded
    #[error("No such cell: {0}")]
    InvalidLocation(CellLocation),

    /// The snapshot changed after the batch was started
    #[error("Recalculation batch {0} is stale; start a new one")]
    StaleBatch(u64),

    /// The batch already committed its results
    #[error("Recalculation batch {0} has already completed")]
    BatchFinished(u64),
}

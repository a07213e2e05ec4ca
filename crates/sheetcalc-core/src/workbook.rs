//! Workbook type - one calculation unit

use crate::error::{Error, Result};
use crate::named_range::{NamedRange, NamedRangeCollection};
use crate::worksheet::Worksheet;
use crate::MAX_SHEET_NAME_LEN;

/// A workbook (one *unit* of the snapshot)
///
/// A workbook owns an ordered list of worksheets, its settings and its defined names.
#[derive(Debug, Clone)]
pub struct Workbook {
    /// Unit id used by cross-unit references (`[book2]Sheet1!A1`)
    unit_id: String,
    /// Worksheets in the workbook
    worksheets: Vec<Worksheet>,
    /// Workbook settings
    settings: WorkbookSettings,
    /// Defined names
    named_ranges: NamedRangeCollection,
}

impl Workbook {
    /// Create a new workbook with one worksheet named "Sheet1"
    pub fn new<S: Into<String>>(unit_id: S) -> Self {
        let mut wb = Self::empty(unit_id);
        wb.worksheets.push(Worksheet::new("Sheet1"));
        wb
    }

    /// Create a workbook with no worksheets
    pub fn empty<S: Into<String>>(unit_id: S) -> Self {
        Self {
            unit_id: unit_id.into(),
            worksheets: Vec::new(),
            settings: WorkbookSettings::default(),
            named_ranges: NamedRangeCollection::new(),
        }
    }

    /// The unit id
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// Get the number of worksheets
    pub fn sheet_count(&self) -> usize {
        self.worksheets.len()
    }

    /// Get a worksheet by index
    pub fn worksheet(&self, index: usize) -> Option<&Worksheet> {
        self.worksheets.get(index)
    }

    /// Get a mutable worksheet by index
    pub fn worksheet_mut(&mut self, index: usize) -> Option<&mut Worksheet> {
        self.worksheets.get_mut(index)
    }

    /// Get a worksheet by name (case-insensitive, like formula sheet prefixes)
    pub fn worksheet_by_name(&self, name: &str) -> Option<&Worksheet> {
        self.sheet_index(name).and_then(|i| self.worksheets.get(i))
    }

    /// Get the index of a worksheet by name (case-insensitive)
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.worksheets
            .iter()
            .position(|ws| ws.name().eq_ignore_ascii_case(name))
    }

    /// Get the index of a worksheet by its id
    pub fn sheet_index_by_id(&self, id: &str) -> Option<usize> {
        self.worksheets.iter().position(|ws| ws.id() == id)
    }

    /// Resolve a sheet by id first, then by display name
    pub fn resolve_sheet(&self, id_or_name: &str) -> Option<usize> {
        self.sheet_index_by_id(id_or_name)
            .or_else(|| self.sheet_index(id_or_name))
    }

    /// Iterate over all worksheets
    pub fn worksheets(&self) -> impl Iterator<Item = &Worksheet> {
        self.worksheets.iter()
    }

    /// Add a new worksheet with specified name, returning its index
    pub fn add_worksheet_with_name(&mut self, name: &str) -> Result<usize> {
        self.add_existing_worksheet(Worksheet::new(name))
    }

    /// Add an existing worksheet, returning its index
    pub fn add_existing_worksheet(&mut self, worksheet: Worksheet) -> Result<usize> {
        self.validate_sheet_name(worksheet.name())?;
        if self.sheet_index_by_id(worksheet.id()).is_some() {
            return Err(Error::DuplicateSheetName(worksheet.id().to_string()));
        }
        self.worksheets.push(worksheet);
        Ok(self.worksheets.len() - 1)
    }

    /// Get workbook settings
    pub fn settings(&self) -> &WorkbookSettings {
        &self.settings
    }

    /// Get mutable workbook settings
    pub fn settings_mut(&mut self) -> &mut WorkbookSettings {
        &mut self.settings
    }

    /// Defined names of this workbook
    pub fn named_ranges(&self) -> &NamedRangeCollection {
        &self.named_ranges
    }

    /// Define a name (fails on duplicates in the same scope)
    pub fn define_name(&mut self, range: NamedRange) -> Result<()> {
        self.named_ranges.define(range)
    }

    /// Define or replace a name
    pub fn define_or_update_name(&mut self, range: NamedRange) -> Result<Option<NamedRange>> {
        self.named_ranges.define_or_update(range)
    }

    fn validate_sheet_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidSheetName("name cannot be empty".into()));
        }

        if name.chars().count() > MAX_SHEET_NAME_LEN {
            return Err(Error::InvalidSheetName(format!(
                "name exceeds {} characters",
                MAX_SHEET_NAME_LEN
            )));
        }

        const INVALID_CHARS: &[char] = &[':', '\\', '/', '?', '*', '[', ']'];
        if let Some(c) = name.chars().find(|c| INVALID_CHARS.contains(c)) {
            return Err(Error::InvalidSheetName(format!(
                "name contains invalid character '{}'",
                c
            )));
        }

        if self.sheet_index(name).is_some() {
            return Err(Error::DuplicateSheetName(name.to_string()));
        }

        Ok(())
    }
}

/// Workbook settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkbookSettings {
    /// Use the 1904 date system (serial 0 = 1904-01-01)
    pub date_1904: bool,
}

//! Defined names
//!
//! A defined name maps an identifier to formula text evaluated in the context of the cell
//! that uses it. The text is usually a reference (`Sheet1!$B$1:$B$10`) but may be a
//! constant (`0.0725`) or any formula (`=SUM(Sales)`).

use crate::error::{Error, Result};
use crate::CellAddress;
use ahash::AHashMap;

/// Scope of a defined name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    /// Visible from every sheet of the unit
    Workbook,
    /// Visible only from the sheet with this index
    Sheet(usize),
}

/// A defined name
#[derive(Debug, Clone, PartialEq)]
pub struct NamedRange {
    /// The name as written by the author (lookups ignore case)
    pub name: String,
    /// Scope of this name
    pub scope: NameScope,
    /// Formula text the name stands for, with or without a leading `=`
    pub refers_to: String,
    /// Optional description
    pub comment: Option<String>,
}

impl NamedRange {
    /// Create a new defined name
    pub fn new(name: impl Into<String>, refers_to: impl Into<String>, scope: NameScope) -> Self {
        Self {
            name: name.into(),
            scope,
            refers_to: refers_to.into(),
            comment: None,
        }
    }

    /// Create a workbook-scoped name
    pub fn workbook_scope(name: impl Into<String>, refers_to: impl Into<String>) -> Self {
        Self::new(name, refers_to, NameScope::Workbook)
    }

    /// Create a sheet-scoped name
    pub fn sheet_scope(
        name: impl Into<String>,
        refers_to: impl Into<String>,
        sheet_index: usize,
    ) -> Self {
        Self::new(name, refers_to, NameScope::Sheet(sheet_index))
    }

    /// Set a comment for this name
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// The refers-to text without a leading `=`
    pub fn expression(&self) -> &str {
        self.refers_to.strip_prefix('=').unwrap_or(&self.refers_to)
    }

    /// Check that `name` is usable as a defined name
    ///
    /// Names start with a letter, `_` or `\`, contain no whitespace or operator characters,
    /// and must not read as a cell reference or a boolean.
    pub fn validate_name(name: &str) -> Result<()> {
        let mut chars = name.chars();
        let first = chars
            .next()
            .ok_or_else(|| Error::InvalidName("empty name".into()))?;
        if !(first.is_alphabetic() || first == '_' || first == '\\') {
            return Err(Error::InvalidName(format!(
                "'{}' must start with a letter or underscore",
                name
            )));
        }
        if !chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '\\')) {
            return Err(Error::InvalidName(format!(
                "'{}' contains invalid characters",
                name
            )));
        }
        if CellAddress::parse(name).is_ok() {
            return Err(Error::InvalidName(format!(
                "'{}' conflicts with a cell reference",
                name
            )));
        }
        if name.eq_ignore_ascii_case("TRUE") || name.eq_ignore_ascii_case("FALSE") {
            return Err(Error::InvalidName(format!("'{}' is reserved", name)));
        }
        Ok(())
    }
}

/// Collection of defined names with case-insensitive lookup
#[derive(Debug, Default, Clone)]
pub struct NamedRangeCollection {
    names: AHashMap<(String, NameScope), NamedRange>,
}

impl NamedRangeCollection {
    /// Create a new empty collection
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, scope: NameScope) -> (String, NameScope) {
        (name.to_lowercase(), scope)
    }

    /// Define a new name
    ///
    /// Fails if the name is invalid or already defined in the same scope.
    pub fn define(&mut self, range: NamedRange) -> Result<()> {
        NamedRange::validate_name(&range.name)?;
        let key = Self::key(&range.name, range.scope);
        if self.names.contains_key(&key) {
            return Err(Error::InvalidName(format!(
                "'{}' already exists in this scope",
                range.name
            )));
        }
        self.names.insert(key, range);
        Ok(())
    }

    /// Define or replace a name, returning the previous definition
    pub fn define_or_update(&mut self, range: NamedRange) -> Result<Option<NamedRange>> {
        NamedRange::validate_name(&range.name)?;
        let key = Self::key(&range.name, range.scope);
        Ok(self.names.insert(key, range))
    }

    /// Look up a name from a sheet: sheet-scoped names shadow workbook names
    pub fn get(&self, name: &str, current_sheet: usize) -> Option<&NamedRange> {
        self.names
            .get(&Self::key(name, NameScope::Sheet(current_sheet)))
            .or_else(|| self.names.get(&Self::key(name, NameScope::Workbook)))
    }

    /// Get a name by exact scope
    pub fn get_exact(&self, name: &str, scope: NameScope) -> Option<&NamedRange> {
        self.names.get(&Self::key(name, scope))
    }

    /// Remove a name
    pub fn remove(&mut self, name: &str, scope: NameScope) -> Option<NamedRange> {
        self.names.remove(&Self::key(name, scope))
    }

    /// Iterate over all names
    pub fn iter(&self) -> impl Iterator<Item = &NamedRange> {
        self.names.values()
    }

    /// Get the number of names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if the collection is empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_strips_equals() {
        let nr = NamedRange::workbook_scope("Total", "=SUM(A1:A10)");
        assert_eq!(nr.expression(), "SUM(A1:A10)");
        let nr = NamedRange::workbook_scope("Rate", "0.05");
        assert_eq!(nr.expression(), "0.05");
    }

    #[test]
    fn test_sheet_scope_shadows_workbook() {
        let mut coll = NamedRangeCollection::new();
        coll.define(NamedRange::workbook_scope("Rate", "0.05")).unwrap();
        coll.define(NamedRange::sheet_scope("Rate", "0.08", 0)).unwrap();

        assert_eq!(coll.get("rate", 0).unwrap().refers_to, "0.08");
        assert_eq!(coll.get("RATE", 1).unwrap().refers_to, "0.05");
    }

    #[test]
    fn test_duplicates_and_updates() {
        let mut coll = NamedRangeCollection::new();
        coll.define(NamedRange::workbook_scope("TaxRate", "0.05")).unwrap();
        assert!(coll.define(NamedRange::workbook_scope("TAXRATE", "0.1")).is_err());

        let previous = coll
            .define_or_update(NamedRange::workbook_scope("taxrate", "0.1"))
            .unwrap();
        assert_eq!(previous.unwrap().refers_to, "0.05");
        assert_eq!(coll.len(), 1);
    }

    #[test]
    fn test_invalid_names() {
        assert!(NamedRange::validate_name("Sales_2024").is_ok());
        assert!(NamedRange::validate_name("A1").is_err());
        assert!(NamedRange::validate_name("1abc").is_err());
        assert!(NamedRange::validate_name("two words").is_err());
        assert!(NamedRange::validate_name("true").is_err());
    }
}

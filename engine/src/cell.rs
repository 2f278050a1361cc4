//! FILENAME: engine/src/cell.rs
//! PURPOSE: Defines the fundamental data structures for a single spreadsheet
//! cell.
//! CONTEXT: This file contains the `Cell` struct and the `CellValue` /
//! `CellError` enums. It separates the user's input (raw content) from the
//! calculated result (value). Formula cells additionally carry their compiled
//! form, shared behind an Rc so cloning a cell never re-parses. It is designed
//! to be lightweight as millions of these instances may exist.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::formula::{compile, CompiledFormula};
use crate::functions::FunctionRegistry;

/// The derived kind of a cell, computed from its raw content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Empty,
    Text,
    Number,
    Formula,
}

/// Error sentinels a cell can display. These are values, not exceptions:
/// once past the compile boundary nothing throws across the cell border.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellError {
    /// Content starts with `=` but failed to compile.
    BadExpr,
    /// The formula re-enters a cell still mid-evaluation.
    Cycle,
    /// Any other evaluation-time failure.
    Error,
    /// An asynchronous dependency is still outstanding; transient.
    Loading,
    /// An offset-rewritten reference fell outside the grid.
    Ref,
}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellError::BadExpr => write!(f, "#BAD_EXPR"),
            CellError::Cycle => write!(f, "#CYCLE"),
            CellError::Error => write!(f, "#ERROR"),
            CellError::Loading => write!(f, "#LOADING"),
            CellError::Ref => write!(f, "#REF"),
        }
    }
}

/// Represents the calculated result or raw data within a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellError),
}

impl CellValue {
    pub fn is_loading(&self) -> bool {
        matches!(self, CellValue::Error(CellError::Loading))
    }
}

/// Identity of a cell: sheet plus 0-based column and row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellPosition {
    pub sheet_id: String,
    pub col: u32,
    pub row: u32,
}

impl CellPosition {
    pub fn new(sheet_id: impl Into<String>, col: u32, row: u32) -> Self {
        CellPosition {
            sheet_id: sheet_id.into(),
            col,
            row,
        }
    }
}

impl std::fmt::Display for CellPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}!{}",
            self.sheet_id,
            crate::coord::to_reference(self.col, self.row)
        )
    }
}

/// The atomic unit of the spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Raw content exactly as typed.
    pub content: String,
    /// Derived from content at write time.
    pub cell_type: CellType,
    /// The last computed result, or an error sentinel.
    pub value: CellValue,
    /// Set when value is an error sentinel produced by evaluation.
    pub error: bool,
    /// Opaque style index; the kernel stores and histories it, nothing more.
    pub style: Option<u32>,
    /// Opaque display format; the kernel stores and histories it.
    pub format: Option<String>,
    /// Present only for formula cells that compiled successfully.
    #[serde(skip)]
    pub formula: Option<Rc<CompiledFormula>>,
}

impl Cell {
    /// An empty cell record, kept alive only by style/format attributes.
    pub fn empty() -> Self {
        Cell {
            content: String::new(),
            cell_type: CellType::Empty,
            value: CellValue::Empty,
            error: false,
            style: None,
            format: None,
            formula: None,
        }
    }

    /// Builds a cell from raw content, deriving its type and, for formulas,
    /// its compiled form. A formula that fails to compile keeps the
    /// `#BAD_EXPR` sentinel as its value; the error never escapes the cell.
    pub fn with_content(content: impl Into<String>, registry: &FunctionRegistry) -> Self {
        let mut cell = Cell::empty();
        cell.set_content(content, registry);
        cell
    }

    /// Replaces the raw content in place, re-deriving type, value and the
    /// compiled formula. Style and format are untouched.
    pub fn set_content(&mut self, content: impl Into<String>, registry: &FunctionRegistry) {
        let content = content.into();
        self.formula = None;
        self.error = false;

        if content.is_empty() {
            self.cell_type = CellType::Empty;
            self.value = CellValue::Empty;
        } else if content.starts_with('=') {
            self.cell_type = CellType::Formula;
            match compile(&content, registry) {
                Ok(compiled) => {
                    self.formula = Some(Rc::new(compiled));
                    self.value = CellValue::Empty;
                }
                Err(e) => {
                    log::debug!("formula {:?} failed to compile: {}", content, e);
                    self.value = CellValue::Error(CellError::BadExpr);
                    self.error = true;
                }
            }
        } else if let Ok(n) = content.trim().parse::<f64>() {
            self.cell_type = CellType::Number;
            self.value = CellValue::Number(n);
        } else {
            self.cell_type = CellType::Text;
            self.value = CellValue::Text(content.clone());
        }

        self.content = content;
    }

    /// True when nothing keeps this record alive: no content and no
    /// style/format attribute.
    pub fn is_bare(&self) -> bool {
        self.content.is_empty() && self.style.is_none() && self.format.is_none()
    }

    /// Returns the display value of the cell as a String.
    pub fn display_value(&self) -> String {
        match &self.value {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => {
                // Format without unnecessary decimal places
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{:.0}", n)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Text(s) => s.clone(),
            CellValue::Boolean(b) => {
                if *b { "TRUE" } else { "FALSE" }.to_string()
            }
            CellValue::Error(e) => e.to_string(),
        }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::empty()
    }
}

/// Read-only snapshot handed to external collaborators through the getters
/// surface: the computed value plus what a renderer needs to display it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedCell {
    pub value: CellValue,
    #[serde(rename = "type")]
    pub cell_type: CellType,
    pub format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::standard()
    }

    #[test]
    fn test_content_classification() {
        let reg = registry();
        assert_eq!(Cell::with_content("", &reg).cell_type, CellType::Empty);
        assert_eq!(Cell::with_content("12.5", &reg).cell_type, CellType::Number);
        assert_eq!(Cell::with_content("hello", &reg).cell_type, CellType::Text);
        assert_eq!(Cell::with_content("=1+1", &reg).cell_type, CellType::Formula);
    }

    #[test]
    fn test_number_cell_value() {
        let cell = Cell::with_content("42", &registry());
        assert_eq!(cell.value, CellValue::Number(42.0));
    }

    #[test]
    fn test_bad_formula_keeps_sentinel() {
        let cell = Cell::with_content("=1+", &registry());
        assert_eq!(cell.cell_type, CellType::Formula);
        assert_eq!(cell.value, CellValue::Error(CellError::BadExpr));
        assert!(cell.error);
        assert!(cell.formula.is_none());
        assert_eq!(cell.display_value(), "#BAD_EXPR");
    }

    #[test]
    fn test_compiled_formula_is_attached() {
        let cell = Cell::with_content("=SUM(A1,B1)", &registry());
        let compiled = cell.formula.expect("formula should compile");
        assert!(!compiled.is_async);
    }

    #[test]
    fn test_async_flag_is_static() {
        let cell = Cell::with_content("=WAIT(5)+1", &registry());
        assert!(cell.formula.unwrap().is_async);
    }

    #[test]
    fn test_is_bare() {
        let reg = registry();
        assert!(Cell::with_content("", &reg).is_bare());
        let mut styled = Cell::with_content("", &reg);
        styled.style = Some(3);
        assert!(!styled.is_bare());
        assert!(!Cell::with_content("x", &reg).is_bare());
    }

    #[test]
    fn test_display_value_formats() {
        let reg = registry();
        assert_eq!(Cell::with_content("3", &reg).display_value(), "3");
        assert_eq!(Cell::with_content("3.25", &reg).display_value(), "3.25");
        assert_eq!(Cell::with_content("abc", &reg).display_value(), "abc");
    }
}

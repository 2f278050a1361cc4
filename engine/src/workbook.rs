//! FILENAME: engine/src/workbook.rs
//! PURPOSE: The full document state: the sheet list and the active sheet.
//! CONTEXT: Every plugin reads and mutates cells through this container.
//! Sheets are kept in creation order; lookup is by id. The workbook knows
//! nothing about evaluation or history; those route their writes through it.

use uuid::Uuid;

use crate::cell::{Cell, CellPosition};
use crate::sheet::Sheet;

#[derive(Debug, Clone, PartialEq)]
pub struct Workbook {
    sheets: Vec<Sheet>,
    active_sheet_id: String,
}

impl Workbook {
    /// A workbook always starts with one sheet, active.
    pub fn new() -> Self {
        let sheet = Sheet::new(Uuid::new_v4().to_string(), "Sheet1");
        let active_sheet_id = sheet.id.clone();
        Workbook {
            sheets: vec![sheet],
            active_sheet_id,
        }
    }

    pub fn active_sheet_id(&self) -> &str {
        &self.active_sheet_id
    }

    pub fn set_active_sheet_id(&mut self, id: impl Into<String>) {
        self.active_sheet_id = id.into();
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet(&self, id: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.id == id)
    }

    pub fn sheet_mut(&mut self, id: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.id == id)
    }

    pub fn sheet_by_name(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn add_sheet(&mut self, sheet: Sheet) {
        self.sheets.push(sheet);
    }

    /// Removes a sheet and returns it (for history capture). The first
    /// remaining sheet becomes active if the removed one was.
    pub fn remove_sheet(&mut self, id: &str) -> Option<Sheet> {
        let index = self.sheets.iter().position(|s| s.id == id)?;
        let sheet = self.sheets.remove(index);
        if self.active_sheet_id == id {
            if let Some(first) = self.sheets.first() {
                self.active_sheet_id = first.id.clone();
            }
        }
        Some(sheet)
    }

    pub fn cell(&self, position: &CellPosition) -> Option<&Cell> {
        self.sheet(&position.sheet_id)?.cell(position.col, position.row)
    }

    pub fn cell_mut(&mut self, position: &CellPosition) -> Option<&mut Cell> {
        self.sheet_mut(&position.sheet_id)?
            .cell_mut(position.col, position.row)
    }

    pub fn ensure_cell(&mut self, position: &CellPosition) -> Option<&mut Cell> {
        Some(
            self.sheet_mut(&position.sheet_id)?
                .ensure_cell(position.col, position.row),
        )
    }

    pub fn drop_if_bare(&mut self, position: &CellPosition) {
        if let Some(sheet) = self.sheet_mut(&position.sheet_id) {
            sheet.drop_if_bare(position.col, position.row);
        }
    }

    /// Every formula cell in the document, the scope of a full evaluation
    /// pass. Order is not significant; the evaluator forces dependencies on
    /// demand.
    pub fn formula_positions(&self) -> Vec<CellPosition> {
        let mut positions = Vec::new();
        for sheet in &self.sheets {
            for (&(col, row), cell) in &sheet.cells {
                if cell.formula.is_some() {
                    positions.push(CellPosition::new(sheet.id.clone(), col, row));
                }
            }
        }
        positions
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;

    #[test]
    fn test_new_workbook_has_active_sheet() {
        let workbook = Workbook::new();
        assert_eq!(workbook.sheets().len(), 1);
        let active = workbook.active_sheet_id().to_string();
        assert!(workbook.sheet(&active).is_some());
    }

    #[test]
    fn test_cell_roundtrip() {
        let mut workbook = Workbook::new();
        let sheet_id = workbook.active_sheet_id().to_string();
        let pos = CellPosition::new(sheet_id, 0, 0);
        let registry = FunctionRegistry::standard();
        workbook
            .ensure_cell(&pos)
            .unwrap()
            .set_content("42", &registry);
        assert_eq!(workbook.cell(&pos).unwrap().content, "42");
    }

    #[test]
    fn test_formula_positions_only_lists_compiled_formulas() {
        let mut workbook = Workbook::new();
        let sheet_id = workbook.active_sheet_id().to_string();
        let registry = FunctionRegistry::standard();
        let a1 = CellPosition::new(sheet_id.clone(), 0, 0);
        let b1 = CellPosition::new(sheet_id.clone(), 1, 0);
        let c1 = CellPosition::new(sheet_id, 2, 0);
        workbook.ensure_cell(&a1).unwrap().set_content("1", &registry);
        workbook.ensure_cell(&b1).unwrap().set_content("=A1", &registry);
        // Broken formulas have no compiled form and are never evaluated.
        workbook.ensure_cell(&c1).unwrap().set_content("=+", &registry);
        assert_eq!(workbook.formula_positions(), vec![b1]);
    }

    #[test]
    fn test_remove_sheet_fixes_active() {
        let mut workbook = Workbook::new();
        let first = workbook.active_sheet_id().to_string();
        workbook.add_sheet(Sheet::new("second-id", "Sheet2"));
        workbook.set_active_sheet_id("second-id");
        workbook.remove_sheet("second-id");
        assert_eq!(workbook.active_sheet_id(), first);
    }
}

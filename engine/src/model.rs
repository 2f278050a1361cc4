//! FILENAME: engine/src/model.rs
//! PURPOSE: The command dispatcher, plugin pipeline, and read-only getters
//! surface.
//! CONTEXT: All mutation of shared state funnels through `dispatch`, which
//! runs a two-phase protocol: first every handler's allow-predicate must
//! approve (the first rejection cancels the dispatch with no mutation), then
//! the handlers run in fixed registration order: History, then the cell
//! store, then the Evaluator. A handler may return follow-up commands; these
//! are expanded depth-first, each running through the whole pipeline before
//! the outer command advances past the handler that emitted them. After the
//! pipeline, the finalize phase triggers a full evaluation pass if content
//! changed and closes (or drops) the history revision; if asynchronous cells
//! are outstanding the scheduler arms and the host drives `tick`.
//!
//! Everything is synchronous inside `dispatch`; async completions re-enter
//! through `tick` as `EVALUATE_CELLS { onlyWaiting: true }`, never from a
//! foreign thread.

use crate::cell::{Cell, CellPosition, CellType, EvaluatedCell};
use crate::command::{Command, CommandCancelReason, DispatchResult};
use crate::evaluator::Evaluator;
use crate::functions::{Deferred, FunctionRegistry, FunctionSpec};
use crate::history::{History, HistoryChange};
use crate::offset;
use crate::scheduler::Scheduler;
use crate::sheet::Sheet;
use crate::workbook::Workbook;
use crate::zone::Zone;

pub struct Model {
    workbook: Workbook,
    history: History,
    evaluator: Evaluator,
    scheduler: Scheduler,
    registry: FunctionRegistry,
}

impl Model {
    pub fn new() -> Self {
        Model {
            workbook: Workbook::new(),
            history: History::new(),
            evaluator: Evaluator::new(),
            scheduler: Scheduler::new(),
            registry: FunctionRegistry::standard(),
        }
    }

    /// Registers an extra function. Formulas compiled afterwards can call it;
    /// the tokenizer classifies its name as a function from then on.
    pub fn add_function(&mut self, spec: FunctionSpec) {
        self.registry.add(spec);
    }

    // ========================================================================
    // DISPATCH
    // ========================================================================

    /// Runs one command through the pipeline. Returns `CANCELLED` with the
    /// first rejecting reason, mutating nothing, when any handler's
    /// allow-predicate refuses.
    pub fn dispatch(&mut self, command: Command) -> DispatchResult {
        log::debug!("dispatch {}", command.type_name());

        if let Err(reason) = self.allow_dispatch(&command) {
            log::debug!("dispatch {} cancelled: {:?}", command.type_name(), reason);
            return DispatchResult::cancelled(reason);
        }

        self.history.begin_revision();
        self.handle_command(command);

        // Finalize phase: the evaluator re-derives values if content moved,
        // then history closes the revision (dropped when empty).
        if self.evaluator.take_content_changed() {
            self.handle_command(Command::EvaluateCells {
                only_waiting: false,
            });
        }
        self.history.commit_revision();

        let loading = self.evaluator.loading_count();
        if loading > 0 {
            self.scheduler.arm(loading);
        }

        DispatchResult::completed()
    }

    /// Drives the scheduler. The host calls this on its own polling interval
    /// while async cells are outstanding; each call folds any settled
    /// deferred back into the command protocol.
    pub fn tick(&mut self) {
        if !self.scheduler.is_armed() {
            return;
        }
        let can_progress = self.evaluator.has_settled_pending();
        let counter_moved = self.scheduler.observe(self.evaluator.loading_count());
        if can_progress || counter_moved {
            self.dispatch(Command::EvaluateCells { only_waiting: true });
            self.scheduler.observe(self.evaluator.loading_count());
        }
        if self.evaluator.loading_count() == 0 {
            self.scheduler.disarm();
        }
    }

    /// The worklist: each handler runs in order and its follow-up commands
    /// recurse through the whole pipeline before the next handler sees the
    /// outer command.
    fn handle_command(&mut self, command: Command) {
        self.history.record_command(&command);

        let follow_ups = self.handle_history(&command);
        for follow_up in follow_ups {
            self.handle_command(follow_up);
        }
        let follow_ups = self.handle_cell_store(&command);
        for follow_up in follow_ups {
            self.handle_command(follow_up);
        }
        let follow_ups = self.handle_evaluator(&command);
        for follow_up in follow_ups {
            self.handle_command(follow_up);
        }
    }

    // ========================================================================
    // ALLOW PHASE
    // ========================================================================

    fn allow_dispatch(&self, command: &Command) -> Result<(), CommandCancelReason> {
        // History's predicate.
        match command {
            Command::Undo if !self.history.can_undo() => {
                return Err(CommandCancelReason::EmptyUndoStack)
            }
            Command::Redo if !self.history.can_redo() => {
                return Err(CommandCancelReason::EmptyRedoStack)
            }
            _ => {}
        }

        // The cell store's predicate.
        match command {
            Command::UpdateCell { sheet_id, .. } | Command::ClearCell { sheet_id, .. } => {
                if self.workbook.sheet(sheet_id).is_none() {
                    return Err(CommandCancelReason::UnknownSheet);
                }
            }
            Command::CreateSheet { sheet_id, name, .. } => {
                if let Some(id) = sheet_id {
                    if self.workbook.sheet(id).is_some() {
                        return Err(CommandCancelReason::DuplicateSheet);
                    }
                }
                if let Some(name) = name {
                    if self.workbook.sheet_by_name(name).is_some() {
                        return Err(CommandCancelReason::DuplicateSheet);
                    }
                }
            }
            Command::ActivateSheet { sheet_id } => {
                if self.workbook.sheet(sheet_id).is_none() {
                    return Err(CommandCancelReason::UnknownSheet);
                }
            }
            _ => {}
        }

        // The evaluator's predicate: cells another formula spreads onto are
        // not editable.
        match command {
            Command::UpdateCell {
                sheet_id, col, row, ..
            }
            | Command::ClearCell {
                sheet_id, col, row, ..
            } => {
                let target = CellPosition::new(sheet_id.clone(), *col, *row);
                if self.evaluator.spreading().is_spread_target(&target) {
                    return Err(CommandCancelReason::CellIsSpreadTarget);
                }
            }
            _ => {}
        }

        Ok(())
    }

    // ========================================================================
    // HANDLERS, IN REGISTRATION ORDER
    // ========================================================================

    fn handle_history(&mut self, command: &Command) -> Vec<Command> {
        match command {
            Command::Undo => {
                let touched = self.history.undo(&mut self.workbook, &self.registry);
                for position in touched {
                    self.evaluator
                        .notify_content_changed(&mut self.workbook, &position);
                }
            }
            Command::Redo => {
                let touched = self.history.redo(&mut self.workbook, &self.registry);
                for position in touched {
                    self.evaluator
                        .notify_content_changed(&mut self.workbook, &position);
                }
            }
            _ => {}
        }
        Vec::new()
    }

    fn handle_cell_store(&mut self, command: &Command) -> Vec<Command> {
        match command {
            Command::UpdateCell {
                sheet_id,
                col,
                row,
                content,
                style,
                format,
            } => {
                let target = CellPosition::new(sheet_id.clone(), *col, *row);
                if let Some(content) = content {
                    self.write_content(&target, content);
                }
                if let Some(style) = style {
                    self.write_style(&target, *style);
                }
                if let Some(format) = format {
                    self.write_format(&target, format);
                }
                Vec::new()
            }
            Command::ClearCell { sheet_id, col, row } => {
                let target = CellPosition::new(sheet_id.clone(), *col, *row);
                self.clear_cell(&target);
                Vec::new()
            }
            Command::CreateSheet {
                sheet_id,
                name,
                activate,
            } => {
                let id = sheet_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let name = name
                    .clone()
                    .unwrap_or_else(|| format!("Sheet{}", self.workbook.sheets().len() + 1));
                self.history.record_change(HistoryChange::SheetExistence {
                    target: id.clone(),
                    before: None,
                });
                self.workbook.add_sheet(Sheet::new(id.clone(), name));
                if *activate {
                    // The composite decomposes into a primitive follow-up.
                    vec![Command::ActivateSheet { sheet_id: id }]
                } else {
                    Vec::new()
                }
            }
            Command::ActivateSheet { sheet_id } => {
                if self.workbook.active_sheet_id() != sheet_id {
                    self.history.record_change(HistoryChange::ActiveSheet {
                        before: self.workbook.active_sheet_id().to_string(),
                    });
                    self.workbook.set_active_sheet_id(sheet_id.clone());
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn handle_evaluator(&mut self, command: &Command) -> Vec<Command> {
        if let Command::EvaluateCells { only_waiting } = command {
            self.evaluator
                .evaluate(&mut self.workbook, &self.registry, *only_waiting);
        }
        Vec::new()
    }

    // ========================================================================
    // CELL-STORE WRITES (each one records its before-value first)
    // ========================================================================

    fn write_content(&mut self, target: &CellPosition, content: &str) {
        let before = self
            .workbook
            .cell(target)
            .map(|c| c.content.clone())
            .filter(|c| !c.is_empty());
        // A write that changes nothing records nothing.
        if before.as_deref().unwrap_or("") == content {
            return;
        }
        self.history.record_change(HistoryChange::CellContent {
            target: target.clone(),
            before,
        });
        if let Some(cell) = self.workbook.ensure_cell(target) {
            cell.set_content(content, &self.registry);
        }
        self.workbook.drop_if_bare(target);
        self.evaluator
            .notify_content_changed(&mut self.workbook, target);
    }

    fn write_style(&mut self, target: &CellPosition, style: u32) {
        let before = self.workbook.cell(target).and_then(|c| c.style);
        if before == Some(style) {
            return;
        }
        self.history.record_change(HistoryChange::CellStyle {
            target: target.clone(),
            before,
        });
        if let Some(cell) = self.workbook.ensure_cell(target) {
            cell.style = Some(style);
        }
    }

    fn write_format(&mut self, target: &CellPosition, format: &str) {
        let before = self.workbook.cell(target).and_then(|c| c.format.clone());
        if before.as_deref() == Some(format) {
            return;
        }
        self.history.record_change(HistoryChange::CellFormat {
            target: target.clone(),
            before,
        });
        if let Some(cell) = self.workbook.ensure_cell(target) {
            cell.format = Some(format.to_string());
        }
    }

    fn clear_cell(&mut self, target: &CellPosition) {
        let Some(cell) = self.workbook.cell(target) else {
            return;
        };
        let had_content = !cell.content.is_empty();
        if had_content {
            self.history.record_change(HistoryChange::CellContent {
                target: target.clone(),
                before: Some(cell.content.clone()),
            });
        }
        if let Some(style) = cell.style {
            self.history.record_change(HistoryChange::CellStyle {
                target: target.clone(),
                before: Some(style),
            });
        }
        if let Some(format) = cell.format.clone() {
            self.history.record_change(HistoryChange::CellFormat {
                target: target.clone(),
                before: Some(format),
            });
        }
        if let Some(sheet) = self.workbook.sheet_mut(&target.sheet_id) {
            sheet.remove_cell(target.col, target.row);
        }
        if had_content {
            self.evaluator
                .notify_content_changed(&mut self.workbook, target);
        }
    }

    // ========================================================================
    // GETTERS SURFACE (read-only)
    // ========================================================================

    pub fn get_cell(&self, position: &CellPosition) -> Option<&Cell> {
        self.workbook.cell(position)
    }

    /// What a renderer displays: value, derived type, and format. Absent
    /// cells read as empty.
    pub fn get_evaluated_cell(&self, position: &CellPosition) -> EvaluatedCell {
        match self.workbook.cell(position) {
            Some(cell) => EvaluatedCell {
                value: cell.value.clone(),
                cell_type: cell.cell_type,
                format: cell.format.clone(),
            },
            None => EvaluatedCell {
                value: crate::cell::CellValue::Empty,
                cell_type: CellType::Empty,
                format: None,
            },
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_description(&self) -> Option<&'static str> {
        self.history.undo_description()
    }

    pub fn redo_description(&self) -> Option<&'static str> {
        self.history.redo_description()
    }

    pub fn active_sheet_id(&self) -> &str {
        self.workbook.active_sheet_id()
    }

    pub fn sheets(&self) -> &[Sheet] {
        self.workbook.sheets()
    }

    /// Number of cells whose own asynchronous call is outstanding.
    pub fn loading_cell_count(&self) -> usize {
        self.evaluator.loading_count()
    }

    /// Unresolved async handles, for the host to settle.
    pub fn outstanding_deferreds(&self) -> Vec<(CellPosition, Deferred)> {
        self.evaluator.outstanding_deferreds()
    }

    pub fn is_array_formula(&self, position: &CellPosition) -> bool {
        self.evaluator.spreading().is_array_formula(position)
    }

    pub fn get_array_result_zone(&self, position: &CellPosition) -> Option<Zone> {
        self.evaluator
            .spreading()
            .get_array_result_zone(position)
            .copied()
    }

    /// Rewrites every cell reference of `text` by the given offset, using
    /// this model's function registry for tokenizing.
    pub fn apply_offset(&self, text: &str, delta_col: i64, delta_row: i64) -> String {
        let is_function = |name: &str| self.registry.contains(name);
        offset::apply_offset(text, delta_col, delta_row, &is_function)
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;
    use crate::command::DispatchStatus;
    use crate::coord;

    fn update(model: &Model, reference: &str, content: &str) -> Command {
        let (col, row) = coord::parse_reference(reference).unwrap();
        Command::UpdateCell {
            sheet_id: model.active_sheet_id().to_string(),
            col,
            row,
            content: Some(content.to_string()),
            style: None,
            format: None,
        }
    }

    fn pos(model: &Model, reference: &str) -> CellPosition {
        let (col, row) = coord::parse_reference(reference).unwrap();
        CellPosition::new(model.active_sheet_id().to_string(), col, row)
    }

    fn value(model: &Model, reference: &str) -> CellValue {
        model.get_evaluated_cell(&pos(model, reference)).value
    }

    #[test]
    fn test_update_cell_evaluates_without_explicit_command() {
        let mut model = Model::new();
        let result = model.dispatch(update(&model, "A1", "=1+2"));
        assert_eq!(result.status, DispatchStatus::Completed);
        assert_eq!(value(&model, "A1"), CellValue::Number(3.0));
    }

    #[test]
    fn test_undo_on_empty_stack_is_cancelled_without_mutation() {
        let mut model = Model::new();
        let result = model.dispatch(Command::Undo);
        assert!(result.is_cancelled());
        assert_eq!(result.reason, Some(CommandCancelReason::EmptyUndoStack));
    }

    #[test]
    fn test_redo_on_empty_stack_is_cancelled() {
        let mut model = Model::new();
        let result = model.dispatch(Command::Redo);
        assert_eq!(result.reason, Some(CommandCancelReason::EmptyRedoStack));
    }

    #[test]
    fn test_unknown_sheet_is_rejected() {
        let mut model = Model::new();
        let result = model.dispatch(Command::UpdateCell {
            sheet_id: "nope".to_string(),
            col: 0,
            row: 0,
            content: Some("1".to_string()),
            style: None,
            format: None,
        });
        assert_eq!(result.reason, Some(CommandCancelReason::UnknownSheet));
    }

    #[test]
    fn test_noop_update_leaves_no_undo_step() {
        let mut model = Model::new();
        model.dispatch(update(&model, "A1", "5"));
        assert!(model.can_undo());
        // Same content again: revision is empty and discarded.
        model.dispatch(update(&model, "A1", "5"));
        model.dispatch(Command::Undo);
        // The single real revision was undone; nothing else remains.
        assert!(!model.can_undo());
        assert_eq!(value(&model, "A1"), CellValue::Empty);
    }

    #[test]
    fn test_create_sheet_activates_via_follow_up() {
        let mut model = Model::new();
        let original = model.active_sheet_id().to_string();
        model.dispatch(Command::CreateSheet {
            sheet_id: Some("s2".to_string()),
            name: None,
            activate: true,
        });
        assert_eq!(model.active_sheet_id(), "s2");
        assert_eq!(model.sheets().len(), 2);

        // One undo reverts the whole composite: activation and creation.
        model.dispatch(Command::Undo);
        assert_eq!(model.active_sheet_id(), original);
        assert_eq!(model.sheets().len(), 1);
    }

    #[test]
    fn test_duplicate_sheet_is_rejected() {
        let mut model = Model::new();
        model.dispatch(Command::CreateSheet {
            sheet_id: Some("s2".to_string()),
            name: Some("Budget".to_string()),
            activate: false,
        });
        let by_id = model.dispatch(Command::CreateSheet {
            sheet_id: Some("s2".to_string()),
            name: None,
            activate: false,
        });
        assert_eq!(by_id.reason, Some(CommandCancelReason::DuplicateSheet));
        let by_name = model.dispatch(Command::CreateSheet {
            sheet_id: None,
            name: Some("Budget".to_string()),
            activate: false,
        });
        assert_eq!(by_name.reason, Some(CommandCancelReason::DuplicateSheet));
    }

    #[test]
    fn test_clear_cell_is_undoable() {
        let mut model = Model::new();
        model.dispatch(update(&model, "A1", "keep"));
        let target = pos(&model, "A1");
        model.dispatch(Command::ClearCell {
            sheet_id: target.sheet_id.clone(),
            col: target.col,
            row: target.row,
        });
        assert!(model.get_cell(&target).is_none());
        model.dispatch(Command::Undo);
        assert_eq!(model.get_cell(&target).unwrap().content, "keep");
    }

    #[test]
    fn test_style_and_format_are_stored_and_historied() {
        let mut model = Model::new();
        let target = pos(&model, "B2");
        model.dispatch(Command::UpdateCell {
            sheet_id: target.sheet_id.clone(),
            col: target.col,
            row: target.row,
            content: None,
            style: Some(7),
            format: Some("0.00".to_string()),
        });
        let cell = model.get_cell(&target).unwrap();
        assert_eq!(cell.style, Some(7));
        assert_eq!(cell.format.as_deref(), Some("0.00"));
        assert_eq!(cell.cell_type, CellType::Empty);

        model.dispatch(Command::Undo);
        assert!(model.get_cell(&target).is_none());
    }

    #[test]
    fn test_edit_into_spread_zone_is_rejected() {
        let mut model = Model::new();
        model.dispatch(update(&model, "A1", "1"));
        model.dispatch(update(&model, "A2", "2"));
        model.dispatch(update(&model, "C1", "=A1:A2"));
        assert_eq!(value(&model, "C2"), CellValue::Number(2.0));

        let result = model.dispatch(update(&model, "C2", "overwrite"));
        assert_eq!(result.reason, Some(CommandCancelReason::CellIsSpreadTarget));
        assert_eq!(value(&model, "C2"), CellValue::Number(2.0));
        // The origin itself stays editable.
        let result = model.dispatch(update(&model, "C1", "plain"));
        assert_eq!(result.status, DispatchStatus::Completed);
        assert_eq!(value(&model, "C2"), CellValue::Empty);
    }

    #[test]
    fn test_tick_resolves_async_cells() {
        let mut model = Model::new();
        model.dispatch(update(&model, "A1", "=WAIT(99)"));
        assert_eq!(value(&model, "A1"), CellValue::Error(crate::cell::CellError::Loading));
        assert_eq!(model.loading_cell_count(), 1);

        // Nothing settled yet: tick is a no-op.
        model.tick();
        assert_eq!(model.loading_cell_count(), 1);

        let deferreds = model.outstanding_deferreds();
        assert_eq!(deferreds.len(), 1);
        deferreds[0]
            .1
            .resolve(crate::functions::FormulaValue::Number(99.0));
        model.tick();
        assert_eq!(value(&model, "A1"), CellValue::Number(99.0));
        assert_eq!(model.loading_cell_count(), 0);

        // Fully drained: the scheduler disarmed and further ticks do nothing.
        model.tick();
        assert_eq!(value(&model, "A1"), CellValue::Number(99.0));
    }

    #[test]
    fn test_evaluate_only_revision_is_not_undoable() {
        let mut model = Model::new();
        let result = model.dispatch(Command::EvaluateCells { only_waiting: false });
        assert_eq!(result.status, DispatchStatus::Completed);
        assert!(!model.can_undo());
    }

    #[test]
    fn test_undo_descriptions_follow_commands() {
        let mut model = Model::new();
        model.dispatch(update(&model, "A1", "1"));
        assert_eq!(model.undo_description(), Some("UPDATE_CELL"));
        model.dispatch(Command::Undo);
        assert_eq!(model.redo_description(), Some("UPDATE_CELL"));
    }
}

//! FILENAME: engine/src/history.rs
//! PURPOSE: The state observer and undo/redo history.
//! CONTEXT: Every plugin mutation is recorded here as a `HistoryChange`:
//! one reversible field write with its before-value captured prior to the
//! write. One top-level dispatch produces one `Revision` batching its changes
//! together with the commands that produced them. Revisions with no changes
//! are discarded, so no-op commands never pollute the undo stack; the stack
//! is bounded, evicting the oldest revision past the cap; redo is only
//! possible immediately after an undo, because committing any other
//! non-empty revision clears the redo stack.
//!
//! Undo applies a revision's changes in reverse order while capturing the
//! inverse revision for redo; redo applies that inverse the same way.

use std::collections::VecDeque;

use crate::cell::CellPosition;
use crate::command::Command;
use crate::functions::FunctionRegistry;
use crate::sheet::Sheet;
use crate::workbook::Workbook;

/// Maximum number of revisions kept in history.
const MAX_HISTORY_SIZE: usize = 100;

/// One reversible field write: the target, which field, and the value it held
/// before the write. Applying a change restores `before`, returning the
/// inverse change (capturing what was current).
#[derive(Debug, Clone)]
pub enum HistoryChange {
    /// Raw content of a cell. `before: None` means the record did not exist.
    CellContent {
        target: CellPosition,
        before: Option<String>,
    },
    /// Opaque style index of a cell.
    CellStyle {
        target: CellPosition,
        before: Option<u32>,
    },
    /// Opaque format string of a cell.
    CellFormat {
        target: CellPosition,
        before: Option<String>,
    },
    /// Existence of a whole sheet. `before: None` means the sheet was absent
    /// (the change undoes a creation); `Some` restores the full snapshot.
    SheetExistence {
        target: String,
        before: Option<Box<Sheet>>,
    },
    /// Which sheet is active.
    ActiveSheet { before: String },
}

impl HistoryChange {
    /// Applies the change (restoring `before`) and returns its inverse.
    /// Content restoration recompiles the formula, so the registry is needed.
    /// When the change touched cell content, the position is also reported so
    /// the evaluator can be notified.
    pub fn apply(
        self,
        workbook: &mut Workbook,
        registry: &FunctionRegistry,
    ) -> (HistoryChange, Option<CellPosition>) {
        match self {
            HistoryChange::CellContent { target, before } => {
                let current = workbook.cell(&target).map(|c| c.content.clone());
                // A record holding content always has a non-empty string; an
                // absent record reads back as None.
                let current = match current {
                    Some(ref s) if s.is_empty() => None,
                    other => other,
                };
                match before {
                    Some(content) => {
                        if let Some(cell) = workbook.ensure_cell(&target) {
                            cell.set_content(content, registry);
                        }
                    }
                    None => {
                        if let Some(cell) = workbook.cell_mut(&target) {
                            cell.set_content("", registry);
                        }
                        workbook.drop_if_bare(&target);
                    }
                }
                (
                    HistoryChange::CellContent {
                        target: target.clone(),
                        before: current,
                    },
                    Some(target),
                )
            }
            HistoryChange::CellStyle { target, before } => {
                let current = workbook.cell(&target).and_then(|c| c.style);
                match before {
                    Some(style) => {
                        if let Some(cell) = workbook.ensure_cell(&target) {
                            cell.style = Some(style);
                        }
                    }
                    None => {
                        if let Some(cell) = workbook.cell_mut(&target) {
                            cell.style = None;
                        }
                        workbook.drop_if_bare(&target);
                    }
                }
                (
                    HistoryChange::CellStyle {
                        target,
                        before: current,
                    },
                    None,
                )
            }
            HistoryChange::CellFormat { target, before } => {
                let current = workbook.cell(&target).and_then(|c| c.format.clone());
                match before {
                    Some(format) => {
                        if let Some(cell) = workbook.ensure_cell(&target) {
                            cell.format = Some(format);
                        }
                    }
                    None => {
                        if let Some(cell) = workbook.cell_mut(&target) {
                            cell.format = None;
                        }
                        workbook.drop_if_bare(&target);
                    }
                }
                (
                    HistoryChange::CellFormat {
                        target,
                        before: current,
                    },
                    None,
                )
            }
            HistoryChange::SheetExistence { target, before } => {
                let current = workbook.remove_sheet(&target).map(Box::new);
                if let Some(sheet) = before {
                    workbook.add_sheet(*sheet);
                }
                (
                    HistoryChange::SheetExistence {
                        target,
                        before: current,
                    },
                    None,
                )
            }
            HistoryChange::ActiveSheet { before } => {
                let current = workbook.active_sheet_id().to_string();
                workbook.set_active_sheet_id(before);
                (HistoryChange::ActiveSheet { before: current }, None)
            }
        }
    }
}

/// One undo-stack entry: the field-level changes produced by a single
/// top-level dispatched command, plus the commands themselves.
#[derive(Debug, Clone, Default)]
pub struct Revision {
    pub commands: Vec<Command>,
    pub changes: Vec<HistoryChange>,
}

impl Revision {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Human-readable label derived from the root command, for UI menus.
    pub fn description(&self) -> Option<&'static str> {
        self.commands.first().map(Command::type_name)
    }
}

/// The history plugin: records changes into the open revision and owns the
/// undo/redo stacks.
#[derive(Debug, Default)]
pub struct History {
    /// Completed revisions that can be undone (most recent at back).
    undo_stack: VecDeque<Revision>,
    /// Revisions that were undone and can be redone (most recent at back).
    redo_stack: VecDeque<Revision>,
    /// The revision currently being recorded, one per top-level dispatch.
    current: Option<Revision>,
}

impl History {
    pub fn new() -> Self {
        History {
            undo_stack: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            redo_stack: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            current: None,
        }
    }

    /// Opens the revision for a top-level dispatch. Nested calls never happen
    /// by construction (dispatch is not re-entrant), but opening twice would
    /// be a logic error worth surfacing in logs.
    pub fn begin_revision(&mut self) {
        if self.current.is_some() {
            log::warn!("revision already open");
            return;
        }
        self.current = Some(Revision::default());
    }

    /// Appends a processed command (the root or a follow-up) to the open
    /// revision.
    pub fn record_command(&mut self, command: &Command) {
        if let Some(revision) = self.current.as_mut() {
            revision.commands.push(command.clone());
        }
    }

    /// Records one field write. Writers call this before mutating, with the
    /// captured before-value; no-op writes must not be recorded at all.
    pub fn record_change(&mut self, change: HistoryChange) {
        if let Some(revision) = self.current.as_mut() {
            revision.changes.push(change);
        }
    }

    /// Closes the open revision. Empty revisions are dropped; a committed
    /// revision clears the redo stack (mutating after an undo forfeits redo).
    pub fn commit_revision(&mut self) {
        let Some(revision) = self.current.take() else {
            return;
        };
        if revision.is_empty() {
            return;
        }
        self.redo_stack.clear();
        while self.undo_stack.len() >= MAX_HISTORY_SIZE {
            self.undo_stack.pop_front();
        }
        self.undo_stack.push_back(revision);
    }

    /// Applies the most recent revision backwards. Returns the cell positions
    /// whose content changed so the evaluator can be notified. The inverse
    /// revision lands on the redo stack.
    pub fn undo(
        &mut self,
        workbook: &mut Workbook,
        registry: &FunctionRegistry,
    ) -> Vec<CellPosition> {
        let Some(revision) = self.undo_stack.pop_back() else {
            return Vec::new();
        };
        let (inverse, touched) = apply_revision(revision, workbook, registry);
        while self.redo_stack.len() >= MAX_HISTORY_SIZE {
            self.redo_stack.pop_front();
        }
        self.redo_stack.push_back(inverse);
        touched
    }

    /// Applies the most recently undone revision forwards again. Does not
    /// clear the redo stack: redo chains are walked one step at a time.
    pub fn redo(
        &mut self,
        workbook: &mut Workbook,
        registry: &FunctionRegistry,
    ) -> Vec<CellPosition> {
        let Some(revision) = self.redo_stack.pop_back() else {
            return Vec::new();
        };
        let (inverse, touched) = apply_revision(revision, workbook, registry);
        while self.undo_stack.len() >= MAX_HISTORY_SIZE {
            self.undo_stack.pop_front();
        }
        self.undo_stack.push_back(inverse);
        touched
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Label of the next undo step (for UI menus).
    pub fn undo_description(&self) -> Option<&'static str> {
        self.undo_stack.back().and_then(Revision::description)
    }

    /// Label of the next redo step.
    pub fn redo_description(&self) -> Option<&'static str> {
        self.redo_stack.back().and_then(Revision::description)
    }

    /// Current stack sizes (for tests and debugging).
    pub fn stack_sizes(&self) -> (usize, usize) {
        (self.undo_stack.len(), self.redo_stack.len())
    }
}

/// Applies a revision's changes in reverse order, building the inverse
/// revision (same commands, inverse changes) for the opposite stack.
fn apply_revision(
    revision: Revision,
    workbook: &mut Workbook,
    registry: &FunctionRegistry,
) -> (Revision, Vec<CellPosition>) {
    let mut inverse_changes = Vec::with_capacity(revision.changes.len());
    let mut touched = Vec::new();
    for change in revision.changes.into_iter().rev() {
        let (inverse, position) = change.apply(workbook, registry);
        inverse_changes.push(inverse);
        if let Some(position) = position {
            touched.push(position);
        }
    }
    (
        Revision {
            commands: revision.commands,
            changes: inverse_changes,
        },
        touched,
    )
}

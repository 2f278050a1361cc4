//! FILENAME: engine/src/evaluator.rs
//! PURPOSE: The dependency-aware evaluator: walks formula cells, forces their
//! dependencies on demand, detects cycles, and tracks asynchronous results.
//! CONTEXT: Evaluation state lives in fields of this struct, never in
//! process-wide statics:
//! - `visited` is the per-pass tri-state map (absent / in-progress /
//!   finalized) that makes cycle detection correct: dependencies are always
//!   forced before a cell finalizes, so re-entering an in-progress cell is by
//!   definition circular.
//! - `pending` holds cells with an outstanding asynchronous call, keyed by
//!   content generation so a superseded attempt is orphaned instead of
//!   writing into a cell that changed under it.
//! - `waiting` holds cells blocked on some other pending cell, retried on the
//!   next waiting-only pass.
//! - `computed` holds cells finalized this pass; a full pass clears it, a
//!   waiting-only pass reuses it.
//! Async calls return `Deferred` handles which are memoized per
//! (cell, generation); re-running a formula after a handle settles is the
//! continuation, folded back into the synchronous pass.

use std::collections::{HashMap, HashSet};

use parser::ast::{Ast, BinaryOperator};

use crate::cell::{CellError, CellPosition, CellType, CellValue};
use crate::coord;
use crate::functions::{
    Deferred, DeferredState, FormulaValue, FunctionRegistry, FunctionResult, FunctionSpec,
};
use crate::spreading::SpreadingRelation;
use crate::workbook::Workbook;
use crate::zone::Zone;

/// Why evaluation of a formula could not produce a value. "Not ready" is a
/// distinguished signal, not an error: it routes the cell into the waiting
/// set instead of `#ERROR`.
enum EvalInterrupt {
    /// The cell itself issued an asynchronous call that is still outstanding.
    Pending,
    /// A dependency is still `#LOADING`; retry once it resolves.
    NotReady,
    /// A dependency is mid-evaluation: circular reference.
    Cycle,
    /// Any other evaluation-time failure.
    Error(String),
}

pub struct Evaluator {
    /// Per-pass: absent = untouched, false = in progress, true = finalized.
    visited: HashMap<CellPosition, bool>,
    /// Cells with an outstanding async call, with the generation the call
    /// belongs to.
    pending: HashMap<CellPosition, u64>,
    /// Cells blocked on a pending cell.
    waiting: HashSet<CellPosition>,
    /// Cells finalized this pass.
    computed: HashSet<CellPosition>,
    /// Count of cells currently displaying `#LOADING` for their own async
    /// call; the scheduler watches this.
    loading_count: usize,
    /// Bumped on every content change; stale generations orphan their
    /// continuations.
    generations: HashMap<CellPosition, u64>,
    /// Deferred handles spawned per (cell, generation), in call order, so a
    /// retry pass reuses them instead of re-spawning.
    async_calls: HashMap<(CellPosition, u64), Vec<Deferred>>,
    /// Which cells array formulas currently occupy.
    spreading: SpreadingRelation,
    /// Set by content mutations; consumed by the dispatcher's finalize phase.
    content_changed: bool,
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator {
            visited: HashMap::new(),
            pending: HashMap::new(),
            waiting: HashSet::new(),
            computed: HashSet::new(),
            loading_count: 0,
            generations: HashMap::new(),
            async_calls: HashMap::new(),
            spreading: SpreadingRelation::new(),
            content_changed: false,
        }
    }

    pub fn loading_count(&self) -> usize {
        self.loading_count
    }

    pub fn spreading(&self) -> &SpreadingRelation {
        &self.spreading
    }

    /// Consumes the dirty flag; the dispatcher triggers a full pass when set.
    pub fn take_content_changed(&mut self) -> bool {
        std::mem::take(&mut self.content_changed)
    }

    /// Called for every cell whose content was (re)written, including through
    /// undo/redo. Bumps the generation (orphaning any in-flight async call)
    /// and releases the cell's bookkeeping and spread zone.
    pub fn notify_content_changed(&mut self, workbook: &mut Workbook, position: &CellPosition) {
        let generation = self.generations.entry(position.clone()).or_insert(0);
        let old_generation = *generation;
        *generation += 1;

        if self.pending.remove(position).is_some() {
            self.loading_count -= 1;
        }
        self.waiting.remove(position);
        self.computed.remove(position);
        self.async_calls.remove(&(position.clone(), old_generation));

        if let Some(zone) = self.spreading.remove_node(position) {
            clear_spread_values(workbook, &position.sheet_id, &zone, position);
        }

        self.content_changed = true;
    }

    /// Runs an evaluation pass. A full pass clears `computed` and walks every
    /// formula cell; a waiting-only pass harvests settled async calls and
    /// retries the snapshotted waiting set (cells that start waiting *during*
    /// the pass are deferred to the next tick).
    pub fn evaluate(
        &mut self,
        workbook: &mut Workbook,
        registry: &FunctionRegistry,
        only_waiting: bool,
    ) {
        self.visited.clear();
        if only_waiting {
            let snapshot: Vec<CellPosition> = self.waiting.drain().collect();
            let mut pass = EvalPass {
                ev: self,
                workbook,
                registry,
            };
            pass.harvest();
            for position in &snapshot {
                pass.eval_cell(position);
            }
            log::debug!(
                "waiting pass: retried {}, {} still loading",
                snapshot.len(),
                self.loading_count
            );
        } else {
            self.computed.clear();
            let scope = workbook.formula_positions();
            let mut pass = EvalPass {
                ev: self,
                workbook,
                registry,
            };
            for position in &scope {
                pass.eval_cell(position);
            }
            log::debug!(
                "full pass: {} formulas, {} loading, {} waiting",
                scope.len(),
                self.loading_count,
                self.waiting.len()
            );
        }
    }

    /// True when some pending cell can make progress: its frontier handle
    /// has settled, or its generation was superseded. Async calls spawn
    /// sequentially, so only the last handle can be unresolved. This is the
    /// signal the scheduler polls.
    pub fn has_settled_pending(&self) -> bool {
        self.pending.iter().any(|(position, generation)| {
            let current = self.generations.get(position).copied().unwrap_or(0);
            if current != *generation {
                return true;
            }
            self.async_calls
                .get(&(position.clone(), *generation))
                .and_then(|handles| handles.last())
                .map(Deferred::is_settled)
                .unwrap_or(false)
        })
    }

    /// The unresolved handles of currently pending cells, so a host can
    /// resolve or fail them.
    pub fn outstanding_deferreds(&self) -> Vec<(CellPosition, Deferred)> {
        let mut result = Vec::new();
        for (position, generation) in &self.pending {
            if let Some(handles) = self.async_calls.get(&(position.clone(), *generation)) {
                for handle in handles {
                    if !handle.is_settled() {
                        result.push((position.clone(), handle.clone()));
                    }
                }
            }
        }
        result
    }

    fn generation_of(&self, position: &CellPosition) -> u64 {
        self.generations.get(position).copied().unwrap_or(0)
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// One evaluation pass: the evaluator's sets plus the state it walks.
struct EvalPass<'a> {
    ev: &'a mut Evaluator,
    workbook: &'a mut Workbook,
    registry: &'a FunctionRegistry,
}

impl EvalPass<'_> {
    /// The per-cell algorithm. Mutates `value`/`error` on the cell; callers
    /// re-read through the workbook.
    fn eval_cell(&mut self, position: &CellPosition) {
        let Some(cell) = self.workbook.cell(position) else {
            return;
        };
        if cell.cell_type != CellType::Formula {
            return;
        }
        // Formulas that failed to compile keep their #BAD_EXPR sentinel.
        let Some(formula) = cell.formula.clone() else {
            return;
        };

        if self.ev.visited.get(position) == Some(&false) {
            // Re-entered while still in progress: circular reference.
            self.set_value(position, CellValue::Error(CellError::Cycle), true);
            return;
        }
        if self.ev.computed.contains(position) || self.ev.pending.contains_key(position) {
            return;
        }

        // The cell is being (re)evaluated: it is only waiting again if this
        // attempt ends in NotReady.
        self.ev.waiting.remove(position);

        self.ev.visited.insert(position.clone(), false);
        if let Some(cell) = self.workbook.cell_mut(position) {
            cell.error = false;
        }

        let generation = self.ev.generation_of(position);
        let mut call_index = 0;
        let result = self.eval_ast(
            &formula.ast,
            position,
            generation,
            &mut call_index,
            formula.debug,
        );

        match result {
            Ok(value) => self.store_result(position, value),
            Err(EvalInterrupt::Pending) => {
                self.set_value(position, CellValue::Error(CellError::Loading), false);
                self.ev.pending.insert(position.clone(), generation);
                self.ev.loading_count += 1;
            }
            Err(EvalInterrupt::NotReady) => {
                self.set_value(position, CellValue::Error(CellError::Loading), false);
                if self.ev.pending.remove(position).is_some() {
                    // This was an optimistic retry of an async cell, not an
                    // outstanding call: it must go back through waiting.
                    self.ev.loading_count -= 1;
                }
                self.ev.waiting.insert(position.clone());
            }
            Err(EvalInterrupt::Cycle) => {
                if !self.cell_has_error(position) {
                    self.set_value(position, CellValue::Error(CellError::Cycle), true);
                }
            }
            Err(EvalInterrupt::Error(message)) => {
                if !self.cell_has_error(position) {
                    log::debug!("evaluation of {} failed: {}", position, message);
                    self.set_value(position, CellValue::Error(CellError::Error), true);
                }
            }
        }

        self.ev.visited.insert(position.clone(), true);
    }

    /// Re-runs pending cells whose deferred handles settled (or whose
    /// generation was superseded). This is the success/failure continuation,
    /// executed inside the synchronous pass.
    fn harvest(&mut self) {
        let entries: Vec<(CellPosition, u64)> = self
            .ev
            .pending
            .iter()
            .map(|(p, g)| (p.clone(), *g))
            .collect();

        for (position, generation) in entries {
            let superseded = self.ev.generation_of(&position) != generation
                || self.workbook.cell(&position).is_none();
            if superseded {
                // Content changed or the cell (or its whole sheet) is gone:
                // the continuation is orphaned.
                self.ev.pending.remove(&position);
                self.ev.loading_count -= 1;
                self.ev.async_calls.remove(&(position, generation));
                continue;
            }
            let settled = self
                .ev
                .async_calls
                .get(&(position.clone(), generation))
                .and_then(|handles| handles.last())
                .map(Deferred::is_settled)
                .unwrap_or(false);
            if !settled {
                continue;
            }
            self.ev.pending.remove(&position);
            self.ev.loading_count -= 1;
            self.eval_cell(&position);
        }
    }

    fn eval_ast(
        &mut self,
        ast: &Ast,
        origin: &CellPosition,
        generation: u64,
        call_index: &mut usize,
        debug: bool,
    ) -> Result<FormulaValue, EvalInterrupt> {
        let value = match ast {
            Ast::Number(n) => FormulaValue::Number(*n),
            Ast::Str(s) => FormulaValue::Text(s.clone()),
            Ast::Boolean(b) => FormulaValue::Boolean(*b),
            Ast::Variable(reference) => self.get_reference_value(reference, origin)?,
            Ast::Operation {
                op: BinaryOperator::Range,
                left,
                right,
            } => self.build_range(left, right, origin)?,
            Ast::Operation { op, left, right } => {
                let l = self.eval_ast(left, origin, generation, call_index, debug)?;
                let r = self.eval_ast(right, origin, generation, call_index, debug)?;
                apply_operator(*op, &l, &r).map_err(EvalInterrupt::Error)?
            }
            Ast::FunctionCall { name, args } => {
                let spec = *self.registry.get(name).ok_or_else(|| {
                    EvalInterrupt::Error(format!("Unknown function {}", name))
                })?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_ast(arg, origin, generation, call_index, debug)?);
                }
                if spec.is_async {
                    self.eval_async_call(&spec, &values, origin, generation, call_index)?
                } else {
                    match (spec.handler)(&values).map_err(EvalInterrupt::Error)? {
                        FunctionResult::Value(v) => v,
                        FunctionResult::Deferred(_) => {
                            return Err(EvalInterrupt::Error(format!(
                                "{} returned a deferred value but is not declared async",
                                spec.name
                            )))
                        }
                    }
                }
            }
        };

        if debug {
            log::trace!("debug step in {}: {:?}", origin, value);
        }
        Ok(value)
    }

    /// Async call sites are numbered in evaluation order; the handle spawned
    /// at each site is memoized per (cell, generation) so a retry re-reads it
    /// instead of spawning a duplicate.
    fn eval_async_call(
        &mut self,
        spec: &FunctionSpec,
        values: &[FormulaValue],
        origin: &CellPosition,
        generation: u64,
        call_index: &mut usize,
    ) -> Result<FormulaValue, EvalInterrupt> {
        let key = (origin.clone(), generation);
        let handles = self.ev.async_calls.entry(key).or_default();

        let result = match handles.get(*call_index) {
            Some(handle) => match handle.state() {
                DeferredState::Resolved(value) => Ok(value),
                DeferredState::Failed(message) => Err(EvalInterrupt::Error(message)),
                DeferredState::Pending => Err(EvalInterrupt::Pending),
            },
            None => match (spec.handler)(values).map_err(EvalInterrupt::Error)? {
                FunctionResult::Deferred(handle) => {
                    handles.push(handle);
                    Err(EvalInterrupt::Pending)
                }
                // An async function may still complete synchronously.
                FunctionResult::Value(value) => Ok(value),
            },
        };
        *call_index += 1;
        result
    }

    /// Forces a referenced cell and reads its value. Fails with the
    /// appropriate interrupt on a loading, cyclic or errored dependency.
    fn get_reference_value(
        &mut self,
        reference: &str,
        origin: &CellPosition,
    ) -> Result<FormulaValue, EvalInterrupt> {
        let Some((col, row)) = coord::parse_reference(reference) else {
            return Err(EvalInterrupt::Error(format!(
                "Invalid reference {:?}",
                reference
            )));
        };
        let position = CellPosition::new(origin.sheet_id.clone(), col, row);
        self.read_cell_value(&position)
    }

    fn read_cell_value(
        &mut self,
        position: &CellPosition,
    ) -> Result<FormulaValue, EvalInterrupt> {
        self.eval_cell(position);

        let Some(cell) = self.workbook.cell(position) else {
            return Ok(FormulaValue::Empty);
        };
        if self.ev.pending.contains_key(position)
            || self.ev.waiting.contains(position)
            || cell.value.is_loading()
        {
            return Err(EvalInterrupt::NotReady);
        }
        if cell.error {
            return match cell.value {
                CellValue::Error(CellError::Cycle) => Err(EvalInterrupt::Cycle),
                _ => Err(EvalInterrupt::Error(format!(
                    "Dependency {} is in error",
                    position
                ))),
            };
        }
        FormulaValue::from_cell_value(&cell.value)
            .map_err(|e| EvalInterrupt::Error(format!("Dependency error {}", e)))
    }

    /// Builds the 2-D value block of a range reference, columns outer, rows
    /// inner. Cells without a record contribute an empty value without being
    /// forced.
    fn build_range(
        &mut self,
        left: &Ast,
        right: &Ast,
        origin: &CellPosition,
    ) -> Result<FormulaValue, EvalInterrupt> {
        let (Ast::Variable(start), Ast::Variable(end)) = (left, right) else {
            return Err(EvalInterrupt::Error(
                "Range bounds must be cell references".to_string(),
            ));
        };
        let (Some((start_col, start_row)), Some((end_col, end_row))) =
            (coord::parse_reference(start), coord::parse_reference(end))
        else {
            return Err(EvalInterrupt::Error(format!(
                "Invalid range {}:{}",
                start, end
            )));
        };

        let zone = Zone::new(start_col, end_col, start_row, end_row);
        let mut columns = Vec::with_capacity(zone.width() as usize);
        for col in zone.left..=zone.right {
            let mut column = Vec::with_capacity(zone.height() as usize);
            for row in zone.top..=zone.bottom {
                let position = CellPosition::new(origin.sheet_id.clone(), col, row);
                let value = if self.workbook.cell(&position).is_some() {
                    self.read_cell_value(&position)?
                } else {
                    FormulaValue::Empty
                };
                column.push(value);
            }
            columns.push(column);
        }
        Ok(FormulaValue::Range(columns))
    }

    /// Stores a finalized result: scalars directly, multi-cell arrays through
    /// the spreading relation.
    fn store_result(&mut self, position: &CellPosition, value: FormulaValue) {
        match value {
            FormulaValue::Range(columns) if range_cell_count(&columns) > 1 => {
                self.spread_result(position, columns);
            }
            other => {
                // The formula no longer produces an array: release any claim.
                if let Some(zone) = self.ev.spreading.remove_node(position) {
                    clear_spread_values(self.workbook, &position.sheet_id, &zone, position);
                }
                self.set_value(position, other.into_cell_value(), false);
                self.ev.computed.insert(position.clone());
            }
        }
    }

    /// Writes a multi-cell array: the origin keeps the top-left value, the
    /// rest spreads into the claimed zone. Overlapping claims of other
    /// origins are evicted first; a collision with real content errors the
    /// origin instead of overwriting user data.
    fn spread_result(&mut self, origin: &CellPosition, columns: Vec<Vec<FormulaValue>>) {
        let width = columns.len() as u32;
        let height = columns.iter().map(Vec::len).max().unwrap_or(0) as u32;
        let zone = Zone {
            left: origin.col,
            right: origin.col + width - 1,
            top: origin.row,
            bottom: origin.row + height - 1,
        };

        // Refuse to overwrite cells that hold their own content.
        for (col, row) in zone.positions() {
            if (col, row) == (origin.col, origin.row) {
                continue;
            }
            let target = CellPosition::new(origin.sheet_id.clone(), col, row);
            let occupied = self
                .workbook
                .cell(&target)
                .map(|c| !c.content.is_empty())
                .unwrap_or(false);
            if occupied {
                log::debug!("array result of {} collides at {}", origin, target);
                if let Some(old) = self.ev.spreading.remove_node(origin) {
                    clear_spread_values(self.workbook, &origin.sheet_id, &old, origin);
                }
                self.set_value(origin, CellValue::Error(CellError::Error), true);
                return;
            }
        }

        // Evict every overlapping claim, clearing the cells it abandoned.
        let overlapping = self
            .ev
            .spreading
            .search_formula_positions_spreading_on(&origin.sheet_id, &zone);
        for other in overlapping {
            if other == *origin {
                continue;
            }
            if let Some(old) = self.ev.spreading.remove_node(&other) {
                clear_spread_values(self.workbook, &other.sheet_id, &old, &other);
            }
        }
        // A shrinking zone abandons its own previous cells too.
        if let Some(old) = self.ev.spreading.remove_node(origin) {
            for (col, row) in old.positions() {
                if zone.contains(col, row) || (col, row) == (origin.col, origin.row) {
                    continue;
                }
                let target = CellPosition::new(origin.sheet_id.clone(), col, row);
                if let Some(cell) = self.workbook.cell_mut(&target) {
                    cell.value = CellValue::Empty;
                }
                self.workbook.drop_if_bare(&target);
            }
        }

        self.ev.spreading.add_relation(origin, zone);

        for (i, column) in columns.iter().enumerate() {
            for row_offset in 0..height {
                let value = column
                    .get(row_offset as usize)
                    .cloned()
                    .unwrap_or(FormulaValue::Empty);
                let target = CellPosition::new(
                    origin.sheet_id.clone(),
                    origin.col + i as u32,
                    origin.row + row_offset,
                );
                if target == *origin {
                    self.set_value(origin, value.into_cell_value(), false);
                } else if let Some(cell) = self.workbook.ensure_cell(&target) {
                    cell.value = value.into_cell_value();
                }
            }
        }

        self.ev.computed.insert(origin.clone());
    }

    fn set_value(&mut self, position: &CellPosition, value: CellValue, error: bool) {
        if let Some(cell) = self.workbook.cell_mut(position) {
            cell.value = value;
            cell.error = error;
        }
    }

    fn cell_has_error(&self, position: &CellPosition) -> bool {
        self.workbook
            .cell(position)
            .map(|c| c.error)
            .unwrap_or(false)
    }
}

fn range_cell_count(columns: &[Vec<FormulaValue>]) -> usize {
    columns.iter().map(Vec::len).sum()
}

/// Clears the values an array formula spread into `zone`, leaving the origin
/// itself alone and dropping records nothing else keeps alive.
fn clear_spread_values(
    workbook: &mut Workbook,
    sheet_id: &str,
    zone: &Zone,
    origin: &CellPosition,
) {
    for (col, row) in zone.positions() {
        if (col, row) == (origin.col, origin.row) {
            continue;
        }
        let position = CellPosition::new(sheet_id.to_string(), col, row);
        if let Some(cell) = workbook.cell_mut(&position) {
            cell.value = CellValue::Empty;
        }
        workbook.drop_if_bare(&position);
    }
}

fn apply_operator(
    op: BinaryOperator,
    left: &FormulaValue,
    right: &FormulaValue,
) -> Result<FormulaValue, String> {
    let (Some(l), Some(r)) = (left.number_or_zero(), right.number_or_zero()) else {
        return Err(format!("Operator {} expects numbers", op));
    };
    let result = match op {
        BinaryOperator::Add => l + r,
        BinaryOperator::Subtract => l - r,
        BinaryOperator::Multiply => l * r,
        BinaryOperator::Divide => {
            if r == 0.0 {
                return Err("Division by zero".to_string());
            }
            l / r
        }
        // Ranges are handled before operators are applied.
        BinaryOperator::Range => return Err("Unexpected range operator".to_string()),
    };
    Ok(FormulaValue::Number(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;

    struct Fixture {
        workbook: Workbook,
        registry: FunctionRegistry,
        evaluator: Evaluator,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                workbook: Workbook::new(),
                registry: FunctionRegistry::standard(),
                evaluator: Evaluator::new(),
            }
        }

        fn pos(&self, reference: &str) -> CellPosition {
            let (col, row) = coord::parse_reference(reference).unwrap();
            CellPosition::new(self.workbook.active_sheet_id().to_string(), col, row)
        }

        fn set(&mut self, reference: &str, content: &str) {
            let position = self.pos(reference);
            self.workbook
                .ensure_cell(&position)
                .unwrap()
                .set_content(content, &self.registry);
            self.evaluator
                .notify_content_changed(&mut self.workbook, &position);
        }

        fn evaluate(&mut self) {
            self.evaluator
                .evaluate(&mut self.workbook, &self.registry, false);
        }

        fn evaluate_waiting(&mut self) {
            self.evaluator
                .evaluate(&mut self.workbook, &self.registry, true);
        }

        fn value(&self, reference: &str) -> CellValue {
            self.workbook
                .cell(&self.pos(reference))
                .map(|c| c.value.clone())
                .unwrap_or(CellValue::Empty)
        }
    }

    #[test]
    fn test_evaluates_arithmetic_with_precedence() {
        let mut fx = Fixture::new();
        fx.set("A1", "=2+3*4");
        fx.set("A2", "=(2+3)*4");
        fx.evaluate();
        assert_eq!(fx.value("A1"), CellValue::Number(14.0));
        assert_eq!(fx.value("A2"), CellValue::Number(20.0));
    }

    #[test]
    fn test_forces_dependencies_in_any_order() {
        let mut fx = Fixture::new();
        fx.set("C1", "=B1+1");
        fx.set("B1", "=A1+1");
        fx.set("A1", "40");
        fx.evaluate();
        assert_eq!(fx.value("B1"), CellValue::Number(41.0));
        assert_eq!(fx.value("C1"), CellValue::Number(42.0));
    }

    #[test]
    fn test_sum_over_range() {
        let mut fx = Fixture::new();
        fx.set("A1", "1");
        fx.set("A2", "2");
        fx.set("A3", "3");
        fx.set("B1", "=SUM(A1:A3)");
        fx.evaluate();
        assert_eq!(fx.value("B1"), CellValue::Number(6.0));
    }

    #[test]
    fn test_empty_cells_count_as_zero_in_arithmetic() {
        let mut fx = Fixture::new();
        fx.set("B1", "=A1+5");
        fx.evaluate();
        assert_eq!(fx.value("B1"), CellValue::Number(5.0));
    }

    #[test]
    fn test_two_cell_cycle_marks_both() {
        let mut fx = Fixture::new();
        fx.set("A1", "=B1");
        fx.set("B1", "=A1");
        fx.evaluate();
        assert_eq!(fx.value("A1"), CellValue::Error(CellError::Cycle));
        assert_eq!(fx.value("B1"), CellValue::Error(CellError::Cycle));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut fx = Fixture::new();
        fx.set("A1", "=A1+1");
        fx.evaluate();
        assert_eq!(fx.value("A1"), CellValue::Error(CellError::Cycle));
    }

    #[test]
    fn test_division_by_zero_errors() {
        let mut fx = Fixture::new();
        fx.set("A1", "=1/0");
        fx.evaluate();
        assert_eq!(fx.value("A1"), CellValue::Error(CellError::Error));
        assert!(fx.workbook.cell(&fx.pos("A1")).unwrap().error);
    }

    #[test]
    fn test_error_propagates_to_dependents() {
        let mut fx = Fixture::new();
        fx.set("A1", "=1/0");
        fx.set("B1", "=A1+1");
        fx.evaluate();
        assert_eq!(fx.value("B1"), CellValue::Error(CellError::Error));
    }

    #[test]
    fn test_async_cell_goes_loading_then_resolves() {
        let mut fx = Fixture::new();
        fx.set("A1", "=WAIT(42)");
        fx.evaluate();
        assert_eq!(fx.value("A1"), CellValue::Error(CellError::Loading));
        assert_eq!(fx.evaluator.loading_count(), 1);

        let deferreds = fx.evaluator.outstanding_deferreds();
        assert_eq!(deferreds.len(), 1);
        deferreds[0].1.resolve(FormulaValue::Number(42.0));

        assert!(fx.evaluator.has_settled_pending());
        fx.evaluate_waiting();
        assert_eq!(fx.value("A1"), CellValue::Number(42.0));
        assert_eq!(fx.evaluator.loading_count(), 0);
    }

    #[test]
    fn test_dependent_of_async_cell_waits() {
        let mut fx = Fixture::new();
        fx.set("A1", "=WAIT(5)");
        fx.set("B1", "=A1+1");
        fx.evaluate();
        assert_eq!(fx.value("A1"), CellValue::Error(CellError::Loading));
        assert_eq!(fx.value("B1"), CellValue::Error(CellError::Loading));
        // Only A1 counts as loading; B1 is waiting on it.
        assert_eq!(fx.evaluator.loading_count(), 1);

        let deferreds = fx.evaluator.outstanding_deferreds();
        deferreds[0].1.resolve(FormulaValue::Number(5.0));
        fx.evaluate_waiting();
        assert_eq!(fx.value("A1"), CellValue::Number(5.0));
        assert_eq!(fx.value("B1"), CellValue::Number(6.0));
        assert_eq!(fx.evaluator.loading_count(), 0);
    }

    #[test]
    fn test_sequential_async_calls_resolve_one_at_a_time() {
        let mut fx = Fixture::new();
        fx.set("A1", "=WAIT(1)+WAIT(2)");
        fx.evaluate();
        assert_eq!(fx.evaluator.loading_count(), 1);

        // First call settles; the retry spawns the second call.
        fx.evaluator.outstanding_deferreds()[0]
            .1
            .resolve(FormulaValue::Number(1.0));
        fx.evaluate_waiting();
        assert_eq!(fx.value("A1"), CellValue::Error(CellError::Loading));
        assert_eq!(fx.evaluator.loading_count(), 1);

        fx.evaluator.outstanding_deferreds()[0]
            .1
            .resolve(FormulaValue::Number(2.0));
        fx.evaluate_waiting();
        assert_eq!(fx.value("A1"), CellValue::Number(3.0));
        assert_eq!(fx.evaluator.loading_count(), 0);
    }

    #[test]
    fn test_failed_deferred_routes_to_error() {
        let mut fx = Fixture::new();
        fx.set("A1", "=WAIT(1)");
        fx.evaluate();
        fx.evaluator.outstanding_deferreds()[0].1.fail("boom");
        fx.evaluate_waiting();
        assert_eq!(fx.value("A1"), CellValue::Error(CellError::Error));
        assert_eq!(fx.evaluator.loading_count(), 0);
    }

    #[test]
    fn test_superseded_async_attempt_is_orphaned() {
        let mut fx = Fixture::new();
        fx.set("A1", "=WAIT(1)");
        fx.evaluate();
        let stale = fx.evaluator.outstanding_deferreds();

        // Content changes before the handle resolves.
        fx.set("A1", "7");
        fx.evaluate();
        assert_eq!(fx.value("A1"), CellValue::Number(7.0));
        assert_eq!(fx.evaluator.loading_count(), 0);

        // The stale continuation fires into the void.
        stale[0].1.resolve(FormulaValue::Number(999.0));
        fx.evaluate_waiting();
        assert_eq!(fx.value("A1"), CellValue::Number(7.0));
    }

    #[test]
    fn test_array_result_spreads_into_zone() {
        let mut fx = Fixture::new();
        fx.set("A1", "1");
        fx.set("A2", "2");
        fx.set("B1", "3");
        fx.set("B2", "4");
        fx.set("D1", "=TRANSPOSE(A1:B2)");
        fx.evaluate();
        assert_eq!(fx.value("D1"), CellValue::Number(1.0));
        assert_eq!(fx.value("E1"), CellValue::Number(2.0));
        assert_eq!(fx.value("D2"), CellValue::Number(3.0));
        assert_eq!(fx.value("E2"), CellValue::Number(4.0));
        assert!(fx.evaluator.spreading().is_array_formula(&fx.pos("D1")));
        assert!(fx.evaluator.spreading().is_spread_target(&fx.pos("E2")));
    }

    #[test]
    fn test_bare_range_formula_spreads() {
        let mut fx = Fixture::new();
        fx.set("A1", "10");
        fx.set("A2", "20");
        fx.set("C1", "=A1:A2");
        fx.evaluate();
        assert_eq!(fx.value("C1"), CellValue::Number(10.0));
        assert_eq!(fx.value("C2"), CellValue::Number(20.0));
    }

    #[test]
    fn test_shrinking_array_clears_abandoned_cells() {
        let mut fx = Fixture::new();
        fx.set("A1", "1");
        fx.set("A2", "2");
        fx.set("A3", "3");
        fx.set("C1", "=A1:A3");
        fx.evaluate();
        assert_eq!(fx.value("C3"), CellValue::Number(3.0));

        fx.set("C1", "=A1:A2");
        fx.evaluate();
        assert_eq!(fx.value("C2"), CellValue::Number(2.0));
        assert_eq!(fx.value("C3"), CellValue::Empty);
    }

    #[test]
    fn test_deleting_array_origin_clears_spread_cells() {
        let mut fx = Fixture::new();
        fx.set("A1", "1");
        fx.set("A2", "2");
        fx.set("C1", "=A1:A2");
        fx.evaluate();
        assert_eq!(fx.value("C2"), CellValue::Number(2.0));

        fx.set("C1", "");
        fx.evaluate();
        assert_eq!(fx.value("C2"), CellValue::Empty);
        assert!(!fx.evaluator.spreading().is_array_formula(&fx.pos("C1")));
    }

    #[test]
    fn test_array_collision_with_content_errors_origin() {
        let mut fx = Fixture::new();
        fx.set("A1", "1");
        fx.set("A2", "2");
        fx.set("C2", "occupied");
        fx.set("C1", "=A1:A2");
        fx.evaluate();
        assert_eq!(fx.value("C1"), CellValue::Error(CellError::Error));
        assert_eq!(fx.value("C2"), CellValue::Text("occupied".to_string()));
    }

    #[test]
    fn test_waiting_cells_added_during_pass_are_deferred() {
        let mut fx = Fixture::new();
        fx.set("A1", "=WAIT(1)");
        fx.set("B1", "=A1");
        fx.set("C1", "=B1");
        fx.evaluate();
        assert_eq!(fx.evaluator.loading_count(), 1);

        fx.evaluator.outstanding_deferreds()[0]
            .1
            .resolve(FormulaValue::Number(1.0));
        fx.evaluate_waiting();
        // The chain settles within one retry because dependencies are forced
        // recursively.
        assert_eq!(fx.value("B1"), CellValue::Number(1.0));
        assert_eq!(fx.value("C1"), CellValue::Number(1.0));
    }
}

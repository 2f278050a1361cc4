//! FILENAME: engine/src/lib.rs
//! PURPOSE: Main library entry point for the spreadsheet computation kernel.
//! CONTEXT: Re-exports public types and modules for use by host applications.
//! The kernel compiles cell text into formulas, evaluates the grid in
//! dependency order (including asynchronous cells), tracks which cells array
//! formulas occupy, and routes every mutation through a command pipeline with
//! transactional undo/redo. Rendering, UI, clipboard and import/export live
//! in the host; they dispatch commands and read back through the getters.

pub mod cell;
pub mod command;
pub mod coord;
pub mod evaluator;
pub mod formula;
pub mod functions;
pub mod history;
pub mod model;
pub mod offset;
pub mod scheduler;
pub mod sheet;
pub mod spreading;
pub mod workbook;
pub mod zone;

// Re-export commonly used types at the crate root
pub use cell::{Cell, CellError, CellPosition, CellType, CellValue, EvaluatedCell};
pub use command::{Command, CommandCancelReason, DispatchResult, DispatchStatus};
pub use coord::{col_to_index, index_to_col, parse_reference, to_reference};
pub use evaluator::Evaluator;
pub use formula::{compile, CompiledFormula, FormulaSyntaxError};
pub use functions::{
    Deferred, DeferredState, FormulaValue, FunctionRegistry, FunctionResult, FunctionSpec,
};
pub use history::{History, HistoryChange, Revision};
pub use model::Model;
pub use offset::apply_offset;
pub use scheduler::Scheduler;
pub use sheet::Sheet;
pub use spreading::SpreadingRelation;
pub use workbook::Workbook;
pub use zone::Zone;

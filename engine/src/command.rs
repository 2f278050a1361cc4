//! FILENAME: engine/src/command.rs
//! PURPOSE: The command protocol: every mutation of shared state is a command.
//! CONTEXT: Commands are pure data: a tagged union carrying no behavior.
//! They serialize with a SCREAMING_SNAKE_CASE `type` tag and camelCase
//! payload fields, so hosts can feed JSON straight into `dispatch`.
//! Dispatch either completes or is cancelled with a reason from a closed
//! enumerated set; cancellation reasons are never free text.

use serde::{Deserialize, Serialize};

/// All mutations the kernel accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum Command {
    UpdateCell {
        sheet_id: String,
        col: u32,
        row: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    ClearCell {
        sheet_id: String,
        col: u32,
        row: u32,
    },
    CreateSheet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sheet_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        activate: bool,
    },
    ActivateSheet {
        sheet_id: String,
    },
    EvaluateCells {
        #[serde(default)]
        only_waiting: bool,
    },
    Undo,
    Redo,
}

impl Command {
    /// The wire-format tag, used for logging and undo descriptions.
    pub fn type_name(&self) -> &'static str {
        match self {
            Command::UpdateCell { .. } => "UPDATE_CELL",
            Command::ClearCell { .. } => "CLEAR_CELL",
            Command::CreateSheet { .. } => "CREATE_SHEET",
            Command::ActivateSheet { .. } => "ACTIVATE_SHEET",
            Command::EvaluateCells { .. } => "EVALUATE_CELLS",
            Command::Undo => "UNDO",
            Command::Redo => "REDO",
        }
    }
}

/// Why a dispatch was refused. Closed set, matched on by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandCancelReason {
    EmptyUndoStack,
    EmptyRedoStack,
    UnknownSheet,
    DuplicateSheet,
    CellIsSpreadTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Completed,
    Cancelled,
}

/// Result of `dispatch`: completed, or cancelled with the first rejecting
/// reason and no mutation performed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CommandCancelReason>,
}

impl DispatchResult {
    pub fn completed() -> Self {
        DispatchResult {
            status: DispatchStatus::Completed,
            reason: None,
        }
    }

    pub fn cancelled(reason: CommandCancelReason) -> Self {
        DispatchResult {
            status: DispatchStatus::Cancelled,
            reason: Some(reason),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == DispatchStatus::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serializes_with_type_tag() {
        let command = Command::UpdateCell {
            sheet_id: "s1".to_string(),
            col: 2,
            row: 3,
            content: Some("=A1".to_string()),
            style: None,
            format: None,
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["type"], "UPDATE_CELL");
        assert_eq!(json["sheetId"], "s1");
        assert_eq!(json["col"], 2);
        assert_eq!(json["content"], "=A1");
        assert!(json.get("style").is_none());
    }

    #[test]
    fn test_command_round_trips_through_json() {
        let commands = vec![
            Command::UpdateCell {
                sheet_id: "s1".to_string(),
                col: 0,
                row: 0,
                content: Some("1".to_string()),
                style: Some(2),
                format: Some("0.00".to_string()),
            },
            Command::ClearCell {
                sheet_id: "s1".to_string(),
                col: 1,
                row: 1,
            },
            Command::EvaluateCells { only_waiting: true },
            Command::Undo,
            Command::Redo,
        ];
        for command in commands {
            let json = serde_json::to_string(&command).unwrap();
            let back: Command = serde_json::from_str(&json).unwrap();
            assert_eq!(back, command);
        }
    }

    #[test]
    fn test_command_deserializes_with_defaults() {
        let command: Command =
            serde_json::from_str(r#"{"type":"EVALUATE_CELLS"}"#).unwrap();
        assert_eq!(command, Command::EvaluateCells { only_waiting: false });

        let command: Command = serde_json::from_str(
            r#"{"type":"UPDATE_CELL","sheetId":"s1","col":0,"row":0}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            Command::UpdateCell {
                sheet_id: "s1".to_string(),
                col: 0,
                row: 0,
                content: None,
                style: None,
                format: None,
            }
        );
    }
}

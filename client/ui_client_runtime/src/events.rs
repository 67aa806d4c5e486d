//! From user input to outgoing events.
//!
//! Widget instances interpret raw input and put typed [`WidgetMessage`]s on
//! the session's [`EventBus`]. The [`EventEnvelopeBuilder`] consumes them and,
//! at each animation-frame boundary, flushes everything gathered since the
//! previous frame as one ordered list of [`OutgoingEvent`]s. Grid edits are
//! batched per grid; group changes are folded in at flush time.

use crate::error::InteractionError;
use crate::groups::GroupChange;
use crate::protocol::{GridChange, OutgoingEvent};
use crate::tree::{ColumnType, GridColumn};
use crate::upload::SelectedFile;
use crate::widget::{WidgetInstance, WidgetState};
use serde_json::{Number, Value};
use std::collections::VecDeque;

/// Raw input delivered by the host for one widget or group.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    Focus,
    Blur,
    Click,
    CommitText(String),
    SelectValue(Value),
    PickColor(String),
    EditCode(String),
    ToggleCheckbox { value: String },
    SelectRadio { value: String },
    EditCell {
        row_index: u64,
        column: String,
        value: Value,
    },
    Scroll(u32),
    SelectFiles(Vec<SelectedFile>),
}

impl UserInput {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::Blur => "blur",
            Self::Click => "click",
            Self::CommitText(_) => "text",
            Self::SelectValue(_) => "selection",
            Self::PickColor(_) => "color",
            Self::EditCode(_) => "code edit",
            Self::ToggleCheckbox { .. } => "checkbox toggle",
            Self::SelectRadio { .. } => "radio selection",
            Self::EditCell { .. } => "cell edit",
            Self::Scroll(_) => "scroll",
            Self::SelectFiles(_) => "file selection",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetMessage {
    Clicked {
        widget_id: String,
        fragment_id: String,
    },
    ValueChanged {
        widget_id: String,
        fragment_id: String,
        old_value: Option<Value>,
        new_value: Value,
    },
    CellEdited {
        /// Instance key; edits to one grid coalesce on it.
        key: String,
        widget_id: String,
        fragment_id: String,
        change: GridChange,
    },
    DownloadRequested {
        widget_id: String,
        fragment_id: String,
        file_name: String,
    },
    FilesSelected {
        key: String,
        widget_id: String,
        fragment_id: String,
        multiple: bool,
        files: Vec<SelectedFile>,
    },
}

#[derive(Debug, Default)]
pub struct EventBus {
    queue: VecDeque<WidgetMessage>,
}

impl EventBus {
    pub fn publish(&mut self, message: WidgetMessage) {
        self.queue.push_back(message);
    }

    pub fn next(&mut self) -> Option<WidgetMessage> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Outcome of validating a grid cell edit against its column.
#[derive(Debug, Clone, PartialEq)]
pub enum CellVerdict {
    /// Same as the current value; nothing to send.
    Unchanged,
    /// Rejected; the cell keeps its previous value and nothing is sent.
    Revert,
    Accept(Value),
}

pub fn validate_cell(column: &GridColumn, old: &Value, new: &Value) -> CellVerdict {
    if loosely_equal(old, new) {
        return CellVerdict::Unchanged;
    }

    let reject_or_null = || {
        if column.required {
            CellVerdict::Revert
        } else {
            CellVerdict::Accept(Value::Null)
        }
    };

    match column.ty {
        ColumnType::Number if is_blank(new) => reject_or_null(),
        ColumnType::Number => match as_number(new) {
            Some(number) if loosely_equal(old, &number) => CellVerdict::Unchanged,
            Some(number) => CellVerdict::Accept(number),
            None => reject_or_null(),
        },
        ColumnType::String if new.is_null() => reject_or_null(),
        ColumnType::String | ColumnType::Other => CellVerdict::Accept(new.clone()),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(text) => parse_number(text.trim()),
        _ => None,
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(integer) = text.parse::<i64>() {
        return Some(Value::from(integer));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Equality that treats a number and its decimal spelling as the same value.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    let numeric = |value: &Value| match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) if !text.trim().is_empty() => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Applies input to a live widget and returns the message it emits, if any.
pub fn interpret(
    instance: &mut WidgetInstance,
    input: UserInput,
) -> Result<Option<WidgetMessage>, InteractionError> {
    let key = instance.id().to_string();
    let widget_id = instance.widget_id().to_string();
    let fragment_id = instance.fragment_id().to_string();
    let kind = instance.kind();

    let message = match (&mut instance.state, input) {
        (_, UserInput::Focus) => {
            instance.local.focused = true;
            None
        }
        (_, UserInput::Blur) => {
            instance.local.focused = false;
            None
        }
        (_, UserInput::Scroll(offset)) => {
            instance.local.scroll_top = offset;
            None
        }
        (WidgetState::Button(button), UserInput::Click) => Some(match &button.download_name {
            Some(file_name) => WidgetMessage::DownloadRequested {
                widget_id,
                fragment_id,
                file_name: file_name.clone(),
            },
            None => WidgetMessage::Clicked {
                widget_id,
                fragment_id,
            },
        }),
        (WidgetState::TextField(field), UserInput::CommitText(text)) => {
            let new_value = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.clone())
            };
            instance.local.caret = Some(text.chars().count());
            field.value = text;
            Some(WidgetMessage::ValueChanged {
                widget_id,
                fragment_id,
                old_value: None,
                new_value,
            })
        }
        (WidgetState::Select(select), UserInput::SelectValue(value)) => {
            let old_value = std::mem::replace(&mut select.value, value.clone());
            Some(WidgetMessage::ValueChanged {
                widget_id,
                fragment_id,
                old_value: Some(normalize_selection(old_value)),
                new_value: normalize_selection(value),
            })
        }
        (WidgetState::ColorField(color), UserInput::PickColor(value)) => {
            color.value.clone_from(&value);
            Some(WidgetMessage::ValueChanged {
                widget_id,
                fragment_id,
                old_value: None,
                new_value: Value::String(value),
            })
        }
        (WidgetState::CodeEditor(editor), UserInput::EditCode(text)) => {
            editor.text.clone_from(&text);
            Some(WidgetMessage::ValueChanged {
                widget_id,
                fragment_id,
                old_value: None,
                new_value: Value::String(text),
            })
        }
        (
            WidgetState::DataGrid(grid),
            UserInput::EditCell {
                row_index,
                column,
                value,
            },
        ) => {
            let Some(config) = grid.column(&column).filter(|config| config.editable).cloned() else {
                return Err(InteractionError::NotEditable { widget_id: key, column });
            };
            let Some(old) = grid.cell(row_index, &column).cloned().or_else(|| {
                grid.rows
                    .iter()
                    .any(|row| row.row_index == row_index)
                    .then_some(Value::Null)
            }) else {
                return Err(InteractionError::UnknownRow {
                    widget_id: key,
                    row_index,
                });
            };

            match validate_cell(&config, &old, &value) {
                CellVerdict::Unchanged => None,
                CellVerdict::Revert => {
                    tracing::debug!(%key, row_index, %column, "rejected cell edit reverted");
                    None
                }
                CellVerdict::Accept(new_value) => {
                    grid.set_cell(row_index, &column, new_value.clone());
                    Some(WidgetMessage::CellEdited {
                        key,
                        widget_id,
                        fragment_id,
                        change: GridChange {
                            row_index,
                            column_name: column,
                            new_value,
                        },
                    })
                }
            }
        }
        (WidgetState::FileUploader(uploader), UserInput::SelectFiles(files)) => {
            Some(WidgetMessage::FilesSelected {
                key,
                widget_id,
                fragment_id,
                multiple: uploader.multiple,
                files,
            })
        }
        (_, input) => {
            return Err(InteractionError::Unsupported {
                widget_id: key,
                kind,
                input: input.name(),
            });
        }
    };

    Ok(message)
}

/// An empty string or list means nothing is selected.
fn normalize_selection(value: Value) -> Value {
    match &value {
        Value::String(text) if text.is_empty() => Value::Null,
        Value::Array(items) if items.is_empty() => Value::Null,
        _ => value,
    }
}

enum Pending {
    Event(OutgoingEvent),
    Batch {
        key: String,
        widget_id: String,
        fragment_id: String,
        changes: Vec<GridChange>,
    },
}

#[derive(Default)]
pub struct EventEnvelopeBuilder {
    pending: Vec<Pending>,
}

impl EventEnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn ingest(&mut self, message: WidgetMessage) {
        match message {
            WidgetMessage::Clicked {
                widget_id,
                fragment_id,
            } => self
                .pending
                .push(Pending::Event(OutgoingEvent::click(widget_id, fragment_id))),
            WidgetMessage::ValueChanged {
                widget_id,
                fragment_id,
                old_value,
                new_value,
            } => self.pending.push(Pending::Event(OutgoingEvent::change(
                widget_id,
                fragment_id,
                old_value,
                new_value,
            ))),
            WidgetMessage::CellEdited {
                key,
                widget_id,
                fragment_id,
                change,
            } => {
                let batch = self.pending.iter_mut().find_map(|pending| match pending {
                    Pending::Batch {
                        key: pending_key,
                        changes,
                        ..
                    } if *pending_key == key => Some(changes),
                    _ => None,
                });
                match batch {
                    Some(changes) => changes.push(change),
                    None => self.pending.push(Pending::Batch {
                        key,
                        widget_id,
                        fragment_id,
                        changes: vec![change],
                    }),
                }
            }
            WidgetMessage::DownloadRequested { widget_id, .. }
            | WidgetMessage::FilesSelected { widget_id, .. } => {
                tracing::warn!(%widget_id, "message carries no outgoing event; dropped");
            }
        }
    }

    /// Everything gathered since the previous flush, in the order it
    /// happened, followed by one event per changed group.
    pub fn flush(&mut self, group_changes: Vec<GroupChange>) -> Vec<OutgoingEvent> {
        let mut events: Vec<OutgoingEvent> = self
            .pending
            .drain(..)
            .map(|pending| match pending {
                Pending::Event(event) => event,
                Pending::Batch {
                    widget_id,
                    fragment_id,
                    changes,
                    ..
                } => OutgoingEvent::batched_change(widget_id, fragment_id, changes),
            })
            .collect();

        events.extend(group_changes.into_iter().map(|change| {
            OutgoingEvent::change(change.widget_id, change.fragment_id, None, change.value)
        }));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventKind;
    use crate::tree::Fragment;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn column(ty: ColumnType, required: bool) -> GridColumn {
        GridColumn {
            name: "c".to_string(),
            ty,
            required,
            editable: true,
        }
    }

    fn instance(node: Value) -> WidgetInstance {
        let parsed = Fragment::from_wire(&json!({"type": "container", "children": [node]}))
            .expect("parse root");
        let node = &parsed.fragment.root.children()[0];
        WidgetInstance::construct(node.identity().unwrap_or_default(), "f", node).expect("widget")
    }

    fn grid() -> WidgetInstance {
        instance(json!({
            "type": "dataframe", "id": "g",
            "initial_value": [{"qty": 1, "name": "a"}, {"qty": 2, "name": "b"}],
            "column_config": {
                "qty": {"type": "Number", "required": true, "editable": true},
                "name": {"type": "String", "editable": false}
            }
        }))
    }

    fn edit(row_index: u64, column: &str, value: Value) -> UserInput {
        UserInput::EditCell {
            row_index,
            column: column.to_string(),
            value,
        }
    }

    #[test]
    fn required_number_column() {
        let required = column(ColumnType::Number, true);
        assert_eq!(validate_cell(&required, &json!(1), &json!("abc")), CellVerdict::Revert);
        assert_eq!(validate_cell(&required, &json!(1), &json!("")), CellVerdict::Revert);
        assert_eq!(validate_cell(&required, &json!(1), &json!("42")), CellVerdict::Accept(json!(42)));
        assert_eq!(validate_cell(&required, &json!(1), &json!("2.5")), CellVerdict::Accept(json!(2.5)));
        assert_eq!(validate_cell(&required, &json!(1), &json!("1")), CellVerdict::Unchanged);
    }

    #[test]
    fn optional_number_column_clears_to_null() {
        let optional = column(ColumnType::Number, false);
        assert_eq!(validate_cell(&optional, &json!(1), &json!("")), CellVerdict::Accept(Value::Null));
        assert_eq!(validate_cell(&optional, &json!(1), &json!("abc")), CellVerdict::Accept(Value::Null));
    }

    #[test]
    fn string_columns_reject_null_only_when_required() {
        assert_eq!(
            validate_cell(&column(ColumnType::String, true), &json!("x"), &Value::Null),
            CellVerdict::Revert
        );
        assert_eq!(
            validate_cell(&column(ColumnType::String, false), &json!("x"), &Value::Null),
            CellVerdict::Accept(Value::Null)
        );
        assert_eq!(
            validate_cell(&column(ColumnType::String, true), &json!("x"), &json!("")),
            CellVerdict::Accept(json!(""))
        );
    }

    #[test]
    fn rejected_cell_keeps_previous_value() {
        let mut grid = grid();
        assert_eq!(interpret(&mut grid, edit(1, "qty", json!("abc"))), Ok(None));

        let WidgetState::DataGrid(state) = &grid.state else {
            panic!("expected grid");
        };
        assert_eq!(state.cell(1, "qty"), Some(&json!(1)));
    }

    #[test]
    fn accepted_cell_is_stored_as_number() {
        let mut grid = grid();
        let message = interpret(&mut grid, edit(2, "qty", json!("42"))).expect("edit");
        assert_eq!(
            message,
            Some(WidgetMessage::CellEdited {
                key: "g".to_string(),
                widget_id: "g".to_string(),
                fragment_id: "f".to_string(),
                change: GridChange {
                    row_index: 2,
                    column_name: "qty".to_string(),
                    new_value: json!(42),
                },
            })
        );
        let WidgetState::DataGrid(state) = &grid.state else {
            panic!("expected grid");
        };
        assert_eq!(state.cell(2, "qty"), Some(&json!(42)));
    }

    #[test]
    fn cell_edits_need_editable_column_and_existing_row() {
        let mut grid = grid();
        assert_eq!(
            interpret(&mut grid, edit(1, "name", json!("z"))),
            Err(InteractionError::NotEditable {
                widget_id: "g".to_string(),
                column: "name".to_string(),
            })
        );
        assert_eq!(
            interpret(&mut grid, edit(9, "qty", json!(3))),
            Err(InteractionError::UnknownRow {
                widget_id: "g".to_string(),
                row_index: 9,
            })
        );
    }

    #[test]
    fn grid_edits_in_one_frame_become_one_batch() {
        let mut builder = EventEnvelopeBuilder::new();
        for (column, value) in [("a", 5), ("b", 6)] {
            builder.ingest(WidgetMessage::CellEdited {
                key: "g".to_string(),
                widget_id: "g".to_string(),
                fragment_id: "f".to_string(),
                change: GridChange {
                    row_index: 1,
                    column_name: column.to_string(),
                    new_value: json!(value),
                },
            });
        }

        let events = builder.flush(Vec::new());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::BatchedChange);
        let changes = events[0].changes.as_ref().expect("changes");
        let columns: Vec<&str> = changes.iter().map(|c| c.column_name.as_str()).collect();
        assert_eq!(columns, vec!["a", "b"]);
        assert!(builder.is_empty());
    }

    #[test]
    fn flush_keeps_arrival_order_and_appends_groups() {
        let mut builder = EventEnvelopeBuilder::new();
        builder.ingest(WidgetMessage::Clicked {
            widget_id: "b1".to_string(),
            fragment_id: "f".to_string(),
        });
        builder.ingest(WidgetMessage::ValueChanged {
            widget_id: "t".to_string(),
            fragment_id: "f".to_string(),
            old_value: None,
            new_value: Value::Null,
        });

        let events = builder.flush(vec![GroupChange {
            key: "toppings".to_string(),
            widget_id: "toppings".to_string(),
            fragment_id: "f".to_string(),
            value: json!(["ham"]),
        }]);
        let ids: Vec<&str> = events.iter().map(|e| e.widget_id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "t", "toppings"]);
        assert_eq!(events[2].new_value, Some(json!(["ham"])));
    }

    #[test]
    fn empty_text_and_selection_are_sent_as_null() {
        let mut field = instance(json!({"type": "text_input", "id": "t", "value": "x"}));
        let Some(WidgetMessage::ValueChanged { new_value, .. }) =
            interpret(&mut field, UserInput::CommitText(String::new())).expect("commit")
        else {
            panic!("expected change");
        };
        assert_eq!(new_value, Value::Null);

        let mut select = instance(json!({"type": "selectbox", "id": "s", "options": ["a"], "value": "a"}));
        let Some(WidgetMessage::ValueChanged {
            old_value,
            new_value,
            ..
        }) = interpret(&mut select, UserInput::SelectValue(json!([]))).expect("select")
        else {
            panic!("expected change");
        };
        assert_eq!(old_value, Some(json!("a")));
        assert_eq!(new_value, Value::Null);
    }

    #[test]
    fn download_button_requests_download_instead_of_click() {
        let mut button = instance(json!({"type": "button", "id": "dl", "download_name": "report.csv"}));
        assert_eq!(
            interpret(&mut button, UserInput::Click),
            Ok(Some(WidgetMessage::DownloadRequested {
                widget_id: "dl".to_string(),
                fragment_id: "f".to_string(),
                file_name: "report.csv".to_string(),
            }))
        );
    }

    #[test]
    fn unnamed_widget_reports_no_position_key() {
        let mut button = instance(json!({"type": "button", "container_id": "c", "local_id": "1"}));
        assert_eq!(button.id(), "c/1");
        assert_eq!(
            interpret(&mut button, UserInput::Click),
            Ok(Some(WidgetMessage::Clicked {
                widget_id: String::new(),
                fragment_id: "f".to_string(),
            }))
        );
    }

    #[test]
    fn unnamed_grids_batch_apart() {
        let mut builder = EventEnvelopeBuilder::new();
        for key in ["c/1", "c/2"] {
            builder.ingest(WidgetMessage::CellEdited {
                key: key.to_string(),
                widget_id: String::new(),
                fragment_id: "f".to_string(),
                change: GridChange {
                    row_index: 1,
                    column_name: "a".to_string(),
                    new_value: json!(1),
                },
            });
        }
        assert_eq!(builder.flush(Vec::new()).len(), 2);
    }

    #[test]
    fn mismatched_input_is_unsupported() {
        let mut image = instance(json!({"type": "image", "id": "img", "src": "a.png"}));
        assert!(matches!(
            interpret(&mut image, UserInput::Click),
            Err(InteractionError::Unsupported { input: "click", .. })
        ));
        assert_eq!(interpret(&mut image, UserInput::Focus), Ok(None));
        assert!(image.local.focused);
    }
}

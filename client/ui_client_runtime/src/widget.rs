//! Live widget instances, the stateful counterpart of interactive tree nodes.
//!
//! An instance outlives the tree that created it: when a later tree carries a
//! node with the same identity, the instance is reconciled in place so that
//! transient local state (focus, caret, grid edits, uploads) survives.

use crate::tree::{GridColumn, NodeKind, NodePayload, UiNode};
use crate::upload::UploadedFile;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::rc::Rc;

pub type InstanceHandle = Rc<RefCell<WidgetInstance>>;

const DEFAULT_COLOR: &str = "#999999";

/// State that exists only on the client and is never sent by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalState {
    pub focused: bool,
    pub caret: Option<usize>,
    pub scroll_top: u32,
}

#[derive(Debug)]
pub struct WidgetInstance {
    /// Identity key in the instance map: the backend id, or the position
    /// fallback `container_id/local_id`.
    id: String,
    /// Backend-assigned id, the only one ever reported on the wire.
    widget_id: Option<String>,
    fragment_id: String,
    pub container_id: Option<String>,
    pub local_id: Option<String>,
    pub style: Map<String, Value>,
    pub local: LocalState,
    pub state: WidgetState,
    updates: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetState {
    Button(ButtonState),
    TextField(TextFieldState),
    Select(SelectState),
    ColorField(ColorFieldState),
    Image(ImageState),
    DataGrid(GridState),
    CodeEditor(CodeEditorState),
    FileUploader(UploaderState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonState {
    pub label: String,
    pub icon: Option<String>,
    pub style: Option<String>,
    pub download_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFieldState {
    pub value: String,
    pub placeholder: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectState {
    pub options: Vec<String>,
    pub value: Value,
    pub multiple: bool,
    pub placeholder: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorFieldState {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageState {
    pub src: String,
    pub width: Option<String>,
    pub height: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEditorState {
    pub text: String,
    pub show_line_numbers: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploaderState {
    pub multiple: bool,
    pub accept: Vec<String>,
    pub selection: Vec<UploadedFile>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    /// 1-based position of the row in the payload that created the grid.
    pub row_index: u64,
    pub cells: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridState {
    pub columns: Vec<GridColumn>,
    pub rows: Vec<GridRow>,
    pub height: Option<String>,
}

impl GridState {
    fn new(columns: &[GridColumn], rows: &[Map<String, Value>], height: &Option<String>) -> Self {
        let rows = rows
            .iter()
            .enumerate()
            .map(|(position, cells)| GridRow {
                row_index: position as u64 + 1,
                cells: cells.clone(),
            })
            .collect();

        Self {
            columns: columns.to_vec(),
            rows,
            height: height.clone(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&GridColumn> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn cell(&self, row_index: u64, column: &str) -> Option<&Value> {
        self.rows
            .iter()
            .find(|row| row.row_index == row_index)
            .and_then(|row| row.cells.get(column))
    }

    /// Writes a cell and returns its previous value, or `None` when the row
    /// does not exist.
    pub fn set_cell(&mut self, row_index: u64, column: &str, value: Value) -> Option<Value> {
        let row = self.rows.iter_mut().find(|row| row.row_index == row_index)?;
        let old = row.cells.insert(column.to_string(), value);
        Some(old.unwrap_or(Value::Null))
    }
}

impl WidgetState {
    /// Constructs the state for an interactive node. Markup, containers and
    /// group kinds have no instance and yield `None`.
    pub fn from_payload(payload: &NodePayload) -> Option<Self> {
        let state = match payload {
            NodePayload::Markup { .. }
            | NodePayload::Container { .. }
            | NodePayload::CheckboxGroup { .. }
            | NodePayload::RadioGroup { .. } => return None,
            NodePayload::Button {
                label,
                icon,
                style,
                download_name,
            } => Self::Button(ButtonState {
                label: label.clone(),
                icon: icon.clone(),
                style: style.clone(),
                download_name: download_name.clone(),
            }),
            NodePayload::TextField { value, placeholder } => Self::TextField(TextFieldState {
                value: value.clone().unwrap_or_default(),
                placeholder: placeholder.clone(),
            }),
            NodePayload::Select {
                options,
                value,
                multiple,
                placeholder,
            } => Self::Select(SelectState {
                options: options.clone(),
                value: value.clone(),
                multiple: *multiple,
                placeholder: placeholder.clone(),
            }),
            NodePayload::ColorField { value } => Self::ColorField(ColorFieldState {
                value: value.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            }),
            NodePayload::Image { src, width, height } => Self::Image(ImageState {
                src: src.clone(),
                width: width.clone(),
                height: height.clone(),
            }),
            NodePayload::DataGrid {
                columns,
                rows,
                height,
            } => Self::DataGrid(GridState::new(columns, rows, height)),
            NodePayload::CodeEditor {
                initial_value,
                show_line_numbers,
            } => Self::CodeEditor(CodeEditorState {
                text: initial_value.clone(),
                show_line_numbers: *show_line_numbers,
            }),
            NodePayload::FileUploader { multiple, types } => Self::FileUploader(UploaderState {
                multiple: *multiple,
                accept: types.clone(),
                selection: Vec::new(),
                summary: None,
            }),
        };

        Some(state)
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Button(_) => NodeKind::Button,
            Self::TextField(_) => NodeKind::TextField,
            Self::Select(_) => NodeKind::Select,
            Self::ColorField(_) => NodeKind::ColorField,
            Self::Image(_) => NodeKind::Image,
            Self::DataGrid(_) => NodeKind::DataGrid,
            Self::CodeEditor(_) => NodeKind::CodeEditor,
            Self::FileUploader(_) => NodeKind::FileUploader,
        }
    }
}

impl WidgetInstance {
    pub fn construct(id: String, fragment_id: &str, node: &UiNode) -> Option<Self> {
        let state = WidgetState::from_payload(&node.payload)?;

        Some(Self {
            id,
            widget_id: node.id.clone(),
            fragment_id: fragment_id.to_string(),
            container_id: node.container_id.clone(),
            local_id: node.local_id.clone(),
            style: node.style.clone(),
            local: LocalState::default(),
            state,
            updates: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Backend id, empty while the backend has not assigned one.
    pub fn widget_id(&self) -> &str {
        self.widget_id.as_deref().unwrap_or_default()
    }

    pub fn fragment_id(&self) -> &str {
        &self.fragment_id
    }

    pub fn kind(&self) -> NodeKind {
        self.state.kind()
    }

    /// Number of in-place reconciliations since construction.
    pub fn update_count(&self) -> u32 {
        self.updates
    }

    /// Reconciles the instance with a newer node of the same identity.
    /// Returns `false` without touching anything when the node is of another
    /// kind; the caller then replaces the instance.
    pub fn update(&mut self, node: &UiNode, fragment_id: &str) -> bool {
        if node.kind() != self.kind() {
            return false;
        }

        match (&mut self.state, &node.payload) {
            (
                WidgetState::Button(state),
                NodePayload::Button {
                    label,
                    icon,
                    style,
                    download_name,
                },
            ) => {
                state.label.clone_from(label);
                state.icon.clone_from(icon);
                state.style.clone_from(style);
                state.download_name.clone_from(download_name);
            }
            (WidgetState::TextField(state), NodePayload::TextField { value, placeholder }) => {
                let server_value = value.as_deref().unwrap_or_default();
                if state.value != server_value {
                    state.value = server_value.to_string();
                    let len = state.value.chars().count();
                    self.local.caret = self.local.caret.map(|caret| caret.min(len));
                }
                state.placeholder.clone_from(placeholder);
            }
            (
                WidgetState::Select(state),
                NodePayload::Select {
                    options,
                    value,
                    multiple,
                    placeholder,
                },
            ) => {
                state.options.clone_from(options);
                state.value.clone_from(value);
                state.multiple = *multiple;
                state.placeholder.clone_from(placeholder);
            }
            (WidgetState::ColorField(state), NodePayload::ColorField { value }) => {
                state.value = value.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string());
            }
            (WidgetState::Image(state), NodePayload::Image { src, width, height }) => {
                state.src.clone_from(src);
                state.width.clone_from(width);
                state.height.clone_from(height);
            }
            // The embedded grid owns its rows after construction; only the
            // presentation follows the server.
            (WidgetState::DataGrid(state), NodePayload::DataGrid { height, .. }) => {
                state.height.clone_from(height);
            }
            // Same for the editor buffer.
            (
                WidgetState::CodeEditor(state),
                NodePayload::CodeEditor {
                    show_line_numbers, ..
                },
            ) => {
                state.show_line_numbers = *show_line_numbers;
            }
            (WidgetState::FileUploader(state), NodePayload::FileUploader { multiple, types }) => {
                state.multiple = *multiple;
                state.accept.clone_from(types);
            }
            _ => return false,
        }

        self.fragment_id = fragment_id.to_string();
        self.widget_id.clone_from(&node.id);
        self.container_id.clone_from(&node.container_id);
        self.local_id.clone_from(&node.local_id);
        self.style.clone_from(&node.style);
        self.updates += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Fragment;
    use serde_json::json;

    fn node(value: Value) -> UiNode {
        let parsed = Fragment::from_wire(&json!({"type": "container", "children": [value]}))
            .expect("parse root");
        parsed.fragment.root.children()[0].clone()
    }

    #[test]
    fn text_field_update_keeps_local_state() {
        let first = node(json!({"type": "text_input", "id": "name", "value": "ab"}));
        let mut instance =
            WidgetInstance::construct("name".to_string(), "f", &first).expect("construct");
        instance.local.focused = true;
        instance.local.caret = Some(2);

        let second = node(json!({"type": "text_input", "id": "name", "value": "abcd"}));
        assert!(instance.update(&second, "f"));
        assert!(instance.local.focused);
        assert_eq!(instance.local.caret, Some(2));
        assert_eq!(instance.update_count(), 1);

        let cleared = node(json!({"type": "text_input", "id": "name"}));
        assert!(instance.update(&cleared, "f"));
        let WidgetState::TextField(state) = &instance.state else {
            panic!("expected text field");
        };
        assert_eq!(state.value, "");
        assert_eq!(instance.local.caret, Some(0));
    }

    #[test]
    fn grid_rows_survive_update() {
        let first = node(json!({
            "type": "dataframe", "id": "g",
            "initial_value": [{"a": 1}, {"a": 2}],
            "column_config": {"a": {"type": "Number", "editable": true}}
        }));
        let mut instance = WidgetInstance::construct("g".to_string(), "f", &first).expect("grid");
        let WidgetState::DataGrid(grid) = &mut instance.state else {
            panic!("expected grid");
        };
        assert_eq!(grid.set_cell(2, "a", json!(20)), Some(json!(2)));
        assert_eq!(grid.set_cell(3, "a", json!(30)), None);

        let second = node(json!({
            "type": "dataframe", "id": "g", "height": "300px",
            "initial_value": [{"a": 1}, {"a": 2}]
        }));
        assert!(instance.update(&second, "f"));

        let WidgetState::DataGrid(grid) = &instance.state else {
            panic!("expected grid");
        };
        assert_eq!(grid.cell(2, "a"), Some(&json!(20)));
        assert_eq!(grid.height.as_deref(), Some("300px"));
        assert!(grid.column("a").is_some_and(|column| column.editable));
    }

    #[test]
    fn update_rejects_other_kind() {
        let button = node(json!({"type": "button", "id": "w", "label": "Go"}));
        let mut instance = WidgetInstance::construct("w".to_string(), "f", &button).expect("button");

        let field = node(json!({"type": "text_input", "id": "w"}));
        assert!(!instance.update(&field, "f"));
        assert_eq!(instance.kind(), NodeKind::Button);
        assert_eq!(instance.update_count(), 0);
    }

    #[test]
    fn groups_and_markup_have_no_instance() {
        let group = node(json!({"type": "radio", "id": "r", "options": ["a"]}));
        assert!(WidgetInstance::construct("r".to_string(), "f", &group).is_none());

        let text = node(json!({"type": "text", "text": "hi"}));
        assert!(WidgetInstance::construct(String::new(), "f", &text).is_none());
    }

    #[test]
    fn color_field_defaults_when_server_sends_nothing() {
        let color = node(json!({"type": "color_picker", "id": "c"}));
        let instance = WidgetInstance::construct("c".to_string(), "f", &color).expect("color");
        assert_eq!(
            instance.state,
            WidgetState::ColorField(ColorFieldState {
                value: DEFAULT_COLOR.to_string()
            })
        );
    }
}

//! Typed form of the UI trees the backend sends.
//!
//! Payload nodes are shaped through a table keyed by the wire `type` string.
//! A node whose kind is unknown, or whose fields do not have the expected
//! shape, is dropped from the tree and reported as a [`Diagnostic`]; the rest
//! of the tree is kept.

use crate::error::{Diagnostic, TreeError};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Markup,
    Container,
    Button,
    TextField,
    Select,
    ColorField,
    CheckboxGroup,
    RadioGroup,
    Image,
    DataGrid,
    CodeEditor,
    FileUploader,
}

impl NodeKind {
    pub fn from_wire(name: &str) -> Option<Self> {
        KIND_TABLE
            .iter()
            .find(|entry| entry.wire == name)
            .map(|entry| entry.kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UiNode {
    pub id: Option<String>,
    pub container_id: Option<String>,
    pub local_id: Option<String>,
    pub style: Map<String, Value>,
    pub attributes: Map<String, Value>,
    pub payload: NodePayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkupContent {
    Html(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodePayload {
    Markup {
        tag: String,
        content: MarkupContent,
    },
    Container {
        fragment_id: Option<String>,
        children: Vec<UiNode>,
    },
    Button {
        label: String,
        icon: Option<String>,
        style: Option<String>,
        download_name: Option<String>,
    },
    TextField {
        value: Option<String>,
        placeholder: String,
    },
    Select {
        options: Vec<String>,
        value: Value,
        multiple: bool,
        placeholder: String,
    },
    ColorField {
        value: Option<String>,
    },
    CheckboxGroup {
        options: Vec<String>,
        value: Value,
        multiple: bool,
    },
    RadioGroup {
        options: Vec<String>,
        value: Option<String>,
    },
    Image {
        src: String,
        width: Option<String>,
        height: Option<String>,
    },
    DataGrid {
        columns: Vec<GridColumn>,
        rows: Vec<Map<String, Value>>,
        height: Option<String>,
    },
    CodeEditor {
        initial_value: String,
        show_line_numbers: bool,
    },
    FileUploader {
        multiple: bool,
        types: Vec<String>,
    },
}

impl UiNode {
    pub fn kind(&self) -> NodeKind {
        match &self.payload {
            NodePayload::Markup { .. } => NodeKind::Markup,
            NodePayload::Container { .. } => NodeKind::Container,
            NodePayload::Button { .. } => NodeKind::Button,
            NodePayload::TextField { .. } => NodeKind::TextField,
            NodePayload::Select { .. } => NodeKind::Select,
            NodePayload::ColorField { .. } => NodeKind::ColorField,
            NodePayload::CheckboxGroup { .. } => NodeKind::CheckboxGroup,
            NodePayload::RadioGroup { .. } => NodeKind::RadioGroup,
            NodePayload::Image { .. } => NodeKind::Image,
            NodePayload::DataGrid { .. } => NodeKind::DataGrid,
            NodePayload::CodeEditor { .. } => NodeKind::CodeEditor,
            NodePayload::FileUploader { .. } => NodeKind::FileUploader,
        }
    }

    /// Stable identity of the node: the backend id when there is one,
    /// otherwise the position-scoped `container_id/local_id` pair.
    pub fn identity(&self) -> Option<String> {
        if let Some(id) = &self.id {
            return Some(id.clone());
        }

        match (&self.container_id, &self.local_id) {
            (Some(container), Some(local)) => Some(format!("{container}/{local}")),
            _ => None,
        }
    }

    pub fn children(&self) -> &[UiNode] {
        match &self.payload {
            NodePayload::Container { children, .. } => children,
            _ => &[],
        }
    }
}

/// An independently swappable region and its root container.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub fragment_id: String,
    pub root: UiNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFragment {
    pub fragment: Fragment,
    pub diagnostics: Vec<Diagnostic>,
}

impl Fragment {
    /// Shapes a wire `root` payload. Only a root that is not a usable container
    /// is an error; malformed descendants are skipped and reported.
    pub fn from_wire(root: &Value) -> Result<ParsedFragment, TreeError> {
        let kind = root
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("<missing>");
        if NodeKind::from_wire(kind) != Some(NodeKind::Container) {
            return Err(TreeError::RootNotContainer(kind.to_string()));
        }

        let mut ctx = ParseContext::default();
        let Some(node) = parse_node(root, "root", &mut ctx) else {
            let reason = ctx
                .diagnostics
                .first()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unreadable root".to_string());
            return Err(TreeError::MalformedRoot(reason));
        };

        let fragment_id = match &node.payload {
            NodePayload::Container { fragment_id, .. } => fragment_id.clone().unwrap_or_default(),
            _ => String::new(),
        };

        Ok(ParsedFragment {
            fragment: Fragment {
                fragment_id,
                root: node,
            },
            diagnostics: ctx.diagnostics,
        })
    }

    pub fn image_sources(&self) -> Vec<String> {
        collect_by_kind(&self.root, NodeKind::Image)
            .into_iter()
            .filter_map(|node| match &node.payload {
                NodePayload::Image { src, .. } => Some(src.clone()),
                _ => None,
            })
            .collect()
    }
}

/// All nodes of `kind` under `tree`, in document order.
pub fn collect_by_kind(tree: &UiNode, kind: NodeKind) -> Vec<&UiNode> {
    let mut out = Vec::new();
    collect_into(tree, kind, &mut out);
    out
}

fn collect_into<'a>(node: &'a UiNode, kind: NodeKind, out: &mut Vec<&'a UiNode>) {
    if node.kind() == kind {
        out.push(node);
    }

    for child in node.children() {
        collect_into(child, kind, out);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ColumnType {
    Number,
    String,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridColumn {
    pub name: String,
    pub ty: ColumnType,
    pub required: bool,
    pub editable: bool,
}

#[derive(Default)]
struct ParseContext {
    diagnostics: Vec<Diagnostic>,
}

impl ParseContext {
    fn report(&mut self, diagnostic: Diagnostic) {
        tracing::error!(%diagnostic, "skipping tree node");
        self.diagnostics.push(diagnostic);
    }
}

type PayloadParser = fn(&Value, &str, &mut ParseContext) -> Result<NodePayload, serde_json::Error>;

struct KindEntry {
    wire: &'static str,
    kind: NodeKind,
    parse: PayloadParser,
}

static KIND_TABLE: &[KindEntry] = &[
    KindEntry { wire: "html", kind: NodeKind::Markup, parse: parse_html },
    KindEntry { wire: "text", kind: NodeKind::Markup, parse: parse_text },
    KindEntry { wire: "container", kind: NodeKind::Container, parse: parse_container },
    KindEntry { wire: "button", kind: NodeKind::Button, parse: parse_button },
    KindEntry { wire: "text_input", kind: NodeKind::TextField, parse: parse_text_input },
    KindEntry { wire: "selectbox", kind: NodeKind::Select, parse: parse_select },
    KindEntry { wire: "color_picker", kind: NodeKind::ColorField, parse: parse_color },
    KindEntry { wire: "checkboxes", kind: NodeKind::CheckboxGroup, parse: parse_checkboxes },
    KindEntry { wire: "radio", kind: NodeKind::RadioGroup, parse: parse_radio },
    KindEntry { wire: "image", kind: NodeKind::Image, parse: parse_image },
    KindEntry { wire: "dataframe", kind: NodeKind::DataGrid, parse: parse_data_grid },
    KindEntry { wire: "code", kind: NodeKind::CodeEditor, parse: parse_code },
    KindEntry { wire: "file_uploader", kind: NodeKind::FileUploader, parse: parse_file_uploader },
];

#[derive(Deserialize)]
struct NodeHeader {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    container_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    local_id: Option<String>,
    #[serde(default, deserialize_with = "object_or_empty")]
    css: Map<String, Value>,
    #[serde(default, deserialize_with = "object_or_empty")]
    attributes: Map<String, Value>,
}

fn parse_node(value: &Value, path: &str, ctx: &mut ParseContext) -> Option<UiNode> {
    let header = match NodeHeader::deserialize(value) {
        Ok(header) => header,
        Err(err) => {
            ctx.report(Diagnostic::MalformedNode {
                kind: "<unknown>".to_string(),
                path: path.to_string(),
                reason: err.to_string(),
            });
            return None;
        }
    };

    let Some(entry) = KIND_TABLE.iter().find(|entry| entry.wire == header.kind) else {
        ctx.report(Diagnostic::UnknownKind {
            kind: header.kind,
            path: path.to_string(),
        });
        return None;
    };

    match (entry.parse)(value, path, ctx) {
        Ok(payload) => Some(UiNode {
            id: header.id,
            container_id: header.container_id,
            local_id: header.local_id,
            style: header.css,
            attributes: header.attributes,
            payload,
        }),
        Err(err) => {
            ctx.report(Diagnostic::MalformedNode {
                kind: header.kind,
                path: path.to_string(),
                reason: err.to_string(),
            });
            None
        }
    }
}

#[derive(Deserialize)]
struct HtmlProps {
    #[serde(default = "default_tag")]
    tag: String,
    #[serde(default)]
    inner_html: String,
}

fn default_tag() -> String {
    "div".to_string()
}

fn parse_html(value: &Value, _: &str, _: &mut ParseContext) -> Result<NodePayload, serde_json::Error> {
    let props = HtmlProps::deserialize(value)?;
    Ok(NodePayload::Markup {
        tag: props.tag,
        content: MarkupContent::Html(props.inner_html),
    })
}

#[derive(Deserialize)]
struct TextProps {
    #[serde(default)]
    text: String,
}

fn parse_text(value: &Value, _: &str, _: &mut ParseContext) -> Result<NodePayload, serde_json::Error> {
    let props = TextProps::deserialize(value)?;
    Ok(NodePayload::Markup {
        tag: "p".to_string(),
        content: MarkupContent::Text(props.text),
    })
}

#[derive(Deserialize)]
struct ContainerProps {
    #[serde(default)]
    is_fragment_container: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    fragment_id: Option<String>,
    #[serde(default)]
    children: Vec<Value>,
}

fn parse_container(
    value: &Value,
    path: &str,
    ctx: &mut ParseContext,
) -> Result<NodePayload, serde_json::Error> {
    let props = ContainerProps::deserialize(value)?;
    let children = props
        .children
        .iter()
        .enumerate()
        .filter_map(|(index, child)| parse_node(child, &format!("{path}/{index}"), ctx))
        .collect();

    // A fragment container with an empty id inherits its parent's fragment.
    let fragment_id = if props.is_fragment_container {
        props.fragment_id.or_else(|| Some(String::new()))
    } else {
        None
    };

    Ok(NodePayload::Container {
        fragment_id,
        children,
    })
}

#[derive(Deserialize)]
struct ButtonProps {
    #[serde(default)]
    label: String,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    download_name: Option<String>,
}

fn parse_button(value: &Value, _: &str, _: &mut ParseContext) -> Result<NodePayload, serde_json::Error> {
    let props = ButtonProps::deserialize(value)?;
    Ok(NodePayload::Button {
        label: props.label,
        icon: props.icon.filter(|icon| !icon.is_empty()),
        style: props.style.filter(|style| !style.is_empty()),
        download_name: props.download_name.filter(|name| !name.is_empty()),
    })
}

#[derive(Deserialize)]
struct TextInputProps {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    placeholder: Option<String>,
}

fn parse_text_input(
    value: &Value,
    _: &str,
    _: &mut ParseContext,
) -> Result<NodePayload, serde_json::Error> {
    let props = TextInputProps::deserialize(value)?;
    Ok(NodePayload::TextField {
        value: props.value,
        placeholder: props.placeholder.unwrap_or_default(),
    })
}

#[derive(Deserialize)]
struct SelectProps {
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    multiple: bool,
    #[serde(default)]
    placeholder: Option<String>,
}

fn parse_select(value: &Value, _: &str, _: &mut ParseContext) -> Result<NodePayload, serde_json::Error> {
    let props = SelectProps::deserialize(value)?;
    Ok(NodePayload::Select {
        options: props.options,
        value: props.value,
        multiple: props.multiple,
        placeholder: props.placeholder.unwrap_or_default(),
    })
}

#[derive(Deserialize)]
struct ColorProps {
    #[serde(default)]
    value: Option<String>,
}

fn parse_color(value: &Value, _: &str, _: &mut ParseContext) -> Result<NodePayload, serde_json::Error> {
    let props = ColorProps::deserialize(value)?;
    Ok(NodePayload::ColorField { value: props.value })
}

#[derive(Deserialize)]
struct CheckboxesProps {
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    multiple: bool,
}

fn parse_checkboxes(
    value: &Value,
    _: &str,
    _: &mut ParseContext,
) -> Result<NodePayload, serde_json::Error> {
    let props = CheckboxesProps::deserialize(value)?;
    Ok(NodePayload::CheckboxGroup {
        options: props.options,
        value: props.value,
        multiple: props.multiple,
    })
}

#[derive(Deserialize)]
struct RadioProps {
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    value: Option<String>,
}

fn parse_radio(value: &Value, _: &str, _: &mut ParseContext) -> Result<NodePayload, serde_json::Error> {
    let props = RadioProps::deserialize(value)?;
    Ok(NodePayload::RadioGroup {
        options: props.options,
        value: props.value,
    })
}

#[derive(Deserialize)]
struct ImageProps {
    src: String,
    #[serde(default, deserialize_with = "lenient_string")]
    width: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    height: Option<String>,
}

fn parse_image(value: &Value, _: &str, _: &mut ParseContext) -> Result<NodePayload, serde_json::Error> {
    let props = ImageProps::deserialize(value)?;
    Ok(NodePayload::Image {
        src: props.src,
        width: props.width,
        height: props.height,
    })
}

#[derive(Deserialize)]
struct ColumnConfig {
    #[serde(rename = "type", default)]
    ty: ColumnType,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    editable: bool,
}

#[derive(Deserialize)]
struct DataGridProps {
    #[serde(default)]
    initial_value: Vec<Map<String, Value>>,
    #[serde(default)]
    column_config: BTreeMap<String, ColumnConfig>,
    #[serde(default, deserialize_with = "lenient_string")]
    height: Option<String>,
}

fn parse_data_grid(
    value: &Value,
    _: &str,
    _: &mut ParseContext,
) -> Result<NodePayload, serde_json::Error> {
    let props = DataGridProps::deserialize(value)?;

    // Columns follow the key order of the first row.
    let columns = props
        .initial_value
        .first()
        .map(|row| {
            row.keys()
                .map(|name| match props.column_config.get(name) {
                    Some(config) => GridColumn {
                        name: name.clone(),
                        ty: config.ty,
                        required: config.required,
                        editable: config.editable,
                    },
                    None => GridColumn {
                        name: name.clone(),
                        ty: ColumnType::Other,
                        required: false,
                        editable: false,
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(NodePayload::DataGrid {
        columns,
        rows: props.initial_value,
        height: props.height,
    })
}

#[derive(Deserialize)]
struct CodeProps {
    #[serde(default)]
    initial_value: String,
    #[serde(default)]
    show_line_numbers: bool,
}

fn parse_code(value: &Value, _: &str, _: &mut ParseContext) -> Result<NodePayload, serde_json::Error> {
    let props = CodeProps::deserialize(value)?;
    Ok(NodePayload::CodeEditor {
        initial_value: props.initial_value,
        show_line_numbers: props.show_line_numbers,
    })
}

#[derive(Deserialize)]
struct FileUploaderProps {
    #[serde(default)]
    multiple: bool,
    #[serde(default)]
    types: Vec<String>,
}

fn parse_file_uploader(
    value: &Value,
    _: &str,
    _: &mut ParseContext,
) -> Result<NodePayload, serde_json::Error> {
    let props = FileUploaderProps::deserialize(value)?;
    Ok(NodePayload::FileUploader {
        multiple: props.multiple,
        types: props.types,
    })
}

/// Accepts strings and numbers; empty strings and anything else read as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn object_or_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_root() -> Value {
        json!({
            "type": "container",
            "is_fragment_container": true,
            "fragment_id": "main",
            "css": {"gap": "4px"},
            "children": [
                {"type": "text", "text": "Hello"},
                {"type": "button", "id": 7, "container_id": "c", "local_id": "1", "label": "Go"},
                {"type": "sparkline", "id": "x"},
                {"type": "image", "id": "logo", "src": "/logo.png", "width": 120},
                {
                    "type": "container",
                    "children": [
                        {"type": "image", "id": "banner", "src": "/banner.png"},
                        {"type": "image", "id": "broken"}
                    ]
                }
            ]
        })
    }

    #[test]
    fn unknown_and_malformed_nodes_are_skipped() {
        let parsed = Fragment::from_wire(&sample_root()).expect("parse root");
        let root = &parsed.fragment.root;

        assert_eq!(parsed.fragment.fragment_id, "main");
        assert_eq!(root.children().len(), 4);
        assert_eq!(root.children()[3].children().len(), 1);
        assert_eq!(parsed.diagnostics.len(), 2);
        assert!(matches!(
            &parsed.diagnostics[0],
            Diagnostic::UnknownKind { kind, path } if kind == "sparkline" && path == "root/2"
        ));
        assert!(matches!(
            &parsed.diagnostics[1],
            Diagnostic::MalformedNode { kind, path, .. } if kind == "image" && path == "root/4/1"
        ));
    }

    #[test]
    fn numeric_ids_are_read_as_strings() {
        let parsed = Fragment::from_wire(&sample_root()).expect("parse root");
        let button = &parsed.fragment.root.children()[1];

        assert_eq!(button.kind(), NodeKind::Button);
        assert_eq!(button.id.as_deref(), Some("7"));
        assert_eq!(button.identity().as_deref(), Some("7"));
    }

    #[test]
    fn identity_falls_back_to_local_position() {
        let parsed = Fragment::from_wire(&json!({
            "type": "container",
            "children": [{"type": "text_input", "container_id": "form", "local_id": "3"}]
        }))
        .expect("parse root");

        let field = &parsed.fragment.root.children()[0];
        assert_eq!(field.id, None);
        assert_eq!(field.identity().as_deref(), Some("form/3"));
        assert_eq!(parsed.fragment.fragment_id, "");
    }

    #[test]
    fn collects_images_in_document_order() {
        let parsed = Fragment::from_wire(&sample_root()).expect("parse root");
        let images = collect_by_kind(&parsed.fragment.root, NodeKind::Image);

        assert_eq!(images.len(), 2);
        assert_eq!(images[0].id.as_deref(), Some("logo"));
        assert_eq!(
            parsed.fragment.image_sources(),
            vec!["/logo.png".to_string(), "/banner.png".to_string()]
        );
    }

    #[test]
    fn grid_columns_follow_first_row_order() {
        let parsed = Fragment::from_wire(&json!({
            "type": "container",
            "children": [{
                "type": "dataframe",
                "id": "grid",
                "initial_value": [{"zeta": 1, "alpha": "a", "mid": null}],
                "column_config": {
                    "zeta": {"type": "Number", "required": true, "editable": true},
                    "alpha": {"type": "String", "editable": true},
                    "mid": {"type": "Date"}
                }
            }]
        }))
        .expect("parse root");

        let NodePayload::DataGrid { columns, rows, .. } = &parsed.fragment.root.children()[0].payload
        else {
            panic!("expected data grid");
        };

        assert_eq!(rows.len(), 1);
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(columns[0].ty, ColumnType::Number);
        assert!(columns[0].required);
        assert_eq!(columns[1].ty, ColumnType::String);
        assert!(!columns[1].required);
        assert_eq!(columns[2].ty, ColumnType::Other);
        assert!(!columns[2].editable);
    }

    #[test]
    fn root_must_be_a_container() {
        let err = Fragment::from_wire(&json!({"type": "button"})).expect_err("not a container");
        assert_eq!(err, TreeError::RootNotContainer("button".to_string()));

        let err = Fragment::from_wire(&json!({"children": []})).expect_err("missing type");
        assert_eq!(err, TreeError::RootNotContainer("<missing>".to_string()));
    }

    #[test]
    fn kind_table_covers_wire_names() {
        assert_eq!(NodeKind::from_wire("selectbox"), Some(NodeKind::Select));
        assert_eq!(NodeKind::from_wire("checkboxes"), Some(NodeKind::CheckboxGroup));
        assert_eq!(NodeKind::from_wire("code"), Some(NodeKind::CodeEditor));
        assert_eq!(NodeKind::from_wire("slider"), None);
    }
}

//! Turns tree nodes into rendered nodes, reusing live widget instances.
//!
//! The materializer owns the mapping from stable widget identity to live
//! instance. A node whose identity maps to an instance of the same kind gets
//! that instance back, updated in place; anything else is constructed fresh.

use crate::error::Diagnostic;
use crate::groups::{GroupKind, GroupRegistry};
use crate::surface::{RenderedContainer, RenderedNode};
use crate::tree::{Fragment, NodePayload, UiNode};
use crate::widget::{InstanceHandle, WidgetInstance};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

#[derive(Debug, Default)]
pub struct Materializer {
    instances: HashMap<String, InstanceHandle>,
}

/// A fragment built off-surface, ready to be inserted.
#[derive(Debug)]
pub struct BuiltFragment {
    pub fragment_id: String,
    pub root: RenderedContainer,
    pub widget_ids: HashSet<String>,
    pub group_keys: HashSet<String>,
    pub reused: usize,
    pub constructed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Default)]
struct Build {
    widget_ids: HashSet<String>,
    group_keys: HashSet<String>,
    reused: usize,
    constructed: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Materializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: &str) -> Option<InstanceHandle> {
        self.instances.get(id).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.instances.len()
    }

    pub fn materialize_fragment(
        &mut self,
        fragment: &Fragment,
        groups: &mut GroupRegistry,
    ) -> BuiltFragment {
        let mut build = Build::default();
        let root = match self.materialize(&fragment.root, &fragment.fragment_id, &mut build, groups) {
            Some(RenderedNode::Container(mut container)) => {
                container.fragment_id = Some(fragment.fragment_id.clone());
                container
            }
            // Fragment roots are parsed as containers; anything else renders empty.
            _ => RenderedContainer {
                id: fragment.root.id.clone(),
                fragment_id: Some(fragment.fragment_id.clone()),
                style: fragment.root.style.clone(),
                attributes: fragment.root.attributes.clone(),
                opacity: 1.0,
                visible: true,
                scroll_top: 0,
                children: Vec::new(),
            },
        };

        BuiltFragment {
            fragment_id: fragment.fragment_id.clone(),
            root,
            widget_ids: build.widget_ids,
            group_keys: build.group_keys,
            reused: build.reused,
            constructed: build.constructed,
            diagnostics: build.diagnostics,
        }
    }

    fn materialize(
        &mut self,
        node: &UiNode,
        fragment_id: &str,
        build: &mut Build,
        groups: &mut GroupRegistry,
    ) -> Option<RenderedNode> {
        match &node.payload {
            NodePayload::Markup { tag, content } => Some(RenderedNode::Markup {
                tag: tag.clone(),
                content: content.clone(),
                style: node.style.clone(),
            }),
            NodePayload::Container {
                fragment_id: own_fragment,
                children,
            } => {
                let effective = match own_fragment {
                    Some(id) if !id.is_empty() => id.as_str(),
                    _ => fragment_id,
                };
                let children = children
                    .iter()
                    .filter_map(|child| self.materialize(child, effective, build, groups))
                    .collect();

                Some(RenderedNode::Container(RenderedContainer {
                    id: node.id.clone(),
                    fragment_id: own_fragment.as_ref().map(|_| effective.to_string()),
                    style: node.style.clone(),
                    attributes: node.attributes.clone(),
                    opacity: 1.0,
                    visible: true,
                    scroll_top: 0,
                    children,
                }))
            }
            NodePayload::CheckboxGroup {
                options,
                value,
                multiple,
            } => self.materialize_group(
                node,
                GroupKind::Checkbox,
                fragment_id,
                options,
                value,
                *multiple,
                build,
                groups,
            ),
            NodePayload::RadioGroup { options, value } => {
                let value = value.clone().map(Value::String).unwrap_or(Value::Null);
                self.materialize_group(
                    node,
                    GroupKind::Radio,
                    fragment_id,
                    options,
                    &value,
                    false,
                    build,
                    groups,
                )
            }
            _ => self.materialize_widget(node, fragment_id, build),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn materialize_group(
        &mut self,
        node: &UiNode,
        kind: GroupKind,
        fragment_id: &str,
        options: &[String],
        value: &Value,
        multiple: bool,
        build: &mut Build,
        groups: &mut GroupRegistry,
    ) -> Option<RenderedNode> {
        let Some(key) = node.identity() else {
            build.diagnostics.push(Diagnostic::MalformedNode {
                kind: format!("{kind:?} group"),
                path: format!("fragment '{fragment_id}'"),
                reason: "group node without id".to_string(),
            });
            return None;
        };

        if !build.group_keys.insert(key.clone()) {
            build.diagnostics.push(Diagnostic::DuplicateId {
                id: key,
                fragment_id: fragment_id.to_string(),
            });
            return None;
        }

        if groups.attach(&key, node.id.as_deref(), kind, fragment_id, options, value, multiple) {
            build.reused += 1;
        } else {
            build.constructed += 1;
        }

        Some(RenderedNode::Group { key, kind })
    }

    fn materialize_widget(
        &mut self,
        node: &UiNode,
        fragment_id: &str,
        build: &mut Build,
    ) -> Option<RenderedNode> {
        let Some(key) = node.identity() else {
            // Without identity the instance cannot be found again; it lives
            // only as long as this render.
            let instance = WidgetInstance::construct(String::new(), fragment_id, node)?;
            build.constructed += 1;
            return Some(RenderedNode::Widget(Rc::new(RefCell::new(instance))));
        };

        if !build.widget_ids.insert(key.clone()) {
            tracing::warn!(id = %key, fragment_id, "duplicate widget id in one fragment");
            build.diagnostics.push(Diagnostic::DuplicateId {
                id: key.clone(),
                fragment_id: fragment_id.to_string(),
            });
            let instance = WidgetInstance::construct(key, fragment_id, node)?;
            build.constructed += 1;
            return Some(RenderedNode::Widget(Rc::new(RefCell::new(instance))));
        }

        if let Some(existing) = self.instances.get(&key) {
            if existing.borrow_mut().update(node, fragment_id) {
                build.reused += 1;
                return Some(RenderedNode::Widget(Rc::clone(existing)));
            }
        }

        let instance = WidgetInstance::construct(key.clone(), fragment_id, node)?;
        let handle = Rc::new(RefCell::new(instance));
        self.instances.insert(key, Rc::clone(&handle));
        build.constructed += 1;
        Some(RenderedNode::Widget(handle))
    }

    /// Forgets instances that left the surface.
    pub fn retire<'a>(&mut self, ids: impl IntoIterator<Item = &'a String>) -> usize {
        ids.into_iter()
            .filter(|id| self.instances.remove(*id).is_some())
            .count()
    }
}

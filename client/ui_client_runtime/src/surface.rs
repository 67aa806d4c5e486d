//! The rendered surface: what the user currently sees.

use crate::error::SwapError;
use crate::groups::GroupKind;
use crate::tree::MarkupContent;
use crate::widget::InstanceHandle;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// Opacity a fragment is dimmed to while a request touching it is in flight.
pub const PENDING_OPACITY: f32 = 0.5;

#[derive(Debug, Clone)]
pub enum RenderedNode {
    Markup {
        tag: String,
        content: MarkupContent,
        style: Map<String, Value>,
    },
    Container(RenderedContainer),
    Widget(InstanceHandle),
    Group {
        key: String,
        kind: GroupKind,
    },
}

#[derive(Debug, Clone)]
pub struct RenderedContainer {
    pub id: Option<String>,
    /// Set on fragment roots only.
    pub fragment_id: Option<String>,
    pub style: Map<String, Value>,
    pub attributes: Map<String, Value>,
    pub opacity: f32,
    pub visible: bool,
    pub scroll_top: u32,
    pub children: Vec<RenderedNode>,
}

impl RenderedContainer {
    pub fn find_fragment(&self, fragment_id: &str) -> Option<&RenderedContainer> {
        if self.fragment_id.as_deref() == Some(fragment_id) {
            return Some(self);
        }

        self.children.iter().find_map(|child| match child {
            RenderedNode::Container(container) => container.find_fragment(fragment_id),
            _ => None,
        })
    }

    pub fn find_fragment_mut(&mut self, fragment_id: &str) -> Option<&mut RenderedContainer> {
        if self.fragment_id.as_deref() == Some(fragment_id) {
            return Some(self);
        }

        self.children.iter_mut().find_map(|child| match child {
            RenderedNode::Container(container) => container.find_fragment_mut(fragment_id),
            _ => None,
        })
    }

    fn find_container_mut(&mut self, id: &str) -> Option<&mut RenderedContainer> {
        if self.id.as_deref() == Some(id) {
            return Some(self);
        }

        self.children.iter_mut().find_map(|child| match child {
            RenderedNode::Container(container) => container.find_container_mut(id),
            _ => None,
        })
    }

    pub fn widget_ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let RenderedNode::Widget(handle) = node {
                let id = handle.borrow().id().to_string();
                if !id.is_empty() {
                    out.push(id);
                }
            }
        });
        out
    }

    pub fn group_keys(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let RenderedNode::Group { key, .. } = node {
                out.push(key.clone());
            }
        });
        out
    }

    pub fn find_widget(&self, id: &str) -> Option<InstanceHandle> {
        let mut found = None;
        self.walk(&mut |node| {
            if let RenderedNode::Widget(handle) = node {
                if found.is_none() && handle.borrow().id() == id {
                    found = Some(Rc::clone(handle));
                }
            }
        });
        found
    }

    /// Scroll offsets of identified containers in this subtree, this
    /// container included.
    pub fn scroll_offsets(&self) -> HashMap<String, u32> {
        let mut out = HashMap::new();
        if let Some(id) = &self.id {
            out.insert(id.clone(), self.scroll_top);
        }
        self.walk(&mut |node| {
            if let RenderedNode::Container(container) = node {
                if let Some(id) = &container.id {
                    out.insert(id.clone(), container.scroll_top);
                }
            }
        });
        out
    }

    pub fn restore_scroll(&mut self, offsets: &HashMap<String, u32>) {
        if let Some(offset) = self.id.as_ref().and_then(|id| offsets.get(id)) {
            self.scroll_top = *offset;
        }
        for child in &mut self.children {
            if let RenderedNode::Container(container) = child {
                container.restore_scroll(offsets);
            }
        }
    }

    /// Visits every descendant node, depth first.
    fn walk(&self, visit: &mut impl FnMut(&RenderedNode)) {
        for child in &self.children {
            visit(child);
            if let RenderedNode::Container(container) = child {
                container.walk(visit);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Surface {
    root: Option<RenderedContainer>,
    focused: Option<String>,
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<&RenderedContainer> {
        self.root.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn fragment(&self, fragment_id: &str) -> Option<&RenderedContainer> {
        self.root.as_ref()?.find_fragment(fragment_id)
    }

    pub fn fragment_mut(&mut self, fragment_id: &str) -> Option<&mut RenderedContainer> {
        self.root.as_mut()?.find_fragment_mut(fragment_id)
    }

    pub fn find_widget(&self, id: &str) -> Option<InstanceHandle> {
        self.root.as_ref()?.find_widget(id)
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    /// Moves focus, clearing the flag on the previously focused instance.
    pub fn set_focus(&mut self, widget_id: Option<&str>) {
        if let Some(previous) = self.focused.take() {
            if let Some(handle) = self.find_widget(&previous) {
                handle.borrow_mut().local.focused = false;
            }
        }

        if let Some(id) = widget_id {
            if let Some(handle) = self.find_widget(id) {
                handle.borrow_mut().local.focused = true;
                self.focused = Some(id.to_string());
            }
        }
    }

    pub(crate) fn forget_focus(&mut self) {
        self.focused = None;
    }

    pub fn fade(&mut self, fragment_id: &str, opacity: f32) {
        if let Some(fragment) = self.fragment_mut(fragment_id) {
            fragment.opacity = opacity;
        }
    }

    pub fn scroll_container(&mut self, id: &str, offset: u32) -> bool {
        match self.root.as_mut().and_then(|root| root.find_container_mut(id)) {
            Some(container) => {
                container.scroll_top = offset;
                true
            }
            None => false,
        }
    }

    /// Replaces the rendered fragment in one step and returns the outgoing
    /// subtree. An empty surface takes the fragment as its root.
    pub(crate) fn replace_fragment(
        &mut self,
        fragment_id: &str,
        incoming: RenderedContainer,
    ) -> Result<Option<RenderedContainer>, SwapError> {
        let Some(root) = self.root.as_mut() else {
            self.root = Some(incoming);
            return Ok(None);
        };

        match root.find_fragment_mut(fragment_id) {
            Some(slot) => Ok(Some(std::mem::replace(slot, incoming))),
            None => Err(SwapError::UnknownFragment(fragment_id.to_string())),
        }
    }
}

//! Checkbox and radio groups, keyed by group name.
//!
//! The registry is owned by a session and passed down to whoever needs it.
//! Members attach when a group node is materialized and detach when the
//! fragment holding them is swapped out; groups left without members are
//! pruned after every swap.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Checkbox,
    Radio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub value: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Backend id reported with change events; empty when unnamed.
    pub widget_id: String,
    pub kind: GroupKind,
    pub fragment_id: String,
    pub multiple: bool,
    pub members: Vec<GroupMember>,
    /// Set only while [`GroupRegistry::attach`] applies a server value;
    /// member changes made under it produce no change event.
    silent: bool,
    change_pending: bool,
}

/// A group whose value changed since the last flush.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupChange {
    pub key: String,
    pub widget_id: String,
    pub fragment_id: String,
    pub value: Value,
}

#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: BTreeMap<String, Group>,
}

impl Group {
    fn checked_values(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|member| member.checked)
            .map(|member| member.value.clone())
            .collect()
    }

    fn apply_server_value(&mut self, value: &Value) {
        let checked: Vec<bool> = match self.kind {
            GroupKind::Checkbox if self.multiple => {
                let selected: Vec<&str> = value
                    .as_array()
                    .map(|items| items.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                self.members
                    .iter()
                    .map(|member| selected.contains(&member.value.as_str()))
                    .collect()
            }
            GroupKind::Checkbox => vec![value.as_bool().unwrap_or(false); self.members.len()],
            GroupKind::Radio => self
                .members
                .iter()
                .map(|member| Some(member.value.as_str()) == value.as_str())
                .collect(),
        };

        let mut changed = false;
        for (member, checked) in self.members.iter_mut().zip(checked) {
            changed |= member.checked != checked;
            member.checked = checked;
        }
        if changed {
            self.mark_changed();
        }
    }

    /// Applies a server value with change reporting suppressed.
    fn sync_silently(&mut self, value: &Value) {
        self.silent = true;
        self.apply_server_value(value);
        self.silent = false;
    }

    fn mark_changed(&mut self) {
        if !self.silent {
            self.change_pending = true;
        }
    }

    /// Value reported to the backend: checked values for checkbox groups, the
    /// selected value (or null) for radio groups.
    fn event_value(&self) -> Value {
        match self.kind {
            GroupKind::Checkbox => Value::from(self.checked_values()),
            GroupKind::Radio => self
                .checked_values()
                .into_iter()
                .next()
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a group node. Members are rebuilt from `options` every time;
    /// a member whose value survives keeps its checked state until the
    /// server value is applied. Synchronization never reports a change.
    /// Returns `true` when an existing group was reused.
    #[allow(clippy::too_many_arguments)]
    pub fn attach(
        &mut self,
        key: &str,
        widget_id: Option<&str>,
        kind: GroupKind,
        fragment_id: &str,
        options: &[String],
        value: &Value,
        multiple: bool,
    ) -> bool {
        let previous = self
            .groups
            .get(key)
            .filter(|group| group.kind == kind && !group.members.is_empty());
        let reused = previous.is_some();
        let members = options
            .iter()
            .map(|option| GroupMember {
                value: option.clone(),
                checked: previous.is_some_and(|group| {
                    group
                        .members
                        .iter()
                        .any(|member| member.checked && &member.value == option)
                }),
            })
            .collect();
        let change_pending = previous.is_some_and(|group| group.change_pending);

        let mut group = Group {
            widget_id: widget_id.unwrap_or_default().to_string(),
            kind,
            fragment_id: fragment_id.to_string(),
            multiple,
            members,
            silent: false,
            change_pending,
        };
        group.sync_silently(value);
        self.groups.insert(key.to_string(), group);
        reused
    }

    pub fn contains(&self, key: &str) -> bool {
        self.groups.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Group> {
        self.groups.get(key)
    }

    pub fn member_count(&self, key: &str) -> usize {
        self.groups.get(key).map_or(0, |group| group.members.len())
    }

    /// Flips a checkbox member. Returns `false` when the group or member does
    /// not exist.
    pub fn toggle(&mut self, key: &str, value: &str) -> bool {
        let Some(group) = self.groups.get_mut(key) else {
            return false;
        };
        let Some(member) = group.members.iter_mut().find(|member| member.value == value) else {
            return false;
        };

        member.checked = !member.checked;
        group.mark_changed();
        true
    }

    /// Selects a radio member and clears the others.
    pub fn select(&mut self, key: &str, value: &str) -> bool {
        let Some(group) = self.groups.get_mut(key) else {
            return false;
        };
        if !group.members.iter().any(|member| member.value == value) {
            return false;
        }

        let mut changed = false;
        for member in &mut group.members {
            let checked = member.value == value;
            changed |= member.checked != checked;
            member.checked = checked;
        }

        if changed {
            group.mark_changed();
        }
        true
    }

    /// Checked values of a group; empty for a missing or memberless group.
    pub fn checked_values(&self, key: &str) -> Vec<String> {
        self.groups
            .get(key)
            .map(Group::checked_values)
            .unwrap_or_default()
    }

    /// Selected value of a radio group.
    pub fn group_value(&self, key: &str) -> Option<String> {
        self.checked_values(key).into_iter().next()
    }

    /// Groups changed by the user since the last call, one entry per group.
    pub fn take_changes(&mut self) -> Vec<GroupChange> {
        self.groups
            .iter_mut()
            .filter(|(_, group)| group.change_pending)
            .map(|(key, group)| {
                group.change_pending = false;
                GroupChange {
                    key: key.clone(),
                    widget_id: group.widget_id.clone(),
                    fragment_id: group.fragment_id.clone(),
                    value: group.event_value(),
                }
            })
            .collect()
    }

    /// Detaches every member of the listed groups.
    pub fn detach<'a>(&mut self, keys: impl IntoIterator<Item = &'a String>, keep: &HashSet<String>) {
        for key in keys {
            if keep.contains(key) {
                continue;
            }
            if let Some(group) = self.groups.get_mut(key) {
                group.members.clear();
                group.change_pending = false;
            }
        }
    }

    /// Drops groups with no live members. Returns how many were removed.
    pub fn prune_empty(&mut self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|_, group| !group.members.is_empty());
        before - self.groups.len()
    }
}

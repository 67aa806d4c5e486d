//! Atomic replacement of a rendered fragment.
//!
//! A swap runs `BuildingOffSurface -> Inserted -> Transitioning -> Settled`
//! and never moves backwards. The new subtree is built detached, inserted in
//! a single replacement, and then faded from the outgoing subtree's opacity
//! to full opacity. A newer swap of the same fragment settles the older one
//! on the spot, and the older swap's completion becomes a no-op.

use crate::error::{Diagnostic, SwapError};
use crate::groups::GroupRegistry;
use crate::materialize::Materializer;
use crate::surface::Surface;
use crate::tree::Fragment;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapPhase {
    BuildingOffSurface,
    Inserted,
    Transitioning,
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeStrategy {
    CrossFade { duration: Duration },
    /// Settles immediately; for hosts that draw nothing.
    Instant,
}

impl FadeStrategy {
    pub fn from_duration(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Instant
        } else {
            Self::CrossFade { duration }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwapTicket {
    pub swap_id: u64,
    pub fragment_id: String,
}

#[derive(Debug)]
pub struct SwapReport {
    pub ticket: SwapTicket,
    pub reused: usize,
    pub constructed: usize,
    pub retired: usize,
    pub groups_pruned: usize,
    pub focus_restored: bool,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
struct ActiveSwap {
    swap_id: u64,
    phase: SwapPhase,
    from_opacity: f32,
    started: Duration,
}

#[derive(Debug)]
pub struct SwapController {
    strategy: FadeStrategy,
    next_swap_id: u64,
    swaps: HashMap<String, ActiveSwap>,
}

impl SwapController {
    pub fn new(strategy: FadeStrategy) -> Self {
        Self {
            strategy,
            next_swap_id: 1,
            swaps: HashMap::new(),
        }
    }

    pub fn phase(&self, fragment_id: &str) -> Option<SwapPhase> {
        self.swaps.get(fragment_id).map(|swap| swap.phase)
    }

    pub fn swap(
        &mut self,
        fragment: &Fragment,
        now: Duration,
        materializer: &mut Materializer,
        groups: &mut GroupRegistry,
        surface: &mut Surface,
    ) -> Result<SwapReport, SwapError> {
        let fragment_id = fragment.fragment_id.as_str();
        if !surface.is_empty() && surface.fragment(fragment_id).is_none() {
            return Err(SwapError::UnknownFragment(fragment_id.to_string()));
        }

        if let Some(previous) = self.swaps.get_mut(fragment_id) {
            if previous.phase != SwapPhase::Settled {
                tracing::debug!(fragment_id, swap_id = previous.swap_id, "preempting unsettled swap");
                previous.phase = SwapPhase::Settled;
            }
        }

        let swap_id = self.next_swap_id;
        self.next_swap_id += 1;
        self.swaps.insert(
            fragment_id.to_string(),
            ActiveSwap {
                swap_id,
                phase: SwapPhase::BuildingOffSurface,
                from_opacity: 1.0,
                started: now,
            },
        );

        let built = materializer.materialize_fragment(fragment, groups);
        let mut incoming = built.root;

        let (from_opacity, scroll) = match surface.fragment_mut(fragment_id) {
            Some(outgoing) => {
                outgoing.visible = false;
                (outgoing.opacity, outgoing.scroll_offsets())
            }
            None => (1.0, HashMap::new()),
        };
        incoming.restore_scroll(&scroll);
        incoming.opacity = from_opacity;

        let focused_before = surface.focused().map(str::to_string);
        let outgoing = surface.replace_fragment(fragment_id, incoming)?;
        self.advance(fragment_id, swap_id, SwapPhase::Inserted);

        let mut retired = 0;
        let mut focus_restored = false;
        if let Some(outgoing) = outgoing {
            let old_widgets = outgoing.widget_ids();
            let discarded: Vec<String> = old_widgets
                .iter()
                .filter(|id| !built.widget_ids.contains(*id))
                .cloned()
                .collect();
            retired = materializer.retire(&discarded);
            groups.detach(&outgoing.group_keys(), &built.group_keys);

            if let Some(focused) = focused_before.filter(|id| old_widgets.contains(id)) {
                if built.widget_ids.contains(&focused) {
                    surface.set_focus(Some(&focused));
                    focus_restored = true;
                } else {
                    surface.forget_focus();
                }
            }
        }
        let groups_pruned = groups.prune_empty();

        match self.strategy {
            FadeStrategy::Instant => self.settle(fragment_id, swap_id, surface),
            FadeStrategy::CrossFade { .. } => {
                if let Some(swap) = self.swaps.get_mut(fragment_id) {
                    swap.from_opacity = from_opacity;
                    swap.started = now;
                }
                self.advance(fragment_id, swap_id, SwapPhase::Transitioning);
            }
        }

        tracing::debug!(
            fragment_id,
            swap_id,
            reused = built.reused,
            constructed = built.constructed,
            retired,
            "fragment swapped"
        );

        Ok(SwapReport {
            ticket: SwapTicket {
                swap_id,
                fragment_id: fragment_id.to_string(),
            },
            reused: built.reused,
            constructed: built.constructed,
            retired,
            groups_pruned,
            focus_restored,
            diagnostics: built.diagnostics,
        })
    }

    /// Advances every running cross-fade to `now` and returns the swaps that
    /// settled.
    pub fn tick(&mut self, now: Duration, surface: &mut Surface) -> Vec<SwapTicket> {
        let FadeStrategy::CrossFade { duration } = self.strategy else {
            return Vec::new();
        };

        let mut settled = Vec::new();
        for (fragment_id, swap) in &mut self.swaps {
            if swap.phase != SwapPhase::Transitioning {
                continue;
            }

            let elapsed = now.saturating_sub(swap.started);
            let progress = (elapsed.as_secs_f32() / duration.as_secs_f32()).clamp(0.0, 1.0);
            let opacity = swap.from_opacity + (1.0 - swap.from_opacity) * progress;
            surface.fade(fragment_id, opacity);

            if progress >= 1.0 {
                swap.phase = SwapPhase::Settled;
                settled.push(SwapTicket {
                    swap_id: swap.swap_id,
                    fragment_id: fragment_id.clone(),
                });
            }
        }

        settled
    }

    /// Completion callback for a transition. Returns `false`, doing nothing,
    /// when the swap was already settled or preempted.
    pub fn complete(&mut self, ticket: &SwapTicket, surface: &mut Surface) -> bool {
        let current = self
            .swaps
            .get(&ticket.fragment_id)
            .is_some_and(|swap| swap.swap_id == ticket.swap_id && swap.phase == SwapPhase::Transitioning);
        if current {
            self.settle(&ticket.fragment_id, ticket.swap_id, surface);
        }
        current
    }

    fn settle(&mut self, fragment_id: &str, swap_id: u64, surface: &mut Surface) {
        surface.fade(fragment_id, 1.0);
        self.advance(fragment_id, swap_id, SwapPhase::Settled);
    }

    fn advance(&mut self, fragment_id: &str, swap_id: u64, phase: SwapPhase) {
        if let Some(swap) = self.swaps.get_mut(fragment_id) {
            if swap.swap_id == swap_id && swap.phase < phase {
                swap.phase = phase;
            }
        }
    }
}

impl PartialOrd for SwapPhase {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.rank().cmp(&other.rank()))
    }
}

impl SwapPhase {
    fn rank(self) -> u8 {
        match self {
            Self::BuildingOffSurface => 0,
            Self::Inserted => 1,
            Self::Transitioning => 2,
            Self::Settled => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{PENDING_OPACITY, RenderedNode};
    use crate::tree::MarkupContent;
    use serde_json::{Value, json};

    const FADE: Duration = Duration::from_millis(150);

    fn fragment(id: &str, children: Value) -> Fragment {
        Fragment::from_wire(&json!({
            "type": "container",
            "is_fragment_container": true,
            "fragment_id": id,
            "children": children
        }))
        .expect("parse root")
        .fragment
    }

    struct Harness {
        swaps: SwapController,
        materializer: Materializer,
        groups: GroupRegistry,
        surface: Surface,
    }

    impl Harness {
        fn new(strategy: FadeStrategy) -> Self {
            Self {
                swaps: SwapController::new(strategy),
                materializer: Materializer::new(),
                groups: GroupRegistry::new(),
                surface: Surface::new(),
            }
        }

        fn swap(&mut self, fragment: &Fragment, now: Duration) -> SwapReport {
            self.swaps
                .swap(fragment, now, &mut self.materializer, &mut self.groups, &mut self.surface)
                .expect("swap")
        }

        fn texts(&self, fragment_id: &str) -> Vec<String> {
            let fragment = self.surface.fragment(fragment_id).expect("fragment rendered");
            fragment
                .children
                .iter()
                .filter_map(|node| match node {
                    RenderedNode::Markup {
                        content: MarkupContent::Text(text),
                        ..
                    } => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn phases_run_forward_and_settle_on_tick() {
        let mut h = Harness::new(FadeStrategy::CrossFade { duration: FADE });
        let report = h.swap(&fragment("f", json!([{"type": "text", "text": "a"}])), Duration::ZERO);

        assert_eq!(h.swaps.phase("f"), Some(SwapPhase::Transitioning));
        assert!(h.swaps.tick(Duration::from_millis(75), &mut h.surface).is_empty());
        assert_eq!(h.swaps.tick(FADE, &mut h.surface), vec![report.ticket.clone()]);
        assert_eq!(h.swaps.phase("f"), Some(SwapPhase::Settled));
        assert_eq!(h.surface.fragment("f").map(|f| f.opacity), Some(1.0));

        // Settled swaps cannot be completed again.
        assert!(!h.swaps.complete(&report.ticket, &mut h.surface));
    }

    #[test]
    fn incoming_starts_at_outgoing_opacity() {
        let mut h = Harness::new(FadeStrategy::CrossFade { duration: FADE });
        h.swap(&fragment("f", json!([])), Duration::ZERO);
        h.swaps.tick(FADE, &mut h.surface);

        h.surface.fade("f", PENDING_OPACITY);
        h.swap(&fragment("f", json!([])), FADE);
        let rendered = h.surface.fragment("f").expect("fragment");
        assert_eq!(rendered.opacity, PENDING_OPACITY);
        assert!(rendered.visible);

        h.swaps.tick(FADE + FADE / 2, &mut h.surface);
        let opacity = h.surface.fragment("f").map(|f| f.opacity).expect("fragment");
        assert!(opacity > PENDING_OPACITY && opacity < 1.0);
    }

    #[test]
    fn rapid_second_swap_preempts_the_first() {
        let mut h = Harness::new(FadeStrategy::CrossFade { duration: FADE });
        h.swap(&fragment("f", json!([{"type": "text", "text": "initial"}])), Duration::ZERO);
        h.swaps.tick(FADE, &mut h.surface);

        let first = h.swap(&fragment("f", json!([{"type": "text", "text": "first"}])), FADE);
        assert_eq!(h.texts("f"), vec!["first"]);

        let second = h.swap(
            &fragment("f", json!([{"type": "text", "text": "second"}])),
            FADE + Duration::from_millis(10),
        );
        assert_eq!(h.texts("f"), vec!["second"]);

        // The older transition's completion is a no-op.
        assert!(!h.swaps.complete(&first.ticket, &mut h.surface));
        assert_eq!(h.swaps.phase("f"), Some(SwapPhase::Transitioning));

        assert!(h.swaps.complete(&second.ticket, &mut h.surface));
        assert_eq!(h.swaps.phase("f"), Some(SwapPhase::Settled));
        assert_eq!(h.texts("f"), vec!["second"]);
    }

    #[test]
    fn reused_focused_widget_keeps_focus() {
        let mut h = Harness::new(FadeStrategy::Instant);
        h.swap(
            &fragment("f", json!([{"type": "text_input", "id": "name"}, {"type": "button", "id": "go"}])),
            Duration::ZERO,
        );
        h.surface.set_focus(Some("name"));

        let report = h.swap(&fragment("f", json!([{"type": "text_input", "id": "name"}])), Duration::ZERO);
        assert!(report.focus_restored);
        assert_eq!(report.retired, 1);
        assert_eq!(h.surface.focused(), Some("name"));
        let name = h.surface.find_widget("name").expect("name");
        assert!(name.borrow().local.focused);
        assert!(h.materializer.lookup("go").is_none());
    }

    #[test]
    fn discarded_focused_widget_loses_focus() {
        let mut h = Harness::new(FadeStrategy::Instant);
        h.swap(&fragment("f", json!([{"type": "button", "id": "go"}])), Duration::ZERO);
        h.surface.set_focus(Some("go"));

        let report = h.swap(&fragment("f", json!([{"type": "text", "text": "done"}])), Duration::ZERO);
        assert!(!report.focus_restored);
        assert_eq!(h.surface.focused(), None);
    }

    #[test]
    fn scroll_offsets_carry_over_by_container_id() {
        let mut h = Harness::new(FadeStrategy::Instant);
        let tree = fragment("f", json!([{"type": "container", "id": "list", "children": []}]));
        h.swap(&tree, Duration::ZERO);
        assert!(h.surface.scroll_container("list", 240));

        h.swap(&tree, Duration::ZERO);
        let root = h.surface.fragment("f").expect("fragment");
        let RenderedNode::Container(list) = &root.children[0] else {
            panic!("expected container");
        };
        assert_eq!(list.scroll_top, 240);
    }

    #[test]
    fn groups_of_swapped_out_nodes_are_pruned() {
        let mut h = Harness::new(FadeStrategy::Instant);
        h.swap(
            &fragment("f", json!([{"type": "radio", "id": "size", "options": ["s", "m"]}])),
            Duration::ZERO,
        );
        assert!(h.groups.contains("size"));

        let report = h.swap(&fragment("f", json!([])), Duration::ZERO);
        assert_eq!(report.groups_pruned, 1);
        assert!(!h.groups.contains("size"));
    }

    #[test]
    fn unknown_fragment_is_rejected_before_building() {
        let mut h = Harness::new(FadeStrategy::Instant);
        h.swap(&fragment("root", json!([])), Duration::ZERO);

        let err = h
            .swaps
            .swap(
                &fragment("elsewhere", json!([{"type": "button", "id": "b"}])),
                Duration::ZERO,
                &mut h.materializer,
                &mut h.groups,
                &mut h.surface,
            )
            .expect_err("unknown fragment");
        assert_eq!(err, SwapError::UnknownFragment("elsewhere".to_string()));
        assert!(h.materializer.lookup("b").is_none());
    }
}

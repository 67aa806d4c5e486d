use std::process;
use tracing_subscriber::EnvFilter;
use ui_client_runtime::surface::{RenderedContainer, RenderedNode};
use ui_client_runtime::tree::MarkupContent;
use ui_client_runtime::{ClientConfig, Diagnostic, HostBindings, SessionEnd, Surface};

/// Headless host: keeps no pixels, logs what it would show.
#[derive(Debug, Default)]
struct LoggingHost {
    swaps: u64,
}

impl HostBindings for LoggingHost {
    fn fragment_swapped(&mut self, surface: &Surface, fragment_id: &str) {
        self.swaps += 1;
        let Some(fragment) = surface.fragment(fragment_id) else {
            return;
        };

        tracing::info!(
            fragment_id,
            swaps = self.swaps,
            widgets = fragment.widget_ids().len(),
            groups = fragment.group_keys().len(),
            "fragment rendered"
        );

        let mut lines = Vec::new();
        outline(fragment, 0, &mut lines);
        for line in lines {
            tracing::debug!("{line}");
        }
    }

    fn reload(&mut self) {
        tracing::info!("reload requested; ending session");
    }

    fn connection_lost(&mut self, reason: &str) {
        tracing::info!(reason, "connection lost");
    }

    fn report_diagnostic(&mut self, diagnostic: &Diagnostic) {
        tracing::warn!(%diagnostic, "diagnostic");
    }
}

fn outline(container: &RenderedContainer, depth: usize, lines: &mut Vec<String>) {
    let pad = "  ".repeat(depth);
    lines.push(format!(
        "{pad}container {} opacity={:.2}",
        container.id.as_deref().unwrap_or("-"),
        container.opacity
    ));

    for child in &container.children {
        match child {
            RenderedNode::Container(inner) => outline(inner, depth + 1, lines),
            RenderedNode::Markup { tag, content, .. } => {
                let text = match content {
                    MarkupContent::Html(html) => html,
                    MarkupContent::Text(text) => text,
                };
                lines.push(format!("{pad}  <{tag}> {text}"));
            }
            RenderedNode::Widget(handle) => {
                let instance = handle.borrow();
                lines.push(format!("{pad}  {:?} {}", instance.kind(), instance.id()));
            }
            RenderedNode::Group { key, kind } => lines.push(format!("{pad}  {kind:?} group {key}")),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            process::exit(2);
        }
    };

    match ui_client_runtime::run(config, LoggingHost::default) {
        Ok(SessionEnd::Closed) => tracing::info!("session closed"),
        Ok(SessionEnd::Reload) => tracing::info!("session ended for reload"),
        Err(err) => {
            tracing::error!(%err, "ui_client fatal error");
            process::exit(1);
        }
    }
}

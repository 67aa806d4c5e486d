//! One connection lifetime.
//!
//! The session is the single owner of every piece of client state: the
//! rendered surface, the widget instance map, the group registry, the
//! request sequencer and the recovery cache. It is driven entirely by its
//! caller with three kinds of input (server messages, user interactions and
//! animation frames) and produces outbound envelopes in the order they must
//! be transmitted.

use crate::HostBindings;
use crate::config::ClientConfig;
use crate::error::{Diagnostic, InteractionError, UploadError};
use crate::events::{self, EventBus, EventEnvelopeBuilder, UserInput, WidgetMessage};
use crate::groups::GroupRegistry;
use crate::materialize::Materializer;
use crate::protocol::{
    CLIENT_TO_SERVER_CAP, ClientEnvelope, OutgoingEvent, RerunResponse, ServerEnvelope,
    encode_client_envelope,
};
use crate::recovery::DesyncRecovery;
use crate::sequencer::{Disposition, RequestSequencer};
use crate::surface::{PENDING_OPACITY, Surface};
use crate::swap::{SwapController, SwapPhase};
use crate::tree::Fragment;
use crate::upload::{SelectedFile, download_url, selection_summary, upload_batch, upload_endpoint};
use crate::widget::WidgetState;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// What the driver of the session should do after a server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    Continue,
    /// The backend demanded a full restart; the session is finished.
    Reload,
}

pub struct Session<B: HostBindings> {
    config: ClientConfig,
    bindings: B,
    session_id: Option<String>,
    state: ConnectionState,
    dev_mode: bool,
    sequencer: RequestSequencer,
    recovery: DesyncRecovery,
    materializer: Materializer,
    groups: GroupRegistry,
    surface: Surface,
    swaps: SwapController,
    bus: EventBus,
    builder: EventEnvelopeBuilder,
    outbound: VecDeque<ClientEnvelope>,
}

impl<B: HostBindings> Session<B> {
    pub fn new(config: ClientConfig, bindings: B) -> Self {
        let swaps = SwapController::new(config.fade);
        Self {
            config,
            bindings,
            session_id: None,
            state: ConnectionState::Connecting,
            dev_mode: false,
            sequencer: RequestSequencer::new(),
            recovery: DesyncRecovery::new(),
            materializer: Materializer::new(),
            groups: GroupRegistry::new(),
            surface: Surface::new(),
            swaps,
            bus: EventBus::default(),
            builder: EventEnvelopeBuilder::new(),
            outbound: VecDeque::new(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    pub fn recovery(&self) -> &DesyncRecovery {
        &self.recovery
    }

    pub fn swap_phase(&self, fragment_id: &str) -> Option<SwapPhase> {
        self.swaps.phase(fragment_id)
    }

    pub fn bindings(&self) -> &B {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut B {
        &mut self.bindings
    }

    /// Greets the backend. Called once, right after the transport opens.
    pub fn open(&mut self) {
        tracing::info!(href = %self.config.location.href, "connecting");
        self.push_outbound(ClientEnvelope::Hello {
            location: self.config.location.clone(),
        });
    }

    pub fn handle_server_message(&mut self, envelope: ServerEnvelope, now: Duration) -> SessionSignal {
        self.dev_mode = envelope.dev_mode().unwrap_or(false);
        if self.dev_mode {
            tracing::info!(?envelope, "received");
        } else {
            tracing::debug!(kind = ?envelope.kind(), "received");
        }

        if self.state == ConnectionState::Closed {
            tracing::warn!("message after connection closed; ignoring");
            return SessionSignal::Continue;
        }

        match envelope {
            ServerEnvelope::Hello { session_id, .. } => {
                if let Some(current) = &self.session_id {
                    tracing::warn!(%current, offered = %session_id, "session already has an id; ignoring hello");
                    return SessionSignal::Continue;
                }
                tracing::info!(%session_id, "session open");
                self.session_id = Some(session_id);
                self.state = ConnectionState::Open;
                self.send_events(Vec::new());
            }
            ServerEnvelope::Rerun(response) => self.handle_rerun(response, now),
            ServerEnvelope::PleaseRefresh { .. } => {
                tracing::info!("backend requested reload");
                self.state = ConnectionState::Closed;
                self.outbound.clear();
                self.bindings.reload();
                return SessionSignal::Reload;
            }
        }

        SessionSignal::Continue
    }

    fn handle_rerun(&mut self, response: RerunResponse, now: Duration) {
        match self.sequencer.classify(&response) {
            Disposition::Apply => {
                if self.render(&response, now) {
                    self.recovery.record_applied(&response);
                }
            }
            Disposition::Superseded { request_id } => {
                let latest = self.sequencer.latest();
                if self.recovery.record_superseded(response) {
                    tracing::debug!(request_id, ?latest, "superseded response cached");
                } else {
                    tracing::debug!(request_id, ?latest, "stale response dropped");
                }
            }
            Disposition::InvalidState => {
                let plan = self.recovery.on_invalid_state();
                match &plan.replay {
                    Some(replay) => {
                        tracing::info!(request_id = ?replay.request_id, "invalid state; replaying last valid response");
                        self.render(replay, now);
                    }
                    None => tracing::info!("invalid state; nothing cached to replay"),
                }
                self.push_outbound(plan.ack);
            }
            Disposition::Failed(error) => {
                tracing::warn!(
                    request_id = ?response.request_id,
                    kind = %error.kind,
                    detail = error.message.as_deref().unwrap_or_default(),
                    "backend reported an error; ignoring"
                );
            }
        }
    }

    /// Swaps a response's tree into the surface. Returns whether anything
    /// was rendered.
    fn render(&mut self, response: &RerunResponse, now: Duration) -> bool {
        let Some(root) = &response.root else {
            tracing::debug!(request_id = ?response.request_id, "response carries no tree");
            return false;
        };

        let parsed = match Fragment::from_wire(root) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::error!(%err, "cannot render response");
                self.bindings.report_diagnostic(&Diagnostic::RenderSkipped {
                    fragment_id: root
                        .get("fragment_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    reason: err.to_string(),
                });
                return false;
            }
        };
        for diagnostic in &parsed.diagnostics {
            self.bindings.report_diagnostic(diagnostic);
        }

        let sources = parsed.fragment.image_sources();
        if !sources.is_empty() {
            if let Err(reason) = self.bindings.preload_images(&sources) {
                tracing::warn!(%reason, count = sources.len(), "image preload failed; rendering anyway");
            }
        }

        match self.swaps.swap(
            &parsed.fragment,
            now,
            &mut self.materializer,
            &mut self.groups,
            &mut self.surface,
        ) {
            Ok(report) => {
                for diagnostic in &report.diagnostics {
                    self.bindings.report_diagnostic(diagnostic);
                }
                self.bindings.fragment_swapped(&self.surface, &report.ticket.fragment_id);
                true
            }
            Err(err) => {
                tracing::warn!(%err, "response not rendered");
                self.bindings.report_diagnostic(&Diagnostic::RenderSkipped {
                    fragment_id: parsed.fragment.fragment_id.clone(),
                    reason: err.to_string(),
                });
                false
            }
        }
    }

    /// Routes one user interaction. Group members are addressed by their
    /// group key; every other widget by its id.
    pub fn on_interaction(&mut self, widget_id: &str, input: UserInput) -> Result<(), InteractionError> {
        if self.state != ConnectionState::Open {
            return Err(InteractionError::NotConnected);
        }

        match input {
            UserInput::ToggleCheckbox { value } => {
                return self
                    .groups
                    .toggle(widget_id, &value)
                    .then_some(())
                    .ok_or_else(|| InteractionError::UnknownWidget(widget_id.to_string()));
            }
            UserInput::SelectRadio { value } => {
                return self
                    .groups
                    .select(widget_id, &value)
                    .then_some(())
                    .ok_or_else(|| InteractionError::UnknownWidget(widget_id.to_string()));
            }
            UserInput::Focus => {
                self.surface.set_focus(Some(widget_id));
                return match self.surface.focused() {
                    Some(focused) if focused == widget_id => Ok(()),
                    _ => Err(InteractionError::UnknownWidget(widget_id.to_string())),
                };
            }
            UserInput::Blur => {
                if self.surface.focused() == Some(widget_id) {
                    self.surface.set_focus(None);
                }
                return Ok(());
            }
            _ => {}
        }

        let Some(handle) = self.materializer.lookup(widget_id) else {
            return Err(InteractionError::UnknownWidget(widget_id.to_string()));
        };
        let message = events::interpret(&mut handle.borrow_mut(), input)?;
        if let Some(message) = message {
            self.bus.publish(message);
        }

        self.dispatch();
        Ok(())
    }

    fn dispatch(&mut self) {
        while let Some(message) = self.bus.next() {
            match message {
                WidgetMessage::DownloadRequested {
                    widget_id,
                    fragment_id,
                    file_name,
                } => self.start_download(&widget_id, &fragment_id, &file_name),
                WidgetMessage::FilesSelected {
                    key,
                    widget_id,
                    fragment_id,
                    multiple,
                    files,
                } => {
                    let message = self.upload(&key, widget_id, fragment_id, multiple, files);
                    self.builder.ingest(message);
                }
                message => self.builder.ingest(message),
            }
        }
    }

    fn start_download(&mut self, widget_id: &str, fragment_id: &str, file_name: &str) {
        let Some(session_id) = self.session_id.as_deref() else {
            tracing::warn!(widget_id, "download requested before session id is known");
            return;
        };

        let request_id = self.sequencer.issue();
        let url = self
            .config
            .location
            .origin()
            .map_err(|err| UploadError::Endpoint(err.to_string()))
            .and_then(|origin| {
                download_url(
                    &origin,
                    &self.config.download_prefix,
                    session_id,
                    request_id,
                    fragment_id,
                    widget_id,
                )
            });

        match url {
            Ok(url) => {
                tracing::debug!(%url, file_name, "starting download");
                self.bindings.start_download(&url, file_name);
                self.surface.fade(fragment_id, PENDING_OPACITY);
            }
            Err(err) => tracing::warn!(%err, widget_id, "cannot build download url"),
        }
    }

    fn upload(
        &mut self,
        key: &str,
        widget_id: String,
        fragment_id: String,
        multiple: bool,
        files: Vec<SelectedFile>,
    ) -> WidgetMessage {
        let origin = self.config.location.origin();
        let session_id = self.session_id.as_deref().unwrap_or_default();
        let prefix = self.config.upload_prefix.as_str();
        let bindings = &mut self.bindings;

        let outcome = upload_batch(files, multiple, |file| {
            let origin = origin
                .as_ref()
                .map_err(|err| UploadError::Endpoint(err.to_string()))?;
            let endpoint = upload_endpoint(origin, prefix, session_id, file)?;
            bindings.upload_file(&endpoint, file)
        });

        if let Some(failure) = &outcome.failure {
            tracing::warn!(%failure, key, uploaded = outcome.uploaded.len(), "upload batch cut short");
        }

        if !outcome.uploaded.is_empty() {
            if let Some(handle) = self.materializer.lookup(key) {
                if let WidgetState::FileUploader(state) = &mut handle.borrow_mut().state {
                    state.summary = selection_summary(&outcome.uploaded);
                    state.selection.clone_from(&outcome.uploaded);
                }
            }
        }

        let new_value = serde_json::to_value(&outcome.uploaded).unwrap_or_else(|err| {
            tracing::error!(%err, "cannot encode uploaded files");
            Value::Array(Vec::new())
        });

        WidgetMessage::ValueChanged {
            widget_id,
            fragment_id,
            old_value: None,
            new_value,
        }
    }

    /// Advances transitions and sends everything gathered since the previous
    /// frame. Returns the id of the request sent, if any.
    pub fn animation_frame(&mut self, now: Duration) -> Option<u64> {
        for ticket in self.swaps.tick(now, &mut self.surface) {
            tracing::trace!(fragment_id = %ticket.fragment_id, swap_id = ticket.swap_id, "swap settled");
        }

        let group_changes = self.groups.take_changes();

        if self.state != ConnectionState::Open {
            return None;
        }

        let events = self.builder.flush(group_changes);
        if events.is_empty() {
            return None;
        }
        self.send_events(events)
    }

    /// Sends a rerun request. A request that would not fit in one frame is
    /// reported as a diagnostic and dropped without consuming an id.
    fn send_events(&mut self, events: Vec<OutgoingEvent>) -> Option<u64> {
        let pending_fragment = events.first().map(|event| event.fragment_id.clone());
        let envelope: ClientEnvelope = self
            .sequencer
            .prepare(self.config.location.clone(), events)
            .into();

        let bytes = match encode_client_envelope(&envelope) {
            Ok(payload) => payload.len(),
            Err(err) => {
                tracing::error!(%err, "cannot encode rerun request");
                return None;
            }
        };
        if bytes > CLIENT_TO_SERVER_CAP {
            tracing::warn!(bytes, cap = CLIENT_TO_SERVER_CAP, "rerun request too large; dropping");
            self.bindings.report_diagnostic(&Diagnostic::RequestTooLarge {
                bytes,
                cap: CLIENT_TO_SERVER_CAP,
            });
            return None;
        }

        let request_id = self.sequencer.issue();
        if let Some(fragment_id) = pending_fragment {
            self.surface.fade(&fragment_id, PENDING_OPACITY);
        }
        self.push_outbound(envelope);
        Some(request_id)
    }

    fn push_outbound(&mut self, envelope: ClientEnvelope) {
        if self.dev_mode {
            tracing::info!(?envelope, "sending");
        } else {
            tracing::debug!(?envelope, "sending");
        }
        self.outbound.push_back(envelope);
    }

    /// Envelopes to transmit, oldest first.
    pub fn drain_outbound(&mut self) -> Vec<ClientEnvelope> {
        self.outbound.drain(..).collect()
    }

    pub fn transport_closed(&mut self, reason: &str) {
        if self.state == ConnectionState::Closed {
            return;
        }
        tracing::warn!(reason, session_id = ?self.session_id, "connection lost");
        self.state = ConnectionState::Closed;
        self.bindings.connection_lost(reason);
    }
}

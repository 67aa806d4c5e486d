pub mod config;
pub mod error;
pub mod events;
pub mod groups;
pub mod materialize;
pub mod protocol;
pub mod recovery;
pub mod sequencer;
pub mod session;
pub mod surface;
pub mod swap;
pub mod tree;
pub mod upload;
pub mod widget;

use crate::protocol::{reader_loop, writer_loop};
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};
use url::Url;

pub use crate::config::ClientConfig;
pub use crate::error::{ClientError, Diagnostic, InteractionError, UploadError};
pub use crate::events::UserInput;
pub use crate::protocol::{
    CLIENT_TO_SERVER_CAP, ClientEnvelope, OutgoingEvent, SERVER_TO_CLIENT_CAP, ServerEnvelope,
};
pub use crate::session::{ConnectionState, Session, SessionSignal};
pub use crate::surface::Surface;
pub use crate::upload::{SelectedFile, UploadReceipt};
pub use serde_json;

/// One user interaction picked up by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub widget_id: String,
    pub input: UserInput,
}

/// Everything the runtime needs from the environment that displays the
/// surface.
pub trait HostBindings {
    /// A fragment was swapped in; `surface` is the new state.
    fn fragment_swapped(&mut self, surface: &Surface, fragment_id: &str);

    fn reload(&mut self);

    fn connection_lost(&mut self, reason: &str);

    fn report_diagnostic(&mut self, diagnostic: &Diagnostic);

    /// Fetches and decodes images before the tree that shows them is
    /// swapped in.
    fn preload_images(&mut self, _sources: &[String]) -> Result<(), String> {
        Ok(())
    }

    fn upload_file(&mut self, _endpoint: &Url, _file: &SelectedFile) -> Result<UploadReceipt, UploadError> {
        Err(UploadError::Unsupported)
    }

    fn start_download(&mut self, url: &Url, file_name: &str) {
        tracing::warn!(%url, file_name, "host cannot download files");
    }

    /// Interactions gathered since the previous call.
    fn take_interactions(&mut self) -> Vec<Interaction> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Closed,
    Reload,
}

/// Runs one session over stdio: frames from stdin are server messages,
/// frames to stdout are client messages. Returns when the backend closes the
/// connection or demands a reload. A framing error on the inbound stream is
/// reported as [`ClientError::Transport`] once the session has shut down.
pub fn run<B, F>(config: ClientConfig, make_bindings: F) -> Result<SessionEnd, ClientError>
where
    B: HostBindings,
    F: FnOnce() -> B,
{
    let outbound_queue_cap = config.outbound_queue_cap;
    let frame_interval = config.frame_interval;
    let (tx, rx) = mpsc::sync_channel(outbound_queue_cap);
    let (inbound_tx, inbound_rx) = mpsc::channel();

    let writer_handle = thread::spawn(move || writer_loop(io::stdout().lock(), rx));

    let reader_handle = thread::spawn(move || {
        let read_result = reader_loop(io::stdin().lock(), |envelope| {
            let _ = inbound_tx.send(envelope);
        });

        if let Err(err) = &read_result {
            tracing::error!(%err, "reader loop terminated with error");
        }

        read_result
    });

    let mut session = Session::new(config, make_bindings());
    session.open();

    let started = Instant::now();
    let mut next_frame = frame_interval;

    let end = loop {
        let interactions = session.bindings_mut().take_interactions();
        for Interaction { widget_id, input } in interactions {
            if let Err(err) = session.on_interaction(&widget_id, input) {
                tracing::warn!(%err, "interaction dropped");
            }
        }

        if started.elapsed() >= next_frame {
            session.animation_frame(started.elapsed());
            next_frame = started.elapsed() + frame_interval;
        }

        flush_outbound(&mut session, &tx, outbound_queue_cap)?;

        let wait = next_frame.saturating_sub(started.elapsed());
        match inbound_rx.recv_timeout(wait.max(Duration::from_millis(1))) {
            Ok(envelope) => {
                if session.handle_server_message(envelope, started.elapsed()) == SessionSignal::Reload {
                    break SessionEnd::Reload;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                session.transport_closed("server closed the connection");
                break SessionEnd::Closed;
            }
        }
    };

    flush_outbound(&mut session, &tx, outbound_queue_cap)?;
    drop(session);
    drop(tx);

    let mut read_failure = None;
    if reader_handle.is_finished() {
        match reader_handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => read_failure = Some(err),
            Err(err) => tracing::error!(?err, "reader thread join failed"),
        }
    } else {
        // Avoid hanging process exit on a blocked stdio read during teardown.
        tracing::warn!("reader thread still active during shutdown; skipping join");
    }

    match writer_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(%err, "writer thread returned error"),
        Err(err) => tracing::error!(?err, "writer thread join failed"),
    }

    match read_failure {
        Some(err) => Err(ClientError::Transport(err)),
        None => Ok(end),
    }
}

/// Hands queued envelopes to the writer thread in order. A full queue blocks
/// rather than dropping, so ordering survives back pressure.
fn flush_outbound<B: HostBindings>(
    session: &mut Session<B>,
    tx: &SyncSender<ClientEnvelope>,
    queue_capacity: usize,
) -> Result<(), ClientError> {
    for envelope in session.drain_outbound() {
        match tx.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                tracing::warn!(cap = queue_capacity, "outbound queue full; waiting for writer");
                tx.send(envelope).map_err(|_| ClientError::OutboundClosed)?;
            }
            Err(TrySendError::Disconnected(_envelope)) => return Err(ClientError::OutboundClosed),
        }
    }

    Ok(())
}

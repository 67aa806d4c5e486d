use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::sync::mpsc::Receiver;
use url::Url;

pub const CLIENT_TO_SERVER_CAP: usize = 1_048_576;
pub const SERVER_TO_CLIENT_CAP: usize = 1_048_576;

/// Error kind the backend reports when it cannot apply a request because its
/// view of client-visible state has diverged.
pub const INVALID_STATE: &str = "InvalidState";

/// Snapshot of the navigable location, attached to every hello and request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    pub href: String,
    pub pathname: String,
    pub host: String,
    pub hostname: String,
    pub search: String,
}

impl Location {
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        Url::parse(raw).map(|url| Self::from_url(&url))
    }

    pub fn from_url(url: &Url) -> Self {
        let hostname = url.host_str().unwrap_or_default().to_string();
        let host = match url.port() {
            Some(port) => format!("{hostname}:{port}"),
            None => hostname.clone(),
        };
        let search = match url.query() {
            Some(query) if !query.is_empty() => format!("?{query}"),
            _ => String::new(),
        };

        Self {
            href: url.as_str().to_string(),
            pathname: url.path().to_string(),
            host,
            hostname,
            search,
        }
    }

    /// Scheme, host and port of the location; auxiliary HTTP endpoints hang
    /// off this origin.
    pub fn origin(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.href)?;
        url.set_path("/");
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "click")]
    Click,
    #[serde(rename = "change")]
    Change,
    #[serde(rename = "batched-change")]
    BatchedChange,
}

/// One edited data-grid cell inside a `batched-change` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridChange {
    pub row_index: u64,
    pub column_name: String,
    pub new_value: Value,
}

/// One user-caused fact reported to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Backend-assigned id; omitted for widgets the backend has not named yet.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub widget_id: String,
    pub fragment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<GridChange>>,
}

impl OutgoingEvent {
    pub fn click(widget_id: impl Into<String>, fragment_id: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Click,
            widget_id: widget_id.into(),
            fragment_id: fragment_id.into(),
            old_value: None,
            new_value: None,
            changes: None,
        }
    }

    pub fn change(
        widget_id: impl Into<String>,
        fragment_id: impl Into<String>,
        old_value: Option<Value>,
        new_value: Value,
    ) -> Self {
        Self {
            kind: EventKind::Change,
            widget_id: widget_id.into(),
            fragment_id: fragment_id.into(),
            old_value,
            new_value: Some(new_value),
            changes: None,
        }
    }

    pub fn batched_change(
        widget_id: impl Into<String>,
        fragment_id: impl Into<String>,
        changes: Vec<GridChange>,
    ) -> Self {
        Self {
            kind: EventKind::BatchedChange,
            widget_id: widget_id.into(),
            fragment_id: fragment_id.into(),
            old_value: None,
            new_value: None,
            changes: Some(changes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEnvelope {
    #[serde(rename = "hello")]
    Hello { location: Location },

    #[serde(rename = "request_rerun")]
    RequestRerun {
        location: Location,
        request_id: u64,
        events: Vec<OutgoingEvent>,
    },

    #[serde(rename = "ack_invalid_state")]
    AckInvalidState,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResponseError {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl ResponseError {
    pub fn is_invalid_state(&self) -> bool {
        self.kind == INVALID_STATE
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RerunResponse {
    #[serde(default)]
    pub request_id: Option<u64>,
    #[serde(default)]
    pub root: Option<Value>,
    #[serde(default)]
    pub error: Option<ResponseError>,
    #[serde(default)]
    pub dev_mode: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEnvelope {
    #[serde(rename = "response_hello")]
    Hello {
        session_id: String,
        #[serde(default)]
        dev_mode: Option<bool>,
    },

    #[serde(rename = "response_rerun", alias = "new_state")]
    Rerun(RerunResponse),

    #[serde(rename = "please_refresh")]
    PleaseRefresh {
        #[serde(default)]
        dev_mode: Option<bool>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    HelloAck,
    RerunResult,
    InvalidState,
    ForceReload,
}

impl ServerEnvelope {
    pub fn kind(&self) -> ResponseKind {
        match self {
            Self::Hello { .. } => ResponseKind::HelloAck,
            Self::Rerun(RerunResponse {
                error: Some(error), ..
            }) if error.is_invalid_state() => ResponseKind::InvalidState,
            Self::Rerun(_) => ResponseKind::RerunResult,
            Self::PleaseRefresh { .. } => ResponseKind::ForceReload,
        }
    }

    pub fn dev_mode(&self) -> Option<bool> {
        match self {
            Self::Hello { dev_mode, .. } | Self::PleaseRefresh { dev_mode } => *dev_mode,
            Self::Rerun(response) => response.dev_mode,
        }
    }
}

/// Writes every queued envelope. An envelope too large for one frame is
/// logged and dropped; only write failures end the loop.
pub fn writer_loop<W: Write>(mut writer: W, rx: Receiver<ClientEnvelope>) -> io::Result<()> {
    for envelope in rx {
        let payload = encode_client_envelope(&envelope)?;
        if payload.len() > CLIENT_TO_SERVER_CAP {
            tracing::error!(bytes = payload.len(), cap = CLIENT_TO_SERVER_CAP, "dropping oversized envelope");
            continue;
        }
        write_frame(&mut writer, &payload, CLIENT_TO_SERVER_CAP)?;
        writer.flush()?;
    }

    Ok(())
}

/// Reads frames until end of input. Frames that decode as JSON but not as a
/// known envelope are logged and skipped; framing errors end the loop.
pub fn reader_loop<R, F>(mut reader: R, mut on_envelope: F) -> io::Result<()>
where
    R: Read,
    F: FnMut(ServerEnvelope),
{
    loop {
        match read_frame(&mut reader, SERVER_TO_CLIENT_CAP) {
            Ok(payload) => match decode_server_envelope(&payload) {
                Ok(envelope) => on_envelope(envelope),
                Err(err) => tracing::warn!(%err, "dropping undecodable server envelope"),
            },
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

pub fn encode_client_envelope(envelope: &ClientEnvelope) -> io::Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(json_error)
}

pub fn decode_server_envelope(payload: &[u8]) -> io::Result<ServerEnvelope> {
    serde_json::from_slice(payload).map_err(json_error)
}

pub fn read_frame(reader: &mut impl Read, max_payload: usize) -> io::Result<Vec<u8>> {
    let mut len_buf = [0_u8; 4];
    reader.read_exact(&mut len_buf)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} > {max_payload}"),
        ));
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

pub fn write_frame(writer: &mut impl Write, payload: &[u8], max_payload: usize) -> io::Result<()> {
    if payload.len() > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} > {}", payload.len(), max_payload),
        ));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds u32"))?;

    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

fn json_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

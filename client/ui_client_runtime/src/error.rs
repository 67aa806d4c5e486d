//! Error types for the client runtime.

use crate::tree::NodeKind;
use std::io;
use thiserror::Error;

/// Fatal errors that end a client run.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("outbound queue closed before envelope could be queued")]
    OutboundClosed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid location '{value}': {source}")]
    InvalidLocation {
        value: String,
        #[source]
        source: url::ParseError,
    },
}

/// Shape problems in a server-sent tree payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("fragment root must be a container, got {0}")]
    RootNotContainer(String),

    #[error("malformed fragment root: {0}")]
    MalformedRoot(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapError {
    #[error("no rendered fragment with id '{0}'")]
    UnknownFragment(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("host does not support file uploads")]
    Unsupported,

    #[error("upload of '{file_name}' rejected: {reason}")]
    Rejected { file_name: String, reason: String },

    #[error("upload transport failed: {0}")]
    Transport(String),

    #[error("cannot build upload endpoint: {0}")]
    Endpoint(String),
}

/// Reasons a user interaction could not be routed to a widget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteractionError {
    #[error("no live widget or group with id '{0}'")]
    UnknownWidget(String),

    #[error("widget '{widget_id}' of kind {kind:?} does not accept {input}")]
    Unsupported {
        widget_id: String,
        kind: NodeKind,
        input: &'static str,
    },

    #[error("column '{column}' of grid '{widget_id}' is not editable")]
    NotEditable { widget_id: String, column: String },

    #[error("grid '{widget_id}' has no row {row_index}")]
    UnknownRow { widget_id: String, row_index: u64 },

    #[error("session is not connected")]
    NotConnected,
}

/// Non-fatal problems reported to the embedding host's diagnostic channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error("unknown node kind '{kind}' at {path}")]
    UnknownKind { kind: String, path: String },

    #[error("malformed {kind} node at {path}: {reason}")]
    MalformedNode {
        kind: String,
        path: String,
        reason: String,
    },

    #[error("duplicate widget id '{id}' in fragment '{fragment_id}'")]
    DuplicateId { id: String, fragment_id: String },

    #[error("response for fragment '{fragment_id}' not rendered: {reason}")]
    RenderSkipped { fragment_id: String, reason: String },

    #[error("request of {bytes} bytes exceeds the {cap} byte frame limit; not sent")]
    RequestTooLarge { bytes: usize, cap: usize },
}

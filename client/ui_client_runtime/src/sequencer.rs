//! Request id allocation and response correlation.
//!
//! Ids come from one monotonically increasing counter starting at 1. Only a
//! response to the most recently issued request is current; responses to
//! older requests are superseded, which is not the same as discarded (see
//! [`crate::recovery`]). Download requests draw from the same counter and
//! become current like any other request, because the backend answers them
//! with a rerun tagged with the download's id.

use crate::protocol::{ClientEnvelope, Location, OutgoingEvent, ResponseError, RerunResponse};

#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub request_id: u64,
    pub location: Location,
    pub events: Vec<OutgoingEvent>,
}

impl From<RequestEnvelope> for ClientEnvelope {
    fn from(envelope: RequestEnvelope) -> Self {
        ClientEnvelope::RequestRerun {
            location: envelope.location,
            request_id: envelope.request_id,
            events: envelope.events,
        }
    }
}

/// What to do with an incoming rerun response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Answers the latest request, or is a push that answers none.
    Apply,
    /// Successful, but answers an older request.
    Superseded { request_id: u64 },
    InvalidState,
    Failed(ResponseError),
}

#[derive(Debug)]
pub struct RequestSequencer {
    next_request_id: u64,
    latest: Option<u64>,
}

impl Default for RequestSequencer {
    fn default() -> Self {
        Self {
            next_request_id: 1,
            latest: None,
        }
    }
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_request_id
    }

    /// Id of the request whose response is currently awaited.
    pub fn latest(&self) -> Option<u64> {
        self.latest
    }

    /// Wraps `events` under the id [`issue`](Self::issue) will hand out
    /// next. Nothing is allocated until the envelope is issued.
    pub fn prepare(&self, location: Location, events: Vec<OutgoingEvent>) -> RequestEnvelope {
        RequestEnvelope {
            request_id: self.next_request_id,
            location,
            events,
        }
    }

    /// Allocates the next id, superseding every earlier request. Rerun
    /// requests and downloads both draw from here.
    pub fn issue(&mut self) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.latest = Some(request_id);
        request_id
    }

    /// True only for `next_request_id - 1`, the most recently issued id.
    pub fn accept(&self, request_id: u64) -> bool {
        self.latest == Some(request_id)
    }

    pub fn classify(&self, response: &RerunResponse) -> Disposition {
        if let Some(error) = &response.error {
            return if error.is_invalid_state() {
                Disposition::InvalidState
            } else {
                Disposition::Failed(error.clone())
            };
        }

        match response.request_id {
            None => Disposition::Apply,
            Some(request_id) if self.accept(request_id) => Disposition::Apply,
            Some(request_id) => Disposition::Superseded { request_id },
        }
    }
}

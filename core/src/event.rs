//! The event envelope carried through channels
//!
//! An [`Event`] is what a source puts into a channel and what a sink takes
//! out of it: a flat header map plus an opaque body. The body is the raw
//! notification as received upstream; sinks decode it lazily.
//!
//! `Bytes` keeps the body zero-copy when one event is replicated into
//! several channels.

use crate::headers;
use bytes::Bytes;
use std::collections::HashMap;

/// Header map attached to every event
pub type Headers = HashMap<String, String>;

/// Event flowing from a source to a sink
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use cygnet_core::Event;
///
/// let event = Event::new(Bytes::from_static(b"{}"))
///     .with_header("fiware-service", "smartcity");
/// assert_eq!(event.service(), Some("smartcity"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    /// Routing and context headers
    pub headers: Headers,
    /// Opaque payload
    pub body: Bytes,
}

impl Event {
    /// Create an event with no headers
    pub fn new(body: Bytes) -> Self {
        Self {
            headers: Headers::new(),
            body,
        }
    }

    /// Create an event from an existing header map
    pub fn with_headers(headers: Headers, body: Bytes) -> Self {
        Self { headers, body }
    }

    /// Add or replace a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Look up a header value
    #[inline]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Tenant header
    pub fn service(&self) -> Option<&str> {
        self.header(headers::SERVICE)
    }

    /// Raw (still delimited) service path header
    pub fn service_path(&self) -> Option<&str> {
        self.header(headers::SERVICE_PATH)
    }

    /// Raw (still delimited) destination header
    pub fn destination(&self) -> Option<&str> {
        self.header(headers::DESTINATION)
    }

    /// Body length in bytes
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

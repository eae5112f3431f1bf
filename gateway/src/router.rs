//! Notification fan-out
//!
//! The [`EventRouter`] splits one decoded [`Notification`] into an ordered
//! list of [`Route`]s, one per context element, each addressed to the
//! target the sink's [`RoutingStrategy`] selects:
//!
//! | Strategy | Target of element `i` |
//! |---|---|
//! | `ByDestination` | `destination` header, entry `i` |
//! | `ByServicePath` | `fiware-servicepath` header, entry `i` |
//! | `ByService` | `fiware-service` header, same for every element |
//!
//! Positional headers are split on `,` and must have exactly one entry per
//! element. Routing is all-or-nothing: the whole notification is rejected
//! before anything is written if any entry is missing, empty or extra.

use crate::error::{ProtocolError, SinkError};
use crate::metrics::Metrics;
use bytes::Bytes;
use cygnet_core::headers::{self, ROUTING_DELIMITER};
use cygnet_core::{BackendAdapter, Headers, Notification};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info};

/// How a sink picks the target of each context element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum RoutingStrategy {
    /// One target per element from the `destination` header
    #[default]
    ByDestination,
    /// One target per element from the `fiware-servicepath` header
    ByServicePath,
    /// A single target from the `fiware-service` header
    ByService,
}

impl RoutingStrategy {
    /// Header the strategy reads its routing keys from
    pub fn header(self) -> &'static str {
        match self {
            RoutingStrategy::ByDestination => headers::DESTINATION,
            RoutingStrategy::ByServicePath => headers::SERVICE_PATH,
            RoutingStrategy::ByService => headers::SERVICE,
        }
    }

    /// Canonical configuration spelling
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingStrategy::ByDestination => "by-destination",
            RoutingStrategy::ByServicePath => "by-service-path",
            RoutingStrategy::ByService => "by-service",
        }
    }

    fn is_positional(self) -> bool {
        !matches!(self, RoutingStrategy::ByService)
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized routing strategy name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown routing strategy '{0}' (expected by-destination, by-service-path or by-service)")]
pub struct UnknownStrategy(pub String);

impl FromStr for RoutingStrategy {
    type Err = UnknownStrategy;

    /// Accepts `by-destination`, `by_service_path`, `BYSERVICE` and the
    /// legacy `topic-by-*` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        let normalized = normalized.strip_prefix("topic").unwrap_or(&normalized);
        match normalized {
            "bydestination" => Ok(RoutingStrategy::ByDestination),
            "byservicepath" => Ok(RoutingStrategy::ByServicePath),
            "byservice" => Ok(RoutingStrategy::ByService),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for RoutingStrategy {
    type Error = UnknownStrategy;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Serialize for RoutingStrategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One element addressed to its target
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Position of the element in the notification
    pub index: usize,
    /// Destination the backend writes to
    pub target: String,
    /// Serialized element
    pub payload: Bytes,
    /// Short description for logs
    pub summary: String,
}

enum RoutingKeys<'a> {
    PerElement(Vec<&'a str>),
    Shared(&'a str),
}

impl RoutingKeys<'_> {
    fn get(&self, index: usize) -> &str {
        match self {
            RoutingKeys::PerElement(keys) => keys[index],
            RoutingKeys::Shared(key) => key,
        }
    }
}

/// Splits notifications into routes for one strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct EventRouter {
    strategy: RoutingStrategy,
}

impl EventRouter {
    pub fn new(strategy: RoutingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    /// Compute every route for `notification`, in element order
    ///
    /// Every element is serialized before this returns, so a failure
    /// leaves nothing half-routed.
    pub fn route(
        &self,
        headers: &Headers,
        notification: &Notification,
    ) -> Result<Vec<Route>, ProtocolError> {
        let keys = self.routing_keys(headers, notification.len())?;

        notification
            .context_elements
            .iter()
            .enumerate()
            .map(|(index, element)| {
                let payload = element
                    .to_json_bytes()
                    .map_err(|e| ProtocolError::Encoding {
                        index,
                        reason: e.to_string(),
                    })?;
                Ok(Route {
                    index,
                    target: keys.get(index).to_string(),
                    payload,
                    summary: element.summary().to_string(),
                })
            })
            .collect()
    }

    fn routing_keys<'a>(
        &self,
        headers: &'a Headers,
        elements: usize,
    ) -> Result<RoutingKeys<'a>, ProtocolError> {
        let header = self.strategy.header();
        let raw = headers
            .get(header)
            .ok_or(ProtocolError::MissingHeader { header })?;

        if !self.strategy.is_positional() {
            if raw.is_empty() {
                return Err(ProtocolError::EmptyRoutingKey { header, index: 0 });
            }
            return Ok(RoutingKeys::Shared(raw));
        }

        split_routing_keys(header, raw, elements).map(RoutingKeys::PerElement)
    }
}

/// Split a positional routing header into one key per element
///
/// The count is checked before emptiness. Sources run this at intake so a
/// request the sink would reject is refused before it is accepted.
pub(crate) fn split_routing_keys<'a>(
    header: &'static str,
    raw: &'a str,
    elements: usize,
) -> Result<Vec<&'a str>, ProtocolError> {
    let keys: Vec<&str> = raw.split(ROUTING_DELIMITER).collect();
    if keys.len() != elements {
        return Err(ProtocolError::RoutingKeyMismatch {
            header,
            expected: elements,
            actual: keys.len(),
        });
    }
    if let Some(index) = keys.iter().position(|k| k.is_empty()) {
        return Err(ProtocolError::EmptyRoutingKey { header, index });
    }
    Ok(keys)
}

/// Hand routes to `backend` one at a time, in order
///
/// Stops at the first backend failure without retrying; the caller owns
/// redelivery. Returns the number of routes written.
pub async fn dispatch(
    routes: &[Route],
    backend: &dyn BackendAdapter,
    sink: &str,
) -> Result<usize, SinkError> {
    for route in routes {
        info!(
            sink = %sink,
            target = %route.target,
            payload = %route.summary,
            "Persisting context element"
        );

        if let Err(source) = backend.write(&route.target, route.payload.clone()).await {
            error!(
                sink = %sink,
                backend = backend.name(),
                target = %route.target,
                index = route.index,
                error = %source,
                "Backend write failed"
            );
            if let Some(metrics) = Metrics::get() {
                metrics.record_backend_failure(sink);
            }
            return Err(SinkError::Backend {
                index: route.index,
                destination: route.target.clone(),
                source,
            });
        }

        if let Some(metrics) = Metrics::get() {
            metrics.record_persisted(sink, 1);
        }
    }
    Ok(routes.len())
}

//! Reserved event header keys
//!
//! Sources stamp these on every event they accept and sinks read them
//! back to decide where each context element is persisted.

/// Tenant the notification belongs to
pub const SERVICE: &str = "fiware-service";

/// Comma-delimited service paths, one per context element
pub const SERVICE_PATH: &str = "fiware-servicepath";

/// Comma-delimited destinations, one per context element
pub const DESTINATION: &str = "destination";

/// Receive time in milliseconds since the Unix epoch
pub const TIMESTAMP: &str = "timestamp";

/// Content type of the body as announced by the upstream broker
pub const CONTENT_TYPE: &str = "content-type";

/// Delimiter used by multi-valued routing headers
pub const ROUTING_DELIMITER: char = ',';

//! Request source
//!
//! A [`RequestSource`] receives upstream notification requests through a
//! cloneable [`SourceHandle`], turns each one into an [`Event`] and puts it
//! into every channel it is wired to. The requester is answered only after
//! all puts succeed, so any error tells the upstream broker to redeliver.
//!
//! ```text
//! SourceHandle ──mpsc──► runner task ──put──► Channel A
//!      ▲                      │        └──put──► Channel B
//!      └──────oneshot─────────┘
//! ```

use crate::channel::Channel;
use crate::error::{ComponentStartError, IngestError};
use crate::metrics::Metrics;
use crate::router::split_routing_keys;
use bytes::Bytes;
use cygnet_core::headers::{self, ROUTING_DELIMITER};
use cygnet_core::{ComponentKind, Event, Headers, Lifecycle, LifecycleState, Notification};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One upstream request as received
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingRequest {
    pub headers: Headers,
    pub body: Bytes,
}

impl IncomingRequest {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Per-source defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Tenant used when the request has no `fiware-service` header
    pub default_service: String,
    /// Service path used when the request has no `fiware-servicepath` header
    pub default_service_path: String,
    /// Requests that may wait for the runner
    pub intake_capacity: usize,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            default_service: "default".to_string(),
            default_service_path: "/".to_string(),
            intake_capacity: 1024,
        }
    }
}

struct Submission {
    request: IncomingRequest,
    reply: oneshot::Sender<Result<(), IngestError>>,
}

/// Cloneable sender of requests into one source
#[derive(Clone)]
pub struct SourceHandle {
    source: Arc<str>,
    tx: mpsc::Sender<Submission>,
}

impl SourceHandle {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Submit a request and wait until it is accepted into every channel
    pub async fn submit(&self, request: IncomingRequest) -> Result<(), IngestError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(Submission { request, reply })
            .await
            .map_err(|_| IngestError::Stopped(self.source.to_string()))?;
        answer
            .await
            .map_err(|_| IngestError::Stopped(self.source.to_string()))?
    }
}

struct Runner {
    name: Arc<str>,
    settings: SourceSettings,
    channels: Vec<Arc<Channel>>,
}

impl Runner {
    async fn run(self, mut rx: mpsc::Receiver<Submission>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                submission = rx.recv() => match submission {
                    Some(Submission { request, reply }) => {
                        let result = self.accept(request).await;
                        let _ = reply.send(result);
                    }
                    None => break,
                },
            }
        }

        rx.close();
        let mut refused = 0usize;
        while let Ok(submission) = rx.try_recv() {
            let _ = submission
                .reply
                .send(Err(IngestError::Stopped(self.name.to_string())));
            refused += 1;
        }
        if refused > 0 {
            warn!(source = %self.name, refused, "Refused queued requests on stop");
        }
    }

    async fn accept(&self, request: IncomingRequest) -> Result<(), IngestError> {
        let result = self.deliver(request).await;
        if let Some(metrics) = Metrics::get() {
            match &result {
                Ok(()) => metrics.record_accepted(&self.name),
                Err(e) => metrics.record_rejected(&self.name, rejection_reason(e)),
            }
        }
        if let Err(e) = &result {
            warn!(source = %self.name, error = %e, "Request rejected");
        }
        result
    }

    async fn deliver(&self, request: IncomingRequest) -> Result<(), IngestError> {
        let event = to_event(request, &self.settings)?;
        debug!(
            source = %self.name,
            service = event.service().unwrap_or_default(),
            destination = event.destination().unwrap_or_default(),
            "Event accepted"
        );
        for channel in &self.channels {
            channel.put(event.clone()).await?;
        }
        Ok(())
    }
}

fn rejection_reason(err: &IngestError) -> &'static str {
    match err {
        IngestError::Decode(_) => "decode",
        IngestError::Protocol(_) => "protocol",
        IngestError::Channel(_) => "channel",
        IngestError::Stopped(_) | IngestError::UnknownSource(_) => "stopped",
    }
}

/// Turn a request into an event with every routing header filled in
///
/// Header keys are lowercased. The body is kept as received.
pub fn to_event(request: IncomingRequest, settings: &SourceSettings) -> Result<Event, IngestError> {
    let notification = Notification::decode(&request.body)?;
    let elements = notification.len();

    let mut headers: Headers = request
        .headers
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect();

    let service = headers
        .get(headers::SERVICE)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| settings.default_service.clone());
    headers.insert(headers::SERVICE.to_string(), service);

    let service_path = headers
        .get(headers::SERVICE_PATH)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| settings.default_service_path.clone());
    let service_path = if service_path.contains(ROUTING_DELIMITER) {
        split_routing_keys(headers::SERVICE_PATH, &service_path, elements)?;
        service_path
    } else {
        vec![service_path.as_str(); elements].join(",")
    };
    headers.insert(headers::SERVICE_PATH.to_string(), service_path);

    match headers.get(headers::DESTINATION).filter(|v| !v.is_empty()) {
        Some(destination) => {
            split_routing_keys(headers::DESTINATION, destination, elements)?;
        }
        None => {
            let defaults = notification.default_destinations().join(",");
            headers.insert(headers::DESTINATION.to_string(), defaults);
        }
    }

    headers.insert(
        headers::TIMESTAMP.to_string(),
        chrono::Utc::now().timestamp_millis().to_string(),
    );

    Ok(Event::with_headers(headers, request.body))
}

/// Source fed by [`SourceHandle`]s
pub struct RequestSource {
    name: Arc<str>,
    settings: SourceSettings,
    channels: Vec<Arc<Channel>>,
    lifecycle: Lifecycle,
    handle: SourceHandle,
    intake: Mutex<Option<mpsc::Receiver<Submission>>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RequestSource {
    pub fn new(name: impl Into<String>, settings: SourceSettings, channels: Vec<Arc<Channel>>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (tx, rx) = mpsc::channel(settings.intake_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            handle: SourceHandle {
                source: Arc::clone(&name),
                tx,
            },
            name,
            settings,
            channels,
            lifecycle: Lifecycle::new(),
            intake: Mutex::new(Some(rx)),
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        ComponentKind::Source
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// Names of the channels this source feeds
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Sender for upstream requests
    ///
    /// Requests sent before `start` wait in the intake queue.
    pub fn handle(&self) -> SourceHandle {
        self.handle.clone()
    }

    /// Spawn the runner task
    pub fn start(&self) -> Result<(), ComponentStartError> {
        let fail = |reason: String| ComponentStartError::new(self.name.as_ref(), ComponentKind::Source, reason);

        self.lifecycle
            .transition(LifecycleState::Starting)
            .map_err(|e| fail(e.to_string()))?;

        let Some(rx) = self.intake.lock().take() else {
            let _ = self.lifecycle.transition(LifecycleState::Failed);
            return Err(fail("intake already consumed".to_string()));
        };
        if self.channels.is_empty() {
            let _ = self.lifecycle.transition(LifecycleState::Failed);
            return Err(fail("no channels wired".to_string()));
        }

        let runner = Runner {
            name: Arc::clone(&self.name),
            settings: self.settings.clone(),
            channels: self.channels.clone(),
        };
        let shutdown = self.shutdown.subscribe();
        *self.task.lock() = Some(tokio::spawn(runner.run(rx, shutdown)));

        self.lifecycle
            .transition(LifecycleState::Running)
            .map_err(|e| fail(e.to_string()))?;
        info!(source = %self.name, channels = ?self.channel_names(), "Source started");
        Ok(())
    }

    /// Stop accepting requests
    ///
    /// Returns once the runner has finished the request in hand and
    /// exited. Requests still queued are refused with
    /// [`IngestError::Stopped`].
    pub async fn stop(&self) -> Result<(), IngestError> {
        if self.state().is_terminal() {
            return Ok(());
        }
        if self.lifecycle.transition(LifecycleState::Stopped).is_ok() {
            // never started
            self.intake.lock().take();
            info!(source = %self.name, "Source discarded before start");
            return Ok(());
        }
        self.lifecycle
            .transition(LifecycleState::Stopping)
            .map_err(|_| IngestError::Stopped(self.name.to_string()))?;

        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        let joined = match task {
            Some(task) => task.await,
            None => Ok(()),
        };

        match joined {
            Ok(()) => {
                let _ = self.lifecycle.transition(LifecycleState::Stopped);
                info!(source = %self.name, state = %self.state(), "Source stopped");
                Ok(())
            }
            Err(e) => {
                let _ = self.lifecycle.transition(LifecycleState::Failed);
                warn!(source = %self.name, error = %e, "Source task failed");
                Err(IngestError::Stopped(self.name.to_string()))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::channel::OverflowPolicy;
    use crate::error::{ChannelError, ProtocolError};

    const TWO_ROOMS: &str = r#"{
        "subscriptionId": "sub-1",
        "originator": "localhost",
        "contextResponses": [
            {"contextElement": {"id": "room1", "type": "Room", "isPattern": "false",
              "attributes": [{"name": "temperature", "type": "float", "value": "26.5"}]},
             "statusCode": {"code": "200", "reasonPhrase": "OK"}},
            {"contextElement": {"id": "room2", "type": "Room", "isPattern": "false",
              "attributes": [{"name": "temperature", "type": "float", "value": "21.0"}]},
             "statusCode": {"code": "200", "reasonPhrase": "OK"}}
        ]
    }"#;

    fn running_channel(name: &str, capacity: usize, policy: OverflowPolicy) -> Arc<Channel> {
        let ch = Arc::new(Channel::new(name, capacity, policy));
        ch.start().unwrap();
        ch
    }

    // ==========================================================================
    // Event conversion
    // ==========================================================================

    #[test]
    fn test_defaults_are_applied() {
        let event = to_event(IncomingRequest::new(TWO_ROOMS), &SourceSettings::default()).unwrap();
        assert_eq!(event.service(), Some("default"));
        assert_eq!(event.service_path(), Some("/,/"));
        assert_eq!(event.destination(), Some("room1_Room,room2_Room"));
        assert!(event.header("timestamp").unwrap().parse::<i64>().unwrap() > 0);
    }

    #[test]
    fn test_header_keys_are_lowercased() {
        let request = IncomingRequest::new(TWO_ROOMS)
            .with_header("Fiware-Service", "smartcity")
            .with_header("Fiware-ServicePath", "/gardens")
            .with_header("Destination", "a,b");
        let event = to_event(request, &SourceSettings::default()).unwrap();
        assert_eq!(event.service(), Some("smartcity"));
        assert_eq!(event.service_path(), Some("/gardens,/gardens"));
        assert_eq!(event.destination(), Some("a,b"));
    }

    #[test]
    fn test_positional_paths_kept_when_counts_match() {
        let request = IncomingRequest::new(TWO_ROOMS).with_header("fiware-servicepath", "/a,/b");
        let event = to_event(request, &SourceSettings::default()).unwrap();
        assert_eq!(event.service_path(), Some("/a,/b"));
    }

    #[test]
    fn test_destination_count_mismatch_is_rejected() {
        let request = IncomingRequest::new(TWO_ROOMS).with_header("destination", "a,b,c");
        let err = to_event(request, &SourceSettings::default()).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Protocol(ProtocolError::RoutingKeyMismatch {
                expected: 2,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_empty_routing_segment_is_rejected() {
        let request = IncomingRequest::new(TWO_ROOMS).with_header("destination", "a,");
        let err = to_event(request, &SourceSettings::default()).unwrap_err();
        assert_eq!(
            err,
            IngestError::Protocol(ProtocolError::EmptyRoutingKey {
                header: "destination",
                index: 1,
            })
        );

        let request = IncomingRequest::new(TWO_ROOMS).with_header("fiware-servicepath", ",/b");
        let err = to_event(request, &SourceSettings::default()).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Protocol(ProtocolError::EmptyRoutingKey { index: 0, .. })
        ));
    }

    #[test]
    fn test_invalid_body_is_rejected() {
        let err = to_event(IncomingRequest::new("not json"), &SourceSettings::default()).unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));

        let err = to_event(
            IncomingRequest::new(r#"{"contextElements": []}"#),
            &SourceSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));
    }

    // ==========================================================================
    // Runner
    // ==========================================================================

    #[tokio::test]
    async fn test_submit_puts_into_every_channel() {
        let a = running_channel("a", 8, OverflowPolicy::Block);
        let b = running_channel("b", 8, OverflowPolicy::Block);
        let source = RequestSource::new("http", SourceSettings::default(), vec![a.clone(), b.clone()]);
        source.start().unwrap();
        assert_eq!(source.state(), LifecycleState::Running);

        source.handle().submit(IncomingRequest::new(TWO_ROOMS)).await.unwrap();
        assert_eq!(a.pending(), 1);
        assert_eq!(b.pending(), 1);

        source.stop().await.unwrap();
        assert_eq!(source.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_full_channel_error_reaches_requester() {
        let ch = running_channel("small", 1, OverflowPolicy::Reject);
        let source = RequestSource::new("http", SourceSettings::default(), vec![ch.clone()]);
        source.start().unwrap();
        let handle = source.handle();

        handle.submit(IncomingRequest::new(TWO_ROOMS)).await.unwrap();
        let err = handle.submit(IncomingRequest::new(TWO_ROOMS)).await.unwrap_err();
        assert!(matches!(err, IngestError::Channel(ChannelError::Full { .. })));
        assert_eq!(ch.pending(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_stop_fails() {
        let ch = running_channel("c", 8, OverflowPolicy::Block);
        let source = RequestSource::new("http", SourceSettings::default(), vec![ch.clone()]);
        source.start().unwrap();
        let handle = source.handle();
        source.stop().await.unwrap();

        let err = handle.submit(IncomingRequest::new(TWO_ROOMS)).await.unwrap_err();
        assert_eq!(err, IngestError::Stopped("http".into()));
        assert_eq!(ch.pending(), 0);
    }

    #[tokio::test]
    async fn test_start_without_channels_fails() {
        let source = RequestSource::new("lonely", SourceSettings::default(), vec![]);
        let err = source.start().unwrap_err();
        assert_eq!(err.kind, ComponentKind::Source);
        assert_eq!(source.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let ch = running_channel("c", 8, OverflowPolicy::Block);
        let source = RequestSource::new("idle", SourceSettings::default(), vec![ch]);
        source.stop().await.unwrap();
        assert_eq!(source.state(), LifecycleState::Stopped);
        assert!(source.start().is_err());
    }
}

//! Credential service, text coordinator, and telemetry doubles

use async_trait::async_trait;
use ih_core::{
    CoordinatorHandler, CredentialError, CredentialService, TelemetryEvent, TelemetrySink,
    TextCoordinator,
};
use ih_protocol::CustomMessage;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Issues a fixed token, or fails with `NoSession` when built with `none()`
pub struct StaticCredentials {
    token: Option<String>,
    requests: Mutex<Vec<(Option<String>, Map<String, Value>)>>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            token: Some(token.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn none() -> Arc<Self> {
        Arc::new(Self {
            token: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<(Option<String>, Map<String, Value>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CredentialService for StaticCredentials {
    async fn firebase_jwt(
        &self,
        app: Option<&str>,
        params: &Map<String, Value>,
    ) -> Result<String, CredentialError> {
        self.requests
            .lock()
            .push((app.map(str::to_string), params.clone()));
        self.token.clone().ok_or(CredentialError::NoSession)
    }
}

/// Text coordinator recording every call
#[derive(Default)]
pub struct RecordingCoordinator {
    registered: Mutex<HashMap<String, CoordinatorHandler>>,
    selected: Mutex<Vec<String>>,
}

impl RecordingCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn registered(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registered.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn selected(&self) -> Vec<String> {
        self.selected.lock().clone()
    }

    /// Talk back to a registered component; `false` if it is not registered
    pub fn send_to(&self, component_id: &str, message: CustomMessage) -> bool {
        let handler = self.registered.lock().get(component_id).cloned();
        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }
}

impl TextCoordinator for RecordingCoordinator {
    fn register(&self, component_id: &str, handler: CoordinatorHandler) {
        self.registered
            .lock()
            .insert(component_id.to_string(), handler);
    }

    fn unregister(&self, component_id: &str) {
        self.registered.lock().remove(component_id);
    }

    fn select(&self, component_id: &str) {
        self.selected.lock().push(component_id.to_string());
    }
}

/// Telemetry sink keeping every event
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn log(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    message::{Event, ExternalRequestInput, PluginMetadata, StreamInput},
    plugin::{emit, PluginError, SourcePlugin},
};

/// A scripted source: every started instance replays `events`, and external
/// requests are echoed back as one event whose message is the payload text.
#[derive(Clone)]
pub struct MockSource {
    name: String,
    events: Vec<Event>,
    fail_external: bool,
    streaming_only: bool,
    started: Arc<Mutex<Vec<StreamInput>>>,
    external: Arc<Mutex<Vec<ExternalRequestInput>>>,
}

impl MockSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            events: vec![],
            fail_external: false,
            streaming_only: false,
            started: Arc::new(Mutex::new(vec![])),
            external: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }

    pub fn failing_external(mut self) -> Self {
        self.fail_external = true;
        self
    }

    /// Advertise no external request support and keep the default handler.
    pub fn streaming_only(mut self) -> Self {
        self.streaming_only = true;
        self
    }

    pub fn started_inputs(&self) -> Vec<StreamInput> {
        self.started.lock().unwrap().clone()
    }

    pub fn external_inputs(&self) -> Vec<ExternalRequestInput> {
        self.external.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourcePlugin for MockSource {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: self.name.clone(),
            version: "0.0.0".into(),
            description: "scripted test source".into(),
            supports_external_requests: !self.streaming_only,
        }
    }

    async fn stream(&self, input: StreamInput, out: mpsc::Sender<Event>) -> Result<(), PluginError> {
        self.started.lock().unwrap().push(input);
        for event in &self.events {
            emit(&out, event.clone()).await?;
        }
        Ok(())
    }

    async fn handle_external_request(
        &self,
        input: ExternalRequestInput,
    ) -> Result<Vec<Event>, PluginError> {
        if self.streaming_only {
            return Err(PluginError::Unsupported(self.name.clone()));
        }
        self.external.lock().unwrap().push(input.clone());
        if self.fail_external {
            return Err(PluginError::Other(format!("{} rejected the payload", self.name)));
        }
        let text = String::from_utf8_lossy(&input.payload).to_string();
        Ok(vec![Event::default().with_messages([text])])
    }
}

//! Per-instance runtime
//!
//! Owns one interactive slot across reconnects. Each `mount` creates a new
//! generation: a fresh channel, linked-state registry, and dynamic-text
//! bridge. The previous generation is always torn down first through the
//! same routine `unmount` uses.
//!
//! State and attachment references survive generations; everything bound
//! to a channel does not. A reload may bring a new instance description
//! (source URL, authored state, mode), which the next `initInteractive`
//! carries.

use crate::attachments::{AttachmentBroker, BrokerContext, ReferenceSink};
use crate::collaborators::{CredentialService, TelemetrySink};
use crate::context::SessionContext;
use crate::dynamic_text::DynamicTextBridge;
use crate::error::HostError;
use crate::events::{EventBus, HostEvent};
use crate::jwt;
use crate::linked_state::LinkedStateRegistry;
use crate::state_sync::StateSync;
use crate::types::{InteractiveInstance, TelemetryEvent};
use ih_channel::{
    ChannelOptions, FrameLink, MessageChannel, Outbound, PendingState, StateRequestTracker,
};
use ih_protocol::{
    Generation, HostFeatures, HostMessage, InitInteractive, InteractiveId, InteractiveMessage,
    InteractiveMessageKind, Mode,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Binding {
    channel: MessageChannel,
    linked: Arc<LinkedStateRegistry>,
    text: Arc<DynamicTextBridge>,
    init: JoinHandle<()>,
}

/// One interactive slot
pub struct InteractiveRuntime {
    id: InteractiveId,
    instance: Mutex<InteractiveInstance>,
    context: SessionContext,
    generation: Mutex<Generation>,
    state: Arc<StateSync>,
    attachments: Arc<AttachmentBroker>,
    binding: Mutex<Option<Binding>>,
}

impl std::fmt::Debug for InteractiveRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveRuntime")
            .field("id", &self.id)
            .field("generation", &*self.generation.lock())
            .field("mounted", &self.is_mounted())
            .finish_non_exhaustive()
    }
}

impl InteractiveRuntime {
    /// Create an unmounted slot
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(instance: InteractiveInstance, context: SessionContext) -> Arc<Self> {
        let state = Arc::new(StateSync::new(
            instance.id.clone(),
            instance.mode,
            instance.interactive_state.clone(),
            Arc::clone(&context.store),
            context.events.clone(),
        ));

        let store = Arc::clone(&context.store);
        let owner = instance.id.clone();
        let on_reference_change: ReferenceSink = Arc::new(move |name, reference| {
            let (store, owner, name, reference) =
                (Arc::clone(&store), owner.clone(), name.to_string(), reference.clone());
            tokio::spawn(async move {
                if let Err(e) = store.write_attachment(&owner, &name, &reference).await {
                    tracing::warn!(interactive = %owner, name = %name, "failed to record attachment reference: {}", e);
                }
            });
        });
        let attachments = Arc::new(AttachmentBroker::new(
            instance.id.clone(),
            instance.mode,
            BrokerContext {
                session: context.session_id.to_string(),
                identity: context.identity.clone(),
                storage: Arc::clone(&context.storage),
                folders: context.folders.clone(),
                default_expires_in: context.config.attachment_expires_in(),
            },
            HashMap::new(),
            on_reference_change,
        ));

        Arc::new(Self {
            id: instance.id.clone(),
            instance: Mutex::new(instance),
            context,
            generation: Mutex::new(Generation::default()),
            state,
            attachments,
            binding: Mutex::new(None),
        })
    }

    /// Bind to a frame, tearing down any previous generation
    pub fn mount(self: &Arc<Self>, link: FrameLink) -> Generation {
        self.teardown();
        let generation = {
            let mut current = self.generation.lock();
            *current = current.next();
            *current
        };

        self.state.begin_generation();
        let (label, url) = {
            let instance = self.instance.lock();
            (instance.label.clone(), instance.url.clone())
        };

        let config = &self.context.config;
        let options = ChannelOptions::new(label)
            .with_generation(generation)
            .with_handshake_retry(config.handshake_retry())
            .with_state_request_timeout(config.state_request_timeout());
        let (ready_tx, ready_rx) = oneshot::channel();
        let channel = MessageChannel::create(link, options, move || {
            let _ = ready_tx.send(());
        });

        let linked = Arc::new(LinkedStateRegistry::new(
            Arc::clone(&self.context.store),
            channel.outbound(),
        ));
        let text = Arc::new(DynamicTextBridge::new(
            Arc::clone(&self.context.coordinator),
            channel.outbound(),
        ));

        let router = Arc::new(Router {
            id: self.id.clone(),
            outbound: channel.outbound(),
            tracker: channel.state_request(),
            state: Arc::clone(&self.state),
            linked: Arc::clone(&linked),
            text: Arc::clone(&text),
            attachments: Arc::clone(&self.attachments),
            credentials: Arc::clone(&self.context.credentials),
            telemetry: Arc::clone(&self.context.telemetry),
            events: self.context.events.clone(),
        });
        for kind in InteractiveMessageKind::ALL {
            let router = Arc::clone(&router);
            channel.add_listener(kind, move |message| router.route(message));
        }

        let weak = Arc::downgrade(self);
        let init = tokio::spawn(async move {
            if ready_rx.await.is_err() {
                return;
            }
            if let Some(runtime) = weak.upgrade() {
                runtime.initialize(generation).await;
            }
        });

        *self.binding.lock() = Some(Binding {
            channel,
            linked,
            text,
            init,
        });
        tracing::info!(interactive = %self.id, %generation, url = %url, "interactive mounted");
        generation
    }

    /// Reconnect to a new frame for a possibly changed instance
    ///
    /// The old generation's work is abandoned. Known state and attachment
    /// references carry over.
    ///
    /// # Errors
    /// - `HostError::InstanceMismatch` when `instance` has a different id
    pub fn reload(
        self: &Arc<Self>,
        instance: InteractiveInstance,
        link: FrameLink,
    ) -> Result<Generation, HostError> {
        if instance.id != self.id {
            return Err(HostError::InstanceMismatch {
                expected: self.id.clone(),
                found: instance.id,
            });
        }
        Ok(self.rebind(instance, link))
    }

    /// Replace the instance description and mount; ids must already match
    pub(crate) fn rebind(self: &Arc<Self>, instance: InteractiveInstance, link: FrameLink) -> Generation {
        self.teardown();
        {
            let mut current = self.instance.lock();
            if current.url != instance.url {
                tracing::info!(interactive = %self.id, from = %current.url, to = %instance.url, "interactive source changed");
            }
            self.state.set_mode(instance.mode);
            self.attachments.set_mode(instance.mode);
            *current = instance;
        }
        self.mount(link)
    }

    /// Tear down the current generation; safe to call repeatedly
    pub fn unmount(&self) {
        self.teardown();
    }

    fn teardown(&self) {
        let Some(binding) = self.binding.lock().take() else {
            return;
        };
        binding.init.abort();
        binding.linked.remove_all();
        binding.text.unregister_all();
        binding.channel.disconnect();
        let generation = binding.channel.generation();
        tracing::info!(interactive = %self.id, %generation, "interactive unmounted");
        self.context.events.publish(HostEvent::Disconnected {
            id: self.id.clone(),
            generation,
        });
    }

    async fn initialize(&self, generation: Generation) {
        let id = &self.id;
        self.state.flush().await;
        match self.context.store.load(id).await {
            Ok(Some(loaded)) => {
                self.state.reload(Some(loaded));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(interactive = %id, "failed to load state, using last known: {}", e);
            }
        }
        match self.context.store.load_attachments(id).await {
            Ok(references) => self.attachments.merge_references(references),
            Err(e) => tracing::warn!(interactive = %id, "failed to load attachment references: {}", e),
        }

        let instance = self.instance.lock().clone();
        let init = HostMessage::InitInteractive(InitInteractive {
            mode: instance.mode,
            authored_state: instance.authored_state,
            interactive_state: self.state.current_state().unwrap_or(Value::Null),
            linked_interactives: instance.linked_interactives,
            host_features: HostFeatures {
                attachments: true,
                firebase_jwt: true,
                dynamic_text: true,
            },
        });
        {
            let guard = self.binding.lock();
            let Some(binding) = guard.as_ref().filter(|b| b.channel.generation() == generation)
            else {
                tracing::debug!(interactive = %id, %generation, "generation superseded before init");
                return;
            };
            binding.channel.post(&init);
        }
        self.context.events.publish(HostEvent::Connected {
            id: id.clone(),
            generation,
        });
    }

    /// Ask the interactive to report its state
    ///
    /// # Errors
    /// - `HostError::NotMounted` when no generation is bound
    pub fn request_state(&self, options: Option<Value>) -> Result<PendingState, HostError> {
        self.binding
            .lock()
            .as_ref()
            .map(|binding| binding.channel.request_state(options))
            .ok_or_else(|| HostError::NotMounted(self.id.clone()))
    }

    /// Wait until queued state writes have been attempted
    pub async fn flush(&self) {
        self.state.flush().await;
    }

    /// Last known state
    #[must_use]
    pub fn current_state(&self) -> Option<Value> {
        self.state.current_state()
    }

    /// Instance id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &InteractiveId {
        &self.id
    }

    /// Human readable label
    #[must_use]
    pub fn label(&self) -> String {
        self.instance.lock().label.clone()
    }

    /// Source URL of the current instance
    #[must_use]
    pub fn url(&self) -> String {
        self.instance.lock().url.clone()
    }

    /// Rendering mode
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.instance.lock().mode
    }

    /// Current generation
    #[must_use]
    pub fn generation(&self) -> Generation {
        *self.generation.lock()
    }

    /// A generation is bound
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.binding.lock().is_some()
    }

    /// The bound frame acknowledged the handshake
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.binding
            .lock()
            .as_ref()
            .is_some_and(|binding| binding.channel.is_connected())
    }

    /// Linked-state listeners of the current generation
    #[must_use]
    pub fn linked_listener_count(&self) -> usize {
        self.binding
            .lock()
            .as_ref()
            .map_or(0, |binding| binding.linked.len())
    }

    /// Attachment broker for this instance
    #[must_use]
    pub fn attachments(&self) -> &AttachmentBroker {
        &self.attachments
    }
}

impl Drop for InteractiveRuntime {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Inbound message routing for one generation
struct Router {
    id: InteractiveId,
    outbound: Outbound,
    tracker: Arc<StateRequestTracker>,
    state: Arc<StateSync>,
    linked: Arc<LinkedStateRegistry>,
    text: Arc<DynamicTextBridge>,
    attachments: Arc<AttachmentBroker>,
    credentials: Arc<dyn CredentialService>,
    telemetry: Arc<dyn TelemetrySink>,
    events: EventBus,
}

impl Router {
    fn route(&self, message: InteractiveMessage) {
        match message {
            InteractiveMessage::InteractiveState(payload) => {
                let outcome = self.state.handle_update(payload);
                tracing::debug!(interactive = %self.id, ?outcome, "state update");
                self.tracker.resolve();
            }
            InteractiveMessage::Height(height) => self.events.publish(HostEvent::Height {
                id: self.id.clone(),
                height,
            }),
            InteractiveMessage::SupportedFeatures(features) => {
                self.events.publish(HostEvent::SupportedFeatures {
                    id: self.id.clone(),
                    features,
                });
            }
            InteractiveMessage::GetFirebaseJwt(request) => {
                let (id, credentials, outbound) =
                    (self.id.clone(), Arc::clone(&self.credentials), self.outbound.clone());
                tokio::spawn(async move {
                    let response = jwt::respond(credentials.as_ref(), &id, &request).await;
                    outbound.post(&HostMessage::FirebaseJwt(response));
                });
            }
            InteractiveMessage::GetAttachmentUrl(request) => {
                let (attachments, outbound) = (Arc::clone(&self.attachments), self.outbound.clone());
                tokio::spawn(async move {
                    let response = attachments.handle(&request).await;
                    outbound.post(&HostMessage::AttachmentUrl(response));
                });
            }
            InteractiveMessage::AddLinkedInteractiveStateListener(request) => {
                self.linked
                    .add_listener(request.listener_id, request.interactive_item_id);
            }
            InteractiveMessage::RemoveLinkedInteractiveStateListener(request) => {
                self.linked.remove_listener(&request.listener_id);
            }
            InteractiveMessage::Hint(text) => self.events.publish(HostEvent::Hint {
                id: self.id.clone(),
                text,
            }),
            InteractiveMessage::Log(event) => {
                self.telemetry.log(TelemetryEvent {
                    interactive: self.id.clone(),
                    event: event.event.clone(),
                    value: event.value.clone(),
                    data: event.data.clone(),
                    received_at: chrono::Utc::now(),
                });
                self.events.publish(HostEvent::Log {
                    id: self.id.clone(),
                    event,
                });
            }
            InteractiveMessage::CustomMessage(message) => {
                if !self.text.handle(&message) {
                    self.events.publish(HostEvent::CustomMessage {
                        id: self.id.clone(),
                        message,
                    });
                }
            }
        }
    }
}

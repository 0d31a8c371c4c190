//! Declarative client: a session plus the procedures and subscriptions it
//! serves, with start/stop lifecycle.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};
use wampkit_frame::{FrameConfig, FrameSink, FrameSource};
use wampkit_router::Router;
use wampkit_transport::Endpoint;

use crate::codec::MessageCode;
use crate::connector;
use crate::dispatch::{self, DispatchHandle};
use crate::error::{PeerError, Result};
use crate::handler::{MessageHandler, Procedure, ProcedureError, Subscription};
use crate::handshake::{self, validate_realm, HandshakeConfig};
use crate::message::Payload;
use crate::registry::Registry;
use crate::roles;
use crate::session::{Session, SessionState};
use crate::uri::{is_valid_uri, InvocationPolicy, Roles};

/// Runtime settings for one client.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConfig {
    /// Label used in logs and worker thread names.
    pub name: String,
    /// Default deadline for `call`.
    pub call_timeout: Duration,
    /// Deadline for each REGISTER / SUBSCRIBE during `start`.
    pub startup_timeout: Duration,
    /// TCP connect deadline.
    pub connect_timeout: Duration,
    pub handshake: HandshakeConfig,
    pub frame: FrameConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: "wampkit".to_string(),
            call_timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            handshake: HandshakeConfig::default(),
            frame: FrameConfig::default(),
        }
    }
}

/// Builds a [`Client`] from declared procedures and subscriptions.
#[derive(Default)]
pub struct ClientBuilder {
    realm: Option<String>,
    config: PeerConfig,
    roles: Option<Roles>,
    registry: Option<Arc<Registry>>,
    allowed: Option<Vec<MessageCode>>,
    procedures: Vec<Procedure>,
    subscriptions: Vec<Subscription>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Replace the whole runtime config. The name set here wins over `name`
    /// calls made earlier.
    pub fn with_config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.startup_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake.welcome_timeout = timeout;
        self.config.handshake.goodbye_timeout = timeout;
        self
    }

    /// Announce exactly these roles instead of deriving them.
    pub fn roles(mut self, roles: Roles) -> Self {
        self.roles = Some(roles);
        self
    }

    /// Share a registry with other clients in this process.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the inbound message allow-list.
    pub fn allow_messages(mut self, codes: impl IntoIterator<Item = MessageCode>) -> Self {
        self.allowed = Some(codes.into_iter().collect());
        self
    }

    /// Offer `name` as a callee with the default invocation policy.
    pub fn procedure<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Payload) -> std::result::Result<Payload, ProcedureError> + Send + Sync + 'static,
    {
        self.procedure_with_policy(name, InvocationPolicy::default(), func)
    }

    pub fn procedure_with_policy<F>(
        mut self,
        name: impl Into<String>,
        policy: InvocationPolicy,
        func: F,
    ) -> Self
    where
        F: Fn(&Payload) -> std::result::Result<Payload, ProcedureError> + Send + Sync + 'static,
    {
        self.procedures.push(Procedure {
            name: name.into(),
            policy,
            func: Arc::new(func),
        });
        self
    }

    /// Subscribe to `topic`; the handler is named after the topic.
    pub fn subscription<F>(self, topic: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let handler_name = topic.clone();
        self.named_subscription(topic, handler_name, func)
    }

    pub fn named_subscription<F>(
        mut self,
        topic: impl Into<String>,
        handler_name: impl Into<String>,
        func: F,
    ) -> Self
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.subscriptions.push(Subscription {
            topic: topic.into(),
            handler_name: handler_name.into(),
            func: Arc::new(func),
        });
        self
    }

    fn validate(&self) -> Result<&str> {
        let realm = self
            .realm
            .as_deref()
            .ok_or_else(|| PeerError::Configuration("realm is required".to_string()))?;
        validate_realm(realm)?;

        let mut seen = HashSet::new();
        for procedure in &self.procedures {
            if !is_valid_uri(&procedure.name) {
                return Err(PeerError::Configuration(format!(
                    "invalid procedure name '{}'",
                    procedure.name
                )));
            }
            if !seen.insert(procedure.name.as_str()) {
                return Err(PeerError::Configuration(format!(
                    "procedure '{}' declared twice",
                    procedure.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for subscription in &self.subscriptions {
            if !is_valid_uri(&subscription.topic) {
                return Err(PeerError::Configuration(format!(
                    "invalid topic '{}'",
                    subscription.topic
                )));
            }
            if !seen.insert(subscription.topic.as_str()) {
                return Err(PeerError::Configuration(format!(
                    "topic '{}' subscribed twice",
                    subscription.topic
                )));
            }
        }

        Ok(realm)
    }

    /// Build a client over an existing frame channel and start its dispatch
    /// threads. The session is not opened until [`Client::start`].
    pub fn attach(self, sink: Box<dyn FrameSink>, source: Box<dyn FrameSource>) -> Result<Client> {
        let realm = self.validate()?.to_string();

        let mut config = self.config;
        config.handshake.roles = self.roles.unwrap_or(Roles {
            caller: true,
            publisher: true,
            callee: !self.procedures.is_empty(),
            subscriber: !self.subscriptions.is_empty(),
        });

        let registry = self.registry.unwrap_or_else(Registry::shared);
        let session = Arc::new(Session::new(config.name.clone(), realm, sink, registry));

        let mut handler = MessageHandler::new(self.procedures, self.subscriptions);
        if let Some(allowed) = self.allowed {
            handler = handler.with_allowed(allowed);
        }
        let handler = Arc::new(handler);

        let workers = dispatch::spawn(Arc::clone(&session), Arc::clone(&handler), source)?;

        Ok(Client {
            session,
            handler,
            config,
            workers: Mutex::new(Some(workers)),
            started: AtomicBool::new(false),
        })
    }

    /// Connect over TCP to `endpoint` and build the client.
    pub fn connect(self, endpoint: &Endpoint) -> Result<Client> {
        self.validate()?;
        let (sink, source) = connector::connect_with_timeout(
            endpoint,
            &self.config.frame,
            self.config.connect_timeout,
        )?;
        self.attach(sink, source)
    }

    /// Connect to a router's transport, joining its realm unless one was set.
    pub fn connect_to_router(mut self, router: &Router) -> Result<Client> {
        if self.realm.is_none() {
            self.realm = Some(router.realm().to_string());
        }
        self.connect(&router.endpoint())
    }
}

/// A WAMP client: one session, its dispatch threads and its declared roles.
pub struct Client {
    session: Arc<Session>,
    handler: Arc<MessageHandler>,
    config: PeerConfig,
    workers: Mutex<Option<DispatchHandle>>,
    started: AtomicBool,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.session.name()
    }

    pub fn realm(&self) -> &str {
        self.session.realm()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session.session_id()
    }

    /// Open the session only, without registering declared roles.
    pub fn begin(&self) -> Result<u64> {
        handshake::begin(&self.session, &self.config.handshake)
    }

    /// Open the session, then register every declared procedure and
    /// subscribe every declared topic. A failed registration is fatal.
    pub fn start(&self) -> Result<u64> {
        if self.started.swap(true, Ordering::SeqCst) {
            return self
                .session_id()
                .ok_or(PeerError::NotEstablished(self.state().as_str()));
        }

        let session_id = self.begin()?;
        if let Err(err) = self.register_declared() {
            warn!(peer = %self.name(), error = %err, "startup registration failed");
            let _ = self.stop();
            return Err(err);
        }

        info!(
            peer = %self.name(),
            session_id,
            procedures = self.handler.procedures().len(),
            subscriptions = self.handler.subscriptions().len(),
            "client started"
        );
        Ok(session_id)
    }

    fn register_declared(&self) -> Result<()> {
        let timeout = self.config.startup_timeout;
        for procedure in self.handler.procedures() {
            roles::register(&self.session, &procedure.name, procedure.policy, timeout)?;
        }
        for subscription in self.handler.subscriptions() {
            roles::subscribe(&self.session, &subscription.topic, timeout)?;
        }
        Ok(())
    }

    /// Close the session and join the worker threads. Idempotent.
    pub fn stop(&self) -> Result<()> {
        let outcome = handshake::end(&self.session, &self.config.handshake);
        if let Some(mut workers) = self.workers.lock().take() {
            workers.join();
        }
        outcome
    }

    /// Call with the configured default timeout.
    pub fn call(&self, procedure: &str, payload: Payload) -> Result<Payload> {
        self.call_with_timeout(procedure, payload, self.config.call_timeout)
    }

    pub fn call_with_timeout(
        &self,
        procedure: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload> {
        roles::call(&self.session, procedure, payload, timeout)
    }

    /// Publish an event; no acknowledgement is requested.
    pub fn publish(&self, topic: &str, payload: Payload) -> Result<u64> {
        roles::publish(&self.session, topic, payload)
    }

    /// Registration id → procedure for this client.
    pub fn registrations(&self) -> BTreeMap<u64, String> {
        self.session.registrations()
    }

    /// Subscription id → topic for this client.
    pub fn subscriptions(&self) -> BTreeMap<u64, String> {
        self.session.subscriptions()
    }

    pub fn wait_for_registrations(&self, count: usize, timeout: Duration) -> Result<()> {
        self.session.wait_for_registrations(count, timeout)
    }

    pub fn wait_for_subscriptions(&self, count: usize, timeout: Duration) -> Result<()> {
        self.session.wait_for_subscriptions(count, timeout)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(peer = %self.name(), error = %err, "client stop failed");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.session)
            .field("handler", &self.handler)
            .finish()
    }
}

//! Per-node MCBP session: connect, handshake, steady-state multiplexing.
//!
//! A session binds to one data-service endpoint and lives through the
//! states disconnected → resolving → connecting → handshaking → ready →
//! stopped. Frames arriving from the socket are fed to the active message
//! handler: the bootstrap variant drives HELLO/SASL/bucket selection, the
//! normal variant correlates responses with registered continuations and
//! applies server-pushed configuration updates. The two variants are a sum
//! type; becoming ready replaces the variant.
//!
//! Every spawned task (bootstrap, deadline, reader, writer, heartbeat)
//! holds only a weak reference back to the session, so dropping the last
//! user handle winds the whole machinery down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::config::{ClusterConfig, CollectionCache, ErrorMap};
use crate::error::ErrorKind;
use crate::origin::Origin;
use crate::protocol::hello::HelloFeature;
use crate::protocol::opcode::{ClientOpcode, ServerOpcode};
use crate::protocol::status::{map_status, Status};
use crate::protocol::{handshake, hello, FrameBuffer, Magic, Message};
use crate::sasl;
use crate::writer::{self, WriteQueue};

/// Default bound on the whole handshake, TCP connect included.
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on one TCP connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2500);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const INPUT_BUFFER_SIZE: usize = 16 * 1024;

/// Completion for one in-flight request: a response frame or an error from
/// the taxonomy, delivered exactly once.
pub type Continuation = Box<dyn FnOnce(Result<Message, ErrorKind>) + Send>;

/// Completion for `bootstrap`.
pub type BootstrapCallback = Box<dyn FnOnce(Result<ClusterConfig, ErrorKind>) + Send>;

/// Configures and creates a [`Session`].
pub struct SessionBuilder {
    client_id: String,
    origin: Origin,
    bucket: Option<String>,
    bootstrap_timeout: Duration,
    connect_timeout: Duration,
}

impl SessionBuilder {
    pub fn new(client_id: impl Into<String>, origin: Origin) -> Self {
        Self {
            client_id: client_id.into(),
            origin,
            bucket: None,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Scope the session to a bucket, selected during the handshake.
    pub fn bucket(mut self, name: impl Into<String>) -> Self {
        self.bucket = Some(name.into());
        self
    }

    pub fn bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Create the session in the disconnected state.
    pub fn build(self) -> Session {
        let id = uuid::Uuid::new_v4().to_string();
        let log_prefix = format!(
            "[{}/{}/{}]",
            self.client_id,
            id,
            self.bucket.as_deref().unwrap_or("-")
        );
        Session {
            inner: Arc::new(SessionInner {
                client_id: self.client_id,
                id,
                bucket_name: self.bucket,
                bootstrap_timeout: self.bootstrap_timeout,
                connect_timeout: self.connect_timeout,
                origin: Mutex::new(self.origin),
                state: Mutex::new(State::default()),
                handler: Mutex::new(Handler::Inactive),
                in_flight: Mutex::new(HashMap::new()),
                pending: Mutex::new(Vec::new()),
                queue: Arc::new(WriteQueue::new()),
                opaque: AtomicU32::new(0),
                stopped: AtomicBool::new(false),
                bootstrapped: AtomicBool::new(false),
                socket_open: AtomicBool::new(false),
                bootstrap_cb: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                log_prefix: Mutex::new(log_prefix),
            }),
        }
    }
}

/// Handle to one MCBP session. Cheap to clone; the session stops when
/// [`Session::stop`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start connecting and hand the result of the handshake to
    /// `callback`, invoked at most once. Must be called within a tokio
    /// runtime.
    pub fn bootstrap(
        &self,
        callback: impl FnOnce(Result<ClusterConfig, ErrorKind>) + Send + 'static,
    ) {
        let inner = &self.inner;
        *inner.bootstrap_cb.lock().expect("callback mutex poisoned") = Some(Box::new(callback));

        let weak = Arc::downgrade(inner);
        let timeout = inner.bootstrap_timeout;
        inner.register_task(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else { return };
            if inner.is_stopped() || inner.bootstrapped.load(Ordering::Acquire) {
                return;
            }
            tracing::warn!("{} unable to bootstrap in time", inner.log_prefix());
            if let Some(cb) = inner.take_bootstrap_cb() {
                cb(Err(ErrorKind::UnambiguousTimeout));
            }
            inner.stop();
        }));

        let weak = Arc::downgrade(inner);
        inner.register_task(tokio::spawn(run_bootstrap(weak)));
    }

    /// Append an encoded frame to the output queue without flushing.
    pub fn write(&self, frame: Vec<u8>) {
        self.inner.write(frame);
    }

    /// Wake the write task to drain the output queue.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Deliver an encoded request and register its continuation.
    ///
    /// The opaque must be the one encoded at offset 12 of `frame`. On a
    /// stopped session the continuation fails synchronously with
    /// `request_canceled`; before the session is ready the frame is parked
    /// in the pending buffer and released at ready.
    pub fn write_and_subscribe(
        &self,
        opaque: u32,
        frame: Vec<u8>,
        continuation: impl FnOnce(Result<Message, ErrorKind>) + Send + 'static,
    ) {
        self.inner
            .write_and_subscribe(opaque, frame, Box::new(continuation));
    }

    /// Cancel a pending request; its continuation receives `error` if it
    /// is still registered.
    pub fn cancel(&self, opaque: u32, error: ErrorKind) {
        self.inner.cancel(opaque, error);
    }

    /// Terminate the session. Idempotent; cancels every pending
    /// continuation with `request_canceled`.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Allocate the next opaque for a request frame.
    pub fn next_opaque(&self) -> u32 {
        self.inner.next_opaque()
    }

    /// Session uuid, stable for the lifetime of this session.
    pub fn id(&self) -> String {
        self.inner.id.clone()
    }

    pub fn bucket_name(&self) -> Option<String> {
        self.inner.bucket_name.clone()
    }

    /// Whether the feature was granted in the HELLO exchange.
    pub fn supports_feature(&self, feature: HelloFeature) -> bool {
        self.inner.supports_feature(feature)
    }

    /// Whether the server serves cluster configuration without a selected
    /// bucket.
    pub fn supports_gcccp(&self) -> bool {
        self.inner.supports_gcccp()
    }

    /// Whether SASL authentication completed.
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().expect("state mutex poisoned").authenticated
    }

    /// Whether the configured bucket was selected during the handshake.
    pub fn is_bucket_selected(&self) -> bool {
        self.inner.state.lock().expect("state mutex poisoned").bucket_selected
    }

    pub fn has_config(&self) -> bool {
        self.inner.state.lock().expect("state mutex poisoned").config.is_some()
    }

    /// Latest accepted cluster configuration.
    pub fn config(&self) -> Option<ClusterConfig> {
        self.inner.state.lock().expect("state mutex poisoned").config.clone()
    }

    /// Error map fetched during the handshake, when xerror was negotiated.
    pub fn error_map(&self) -> Option<ErrorMap> {
        self.inner.state.lock().expect("state mutex poisoned").errmap.clone()
    }

    pub fn get_collection_uid(&self, path: &str) -> Option<u32> {
        self.inner
            .state
            .lock()
            .expect("state mutex poisoned")
            .collections
            .get(path)
    }

    pub fn update_collection_uid(&self, path: &str, uid: u32) {
        if self.inner.is_stopped() {
            return;
        }
        self.inner
            .state
            .lock()
            .expect("state mutex poisoned")
            .collections
            .update(path, uid);
    }
}

#[derive(Default)]
struct State {
    supported_features: Vec<HelloFeature>,
    supports_gcccp_cleared: bool,
    authenticated: bool,
    bucket_selected: bool,
    config: Option<ClusterConfig>,
    errmap: Option<ErrorMap>,
    collections: CollectionCache,
    endpoint_host: String,
    endpoint_port: u16,
}

/// Active message handler; the bootstrap variant owns the SASL exchange.
enum Handler {
    Inactive,
    Bootstrap(sasl::ClientContext),
    Normal,
}

/// Outcome of handling one frame during the handshake.
enum Step {
    Continue,
    Complete(Result<(), ErrorKind>),
}

struct SessionInner {
    client_id: String,
    id: String,
    bucket_name: Option<String>,
    bootstrap_timeout: Duration,
    connect_timeout: Duration,
    origin: Mutex<Origin>,
    state: Mutex<State>,
    handler: Mutex<Handler>,
    in_flight: Mutex<HashMap<u32, Continuation>>,
    pending: Mutex<Vec<Vec<u8>>>,
    queue: Arc<WriteQueue>,
    opaque: AtomicU32,
    stopped: AtomicBool,
    bootstrapped: AtomicBool,
    socket_open: AtomicBool,
    bootstrap_cb: Mutex<Option<BootstrapCallback>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    log_prefix: Mutex<String>,
}

impl SessionInner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn log_prefix(&self) -> String {
        self.log_prefix.lock().expect("log prefix mutex poisoned").clone()
    }

    fn set_log_prefix(&self, endpoint: &str) {
        let prefix = format!(
            "[{}/{}/{}] <{}>",
            self.client_id,
            self.id,
            self.bucket_name.as_deref().unwrap_or("-"),
            endpoint
        );
        *self.log_prefix.lock().expect("log prefix mutex poisoned") = prefix;
    }

    fn next_opaque(&self) -> u32 {
        self.opaque.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn take_bootstrap_cb(&self) -> Option<BootstrapCallback> {
        self.bootstrap_cb.lock().expect("callback mutex poisoned").take()
    }

    fn register_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().expect("task mutex poisoned").push(handle);
        if self.is_stopped() {
            for task in self.tasks.lock().expect("task mutex poisoned").drain(..) {
                task.abort();
            }
        }
    }

    fn supports_feature(&self, feature: HelloFeature) -> bool {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .supported_features
            .contains(&feature)
    }

    fn supports_gcccp(&self) -> bool {
        !self.state.lock().expect("state mutex poisoned").supports_gcccp_cleared
    }

    fn write(&self, frame: Vec<u8>) {
        if self.is_stopped() {
            return;
        }
        if frame.len() >= 16 {
            let opaque = u32::from_ne_bytes([frame[12], frame[13], frame[14], frame[15]]);
            tracing::debug!("{} MCBP send, opaque={}, len={}", self.log_prefix(), opaque, frame.len());
        }
        self.queue.push(frame);
    }

    fn flush(&self) {
        if self.is_stopped() {
            return;
        }
        self.queue.flush();
    }

    fn write_and_flush(&self, frame: Vec<u8>) {
        self.write(frame);
        self.flush();
    }

    fn write_and_subscribe(&self, opaque: u32, frame: Vec<u8>, continuation: Continuation) {
        if self.is_stopped() {
            tracing::warn!(
                "{} MCBP cancel operation, writing to a stopped session, opaque={}",
                self.log_prefix(),
                opaque
            );
            continuation(Err(ErrorKind::RequestCanceled));
            return;
        }
        self.in_flight
            .lock()
            .expect("in-flight mutex poisoned")
            .insert(opaque, continuation);
        if self.bootstrapped.load(Ordering::Acquire) && self.socket_open.load(Ordering::Acquire) {
            self.write_and_flush(frame);
        } else {
            self.pending.lock().expect("pending mutex poisoned").push(frame);
        }
    }

    fn cancel(&self, opaque: u32, error: ErrorKind) {
        if self.is_stopped() {
            return;
        }
        let continuation = self
            .in_flight
            .lock()
            .expect("in-flight mutex poisoned")
            .remove(&opaque);
        if let Some(continuation) = continuation {
            tracing::debug!(
                "{} MCBP cancel operation, opaque={}, error={}",
                self.log_prefix(),
                opaque,
                error
            );
            continuation(Err(error));
        }
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("{} stopping session", self.log_prefix());
        for task in self.tasks.lock().expect("task mutex poisoned").drain(..) {
            task.abort();
        }
        self.queue.close();
        self.socket_open.store(false, Ordering::Release);
        if !self.bootstrapped.load(Ordering::Acquire) {
            if let Some(cb) = self.take_bootstrap_cb() {
                cb(Err(ErrorKind::RequestCanceled));
            }
        }
        *self.handler.lock().expect("handler mutex poisoned") = Handler::Inactive;
        let canceled: Vec<(u32, Continuation)> = self
            .in_flight
            .lock()
            .expect("in-flight mutex poisoned")
            .drain()
            .collect();
        for (opaque, continuation) in canceled {
            tracing::debug!(
                "{} MCBP cancel operation during session close, opaque={}",
                self.log_prefix(),
                opaque
            );
            continuation(Err(ErrorKind::RequestCanceled));
        }
    }

    /// Install the bootstrap handler on a fresh socket and emit the
    /// handshake burst before the first read.
    fn attach(self: &Arc<Self>, stream: TcpStream) {
        if let Err(err) = stream.set_nodelay(true) {
            tracing::warn!("{} unable to set TCP_NODELAY: {}", self.log_prefix(), err);
        }
        if let Err(err) = socket2::SockRef::from(&stream).set_keepalive(true) {
            tracing::warn!("{} unable to set SO_KEEPALIVE: {}", self.log_prefix(), err);
        }
        let peer = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(err) => {
                tracing::error!("{} unable to read peer address: {}", self.log_prefix(), err);
                return self.stop();
            }
        };
        {
            let mut state = self.state.lock().expect("state mutex poisoned");
            state.endpoint_host = peer.ip().to_string();
            state.endpoint_port = peer.port();
        }
        self.set_log_prefix(&peer.to_string());
        tracing::debug!("{} connected", self.log_prefix());

        let (read_half, write_half) = stream.into_split();
        self.socket_open.store(true, Ordering::Release);

        let mut sasl_ctx = {
            let origin = self.origin.lock().expect("origin mutex poisoned");
            sasl::ClientContext::new(
                origin.username(),
                origin.password(),
                sasl::DEFAULT_MECHANISMS,
            )
        };

        let user_agent = serde_json::json!({
            "a": format!(
                "rust/{}/{}",
                env!("CARGO_PKG_VERSION"),
                option_env!("GIT_REVISION").unwrap_or("dev")
            ),
            "i": format!("{}/{}", self.client_id, self.id),
        })
        .to_string();

        let features = hello::requested_features();
        tracing::debug!(
            "{} user_agent={}, requested_features={:?}",
            self.log_prefix(),
            user_agent,
            features
        );
        self.write(hello::request(self.next_opaque(), &user_agent, &features));
        self.write(handshake::sasl_list_mechs_request(self.next_opaque()));
        let initial = sasl_ctx.start();
        self.write(handshake::sasl_auth_request(
            self.next_opaque(),
            sasl_ctx.mechanism().as_str(),
            &initial,
        ));
        self.flush();

        *self.handler.lock().expect("handler mutex poisoned") = Handler::Bootstrap(sasl_ctx);

        let weak = Arc::downgrade(self);
        let queue = self.queue.clone();
        self.register_task(tokio::spawn(async move {
            if let Err(err) = writer::write_loop(write_half, &queue).await {
                if let Some(inner) = weak.upgrade() {
                    tracing::error!(
                        "{} IO error while writing to the socket: {}",
                        inner.log_prefix(),
                        err
                    );
                    inner.stop();
                }
            }
        }));

        let weak = Arc::downgrade(self);
        self.register_task(tokio::spawn(read_loop(read_half, weak)));
    }

    fn handle_message(self: &Arc<Self>, msg: Message) {
        let mut guard = self.handler.lock().expect("handler mutex poisoned");
        match &mut *guard {
            Handler::Bootstrap(sasl_ctx) => match self.bootstrap_step(sasl_ctx, &msg) {
                Step::Continue => {}
                Step::Complete(result) => {
                    if result.is_ok() {
                        *guard = Handler::Normal;
                    }
                    drop(guard);
                    self.complete_bootstrap(result);
                }
            },
            Handler::Normal => {
                drop(guard);
                self.dispatch(msg);
            }
            Handler::Inactive => {}
        }
    }

    /// One frame of the handshake conversation.
    fn bootstrap_step(&self, sasl_ctx: &mut sasl::ClientContext, msg: &Message) -> Step {
        let opcode = match ClientOpcode::try_from(msg.header.opcode) {
            Ok(opcode) => opcode,
            Err(_) => return Step::Complete(Err(ErrorKind::ProtocolError)),
        };
        let status = Status::try_from(msg.status()).ok();
        match opcode {
            ClientOpcode::Hello => {
                if status == Some(Status::Success) {
                    let features = hello::parse_features(msg);
                    tracing::debug!(
                        "{} supported_features={:?}",
                        self.log_prefix(),
                        features
                    );
                    self.state.lock().expect("state mutex poisoned").supported_features = features;
                    Step::Continue
                } else {
                    tracing::warn!(
                        "{} unexpected hello status during bootstrap: {}",
                        self.log_prefix(),
                        msg.status()
                    );
                    Step::Complete(Err(ErrorKind::HandshakeFailure))
                }
            }
            ClientOpcode::SaslListMechs => {
                if status == Some(Status::Success) {
                    let offered = handshake::parse_sasl_mechs(msg);
                    tracing::debug!(
                        "{} server_mechanisms={:?}",
                        self.log_prefix(),
                        offered
                    );
                    // AUTH for the preferred mechanism is already on the
                    // wire; a mismatch here only explains the failure that
                    // is about to come back.
                    let chosen = sasl_ctx.mechanism().as_str();
                    if !offered.iter().any(|mech| mech == chosen) {
                        tracing::warn!(
                            "{} server does not offer {}, authentication will likely fail",
                            self.log_prefix(),
                            chosen
                        );
                    }
                    Step::Continue
                } else {
                    tracing::warn!(
                        "{} unexpected sasl_list_mechs status during bootstrap: {}",
                        self.log_prefix(),
                        msg.status()
                    );
                    Step::Complete(Err(ErrorKind::AuthenticationFailure))
                }
            }
            ClientOpcode::SaslAuth => match status {
                Some(Status::Success) => self.auth_success(),
                Some(Status::AuthContinue) => match sasl_ctx.step(msg.value()) {
                    Ok(sasl::StepOutcome::Continue(payload)) => {
                        self.write_and_flush(handshake::sasl_step_request(
                            self.next_opaque(),
                            sasl_ctx.mechanism().as_str(),
                            &payload,
                        ));
                        Step::Continue
                    }
                    Ok(sasl::StepOutcome::Done) => self.auth_success(),
                    Err(_) => {
                        tracing::error!("{} unable to authenticate", self.log_prefix());
                        Step::Complete(Err(ErrorKind::AuthenticationFailure))
                    }
                },
                _ => {
                    tracing::warn!(
                        "{} unexpected sasl_auth status during bootstrap: {}",
                        self.log_prefix(),
                        msg.status()
                    );
                    Step::Complete(Err(ErrorKind::AuthenticationFailure))
                }
            },
            ClientOpcode::SaslStep => {
                if status == Some(Status::Success) {
                    self.auth_success()
                } else {
                    Step::Complete(Err(ErrorKind::AuthenticationFailure))
                }
            }
            ClientOpcode::GetErrorMap => {
                if status == Some(Status::Success) {
                    match handshake::parse_error_map(msg) {
                        Ok(errmap) => {
                            self.state.lock().expect("state mutex poisoned").errmap = Some(errmap);
                            Step::Continue
                        }
                        Err(kind) => Step::Complete(Err(kind)),
                    }
                } else {
                    tracing::warn!(
                        "{} unexpected get_error_map status during bootstrap: {}",
                        self.log_prefix(),
                        msg.status()
                    );
                    Step::Complete(Err(ErrorKind::ProtocolError))
                }
            }
            ClientOpcode::SelectBucket => match status {
                Some(Status::Success) => {
                    tracing::debug!(
                        "{} selected bucket: {}",
                        self.log_prefix(),
                        self.bucket_name.as_deref().unwrap_or("")
                    );
                    self.state.lock().expect("state mutex poisoned").bucket_selected = true;
                    Step::Continue
                }
                Some(Status::NoAccess) => {
                    tracing::debug!(
                        "{} unable to select bucket: {}, probably it does not exist",
                        self.log_prefix(),
                        self.bucket_name.as_deref().unwrap_or("")
                    );
                    Step::Complete(Err(ErrorKind::BucketNotFound))
                }
                _ => {
                    tracing::warn!(
                        "{} unexpected select_bucket status during bootstrap: {}",
                        self.log_prefix(),
                        msg.status()
                    );
                    Step::Complete(Err(ErrorKind::BucketNotFound))
                }
            },
            ClientOpcode::GetClusterConfig => match status {
                Some(Status::Success) => match handshake::parse_cluster_config(msg.value()) {
                    Ok(config) => {
                        self.update_configuration(config);
                        Step::Complete(Ok(()))
                    }
                    Err(kind) => Step::Complete(Err(kind)),
                },
                Some(Status::NoBucket) if self.bucket_name.is_none() => {
                    // Bucket-less session against a server without GCCCP.
                    tracing::warn!(
                        "{} server does not support GCCCP, open a bucket before cluster-level commands",
                        self.log_prefix()
                    );
                    let (host, port) = {
                        let mut state = self.state.lock().expect("state mutex poisoned");
                        state.supports_gcccp_cleared = true;
                        (state.endpoint_host.clone(), state.endpoint_port)
                    };
                    self.update_configuration(ClusterConfig::blank(host, port));
                    Step::Complete(Ok(()))
                }
                _ => {
                    tracing::warn!(
                        "{} unexpected get_cluster_config status during bootstrap: {}",
                        self.log_prefix(),
                        msg.status()
                    );
                    Step::Complete(Err(ErrorKind::ProtocolError))
                }
            },
            other => {
                tracing::warn!(
                    "{} unexpected message during bootstrap: {}",
                    self.log_prefix(),
                    other
                );
                Step::Complete(Err(ErrorKind::ProtocolError))
            }
        }
    }

    /// Post-authentication burst: error map when xerror was granted,
    /// bucket selection when configured, then the configuration fetch that
    /// completes the handshake.
    fn auth_success(&self) -> Step {
        self.state.lock().expect("state mutex poisoned").authenticated = true;
        if self.supports_feature(HelloFeature::Xerror) {
            self.write(handshake::get_error_map_request(self.next_opaque()));
        }
        if let Some(bucket) = &self.bucket_name {
            self.write(handshake::select_bucket_request(self.next_opaque(), bucket));
        }
        self.write(handshake::get_cluster_config_request(self.next_opaque()));
        self.flush();
        Step::Continue
    }

    fn complete_bootstrap(self: &Arc<Self>, result: Result<(), ErrorKind>) {
        match result {
            Ok(()) => {
                self.bootstrapped.store(true, Ordering::Release);
                if let Some(cb) = self.take_bootstrap_cb() {
                    let config = self
                        .state
                        .lock()
                        .expect("state mutex poisoned")
                        .config
                        .clone()
                        .unwrap_or_default();
                    cb(Ok(config));
                }
                if self.supports_gcccp() {
                    self.spawn_heartbeat();
                }
                let parked: Vec<Vec<u8>> =
                    self.pending.lock().expect("pending mutex poisoned").drain(..).collect();
                if !parked.is_empty() {
                    for frame in parked {
                        self.write(frame);
                    }
                    self.flush();
                }
            }
            Err(kind) => {
                if let Some(cb) = self.take_bootstrap_cb() {
                    cb(Err(kind));
                }
                self.stop();
            }
        }
    }

    /// Periodic configuration refresh, sent immediately and then every
    /// 2.5 s while the server keeps serving GCCCP.
    fn spawn_heartbeat(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.register_task(tokio::spawn(async move {
            loop {
                {
                    let Some(inner) = weak.upgrade() else { return };
                    if inner.is_stopped() || !inner.supports_gcccp() {
                        return;
                    }
                    let request = handshake::get_cluster_config_request(inner.next_opaque());
                    inner.write_and_flush(request);
                }
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            }
        }));
    }

    /// Steady-state dispatch: correlate responses, apply pushes.
    fn dispatch(self: &Arc<Self>, msg: Message) {
        let magic = Magic::try_from(msg.header.magic).expect("validated by the decoder");
        match magic {
            Magic::ClientResponse | Magic::AltClientResponse => {
                let opcode = ClientOpcode::try_from(msg.header.opcode)
                    .expect("validated by the decoder");
                if opcode == ClientOpcode::GetClusterConfig {
                    if Status::try_from(msg.status()) == Ok(Status::Success) {
                        if let Ok(config) = handshake::parse_cluster_config(msg.value()) {
                            self.update_configuration(config);
                        }
                    } else {
                        tracing::warn!(
                            "{} unexpected get_cluster_config status: {}",
                            self.log_prefix(),
                            msg.status()
                        );
                    }
                } else if opcode.is_request_reply() {
                    let opaque = msg.opaque();
                    let continuation = self
                        .in_flight
                        .lock()
                        .expect("in-flight mutex poisoned")
                        .remove(&opaque);
                    match continuation {
                        Some(continuation) => {
                            let mapped = map_status(opcode, msg.status());
                            tracing::debug!(
                                "{} MCBP invoke operation handler, opaque={}, status={}",
                                self.log_prefix(),
                                opaque,
                                msg.status()
                            );
                            match mapped {
                                Ok(()) => continuation(Ok(msg)),
                                Err(kind) => continuation(Err(kind)),
                            }
                        }
                        None => {
                            tracing::debug!(
                                "{} unexpected orphan response opcode={}, opaque={}",
                                self.log_prefix(),
                                opcode,
                                opaque
                            );
                        }
                    }
                } else {
                    tracing::warn!(
                        "{} unexpected client response: {}",
                        self.log_prefix(),
                        opcode
                    );
                }
            }
            Magic::ServerRequest => {
                let opcode = ServerOpcode::try_from(msg.header.opcode)
                    .expect("validated by the decoder");
                match opcode {
                    ServerOpcode::ClustermapChangeNotification => {
                        let bucket_tag = String::from_utf8_lossy(msg.key()).into_owned();
                        if let Ok(config) = handshake::parse_cluster_config(msg.value()) {
                            let cluster_level = bucket_tag.is_empty() && config.bucket.is_none();
                            let bucket_match = !bucket_tag.is_empty()
                                && self.bucket_name.as_deref() == Some(bucket_tag.as_str());
                            if cluster_level || bucket_match {
                                self.update_configuration(config);
                            }
                        }
                    }
                    other => {
                        tracing::warn!(
                            "{} unexpected server request: {}",
                            self.log_prefix(),
                            other
                        );
                    }
                }
            }
            Magic::ClientRequest | Magic::ServerResponse => {
                tracing::warn!(
                    "{} unexpected magic: {}, opcode={}, opaque={}",
                    self.log_prefix(),
                    magic,
                    msg.header.opcode,
                    msg.opaque()
                );
            }
        }
    }

    /// Accept a configuration only when its revision strictly exceeds the
    /// stored one, filling empty local-node hostnames from the connected
    /// endpoint.
    fn update_configuration(&self, mut config: ClusterConfig) {
        if self.is_stopped() {
            return;
        }
        let mut state = self.state.lock().expect("state mutex poisoned");
        let newer = state.config.as_ref().map_or(true, |stored| config.rev > stored.rev);
        if newer {
            for node in &mut config.nodes {
                if node.this_node && node.hostname.is_empty() {
                    node.hostname = state.endpoint_host.clone();
                }
            }
            tracing::debug!(
                "{} received new configuration, rev={}",
                self.log_prefix(),
                config.rev
            );
            state.config = Some(config);
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Walk the origin's address list, resolving and connecting until a socket
/// is established; back off 500 ms and restart the origin when the list is
/// exhausted.
async fn run_bootstrap(weak: Weak<SessionInner>) {
    loop {
        let Some(inner) = weak.upgrade() else { return };
        if inner.is_stopped() {
            return;
        }

        let address = {
            let mut origin = inner.origin.lock().expect("origin mutex poisoned");
            if origin.exhausted() {
                None
            } else {
                Some(origin.next_address())
            }
        };
        let Some((hostname, service)) = address else {
            tracing::debug!(
                "{} reached the end of the bootstrap node list, waiting {}ms before restart",
                inner.log_prefix(),
                RETRY_BACKOFF.as_millis()
            );
            drop(inner);
            tokio::time::sleep(RETRY_BACKOFF).await;
            let Some(inner) = weak.upgrade() else { return };
            if inner.is_stopped() {
                return;
            }
            inner.origin.lock().expect("origin mutex poisoned").restart();
            continue;
        };

        inner.set_log_prefix(&format!("{}:{}", hostname, service));
        tracing::debug!("{} attempting to establish MCBP connection", inner.log_prefix());

        let target = format!("{}:{}", hostname, service);
        let connect_timeout = inner.connect_timeout;
        drop(inner);

        let resolved = tokio::net::lookup_host(target).await;
        let endpoints: Vec<SocketAddr> = match resolved {
            Ok(addresses) => addresses.collect(),
            Err(err) => {
                let Some(inner) = weak.upgrade() else { return };
                if inner.is_stopped() {
                    return;
                }
                tracing::error!("{} error on resolve: {}", inner.log_prefix(), err);
                continue;
            }
        };

        let mut connected = None;
        for endpoint in endpoints {
            {
                let Some(inner) = weak.upgrade() else { return };
                if inner.is_stopped() {
                    return;
                }
                tracing::debug!("{} connecting to {}", inner.log_prefix(), endpoint);
            }
            match tokio::time::timeout(connect_timeout, TcpStream::connect(endpoint)).await {
                Ok(Ok(stream)) => {
                    connected = Some(stream);
                    break;
                }
                Ok(Err(err)) => {
                    let Some(inner) = weak.upgrade() else { return };
                    tracing::warn!(
                        "{} unable to connect to {}: {}",
                        inner.log_prefix(),
                        endpoint,
                        err
                    );
                }
                Err(_) => {
                    let Some(inner) = weak.upgrade() else { return };
                    tracing::warn!(
                        "{} connect attempt to {} timed out",
                        inner.log_prefix(),
                        endpoint
                    );
                }
            }
        }

        let Some(inner) = weak.upgrade() else { return };
        if inner.is_stopped() {
            return;
        }
        match connected {
            Some(stream) => {
                inner.attach(stream);
                return;
            }
            None => {
                tracing::error!(
                    "{} no more endpoints left to connect, will try another address",
                    inner.log_prefix()
                );
            }
        }
    }
}

/// Fill the 16 KiB input buffer and feed the decoder until it needs more
/// data; a framing failure or socket error stops the session.
async fn read_loop(mut read_half: OwnedReadHalf, weak: Weak<SessionInner>) {
    let mut decoder = FrameBuffer::new();
    let mut buf = [0u8; INPUT_BUFFER_SIZE];
    loop {
        let result = read_half.read(&mut buf).await;
        let Some(inner) = weak.upgrade() else { return };
        if inner.is_stopped() {
            return;
        }
        let n = match result {
            Ok(0) => {
                tracing::debug!("{} remote closed the connection", inner.log_prefix());
                inner.stop();
                return;
            }
            Ok(n) => n,
            Err(err) => {
                tracing::error!(
                    "{} IO error while reading from the socket: {}",
                    inner.log_prefix(),
                    err
                );
                inner.stop();
                return;
            }
        };
        match decoder.push(&buf[..n]) {
            Ok(messages) => {
                for msg in messages {
                    tracing::debug!(
                        "{} MCBP recv, opaque={}, opcode={:#04x}",
                        inner.log_prefix(),
                        msg.opaque(),
                        msg.header.opcode
                    );
                    inner.handle_message(msg);
                    if inner.is_stopped() {
                        return;
                    }
                }
            }
            Err(_) => {
                inner.stop();
                return;
            }
        }
        drop(inner);
    }
}

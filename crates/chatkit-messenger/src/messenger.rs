//! The messenger: one endpoint of the host/frame channel.
//!
//! # Message Flow
//!
//! ```text
//! caller ──command()──▶ register nonce ──▶ post {type: command}
//!                                                 │
//!                        other side: gate ▶ handler ▶ post {type: response}
//!                                                 │
//! caller ◀── ResponseFuture resolved ◀── registry ◀┘
//! ```
//!
//! `fetch` and `fetchEventSource` follow the same shape, except that the other
//! side runs the HTTP request and a stream pushes any number of
//! `fetchEventSourceMessage` envelopes before its terminal `response`.
//! Aborting a caller's signal posts `abortSignal` for the same nonce.

use std::fmt;
use std::panic::{AssertUnwindSafe, Location};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chatkit_protocol::{
    CapabilityGate, ChatKitError, Envelope, ErrorKind, EventSourceMessage, FrameMessage, Nonce,
    ResponseMetadata, command_wire_name,
};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::abort::{AbortRegistry, AbortSignal, abort_error_value};
use crate::config::MessengerConfig;
use crate::emitter::{EventEmitter, ListenerId, Payload};
use crate::error::{FetchError, MessengerError, Result};
use crate::fetch::{HttpFetch, HttpRequest, HttpResponse, ReqwestFetcher, RequestBody, RequestInit};
use crate::frame::{FrameWindow, MessageEvent, TargetResolver};
use crate::handlers::CommandTable;
use crate::registry::{MessageCallback, NonceRegistry, ResponseFuture};
use crate::sse::fetch_event_source_with_retry;

struct Inner {
    window: FrameWindow,
    target: TargetResolver,
    config: MessengerConfig,
    handlers: CommandTable,
    fetcher: Arc<dyn HttpFetch>,
    receive_gate: CapabilityGate,
    capabilities: RwLock<CapabilityGate>,
    registry: NonceRegistry,
    aborts: AbortRegistry,
    emitter: EventEmitter,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for a [`Messenger`].
pub struct MessengerBuilder {
    window: FrameWindow,
    target: TargetResolver,
    config: MessengerConfig,
    handlers: CommandTable,
    fetcher: Option<Arc<dyn HttpFetch>>,
    receive_gate: CapabilityGate,
    capabilities: CapabilityGate,
}

impl MessengerBuilder {
    #[must_use]
    pub fn config(mut self, config: MessengerConfig) -> Self {
        self.config = config;
        self
    }

    /// Origin to post to and accept messages from.
    #[must_use]
    pub fn target_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.target_origin = origin.into();
        self
    }

    /// Handlers for commands the other side may send.
    #[must_use]
    pub fn handlers(mut self, handlers: CommandTable) -> Self {
        self.handlers = handlers;
        self
    }

    /// HTTP implementation used to serve proxied `fetch` and
    /// `fetchEventSource` requests. Defaults to [`ReqwestFetcher`].
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn HttpFetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Gate applied to inbound commands.
    #[must_use]
    pub fn receive_commands(mut self, gate: CapabilityGate) -> Self {
        self.receive_gate = gate;
        self
    }

    /// Gate applied to outbound commands.
    #[must_use]
    pub fn capabilities(mut self, gate: CapabilityGate) -> Self {
        self.capabilities = gate;
        self
    }

    #[must_use]
    pub fn build(self) -> Messenger {
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(ReqwestFetcher::default()));
        Messenger {
            inner: Arc::new(Inner {
                window: self.window,
                target: self.target,
                config: self.config,
                handlers: self.handlers,
                fetcher,
                receive_gate: self.receive_gate,
                capabilities: RwLock::new(self.capabilities),
                registry: NonceRegistry::new(),
                aborts: AbortRegistry::new(),
                emitter: EventEmitter::new(),
                listener: Mutex::new(None),
            }),
        }
    }
}

/// One endpoint of the host/frame channel.
///
/// Cloning yields another handle to the same endpoint.
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<Inner>,
}

impl Messenger {
    /// Start building a messenger that listens on `window` and posts to
    /// whatever `target` resolves to.
    #[must_use]
    pub fn builder(window: FrameWindow, target: TargetResolver) -> MessengerBuilder {
        MessengerBuilder {
            window,
            target,
            config: MessengerConfig::default(),
            handlers: CommandTable::new(),
            fetcher: None,
            receive_gate: CapabilityGate::AllowAll,
            capabilities: CapabilityGate::AllowAll,
        }
    }

    /// Window this messenger listens on.
    #[must_use]
    pub fn window(&self) -> &FrameWindow {
        &self.inner.window
    }

    #[must_use]
    pub fn config(&self) -> &MessengerConfig {
        &self.inner.config
    }

    /// Attach the message listener. Connecting twice is a no-op.
    ///
    /// # Errors
    /// Returns [`MessengerError::NoRuntime`] outside a Tokio runtime.
    pub fn connect(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| MessengerError::NoRuntime)?;
        let mut listener = self.inner.listener.lock();
        if listener.is_some() {
            return Ok(());
        }

        let mut inbox = self.inner.window.listen();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *listener = Some(runtime.spawn(async move {
            while let Some(event) = inbox.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_message(event);
            }
        }));
        debug!(window = %self.inner.window.id(), "Messenger connected");
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.listener.lock().is_some()
    }

    /// Detach the listener, reject every pending request with
    /// [`MessengerError::Closed`] and abort operations served for the other side.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// [`disconnect`](Self::disconnect) and remove every event listener.
    pub fn destroy(&self) {
        self.inner.disconnect();
        self.inner.emitter.clear();
    }

    /// Invoke `command` (leaf name, e.g. `submit`) on the other side.
    ///
    /// # Errors
    /// Returns an `IntegrationError` before anything is posted when the
    /// capability gate does not allow the command.
    #[track_caller]
    pub fn command(&self, command: &str, data: Value) -> std::result::Result<ResponseFuture, ChatKitError> {
        self.command_with_transfer(command, data, Vec::new())
    }

    /// [`command`](Self::command), moving `transfer` buffers with the message.
    ///
    /// # Errors
    /// Returns an `IntegrationError` when the command is not allowed.
    #[track_caller]
    pub fn command_with_transfer(
        &self,
        command: &str,
        data: Value,
        transfer: Vec<Bytes>,
    ) -> std::result::Result<ResponseFuture, ChatKitError> {
        let origin = Location::caller();
        self.inner.capabilities.read().check_command(command)?;

        let nonce = Nonce::new();
        let (response, _settled) = self.inner.registry.register(nonce.clone(), origin, None);
        self.inner.send_request(
            FrameMessage::Command {
                nonce,
                command: command_wire_name(command),
                data,
            },
            transfer,
        );
        Ok(response)
    }

    /// Run a fetch on the other side and resolve with its JSON body.
    ///
    /// A non-2xx response rejects with an `HttpError`. Aborting `init.signal`
    /// asks the other side to abort; the future then rejects with an
    /// `AbortError` value (see [`MessengerError::is_abort`]).
    #[track_caller]
    pub fn fetch(&self, url: impl Into<String>, init: RequestInit) -> ResponseFuture {
        let origin = Location::caller();
        let (params, form_data, signal) = init.into_parts();

        let nonce = Nonce::new();
        let (response, settled) = self.inner.registry.register(nonce.clone(), origin, None);
        self.inner.send_request(
            FrameMessage::Fetch {
                nonce: nonce.clone(),
                url: url.into(),
                params,
                form_data,
            },
            Vec::new(),
        );
        if let Some(signal) = signal {
            self.inner.forward_abort(nonce, signal, settled);
        }
        response
    }

    /// Open an event stream on the other side.
    ///
    /// `on_message` receives every message as it is pushed. The future
    /// resolves with `null` once the stream ends or is aborted, and rejects
    /// with the fatal error otherwise.
    ///
    /// # Errors
    /// Returns an `IntegrationError` for a form body, which streams do not support.
    #[track_caller]
    pub fn fetch_event_source<F>(
        &self,
        url: impl Into<String>,
        init: RequestInit,
        on_message: F,
    ) -> std::result::Result<ResponseFuture, ChatKitError>
    where
        F: Fn(EventSourceMessage) + Send + Sync + 'static,
    {
        let origin = Location::caller();
        if matches!(init.body, Some(RequestBody::Form(_))) {
            return Err(ChatKitError::integration(
                "fetchEventSource does not support FormData bodies.",
            ));
        }
        let (params, _, signal) = init.into_parts();

        let nonce = Nonce::new();
        let callback: MessageCallback = Arc::new(on_message);
        let (response, settled) = self
            .inner
            .registry
            .register(nonce.clone(), origin, Some(callback));
        self.inner.send_request(
            FrameMessage::FetchEventSource {
                nonce: nonce.clone(),
                url: url.into(),
                params,
            },
            Vec::new(),
        );
        if let Some(signal) = signal {
            self.inner.forward_abort(nonce, signal, settled);
        }
        Ok(response)
    }

    /// Post a one-way event.
    ///
    /// # Errors
    /// Returns [`MessengerError::TargetUnavailable`] when there is no target window.
    pub fn emit(&self, event: impl Into<String>, data: Value) -> Result<()> {
        self.emit_with_transfer(event, data, Vec::new())
    }

    /// [`emit`](Self::emit), moving `transfer` buffers with the message.
    ///
    /// # Errors
    /// Returns [`MessengerError::TargetUnavailable`] when there is no target window.
    pub fn emit_with_transfer(
        &self,
        event: impl Into<String>,
        data: Value,
        transfer: Vec<Bytes>,
    ) -> Result<()> {
        self.inner.send(
            FrameMessage::Event {
                event: event.into(),
                data,
            },
            transfer,
        )
    }

    /// Listen for events posted by the other side.
    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.inner.emitter.on(event, Arc::new(listener))
    }

    /// Remove one listener, or all listeners for `event` when `id` is `None`.
    pub fn off(&self, event: &str, id: Option<ListenerId>) -> usize {
        self.inner.emitter.off(event, id)
    }

    /// Replace the gate applied to outbound commands.
    pub fn set_capabilities(&self, gate: CapabilityGate) {
        *self.inner.capabilities.write() = gate;
    }

    #[must_use]
    pub fn capabilities(&self) -> CapabilityGate {
        self.inner.capabilities.read().clone()
    }

    /// Requests still waiting for their response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.registry.len()
    }

    /// Operations running on behalf of the other side.
    #[must_use]
    pub fn served_operations(&self) -> usize {
        self.inner.aborts.len()
    }
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("window", &self.inner.window)
            .field("target_origin", &self.inner.config.target_origin)
            .field("handlers", &self.inner.handlers)
            .field("pending", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn disconnect(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        let drained = self.registry.drain_all();
        let aborted = self.aborts.abort_all();
        debug!(
            window = %self.window.id(),
            drained,
            aborted,
            "Messenger disconnected"
        );
    }

    fn send(&self, message: FrameMessage, transfer: Vec<Bytes>) -> Result<()> {
        let target = (self.target)().ok_or(MessengerError::TargetUnavailable)?;
        let kind = message.kind();
        let data = Envelope::new(message).to_value()?;
        if !target.post_message(data, &self.config.target_origin, &self.window, transfer) {
            trace!(kind, target_origin = %self.config.target_origin, "Message dropped by target");
        }
        Ok(())
    }

    /// Post a request whose nonce is already registered, rejecting it when
    /// posting fails.
    fn send_request(&self, message: FrameMessage, transfer: Vec<Bytes>) {
        let nonce = message.nonce().cloned();
        if let Err(error) = self.send(message, transfer) {
            warn!(%error, "Failed to post request");
            if let Some(nonce) = nonce {
                self.registry.reject(&nonce, error);
            }
        }
    }

    fn respond(&self, nonce: Nonce, outcome: std::result::Result<Option<Value>, Value>) {
        let (response, error) = match outcome {
            Ok(response) => (response, None),
            Err(error) => (None, Some(error)),
        };
        let message = FrameMessage::Response {
            nonce,
            response,
            error,
        };
        if let Err(error) = self.send(message, Vec::new()) {
            warn!(%error, "Failed to post response");
        }
    }

    /// Post `abortSignal` when `signal` aborts before the request settles.
    fn forward_abort(self: &Arc<Self>, nonce: Nonce, signal: AbortSignal, settled: AbortSignal) {
        if let Some(reason) = signal.reason() {
            self.send_abort(nonce, reason);
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(%nonce, "No runtime to watch abort signal");
            return;
        };
        let weak = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = settled.aborted() => {}
                reason = signal.aborted() => {
                    if let Some(inner) = weak.upgrade() {
                        inner.send_abort(nonce, reason);
                    }
                }
            }
        });
    }

    fn send_abort(&self, nonce: Nonce, reason: Value) {
        debug!(%nonce, "Forwarding abort");
        let message = FrameMessage::AbortSignal {
            nonce,
            reason: Some(reason),
        };
        if let Err(error) = self.send(message, Vec::new()) {
            warn!(%error, "Failed to post abortSignal");
        }
    }

    fn accepts(&self, event: &MessageEvent) -> bool {
        if !event.data.is_object() {
            return false;
        }
        if !self.config.is_wildcard() && event.origin != self.config.target_origin {
            trace!(origin = %event.origin, "Ignoring message from unexpected origin");
            return false;
        }
        let expected = (self.target)().map(|target| target.id());
        if expected.is_none() || event.source != expected {
            trace!(source = ?event.source, "Ignoring message from unexpected source");
            return false;
        }
        true
    }

    fn handle_message(self: &Arc<Self>, event: MessageEvent) {
        if !self.accepts(&event) {
            return;
        }
        let MessageEvent { data, transfer, .. } = event;
        let message = match Envelope::from_value(data) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(error) => {
                warn!(%error, "Dropping malformed envelope");
                return;
            }
        };
        debug!(
            kind = message.kind(),
            nonce = message.nonce().map(Nonce::as_str),
            "Received message"
        );

        match message {
            FrameMessage::Command {
                nonce,
                command,
                data,
            } => self.handle_command(nonce, command, Payload::with_transfer(data, transfer)),
            FrameMessage::Response {
                nonce,
                response,
                error,
            } => {
                match error {
                    Some(error) => self.registry.reject(&nonce, MessengerError::from_remote(error)),
                    None => self.registry.resolve(&nonce, response.unwrap_or(Value::Null)),
                };
            }
            FrameMessage::Fetch {
                nonce,
                url,
                params,
                form_data,
            } => {
                let signal = self.aborts.insert(nonce.clone());
                let request = HttpRequest::from_params(url, params, form_data);
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = inner.serve_fetch(request, signal).await;
                    inner.aborts.complete(&nonce);
                    inner.respond(nonce, outcome.map(Some));
                });
            }
            FrameMessage::FetchEventSource { nonce, url, params } => {
                let signal = self.aborts.insert(nonce.clone());
                let request = HttpRequest::from_params(url, params, None);
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = inner.serve_event_source(&nonce, request, signal).await;
                    inner.aborts.complete(&nonce);
                    inner.respond(nonce, outcome.map(|()| None).map_err(|e| e.to_value()));
                });
            }
            FrameMessage::FetchEventSourceMessage { nonce, message } => {
                self.registry.deliver(&nonce, message);
            }
            FrameMessage::AbortSignal { nonce, reason } => {
                if !self.aborts.abort(&nonce, reason) {
                    debug!(%nonce, "abortSignal for finished operation");
                }
            }
            FrameMessage::Event { event, data } => {
                self.emitter
                    .emit(&event, &Payload::with_transfer(data, transfer));
            }
        }
    }

    fn handle_command(self: &Arc<Self>, nonce: Nonce, command: String, payload: Payload) {
        if !self.receive_gate.can_receive_command(&command) {
            let error = self.receive_gate.unsupported_command(&command);
            warn!(%nonce, %command, "Refusing command");
            self.respond(nonce, Err(error.to_value()));
            return;
        }
        let Some(handler) = self.handlers.get(&command) else {
            let error = ChatKitError::integration(format!(
                "No handler registered for ChatKit command \"{command}\"."
            ));
            warn!(%nonce, %command, "No handler for command");
            self.respond(nonce, Err(error.to_value()));
            return;
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { handler(payload).await })
                .catch_unwind()
                .await;
            let outcome = match outcome {
                Ok(Ok(value)) => Ok(Some(value)),
                Ok(Err(error)) => Err(error.to_value()),
                Err(_) => Err(ChatKitError::new(
                    ErrorKind::Unhandled,
                    format!("handler for \"{command}\" panicked"),
                )
                .to_value()),
            };
            inner.respond(nonce, outcome);
        });
    }

    async fn serve_fetch(&self, request: HttpRequest, signal: AbortSignal) -> std::result::Result<Value, Value> {
        let url = request.url.clone();
        let serve = self.serve_fetch_inner(request, signal);
        match self.config.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, serve).await.unwrap_or_else(|_| {
                warn!(%url, "Proxied fetch timed out");
                Err(ChatKitError::new(
                    ErrorKind::Network,
                    format!("request to {url} timed out after {}ms", timeout.as_millis()),
                )
                .to_value())
            }),
            None => serve.await,
        }
    }

    async fn serve_fetch_inner(
        &self,
        request: HttpRequest,
        signal: AbortSignal,
    ) -> std::result::Result<Value, Value> {
        let response = self
            .fetcher
            .fetch(request, signal.clone())
            .await
            .map_err(fetch_error_value)?;

        if !response.ok() {
            return Err(http_error(response, &signal).await.to_value());
        }

        let body = read_body(response, &signal).await.map_err(fetch_error_value)?;
        Ok(serde_json::from_slice(&body).unwrap_or_else(|_| json!({})))
    }

    async fn serve_event_source(
        self: &Arc<Self>,
        nonce: &Nonce,
        request: HttpRequest,
        signal: AbortSignal,
    ) -> std::result::Result<(), ChatKitError> {
        let relay = Arc::clone(self);
        let relay_nonce = nonce.clone();
        fetch_event_source_with_retry(
            self.fetcher.as_ref(),
            request,
            signal,
            self.config.retry,
            move |message| {
                let message = FrameMessage::FetchEventSourceMessage {
                    nonce: relay_nonce.clone(),
                    message,
                };
                if let Err(error) = relay.send(message, Vec::new()) {
                    warn!(%error, "Failed to relay stream message");
                }
            },
        )
        .await
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

async fn read_body(response: HttpResponse, signal: &AbortSignal) -> std::result::Result<Bytes, FetchError> {
    tokio::select! {
        biased;
        reason = signal.aborted() => Err(FetchError::Aborted { reason }),
        body = response.bytes() => body,
    }
}

/// `HttpError` for a non-2xx response, using the body's `message` when the
/// body is JSON and carries one.
async fn http_error(response: HttpResponse, signal: &AbortSignal) -> ChatKitError {
    let status = response.status;
    let status_text = response.status_text.clone();
    let request_id = response.header("x-request-id").map(str::to_string);

    let message = read_body(response, signal)
        .await
        .ok()
        .and_then(|body| serde_json::from_slice::<Value>(&body).ok())
        .and_then(|body| {
            body.get("message")
                .and_then(Value::as_str)
                .filter(|message| !message.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| status_text.clone());

    let error = ChatKitError::http(message, status, status_text);
    match request_id {
        Some(request_id) => error.with_metadata(ResponseMetadata::with_request_id(request_id)),
        None => error,
    }
}

fn fetch_error_value(error: FetchError) -> Value {
    match error {
        FetchError::Aborted { reason } => abort_error_value(Some(reason)),
        other => ChatKitError::wrap(ErrorKind::Network, other).to_value(),
    }
}

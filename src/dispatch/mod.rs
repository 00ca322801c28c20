// src/dispatch/mod.rs
//
// Match-and-route dispatch engine.
//
// Handlers are registered once at startup together with one or more match
// predicates. Every decoded frame is tested against every registration in
// registration order and every match is delivered; a claim never stops fan-out.
// The engine runs on a single task, so handlers mutate their own state freely.

mod cache;
mod predicate;

pub use cache::StateCache;
pub use predicate::{matches, Expected, MatchPredicate};

use std::collections::{HashMap, HashSet};

use crate::error::{EncodeError, TransportError};
use crate::io::Publisher;
use crate::rvc::codec::encode_by_name;
use crate::rvc::value::{DecodedMessage, FieldMap};
use crate::rvc::{OutboundFrame, SchemaRegistry};

/// Index of a handler inside its [`Dispatcher`].
pub type HandlerId = usize;

/// Identifies which of a handler's own registrations matched.
pub type Route = usize;

// ============================================================================
// Context
// ============================================================================

/// What a handler may touch while it runs: the schema registry for encoding,
/// the publisher, and an outbox of frames the bridge forwards to CAN egress.
pub struct DispatchContext<'a> {
    registry: &'a SchemaRegistry,
    publisher: &'a dyn Publisher,
    outbox: Vec<OutboundFrame>,
}

impl<'a> DispatchContext<'a> {
    pub fn new(registry: &'a SchemaRegistry, publisher: &'a dyn Publisher) -> Self {
        Self {
            registry,
            publisher,
            outbox: Vec::new(),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        self.registry
    }

    /// Publish and log on failure. The error is returned for handlers that care;
    /// most ignore it since their cache has already moved on.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl AsRef<[u8]>,
        retain: bool,
    ) -> Result<(), TransportError> {
        let result = self.publisher.publish(topic, payload.as_ref(), retain);
        if let Err(e) = &result {
            tracing::warn!(topic, error = %e, "publish failed");
        }
        result
    }

    /// Queue a raw frame for CAN egress.
    pub fn send(&mut self, frame: OutboundFrame) {
        self.outbox.push(frame);
    }

    /// Encode by DGN name and queue. On error nothing is queued.
    pub fn send_fields(&mut self, dgn_name: &str, fields: &FieldMap) -> Result<(), EncodeError> {
        let (dgn, data) = encode_by_name(self.registry, dgn_name, fields)?;
        self.outbox.push(OutboundFrame::new(dgn, data));
        Ok(())
    }

    pub fn pending(&self) -> &[OutboundFrame] {
        &self.outbox
    }

    pub fn take_outbox(&mut self) -> Vec<OutboundFrame> {
        std::mem::take(&mut self.outbox)
    }
}

// ============================================================================
// Handler
// ============================================================================

pub trait Handler: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Predicates registered for this handler, in route order.
    fn registrations(&self) -> Vec<MatchPredicate>;

    /// Called for every matching registration. Returns true when the message was
    /// claimed, which only suppresses the unhandled sink.
    fn on_message(
        &mut self,
        route: Route,
        msg: &DecodedMessage,
        ctx: &mut DispatchContext<'_>,
    ) -> bool;

    /// Called once after all handlers are registered.
    fn initialize(&mut self, _ctx: &mut DispatchContext<'_>) {}

    /// Exact MQTT topics this handler accepts commands on.
    fn command_topics(&self) -> Vec<String> {
        Vec::new()
    }

    fn on_command(&mut self, _topic: &str, _payload: &[u8], _ctx: &mut DispatchContext<'_>) {}
}

/// Receives messages no handler claimed.
pub trait UnhandledSink: Send {
    fn unhandled(&mut self, msg: &DecodedMessage, ctx: &mut DispatchContext<'_>);
}

/// Logs the first sighting of each unhandled DGN at info and repeats at trace.
/// Optionally republishes the decoded message as JSON.
#[derive(Debug, Default)]
pub struct LogUnhandled {
    seen: HashSet<String>,
    topic: Option<String>,
}

impl LogUnhandled {
    pub fn new(topic: Option<String>) -> Self {
        Self {
            seen: HashSet::new(),
            topic,
        }
    }
}

impl UnhandledSink for LogUnhandled {
    fn unhandled(&mut self, msg: &DecodedMessage, ctx: &mut DispatchContext<'_>) {
        let name = msg.name().unwrap_or("unknown").to_string();
        let json = serde_json::to_string(msg).unwrap_or_default();
        if self.seen.insert(name.clone()) {
            tracing::info!(dgn = %name, msg = %json, "unhandled DGN");
        } else {
            tracing::trace!(dgn = %name, msg = %json, "unhandled DGN");
        }
        if let Some(topic) = &self.topic {
            let _ = ctx.publish(topic, json, false);
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Number of registrations whose predicate matched.
    pub matched: usize,
    /// At least one handler claimed the message.
    pub claimed: bool,
}

struct Registration {
    predicate: MatchPredicate,
    handler: HandlerId,
    route: Route,
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: Vec<Box<dyn Handler>>,
    registrations: Vec<Registration>,
    command_routes: HashMap<String, HandlerId>,
    unhandled: Option<Box<dyn UnhandledSink>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unhandled_sink(mut self, sink: Box<dyn UnhandledSink>) -> Self {
        self.unhandled = Some(sink);
        self
    }

    /// Register a handler with its own predicates and command topics.
    /// A command topic already owned by another handler stays with the first owner.
    pub fn add_handler(&mut self, handler: Box<dyn Handler>) -> HandlerId {
        let id = self.handlers.len();
        for (route, predicate) in handler.registrations().into_iter().enumerate() {
            tracing::debug!(handler = handler.name(), route, %predicate, "registered");
            self.registrations.push(Registration {
                predicate,
                handler: id,
                route,
            });
        }
        for topic in handler.command_topics() {
            if let Some(owner) = self.command_routes.get(&topic) {
                tracing::warn!(
                    topic = %topic,
                    owner = self.handlers[*owner].name(),
                    handler = handler.name(),
                    "command topic already registered"
                );
                continue;
            }
            self.command_routes.insert(topic, id);
        }
        self.handlers.push(handler);
        id
    }

    /// Add another predicate for an existing handler.
    pub fn register(&mut self, handler: HandlerId, predicate: MatchPredicate, route: Route) {
        self.registrations.push(Registration {
            predicate,
            handler,
            route,
        });
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn handler_name(&self, id: HandlerId) -> Option<&str> {
        self.handlers.get(id).map(|h| h.name())
    }

    /// Topic to owning handler, for the command subscriber.
    pub fn command_routes(&self) -> &HashMap<String, HandlerId> {
        &self.command_routes
    }

    pub fn initialize(&mut self, ctx: &mut DispatchContext<'_>) {
        for handler in &mut self.handlers {
            tracing::debug!(handler = handler.name(), "initialize");
            handler.initialize(ctx);
        }
    }

    pub fn dispatch(
        &mut self,
        msg: &DecodedMessage,
        ctx: &mut DispatchContext<'_>,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for reg in &self.registrations {
            if !reg.predicate.matches(msg) {
                continue;
            }
            outcome.matched += 1;
            let handler = &mut self.handlers[reg.handler];
            let claimed = handler.on_message(reg.route, msg, ctx);
            tracing::trace!(handler = handler.name(), route = reg.route, claimed, "delivered");
            outcome.claimed |= claimed;
        }
        if !outcome.claimed {
            if let Some(sink) = self.unhandled.as_mut() {
                sink.unhandled(msg, ctx);
            }
        }
        outcome
    }

    /// Deliver a command to the handler that owns `topic`. Returns false when no
    /// handler owns it.
    pub fn command(&mut self, topic: &str, payload: &[u8], ctx: &mut DispatchContext<'_>) -> bool {
        match self.command_routes.get(topic) {
            Some(&id) => {
                self.command_to(id, topic, payload, ctx);
                true
            }
            None => false,
        }
    }

    pub fn command_to(
        &mut self,
        id: HandlerId,
        topic: &str,
        payload: &[u8],
        ctx: &mut DispatchContext<'_>,
    ) {
        if let Some(handler) = self.handlers.get_mut(id) {
            tracing::debug!(handler = handler.name(), topic, "command");
            handler.on_command(topic, payload, ctx);
        }
    }
}

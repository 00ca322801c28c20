// src/bridge.rs
//
// Runtime wiring.
//
//   CAN reader ──ingress──▶ dispatch loop ──egress──▶ CAN writer
//                               ▲    │
//   MQTT event loop ──commands──┘    └──▶ MQTT publish
//
// The dispatch loop is the only place handlers run. Frames and commands are
// processed one at a time in arrival order; outbound frames produced by a
// handler are flushed to egress before the next item is taken.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::dispatch::{DispatchContext, Dispatcher, LogUnhandled};
use crate::entity::{build_entities, TopicScheme};
use crate::error::DecodeError;
use crate::io::{self, egress_channel, mqtt, socketcan, EgressQueue, MqttCommand, Publisher};
use crate::rvc::codec::decode_frame;
use crate::rvc::{format_dgn, OutboundFrame, RvcFrame, SchemaRegistry};
use crate::settings::Settings;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Frame and command counters, logged at shutdown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub frames: u64,
    pub decoded: u64,
    pub unknown: u64,
    pub unclaimed: u64,
    pub commands: u64,
    pub unrouted_commands: u64,
}

/// Dispatch core: registry, handlers and the publisher they write to.
/// Transport free so it can be driven directly in tests.
pub struct Engine<P: Publisher> {
    registry: Arc<SchemaRegistry>,
    dispatcher: Dispatcher,
    publisher: P,
    unknown_seen: HashSet<u32>,
    stats: BridgeStats,
}

impl<P: Publisher> Engine<P> {
    pub fn new(registry: Arc<SchemaRegistry>, dispatcher: Dispatcher, publisher: P) -> Self {
        Self {
            registry,
            dispatcher,
            publisher,
            unknown_seen: HashSet::new(),
            stats: BridgeStats::default(),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn command_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.dispatcher.command_routes().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Run every handler's `initialize`. Returns the frames they queued.
    pub fn initialize(&mut self) -> Vec<OutboundFrame> {
        let mut ctx = DispatchContext::new(&self.registry, &self.publisher);
        self.dispatcher.initialize(&mut ctx);
        ctx.take_outbox()
    }

    /// Decode and dispatch one frame. Decode failures are logged and dropped.
    pub fn process_frame(&mut self, frame: &RvcFrame) -> Vec<OutboundFrame> {
        self.stats.frames += 1;
        let msg = match decode_frame(&self.registry, frame) {
            Ok(msg) => msg,
            Err(DecodeError::UnknownDgn(dgn)) => {
                self.stats.unknown += 1;
                if self.unknown_seen.insert(dgn) {
                    tracing::debug!(dgn = %format_dgn(dgn), "unknown DGN");
                }
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(id = %format!("{:08X}", frame.arbitration_id), error = %e, "dropped frame");
                return Vec::new();
            }
        };
        self.stats.decoded += 1;

        let mut ctx = DispatchContext::new(&self.registry, &self.publisher);
        let outcome = self.dispatcher.dispatch(&msg, &mut ctx);
        if !outcome.claimed {
            self.stats.unclaimed += 1;
        }
        ctx.take_outbox()
    }

    /// Route one MQTT command to the handler owning its topic.
    pub fn process_command(&mut self, command: &MqttCommand) -> Vec<OutboundFrame> {
        self.stats.commands += 1;
        let mut ctx = DispatchContext::new(&self.registry, &self.publisher);
        if !self.dispatcher.command(&command.topic, &command.payload, &mut ctx) {
            self.stats.unrouted_commands += 1;
            tracing::debug!(topic = %command.topic, "no handler for command topic");
        }
        ctx.take_outbox()
    }
}

/// Built-in catalog, or the configured one in its place.
pub fn load_registry(catalog: Option<&Path>) -> Result<Arc<SchemaRegistry>, String> {
    let registry = match catalog {
        Some(path) => SchemaRegistry::from_path(path)
            .map_err(|e| format!("Failed to load catalog: {}", e))?,
        None => SchemaRegistry::builtin().clone(),
    };
    tracing::info!(
        catalog = registry.name(),
        version = registry.version(),
        dgns = registry.len(),
        "schema loaded"
    );
    Ok(Arc::new(registry))
}

/// Why [`dispatch_loop`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Shutdown,
    IngressClosed,
}

/// Handle frames and commands until `shutdown` resolves or ingress closes.
///
/// `shutdown` is created once by the caller and polled across iterations, so a
/// signal raised while a frame is being handled is seen on the next turn.
pub async fn dispatch_loop<P, F>(
    engine: &mut Engine<P>,
    ingress_rx: &mut mpsc::Receiver<RvcFrame>,
    command_rx: &mut mpsc::Receiver<MqttCommand>,
    egress: &EgressQueue,
    shutdown: F,
) -> LoopExit
where
    P: Publisher,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => return LoopExit::Shutdown,
            frame = ingress_rx.recv() => match frame {
                Some(frame) => {
                    let out = engine.process_frame(&frame);
                    egress.submit_all(out).await;
                }
                None => return LoopExit::IngressClosed,
            },
            Some(command) = command_rx.recv() => {
                let out = engine.process_command(&command);
                egress.submit_all(out).await;
            }
        }
    }
}

/// Close ingress and dispatch the frames already queued on it.
pub async fn drain_ingress<P: Publisher>(
    engine: &mut Engine<P>,
    ingress_rx: &mut mpsc::Receiver<RvcFrame>,
    egress: &EgressQueue,
) {
    ingress_rx.close();
    while let Some(frame) = ingress_rx.recv().await {
        let out = engine.process_frame(&frame);
        egress.submit_all(out).await;
    }
}

/// Run the bridge until Ctrl-C.
pub async fn run(settings: Settings) -> Result<(), String> {
    let registry = load_registry(settings.catalog.as_deref())?;

    let client_id = settings.mqtt.resolve_client_id();
    let topics = TopicScheme::new(&settings.mqtt.topic_base, &client_id);
    let state_topic = topics.bridge_state();

    let unhandled_topic = settings.mqtt.publish_unhandled.then(|| topics.unhandled());
    let mut dispatcher = Dispatcher::new().with_unhandled_sink(Box::new(LogUnhandled::new(unhandled_topic)));
    for handler in build_entities(&settings.entities, &topics).map_err(|e| e.to_string())? {
        dispatcher.add_handler(handler);
    }
    tracing::info!(
        entities = dispatcher.len(),
        registrations = dispatcher.registration_count(),
        "floor plan loaded"
    );

    // MQTT
    let mqtt_config = settings.mqtt.client_config(&client_id, state_topic.clone());
    let (publisher, eventloop) = mqtt::connect(&mqtt_config, settings.mqtt.command_capacity);
    let mut engine = Engine::new(registry, dispatcher, publisher.clone());

    let stop = Arc::new(AtomicBool::new(false));
    let (command_tx, mut command_rx) = mpsc::channel::<MqttCommand>(settings.mqtt.command_capacity.max(1));
    let mqtt_task = tokio::spawn(mqtt::run_event_loop(
        publisher.clone(),
        eventloop,
        state_topic.clone(),
        engine.command_topics(),
        command_tx,
        stop.clone(),
    ));
    tracing::info!(host = %mqtt_config.host, port = mqtt_config.port, client_id = %client_id, "MQTT client started");

    // CAN
    let can = &settings.can;
    let writer = socketcan::open_writer(&can.interface).map_err(|e| e.to_string())?;
    let (egress, egress_rx) = egress_channel(can.egress_capacity, can.egress_timeout());
    let egress_task = tokio::spawn(io::run_egress(egress_rx, writer, can.source_address, can.priority));

    let (ingress_tx, mut ingress_rx) = mpsc::channel::<RvcFrame>(can.ingress_capacity.max(1));
    let reader = socketcan::spawn_reader(&can.interface, can.poll_timeout(), ingress_tx, stop.clone())
        .map_err(|e| e.to_string())?;

    egress.submit_all(engine.initialize()).await;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let exit = dispatch_loop(&mut engine, &mut ingress_rx, &mut command_rx, &egress, shutdown).await;
    match exit {
        LoopExit::Shutdown => tracing::info!("shutdown requested"),
        LoopExit::IngressClosed => tracing::error!(interface = %can.interface, "CAN reader stopped"),
    }

    // Stop the reader, then dispatch whatever it already queued.
    stop.store(true, Ordering::Relaxed);
    drain_ingress(&mut engine, &mut ingress_rx, &egress).await;
    if let Err(e) = reader.await {
        tracing::warn!(error = %e, "CAN reader task failed");
    }

    drop(egress);
    if tokio::time::timeout(SHUTDOWN_GRACE, egress_task).await.is_err() {
        tracing::warn!("egress did not drain before shutdown");
    }

    publisher.shutdown(&state_topic);
    if tokio::time::timeout(SHUTDOWN_GRACE, mqtt_task).await.is_err() {
        tracing::warn!("MQTT disconnect timed out");
    }

    let stats = engine.stats();
    tracing::info!(
        frames = stats.frames,
        decoded = stats.decoded,
        unknown = stats.unknown,
        unclaimed = stats.unclaimed,
        commands = stats.commands,
        "bridge stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::testing::{RecordingPublisher, RecordingSink};
    use std::io::Write;

    fn floor_plan() -> Vec<toml::Table> {
        #[derive(serde::Deserialize)]
        struct Doc {
            entity: Vec<toml::Table>,
        }
        let doc: Doc = toml::from_str(
            r#"
[[entity]]
type = "dimmer_switch"
name = "DC_DIMMER_STATUS_3"
instance = 32
instance_name = "bed"
"#,
        )
        .unwrap();
        doc.entity
    }

    fn engine() -> Engine<RecordingPublisher> {
        let topics = TopicScheme::new("rvc2mqtt", "b");
        let mut dispatcher = Dispatcher::new();
        for handler in build_entities(&floor_plan(), &topics).unwrap() {
            dispatcher.add_handler(handler);
        }
        Engine::new(
            load_registry(None).unwrap(),
            dispatcher,
            RecordingPublisher::default(),
        )
    }

    const STATE: &str = "rvc2mqtt/b/d/dimmer-1fedb-i32/state";
    const SET: &str = "rvc2mqtt/b/d/dimmer-1fedb-i32/set";

    #[test]
    fn test_status_frame_publishes_once() {
        let mut e = engine();
        let frame = RvcFrame::new(0x19FEDA80, [0x20, 0xFF, 0x00, 0xFC, 0xFF, 0x03, 0xFF, 0xFF]);
        assert!(e.process_frame(&frame).is_empty());
        assert!(e.process_frame(&frame).is_empty());
        assert_eq!(e.publisher.payloads(STATE), vec!["off"]);
        assert_eq!(e.stats().decoded, 2);
        assert_eq!(e.stats().unclaimed, 0);
    }

    #[test]
    fn test_unknown_and_unclaimed_frames_are_counted() {
        let mut e = engine();
        e.process_frame(&RvcFrame::new(0x19F0F180, [0; 8]));
        // Tank status decodes but nobody claims it.
        e.process_frame(&RvcFrame::new(0x19FFB780, [0, 50, 100, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]));
        let stats = e.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.decoded, 1);
        assert_eq!(stats.unclaimed, 1);
        assert!(e.publisher.messages().is_empty());
    }

    #[test]
    fn test_command_produces_toggle_frame() {
        let mut e = engine();
        assert_eq!(e.command_topics(), vec![SET.to_string()]);

        let init = e.initialize();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].dgn, 0x0EAFF);

        let out = e.process_command(&MqttCommand {
            topic: SET.to_string(),
            payload: b"on".to_vec(),
        });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dgn, 0x1FEDB);

        let out = e.process_command(&MqttCommand {
            topic: "rvc2mqtt/b/d/nothing/set".to_string(),
            payload: b"on".to_vec(),
        });
        assert!(out.is_empty());
        assert_eq!(e.stats().unrouted_commands, 1);
    }

    #[tokio::test]
    async fn test_outbox_reaches_sink_in_order() {
        let mut e = engine();
        let (egress, rx) = egress_channel(8, Duration::from_millis(50));
        let sink = RecordingSink::default();
        let frames = sink.frames.clone();
        let task = tokio::spawn(io::run_egress(rx, Box::new(sink), 0x82, 6));

        egress.submit_all(e.initialize()).await;
        let out = e.process_command(&MqttCommand {
            topic: SET.to_string(),
            payload: b"on".to_vec(),
        });
        egress.submit_all(out).await;
        drop(egress);
        task.await.unwrap();

        let sent = frames.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, 0x18EAFF82);
        assert_eq!(sent[1], (0x19FEDB82, [0x20, 0xFF, 0xFA, 0x05, 0xFF, 0xFC, 0xFF, 0xFF]));
    }

    #[tokio::test]
    async fn test_loop_stops_on_signal_raised_while_busy() {
        let mut e = engine();
        let (ingress_tx, mut ingress_rx) = mpsc::channel(8);
        let (_command_tx, mut command_rx) = mpsc::channel::<MqttCommand>(8);
        let (egress, _egress_rx) = egress_channel(8, Duration::from_millis(50));
        let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();

        let off = RvcFrame::new(0x19FEDA80, [0x20, 0xFF, 0x00, 0xFC, 0xFF, 0x03, 0xFF, 0xFF]);
        ingress_tx.send(off.clone()).await.unwrap();
        ingress_tx.send(off.clone()).await.unwrap();
        signal_tx.send(()).unwrap();

        let shutdown = async move {
            let _ = signal_rx.await;
        };
        let exit = tokio::time::timeout(
            Duration::from_secs(1),
            dispatch_loop(&mut e, &mut ingress_rx, &mut command_rx, &egress, shutdown),
        )
        .await
        .unwrap();
        assert_eq!(exit, LoopExit::Shutdown);

        // Whatever the loop left behind is still dispatched.
        drain_ingress(&mut e, &mut ingress_rx, &egress).await;
        assert_eq!(e.stats().frames, 2);
        assert_eq!(e.publisher.payloads(STATE), vec!["off"]);
        assert!(ingress_tx.send(off).await.is_err());
    }

    #[tokio::test]
    async fn test_loop_ends_when_ingress_closes() {
        let mut e = engine();
        let (ingress_tx, mut ingress_rx) = mpsc::channel::<RvcFrame>(8);
        let (_command_tx, mut command_rx) = mpsc::channel::<MqttCommand>(8);
        let (egress, _egress_rx) = egress_channel(8, Duration::from_millis(50));
        drop(ingress_tx);

        let exit = dispatch_loop(
            &mut e,
            &mut ingress_rx,
            &mut command_rx,
            &egress,
            std::future::pending::<()>(),
        )
        .await;
        assert_eq!(exit, LoopExit::IngressClosed);
    }

    #[test]
    fn test_custom_catalog_replaces_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[meta]
name = "custom"
version = 2

[[dgn]]
id = "1FEDA"
name = "DC_DIMMER_STATUS_3"

[[dgn.field]]
name = "instance"
start_bit = 0
bit_length = 8
kind = "unsigned_int"
"#
        )
        .unwrap();
        let registry = load_registry(Some(file.path())).unwrap();
        assert_eq!(registry.name(), "custom");
        assert_eq!(registry.len(), 1);

        assert!(load_registry(Some(Path::new("/nonexistent.toml"))).is_err());
    }
}

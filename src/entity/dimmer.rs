// src/entity/dimmer.rs
//
// DC dimmer load exposed as an on/off light.

use super::{EntityConfig, TopicScheme};
use crate::dispatch::{DispatchContext, Handler, MatchPredicate, Route, StateCache};
use crate::error::ConfigError;
use crate::rvc::value::{field_map, DecodedMessage, FieldValue};
use crate::rvc::OutboundFrame;

const STATUS: &str = "DC_DIMMER_STATUS_3";
const COMMAND: &str = "DC_DIMMER_COMMAND_2";
const STATUS_DGN: u32 = 0x1FEDA;
const DEFAULT_GROUP: &str = "11111111";

const ON: &str = "on";
const OFF: &str = "off";
const UNKNOWN: &str = "unknown";

pub struct DimmerSwitch {
    name: String,
    instance: u8,
    group: String,
    status_topic: String,
    command_topic: String,
    state: String,
    cache: StateCache,
}

impl DimmerSwitch {
    pub fn from_config(cfg: &EntityConfig<'_>, topics: &TopicScheme) -> Result<Self, ConfigError> {
        Self::build(cfg, topics, "dimmer")
    }

    /// Tank heaters hang off dimmer channels and switch the same way.
    pub fn tank_heater(cfg: &EntityConfig<'_>, topics: &TopicScheme) -> Result<Self, ConfigError> {
        Self::build(cfg, topics, "tank_warmer")
    }

    fn build(cfg: &EntityConfig<'_>, topics: &TopicScheme, kind: &str) -> Result<Self, ConfigError> {
        let instance = cfg.instance()?;
        let id = format!("{}-1FEDB-i{}", kind, instance);
        let status_topic = cfg
            .str("status_topic")
            .map(str::to_string)
            .unwrap_or_else(|| topics.device(&id, None, true));
        let command_topic = match (cfg.str("command_topic"), cfg.str("status_topic")) {
            (Some(topic), _) => topic.to_string(),
            (None, Some(status)) => format!("{}/set", status),
            (None, None) => topics.device(&id, None, false),
        };
        Ok(Self {
            name: cfg.instance_name().to_string(),
            instance,
            group: cfg.str("group").unwrap_or(DEFAULT_GROUP).to_string(),
            status_topic,
            command_topic,
            state: UNKNOWN.to_string(),
            cache: StateCache::new(),
        })
    }

    fn publish_state(&mut self, ctx: &DispatchContext<'_>) {
        if self.cache.changed("state", &self.state) {
            let _ = ctx.publish(&self.status_topic, self.state.as_bytes(), true);
        }
    }

    /// Bits the command leaves undeclared (byte 5 above the interlock, byte 7)
    /// go out as ones, the RV-C "no data" fill.
    fn toggle(&self, ctx: &mut DispatchContext<'_>) {
        let fields = field_map([
            ("instance", FieldValue::Unsigned(self.instance as u64)),
            ("group", FieldValue::Bits(self.group.clone())),
            ("desired_level", FieldValue::Float(125.0)),
            ("command", FieldValue::from("toggle")),
            ("delay_duration", FieldValue::Unsigned(255)),
            ("interlock", FieldValue::Bits("00".to_string())),
        ]);
        if let Err(e) = ctx.send_fields(COMMAND, &fields) {
            tracing::error!(entity = %self.name, error = %e, "failed to encode toggle");
        }
    }
}

impl Handler for DimmerSwitch {
    fn name(&self) -> &str {
        &self.name
    }

    fn registrations(&self) -> Vec<MatchPredicate> {
        vec![
            MatchPredicate::named(STATUS).with("instance", self.instance),
            // Commands from other nodes are ours to swallow.
            MatchPredicate::named(COMMAND).with("instance", self.instance),
        ]
    }

    fn on_message(&mut self, route: Route, msg: &DecodedMessage, ctx: &mut DispatchContext<'_>) -> bool {
        if route != 0 {
            return true;
        }
        match msg.f64("operating_status_brightness") {
            Some(brightness) => {
                self.state = if brightness != 0.0 { ON } else { OFF }.to_string();
                self.publish_state(ctx);
            }
            None => tracing::debug!(entity = %self.name, "brightness not available"),
        }
        true
    }

    fn initialize(&mut self, ctx: &mut DispatchContext<'_>) {
        self.publish_state(ctx);
        ctx.send(OutboundFrame::iso_request(STATUS_DGN, 0xFF, self.instance));
    }

    fn command_topics(&self) -> Vec<String> {
        vec![self.command_topic.clone()]
    }

    fn on_command(&mut self, _topic: &str, payload: &[u8], ctx: &mut DispatchContext<'_>) {
        let wanted = String::from_utf8_lossy(payload).trim().to_ascii_lowercase();
        if wanted != ON && wanted != OFF {
            tracing::warn!(entity = %self.name, payload = %wanted, "invalid dimmer command");
            return;
        }
        // The load only knows toggle.
        if wanted != self.state {
            self.toggle(ctx);
        }
    }
}

// src/entity/tank.rs
//
// Holding tank level from TANK_STATUS. The level is published as a whole
// percentage of the sender's resolution; the absolute volume follows when the
// sensor reports one.

use super::{format_measurement, EntityConfig, TopicScheme};
use crate::dispatch::{DispatchContext, Handler, MatchPredicate, Route, StateCache};
use crate::error::ConfigError;
use crate::rvc::value::DecodedMessage;
use crate::rvc::OutboundFrame;

const STATUS: &str = "TANK_STATUS";
const STATUS_DGN: u32 = 0x1FFB7;
const DEFAULT_MINIMUM_CHANGE: f64 = 0.0;

pub struct TankLevel {
    name: String,
    instance: u8,
    level_topic: String,
    volume_topic: String,
    minimum_change: f64,
    cache: StateCache,
}

impl TankLevel {
    pub fn from_config(cfg: &EntityConfig<'_>, topics: &TopicScheme) -> Result<Self, ConfigError> {
        let instance = cfg.instance()?;
        let (level_topic, volume_topic) = match cfg.str("status_topic") {
            Some(base) => (format!("{}/level", base), format!("{}/volume", base)),
            None => {
                let id = format!("tank-1FFB7-i{}", instance);
                (
                    topics.device(&id, Some("level"), true),
                    topics.device(&id, Some("volume"), true),
                )
            }
        };
        Ok(Self {
            name: cfg.instance_name().to_string(),
            instance,
            level_topic,
            volume_topic,
            minimum_change: cfg.f64("minimum_change").unwrap_or(DEFAULT_MINIMUM_CHANGE),
            cache: StateCache::new(),
        })
    }
}

/// `relative / resolution` as a whole percentage. None when either is missing
/// or the resolution is zero.
pub fn level_percent(relative: Option<i64>, resolution: Option<i64>) -> Option<f64> {
    match (relative?, resolution?) {
        (_, 0) => None,
        (rel, res) => Some((rel as f64 * 100.0 / res as f64).round()),
    }
}

impl Handler for TankLevel {
    fn name(&self) -> &str {
        &self.name
    }

    fn registrations(&self) -> Vec<MatchPredicate> {
        vec![MatchPredicate::named(STATUS).with("instance", self.instance)]
    }

    fn on_message(&mut self, _route: Route, msg: &DecodedMessage, ctx: &mut DispatchContext<'_>) -> bool {
        match level_percent(msg.i64("relative_level"), msg.i64("resolution")) {
            Some(level) => {
                if self.cache.changed_by("level", level, self.minimum_change) {
                    let _ = ctx.publish(&self.level_topic, format_measurement(level), true);
                }
            }
            None => tracing::debug!(entity = %self.name, "tank level not available"),
        }
        if let Some(volume) = msg.f64("absolute_level") {
            if self.cache.changed("volume", format_measurement(volume)) {
                let _ = ctx.publish(&self.volume_topic, format_measurement(volume), true);
            }
        }
        true
    }

    fn initialize(&mut self, ctx: &mut DispatchContext<'_>) {
        ctx.send(OutboundFrame::iso_request(STATUS_DGN, 0xFF, self.instance));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::io::testing::RecordingPublisher;
    use crate::rvc::codec::decode;
    use crate::rvc::SchemaRegistry;

    const LEVEL: &str = "rvc2mqtt/b/d/tank-1ffb7-i2/level/state";

    fn tank(extra: &str) -> TankLevel {
        let text = format!("instance = 2\ninstance_name = \"gray\"\n{}", extra);
        let table: toml::Table = toml::from_str(&text).unwrap();
        TankLevel::from_config(&EntityConfig::new(0, &table), &TopicScheme::new("rvc2mqtt", "b")).unwrap()
    }

    fn status(instance: u8, relative: u8, resolution: u8, absolute: u16) -> DecodedMessage {
        let [lo, hi] = absolute.to_le_bytes();
        decode(
            SchemaRegistry::builtin(),
            0x1FFB7,
            &[instance, relative, resolution, lo, hi, 0xFF, 0xFF, 0xFF],
        )
        .unwrap()
    }

    #[test]
    fn test_level_percent() {
        assert_eq!(level_percent(Some(2), Some(3)), Some(67.0));
        assert_eq!(level_percent(Some(0), Some(4)), Some(0.0));
        assert_eq!(level_percent(Some(1), Some(0)), None);
        assert_eq!(level_percent(None, Some(3)), None);
    }

    #[test]
    fn test_level_published_on_change_only() {
        let publisher = RecordingPublisher::default();
        let mut ctx = DispatchContext::new(SchemaRegistry::builtin(), &publisher);
        let mut d = Dispatcher::new();
        d.add_handler(Box::new(tank("")));

        assert!(d.dispatch(&status(2, 1, 3, 0xFFFF), &mut ctx).claimed);
        d.dispatch(&status(2, 1, 3, 0xFFFF), &mut ctx);
        d.dispatch(&status(2, 3, 3, 0xFFFF), &mut ctx);
        assert_eq!(publisher.payloads(LEVEL), vec!["33", "100"]);
        assert!(publisher.payloads("rvc2mqtt/b/d/tank-1ffb7-i2/volume/state").is_empty());

        // Other tanks are not ours.
        assert_eq!(d.dispatch(&status(0, 1, 3, 0xFFFF), &mut ctx).matched, 0);
    }

    #[test]
    fn test_minimum_change_and_volume() {
        let publisher = RecordingPublisher::default();
        let mut ctx = DispatchContext::new(SchemaRegistry::builtin(), &publisher);
        let mut t = tank("status_topic = \"rv/tanks/gray\"\nminimum_change = 10");

        t.on_message(0, &status(2, 50, 100, 120), &mut ctx);
        t.on_message(0, &status(2, 55, 100, 130), &mut ctx);
        t.on_message(0, &status(2, 61, 100, 140), &mut ctx);
        assert_eq!(publisher.payloads("rv/tanks/gray/level"), vec!["50", "61"]);
        assert_eq!(publisher.payloads("rv/tanks/gray/volume"), vec!["120", "130", "140"]);
    }

    #[test]
    fn test_initialize_requests_tank_status() {
        let publisher = RecordingPublisher::default();
        let mut ctx = DispatchContext::new(SchemaRegistry::builtin(), &publisher);
        let mut t = tank("");
        t.initialize(&mut ctx);
        assert_eq!(ctx.take_outbox(), vec![OutboundFrame::iso_request(0x1FFB7, 0xFF, 2)]);
    }
}

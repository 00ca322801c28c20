// src/entity/temperature.rs
//
// Thermostat ambient temperature sensor.

use serde_json::json;

use super::{EntityConfig, TopicScheme};
use crate::dispatch::{DispatchContext, Handler, MatchPredicate, Route, StateCache};
use crate::error::ConfigError;
use crate::rvc::value::DecodedMessage;

const STATUS: &str = "THERMOSTAT_AMBIENT_STATUS";
const DEFAULT_MINIMUM_CHANGE: f64 = 0.25;

pub struct TemperatureSensor {
    name: String,
    instance: u8,
    status_topic: String,
    minimum_change: f64,
    cache: StateCache,
}

impl TemperatureSensor {
    pub fn from_config(cfg: &EntityConfig<'_>, topics: &TopicScheme) -> Result<Self, ConfigError> {
        let instance = cfg.instance()?;
        let id = format!("temperature-1FF9C-i{}", instance);
        Ok(Self {
            name: cfg.instance_name().to_string(),
            instance,
            status_topic: cfg
                .str("status_topic")
                .map(str::to_string)
                .unwrap_or_else(|| topics.device(&id, None, true)),
            minimum_change: cfg.f64("minimum_change").unwrap_or(DEFAULT_MINIMUM_CHANGE),
            cache: StateCache::new(),
        })
    }
}

fn fahrenheit(celsius: f64) -> i64 {
    (celsius * 9.0 / 5.0 + 32.0).round() as i64
}

impl Handler for TemperatureSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn registrations(&self) -> Vec<MatchPredicate> {
        vec![MatchPredicate::named(STATUS).with("instance", self.instance)]
    }

    fn on_message(&mut self, _route: Route, msg: &DecodedMessage, ctx: &mut DispatchContext<'_>) -> bool {
        let Some(celsius) = msg.f64("ambient_temp") else {
            return true;
        };
        if self.cache.changed_by("ambient_temp", celsius, self.minimum_change) {
            let payload = json!({ "c": celsius, "f": fahrenheit(celsius) }).to_string();
            let _ = ctx.publish(&self.status_topic, payload, true);
        }
        true
    }
}

// src/entity/generator.rs
//
// Generator status and run hours.

use super::{title_case, EntityConfig, TopicScheme};
use crate::dispatch::{DispatchContext, Handler, MatchPredicate, Route, StateCache};
use crate::error::ConfigError;
use crate::rvc::value::DecodedMessage;

const STATUS: &str = "GENERATOR_STATUS_1";

pub struct Generator {
    name: String,
    status_topic: String,
    hours_topic: String,
    cache: StateCache,
}

impl Generator {
    pub fn from_config(cfg: &EntityConfig<'_>, topics: &TopicScheme) -> Result<Self, ConfigError> {
        let name = cfg.instance_name();
        let (status_topic, hours_topic) = match cfg.str("status_topic") {
            Some(base) => (format!("{}/status", base), format!("{}/hours", base)),
            None => {
                let id = format!("generator-1FFDC-{}", name);
                (
                    topics.device(&id, Some("status"), true),
                    topics.device(&id, Some("hours"), true),
                )
            }
        };
        Ok(Self {
            name: name.to_string(),
            status_topic,
            hours_topic,
            cache: StateCache::new(),
        })
    }
}

impl Handler for Generator {
    fn name(&self) -> &str {
        &self.name
    }

    fn registrations(&self) -> Vec<MatchPredicate> {
        vec![MatchPredicate::named(STATUS)]
    }

    fn on_message(&mut self, _route: Route, msg: &DecodedMessage, ctx: &mut DispatchContext<'_>) -> bool {
        if let Some(value) = msg.get("status").filter(|v| v.is_available()) {
            let status = msg
                .definition("status")
                .map(title_case)
                .unwrap_or_else(|| value.canonical());
            if self.cache.changed("status", &status) {
                let _ = ctx.publish(&self.status_topic, status, true);
            }
        }

        if let Some(minutes) = msg.f64("engine_run_time") {
            let hours = format!("{:.2}", minutes / 60.0);
            if self.cache.changed("hours", &hours) {
                let _ = ctx.publish(&self.hours_topic, hours, true);
            }
        }
        true
    }
}

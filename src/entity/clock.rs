// src/entity/clock.rs
//
// Coach system clock. Publishes the bus time as `YYYY-MM-DDTHH:MM` and accepts
// ISO 8601 date/times to set it.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

use super::{EntityConfig, TopicScheme};
use crate::dispatch::{DispatchContext, Handler, MatchPredicate, Route, StateCache};
use crate::error::ConfigError;
use crate::rvc::value::{field_map, DecodedMessage, FieldValue};

const STATUS: &str = "DATE_TIME_STATUS";
const COMMAND: &str = "SET_DATE_TIME_COMMAND";
const YEAR_BASE: i64 = 2000;
const UNKNOWN: &str = "unknown";
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

pub struct SystemClock {
    name: String,
    status_topic: String,
    command_topic: String,
    cache: StateCache,
}

impl SystemClock {
    pub fn from_config(cfg: &EntityConfig<'_>, topics: &TopicScheme) -> Result<Self, ConfigError> {
        let name = cfg.instance_name();
        let id = format!("datetime-1FFFF-{}", name);
        Ok(Self {
            name: name.to_string(),
            status_topic: cfg
                .str("status_topic")
                .map(str::to_string)
                .unwrap_or_else(|| topics.device(&id, None, true)),
            command_topic: cfg
                .str("command_topic")
                .map(str::to_string)
                .unwrap_or_else(|| topics.device(&id, None, false)),
            cache: StateCache::new(),
        })
    }

    fn publish_state(&mut self, state: String, ctx: &DispatchContext<'_>) {
        if self.cache.changed("state", &state) {
            let _ = ctx.publish(&self.status_topic, state, true);
        }
    }
}

/// Parse an ISO 8601 date, date/time, or RFC 3339 timestamp. Offsets are
/// dropped; the coach clock carries local time.
pub fn parse_iso(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn format_status(msg: &DecodedMessage) -> Option<String> {
    let year = msg.i64("year")?;
    let month = msg.i64("month")?;
    let date = msg.i64("date")?;
    let hour = msg.i64("hour")?;
    let minute = msg.i64("minute")?;
    Some(format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}",
        YEAR_BASE + year,
        month,
        date,
        hour,
        minute
    ))
}

impl Handler for SystemClock {
    fn name(&self) -> &str {
        &self.name
    }

    fn registrations(&self) -> Vec<MatchPredicate> {
        vec![MatchPredicate::named(STATUS), MatchPredicate::named(COMMAND)]
    }

    fn on_message(&mut self, route: Route, msg: &DecodedMessage, ctx: &mut DispatchContext<'_>) -> bool {
        if route != 0 {
            return true;
        }
        if let Some(state) = format_status(msg) {
            self.publish_state(state, ctx);
        }
        true
    }

    fn initialize(&mut self, ctx: &mut DispatchContext<'_>) {
        self.publish_state(UNKNOWN.to_string(), ctx);
    }

    fn command_topics(&self) -> Vec<String> {
        vec![self.command_topic.clone()]
    }

    fn on_command(&mut self, _topic: &str, payload: &[u8], ctx: &mut DispatchContext<'_>) {
        let text = String::from_utf8_lossy(payload);
        let Some(dt) = parse_iso(&text) else {
            tracing::warn!(entity = %self.name, payload = %text, "invalid date/time");
            return;
        };
        let fields = field_map([
            ("year", FieldValue::Signed(dt.year() as i64 - YEAR_BASE)),
            ("month", FieldValue::Unsigned(dt.month() as u64)),
            ("date", FieldValue::Unsigned(dt.day() as u64)),
            ("day_of_week", FieldValue::Unsigned(dt.weekday().number_from_sunday() as u64)),
            ("hour", FieldValue::Unsigned(dt.hour() as u64)),
            ("minute", FieldValue::Unsigned(dt.minute() as u64)),
            ("second", FieldValue::Unsigned(dt.second() as u64)),
            ("time_zone", FieldValue::Unsigned(0xFF)),
        ]);
        match ctx.send_fields(COMMAND, &fields) {
            Ok(()) => tracing::info!(entity = %self.name, time = %dt, "setting coach clock"),
            Err(e) => tracing::error!(entity = %self.name, error = %e, "failed to encode date/time"),
        }
    }
}

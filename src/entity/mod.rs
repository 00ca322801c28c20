// src/entity/mod.rs
//
// Floor plan entities: device adapters built from `[[entity]]` tables.
//
// Each table names a `type` and a DGN `name`; the pair selects the adapter.
// Adapters own their topics and a `StateCache`, and publish only on change.

mod charger;
mod clock;
mod dimmer;
mod generator;
mod solar;
mod tank;
mod temperature;

pub use charger::Charger;
pub use clock::SystemClock;
pub use dimmer::DimmerSwitch;
pub use generator::Generator;
pub use solar::SolarController;
pub use tank::TankLevel;
pub use temperature::TemperatureSensor;

use crate::dispatch::{Expected, Handler};
use crate::error::ConfigError;

// ============================================================================
// Topics
// ============================================================================

/// Topic layout under `<topic_base>/<client_id>`.
#[derive(Clone, Debug)]
pub struct TopicScheme {
    root: String,
}

impl TopicScheme {
    pub fn new(topic_base: &str, client_id: &str) -> Self {
        Self {
            root: format!("{}/{}", topic_base, client_id),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Bridge availability: `online` / `offline`.
    pub fn bridge_state(&self) -> String {
        format!("{}/state", self.root)
    }

    pub fn unhandled(&self) -> String {
        format!("{}/unhandled", self.root)
    }

    /// `<root>/d/<node>[/<field>]/state` or `.../set`.
    pub fn device(&self, id: &str, field: Option<&str>, state: bool) -> String {
        let mut topic = format!("{}/d/{}", self.root, normalize_node(id));
        if let Some(field) = field {
            topic.push('/');
            topic.push_str(&normalize_node(field));
        }
        topic.push_str(if state { "/state" } else { "/set" });
        topic
    }
}

/// Lowercase, spaces and slashes to underscores, parentheses dropped.
pub fn normalize_node(input: &str) -> String {
    input
        .chars()
        .filter(|c| *c != '(' && *c != ')')
        .map(|c| match c {
            ' ' | '/' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Title-case each alphabetic run: "do not charge" -> "Do Not Charge".
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_alpha = false;
    for c in input.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Published form of a measured value: rounded to 3 decimals, no trailing zeros.
pub fn format_measurement(v: f64) -> String {
    crate::rvc::value::format_number((v * 1000.0).round() / 1000.0)
}

// ============================================================================
// Config access
// ============================================================================

/// Read access to one `[[entity]]` table with errors tagged by its index.
pub struct EntityConfig<'a> {
    index: usize,
    table: &'a toml::Table,
}

impl<'a> EntityConfig<'a> {
    pub fn new(index: usize, table: &'a toml::Table) -> Self {
        Self { index, table }
    }

    fn error(&self, message: String) -> ConfigError {
        ConfigError::Entity {
            index: self.index,
            message,
        }
    }

    pub fn str(&self, key: &str) -> Option<&'a str> {
        self.table.get(key).and_then(toml::Value::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&'a str, ConfigError> {
        self.str(key)
            .ok_or_else(|| self.error(format!("missing string '{}'", key)))
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.table.get(key).and_then(|v| match v {
            toml::Value::Float(f) => Some(*f),
            toml::Value::Integer(i) => Some(*i as f64),
            _ => None,
        })
    }

    pub fn expected(&self, key: &str) -> Option<Expected> {
        match self.table.get(key)? {
            toml::Value::Integer(i) => Some(Expected::Int(*i)),
            toml::Value::Float(f) => Some(Expected::Float(*f)),
            toml::Value::String(s) => Some(Expected::Text(s.clone())),
            toml::Value::Boolean(b) => Some(Expected::Text(b.to_string())),
            _ => None,
        }
    }

    /// Instance as a byte; accepts an integer or a decimal string.
    pub fn instance(&self) -> Result<u8, ConfigError> {
        let raw = match self.table.get("instance") {
            Some(toml::Value::Integer(i)) => *i,
            Some(toml::Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| self.error(format!("instance '{}' is not a number", s)))?,
            Some(_) => return Err(self.error("instance must be a number".to_string())),
            None => return Err(self.error("missing 'instance'".to_string())),
        };
        u8::try_from(raw).map_err(|_| self.error(format!("instance {} out of range", raw)))
    }

    /// Source address as the two-digit hex text the decoder produces.
    pub fn source_id(&self) -> Result<String, ConfigError> {
        match self.table.get("source_id") {
            Some(toml::Value::Integer(i)) => u8::try_from(*i)
                .map(|v| format!("{:02X}", v))
                .map_err(|_| self.error(format!("source_id {} out of range", i))),
            Some(toml::Value::String(s)) => {
                let s = s.trim();
                let s = s.strip_prefix("0x").unwrap_or(s);
                u8::from_str_radix(s, 16)
                    .map(|v| format!("{:02X}", v))
                    .map_err(|_| self.error(format!("source_id '{}' is not hex", s)))
            }
            _ => Err(self.error("missing 'source_id'".to_string())),
        }
    }

    /// Display name, falling back to the DGN name.
    pub fn instance_name(&self) -> &'a str {
        self.str("instance_name")
            .or_else(|| self.str("name"))
            .unwrap_or("unnamed")
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Build one handler per `[[entity]]` table, matched on `(type, name)`.
pub fn build_entities(
    tables: &[toml::Table],
    topics: &TopicScheme,
) -> Result<Vec<Box<dyn Handler>>, ConfigError> {
    let mut handlers: Vec<Box<dyn Handler>> = Vec::with_capacity(tables.len());
    for (index, table) in tables.iter().enumerate() {
        let cfg = EntityConfig::new(index, table);
        let kind = cfg.require_str("type")?;
        let name = cfg.require_str("name")?;
        let handler: Box<dyn Handler> = match (kind, name) {
            ("dimmer_switch", "DC_DIMMER_STATUS_3") => Box::new(DimmerSwitch::from_config(&cfg, topics)?),
            ("temperature", "THERMOSTAT_AMBIENT_STATUS") => {
                Box::new(TemperatureSensor::from_config(&cfg, topics)?)
            }
            ("system_clock", "DATE_TIME_STATUS") => Box::new(SystemClock::from_config(&cfg, topics)?),
            ("generator", "GENERATOR_STATUS_1") => Box::new(Generator::from_config(&cfg, topics)?),
            ("charger", "DC_SOURCE_STATUS_1") | ("dc_system", "APS-500") => {
                Box::new(Charger::from_config(&cfg, topics)?)
            }
            ("tank_level", "TANK_STATUS") => Box::new(TankLevel::from_config(&cfg, topics)?),
            ("tank_heater", "DC_DIMMER_STATUS_3") => Box::new(DimmerSwitch::tank_heater(&cfg, topics)?),
            ("solar", "SOLAR_CONTROLLER_STATUS") => Box::new(SolarController::from_config(&cfg, topics)?),
            _ => {
                return Err(ConfigError::Entity {
                    index,
                    message: format!("no entity for type '{}' and name '{}'", kind, name),
                })
            }
        };
        tracing::info!(entity = handler.name(), kind, "entity loaded");
        handlers.push(handler);
    }
    Ok(handlers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(text: &str) -> Vec<toml::Table> {
        #[derive(serde::Deserialize)]
        struct Doc {
            entity: Vec<toml::Table>,
        }
        toml::from_str::<Doc>(text).unwrap().entity
    }

    #[test]
    fn test_topic_helpers() {
        let topics = TopicScheme::new("rvc2mqtt", "bridge1");
        assert_eq!(topics.bridge_state(), "rvc2mqtt/bridge1/state");
        assert_eq!(
            topics.device("dimmer-1FEDB-i32", None, true),
            "rvc2mqtt/bridge1/d/dimmer-1fedb-i32/state"
        );
        assert_eq!(
            topics.device("Main Panel (Aft)", Some("fault/code"), false),
            "rvc2mqtt/bridge1/d/main_panel_aft/fault_code/set"
        );
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("do not charge"), "Do Not Charge");
        assert_eq!(title_case("constant voltage/current"), "Constant Voltage/Current");
        assert_eq!(title_case("RUNNING"), "Running");
    }

    #[test]
    fn test_format_measurement() {
        assert_eq!(format_measurement(54.7), "54.7");
        assert_eq!(format_measurement(90.0), "90");
        assert_eq!(format_measurement(13.350000000000001), "13.35");
    }

    #[test]
    fn test_factory_builds_known_entities() {
        let t = tables(
            r#"
[[entity]]
type = "dimmer_switch"
name = "DC_DIMMER_STATUS_3"
instance = 32
instance_name = "bed ceiling lights"

[[entity]]
type = "temperature"
name = "THERMOSTAT_AMBIENT_STATUS"
instance = 1
instance_name = "bedroom"

[[entity]]
type = "system_clock"
name = "DATE_TIME_STATUS"
instance_name = "clock"

[[entity]]
type = "generator"
name = "GENERATOR_STATUS_1"
instance_name = "onan"

[[entity]]
type = "charger"
name = "DC_SOURCE_STATUS_1"
instance = 1
source_id = "80"
instance_name = "alternator charger"
"#,
        );
        let handlers = build_entities(&t, &TopicScheme::new("rvc2mqtt", "b")).unwrap();
        let names: Vec<&str> = handlers.iter().map(|h| h.name()).collect();
        assert_eq!(
            names,
            vec!["bed ceiling lights", "bedroom", "clock", "onan", "alternator charger"]
        );
    }

    #[test]
    fn test_factory_builds_tanks_solar_and_aliases() {
        let t = tables(
            r#"
[[entity]]
type = "tank_level"
name = "TANK_STATUS"
instance = 2
instance_name = "gray tank"

[[entity]]
type = "tank_heater"
name = "DC_DIMMER_STATUS_3"
instance = 3
instance_name = "fresh tank heater"

[[entity]]
type = "solar"
name = "SOLAR_CONTROLLER_STATUS"
instance = 1
instance_name = "roof solar"

[[entity]]
type = "dc_system"
name = "APS-500"
instance = 1
source_id = "80"
instance_name = "aps"
"#,
        );
        let handlers = build_entities(&t, &TopicScheme::new("rvc2mqtt", "b")).unwrap();
        let names: Vec<&str> = handlers.iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["gray tank", "fresh tank heater", "roof solar", "aps"]);
        // The alias builds the same source-addressed charger.
        assert_eq!(handlers[3].registrations().len(), 10);
    }

    #[test]
    fn test_factory_rejects_unknown_and_incomplete() {
        let t = tables("[[entity]]\ntype = \"toaster\"\nname = \"X\"\n");
        let err = build_entities(&t, &TopicScheme::new("a", "b")).err().unwrap();
        assert!(matches!(err, ConfigError::Entity { index: 0, .. }));

        let t = tables("[[entity]]\ntype = \"dimmer_switch\"\nname = \"DC_DIMMER_STATUS_3\"\n");
        let err = build_entities(&t, &TopicScheme::new("a", "b")).err().unwrap();
        assert_eq!(err.to_string(), "entity 0: missing 'instance'");
    }

    #[test]
    fn test_config_normalizes_instance_and_source() {
        let t = tables("[[entity]]\ninstance = \"32\"\nsource_id = 128\n");
        let cfg = EntityConfig::new(0, &t[0]);
        assert_eq!(cfg.instance().unwrap(), 32);
        assert_eq!(cfg.source_id().unwrap(), "80");

        let t = tables("[[entity]]\ninstance = 300\nsource_id = \"0x9c\"\n");
        let cfg = EntityConfig::new(0, &t[0]);
        assert!(cfg.instance().is_err());
        assert_eq!(cfg.source_id().unwrap(), "9C");
    }

    #[test]
    fn test_config_expected_values() {
        let t = tables("[[entity]]\ninstance = 3\nminimum_change = 0.5\nname = \"X\"\nflag = true\n");
        let cfg = EntityConfig::new(0, &t[0]);
        assert_eq!(cfg.expected("instance"), Some(Expected::Int(3)));
        assert_eq!(cfg.expected("minimum_change"), Some(Expected::Float(0.5)));
        assert_eq!(cfg.expected("flag"), Some(Expected::Text("true".to_string())));
        assert_eq!(cfg.expected("missing"), None);
        assert_eq!(cfg.f64("instance"), Some(3.0));
        assert_eq!(cfg.instance_name(), "X");
    }
}

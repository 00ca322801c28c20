// src/entity/solar.rs
//
// Solar charge controller. The controller status DGN is in the built-in
// catalog; the array and battery status DGNs are matched by name and need a
// catalog that defines them.

use super::{format_measurement, title_case, EntityConfig, TopicScheme};
use crate::dispatch::{DispatchContext, Handler, MatchPredicate, Route, StateCache};
use crate::error::ConfigError;
use crate::rvc::value::DecodedMessage;

const STATUS: &str = "SOLAR_CONTROLLER_STATUS";
const ARRAY_STATUS: &str = "SOLAR_CONTROLLER_SOLAR_ARRAY_STATUS";
const BATTERY_STATUS: &str = "SOLAR_CONTROLLER_BATTERY_STATUS";

const ROUTE_STATUS: Route = 0;
const ROUTE_ARRAY: Route = 1;
const ROUTE_BATTERY: Route = 2;

pub struct SolarController {
    name: String,
    instance: u8,
    base_topic: Option<String>,
    device_id: String,
    topics: TopicScheme,
    cache: StateCache,
}

impl SolarController {
    pub fn from_config(cfg: &EntityConfig<'_>, topics: &TopicScheme) -> Result<Self, ConfigError> {
        let instance = cfg.instance()?;
        Ok(Self {
            name: cfg.instance_name().to_string(),
            instance,
            base_topic: cfg.str("status_topic").map(|base| format!("{}/{}", base, instance)),
            device_id: format!("solar-charge-controller-1FEB3-i{}", instance),
            topics: topics.clone(),
            cache: StateCache::new(),
        })
    }

    fn topic(&self, field: &str) -> String {
        match &self.base_topic {
            Some(base) => format!("{}/{}", base, field),
            None => self.topics.device(&self.device_id, Some(field), true),
        }
    }

    fn publish_changed(&mut self, field: &str, value: String, ctx: &DispatchContext<'_>) {
        if self.cache.changed(field, &value) {
            let _ = ctx.publish(&self.topic(field), value, true);
        }
    }

    fn publish_label(&mut self, field: &str, msg: &DecodedMessage, key: &str, ctx: &DispatchContext<'_>) {
        let Some(value) = msg.get(key).filter(|v| v.is_available()) else {
            return;
        };
        let text = msg
            .definition(key)
            .map(title_case)
            .unwrap_or_else(|| value.canonical());
        self.publish_changed(field, text, ctx);
    }

    /// Voltage and current, plus their product when both are present.
    fn publish_power(
        &mut self,
        prefix: &str,
        volts: Option<f64>,
        amps: Option<f64>,
        ctx: &DispatchContext<'_>,
    ) {
        if let Some(v) = volts {
            self.publish_changed(&format!("{}-voltage", prefix), format_measurement(v), ctx);
        }
        if let Some(a) = amps {
            self.publish_changed(&format!("{}-current", prefix), format_measurement(a), ctx);
        }
        if let (Some(v), Some(a)) = (volts, amps) {
            let watts = (v * a * 10.0).round() / 10.0;
            self.publish_changed(&format!("{}-power", prefix), format_measurement(watts), ctx);
        }
    }
}

impl Handler for SolarController {
    fn name(&self) -> &str {
        &self.name
    }

    fn registrations(&self) -> Vec<MatchPredicate> {
        [STATUS, ARRAY_STATUS, BATTERY_STATUS]
            .iter()
            .map(|name| MatchPredicate::named(name).with("instance", self.instance))
            .collect()
    }

    fn on_message(&mut self, route: Route, msg: &DecodedMessage, ctx: &mut DispatchContext<'_>) -> bool {
        match route {
            ROUTE_STATUS => {
                self.publish_label("operating-state", msg, "operating_state", ctx);
                self.publish_label("power-up-state", msg, "power-up_state", ctx);
                self.publish_label("force-charge", msg, "force_charge", ctx);
            }
            ROUTE_ARRAY => self.publish_power(
                "solar-array",
                msg.f64("solar_array_measured_voltage"),
                msg.f64("solar_array_measured_current"),
                ctx,
            ),
            ROUTE_BATTERY => {
                self.publish_power(
                    "battery",
                    msg.f64("measured_voltage"),
                    msg.f64("measured_current"),
                    ctx,
                );
                if let Some(t) = msg.f64("measured_temperature") {
                    self.publish_changed("battery-temperature", format_measurement(t), ctx);
                }
            }
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::io::testing::RecordingPublisher;
    use crate::rvc::codec::decode;
    use crate::rvc::SchemaRegistry;

    const SOLAR_CATALOG: &str = r#"
[meta]
version = 1

[[dgn]]
id = "1FEB3"
name = "SOLAR_CONTROLLER_STATUS"

[[dgn.field]]
name = "instance"
start_bit = 0
bit_length = 8
kind = "unsigned_int"

[[dgn]]
id = "1FE01"
name = "SOLAR_CONTROLLER_SOLAR_ARRAY_STATUS"

[[dgn.field]]
name = "instance"
start_bit = 0
bit_length = 8
kind = "unsigned_int"

[[dgn.field]]
name = "solar_array_measured_voltage"
start_bit = 8
bit_length = 16
kind = "fixed_point"
scale = 0.05

[[dgn.field]]
name = "solar_array_measured_current"
start_bit = 24
bit_length = 16
kind = "fixed_point"
scale = 0.05
offset = -1600.0

[[dgn]]
id = "1FE02"
name = "SOLAR_CONTROLLER_BATTERY_STATUS"

[[dgn.field]]
name = "instance"
start_bit = 0
bit_length = 8
kind = "unsigned_int"

[[dgn.field]]
name = "measured_voltage"
start_bit = 8
bit_length = 16
kind = "fixed_point"
scale = 0.05

[[dgn.field]]
name = "measured_current"
start_bit = 24
bit_length = 16
kind = "fixed_point"
scale = 0.05
offset = -1600.0

[[dgn.field]]
name = "measured_temperature"
start_bit = 40
bit_length = 8
kind = "fixed_point"
scale = 1.0
offset = -40.0
"#;

    fn controller(extra: &str) -> SolarController {
        let text = format!("instance = 1\ninstance_name = \"roof\"\n{}", extra);
        let table: toml::Table = toml::from_str(&text).unwrap();
        SolarController::from_config(&EntityConfig::new(0, &table), &TopicScheme::new("rvc2mqtt", "b")).unwrap()
    }

    #[test]
    fn test_default_topics() {
        let s = controller("");
        assert_eq!(
            s.topic("operating-state"),
            "rvc2mqtt/b/d/solar-charge-controller-1feb3-i1/operating-state/state"
        );
        let s = controller("status_topic = \"rv/solar\"");
        assert_eq!(s.topic("battery-power"), "rv/solar/1/battery-power");
    }

    #[test]
    fn test_status_labels() {
        let publisher = RecordingPublisher::default();
        let mut ctx = DispatchContext::new(SchemaRegistry::builtin(), &publisher);
        let mut d = Dispatcher::new();
        d.add_handler(Box::new(controller("status_topic = \"rv/solar\"")));

        // Bulk, powered up enabled, charge not forced.
        let data = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02, 0x0D];
        let msg = decode(SchemaRegistry::builtin(), 0x1FEB3, &data).unwrap();
        assert!(d.dispatch(&msg, &mut ctx).claimed);
        d.dispatch(&msg, &mut ctx);

        assert_eq!(publisher.payloads("rv/solar/1/operating-state"), vec!["Bulk"]);
        assert_eq!(publisher.payloads("rv/solar/1/power-up-state"), vec!["Enabled"]);
        assert_eq!(publisher.payloads("rv/solar/1/force-charge"), vec!["Charging Not Forced"]);

        let other = decode(SchemaRegistry::builtin(), 0x1FEB3, &[0x02, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02, 0x0D]).unwrap();
        assert_eq!(d.dispatch(&other, &mut ctx).matched, 0);
    }

    #[test]
    fn test_array_and_battery_power() {
        let reg = SchemaRegistry::from_toml_str(SOLAR_CATALOG).unwrap();
        let publisher = RecordingPublisher::default();
        let mut ctx = DispatchContext::new(&reg, &publisher);
        let mut d = Dispatcher::new();
        d.add_handler(Box::new(controller("status_topic = \"rv/solar\"")));

        // 20.0 V at 5.0 A: raw 400 and 32100.
        let array = decode(&reg, 0x1FE01, &[0x01, 0x90, 0x01, 0x64, 0x7D, 0xFF, 0xFF, 0xFF]).unwrap();
        assert!(d.dispatch(&array, &mut ctx).claimed);
        assert_eq!(publisher.last("rv/solar/1/solar-array-voltage").as_deref(), Some("20"));
        assert_eq!(publisher.last("rv/solar/1/solar-array-current").as_deref(), Some("5"));
        assert_eq!(publisher.last("rv/solar/1/solar-array-power").as_deref(), Some("100"));

        // 13.25 V at -2.5 A, 25 C: raw 265, 31950 and 65.
        let battery = decode(&reg, 0x1FE02, &[0x01, 0x09, 0x01, 0xCE, 0x7C, 0x41, 0xFF, 0xFF]).unwrap();
        assert!(d.dispatch(&battery, &mut ctx).claimed);
        assert_eq!(publisher.last("rv/solar/1/battery-voltage").as_deref(), Some("13.25"));
        assert_eq!(publisher.last("rv/solar/1/battery-current").as_deref(), Some("-2.5"));
        assert_eq!(publisher.last("rv/solar/1/battery-power").as_deref(), Some("-33.1"));
        assert_eq!(publisher.last("rv/solar/1/battery-temperature").as_deref(), Some("25"));

        // Current unavailable: voltage only, no power.
        publisher.clear();
        let partial = decode(&reg, 0x1FE02, &[0x01, 0x0A, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        d.dispatch(&partial, &mut ctx);
        assert_eq!(publisher.payloads("rv/solar/1/battery-voltage"), vec!["13.3"]);
        assert!(publisher.payloads("rv/solar/1/battery-power").is_empty());
    }
}

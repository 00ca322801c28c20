// src/entity/charger.rs
//
// DC charger identified by its source address (alternator chargers and DC-DC
// converters). Tracks DC source status, charger status and configuration,
// battery bus status and DM_RV faults.

use super::{format_measurement, title_case, EntityConfig, TopicScheme};
use crate::dispatch::{DispatchContext, Handler, MatchPredicate, Route, StateCache};
use crate::error::ConfigError;
use crate::rvc::value::DecodedMessage;
use crate::rvc::OutboundFrame;

const CHARGER_CONFIGURATION_DGN: u32 = 0x1FFC6;
const NO_FAULT: i64 = 4095;

const ROUTE_SOURCE_1: Route = 0;
const ROUTE_SOURCE_2: Route = 1;
const ROUTE_SOURCE_3: Route = 2;
const ROUTE_SOURCE_4: Route = 3;
const ROUTE_SOURCE_5: Route = 4;
const ROUTE_BATTERY: Route = 5;
const ROUTE_CHARGER: Route = 6;
const ROUTE_CHARGER_2: Route = 7;
const ROUTE_CONFIGURATION: Route = 8;
const ROUTE_FAULT: Route = 9;

// Registration order defines the routes above.
const MATCHED: [&str; 10] = [
    "DC_SOURCE_STATUS_1",
    "DC_SOURCE_STATUS_2",
    "DC_SOURCE_STATUS_3",
    "DC_SOURCE_STATUS_4",
    "DC_SOURCE_STATUS_5",
    "BATTERY_STATUS_11",
    "CHARGER_STATUS",
    "CHARGER_STATUS_2",
    "CHARGER_CONFIGURATION_STATUS",
    "DM_RV",
];

/// Vendor fault descriptions keyed on `vendor_fault_code`.
const FAULTS: &[(i64, &str)] = &[
    (12, "Battery Temperature greatly exceeded configured upper limit."),
    (13, "Battery Voltage greatly exceeded upper limit, measured by VBat+"),
    (14, "Battery Voltage too low to operate as measured on VBat+. Damaged or missing sensing wire or fuse? (or engine not started!)"),
    (15, "Voltage at Vbat+ exceeded Max Bat Volts as defined by $CPB:"),
    (16, "Battery Temperature is shorted (Defective)"),
    (21, "Alternator Temperature greatly exceeded configured upper limit."),
    (24, "Alternator Temperature greatly exceeded configured upper limit. (2nd temp reached / exceeded while ramping - this can NOT be right, to reach target while ramping means way too risky.)"),
    (25, "Alt Temp is rising REALLY fast, damaged?"),
    (41, "Internal Field FET temperature exceed limit."),
    (42, "A 'Required' sensor is missing, and we are configured to FAULT out."),
    (43, "No voltage has been sensed on the VAlt+ line, blown fuse?"),
    (44, "There is excessive voltage offset between VAlt+ and VBat+ sense lines - 2.5v. (Not checked in \"Split\" voltage systems)"),
    (45, "Voltage at VAlt+ exceeded Max Bat Volts (Plus additional allowance for IR drop) as defined by $CPB:"),
    (46, "Voltage greatly exceeded expected upper limit battery limit as measured at VAlt+"),
    (51, "Received a generic CAN message that the battery charging bus has been disconnected."),
    (52, "A CAN command has been received asking for the battery bus to be disconnected due to High Voltage. (Note that depending on the BMS, other alarms may trigger this same fault, ala, high charge current)"),
    (53, "Battery Instance number is out of range (needs to be from 1..100)"),
    (54, "Too many different BMS's are asking to be aggregated."),
    (55, "AEBus device (Discovery battery) has send a warning or fault status. As there is no fore-warning of a disconnect, treat all warnings as a pending disconnect and fault. But then do auto-restart to see if it clears."),
    (56, "Too many VEreg (Victron) devices present to track"),
    (57, "A CAN command has been received asking for the battery bus to be disconnected due to Low Voltage."),
    (58, "A CAN command has been received asking for the battery bus to be disconnected due to High Current."),
    (59, "A CAN command has been received asking for the battery bus to be disconnected due to High Battery Temperature."),
    (61, "A CAN command has been received asking for the battery bus to be disconnected due to Low Battery Temperature."),
    (62, "A CAN status has been received that the battery has reached its upper limit, but not yet disconnecting. Charging should stop."),
    (82, "Primary Battery (HS) of DC-DC converter Over-voltage trip"),
    (83, "Primary Battery (HS) of DC-DC converter Under-voltage trip"),
    (84, "Secondary Battery (LS) of DC-DC converter Over-voltage trip"),
    (85, "Secondary Battery (LS) of DC-DC converter Under-voltage trip"),
    (86, "DCDC Convert too hot."),
    (87, "A configuration value has exceeded the selected DC-DC converter limits."),
    (88, "More than one device seems to be trying to control the DCDC converter."),
    (89, "Attached DCDC Converter is not same as make/model specified"),
    (NO_FAULT, "No Fault"),
];

pub fn fault_description(code: i64) -> &'static str {
    FAULTS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, d)| *d)
        .unwrap_or("Internal Error")
}

pub struct Charger {
    name: String,
    source_id: String,
    base_topic: Option<String>,
    device_id: String,
    topics: TopicScheme,
    cache: StateCache,
}

impl Charger {
    pub fn from_config(cfg: &EntityConfig<'_>, topics: &TopicScheme) -> Result<Self, ConfigError> {
        let source_id = cfg.source_id()?;
        let instance = cfg.instance()?;
        Ok(Self {
            name: cfg.instance_name().to_string(),
            device_id: format!("charger-{}-i{}", source_id, instance),
            source_id,
            base_topic: cfg.str("status_topic").map(str::to_string),
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

    fn publish_measurement(&mut self, field: &str, msg: &DecodedMessage, key: &str, ctx: &DispatchContext<'_>) {
        if let Some(v) = msg.f64(key) {
            self.publish_changed(field, format_measurement(v), ctx);
        }
    }

    /// Title-cased enum label, or the raw value when the table has no entry.
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

    fn on_fault(&mut self, msg: &DecodedMessage, ctx: &DispatchContext<'_>) {
        if let Some(code) = msg.i64("vendor_fault_code") {
            let code_text = if code == NO_FAULT { String::new() } else { code.to_string() };
            if self.cache.changed("fault_code", code.to_string()) {
                let _ = ctx.publish(&self.topic("fault/code"), code_text, true);
                let _ = ctx.publish(&self.topic("fault/description"), fault_description(code), true);
            }
        }

        let lit = |key: &str| msg.i64(key).unwrap_or(0) > 0;
        let lamp = if lit("red_lamp_status") {
            "red"
        } else if lit("yellow_lamp_status") {
            "yellow"
        } else {
            "off"
        };
        self.publish_changed("fault/lamp", lamp.to_string(), ctx);
    }

    /// The configuration status is only sent on request.
    fn request_configuration(&self, ctx: &mut DispatchContext<'_>) {
        match u8::from_str_radix(&self.source_id, 16) {
            Ok(destination) => ctx.send(OutboundFrame::iso_request(CHARGER_CONFIGURATION_DGN, destination, 0xFF)),
            Err(e) => tracing::warn!(entity = %self.name, error = %e, "bad source id"),
        }
    }
}

impl Handler for Charger {
    fn name(&self) -> &str {
        &self.name
    }

    fn registrations(&self) -> Vec<MatchPredicate> {
        MATCHED
            .iter()
            .map(|name| MatchPredicate::named(name).with("source_id", self.source_id.as_str()))
            .collect()
    }

    fn on_message(&mut self, route: Route, msg: &DecodedMessage, ctx: &mut DispatchContext<'_>) -> bool {
        match route {
            ROUTE_SOURCE_1 => {
                self.publish_measurement("dc_voltage", msg, "dc_voltage", ctx);
                self.publish_measurement("dc_current", msg, "dc_current", ctx);
            }
            // Claimed so they stay out of the unhandled log.
            ROUTE_SOURCE_2 | ROUTE_SOURCE_3 => {}
            ROUTE_SOURCE_4 => {
                self.publish_label("desired_charge_state", msg, "desired_charge_state", ctx);
                self.publish_measurement("desired_dc_voltage", msg, "desired_dc_voltage", ctx);
                self.publish_measurement("desired_dc_current", msg, "desired_dc_current", ctx);
            }
            ROUTE_SOURCE_5 => {
                if let Some(v) = msg.f64("high_precision_dc_voltage") {
                    self.publish_changed("hp_dc_voltage", format!("{:.3}", v), ctx);
                }
            }
            ROUTE_CHARGER => {
                self.publish_measurement("charge_voltage", msg, "charge_voltage", ctx);
                self.publish_measurement("charge_current", msg, "charge_current", ctx);
                self.publish_measurement("charge_current_pct", msg, "charge_current_percent_of_maximum", ctx);
                self.publish_label("operating_state", msg, "operating_state", ctx);
                self.publish_label("power_up_default_state", msg, "default_state_on_power-up", ctx);
                self.publish_label("auto_recharge_enable", msg, "auto_recharge_enable", ctx);
                self.publish_label("force_charge", msg, "force_charge", ctx);
            }
            ROUTE_CHARGER_2 => {
                self.publish_measurement("charging_voltage", msg, "charging_voltage", ctx);
                self.publish_measurement("charging_current", msg, "charging_current", ctx);
                self.publish_measurement("charger_temp", msg, "charger_temperature", ctx);
            }
            ROUTE_CONFIGURATION => {
                self.publish_label("charging_algorithm", msg, "charging_algorithm", ctx);
                self.publish_label("charging_mode", msg, "charger_mode", ctx);
                self.publish_label("battery_sensor_present", msg, "battery_sensor_present", ctx);
            }
            ROUTE_BATTERY => {
                self.publish_label("charge_detected", msg, "charge_detected", ctx);
                self.publish_label("reserve_status", msg, "reserve_status", ctx);
            }
            ROUTE_FAULT => self.on_fault(msg, ctx),
            _ => return false,
        }
        true
    }

    fn initialize(&mut self, ctx: &mut DispatchContext<'_>) {
        self.request_configuration(ctx);
    }
}

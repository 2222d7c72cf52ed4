//! KPA500 amplifier: key table, reply parser and command vocabulary.
//!
//! Amplifier replies look like `^CMD<data>;` where CMD is two or three
//! uppercase letters. Commands the bridge sends carry the same `^` prefix,
//! except for the raw power-on pulse `P`.

use crate::bands;
use crate::device::Device;
use crate::variant::{PowerProbe, Variant, parse_number};

pub static KPA500: Kpa500 = Kpa500;

pub struct Kpa500;

// State table indices.
const OPER: usize = 0;
const STBY: usize = 1;
const SPKR: usize = 3;
const PWR: usize = 4;
const BAND: usize = 5;
pub(crate) const FAULT: usize = 6;
const FIRMWARE: usize = 7;
const CURRENT: usize = 9;
const POWER: usize = 10;
const SWR: usize = 11;
const TEMP: usize = 12;
const VOLTAGE: usize = 13;
const SERIAL: usize = 16;
const FAN_SLIDER: usize = 17;

const KEYS: [&str; 19] = [
    "amp::button::OPER",
    "amp::button::STBY",
    "amp::button::CLEAR",
    "amp::button::SPKR",
    "amp::button::PWR",
    "amp::dropdown::Band",
    "amp::fault",
    "amp::firmware",
    "amp::list::Band",
    "amp::meter::Current",
    "amp::meter::Power",
    "amp::meter::SWR",
    "amp::meter::Temp",
    "amp::meter::Voltage",
    "amp::range::Fan Speed",
    "amp::range::PWR Meter Hold",
    "amp::serial",
    "amp::slider::Fan Speed",
    "amp::slider::PWR Meter Hold",
];

/// Fault display texts by fault code. Codes without a text pass through
/// as their number.
const FAULT_TEXTS: [&str; 16] = [
    "AMP ON", "01", "HI CURR", "03", "HI TEMP", "05", "PWRIN HI", "07", "60V FAIL", "REFL HI",
    "10", "PA DISS", "POUT HI", "60V HIGH", "14", "GAIN ERR",
];

const INITIAL_QUERIES: [&[u8]; 5] = [
    b";",     // attention
    b"^RVM;", // firmware revision
    b"^SN;",  // serial number
    b"^ON;",  // power status
    b"^FC;",  // minimum fan speed
];

const NORMAL_QUERIES: [&[u8]; 7] = [
    b"^FL;", // faults
    b"^WS;", // watts / swr
    b"^VI;", // volts / amps
    b"^OS;", // operate / standby
    b"^TM;", // temperature
    b"^BN;", // band
    b"^SP;", // speaker
];

const SNAPSHOT_ORDER: [usize; 19] = [
    7, 16, 6, 0, 1, 2, 3, 4, 8, 5, 9, 10, 11, 12, 13, 14, 15, 17, 18,
];

fn fault_text(code: &str) -> &str {
    if let Some(number) = parse_number(code)
        && let Ok(index) = usize::try_from(number)
        && index < FAULT_TEXTS.len()
    {
        return FAULT_TEXTS[index];
    }
    code
}

/// Drops leading zeros, keeping at least one digit.
fn strip_leading_zeros(mut value: &str) -> &str {
    while value.len() > 1 && value.starts_with('0') {
        value = &value[1..];
    }
    value
}

impl Variant for Kpa500 {
    fn name(&self) -> &'static str {
        "KPA500"
    }

    fn keys(&self) -> &'static [&'static str] {
        &KEYS
    }

    fn initial_values(&self) -> Vec<String> {
        let mut values = vec!["0".to_owned(); KEYS.len()];
        values[STBY] = "1".to_owned();
        values[8] = bands::BAND_NAMES.join(",");
        values[CURRENT] = "000".to_owned();
        values[POWER] = "000".to_owned();
        values[SWR] = "000".to_owned();
        values[VOLTAGE] = "00".to_owned();
        values[14] = "0,6,0".to_owned();
        values[15] = "0,10,0".to_owned();
        values[18] = "4".to_owned();
        values
    }

    fn snapshot_order(&self) -> &'static [usize] {
        &SNAPSHOT_ORDER
    }

    fn initial_queries(&self) -> &'static [&'static [u8]] {
        &INITIAL_QUERIES
    }

    fn normal_queries(&self) -> &'static [&'static [u8]] {
        &NORMAL_QUERIES
    }

    fn power_probe(&self) -> &'static [u8] {
        b"^ON;"
    }

    fn power_on_command(&self) -> &'static [u8] {
        b"^ON1;"
    }

    fn power_off_command(&self) -> &'static [u8] {
        b"^ON0;"
    }

    fn power_pulse(&self) -> &'static [u8] {
        b"P"
    }

    fn classify_power_reply(&self, reply: &[u8]) -> PowerProbe {
        match reply {
            [] => PowerProbe::NoReply,
            // `^ON1;` -- the amp answered.
            [_, _, _, b'1', _] => PowerProbe::On,
            // `^ON;` echoed back -- serial passthrough of an unpowered amp.
            [b'^', _, _, _] => PowerProbe::Off,
            _ => PowerProbe::Unexpected,
        }
    }

    fn power_index(&self) -> usize {
        PWR
    }

    fn fault_index(&self) -> usize {
        FAULT
    }

    fn absent_fault(&self) -> &'static str {
        "NO AMP"
    }

    fn on_fault(&self) -> &'static str {
        "AMP ON"
    }

    fn off_fault(&self) -> &'static str {
        "AMP OFF"
    }

    fn powering_up_fault(&self) -> &'static str {
        "Powering On"
    }

    fn set_off_data(&self, device: &Device) {
        device.update(OPER, "0");
        device.update(STBY, "1");
        device.update(PWR, "0");
        device.update(CURRENT, "000");
        device.update(POWER, "000");
        device.update(SWR, "000");
        device.update(TEMP, "0");
        device.update(VOLTAGE, "00");
    }

    fn handle_reply(&self, device: &Device, reply: &str) {
        let Some(end) = reply.find(';') else {
            tracing::warn!(device = self.name(), %reply, "reply without terminator");
            return;
        };
        let message = &reply[..end];
        if message.is_empty() {
            // attention echo
            return;
        }
        let Some(body) = message.strip_prefix('^') else {
            tracing::warn!(device = self.name(), %message, "reply without command prefix");
            return;
        };

        let letters = body.chars().take_while(char::is_ascii_uppercase).count();
        let (command, data) = body.split_at(letters);

        match command {
            "BN" => {
                if let Some(number) = parse_number(data)
                    && let Ok(number) = usize::try_from(number)
                    && let Some(name) = bands::band_name(number)
                {
                    device.update(BAND, name);
                }
            }
            "FC" => {
                if let Some(minimum) = parse_number(data) {
                    device.update(FAN_SLIDER, &minimum.to_string());
                }
            }
            "FL" => device.update(FAULT, fault_text(data)),
            "ON" => device.update(PWR, data),
            "OS" => {
                device.update(OPER, data);
                device.update(STBY, if data == "0" { "1" } else { "0" });
            }
            "RVM" => device.update(FIRMWARE, data),
            "SN" => device.update(SERIAL, data),
            "SP" => device.update(SPKR, data),
            "TM" => {
                if let Some(temperature) = parse_number(data) {
                    device.update(TEMP, &temperature.to_string());
                }
            }
            "VI" => {
                if let Some((volts, amps)) = data.split_once(' ') {
                    device.update(VOLTAGE, volts);
                    device.update(CURRENT, strip_leading_zeros(amps));
                }
            }
            "WS" => {
                if let Some((watts, swr)) = data.split_once(' ') {
                    // A cold power meter reads literally "000".
                    let watts = if watts == "000" { watts } else { strip_leading_zeros(watts) };
                    device.update(POWER, watts);
                    device.update(SWR, strip_leading_zeros(swr));
                }
            }
            _ => {
                tracing::warn!(device = self.name(), %command, %data, "unhandled reply");
            }
        }
    }

    fn client_command(&self, message: &str) -> Option<Vec<Vec<u8>>> {
        if message.starts_with("amp::button::CLEAR::") {
            return Some(vec![b"^FLC;".to_vec()]);
        }
        if let Some(value) = message.strip_prefix("amp::button::OPER::") {
            let command = if value == "1" { b"^OS1;^OS;" } else { b"^OS0;^OS;" };
            return Some(vec![command.to_vec()]);
        }
        if let Some(value) = message.strip_prefix("amp::button::STBY::") {
            // STBY is the inverse of OPER.
            let command = if value == "0" { b"^OS1;^OS;" } else { b"^OS0;^OS;" };
            return Some(vec![command.to_vec()]);
        }
        if let Some(value) = message.strip_prefix("amp::button::PWR::") {
            let command = if value == "1" { b"^ON1;" } else { b"^ON0;" };
            return Some(vec![command.to_vec()]);
        }
        if let Some(value) = message.strip_prefix("amp::button::SPKR::") {
            let command = if value == "1" { b"^SP1;" } else { b"^SP0;" };
            return Some(vec![command.to_vec()]);
        }
        if let Some(value) = message.strip_prefix("amp::dropdown::Band::") {
            let number = bands::band_number(value)?;
            return Some(vec![format!("^BN{number:02};").into_bytes()]);
        }
        if let Some(value) = message.strip_prefix("amp::slider::Fan Speed::") {
            let speed = parse_number(value).filter(|speed| (0..=6).contains(speed))?;
            return Some(vec![format!("^FC{speed};^FC;").into_bytes()]);
        }
        None
    }
}

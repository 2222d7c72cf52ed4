//! KAT500 tuner: key table, reply parser and command vocabulary.
//!
//! Tuner replies are `CMD<data>;` without a prefix character, where CMD is
//! one to five uppercase letters. `VSWRB` shares a prefix with `VSWR` and
//! `AMPI` with `AN`, so dispatch must try the longest names first.

use crate::bands;
use crate::device::Device;
use crate::variant::{PowerProbe, Variant, parse_number};

pub static KAT500: Kat500 = Kat500;

pub struct Kat500;

// State table indices.
const AMPI: usize = 0;
const ATTN: usize = 1;
const BYP: usize = 2;
const POWER: usize = 4;
const TUNE: usize = 5;
const ANTENNA: usize = 6;
const BAND: usize = 7;
const MODE: usize = 8;
pub(crate) const FAULT: usize = 9;
const FREQUENCY: usize = 10;
const VFWD: usize = 11;
const VRFL: usize = 12;
const VSWR: usize = 13;
const VSWRB: usize = 14;

const KEYS: [&str; 15] = [
    "tuner::button::AMPI",
    "tuner::button::ATTN",
    "tuner::button::BYP",
    "tuner::button::Clear",
    "tuner::button::Power",
    "tuner::button::Tune",
    "tuner::dropdown::Antenna",
    "tuner::dropdown::Band",
    "tuner::dropdown::Mode",
    "tuner::fault",
    "tuner::meter::Frequency",
    "tuner::meter::VFWD",
    "tuner::meter::VRFL",
    "tuner::meter::VSWR",
    "tuner::meter::VSWRB",
];

/// Fault display texts by fault code. Codes 5 and 6 are bridge-internal;
/// the tuner itself never reports them.
const FAULT_TEXTS: [&str; 7] = [
    "NO FAULT",
    "NO MATCH",
    "POWER ABOVE DESIGN LIMIT",
    "POWER ABOVE RELAY LIMIT",
    "SWR ABOVE THRESHOLD",
    "NO TUNER",
    "POWERING UP",
];

const ANTENNA_NAMES: [&str; 3] = ["One", "Two", "Three"];

/// Reply names, longest first so prefixes never shadow longer commands.
const REPLY_NAMES: [&str; 17] = [
    "VSWRB", "AMPI", "ATTN", "VFWD", "VRFL", "VSWR", "BYP", "FLT", "AN", "BN", "MD", "PS", "RV",
    "SL", "SN", "TP", "F",
];

const INITIAL_QUERIES: [&[u8]; 5] = [
    b";",   // attention
    b"I;",  // identify, returns KAT500
    b"RV;", // firmware revision
    b"SN;", // serial number
    b"PS;", // power status
];

const NORMAL_QUERIES: [&[u8]; 16] = [
    b"VFWD;",  // forward ADC count
    b"BYP;",   // bypass
    b"AMPI;",  // amp interrupt key line
    b"VRFL;",  // reverse ADC count
    b"ATTN;",  // attenuator
    b"VSWR;",  // VSWR
    b"AN;",    // antenna select
    b"VSWRB;", // bypass VSWR
    b"MD;",    // mode
    b"VFWD;",  // forward ADC count again
    b"F;",     // frequency
    b"VRFL;",  // reverse ADC count again
    b"TP;",    // tune poll
    b"BN;",    // band number
    b"FLT;",   // fault display
    b"PS;",    // power switch
];

const SNAPSHOT_ORDER: [usize; 15] = [9, 4, 5, 0, 1, 2, 3, 6, 8, 7, 13, 14, 11, 12, 10];

/// The display text for a tuner fault code; unknown codes pass through.
pub fn fault_text(code: &str) -> &str {
    if let Some(number) = parse_number(code)
        && let Ok(index) = usize::try_from(number)
        && index < FAULT_TEXTS.len()
    {
        return FAULT_TEXTS[index];
    }
    code
}

impl Variant for Kat500 {
    fn name(&self) -> &'static str {
        "KAT500"
    }

    fn keys(&self) -> &'static [&'static str] {
        &KEYS
    }

    fn initial_values(&self) -> Vec<String> {
        let mut values = vec!["0".to_owned(); KEYS.len()];
        values[POWER] = "1".to_owned();
        values[ANTENNA] = String::new();
        values[BAND] = String::new();
        values[VSWR] = "1.0".to_owned();
        values[VSWRB] = "1.0".to_owned();
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
        b"PS;"
    }

    fn power_on_command(&self) -> &'static [u8] {
        b"PS1;"
    }

    fn power_off_command(&self) -> &'static [u8] {
        b"PS0;"
    }

    fn power_pulse(&self) -> &'static [u8] {
        b"PS1"
    }

    fn classify_power_reply(&self, reply: &[u8]) -> PowerProbe {
        match reply {
            [] => PowerProbe::NoReply,
            // `PS1;` / `PS0;`
            [_, _, b'1', _] => PowerProbe::On,
            [_, _, b'0', _] => PowerProbe::Off,
            _ => PowerProbe::Unexpected,
        }
    }

    fn power_index(&self) -> usize {
        POWER
    }

    fn fault_index(&self) -> usize {
        FAULT
    }

    fn absent_fault(&self) -> &'static str {
        "5" // NO TUNER
    }

    fn on_fault(&self) -> &'static str {
        "0"
    }

    fn off_fault(&self) -> &'static str {
        "0"
    }

    fn powering_up_fault(&self) -> &'static str {
        "6" // POWERING UP
    }

    fn set_off_data(&self, device: &Device) {
        device.update(POWER, "0");
        device.update(FAULT, "0");
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
        if message == "KAT500" {
            // identify response
            return;
        }

        let Some((command, data)) = REPLY_NAMES
            .iter()
            .find_map(|name| message.strip_prefix(name).map(|data| (*name, data.trim())))
        else {
            tracing::warn!(device = self.name(), %message, "unhandled reply");
            return;
        };

        match command {
            "AN" => {
                if let Some(number) = parse_number(data)
                    && let Ok(number) = usize::try_from(number)
                    && (1..=ANTENNA_NAMES.len()).contains(&number)
                {
                    device.update(ANTENNA, ANTENNA_NAMES[number - 1]);
                }
            }
            "BN" => {
                if let Some(number) = parse_number(data)
                    && let Ok(number) = usize::try_from(number)
                    && let Some(name) = bands::band_name(number)
                {
                    device.update(BAND, name);
                }
            }
            "MD" => {
                let mode = match data {
                    "" => return,
                    "M" => "Manual",
                    "A" => "Auto",
                    "B" => "Bypass",
                    other => other,
                };
                device.update(MODE, mode);
            }
            "RV" | "SL" | "SN" => {
                tracing::info!(device = self.name(), %command, %data, "informational reply");
            }
            _ => {
                if data.is_empty() {
                    return;
                }
                let index = match command {
                    "PS" => POWER,
                    "TP" => TUNE,
                    "F" => FREQUENCY,
                    "BYP" => BYP,
                    "FLT" => FAULT,
                    "AMPI" => AMPI,
                    "ATTN" => ATTN,
                    "VFWD" => VFWD,
                    "VRFL" => VRFL,
                    "VSWR" => VSWR,
                    "VSWRB" => VSWRB,
                    _ => return,
                };
                device.update(index, data);
            }
        }
    }

    fn client_command(&self, message: &str) -> Option<Vec<Vec<u8>>> {
        if message.starts_with("tuner::button::clear::") {
            return Some(vec![b"FLTC;FLT;".to_vec()]);
        }
        if let Some(value) = message.strip_prefix("tuner::dropdown::Mode::") {
            let command: &[u8] = match value {
                "Auto" => b"MDA;MD;",
                "Bypass" => b"MDB;MD;",
                "Manual" => b"MDM;MD;",
                _ => return None,
            };
            return Some(vec![command.to_vec()]);
        }
        if let Some(value) = message.strip_prefix("tuner::dropdown::Antenna::") {
            let number = ANTENNA_NAMES.iter().position(|name| *name == value)? + 1;
            return Some(vec![format!("AN{number};AN;").into_bytes()]);
        }
        if let Some(value) = message.strip_prefix("tuner::button::AMPI::") {
            let command = if value == "1" { b"AMPI1;AMPI;" } else { b"AMPI0;AMPI;" };
            return Some(vec![command.to_vec()]);
        }
        if let Some(value) = message.strip_prefix("tuner::button::ATTN::") {
            let command = if value == "1" { b"ATTN1;ATTN;" } else { b"ATTN0;ATTN;" };
            return Some(vec![command.to_vec()]);
        }
        if let Some(value) = message.strip_prefix("tuner::button::BYP::") {
            let command = if value == "1" { b"BYPB;BYP;" } else { b"BYPN;BYP;" };
            return Some(vec![command.to_vec()]);
        }
        if let Some(value) = message.strip_prefix("tuner::button::Power::") {
            let command: &[u8] = if value == "1" { b"PS1;" } else { b"PS0;" };
            return Some(vec![command.to_vec()]);
        }
        if let Some(value) = message.strip_prefix("tuner::button::Tune::") {
            // Only a press starts a tune cycle; releases ask for nothing.
            if value == "1" {
                return Some(vec![b"FT;TP;".to_vec()]);
            }
            return Some(Vec::new());
        }
        None
    }
}

//! The seam between the generic bridge machinery and a concrete device.
//!
//! The amplifier and the tuner share the polling loop, the state cache and
//! the remote protocol; they differ in command vocabulary, reply parser and
//! key table. A [`Variant`] bundles those differences.

use crate::device::Device;

/// Classification of the reply to a power-status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerProbe {
    /// Nothing came back; the device is absent or asleep.
    NoReply,
    On,
    Off,
    /// A reply that matches neither marker. Logged and otherwise ignored.
    Unexpected,
}

pub trait Variant: Send + Sync {
    fn name(&self) -> &'static str;

    /// Wire names of the state table, in index order.
    fn keys(&self) -> &'static [&'static str];

    /// State values at process start, parallel to [`Variant::keys`].
    fn initial_values(&self) -> Vec<String>;

    /// Key indices in the order a freshly connected client receives them.
    fn snapshot_order(&self) -> &'static [usize];

    /// Queries enqueued as one batch whenever the device turns out to be on.
    fn initial_queries(&self) -> &'static [&'static [u8]];

    /// The circular polling schedule used while the device is on.
    fn normal_queries(&self) -> &'static [&'static [u8]];

    /// Query that reveals whether the device is powered on.
    fn power_probe(&self) -> &'static [u8];

    /// The queued command that asks the bridge to power the device on.
    fn power_on_command(&self) -> &'static [u8];

    /// The queued command that powers the device off.
    fn power_off_command(&self) -> &'static [u8];

    /// Raw bytes that wake the device from its off state.
    fn power_pulse(&self) -> &'static [u8];

    fn classify_power_reply(&self, reply: &[u8]) -> PowerProbe;

    fn power_index(&self) -> usize;
    fn fault_index(&self) -> usize;

    /// Fault value when the device does not answer at all.
    fn absent_fault(&self) -> &'static str;
    /// Fault value once the device reports being on.
    fn on_fault(&self) -> &'static str;
    /// Fault value once the device reports being off.
    fn off_fault(&self) -> &'static str;
    /// Transient fault value while a power-on pulse settles.
    fn powering_up_fault(&self) -> &'static str;

    /// Resets the live meters and button positions to their off shape.
    fn set_off_data(&self, device: &Device);

    /// Feeds one serial reply into the state cache.
    fn handle_reply(&self, device: &Device, reply: &str);

    /// Translates a remote-protocol control line into queued commands.
    ///
    /// `None` means the line is not recognized. An empty batch means the
    /// line was recognized but asks for nothing (e.g. a tune button
    /// release).
    fn client_command(&self, message: &str) -> Option<Vec<Vec<u8>>>;
}

/// Parses an ASCII integer field, tolerating surrounding whitespace.
pub(crate) fn parse_number(data: &str) -> Option<i64> {
    data.trim().parse().ok()
}

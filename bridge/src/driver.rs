//! The serial-side polling loop.
//!
//! A four-state machine per device: find the device, learn its power
//! state, then either keep probing a powered-off device or round-robin the
//! normal queries of a powered-on one, draining queued commands first.
//! Loss of the device is never fatal; the machine falls back and keeps
//! retrying while the fault key tells clients what happened.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::device::Device;
use crate::serial::SerialLink;
use crate::variant::{PowerProbe, Variant as _};

/// Pace of the polling loop, roughly 40 iterations per second.
const POLL_CADENCE: Duration = Duration::from_millis(25);

/// Reply wait for ordinary exchanges.
const REPLY_WAIT: Duration = Duration::from_millis(500);

/// Reply wait for the keepalive probe of a powered-off device.
const KEEPALIVE_WAIT: Duration = Duration::from_millis(1500);

/// Settle time after switching the device's power.
const POWER_SETTLE: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    /// No contact with the device yet.
    Unknown,
    /// The device answered the attention poke; power state unknown.
    ProbingPower,
    /// Connected, powered off.
    Off,
    /// Connected, powered on.
    On,
}

pub struct Driver<S> {
    device: Arc<Device>,
    link: SerialLink<S>,
    state: DriverState,
    next_query: usize,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(device: Arc<Device>, stream: S) -> Self {
        Self {
            device,
            link: SerialLink::new(stream),
            state: DriverState::Unknown,
            next_query: 0,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(device = self.device.name(), "driver started");
        loop {
            self.step().await;
            tokio::time::sleep(POLL_CADENCE).await;
        }
    }

    async fn step(&mut self) {
        let variant = self.device.variant();

        match self.state {
            DriverState::Unknown => {
                // Poke at the device -- is it connected?
                let reply = self.send_receive(b";", REPLY_WAIT, 1).await;
                if reply == b";" {
                    self.set_state(DriverState::ProbingPower);
                } else {
                    self.device.update(variant.fault_index(), variant.absent_fault());
                }
            }
            DriverState::ProbingPower => {
                let reply = self.send_receive(variant.power_probe(), REPLY_WAIT, 1).await;
                self.interpret_power_reply(&reply);
            }
            DriverState::Off => {
                match self.device.dequeue() {
                    Some(command) if command == variant.power_on_command() => {
                        // The power rail wants a raw pulse, not a command.
                        let _ = self.send_receive(variant.power_pulse(), REPLY_WAIT, 1).await;
                        self.device
                            .update(variant.fault_index(), variant.powering_up_fault());
                        tokio::time::sleep(POWER_SETTLE).await;
                        self.set_state(DriverState::Unknown);
                    }
                    other => {
                        if let Some(command) = other {
                            tracing::debug!(
                                device = self.device.name(),
                                command = %String::from_utf8_lossy(&command),
                                "discarding command while device is off"
                            );
                        }
                        let reply = self
                            .send_receive(variant.power_probe(), KEEPALIVE_WAIT, 1)
                            .await;
                        self.interpret_power_reply(&reply);
                    }
                }
            }
            DriverState::On => {
                let command = match self.device.dequeue() {
                    Some(command) => command,
                    None => {
                        let query = variant.normal_queries()[self.next_query];
                        self.next_query = (self.next_query + 1) % variant.normal_queries().len();
                        query.to_vec()
                    }
                };

                let reply = self.send_receive(&command, REPLY_WAIT, 2).await;

                if command == variant.power_off_command() {
                    self.device.update(variant.power_index(), "0");
                    variant.set_off_data(&self.device);
                    self.set_state(DriverState::ProbingPower);
                    tokio::time::sleep(POWER_SETTLE).await;
                } else if reply.is_empty() {
                    variant.set_off_data(&self.device);
                    self.device.update(variant.fault_index(), variant.absent_fault());
                    self.set_state(DriverState::Unknown);
                } else {
                    let text = String::from_utf8_lossy(&reply);
                    variant.handle_reply(&self.device, &text);
                }
            }
        }
    }

    fn interpret_power_reply(&mut self, reply: &[u8]) {
        let variant = self.device.variant();

        match variant.classify_power_reply(reply) {
            PowerProbe::NoReply => {
                self.device.update(variant.power_index(), "0");
                self.device.update(variant.fault_index(), variant.absent_fault());
                self.set_state(DriverState::Unknown);
            }
            PowerProbe::On => {
                self.device.update(variant.power_index(), "1");
                self.device.update(variant.fault_index(), variant.on_fault());
                self.device.enqueue(
                    variant
                        .initial_queries()
                        .iter()
                        .map(|query| query.to_vec())
                        .collect(),
                );
                self.set_state(DriverState::On);
            }
            PowerProbe::Off => {
                self.device.update(variant.power_index(), "0");
                self.device.update(variant.fault_index(), variant.off_fault());
                self.set_state(DriverState::Off);
            }
            PowerProbe::Unexpected => {
                tracing::warn!(
                    device = self.device.name(),
                    reply = %String::from_utf8_lossy(reply),
                    "unexpected power probe reply"
                );
            }
        }
    }

    fn set_state(&mut self, new: DriverState) {
        if self.state != new {
            tracing::info!(
                device = self.device.name(),
                "driver state {:?} -> {:?}",
                self.state,
                new
            );
            self.state = new;
        }
    }

    async fn send_receive(&mut self, command: &[u8], wait: Duration, attempts: u32) -> Vec<u8> {
        match self.link.send_receive(command, wait, attempts).await {
            Ok(reply) => reply,
            Err(error) => {
                // I/O trouble on the port reads the same as an absent device.
                tracing::warn!(device = self.device.name(), %error, "serial exchange failed");
                Vec::new()
            }
        }
    }
}

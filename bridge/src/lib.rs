//! Serial-to-network bridge for the Elecraft KPA500 amplifier and KAT500
//! antenna tuner.
//!
//! The bridge owns each device's serial port, keeps a cached image of the
//! device's observable state, and multiplexes that image plus control
//! commands over any number of TCP clients speaking the "KPA500-Remote"
//! line protocol. The same cache backs a small HTTP/JSON API.
//!
//! One [`device::Device`] exists per physical device. A [`driver::Driver`]
//! polls the serial side and is the only writer of device state; the
//! [`remote`] server and the [`http`] API read state and enqueue commands.

pub mod bands;
pub mod device;
pub mod driver;
pub mod http;
pub mod kat500;
pub mod kpa500;
pub mod remote;
pub mod serial;
pub mod variant;

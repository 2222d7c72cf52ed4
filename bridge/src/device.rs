//! The per-device state cache, command queue and client fan-out.
//!
//! A [`Device`] is shared between exactly one driver task (the only writer
//! of state values) and any number of remote-protocol / HTTP tasks. All
//! shared data lives behind a single mutex that is only ever held for O(1)
//! work, never across an await point.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::variant::Variant;

/// Upper bound on queued device commands. The newest batch is dropped when
/// the queue is full.
pub const MAX_QUEUED_COMMANDS: usize = 64;

/// Handle identifying one subscribed client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Indices whose values changed since the client last received them.
///
/// FIFO in insertion order, with a bitset for O(1) membership so an index
/// is never queued twice.
#[derive(Debug, Default)]
struct UpdateSet {
    order: VecDeque<usize>,
    members: u32,
}

impl UpdateSet {
    fn insert(&mut self, index: usize) {
        debug_assert!(index < 32);
        let bit = 1 << index;
        if self.members & bit == 0 {
            self.members |= bit;
            self.order.push_back(index);
        }
    }

    fn pop(&mut self) -> Option<usize> {
        let index = self.order.pop_front()?;
        self.members &= !(1 << index);
        Some(index)
    }
}

struct Inner {
    values: Vec<String>,
    queue: VecDeque<Vec<u8>>,
    sessions: HashMap<ClientId, UpdateSet>,
    next_client: u64,
}

pub struct Device {
    variant: &'static dyn Variant,
    inner: Mutex<Inner>,
}

impl Device {
    pub fn new(variant: &'static dyn Variant) -> Self {
        let values = variant.initial_values();
        debug_assert_eq!(values.len(), variant.keys().len());

        Self {
            variant,
            inner: Mutex::new(Inner {
                values,
                queue: VecDeque::new(),
                sessions: HashMap::new(),
                next_client: 0,
            }),
        }
    }

    pub fn variant(&self) -> &'static dyn Variant {
        self.variant
    }

    pub fn name(&self) -> &'static str {
        self.variant.name()
    }

    pub fn keys(&self) -> &'static [&'static str] {
        self.variant.keys()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, index: usize) -> String {
        self.lock().values[index].clone()
    }

    /// A copy of all state values, in key order.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().values.clone()
    }

    /// Stores a new value and marks the index dirty for every subscriber.
    ///
    /// Writing the already-stored value notifies nobody.
    pub fn update(&self, index: usize, value: &str) {
        let mut inner = self.lock();
        if inner.values[index] == value {
            return;
        }
        inner.values[index] = value.to_owned();
        for session in inner.sessions.values_mut() {
            session.insert(index);
        }
    }

    /// Appends a batch of commands to the device queue.
    ///
    /// The batch is pushed under one lock acquisition, so its commands reach
    /// the wire contiguously. If the batch does not fit it is dropped whole.
    pub fn enqueue(&self, commands: Vec<Vec<u8>>) {
        let mut inner = self.lock();
        if inner.queue.len() + commands.len() > MAX_QUEUED_COMMANDS {
            tracing::warn!(
                device = self.name(),
                dropped = commands.len(),
                "command queue full, dropping newest commands"
            );
            return;
        }
        inner.queue.extend(commands);
    }

    pub fn dequeue(&self) -> Option<Vec<u8>> {
        self.lock().queue.pop_front()
    }

    /// Registers a client session, pre-loading `seed` into its update set so
    /// the client receives a full snapshot in a well-known order.
    pub fn subscribe(&self, seed: &[usize]) -> ClientId {
        let mut inner = self.lock();
        let id = ClientId(inner.next_client);
        inner.next_client += 1;

        let mut updates = UpdateSet::default();
        for &index in seed {
            updates.insert(index);
        }
        inner.sessions.insert(id, updates);

        id
    }

    pub fn unsubscribe(&self, id: ClientId) {
        self.lock().sessions.remove(&id);
    }

    /// Takes the oldest pending update for `id`, as a key/value pair.
    pub fn pop_update(&self, id: ClientId) -> Option<(&'static str, String)> {
        let mut inner = self.lock();
        let index = inner.sessions.get_mut(&id)?.pop()?;
        Some((self.variant.keys()[index], inner.values[index].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpa500::KPA500;

    fn device() -> Device {
        Device::new(&KPA500)
    }

    #[test]
    fn get_returns_the_last_written_value() {
        let device = device();
        device.update(5, "20m");
        device.update(5, "40m");
        assert_eq!(device.get(5), "40m");
    }

    #[test]
    fn update_notifies_each_subscriber_once() {
        let device = device();
        let a = device.subscribe(&[]);
        let b = device.subscribe(&[]);

        device.update(9, "120");
        device.update(9, "121");

        assert_eq!(device.pop_update(a), Some(("amp::meter::Current", "121".to_owned())));
        assert_eq!(device.pop_update(a), None);
        assert_eq!(device.pop_update(b), Some(("amp::meter::Current", "121".to_owned())));
    }

    #[test]
    fn unchanged_value_does_not_notify() {
        let device = device();
        let client = device.subscribe(&[]);

        let current = device.get(4);
        device.update(4, &current);

        assert_eq!(device.pop_update(client), None);
    }

    #[test]
    fn updates_are_delivered_in_observation_order() {
        let device = device();
        let client = device.subscribe(&[]);

        device.update(10, "100");
        device.update(11, "15");
        device.update(10, "110");

        let (first, value) = device.pop_update(client).expect("update pending");
        assert_eq!(first, "amp::meter::Power");
        assert_eq!(value, "110");
        let (second, _) = device.pop_update(client).expect("update pending");
        assert_eq!(second, "amp::meter::SWR");
        assert_eq!(device.pop_update(client), None);
    }

    #[test]
    fn subscribe_seeds_the_snapshot_order() {
        let device = device();
        let client = device.subscribe(&[7, 16, 6]);

        assert_eq!(device.pop_update(client).map(|(k, _)| k), Some("amp::firmware"));
        assert_eq!(device.pop_update(client).map(|(k, _)| k), Some("amp::serial"));
        assert_eq!(device.pop_update(client).map(|(k, _)| k), Some("amp::fault"));
        assert_eq!(device.pop_update(client), None);
    }

    #[test]
    fn unsubscribed_clients_receive_nothing() {
        let device = device();
        let client = device.subscribe(&[0]);
        device.unsubscribe(client);
        assert_eq!(device.pop_update(client), None);
    }

    #[test]
    fn queue_is_fifo_and_batches_stay_contiguous() {
        let device = device();
        device.enqueue(vec![b"^ON1;".to_vec()]);
        device.enqueue(vec![b";".to_vec(), b"^RVM;".to_vec(), b"^SN;".to_vec()]);

        assert_eq!(device.dequeue(), Some(b"^ON1;".to_vec()));
        assert_eq!(device.dequeue(), Some(b";".to_vec()));
        assert_eq!(device.dequeue(), Some(b"^RVM;".to_vec()));
        assert_eq!(device.dequeue(), Some(b"^SN;".to_vec()));
        assert_eq!(device.dequeue(), None);
    }

    #[test]
    fn full_queue_drops_the_newest_batch() {
        let device = device();
        for _ in 0..MAX_QUEUED_COMMANDS {
            device.enqueue(vec![b"^FL;".to_vec()]);
        }
        device.enqueue(vec![b"^ON0;".to_vec()]);

        let mut drained = 0;
        while let Some(command) = device.dequeue() {
            assert_eq!(command, b"^FL;");
            drained += 1;
        }
        assert_eq!(drained, MAX_QUEUED_COMMANDS);
    }
}

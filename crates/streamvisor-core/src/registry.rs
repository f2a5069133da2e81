//! Per-owner bookkeeping of running streams.
//!
//! The registry is a plain data structure; the supervisor puts it behind an
//! async `RwLock`. Admission reserves a slot so the owner's cap holds even
//! while a launch is in flight.

use crate::config::StreamIdPolicy;
use crate::stream::{OwnerId, StreamHandle, StreamId};
use std::collections::HashMap;

/// A reserved slot for one owner, consumed by [`StreamRegistry::register`]
/// or returned with [`StreamRegistry::release`].
#[must_use = "an admission holds a slot until it is registered or released"]
#[derive(Debug)]
pub struct Admission {
    owner: OwnerId,
}

/// Identifies one registered handle independently of its (reusable) stream ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamKey {
    pub owner: OwnerId,
    pub stream_id: StreamId,
    pub serial: u64,
}

struct RegisteredStream<H> {
    stream_id: StreamId,
    serial: u64,
    handle: StreamHandle<H>,
}

struct OwnerStreams<H> {
    entries: Vec<RegisteredStream<H>>,
    reserved: usize,
    issued: u64,
}

impl<H> Default for OwnerStreams<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            reserved: 0,
            issued: 0,
        }
    }
}

impl<H> OwnerStreams<H> {
    fn occupied(&self) -> usize {
        self.entries.len() + self.reserved
    }

    fn contains(&self, stream_id: &StreamId) -> bool {
        self.entries.iter().any(|e| &e.stream_id == stream_id)
    }

    fn next_id(&mut self, policy: StreamIdPolicy) -> StreamId {
        match policy {
            StreamIdPolicy::LiveCount => {
                // `stream_<live + 1>`, skipping forward only if that label is still taken
                let mut n = self.entries.len() as u64 + 1;
                while self.contains(&StreamId::sequential(n)) {
                    n += 1;
                }
                StreamId::sequential(n)
            }
            StreamIdPolicy::Monotonic => {
                self.issued += 1;
                StreamId::sequential(self.issued)
            }
        }
    }
}

pub struct StreamRegistry<H> {
    limit: usize,
    policy: StreamIdPolicy,
    owners: HashMap<OwnerId, OwnerStreams<H>>,
    next_serial: u64,
}

impl<H> StreamRegistry<H> {
    pub fn new(limit: usize, policy: StreamIdPolicy) -> Self {
        Self {
            limit,
            policy,
            owners: HashMap::new(),
            next_serial: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Reserves a slot for `owner`, or `None` if the owner is at the cap.
    pub fn try_admit(&mut self, owner: OwnerId) -> Option<Admission> {
        let streams = self.owners.entry(owner).or_default();
        if streams.occupied() >= self.limit {
            return None;
        }
        streams.reserved += 1;
        Some(Admission { owner })
    }

    /// Reserves a slot for `owner` even past the cap.
    ///
    /// Used to keep a stopped stream's slot occupied until its process is gone.
    pub fn reserve(&mut self, owner: OwnerId) -> Admission {
        self.owners.entry(owner).or_default().reserved += 1;
        Admission { owner }
    }

    /// Returns an unused reservation
    pub fn release(&mut self, admission: Admission) {
        if let Some(streams) = self.owners.get_mut(&admission.owner) {
            streams.reserved = streams.reserved.saturating_sub(1);
        }
        self.prune(admission.owner);
    }

    /// Inserts `handle` under a freshly generated stream ID, consuming the reservation.
    pub fn register(&mut self, admission: Admission, handle: StreamHandle<H>) -> StreamKey {
        self.next_serial += 1;
        let serial = self.next_serial;
        let streams = self.owners.entry(admission.owner).or_default();
        streams.reserved = streams.reserved.saturating_sub(1);

        let stream_id = streams.next_id(self.policy);
        streams.entries.push(RegisteredStream {
            stream_id: stream_id.clone(),
            serial,
            handle,
        });

        StreamKey {
            owner: admission.owner,
            stream_id,
            serial,
        }
    }

    /// Deletes and returns the handle; `None` if it is not (or no longer) registered.
    ///
    /// The handle's cancellation token is set, so its monitor stops quietly.
    pub fn remove(&mut self, owner: OwnerId, stream_id: &StreamId) -> Option<StreamHandle<H>> {
        let streams = self.owners.get_mut(&owner)?;
        let index = streams
            .entries
            .iter()
            .position(|e| &e.stream_id == stream_id)?;
        let removed = streams.entries.remove(index).handle;
        removed.release();
        self.prune(owner);
        Some(removed)
    }

    /// Like [`remove`](Self::remove) but matches the exact registration
    pub fn remove_key(&mut self, key: &StreamKey) -> Option<StreamHandle<H>> {
        let streams = self.owners.get_mut(&key.owner)?;
        let index = streams.entries.iter().position(|e| e.serial == key.serial)?;
        let removed = streams.entries.remove(index).handle;
        removed.release();
        self.prune(key.owner);
        Some(removed)
    }

    pub fn get_mut(&mut self, key: &StreamKey) -> Option<&mut StreamHandle<H>> {
        self.owners
            .get_mut(&key.owner)?
            .entries
            .iter_mut()
            .find(|e| e.serial == key.serial)
            .map(|e| &mut e.handle)
    }

    /// Removes every handle of one owner, in insertion order
    pub fn remove_owner(&mut self, owner: OwnerId) -> Vec<(StreamId, StreamHandle<H>)> {
        let Some(mut streams) = self.owners.remove(&owner) else {
            return Vec::new();
        };
        let drained: Vec<_> = streams
            .entries
            .drain(..)
            .map(|e| {
                e.handle.release();
                (e.stream_id, e.handle)
            })
            .collect();

        // In-flight launches keep their reservations
        if streams.reserved > 0 || self.policy == StreamIdPolicy::Monotonic {
            self.owners.insert(owner, streams);
        }
        drained
    }

    /// Empties the registry, handing back every handle
    pub fn drain(&mut self) -> Vec<(OwnerId, StreamId, StreamHandle<H>)> {
        self.owners
            .drain()
            .flat_map(|(owner, streams)| {
                streams.entries.into_iter().map(move |e| {
                    e.handle.release();
                    (owner, e.stream_id, e.handle)
                })
            })
            .collect()
    }

    /// One owner's streams in insertion order
    pub fn list(&mut self, owner: OwnerId) -> Vec<(&StreamId, &mut StreamHandle<H>)> {
        self.owners
            .get_mut(&owner)
            .map(|streams| {
                streams
                    .entries
                    .iter_mut()
                    .map(|e| (&e.stream_id, &mut e.handle))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, owner: OwnerId, stream_id: &StreamId) -> bool {
        self.owners
            .get(&owner)
            .is_some_and(|streams| streams.contains(stream_id))
    }

    /// Number of registered handles for `owner`
    pub fn active_count(&self, owner: OwnerId) -> usize {
        self.owners.get(&owner).map_or(0, |s| s.entries.len())
    }

    pub fn total_active(&self) -> usize {
        self.owners.values().map(|s| s.entries.len()).sum()
    }

    fn prune(&mut self, owner: OwnerId) {
        // Monotonic counters must survive an empty owner
        if self.policy == StreamIdPolicy::Monotonic {
            return;
        }
        if self
            .owners
            .get(&owner)
            .is_some_and(|s| s.entries.is_empty() && s.reserved == 0)
        {
            self.owners.remove(&owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamConfig;
    use tokio_util::sync::CancellationToken;

    const OWNER: OwnerId = OwnerId(42);

    fn handle(token: &CancellationToken) -> StreamHandle<()> {
        StreamHandle::new(
            (),
            None,
            StreamConfig::new("https://src", "rtmp://dst").unwrap(),
            token.clone(),
        )
    }

    fn admit_and_register(registry: &mut StreamRegistry<()>) -> StreamKey {
        let admission = registry.try_admit(OWNER).expect("admitted");
        registry.register(admission, handle(&CancellationToken::new()))
    }

    #[test]
    fn test_back_to_back_admissions_respect_cap() {
        let mut registry = StreamRegistry::<()>::new(1, StreamIdPolicy::LiveCount);
        let first = registry.try_admit(OWNER);
        let second = registry.try_admit(OWNER);
        assert!(first.is_some());
        assert!(second.is_none());

        // Other owners are unaffected
        assert!(registry.try_admit(OwnerId(7)).is_some());
    }

    #[test]
    fn test_released_admission_frees_slot() {
        let mut registry = StreamRegistry::<()>::new(1, StreamIdPolicy::LiveCount);
        let admission = registry.try_admit(OWNER).unwrap();
        registry.release(admission);
        assert!(registry.try_admit(OWNER).is_some());
    }

    #[test]
    fn test_registered_handle_counts_against_cap() {
        let mut registry = StreamRegistry::<()>::new(2, StreamIdPolicy::LiveCount);
        admit_and_register(&mut registry);
        admit_and_register(&mut registry);
        assert_eq!(registry.active_count(OWNER), 2);
        assert!(registry.try_admit(OWNER).is_none());
    }

    #[test]
    fn test_live_count_ids_are_reused() {
        let mut registry = StreamRegistry::<()>::new(1, StreamIdPolicy::LiveCount);
        let first = admit_and_register(&mut registry);
        assert_eq!(first.stream_id.as_str(), "stream_1");

        assert!(registry.remove(OWNER, &first.stream_id).is_some());

        // Legacy behavior: the next stream gets the same label again
        let second = admit_and_register(&mut registry);
        assert_eq!(second.stream_id.as_str(), "stream_1");
        assert_ne!(first.serial, second.serial);
    }

    #[test]
    fn test_live_count_skips_label_still_in_use() {
        let mut registry = StreamRegistry::<()>::new(3, StreamIdPolicy::LiveCount);
        let a = admit_and_register(&mut registry);
        let b = admit_and_register(&mut registry);
        assert_eq!(b.stream_id.as_str(), "stream_2");

        registry.remove(OWNER, &a.stream_id).unwrap();
        // live count is 1 so the rule proposes stream_2, which is still taken
        let c = admit_and_register(&mut registry);
        assert_eq!(c.stream_id.as_str(), "stream_3");
        assert!(registry.contains(OWNER, &b.stream_id));
    }

    #[test]
    fn test_monotonic_ids_never_reset() {
        let mut registry = StreamRegistry::<()>::new(1, StreamIdPolicy::Monotonic);
        let first = admit_and_register(&mut registry);
        registry.remove(OWNER, &first.stream_id).unwrap();
        let second = admit_and_register(&mut registry);
        assert_eq!(first.stream_id.as_str(), "stream_1");
        assert_eq!(second.stream_id.as_str(), "stream_2");
    }

    #[test]
    fn test_remove_is_idempotent_and_cancels() {
        let mut registry = StreamRegistry::<()>::new(1, StreamIdPolicy::LiveCount);
        let token = CancellationToken::new();
        let admission = registry.try_admit(OWNER).unwrap();
        let key = registry.register(admission, handle(&token));

        assert!(registry.remove(OWNER, &key.stream_id).is_some());
        assert!(token.is_cancelled());
        assert!(registry.remove(OWNER, &key.stream_id).is_none());
        assert!(registry.remove_key(&key).is_none());
    }

    #[test]
    fn test_remove_key_ignores_reused_label() {
        let mut registry = StreamRegistry::<()>::new(1, StreamIdPolicy::LiveCount);
        let old = admit_and_register(&mut registry);
        registry.remove(OWNER, &old.stream_id).unwrap();
        let new = admit_and_register(&mut registry);
        assert_eq!(old.stream_id, new.stream_id);

        // A stale key must not match the new registration
        assert!(registry.get_mut(&old).is_none());
        assert!(registry.remove_key(&old).is_none());
        assert!(registry.get_mut(&new).is_some());
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let mut registry = StreamRegistry::<()>::new(3, StreamIdPolicy::LiveCount);
        for _ in 0..3 {
            admit_and_register(&mut registry);
        }
        let ids: Vec<_> = registry
            .list(OWNER)
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(ids, ["stream_1", "stream_2", "stream_3"]);
        assert!(registry.list(OwnerId(1)).is_empty());
    }

    #[test]
    fn test_remove_owner_keeps_reservations() {
        let mut registry = StreamRegistry::<()>::new(2, StreamIdPolicy::LiveCount);
        admit_and_register(&mut registry);
        let pending = registry.try_admit(OWNER).unwrap();

        let removed = registry.remove_owner(OWNER);
        assert_eq!(removed.len(), 1);
        assert_eq!(registry.active_count(OWNER), 0);

        // The in-flight reservation still occupies one of the two slots
        assert!(registry.try_admit(OWNER).is_some());
        assert!(registry.try_admit(OWNER).is_none());
        registry.release(pending);
    }

    #[test]
    fn test_reserve_ignores_cap_until_released() {
        let mut registry = StreamRegistry::<()>::new(1, StreamIdPolicy::LiveCount);
        let key = admit_and_register(&mut registry);
        registry.remove(OWNER, &key.stream_id).unwrap();
        let held = registry.reserve(OWNER);
        assert!(registry.try_admit(OWNER).is_none());

        registry.release(held);
        assert!(registry.try_admit(OWNER).is_some());
    }

    #[test]
    fn test_drain_empties_everything() {
        let mut registry = StreamRegistry::<()>::new(1, StreamIdPolicy::LiveCount);
        admit_and_register(&mut registry);
        let admission = registry.try_admit(OwnerId(9)).unwrap();
        registry.register(admission, handle(&CancellationToken::new()));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.total_active(), 0);
    }
}

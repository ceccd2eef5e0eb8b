// Copyright 2024 the parsat developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! The event map is the core data structure of the event-driven balancer:
//! it records, per job, the latest known `(demand, priority)` event, and it
//! is what travels up (as a diff) and down (as a broadcast) the balancing
//! tree. Events are absolute, not incremental, which is what makes lost
//! messages harmless: the next broadcast carrying a newer event per job
//! recovers any dropped state.

use fxhash::FxHashMap;

use crate::{Error, JobId, Result};

/// Zero-demand entries are garbage collected once their last update is
/// this many global epochs in the past.
const ZERO_ENTRY_TTL_EPOCHS: u64 = 24;

// ----------------------------------------------------------------------------
// --- EVENT ------------------------------------------------------------------
// ----------------------------------------------------------------------------
/// One balancing event: job `job_id` declared `demand` processes with the
/// given `priority` at its per-job `epoch`. Events are totally ordered by
/// `(job_id, epoch)`; a newer epoch always supersedes an older one. An
/// event with `epoch == u32::MAX` and zero demand denotes termination.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Event {
    pub job_id: JobId,
    pub epoch: u32,
    pub demand: i32,
    pub priority: f32,
}

impl Event {
    /// Whether this event marks the final termination of its job.
    pub fn is_termination(&self) -> bool {
        self.epoch == u32::MAX && self.demand == 0
    }
}

// ----------------------------------------------------------------------------
// --- EVENT MAP --------------------------------------------------------------
// ----------------------------------------------------------------------------
/// Latest known event per job plus the global balancing epoch. The balancer
/// keeps two of these: the *state map* (globally agreed latest view) and the
/// *diff map* (local changes not yet propagated).
#[derive(Debug, Clone, Default)]
pub struct EventMap {
    global_epoch: u64,
    entries: FxHashMap<JobId, Event>,
    /// Global epoch at which an entry's demand was last seen at zero.
    /// Local bookkeeping only; never serialized.
    zero_since: FxHashMap<JobId, u64>,
}

impl PartialEq for EventMap {
    fn eq(&self, other: &Self) -> bool {
        self.global_epoch == other.global_epoch && self.entries == other.entries
    }
}

impl EventMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn global_epoch(&self) -> u64 {
        self.global_epoch
    }

    pub fn set_global_epoch(&mut self, epoch: u64) {
        self.global_epoch = self.global_epoch.max(epoch);
    }

    /// Increments the global epoch counter. Only the root of the balancing
    /// tree does this, right before broadcasting.
    pub fn bump_global_epoch(&mut self) {
        self.global_epoch += 1;
    }

    pub fn get(&self, job_id: JobId) -> Option<&Event> {
        self.entries.get(&job_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Event> {
        self.entries.values()
    }

    /// Inserts the event if it is novel, i.e. if no event with an equal or
    /// newer epoch is known for the same job. Returns whether it was
    /// inserted. This is the sole mutation path for entries, which is what
    /// makes per-job epochs monotone at every node.
    pub fn insert_if_novel(&mut self, event: Event) -> bool {
        match self.entries.get(&event.job_id) {
            Some(present) if present.epoch >= event.epoch => false,
            _ => {
                if event.demand > 0 {
                    self.zero_since.remove(&event.job_id);
                }
                self.entries.insert(event.job_id, event);
                true
            }
        }
    }

    /// Merges `other` into this map: every novel event is taken over and
    /// the global epoch advances to the maximum of both. Idempotent.
    pub fn update_by(&mut self, other: &EventMap) {
        for event in other.entries() {
            self.insert_if_novel(*event);
        }
        self.global_epoch = self.global_epoch.max(other.global_epoch);
    }

    /// Drops every entry that `state` has subsumed, i.e. for which the
    /// state map knows an equal or newer epoch. Used to shrink the local
    /// diff map after a broadcast has been digested.
    pub fn filter_by(&mut self, state: &EventMap) {
        self.entries.retain(|job_id, event| match state.get(*job_id) {
            Some(s) => s.epoch < event.epoch,
            None => true,
        });
        self.zero_since.retain(|job_id, _| self.entries.contains_key(job_id));
    }

    /// Garbage-collects zero-demand entries that have been stale for long
    /// enough that no straggler message can still refer to them.
    pub fn remove_old_zeros(&mut self) {
        let now = self.global_epoch;
        let mut expired = Vec::new();
        for event in self.entries.values() {
            if event.demand != 0 {
                continue;
            }
            let since = *self.zero_since.entry(event.job_id).or_insert(now);
            if now.saturating_sub(since) >= ZERO_ENTRY_TTL_EPOCHS {
                expired.push(event.job_id);
            }
        }
        for job_id in expired {
            self.entries.remove(&job_id);
            self.zero_since.remove(&job_id);
        }
    }

    // ------------------------------------------------------------------------
    // --- WIRE FORMAT --------------------------------------------------------
    // ------------------------------------------------------------------------
    // [global_epoch: u64][count: u32][count x {job_id: i32, epoch: u32,
    //  demand: i32, priority: f32}], all little endian. Entries are sorted
    // by job id so that equal maps serialize to equal bytes.

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + 16 * self.entries.len());
        out.extend_from_slice(&self.global_epoch.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        let mut sorted: Vec<&Event> = self.entries.values().collect();
        sorted.sort_unstable_by_key(|e| e.job_id);
        for event in sorted {
            out.extend_from_slice(&event.job_id.to_le_bytes());
            out.extend_from_slice(&event.epoch.to_le_bytes());
            out.extend_from_slice(&event.demand.to_le_bytes());
            out.extend_from_slice(&event.priority.to_le_bytes());
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<EventMap> {
        let malformed = |what: &str| Error::ProtocolViolation(format!("event map: {what}"));
        if data.len() < 12 {
            return Err(malformed("truncated header"));
        }
        let global_epoch = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let count = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
        if data.len() != 12 + 16 * count {
            return Err(malformed("length does not match entry count"));
        }
        let mut map = EventMap {
            global_epoch,
            ..Default::default()
        };
        for i in 0..count {
            let at = 12 + 16 * i;
            let event = Event {
                job_id: i32::from_le_bytes(data[at..at + 4].try_into().unwrap()),
                epoch: u32::from_le_bytes(data[at + 4..at + 8].try_into().unwrap()),
                demand: i32::from_le_bytes(data[at + 8..at + 12].try_into().unwrap()),
                priority: f32::from_le_bytes(data[at + 12..at + 16].try_into().unwrap()),
            };
            if event.demand < 0 {
                return Err(malformed("negative demand"));
            }
            map.entries.insert(event.job_id, event);
        }
        Ok(map)
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_event_map {
    use crate::{Event, EventMap};

    fn ev(job_id: i32, epoch: u32, demand: i32, priority: f32) -> Event {
        Event { job_id, epoch, demand, priority }
    }

    #[test]
    fn novel_events_are_inserted() {
        let mut map = EventMap::new();
        assert!(map.insert_if_novel(ev(1, 1, 4, 0.5)));
        assert_eq!(1, map.len());
        assert_eq!(4, map.get(1).unwrap().demand);
    }

    #[test]
    fn stale_and_duplicate_events_are_rejected() {
        let mut map = EventMap::new();
        assert!(map.insert_if_novel(ev(1, 3, 4, 0.5)));
        assert!(!map.insert_if_novel(ev(1, 3, 9, 0.5)));
        assert!(!map.insert_if_novel(ev(1, 2, 9, 0.5)));
        assert_eq!(4, map.get(1).unwrap().demand);
    }

    #[test]
    fn epochs_never_regress_under_update_by() {
        let mut state = EventMap::new();
        state.insert_if_novel(ev(1, 5, 8, 0.5));

        let mut stale = EventMap::new();
        stale.insert_if_novel(ev(1, 2, 1, 0.5));
        state.update_by(&stale);

        assert_eq!(5, state.get(1).unwrap().epoch);
    }

    #[test]
    fn update_by_is_idempotent() {
        let mut a = EventMap::new();
        a.insert_if_novel(ev(1, 1, 4, 0.5));
        let mut b = EventMap::new();
        b.insert_if_novel(ev(1, 2, 6, 0.5));
        b.insert_if_novel(ev(2, 1, 3, 0.9));

        a.update_by(&b);
        let once = a.clone();
        a.update_by(&b);
        assert_eq!(once, a);
    }

    #[test]
    fn filter_by_drops_subsumed_diffs() {
        let mut diffs = EventMap::new();
        diffs.insert_if_novel(ev(1, 2, 4, 0.5));
        diffs.insert_if_novel(ev(2, 7, 3, 0.9));

        let mut state = EventMap::new();
        state.insert_if_novel(ev(1, 2, 4, 0.5));
        state.insert_if_novel(ev(2, 5, 1, 0.9));

        diffs.filter_by(&state);
        assert!(diffs.get(1).is_none());
        assert_eq!(7, diffs.get(2).unwrap().epoch);
    }

    #[test]
    fn old_zero_demand_entries_are_garbage_collected() {
        let mut map = EventMap::new();
        map.insert_if_novel(ev(1, 9, 0, 0.5));
        map.remove_old_zeros();
        assert_eq!(1, map.len());

        for _ in 0..30 {
            map.bump_global_epoch();
        }
        map.remove_old_zeros();
        assert_eq!(0, map.len());
    }

    #[test]
    fn nonzero_entries_survive_garbage_collection() {
        let mut map = EventMap::new();
        map.insert_if_novel(ev(1, 1, 5, 0.5));
        for _ in 0..100 {
            map.bump_global_epoch();
        }
        map.remove_old_zeros();
        assert_eq!(1, map.len());
    }

    #[test]
    fn serialization_round_trips() {
        let mut map = EventMap::new();
        map.insert_if_novel(ev(7, 3, 12, 0.25));
        map.insert_if_novel(ev(2, 1, 0, 0.75));
        map.insert_if_novel(ev(9, u32::MAX, 0, 0.0));
        map.bump_global_epoch();
        map.bump_global_epoch();

        let bytes = map.serialize();
        let back = EventMap::deserialize(&bytes).unwrap();
        assert_eq!(map, back);
    }

    #[test]
    fn truncated_payloads_are_a_protocol_violation() {
        let mut map = EventMap::new();
        map.insert_if_novel(ev(7, 3, 12, 0.25));
        let bytes = map.serialize();
        assert!(EventMap::deserialize(&bytes[..bytes.len() - 1]).is_err());
        assert!(EventMap::deserialize(&bytes[..4]).is_err());
    }
}

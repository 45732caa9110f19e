use std::collections::HashMap;

use crate::{Clock, EditorEvent, EventEntry, EventId, Result, TimelineError, Uri};

/// Width of one clock bucket in seconds.
pub const BUCKET_WIDTH: Clock = 60.0;

/// Latest clock a store accepts, a little under 116 days. Buckets are
/// dense, so this also bounds the bucket table.
pub const MAX_CLOCK: Clock = 1.0e7;

/// Clock mutations may shift neighbours past each other by float noise only.
const CLOCK_EPSILON: Clock = 1e-9;

/// Ordered, invertible editor events indexed two ways at once: per resource
/// and by fixed-width clock buckets spanning all resources.
///
/// Both indexes hold [`EventId`]s into a single arena, so they cannot carry
/// diverging copies of an event. Global index order is clock order with
/// ties kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    entries: HashMap<EventId, EventEntry>,
    by_uri: HashMap<Uri, Vec<EventId>>,
    buckets: Vec<Vec<EventId>>,
    /// Global index of the first event of each bucket.
    offsets: Vec<usize>,
    len: usize,
    next_id: u64,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, id: EventId) -> Option<&EventEntry> {
        self.entries.get(&id)
    }

    /// Inserts after every event whose clock is `<= clock`.
    pub fn insert(&mut self, uri: Uri, clock: Clock, event: EditorEvent) -> Result<EventId> {
        check_clock(clock)?;
        let id = EventId(self.next_id);
        self.next_id += 1;

        let b = bucket_of(clock);
        self.ensure_bucket(b);
        let entries = &self.entries;
        let pos = self.buckets[b].partition_point(|e| entries[e].clock <= clock);
        self.buckets[b].insert(pos, id);

        let track = self.by_uri.entry(uri.clone()).or_default();
        let pos = track.partition_point(|e| entries[e].clock <= clock);
        track.insert(pos, id);

        self.entries.insert(
            id,
            EventEntry {
                id,
                uri,
                clock,
                event,
            },
        );
        self.len += 1;
        self.refresh_offsets(b + 1);
        Ok(id)
    }

    /// Bulk insert for one resource; `events` must be sorted by clock.
    /// Nothing is inserted when the batch is rejected.
    pub fn insert_many_for_uri(
        &mut self,
        uri: &Uri,
        events: impl IntoIterator<Item = (Clock, EditorEvent)>,
    ) -> Result<Vec<EventId>> {
        let events: Vec<(Clock, EditorEvent)> = events.into_iter().collect();
        let mut last: Clock = 0.0;
        for (index, (clock, _)) in events.iter().enumerate() {
            check_clock(*clock)?;
            if *clock < last {
                return Err(TimelineError::ClockOrder {
                    index,
                    clock: *clock,
                });
            }
            last = *clock;
        }
        events
            .into_iter()
            .map(|(clock, event)| self.insert(uri.clone(), clock, event))
            .collect()
    }

    /// Puts a previously removed entry back at exactly `index`, keeping its id.
    pub fn restore(&mut self, entry: EventEntry, index: usize) -> Result<()> {
        check_clock(entry.clock)?;
        if index > self.len {
            return Err(TimelineError::IndexOutOfBounds {
                index,
                len: self.len,
            });
        }
        if self.entries.contains_key(&entry.id) {
            return Err(TimelineError::InvalidOp(format!(
                "event {} already in store",
                entry.id
            )));
        }
        let prev_ok = index == 0 || self.clock_at(index - 1) <= entry.clock;
        let next_ok = index == self.len || self.clock_at(index) >= entry.clock;
        if !prev_ok || !next_ok {
            return Err(TimelineError::ClockOrder {
                index,
                clock: entry.clock,
            });
        }

        let b = bucket_of(entry.clock);
        self.ensure_bucket(b);
        let pos = index
            .checked_sub(self.offsets[b])
            .filter(|p| *p <= self.buckets[b].len())
            .ok_or(TimelineError::StoreDesync(entry.id))?;

        let track_pos = {
            let track = self.by_uri.get(&entry.uri).map(Vec::as_slice).unwrap_or(&[]);
            let lo = track.partition_point(|e| self.entries[e].clock < entry.clock);
            let hi = track.partition_point(|e| self.entries[e].clock <= entry.clock);
            let mut at = hi;
            for (j, other) in track.iter().enumerate().take(hi).skip(lo) {
                if self.index_of(*other).is_some_and(|i| i >= index) {
                    at = j;
                    break;
                }
            }
            at
        };

        self.buckets[b].insert(pos, entry.id);
        self.by_uri
            .entry(entry.uri.clone())
            .or_default()
            .insert(track_pos, entry.id);
        self.next_id = self.next_id.max(entry.id.0 + 1);
        self.entries.insert(entry.id, entry);
        self.len += 1;
        self.refresh_offsets(b + 1);
        Ok(())
    }

    pub fn delete_at(&mut self, index: usize) -> Result<EventEntry> {
        let (b, pos) = self.locate(index)?;
        let id = self.buckets[b][pos];
        let uri = self
            .entries
            .get(&id)
            .map(|e| e.uri.clone())
            .ok_or(TimelineError::StoreDesync(id))?;
        let track = self
            .by_uri
            .get_mut(&uri)
            .ok_or(TimelineError::StoreDesync(id))?;
        let track_pos = track
            .iter()
            .position(|e| *e == id)
            .ok_or(TimelineError::StoreDesync(id))?;

        track.remove(track_pos);
        if track.is_empty() {
            self.by_uri.remove(&uri);
        }
        self.buckets[b].remove(pos);
        self.len -= 1;
        self.refresh_offsets(b + 1);
        self.entries.remove(&id).ok_or(TimelineError::StoreDesync(id))
    }

    /// Removes an event by identity, returning its former global index.
    pub fn delete(&mut self, id: EventId) -> Result<(usize, EventEntry)> {
        let index = self.index_of(id).ok_or(TimelineError::EventNotFound(id))?;
        Ok((index, self.delete_at(index)?))
    }

    /// Swaps the payload of the `track_index`-th event of `uri`; the clock stays.
    pub fn replace_in_track_at(
        &mut self,
        uri: &Uri,
        track_index: usize,
        event: EditorEvent,
    ) -> Result<EditorEvent> {
        let track = self
            .by_uri
            .get(uri)
            .ok_or_else(|| TimelineError::MissingResource(uri.clone()))?;
        let id = *track
            .get(track_index)
            .ok_or(TimelineError::IndexOutOfBounds {
                index: track_index,
                len: track.len(),
            })?;
        self.replace(id, event)
    }

    pub fn replace(&mut self, id: EventId, event: EditorEvent) -> Result<EditorEvent> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(TimelineError::EventNotFound(id))?;
        Ok(std::mem::replace(&mut entry.event, event))
    }

    pub fn at(&self, index: usize) -> Option<&EventEntry> {
        let (b, pos) = self.locate(index).ok()?;
        self.entries.get(&self.buckets[b][pos])
    }

    pub fn index_of(&self, id: EventId) -> Option<usize> {
        let entry = self.entries.get(&id)?;
        let b = bucket_of(entry.clock);
        let pos = self.buckets.get(b)?.iter().position(|e| *e == id)?;
        Some(self.offsets[b] + pos)
    }

    /// Events between two boundaries, where boundary `k` sits after the first
    /// `k` events. Forward (`from < to`) yields indexes `from..to`; backward
    /// (`to < from`) yields `from - 1` down to `to` in strictly decreasing order.
    pub fn collect_range(&self, from: usize, to: usize) -> Vec<(usize, &EventEntry)> {
        let mut out = Vec::new();
        if from < to {
            let to = to.min(self.len);
            let Ok((mut b, mut pos)) = self.locate(from) else {
                return out;
            };
            let mut index = from;
            while index < to {
                if pos >= self.buckets[b].len() {
                    b += 1;
                    pos = 0;
                    continue;
                }
                out.push((index, &self.entries[&self.buckets[b][pos]]));
                pos += 1;
                index += 1;
            }
        } else if to < from {
            let from = from.min(self.len);
            if from <= to {
                return out;
            }
            let Ok((mut b, pos)) = self.locate(from - 1) else {
                return out;
            };
            let mut pos = Some(pos);
            let mut index = from;
            while index > to {
                let Some(p) = pos else {
                    b -= 1;
                    pos = self.buckets[b].len().checked_sub(1);
                    continue;
                };
                index -= 1;
                out.push((index, &self.entries[&self.buckets[b][p]]));
                pos = p.checked_sub(1);
            }
        }
        out
    }

    /// Index of the first event whose clock is `>= clock`, or `len()`.
    pub fn index_after_clock(&self, clock: Clock) -> usize {
        let b = bucket_of(clock);
        if b >= self.buckets.len() {
            return self.len;
        }
        let pos = self.buckets[b].partition_point(|e| self.entries[e].clock < clock);
        self.offsets[b] + pos
    }

    /// Index of the last event whose clock is `<= clock`.
    pub fn index_before_clock(&self, clock: Clock) -> Option<usize> {
        if clock < 0.0 || self.buckets.is_empty() {
            return None;
        }
        let b = bucket_of(clock).min(self.buckets.len() - 1);
        let count =
            self.offsets[b] + self.buckets[b].partition_point(|e| self.entries[e].clock <= clock);
        count.checked_sub(1)
    }

    /// Events of one resource in clock order.
    pub fn track(&self, uri: &Uri) -> impl Iterator<Item = &EventEntry> + '_ {
        self.by_uri
            .get(uri)
            .into_iter()
            .flatten()
            .map(|id| &self.entries[id])
    }

    pub fn track_len(&self, uri: &Uri) -> usize {
        self.by_uri.get(uri).map_or(0, Vec::len)
    }

    pub fn uris(&self) -> impl Iterator<Item = &Uri> + '_ {
        self.by_uri.keys()
    }

    /// All events in global order.
    pub fn iter(&self) -> impl Iterator<Item = &EventEntry> + '_ {
        self.buckets
            .iter()
            .flatten()
            .map(|id| &self.entries[id])
    }

    pub fn last_clock(&self) -> Option<Clock> {
        self.len.checked_sub(1).map(|i| self.clock_at(i))
    }

    /// Current clock of every event, for restoring after a clock mutation.
    pub fn clocks(&self) -> Vec<(EventId, Clock)> {
        self.iter().map(|e| (e.id, e.clock)).collect()
    }

    /// Rewrites every clock in place and re-buckets. The mapping must keep
    /// relative order; float noise below 1e-9 s is clamped away.
    pub fn map_clocks(&mut self, mut f: impl FnMut(&EventEntry) -> Clock) -> Result<()> {
        let order: Vec<EventId> = self.buckets.iter().flatten().copied().collect();
        let mut clocks = Vec::with_capacity(order.len());
        let mut prev: Clock = 0.0;
        for (index, id) in order.iter().enumerate() {
            let entry = self.entries.get(id).ok_or(TimelineError::StoreDesync(*id))?;
            let mut clock = f(entry);
            check_clock(clock)?;
            if clock < prev {
                if prev - clock > CLOCK_EPSILON {
                    return Err(TimelineError::ClockOrder { index, clock });
                }
                clock = prev;
            }
            clocks.push(clock);
            prev = clock;
        }
        for (id, clock) in order.iter().zip(clocks) {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.clock = clock;
            }
        }
        self.reindex_after_clock_mutation(order)
    }

    /// Sets clocks from a [`EventStore::clocks`] snapshot.
    pub fn restore_clocks(&mut self, clocks: &[(EventId, Clock)]) -> Result<()> {
        let lookup: HashMap<EventId, Clock> = clocks.iter().copied().collect();
        self.map_clocks(|e| lookup.get(&e.id).copied().unwrap_or(e.clock))
    }

    /// Removes every event with a clock strictly after `clock`, returning them
    /// with their former indexes in ascending order.
    pub fn truncate_after(&mut self, clock: Clock) -> Result<Vec<(usize, EventEntry)>> {
        let first = match self.index_before_clock(clock) {
            Some(i) => i + 1,
            None => 0,
        };
        let mut removed = Vec::with_capacity(self.len - first);
        while self.len > first {
            let index = self.len - 1;
            removed.push((index, self.delete_at(index)?));
        }
        removed.reverse();
        Ok(removed)
    }

    /// Checks that both indexes agree with the arena and with clock order.
    pub fn verify(&self) -> Result<()> {
        let mut seen = 0;
        let mut prev: Clock = 0.0;
        for (b, bucket) in self.buckets.iter().enumerate() {
            if self.offsets[b] != seen {
                return Err(TimelineError::InvalidOp(format!("bad offset for bucket {b}")));
            }
            for id in bucket {
                let entry = self.entries.get(id).ok_or(TimelineError::StoreDesync(*id))?;
                if bucket_of(entry.clock) != b || entry.clock < prev {
                    return Err(TimelineError::ClockOrder {
                        index: seen,
                        clock: entry.clock,
                    });
                }
                let in_track = self
                    .by_uri
                    .get(&entry.uri)
                    .is_some_and(|t| t.contains(id));
                if !in_track {
                    return Err(TimelineError::StoreDesync(*id));
                }
                prev = entry.clock;
                seen += 1;
            }
        }
        let tracked: usize = self.by_uri.values().map(Vec::len).sum();
        if seen != self.len || tracked != self.len || self.entries.len() != self.len {
            return Err(TimelineError::InvalidOp(format!(
                "counters out of sync: buckets {seen}, tracks {tracked}, len {}",
                self.len
            )));
        }
        Ok(())
    }

    fn reindex_after_clock_mutation(&mut self, order: Vec<EventId>) -> Result<()> {
        self.buckets.clear();
        self.offsets.clear();
        for id in order {
            let clock = self
                .entries
                .get(&id)
                .ok_or(TimelineError::StoreDesync(id))?
                .clock;
            let b = bucket_of(clock);
            self.ensure_bucket(b);
            self.buckets[b].push(id);
        }
        self.refresh_offsets(1);
        Ok(())
    }

    fn clock_at(&self, index: usize) -> Clock {
        self.at(index).map_or(0.0, |e| e.clock)
    }

    fn locate(&self, index: usize) -> Result<(usize, usize)> {
        if index >= self.len {
            return Err(TimelineError::IndexOutOfBounds {
                index,
                len: self.len,
            });
        }
        let b = self.offsets.partition_point(|o| *o <= index) - 1;
        Ok((b, index - self.offsets[b]))
    }

    fn ensure_bucket(&mut self, b: usize) {
        while self.buckets.len() <= b {
            self.buckets.push(Vec::new());
            self.offsets.push(self.len);
        }
    }

    fn refresh_offsets(&mut self, from: usize) {
        if self.offsets.is_empty() {
            return;
        }
        self.offsets[0] = 0;
        for b in from.max(1)..self.buckets.len() {
            self.offsets[b] = self.offsets[b - 1] + self.buckets[b - 1].len();
        }
    }
}

fn bucket_of(clock: Clock) -> usize {
    (clock.max(0.0) / BUCKET_WIDTH).floor() as usize
}

fn check_clock(clock: Clock) -> Result<()> {
    if !clock.is_finite() || clock < 0.0 {
        return Err(TimelineError::InvalidOp(format!("invalid clock {clock}")));
    }
    if clock > MAX_CLOCK {
        return Err(TimelineError::InvalidOp(format!(
            "clock {clock} is past the {MAX_CLOCK}s limit"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EditorEvent, Save};

    fn save() -> EditorEvent {
        EditorEvent::Save(Save {})
    }

    fn store_with(clocks: &[Clock]) -> EventStore {
        let mut store = EventStore::new();
        let uri = Uri::from("file:///a.rs");
        for c in clocks {
            store.insert(uri.clone(), *c, save()).unwrap();
        }
        store
    }

    #[test]
    fn test_insert_keeps_clock_order_across_buckets() {
        let mut store = EventStore::new();
        let a = Uri::from("a");
        let b = Uri::from("b");
        store.insert(a.clone(), 130.0, save()).unwrap();
        store.insert(b.clone(), 5.0, save()).unwrap();
        store.insert(a.clone(), 61.0, save()).unwrap();
        store.insert(b.clone(), 5.0, save()).unwrap();

        let clocks: Vec<Clock> = store.iter().map(|e| e.clock).collect();
        assert_eq!(clocks, vec![5.0, 5.0, 61.0, 130.0]);
        assert_eq!(store.track_len(&a), 2);
        assert_eq!(store.at(3).unwrap().clock, 130.0);
        store.verify().unwrap();
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut store = EventStore::new();
        let first = store.insert(Uri::from("a"), 1.0, save()).unwrap();
        let second = store.insert(Uri::from("b"), 1.0, save()).unwrap();
        assert_eq!(store.at(0).unwrap().id, first);
        assert_eq!(store.at(1).unwrap().id, second);
    }

    #[test]
    fn test_clock_lookups() {
        let store = store_with(&[0.0, 1.0, 2.0, 2.0, 3.0, 70.0]);
        assert_eq!(store.index_before_clock(2.5), Some(3));
        assert_eq!(store.index_before_clock(2.0), Some(3));
        assert_eq!(store.index_before_clock(-1.0), None);
        assert_eq!(store.index_before_clock(500.0), Some(5));
        assert_eq!(store.index_after_clock(2.0), 2);
        assert_eq!(store.index_after_clock(4.0), 5);
        assert_eq!(store.index_after_clock(500.0), 6);
        assert_eq!(EventStore::new().index_before_clock(1.0), None);
    }

    #[test]
    fn test_index_after_clock_never_passes_event() {
        let store = store_with(&[0.0, 0.5, 0.5, 59.9, 60.0, 60.0, 121.0]);
        for i in 0..store.len() {
            let clock = store.at(i).unwrap().clock;
            assert!(store.index_after_clock(clock) <= i + 1);
            if i > 0 {
                assert!(store.at(i - 1).unwrap().clock <= clock);
            }
        }
    }

    #[test]
    fn test_collect_range_both_directions() {
        let store = store_with(&[0.0, 1.0, 61.0, 62.0, 130.0]);
        let forward: Vec<usize> = store.collect_range(1, 4).iter().map(|(i, _)| *i).collect();
        assert_eq!(forward, vec![1, 2, 3]);
        let backward: Vec<usize> = store.collect_range(4, 1).iter().map(|(i, _)| *i).collect();
        assert_eq!(backward, vec![3, 2, 1]);
        let to_start: Vec<usize> = store.collect_range(5, 0).iter().map(|(i, _)| *i).collect();
        assert_eq!(to_start, vec![4, 3, 2, 1, 0]);
        assert!(store.collect_range(2, 2).is_empty());
    }

    #[test]
    fn test_delete_and_restore_same_position() {
        let mut store = store_with(&[0.0, 1.0, 1.0, 1.0, 2.0]);
        let ids: Vec<EventId> = store.iter().map(|e| e.id).collect();
        let removed = store.delete_at(2).unwrap();
        assert_eq!(removed.id, ids[2]);
        assert_eq!(store.len(), 4);
        store.verify().unwrap();

        store.restore(removed, 2).unwrap();
        let after: Vec<EventId> = store.iter().map(|e| e.id).collect();
        assert_eq!(after, ids);
        let track: Vec<EventId> = store.track(&Uri::from("file:///a.rs")).map(|e| e.id).collect();
        assert_eq!(track, ids);
        store.verify().unwrap();
    }

    #[test]
    fn test_restore_rejects_out_of_order_clock() {
        let mut store = store_with(&[0.0, 1.0, 2.0]);
        let removed = store.delete_at(1).unwrap();
        let err = store.restore(removed, 2);
        assert!(matches!(err, Err(TimelineError::ClockOrder { .. })));
    }

    #[test]
    fn test_map_clocks_rebuckets() {
        let mut store = store_with(&[10.0, 70.0, 130.0]);
        store.map_clocks(|e| e.clock / 2.0).unwrap();
        let clocks: Vec<Clock> = store.iter().map(|e| e.clock).collect();
        assert_eq!(clocks, vec![5.0, 35.0, 65.0]);
        assert_eq!(store.index_before_clock(40.0), Some(1));
        store.verify().unwrap();
    }

    #[test]
    fn test_map_clocks_rejects_reordering() {
        let mut store = store_with(&[1.0, 2.0]);
        let err = store.map_clocks(|e| 10.0 - e.clock);
        assert!(err.is_err());
    }

    #[test]
    fn test_truncate_after() {
        let mut store = store_with(&[0.0, 1.0, 2.0, 3.0]);
        let removed = store.truncate_after(1.5).unwrap();
        assert_eq!(removed.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(store.len(), 2);
        for (index, entry) in removed {
            store.restore(entry, index).unwrap();
        }
        assert_eq!(store.len(), 4);
        store.verify().unwrap();
    }

    #[test]
    fn test_replace_in_track_at() {
        let mut store = store_with(&[0.0, 1.0]);
        let uri = Uri::from("file:///a.rs");
        let old = store
            .replace_in_track_at(
                &uri,
                1,
                EditorEvent::Scroll(crate::Scroll {
                    visible_range: crate::LineRange::new(0, 10),
                    revert_visible_range: crate::LineRange::new(0, 5),
                }),
            )
            .unwrap();
        assert_eq!(old, save());
        assert_eq!(store.at(1).unwrap().event.kind(), "scroll");
        assert!(store.replace_in_track_at(&uri, 9, save()).is_err());
    }

    #[test]
    fn test_insert_many_for_uri_interleaves() {
        let mut store = store_with(&[1.0, 3.0]);
        let b = Uri::from("file:///b.rs");
        let ids = store
            .insert_many_for_uri(&b, vec![(0.5, save()), (3.0, save()), (4.0, save())])
            .unwrap();
        assert_eq!(ids.len(), 3);
        let order: Vec<(Clock, bool)> = store.iter().map(|e| (e.clock, e.uri == b)).collect();
        assert_eq!(
            order,
            vec![(0.5, true), (1.0, false), (3.0, false), (3.0, true), (4.0, true)]
        );
        assert_eq!(store.track_len(&b), 3);
        store.verify().unwrap();

        let err = store.insert_many_for_uri(&b, vec![(5.0, save()), (2.0, save())]);
        assert!(matches!(err, Err(TimelineError::ClockOrder { index: 1, .. })));
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_clocks_past_limit_are_rejected() {
        let mut store = store_with(&[1.0]);
        let uri = Uri::from("file:///a.rs");
        assert!(store.insert(uri.clone(), 6.0e9, save()).is_err());
        assert!(store.insert(uri.clone(), f64::INFINITY, save()).is_err());
        assert!(store.map_clocks(|e| e.clock + MAX_CLOCK).is_err());
        assert_eq!(store.at(0).unwrap().clock, 1.0);

        store.insert(uri, MAX_CLOCK, save()).unwrap();
        assert_eq!(store.buckets.len(), bucket_of(MAX_CLOCK) + 1);
        store.verify().unwrap();
    }
}

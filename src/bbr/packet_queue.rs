// Copyright (c) 2016 The Chromium Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Copyright (C) 2024, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::collections::VecDeque;

use crate::Error;
use crate::Result;

/// A queue of entries indexed by mostly-contiguous packet numbers.
///
/// Supports appending at (or past) the tail, removal in arbitrary order, and
/// O(1) lookup. All operations are amortized O(1) when entries are inserted
/// in order.
///
/// Internally a deque of optional slots whose index 0 corresponds to
/// `first_packet`. A removed entry leaves an empty slot behind; empty slots
/// at the front are popped eagerly so the front entry is always occupied.
///
/// Memory use is linear in `last_packet() - first_packet()`, regardless of
/// how many entries are actually present: inserting just two entries with a
/// huge packet-number gap between them allocates the whole range. Callers
/// must keep insertions dense. This is not a general-purpose container.
#[derive(Debug)]
pub struct PacketNumberIndexedQueue<T> {
    entries: VecDeque<Option<T>>,
    number_of_present_entries: usize,
    first_packet: u64,
}

impl<T> Default for PacketNumberIndexedQueue<T> {
    fn default() -> Self {
        PacketNumberIndexedQueue {
            entries: VecDeque::new(),
            number_of_present_entries: 0,
            first_packet: 0,
        }
    }
}

impl<T> PacketNumberIndexedQueue<T> {
    /// Inserts `value` at `packet_number`, padding any gap since the last
    /// insert with empty slots.
    ///
    /// Fails with [`Error::OutOfOrder`] unless `packet_number` is strictly
    /// greater than every previously inserted number.
    pub fn emplace(&mut self, packet_number: u64, value: T) -> Result<()> {
        if self.is_empty() {
            self.entries.push_back(Some(value));
            self.number_of_present_entries = 1;
            self.first_packet = packet_number;
            return Ok(());
        }

        if packet_number <= self.last_packet() {
            return Err(Error::OutOfOrder);
        }

        let offset = (packet_number - self.first_packet) as usize;
        while self.entries.len() < offset {
            self.entries.push_back(None);
        }

        self.entries.push_back(Some(value));
        self.number_of_present_entries += 1;
        Ok(())
    }

    /// Returns a reference to the entry at `packet_number`, if present.
    pub fn get(&self, packet_number: u64) -> Option<&T> {
        let offset = packet_number.checked_sub(self.first_packet)? as usize;
        self.entries.get(offset)?.as_ref()
    }

    /// Removes and returns the entry at `packet_number`.
    ///
    /// Empty slots left at the front of the queue are released; removing the
    /// final entry resets the queue to its initial state.
    pub fn remove(&mut self, packet_number: u64) -> Option<T> {
        let offset = packet_number.checked_sub(self.first_packet)? as usize;
        let value = self.entries.get_mut(offset)?.take()?;
        self.number_of_present_entries -= 1;

        if packet_number == self.first_packet {
            self.cleanup();
        }

        Some(value)
    }

    pub fn is_empty(&self) -> bool {
        self.number_of_present_entries == 0
    }

    /// Number of entries actually present in the queue.
    pub fn number_of_present_entries(&self) -> usize {
        self.number_of_present_entries
    }

    /// Number of slots allocated in the underlying deque, which is
    /// proportional to the memory used.
    pub fn entry_slots_used(&self) -> usize {
        self.entries.len()
    }

    /// Packet number of the first entry in the queue; zero when empty.
    pub fn first_packet(&self) -> u64 {
        self.first_packet
    }

    /// Packet number of the last ever inserted entry (which may since have
    /// been removed); zero when empty.
    pub fn last_packet(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }

        self.first_packet + self.entries.len() as u64 - 1
    }

    fn cleanup(&mut self) {
        while matches!(self.entries.front(), Some(None)) {
            self.entries.pop_front();
            self.first_packet += 1;
        }

        if self.entries.is_empty() {
            self.first_packet = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_queue_invariants(q: &PacketNumberIndexedQueue<u32>) {
        if q.is_empty() {
            return;
        }

        // The allocated range always spans first..=last, and the front slot
        // is always occupied.
        assert_eq!(q.first_packet() + q.entry_slots_used() as u64 - 1, q.last_packet());
        assert!(q.get(q.first_packet()).is_some());
    }

    #[test]
    fn initial_state() {
        let q = PacketNumberIndexedQueue::<u32>::default();

        assert!(q.is_empty());
        assert_eq!(q.first_packet(), 0);
        assert_eq!(q.last_packet(), 0);
        assert_eq!(q.number_of_present_entries(), 0);
        assert_eq!(q.entry_slots_used(), 0);
    }

    #[test]
    fn insert_and_get() {
        let mut q = PacketNumberIndexedQueue::default();

        q.emplace(1_001, 10).unwrap();
        q.emplace(1_002, 11).unwrap();

        assert_eq!(q.get(1_001), Some(&10));
        assert_eq!(q.get(1_002), Some(&11));
        assert_eq!(q.get(1_000), None);
        assert_eq!(q.get(1_003), None);
        assert_eq!(q.first_packet(), 1_001);
        assert_eq!(q.last_packet(), 1_002);
        assert_queue_invariants(&q);
    }

    #[test]
    fn insert_with_gap_pads_missing_slots() {
        let mut q = PacketNumberIndexedQueue::default();

        q.emplace(5, 50).unwrap();
        q.emplace(10, 100).unwrap();

        assert_eq!(q.number_of_present_entries(), 2);
        assert_eq!(q.entry_slots_used(), 6);
        assert_eq!(q.last_packet(), 10);
        assert_eq!(q.get(7), None);
        assert_eq!(q.get(10), Some(&100));
        assert_queue_invariants(&q);
    }

    #[test]
    fn out_of_order_insert_is_rejected() {
        let mut q = PacketNumberIndexedQueue::default();

        q.emplace(5, 50).unwrap();

        assert_eq!(q.emplace(5, 51), Err(Error::OutOfOrder));
        assert_eq!(q.emplace(4, 40), Err(Error::OutOfOrder));

        // The original entry is untouched.
        assert_eq!(q.get(5), Some(&50));
    }

    #[test]
    fn remove_from_front_compacts() {
        let mut q = PacketNumberIndexedQueue::default();

        for n in 1..=4 {
            q.emplace(n, n as u32).unwrap();
        }

        // Removing from the middle leaves the slot allocated.
        assert_eq!(q.remove(2), Some(2));
        assert_eq!(q.entry_slots_used(), 4);
        assert_queue_invariants(&q);

        // Removing the front entry releases it and the hole behind it.
        assert_eq!(q.remove(1), Some(1));
        assert_eq!(q.first_packet(), 3);
        assert_eq!(q.entry_slots_used(), 2);
        assert_queue_invariants(&q);
    }

    #[test]
    fn removing_everything_resets_the_queue() {
        let mut q = PacketNumberIndexedQueue::default();

        q.emplace(42, 1).unwrap();
        q.emplace(43, 2).unwrap();

        q.remove(43);
        q.remove(42);

        assert!(q.is_empty());
        assert_eq!(q.first_packet(), 0);
        assert_eq!(q.last_packet(), 0);
        assert_eq!(q.entry_slots_used(), 0);

        // And the queue is usable again from any starting number.
        q.emplace(7, 70).unwrap();
        assert_eq!(q.first_packet(), 7);
        assert_queue_invariants(&q);
    }

    #[test]
    fn remove_missing_entry() {
        let mut q = PacketNumberIndexedQueue::default();

        q.emplace(10, 1).unwrap();

        assert_eq!(q.remove(9), None);
        assert_eq!(q.remove(11), None);
        assert_eq!(q.remove(10), Some(1));
        assert_eq!(q.remove(10), None);
    }

    #[test]
    fn present_entries_match_inserted_minus_removed() {
        let mut q = PacketNumberIndexedQueue::default();

        for n in 0..100 {
            q.emplace(n, n as u32).unwrap();
        }
        for n in (0..100).step_by(2) {
            q.remove(n);
        }

        assert_eq!(q.number_of_present_entries(), 50);
        assert_queue_invariants(&q);
    }
}

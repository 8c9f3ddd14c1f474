// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded history cache for outgoing changes.
//!
//! Fixed-capacity ring of N+1 slots with head/tail cursors; full when
//! advancing the head would meet the tail, in which case the oldest entry
//! is silently dropped. Sequence numbers are strictly increasing from tail
//! to head, which lets lookups abort early and keeps eviction O(1).
//!
//! One cache type serves both roles the protocol needs: the append-only
//! writer history, and the SEDP discovery history where targeted deletion
//! (`drop_change`) and kind mutation matter. Deletion keeps the SN order
//! contiguous by shifting live entries toward the tail; that O(n) cost is
//! acceptable for the low-rate SEDP stream only.

use crate::core::sequence::SequenceNumber;

/// Lifecycle kind of a cache change.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// Empty slot / overwritten entry.
    Invalid,
    /// Live sample.
    Alive,
    /// Instance disposed by the writer.
    NotAliveDisposed,
}

/// One entry of a history cache.
#[derive(Debug, Clone)]
pub struct CacheChange {
    pub kind: ChangeKind,
    pub sequence_number: SequenceNumber,
    pub inline_qos: bool,
    pub dispose_after_write: bool,
    pub data: Vec<u8>,
}

impl CacheChange {
    fn empty() -> Self {
        Self {
            kind: ChangeKind::Invalid,
            sequence_number: SequenceNumber::ZERO,
            inline_qos: false,
            dispose_after_write: false,
            data: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.kind = ChangeKind::Invalid;
        self.sequence_number = SequenceNumber::ZERO;
        self.inline_qos = false;
        self.dispose_after_write = false;
        self.data.clear();
    }
}

/// Fixed-capacity circular FIFO of cache changes.
pub struct HistoryCache {
    buffer: Vec<CacheChange>,
    head: usize,
    tail: usize,
    last_used_sn: SequenceNumber,
    dispose_after_write_count: u32,
}

impl HistoryCache {
    /// Cache holding up to `capacity` changes. Allocates once; the
    /// steady-state path reuses slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = capacity + 1;
        Self {
            buffer: (0..slots).map(|_| CacheChange::empty()).collect(),
            head: 0,
            tail: 0,
            last_used_sn: SequenceNumber::ZERO,
            dispose_after_write_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.next_index(self.head) == self.tail
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        (self.head + self.buffer.len() - self.tail) % self.buffer.len()
    }

    /// Append a change, assigning the next sequence number. When the ring
    /// is full the oldest entry is dropped silently.
    ///
    /// Returns a reference valid until that slot is next evicted.
    pub fn add_change(
        &mut self,
        data: &[u8],
        inline_qos: bool,
        dispose_after_write: bool,
    ) -> &CacheChange {
        if self.is_full() {
            self.increment_tail();
        }

        self.last_used_sn.advance();
        if dispose_after_write {
            self.dispose_after_write_count += 1;
        }

        let slot = self.head;
        {
            let change = &mut self.buffer[slot];
            change.kind = ChangeKind::Alive;
            change.sequence_number = self.last_used_sn;
            change.inline_qos = inline_qos;
            change.dispose_after_write = dispose_after_write;
            change.data.clear();
            change.data.extend_from_slice(data);
        }

        self.head = self.next_index(self.head);
        &self.buffer[slot]
    }

    /// Look up a change by sequence number. Linear scan from the tail;
    /// since SNs increase along the ring, the scan aborts as soon as a slot
    /// exceeds the target.
    pub fn get_by_sn(&self, sn: SequenceNumber) -> Option<&CacheChange> {
        self.position_of(sn).map(|idx| &self.buffer[idx])
    }

    /// Evict every entry with SN <= `sn` (bulk prefix eviction after
    /// acknowledgment).
    pub fn remove_until_incl(&mut self, sn: SequenceNumber) {
        while !self.is_empty() && self.buffer[self.tail].sequence_number <= sn {
            self.increment_tail();
        }
    }

    /// Drop the oldest entry.
    pub fn drop_oldest(&mut self) {
        if let Some(min) = self.seq_num_min() {
            self.remove_until_incl(min);
        }
    }

    /// Remove one change by SN, keeping the remaining SN order contiguous.
    ///
    /// O(n): live entries left of the hole shift toward the tail, then the
    /// tail advances. Discovery-rate traffic only.
    pub fn drop_change(&mut self, sn: SequenceNumber) -> bool {
        let Some(mut idx) = self.position_of(sn) else {
            return false;
        };

        while idx != self.tail {
            let prev = self.prev_index(idx);
            self.buffer.swap(idx, prev);
            idx = prev;
        }
        self.increment_tail();
        true
    }

    /// Drop every change flagged dispose-after-write with SN <= `sn`.
    ///
    /// Disposal entries only need to survive until every matched reader
    /// has acknowledged them; the writer calls this once its acked
    /// cursors move. Returns the number of entries dropped.
    pub fn drop_disposed_until_incl(&mut self, sn: SequenceNumber) -> usize {
        let mut dropped = 0;
        loop {
            let mut found = None;
            let mut idx = self.tail;
            while idx != self.head {
                let change = &self.buffer[idx];
                if change.sequence_number > sn {
                    break;
                }
                if change.dispose_after_write {
                    found = Some(change.sequence_number);
                    break;
                }
                idx = self.next_index(idx);
            }
            match found {
                Some(target) => {
                    self.drop_change(target);
                    dropped += 1;
                }
                None => break,
            }
        }
        dropped
    }

    /// Mutate the kind of a stored change in place.
    pub fn set_kind(&mut self, sn: SequenceNumber, kind: ChangeKind) -> bool {
        match self.position_of(sn) {
            Some(idx) => {
                self.buffer[idx].kind = kind;
                true
            }
            None => false,
        }
    }

    /// Oldest stored SN, if any.
    pub fn seq_num_min(&self) -> Option<SequenceNumber> {
        if self.is_empty() {
            None
        } else {
            Some(self.buffer[self.tail].sequence_number)
        }
    }

    /// Newest stored SN, if any.
    pub fn seq_num_max(&self) -> Option<SequenceNumber> {
        if self.is_empty() {
            None
        } else {
            Some(self.last_used_sn)
        }
    }

    /// Highest SN ever assigned (survives eviction).
    pub fn last_used_sequence_number(&self) -> SequenceNumber {
        self.last_used_sn
    }

    pub fn is_sn_in_range(&self, sn: SequenceNumber) -> bool {
        match (self.seq_num_min(), self.seq_num_max()) {
            (Some(min), Some(max)) => min <= sn && sn <= max,
            _ => false,
        }
    }

    /// Outstanding changes flagged `dispose_after_write`.
    pub fn dispose_after_write_count(&self) -> u32 {
        self.dispose_after_write_count
    }

    pub fn clear(&mut self) {
        while !self.is_empty() {
            self.increment_tail();
        }
    }

    fn position_of(&self, sn: SequenceNumber) -> Option<usize> {
        if !self.is_sn_in_range(sn) {
            return None;
        }

        let mut idx = self.tail;
        while idx != self.head {
            let slot_sn = self.buffer[idx].sequence_number;
            if slot_sn == sn {
                return Some(idx);
            }
            if slot_sn > sn {
                return None;
            }
            idx = self.next_index(idx);
        }
        None
    }

    fn next_index(&self, idx: usize) -> usize {
        (idx + 1) % self.buffer.len()
    }

    fn prev_index(&self, idx: usize) -> usize {
        (idx + self.buffer.len() - 1) % self.buffer.len()
    }

    fn increment_tail(&mut self) {
        if self.buffer[self.tail].dispose_after_write {
            self.dispose_after_write_count = self.dispose_after_write_count.saturating_sub(1);
        }
        if !self.is_empty() {
            self.buffer[self.tail].reset();
            self.tail = self.next_index(self.tail);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

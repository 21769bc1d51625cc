//! Fixed-size slot store holding chunked payloads linked into chains.
//!
//! A payload spans one or more 512-byte slots. Each slot carries a header
//! with the big-endian index of the next slot in the chain (`END_OF_SLOTS`
//! on the last) and the big-endian length of the payload bytes it holds.
//! The store itself is geometry only: every operation takes the backing
//! byte region, which is the slot partition of the queue's mmap in
//! production and a plain vector in tests.

pub const SLOT_SIZE: usize = 512;
pub const MAX_SLOTS_PER_CHAIN: usize = 1000;
pub const END_OF_SLOTS: u64 = u64::MAX;

const NEXT_BEGIN: usize = 0;
const NEXT_END: usize = NEXT_BEGIN + 8;
const LENGTH_BEGIN: usize = NEXT_END;
const LENGTH_END: usize = LENGTH_BEGIN + 8;
const HEADER_SIZE: usize = LENGTH_END;

pub const MAX_PAYLOAD: usize = SLOT_SIZE - HEADER_SIZE;

/// Header pattern of a deleted slot. Readers rely on it to tell "deleted"
/// (next = END_OF_SLOTS, length = 0) apart from "never used" (all zero).
const TOMBSTONE: [u8; HEADER_SIZE] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

#[derive(Debug, Clone, Copy)]
pub struct SlotStore {
    slots: u64,
}

impl SlotStore {
    pub fn new(slots: u64) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> u64 {
        self.slots
    }

    pub fn byte_len(&self) -> usize {
        self.slots as usize * SLOT_SIZE
    }

    fn range(&self, pos: u64) -> std::ops::Range<usize> {
        let pos = (pos % self.slots) as usize;
        pos * SLOT_SIZE..(pos + 1) * SLOT_SIZE
    }

    /// Allocates a chain for `data`, drawing slot indices from `draw`.
    ///
    /// Returns the chain head, or `END_OF_SLOTS` when a draw fails. Slots
    /// already written before a mid-chain draw failure are abandoned, not
    /// returned; the caller treats the whole write as a no-op and must not
    /// index the partial chain.
    pub fn write(
        &self,
        region: &mut [u8],
        data: &[u8],
        mut draw: impl FnMut() -> Option<u64>,
    ) -> u64 {
        let first = match draw() {
            Some(slot) => slot,
            None => return END_OF_SLOTS,
        };
        let mut slot = first;
        let mut rest = data;
        for _ in 0..MAX_SLOTS_PER_CHAIN {
            let next = if rest.len() > MAX_PAYLOAD {
                match draw() {
                    Some(slot) => slot,
                    None => return END_OF_SLOTS,
                }
            } else {
                END_OF_SLOTS
            };
            rest = self.write_slot(region, slot, next, rest);
            if next == END_OF_SLOTS {
                return first;
            }
            slot = next;
        }
        // Chain cap reached; the tail past MAX_SLOTS_PER_CHAIN slots is cut.
        first
    }

    /// Follows the chain at `head`, concatenating payload bytes, without
    /// mutating the store.
    pub fn read(&self, region: &[u8], head: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(SLOT_SIZE);
        let mut pos = head;
        for _ in 0..MAX_SLOTS_PER_CHAIN {
            let (chunk, next) = self.read_slot(region, pos);
            out.extend_from_slice(chunk);
            if next == END_OF_SLOTS {
                break;
            }
            pos = next;
        }
        out
    }

    /// Like `read`, but consumes the chain: each slot is handed to
    /// `put_back` and overwritten with the tombstone pattern as it is read.
    pub fn read_once(
        &self,
        region: &mut [u8],
        head: u64,
        mut put_back: impl FnMut(u64),
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(SLOT_SIZE);
        let mut pos = head;
        for _ in 0..MAX_SLOTS_PER_CHAIN {
            let next = {
                let (chunk, next) = self.read_slot(region, pos);
                out.extend_from_slice(chunk);
                next
            };
            put_back(pos);
            self.delete_slot(region, pos);
            if next == END_OF_SLOTS {
                break;
            }
            pos = next;
        }
        out
    }

    /// The slot indices making up the chain at `head`, in order. Used when
    /// rebuilding the free list from a reopened file.
    pub fn chain(&self, region: &[u8], head: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut pos = head;
        for _ in 0..MAX_SLOTS_PER_CHAIN {
            out.push(pos);
            let next = u64::from_be_bytes(
                region[self.range(pos)][NEXT_BEGIN..NEXT_END]
                    .try_into()
                    .expect("slice length"),
            );
            if next == END_OF_SLOTS {
                break;
            }
            pos = next;
        }
        out
    }

    fn write_slot<'d>(&self, region: &mut [u8], pos: u64, next: u64, data: &'d [u8]) -> &'d [u8] {
        let chunk = data.len().min(MAX_PAYLOAD);
        let slot = &mut region[self.range(pos)];
        slot[NEXT_BEGIN..NEXT_END].copy_from_slice(&next.to_be_bytes());
        slot[LENGTH_BEGIN..LENGTH_END].copy_from_slice(&(chunk as u64).to_be_bytes());
        slot[HEADER_SIZE..HEADER_SIZE + chunk].copy_from_slice(&data[..chunk]);
        &data[chunk..]
    }

    fn read_slot<'r>(&self, region: &'r [u8], pos: u64) -> (&'r [u8], u64) {
        let slot = &region[self.range(pos)];
        let next = u64::from_be_bytes(slot[NEXT_BEGIN..NEXT_END].try_into().expect("slice length"));
        let length = u64::from_be_bytes(
            slot[LENGTH_BEGIN..LENGTH_END]
                .try_into()
                .expect("slice length"),
        );
        // A corrupt length field must not walk past the slot.
        let length = (length as usize).min(MAX_PAYLOAD);
        (&slot[HEADER_SIZE..HEADER_SIZE + length], next)
    }

    fn delete_slot(&self, region: &mut [u8], pos: u64) {
        let slot = &mut region[self.range(pos)];
        slot[..HEADER_SIZE].copy_from_slice(&TOMBSTONE);
        slot[HEADER_SIZE..].fill(0);
    }
}

//! Storage-backed delay queue.
//!
//! Payloads are held for a fixed delay after insertion, then handed to the
//! submit callback. The backing file is a single mmap split into the index
//! ring and the slot store; an in-memory free list tracks available slots.
//! All mutation runs on one loop thread that owns the mapping, the firing
//! timer and the callbacks. Other threads talk to it through a bounded
//! command channel, which is the only serialization point.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::clock::{Clock, MonotonicClock};
use crate::freelist::FreeList;
use crate::layout;
use crate::mmap::{MmapFile, MmapView};
use crate::ring::IndexRing;
use crate::slots::{SlotStore, END_OF_SLOTS};
use crate::{Error, Result};

/// Default number of elements a queue holds before overflowing.
pub const DEFAULT_ELEMENTS: u64 = 1000;

/// Floor for timer rescheduling, so clock skew or a burst of enqueues cannot
/// thrash the timer.
pub const MIN_FIRE_DURATION: Duration = Duration::from_millis(100);

pub const COMMAND_CHANNEL_CAPACITY: usize = 100;

/// Where the timer parks while the ring is empty.
const FAR_FUTURE: Duration = Duration::from_secs(1000 * 3600);

/// Callback receiving evicted (submit) or dumped payloads. Runs on the loop
/// thread; it must not panic.
pub type Callback = Box<dyn FnMut(Vec<u8>) + Send>;

enum Command {
    Add(Vec<u8>),
    Dump,
    Wake,
}

/// Writable handle to a delay queue. `add` and `dump` may be called from any
/// thread; both block when the command channel is full. Dropping the handle
/// stops the loop.
pub struct DelayQueue {
    commands: SyncSender<Command>,
    stop: SyncSender<SyncSender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DelayQueue {
    /// Opens (or creates) the backing file and starts the command loop.
    /// Payloads submitted via `add` are delivered to `submit` once `delay`
    /// has elapsed, or earlier if ring overflow evicts them.
    pub fn writable(
        delay: Duration,
        elements: u64,
        file: impl AsRef<Path>,
        submit: impl FnMut(Vec<u8>) + Send + 'static,
        dump: impl FnMut(Vec<u8>) + Send + 'static,
    ) -> Result<Self> {
        Self::writable_with_clock(
            delay,
            elements,
            file,
            Arc::new(MonotonicClock::new()),
            submit,
            dump,
        )
    }

    /// As `writable`, with an injected clock for entry timestamps and expiry.
    pub fn writable_with_clock(
        delay: Duration,
        elements: u64,
        file: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        submit: impl FnMut(Vec<u8>) + Send + 'static,
        dump: impl FnMut(Vec<u8>) + Send + 'static,
    ) -> Result<Self> {
        if elements == 0 {
            return Err(Error::Unsupported("queue needs at least one element"));
        }
        let ring = IndexRing::new(elements);
        let slots = SlotStore::new(elements + layout::SLOT_MARGIN);
        let map = MmapFile::open_sized(file.as_ref(), layout::file_size(elements))?;
        let free = rebuild_free_list(&map, &ring, &slots);

        let (command_tx, command_rx) = mpsc::sync_channel(COMMAND_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = mpsc::sync_channel(2);

        let worker = Worker {
            map,
            ring,
            slots,
            free,
            delay_ns: delay.as_nanos() as u64,
            clock,
            submit: Box::new(submit),
            dump: Box::new(dump),
            commands: command_rx,
            stop: stop_rx,
        };
        let handle = std::thread::spawn(move || worker.run());

        Ok(Self {
            commands: command_tx,
            stop: stop_tx,
            handle: Some(handle),
        })
    }

    /// Convenience constructor: `delayStorage.db` inside `storage_dir`,
    /// default capacity.
    pub fn init(
        storage_dir: impl AsRef<Path>,
        delay_secs: u64,
        submit: impl FnMut(Vec<u8>) + Send + 'static,
        dump: impl FnMut(Vec<u8>) + Send + 'static,
    ) -> Result<Self> {
        Self::writable(
            Duration::from_secs(delay_secs),
            DEFAULT_ELEMENTS,
            layout::storage_path(storage_dir.as_ref()),
            submit,
            dump,
        )
    }

    /// Enqueues a payload. Blocks while the command channel is full.
    pub fn add(&self, payload: impl Into<Vec<u8>>) {
        if self.commands.send(Command::Add(payload.into())).is_err() {
            log::warn!("add on a stopped queue");
        }
    }

    /// Requests a dump: every live payload is delivered to the dump callback
    /// without being removed. Ignored if a dump is already in progress.
    pub fn dump(&self) {
        if self.commands.send(Command::Dump).is_err() {
            log::warn!("dump on a stopped queue");
        }
    }

    /// Stops the loop and flushes the mapping. The stop request travels over
    /// its own rendezvous channel, so it pre-empts queued adds. Idempotent.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if self.stop.send(ack_tx).is_ok() {
            // Nudge the loop out of its timed receive; if the command
            // channel is full the loop is awake anyway.
            let _ = self.commands.try_send(Command::Wake);
            let _ = ack_rx.recv();
        }
        let _ = handle.join();
    }
}

impl Drop for DelayQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    map: MmapFile,
    ring: IndexRing,
    slots: SlotStore,
    free: FreeList,
    delay_ns: u64,
    clock: Arc<dyn Clock>,
    submit: Callback,
    dump: Callback,
    commands: Receiver<Command>,
    stop: Receiver<SyncSender<()>>,
}

impl Worker {
    fn run(mut self) {
        let mut last_pos: u64 = 0;
        let mut next_trigger: u64 = 0;
        let mut deadline = Instant::now() + FAR_FUTURE;
        // Snapshot of (next counter to emit, last counter included).
        let mut window: Option<(u64, u64)> = None;

        // Entries recovered from a previous run still owe a delivery.
        if self.first_live(0).is_some() {
            (deadline, next_trigger) = self.reschedule(last_pos, deadline, next_trigger);
        }

        loop {
            if let Ok(ack) = self.stop.try_recv() {
                self.shutdown(Some(ack));
                return;
            }

            let mut change = false;
            if Instant::now() >= deadline {
                last_pos = self.send_delayed(last_pos);
                change = true;
            } else if window.is_some() {
                // A dump is draining: stay non-blocking and emit one entry
                // per idle round.
                match self.commands.try_recv() {
                    Ok(command) => change = self.handle(command, &mut window),
                    Err(TryRecvError::Empty) => self.emit_dump(&mut window),
                    Err(TryRecvError::Disconnected) => {
                        self.shutdown(None);
                        return;
                    }
                }
            } else {
                let wait = deadline.saturating_duration_since(Instant::now());
                match self.commands.recv_timeout(wait) {
                    Ok(command) => change = self.handle(command, &mut window),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        self.shutdown(None);
                        return;
                    }
                }
            }

            if change {
                (deadline, next_trigger) = self.reschedule(last_pos, deadline, next_trigger);
            }
        }
    }

    fn handle(&mut self, command: Command, window: &mut Option<(u64, u64)>) -> bool {
        match command {
            Command::Add(data) => self.receive(&data),
            Command::Dump => {
                if window.is_none() {
                    let ring_region = &self.map.as_slice()[..self.ring.byte_len()];
                    if let Some(start) = self.ring.first(ring_region, 0) {
                        *window = Some((start, self.ring.max_counter(ring_region)));
                    }
                }
                false
            }
            Command::Wake => false,
        }
    }

    /// Writes the payload into the slot store and indexes it. A displaced
    /// live entry is evicted through the submit callback on the spot. Returns
    /// false when the slot store is out of space; the payload is dropped.
    fn receive(&mut self, data: &[u8]) -> bool {
        let (ring_region, slot_region) = self.map.as_mut_slice().split_at_mut(self.ring.byte_len());
        let free = &mut self.free;
        let head = self.slots.write(slot_region, data, || free.draw());
        if head == END_OF_SLOTS {
            log::warn!("slot store full, dropping a {} byte payload", data.len());
            return false;
        }
        let now_ns = self.clock.now_ns();
        if let Some((old_begin, _old_time)) = self.ring.append(ring_region, head, now_ns) {
            log::debug!("ring overflow, evicting the chain at slot {old_begin}");
            let payload = self
                .slots
                .read_once(slot_region, old_begin, |index| free.put_back(index));
            (self.submit)(payload);
        }
        true
    }

    /// Evicts every entry whose delay has elapsed, oldest first. `last_pos`
    /// is a high-water mark so each scan resumes at the oldest unprocessed
    /// counter.
    fn send_delayed(&mut self, mut last_pos: u64) -> u64 {
        let now_ns = self.clock.now_ns();
        loop {
            let (ring_region, slot_region) =
                self.map.as_mut_slice().split_at_mut(self.ring.byte_len());
            let next = match self.ring.first(ring_region, last_pos) {
                Some(counter) => counter,
                None => break,
            };
            let entry = self.ring.at(ring_region, next);
            if entry.timestamp.saturating_add(self.delay_ns) > now_ns {
                break;
            }
            let free = &mut self.free;
            let payload = self
                .slots
                .read_once(slot_region, entry.begin_byte, |index| free.put_back(index));
            (self.submit)(payload);
            let (ring_region, _) = self.map.as_mut_slice().split_at_mut(self.ring.byte_len());
            self.ring.wipe(ring_region, next);
            last_pos = next;
        }
        last_pos
    }

    /// Emits the dump entry at the window cursor. Entries evicted or
    /// displaced since the snapshot (wiped, or re-used by a newer counter)
    /// are skipped.
    fn emit_dump(&mut self, window: &mut Option<(u64, u64)>) {
        let Some((current, end)) = *window else {
            return;
        };
        let (ring_region, slot_region) = self.map.as_slice().split_at(self.ring.byte_len());
        let entry = self.ring.at(ring_region, current);
        if entry.timestamp > 0 && entry.counter == current {
            let payload = self.slots.read(slot_region, entry.begin_byte);
            (self.dump)(payload);
        }
        *window = if current >= end {
            None
        } else {
            Some((current + 1, end))
        };
    }

    /// Computes the next timer deadline from the first live entry past
    /// `last_pos`. The deadline only moves when the scheduled trigger
    /// timestamp changes; `MIN_FIRE_DURATION` floors the wait.
    fn reschedule(&self, last_pos: u64, deadline: Instant, next_trigger: u64) -> (Instant, u64) {
        let ring_region = &self.map.as_slice()[..self.ring.byte_len()];
        match self.ring.first(ring_region, last_pos) {
            Some(counter) => {
                let timestamp = self.ring.at(ring_region, counter).timestamp;
                if timestamp == next_trigger {
                    (deadline, next_trigger)
                } else {
                    let expiry = timestamp.saturating_add(self.delay_ns);
                    let wait = Duration::from_nanos(expiry.saturating_sub(self.clock.now_ns()))
                        .max(MIN_FIRE_DURATION);
                    (Instant::now() + wait, timestamp)
                }
            }
            None => (Instant::now() + FAR_FUTURE, 0),
        }
    }

    fn first_live(&self, after: u64) -> Option<u64> {
        let ring_region = &self.map.as_slice()[..self.ring.byte_len()];
        self.ring.first(ring_region, after)
    }

    fn shutdown(&mut self, ack: Option<SyncSender<()>>) {
        if let Err(err) = self.map.flush_sync() {
            log::warn!("flush on stop failed: {err}");
        }
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}

/// The free list is RAM-only, so a reopened file starts with every slot
/// marked free. Walking the live chains and claiming their slots keeps new
/// writes from landing on top of recovered payloads.
fn rebuild_free_list(map: &MmapFile, ring: &IndexRing, slots: &SlotStore) -> FreeList {
    let (ring_region, slot_region) = map.as_slice().split_at(ring.byte_len());
    let mut free = FreeList::new(slots.slots());
    let mut recovered = 0u64;
    let mut after = 0;
    while let Some(counter) = ring.first(ring_region, after) {
        let head = ring.at(ring_region, counter).begin_byte;
        for index in slots.chain(slot_region, head) {
            free.claim(index % slots.slots());
        }
        recovered += 1;
        after = counter + 1;
    }
    if recovered > 0 {
        log::debug!(
            "recovered {recovered} live entries, {} slots free",
            free.free()
        );
    }
    free
}

/// Export-only view of a queue file. Capacity is derived from the file size;
/// nothing is mutated and no loop runs.
pub struct QueueExport {
    map: MmapView,
    ring: IndexRing,
    slots: SlotStore,
}

impl QueueExport {
    pub fn open(file: impl AsRef<Path>) -> Result<Self> {
        let map = MmapView::open(file.as_ref())?;
        let elements = layout::elements_for_file_size(map.len() as u64)?;
        Ok(Self {
            map,
            ring: IndexRing::new(elements),
            slots: SlotStore::new(elements + layout::SLOT_MARGIN),
        })
    }

    pub fn elements(&self) -> u64 {
        self.ring.elements()
    }

    /// Number of live entries.
    pub fn live_entries(&self) -> usize {
        let ring_region = &self.map.as_slice()[..self.ring.byte_len()];
        let mut count = 0;
        let mut after = 0;
        while let Some(counter) = self.ring.first(ring_region, after) {
            count += 1;
            after = counter + 1;
        }
        count
    }

    /// Insertion timestamps (nanoseconds since the UNIX epoch) of the oldest
    /// and newest ring positions.
    pub fn time_span(&self) -> (u64, u64) {
        let ring_region = &self.map.as_slice()[..self.ring.byte_len()];
        self.ring.time_span(ring_region)
    }

    /// Walks the live entries in counter order, handing each payload and its
    /// insertion time to the callback.
    pub fn export(&self, mut callback: impl FnMut(SystemTime, &[u8])) {
        let (ring_region, slot_region) = self.map.as_slice().split_at(self.ring.byte_len());
        let mut after = 0;
        while let Some(counter) = self.ring.first(ring_region, after) {
            let entry = self.ring.at(ring_region, counter);
            let payload = self.slots.read(slot_region, entry.begin_byte);
            callback(UNIX_EPOCH + Duration::from_nanos(entry.timestamp), &payload);
            after = counter + 1;
        }
    }
}

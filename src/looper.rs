//! Multi-layer MIDI loop engine.
//!
//! Records a live stream of MIDI events into a circular, overdubbable loop
//! of up to [`MAX_LAYERS`] layers and replays it on every clock tick. The
//! loop body is a ring of arena cells linked by inter-event gaps; held-note
//! durations are back-patched when the matching note-off arrives, and
//! playback synthesizes its own note-offs from those durations.
//!
//! The engine is single-threaded and infallible: every operation returns in
//! bounded time, cells come from a fixed arena, and emitted events go to an
//! injected [`EventSink`]. Callers that share an engine across threads must
//! serialize access externally.

use crate::cell::{AbsTime, CellId, CellPool, DeltaTime};
use crate::midi::MidiEvent;

/// Number of overdub layers sharing the loop's time base.
pub const MAX_LAYERS: usize = 9;

/// Maximum time spent waiting for a new event while recording the initial
/// layer; an idle gap beyond this abandons the recording.
pub const MAX_EVENT_INTERVAL: DeltaTime = 20_000;

/// Unity layer volume.
pub const DEFAULT_LAYER_VOLUME: u8 = 100;

/// Receives every event the engine emits: live pass-through and loop
/// playback alike. Must not call back into the engine.
pub trait EventSink {
    fn emit(&mut self, event: MidiEvent);
}

impl<F: FnMut(MidiEvent)> EventSink for F {
    fn emit(&mut self, event: MidiEvent) {
        self(event)
    }
}

/// Scale a note-on velocity by a layer volume (100 = unity). The floor of 1
/// keeps the event a note-on even at volume 0.
pub fn scale_velocity(vel: u8, vol: u8) -> u8 {
    (u32::from(vel) * u32::from(vol) / 100).clamp(1, 127) as u8
}

/// Where the loop body currently stands.
///
/// `Recording` holds the open chain laid down for the initial layer, head
/// to tail; `Looping` holds the cursor into the closed ring. The `armed`
/// flag lives outside this state because arming must not interrupt
/// playback of a closed loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopBody {
    Empty,
    Recording { first: CellId, recent: CellId },
    Looping { recent: CellId },
}

/// Per-note bookkeeping for a held note whose duration is not yet known.
#[derive(Debug, Clone, Copy, Default)]
struct AwaitingOff {
    cell: Option<CellId>,
    start: AbsTime,
}

/// Snapshot of engine state for status surfaces and tests.
#[derive(Debug, Clone, Copy)]
pub struct Status {
    pub armed: bool,
    pub layer_armed: bool,
    pub active_layer: usize,
    pub recording: bool,
    pub looping: bool,
    pub cells_used: usize,
    pub cells_free: usize,
    pub layer_mutes: [bool; MAX_LAYERS],
    pub layer_volumes: [u8; MAX_LAYERS],
}

/// The looping engine.
pub struct Loop {
    sink: Box<dyn EventSink + Send>,
    pool: CellPool,

    walltime: AbsTime,
    armed: bool,
    active_layer: usize,
    layer_armed: bool,

    body: LoopBody,
    time_since_recent: DeltaTime,

    pending_off: Option<CellId>,
    awaiting_off: [AwaitingOff; 128],

    layer_mutes: [bool; MAX_LAYERS],
    layer_volumes: [u8; MAX_LAYERS],
}

impl Loop {
    /// Build an engine whose arena holds `capacity` cells; every event it
    /// decides to emit goes to `sink`.
    pub fn with_capacity(capacity: usize, sink: impl EventSink + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            pool: CellPool::with_capacity(capacity),
            walltime: 0,
            armed: true,
            active_layer: 0,
            layer_armed: false,
            body: LoopBody::Empty,
            time_since_recent: 0,
            pending_off: None,
            awaiting_off: [AwaitingOff::default(); 128],
            layer_mutes: [false; MAX_LAYERS],
            layer_volumes: [DEFAULT_LAYER_VOLUME; MAX_LAYERS],
        }
    }

    /// Advance the clock to `now`, emitting every due pending note-off and
    /// every loop-body event whose instant has been reached, in that order.
    pub fn advance(&mut self, now: AbsTime) {
        let mut dt = now.saturating_sub(self.walltime);
        self.walltime = now;

        self.drain_pending_offs(dt);

        let mut recent = match self.body {
            LoopBody::Empty => return,
            LoopBody::Recording { .. } => {
                // Still laying down the initial layer. A long enough idle
                // gap means the performer walked away; abandon the take.
                if self.time_since_recent + dt > MAX_EVENT_INTERVAL {
                    self.clear();
                } else {
                    self.time_since_recent += dt;
                }
                return;
            }
            LoopBody::Looping { recent } => recent,
        };

        while self.pool[recent].next_time <= self.time_since_recent + dt {
            let next = match self.pool[recent].next {
                Some(id) => id,
                None => break,
            };
            let layer = usize::from(self.pool[next].layer);

            if layer == self.active_layer && !self.layer_armed && next != recent {
                // A stale pass on the layer currently being overdubbed:
                // unlink it as the cursor goes by. (When the ring is a
                // single cell, the cell IS the loop; it plays instead.)
                if self.pool[next].event.is_note_on() {
                    self.cancel_awaiting_off(next);
                }
                let (skip_to, skipped_gap) = {
                    let c = &self.pool[next];
                    (c.next, c.next_time)
                };
                self.pool[recent].next = skip_to;
                self.pool[recent].next_time += skipped_gap;
                self.pool.free(next);
                continue;
            }

            dt -= self.pool[recent].next_time - self.time_since_recent;
            self.time_since_recent = 0;
            recent = next;

            if self.layer_mutes[layer] {
                continue;
            }

            let cell = self.pool[recent];
            if cell.event.is_note_on() && cell.duration > 0 {
                let mut note = cell.event;
                note.data2 = scale_velocity(note.data2, self.layer_volumes[layer]);
                self.sink.emit(note);
                self.schedule_off(note, cell.duration);
            } else {
                self.sink.emit(cell.event);
            }
        }

        self.body = LoopBody::Looping { recent };
        self.time_since_recent += dt;
    }

    /// Feed one incoming event to the engine.
    ///
    /// Note-offs only close out duration bookkeeping; they are neither
    /// echoed nor recorded. Everything else is played through the sink
    /// immediately (note-ons scaled by the active layer's volume) and
    /// recorded into the loop if a cell is available.
    pub fn add_event(&mut self, ev: MidiEvent) {
        if ev.is_note_off() {
            self.finish_awaiting_off(&ev);
            return;
        }

        if self.armed {
            self.clear();
            self.armed = false;
        }
        self.layer_armed = false;
        self.layer_mutes[self.active_layer] = false;

        if ev.is_note_on() {
            let mut note = ev;
            note.data2 = scale_velocity(note.data2, self.layer_volumes[self.active_layer]);
            self.sink.emit(note);
        } else {
            self.sink.emit(ev);
        }

        let id = match self.pool.alloc(ev, self.active_layer as u8) {
            Some(id) => id,
            None => return, // out of cells: heard live, not recorded
        };

        if ev.is_note_on() {
            self.start_awaiting_off(id);
        }

        match self.body {
            LoopBody::Empty => {
                self.body = LoopBody::Recording {
                    first: id,
                    recent: id,
                };
            }
            LoopBody::Recording { first, recent } => {
                // extend the open chain
                let tsr = self.time_since_recent;
                let tail = &mut self.pool[recent];
                tail.next = Some(id);
                tail.next_time = tsr;
                self.body = LoopBody::Recording { first, recent: id };
            }
            LoopBody::Looping { recent } => {
                // overdub: splice between the cursor and its successor
                let tsr = self.time_since_recent;
                let (succ, succ_gap) = {
                    let cursor = &self.pool[recent];
                    (cursor.next, cursor.next_time)
                };
                {
                    let cell = &mut self.pool[id];
                    cell.next = succ;
                    cell.next_time = succ_gap - tsr;
                }
                let cursor = &mut self.pool[recent];
                cursor.next = Some(id);
                cursor.next_time = tsr;
                self.body = LoopBody::Looping { recent: id };
            }
        }
        self.time_since_recent = 0;
    }

    /// Close the loop if the initial layer is still being recorded, then
    /// move on to the next layer (saturating at the last one) and arm it
    /// for overdubbing.
    pub fn keep(&mut self) {
        if let LoopBody::Recording { first, recent } = self.body {
            let tsr = self.time_since_recent;
            let tail = &mut self.pool[recent];
            tail.next = Some(first);
            // floor of 1 so a loop closed in the same tick as its last
            // event cannot have zero length
            tail.next_time = tsr.max(1);
            self.body = LoopBody::Looping { recent };
        }

        if self.active_layer < MAX_LAYERS - 1 {
            self.active_layer += 1;
        }
        self.layer_armed = true;

        // play anything due right at the loop seam
        self.advance(self.walltime);
    }

    /// Discard the loop contents at the next recorded event.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Free the whole loop body and reset to armed/empty. Layer volumes
    /// keep their values; pending note-offs keep draining so nothing is
    /// left sounding.
    pub fn clear(&mut self) {
        match self.body {
            LoopBody::Empty => {}
            LoopBody::Recording { first, .. } => {
                let mut cur = Some(first);
                while let Some(id) = cur {
                    let next = self.pool[id].next;
                    self.pool.free(id);
                    cur = next;
                }
            }
            LoopBody::Looping { recent } => {
                let mut cur = recent;
                loop {
                    let next = self.pool[cur].next;
                    self.pool.free(cur);
                    match next {
                        Some(id) if id != recent => cur = id,
                        _ => break,
                    }
                }
            }
        }

        self.clear_awaiting_off();
        self.body = LoopBody::Empty;
        self.time_since_recent = 0;
        self.armed = true;
        self.active_layer = 0;
        self.layer_armed = false;
        self.layer_mutes = [false; MAX_LAYERS];
    }

    pub fn layer_mute(&mut self, layer: usize, muted: bool) {
        if layer < MAX_LAYERS {
            self.layer_mutes[layer] = muted;
        }
    }

    /// Set a layer's playback volume, 0..127 with 100 as unity.
    pub fn layer_volume(&mut self, layer: usize, volume: u8) {
        if layer < MAX_LAYERS {
            self.layer_volumes[layer] = volume;
        }
    }

    /// Select `layer` for the next overdub pass; its old material keeps
    /// playing until the first new event arrives.
    pub fn layer_arm(&mut self, layer: usize) {
        if layer < MAX_LAYERS {
            self.active_layer = layer;
            self.layer_armed = true;
        }
    }

    pub fn status(&self) -> Status {
        Status {
            armed: self.armed,
            layer_armed: self.layer_armed,
            active_layer: self.active_layer,
            recording: matches!(self.body, LoopBody::Recording { .. }),
            looping: matches!(self.body, LoopBody::Looping { .. }),
            cells_used: self.pool.in_use(),
            cells_free: self.pool.free_count(),
            layer_mutes: self.layer_mutes,
            layer_volumes: self.layer_volumes,
        }
    }

    // --- pending note-offs -------------------------------------------------

    /// Emit every pending off whose countdown has elapsed and age the rest.
    /// Runs before the loop cursor moves so an off never lags a subsequent
    /// on past the same tick.
    fn drain_pending_offs(&mut self, dt: DeltaTime) {
        let mut prev: Option<CellId> = None;
        let mut cur = self.pending_off;
        while let Some(id) = cur {
            let next = self.pool[id].next;
            if dt < self.pool[id].duration {
                self.pool[id].duration -= dt;
                prev = Some(id);
            } else {
                let ev = self.pool[id].event;
                self.pool.free(id);
                match prev {
                    Some(p) => self.pool[p].next = next,
                    None => self.pending_off = next,
                }
                self.sink.emit(ev);
            }
            cur = next;
        }
    }

    fn schedule_off(&mut self, note: MidiEvent, duration: DeltaTime) {
        let mut off = note;
        off.data2 = 0; // velocity 0 makes it a note-off
        match self.pool.alloc(off, 0) {
            Some(id) => {
                self.pool[id].duration = duration;
                self.pool[id].next = self.pending_off;
                self.pending_off = Some(id);
            }
            // no cell for the countdown: release immediately rather than
            // leave the note hanging
            None => self.sink.emit(off),
        }
    }

    // --- awaiting-off table ------------------------------------------------

    /// Register a freshly recorded note-on so its duration can be patched
    /// when the off arrives. A doubled note-on finalizes the earlier hold
    /// first so its duration record is not orphaned.
    fn start_awaiting_off(&mut self, id: CellId) {
        let ev = self.pool[id].event;
        self.finish_awaiting_off(&ev);
        let slot = &mut self.awaiting_off[usize::from(ev.data1 & 0x7F)];
        slot.cell = Some(id);
        slot.start = self.walltime;
    }

    fn finish_awaiting_off(&mut self, ev: &MidiEvent) {
        let slot = &mut self.awaiting_off[usize::from(ev.data1 & 0x7F)];
        if let Some(id) = slot.cell.take() {
            let held = self.walltime - slot.start;
            self.pool[id].duration = held;
        }
    }

    /// Forget a hold whose cell is being erased, if the table still points
    /// at that exact cell.
    fn cancel_awaiting_off(&mut self, id: CellId) {
        let note = usize::from(self.pool[id].event.data1 & 0x7F);
        let slot = &mut self.awaiting_off[note];
        if slot.cell == Some(id) {
            slot.cell = None;
        }
    }

    fn clear_awaiting_off(&mut self) {
        self.awaiting_off = [AwaitingOff::default(); 128];
    }
}

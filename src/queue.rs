use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::session::Finished;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum StreamKind {
    Video,
    Audio,
}

/// A compressed access unit as read by the demuxer.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream: StreamKind,
    pub data: Vec<u8>,
    /// Timestamps in the stream's native time base, if the container knows them.
    pub pts: Option<i64>,
    pub dts: Option<i64>,
}

impl Packet {
    pub fn new(stream: StreamKind, data: Vec<u8>) -> Self {
        Packet { stream, data, pts: None, dts: None }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self.dts = Some(pts);
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Entry of a packet queue. `Flush` tells the decoder to drop its
/// in-flight state before decoding anything queued after it.
#[derive(Debug, Clone, PartialEq)]
pub enum Unit {
    Data(Packet),
    Flush,
}

impl Unit {
    pub fn size(&self) -> usize {
        match self {
            Unit::Data(packet) => packet.size(),
            Unit::Flush => 0,
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Queued {
    pub seq: u64,
    pub unit: Unit,
}

#[derive(Debug, PartialEq)]
pub enum Pop {
    Unit(Queued),
    /// Nothing queued and the caller asked not to block.
    Empty,
    /// Session has finished, no more data will ever arrive.
    Finished,
}

/// Unbounded FIFO of compressed units with byte accounting. Producers
/// enforce any size ceiling themselves by polling [`PacketQueue::size`].
pub struct PacketQueue {
    locked: Mutex<Locked>,
    cond: Condvar,
    finished: Finished,
}

#[derive(Default)]
struct Locked {
    units: VecDeque<Queued>,
    size: usize,
    seq: u64,
    /// Units popped but not yet reported done by their consumer.
    in_flight: usize,
}

impl PacketQueue {
    pub fn new(finished: Finished) -> Self {
        PacketQueue {
            locked: Mutex::new(Locked::default()),
            cond: Condvar::new(),
            finished,
        }
    }

    /// Appends a unit, returning the sequence number assigned to it.
    pub fn push(&self, unit: Unit) -> u64 {
        let mut locked = self.locked.lock().unwrap();

        locked.seq += 1;
        let seq = locked.seq;

        locked.size += unit.size();
        locked.units.push_back(Queued { seq, unit });

        self.cond.notify_one();
        seq
    }

    pub fn pop(&self, block: bool) -> Pop {
        let mut locked = self.locked.lock().unwrap();

        loop {
            if self.finished.is_set() {
                return Pop::Finished;
            }

            if let Some(queued) = locked.units.pop_front() {
                locked.size -= queued.unit.size();
                locked.in_flight += 1;
                return Pop::Unit(queued);
            }

            if !block {
                return Pop::Empty;
            }

            // this releases the mutex while we wait for the condition:
            locked = self.cond.wait(locked).unwrap();
        }
    }

    /// Marks a popped unit as fully handled, including anything its consumer
    /// produced from it.
    pub fn done(&self) {
        let mut locked = self.locked.lock().unwrap();
        locked.in_flight = locked.in_flight.saturating_sub(1);
    }

    /// True when nothing is queued and every popped unit has been marked
    /// [`PacketQueue::done`].
    pub fn is_drained(&self) -> bool {
        let locked = self.locked.lock().unwrap();
        locked.units.is_empty() && locked.in_flight == 0
    }

    /// Drops every queued unit. Units already popped stay in flight.
    pub fn clear(&self) {
        let mut locked = self.locked.lock().unwrap();
        let dropped = locked.units.len();
        locked.units.clear();
        locked.size = 0;
        tracing::trace!(dropped, "cleared packet queue");
    }

    /// Total byte size of queued units.
    pub fn size(&self) -> usize {
        self.locked.lock().unwrap().size
    }

    /// Number of queued units.
    pub fn len(&self) -> usize {
        self.locked.lock().unwrap().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes every blocked popper so it can observe the finished flag.
    pub fn wake(&self) {
        let _locked = self.locked.lock().unwrap();
        self.cond.notify_all();
    }
}

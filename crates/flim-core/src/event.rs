//! Canonical TCSPC event record.
//!
//! Every event is 4 bytes on the wire and on disk:
//!
//! ```text
//! | macro_time: u16 LE | micro_time: u16 LE |
//!                        | bits 4..16: field | bits 0..4: channel |
//! ```
//!
//! Channels `0x0..=0xE` are photons and the 12-bit field is the fine arrival
//! time. Channel `0xF` is a control record: a non-zero field is a set of
//! [`Mark`] bits, a zero field is a rollover sentinel whose `macro_time`
//! carries the number of elapsed macro-time periods.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

/// Channel number reserved for markers and rollovers.
pub const MARKER_CHANNEL: u8 = 0xF;

/// Number of macro-time units covered by one 16-bit `macro_time` wrap.
pub const ROLLOVER_PERIOD: u64 = 1 << 16;

/// Encoded size of one event.
pub const EVENT_BYTES: usize = 4;

/// Largest value of the 12-bit micro-time / mark field.
pub const FIELD_MAX: u16 = 0x0FFF;

bitflags! {
    /// Scan boundary markers. Several bits may be set in one record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Mark: u16 {
        /// Pixel clock tick.
        const PIXEL = 1;
        /// Start of a scan line.
        const LINE_START = 2;
        /// End of a scan line.
        const LINE_END = 4;
        /// End of a frame.
        const FRAME = 8;
        /// Image boundary.
        const IMAGE = 16;
    }
}

/// Decoded view of a [`TcspcEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Photon on `channel` with fine arrival time `micro_time` (12 bits).
    Photon {
        /// Detection channel.
        channel: u8,
        /// Fine arrival time in micro-time bins.
        micro_time: u16,
    },
    /// One or more scan markers.
    Marker(Mark),
    /// `count` macro-time periods have elapsed.
    Rollover(u16),
    /// Control record with mark bits outside the known set.
    Unrecognized(u16),
}

/// A single canonical event as stored in the pipeline.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TcspcEvent {
    /// Coarse timestamp, or rollover count for rollover sentinels.
    pub macro_time: u16,
    /// Channel in the low nibble, fine time or mark bits above it.
    pub micro_time: u16,
}

impl TcspcEvent {
    /// Photon on `channel` (0..=14). `micro_time` is truncated to 12 bits.
    #[inline]
    pub fn photon(channel: u8, micro_time: u16, macro_time: u16) -> Self {
        debug_assert!(channel < MARKER_CHANNEL);
        Self {
            macro_time,
            micro_time: ((micro_time & FIELD_MAX) << 4) | u16::from(channel & 0xF),
        }
    }

    /// Marker record carrying `marks`.
    #[inline]
    pub fn marker(marks: Mark, macro_time: u16) -> Self {
        Self {
            macro_time,
            micro_time: ((marks.bits() & FIELD_MAX) << 4) | u16::from(MARKER_CHANNEL),
        }
    }

    /// Rollover sentinel for `count` elapsed periods.
    #[inline]
    pub fn rollover(count: u16) -> Self {
        Self {
            macro_time: count,
            micro_time: u16::from(MARKER_CHANNEL),
        }
    }

    /// Low nibble of `micro_time`.
    #[inline]
    pub fn channel(&self) -> u8 {
        (self.micro_time & 0xF) as u8
    }

    /// Upper 12 bits of `micro_time`.
    #[inline]
    pub fn field(&self) -> u16 {
        self.micro_time >> 4
    }

    /// Fine arrival time of a photon.
    #[inline]
    pub fn micro_time_bins(&self) -> u16 {
        self.field()
    }

    /// Photon record on channels 0..=14.
    #[inline]
    pub fn is_photon(&self) -> bool {
        self.channel() != MARKER_CHANNEL
    }

    /// Rollover sentinel.
    #[inline]
    pub fn is_rollover(&self) -> bool {
        self.channel() == MARKER_CHANNEL && self.field() == 0
    }

    /// Control record with at least one mark bit.
    #[inline]
    pub fn is_marker(&self) -> bool {
        self.channel() == MARKER_CHANNEL && self.field() != 0
    }

    /// Known mark bits of a control record; empty for photons.
    #[inline]
    pub fn marks(&self) -> Mark {
        if self.is_marker() {
            Mark::from_bits_truncate(self.field())
        } else {
            Mark::empty()
        }
    }

    /// Classify the record.
    #[inline]
    pub fn kind(&self) -> EventKind {
        if self.is_photon() {
            return EventKind::Photon {
                channel: self.channel(),
                micro_time: self.field(),
            };
        }
        match self.field() {
            0 => EventKind::Rollover(self.macro_time),
            bits => match Mark::from_bits(bits) {
                Some(marks) => EventKind::Marker(marks),
                None => EventKind::Unrecognized(bits),
            },
        }
    }

    /// Little-endian encoding.
    #[inline]
    pub fn to_le_bytes(self) -> [u8; EVENT_BYTES] {
        let m = self.macro_time.to_le_bytes();
        let u = self.micro_time.to_le_bytes();
        [m[0], m[1], u[0], u[1]]
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes).
    #[inline]
    pub fn from_le_bytes(bytes: [u8; EVENT_BYTES]) -> Self {
        Self {
            macro_time: u16::from_le_bytes([bytes[0], bytes[1]]),
            micro_time: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}

/// Append `events` to `buf` in wire order.
pub fn put_events<B: BufMut>(buf: &mut B, events: &[TcspcEvent]) {
    for event in events {
        buf.put_u16_le(event.macro_time);
        buf.put_u16_le(event.micro_time);
    }
}

/// Decode as many whole events as fit in both `buf` and `out`.
///
/// Returns the number of events written. A trailing partial record is left
/// in `buf`.
pub fn get_events<B: Buf>(buf: &mut B, out: &mut [TcspcEvent]) -> usize {
    let n = (buf.remaining() / EVENT_BYTES).min(out.len());
    for slot in &mut out[..n] {
        slot.macro_time = buf.get_u16_le();
        slot.micro_time = buf.get_u16_le();
    }
    n
}

//! Macro-time rollover handling.

use flim_core::{Mark, TcspcEvent, ROLLOVER_PERIOD};

/// Extends the 16-bit canonical macro time to 64 bits by accumulating
/// rollover sentinels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MacroClock {
    offset: u64,
}

impl MacroClock {
    /// Clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `event` to the clock.
    ///
    /// Rollover sentinels advance the clock and return `None`. Any other
    /// record returns its absolute macro time.
    #[inline]
    pub fn observe(&mut self, event: &TcspcEvent) -> Option<u64> {
        if event.is_rollover() {
            self.offset += u64::from(event.macro_time) * ROLLOVER_PERIOD;
            None
        } else {
            Some(self.offset + u64::from(event.macro_time))
        }
    }

    /// Macro time at the start of the current period.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Back to time zero.
    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

/// Emits canonical records from absolute macro times, inserting rollover
/// sentinels whenever the time crosses into a later 16-bit period.
///
/// Times that step back into an earlier period keep only their low 16 bits.
#[derive(Debug, Clone, Default)]
pub struct CanonicalEncoder {
    /// Period of the last emitted record; `None` until the first record when
    /// aligning to the stream start.
    period: Option<u64>,
    rollovers: u64,
}

impl CanonicalEncoder {
    /// Encoder whose canonical time starts at absolute time zero.
    pub fn new() -> Self {
        Self {
            period: Some(0),
            rollovers: 0,
        }
    }

    /// Encoder that treats the period of the first record as period zero.
    pub fn aligned_to_first() -> Self {
        Self {
            period: None,
            rollovers: 0,
        }
    }

    /// Rollover sentinels emitted so far.
    pub fn rollovers_emitted(&self) -> u64 {
        self.rollovers
    }

    /// Start over, optionally aligned to the next record.
    pub fn reset(&mut self, aligned_to_first: bool) {
        *self = if aligned_to_first {
            Self::aligned_to_first()
        } else {
            Self::new()
        };
    }

    /// Append a photon at `abs_macro`, preceded by any rollovers needed.
    pub fn push_photon(
        &mut self,
        out: &mut Vec<TcspcEvent>,
        abs_macro: u64,
        channel: u8,
        micro_time: u16,
    ) {
        let low = self.advance(out, abs_macro);
        out.push(TcspcEvent::photon(channel, micro_time, low));
    }

    /// Append a marker at `abs_macro`, preceded by any rollovers needed.
    pub fn push_marker(&mut self, out: &mut Vec<TcspcEvent>, abs_macro: u64, marks: Mark) {
        let low = self.advance(out, abs_macro);
        out.push(TcspcEvent::marker(marks, low));
    }

    fn advance(&mut self, out: &mut Vec<TcspcEvent>, abs_macro: u64) -> u16 {
        let period = abs_macro / ROLLOVER_PERIOD;
        let current = *self.period.get_or_insert(period);
        let mut pending = period.saturating_sub(current);
        while pending > 0 {
            let n = pending.min(u64::from(u16::MAX));
            out.push(TcspcEvent::rollover(n as u16));
            self.rollovers += 1;
            pending -= n;
        }
        self.period = Some(current.max(period));
        (abs_macro % ROLLOVER_PERIOD) as u16
    }
}

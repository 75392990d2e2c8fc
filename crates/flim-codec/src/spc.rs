//! Becker & Hickl SPC FIFO decoder.
//!
//! SPC-1xx/8xx cards in FIFO mode emit little-endian 32-bit words:
//!
//! ```text
//! bit 31    30    29   28    27..16  15..12  11..0
//!     INV   MTOV  GAP  MARK  ADC     ROUT    MT
//! ```
//!
//! - `MT` is a 12-bit macro time, so one overflow is 4096 macro units.
//! - `MTOV` on a photon or marker means one overflow happened before it.
//! - `INV & MTOV & !MARK` is a multi-overflow record carrying the count in
//!   bits 0..28.
//! - `INV & MARK` is a marker record; the marker inputs are in `ROUT`.
//! - `INV` alone is an invalid photon.
//! - `GAP` means the card FIFO overflowed and data before this word was lost.

use crate::clock::CanonicalEncoder;
use crate::marker::MarkerMap;
use crate::{DecodeStats, RawDecoder};
use flim_core::{AcquisitionParameters, ProducerFault, ProducerFaultKind, TcspcEvent, MARKER_CHANNEL};
use serde::{Deserialize, Serialize};
use tracing::warn;

const INVALID: u32 = 1 << 31;
const MTOV: u32 = 1 << 30;
const GAP: u32 = 1 << 29;
const MARK: u32 = 1 << 28;

/// Macro-time units per SPC overflow.
pub const SPC_MACRO_PERIOD: u64 = 1 << 12;

/// Decoder settings for one card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpcConfig {
    /// Cards report `4095 - t`; invert to get time after sync.
    pub invert_adc: bool,
    /// Treat a GAP flag as a fatal device overflow.
    pub fail_on_gap: bool,
    /// Marker input assignment.
    pub markers: MarkerMap,
    /// Timing reported to consumers.
    pub acquisition: AcquisitionParameters,
}

impl Default for SpcConfig {
    fn default() -> Self {
        Self {
            invert_adc: true,
            fail_on_gap: true,
            markers: MarkerMap::default(),
            acquisition: AcquisitionParameters {
                tcspc_system: String::from("Becker & Hickl SPC"),
                n_timebins: 4096,
                micro_resolution_ps: 12.5e3 / 4096.0,
                ..AcquisitionParameters::default()
            },
        }
    }
}

/// Decoder for SPC FIFO words.
#[derive(Debug, Clone)]
pub struct SpcDecoder {
    config: SpcConfig,
    overflows: u64,
    encoder: CanonicalEncoder,
    stats: DecodeStats,
}

impl SpcDecoder {
    /// Decoder with `config`.
    pub fn new(config: SpcConfig) -> Self {
        Self {
            config,
            overflows: 0,
            encoder: CanonicalEncoder::new(),
            stats: DecodeStats::default(),
        }
    }

    /// Decode one word.
    pub fn push_word(&mut self, word: u32, out: &mut Vec<TcspcEvent>) -> Result<(), ProducerFault> {
        if word & GAP != 0 {
            self.stats.gaps += 1;
            if self.config.fail_on_gap {
                return Err(ProducerFault::new(
                    self.name(),
                    ProducerFaultKind::FifoOverflow,
                    "FIFO gap flag set, events were lost on the card",
                ));
            }
            warn!(gaps = self.stats.gaps, "SPC FIFO gap");
        }

        let invalid = word & INVALID != 0;
        let mtov = word & MTOV != 0;
        let mark = word & MARK != 0;

        if invalid && mtov && !mark {
            self.overflows += u64::from(word & 0x0FFF_FFFF);
            return Ok(());
        }
        if mtov {
            self.overflows += 1;
        }

        let abs_macro = self.overflows * SPC_MACRO_PERIOD + u64::from(word & 0xFFF);
        let rout = ((word >> 12) & 0xF) as u8;
        let before = self.encoder.rollovers_emitted();

        if mark {
            let marks = self.config.markers.marks(rout);
            if marks.is_empty() {
                self.stats.dropped += 1;
                return Ok(());
            }
            self.encoder.push_marker(out, abs_macro, marks);
            self.stats.markers += 1;
        } else if invalid || rout >= MARKER_CHANNEL {
            self.stats.dropped += 1;
            return Ok(());
        } else {
            let adc = ((word >> 16) & 0xFFF) as u16;
            let micro = if self.config.invert_adc { 0xFFF - adc } else { adc };
            self.encoder.push_photon(out, abs_macro, rout, micro);
            self.stats.photons += 1;
        }

        self.stats.rollovers += self.encoder.rollovers_emitted() - before;
        Ok(())
    }
}

impl RawDecoder for SpcDecoder {
    fn decode(&mut self, raw: &[u8], out: &mut Vec<TcspcEvent>) -> Result<usize, ProducerFault> {
        let mut consumed = 0;
        for chunk in raw.chunks_exact(4) {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.push_word(word, out)?;
            consumed += 4;
        }
        Ok(consumed)
    }

    fn stats(&self) -> DecodeStats {
        self.stats
    }

    fn acquisition(&self) -> AcquisitionParameters {
        AcquisitionParameters {
            using_pixel_markers: self.config.markers.has_pixel_clock(),
            ..self.config.acquisition.clone()
        }
    }

    fn reset(&mut self) {
        self.overflows = 0;
        self.encoder.reset(false);
        self.stats = DecodeStats::default();
    }

    fn name(&self) -> &str {
        "spc"
    }
}

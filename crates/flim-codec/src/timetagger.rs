//! Decoder for packetised time-tagger streams.
//!
//! Each packet is triggered by a divided sync edge:
//!
//! ```text
//! u8 channel | u8 card | u8 type | u8 flags | u32 length | u64 timestamp
//! length x u64 data words, each holding two 32-bit hits
//! ```
//!
//! If [`flags::ODD_HITS`] is set the last hit slot is unused. A hit stores
//! its channel in bits 0..4, the rising-edge flag in bit 4 and the fine time
//! relative to the packet timestamp in bits 8..32.
//!
//! Scan markers arrive on a dedicated channel as rising/falling edge pairs;
//! the pulse width selects the marker kind through a
//! [`MarkerCalibration`](crate::MarkerCalibration).

use crate::clock::CanonicalEncoder;
use crate::marker::{EdgeClassifier, EdgeOutcome, MarkerCalibration};
use crate::sync::{SyncCorrection, SyncRateEstimator};
use crate::{DecodeStats, RawDecoder};
use bytes::Buf;
use flim_core::{
    AcquisitionParameters, Mark, ProducerFault, ProducerFaultKind, TcspcEvent, MARKER_CHANNEL,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Bytes before the hit words of a packet.
pub const PACKET_HEADER_BYTES: usize = 16;

/// Packet flag bits.
pub mod flags {
    /// The final 32-bit hit slot is padding.
    pub const ODD_HITS: u8 = 0x01;
    /// Sync input is slower than the configured range.
    pub const SLOW_SYNC: u8 = 0x02;
    /// On-board FIFO overflowed.
    pub const FIFO_FULL: u8 = 0x04;
    /// Host DMA buffer overflowed.
    pub const DMA_FIFO_FULL: u8 = 0x08;
}

/// Parsed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Input channel.
    pub channel: u8,
    /// Card index.
    pub card: u8,
    /// Packet type.
    pub kind: u8,
    /// Status bits, see [`flags`].
    pub flags: u8,
    /// Number of 64-bit data words.
    pub length: u32,
    /// Trigger time in fine bins.
    pub timestamp: u64,
}

impl PacketHeader {
    /// Total encoded size of the packet.
    pub fn packet_bytes(&self) -> usize {
        PACKET_HEADER_BYTES + self.length as usize * 8
    }

    /// Hits carried in the data words.
    pub fn hit_count(&self) -> usize {
        let hits = self.length as usize * 2;
        if self.flags & flags::ODD_HITS != 0 {
            hits.saturating_sub(1)
        } else {
            hits
        }
    }
}

/// Split the next whole packet off `buf`.
///
/// Returns `None` if `buf` does not hold a complete packet.
pub fn parse_packet(buf: &[u8]) -> Option<(PacketHeader, &[u8])> {
    if buf.len() < PACKET_HEADER_BYTES {
        return None;
    }
    let mut cursor = buf;
    let header = PacketHeader {
        channel: cursor.get_u8(),
        card: cursor.get_u8(),
        kind: cursor.get_u8(),
        flags: cursor.get_u8(),
        length: cursor.get_u32_le(),
        timestamp: cursor.get_u64_le(),
    };
    let total = header.packet_bytes();
    if buf.len() < total {
        return None;
    }
    Some((header, &buf[PACKET_HEADER_BYTES..total]))
}

/// Encode a packet; used by simulators and tests.
pub fn encode_packet(header: &PacketHeader, hits: &[u32], out: &mut Vec<u8>) {
    let words = hits.len().div_ceil(2);
    let mut flags = header.flags & !flags::ODD_HITS;
    if hits.len() % 2 == 1 {
        flags |= flags::ODD_HITS;
    }
    out.push(header.channel);
    out.push(header.card);
    out.push(header.kind);
    out.push(flags);
    out.extend_from_slice(&(words as u32).to_le_bytes());
    out.extend_from_slice(&header.timestamp.to_le_bytes());
    for hit in hits {
        out.extend_from_slice(&hit.to_le_bytes());
    }
    if hits.len() % 2 == 1 {
        out.extend_from_slice(&0u32.to_le_bytes());
    }
}

/// Build a hit word.
pub fn hit_word(channel: u8, rising: bool, fine: u32) -> u32 {
    (fine << 8) | (u32::from(rising) << 4) | u32::from(channel & 0xF)
}

/// Lifetime measurement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Fluorescence: fine times are folded into the sync period.
    Flim,
    /// Phosphorescence: each packet is one excitation pulse and starts a pixel.
    Plim,
}

/// Decoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeTaggerConfig {
    pub mode: AcquisitionMode,
    /// Width of one fine-timer bin.
    pub bin_size_ps: f64,
    /// Right shift applied to macro times before encoding.
    pub macro_downsample: u32,
    /// Right shift applied to micro times before encoding.
    pub micro_downsample: u32,
    /// Channel carrying scan markers.
    pub marker_channel: u8,
    /// Hardware divider on the sync input.
    pub sync_divider: u32,
    /// Packets between sync-period updates.
    pub sync_update_packets: u64,
    /// Initial sync period before the first estimate, in fine bins.
    pub initial_period_bins: f64,
    /// Per-channel delay in fine bins.
    pub time_shift_bins: Vec<f64>,
    /// Photon channels; higher channels are markers.
    pub n_channels: u32,
    /// Pulse-duration table for marker inputs.
    pub calibration: MarkerCalibration,
}

impl Default for TimeTaggerConfig {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Flim,
            bin_size_ps: 500.0 / 3.0,
            macro_downsample: 7,
            micro_downsample: 0,
            marker_channel: 3,
            sync_divider: 4,
            sync_update_packets: 10_000,
            initial_period_bins: 75.0,
            time_shift_bins: vec![0.0; 3],
            n_channels: 3,
            calibration: MarkerCalibration::time_tagger(),
        }
    }
}

impl TimeTaggerConfig {
    /// Settings for phosphorescence lifetime imaging.
    pub fn plim() -> Self {
        Self {
            mode: AcquisitionMode::Plim,
            micro_downsample: 11,
            sync_update_packets: 1_000,
            ..Self::default()
        }
    }
}

/// Decoder for time-tagger packet streams.
#[derive(Debug, Clone)]
pub struct TimeTaggerDecoder {
    config: TimeTaggerConfig,
    encoder: CanonicalEncoder,
    estimator: SyncRateEstimator,
    correction: SyncCorrection,
    edges: EdgeClassifier,
    stats: DecodeStats,
}

impl TimeTaggerDecoder {
    /// Decoder with `config`.
    pub fn new(config: TimeTaggerConfig) -> Self {
        let mut correction = SyncCorrection::new(config.initial_period_bins);
        correction.time_shift_bins = config.time_shift_bins.clone();
        Self {
            encoder: CanonicalEncoder::aligned_to_first(),
            estimator: SyncRateEstimator::new(
                config.sync_update_packets,
                config.sync_divider,
                config.bin_size_ps,
            ),
            correction,
            edges: EdgeClassifier::new(config.calibration.clone(), config.bin_size_ps),
            stats: DecodeStats::default(),
            config,
        }
    }

    /// Current sync correction.
    pub fn correction(&self) -> &SyncCorrection {
        &self.correction
    }

    fn emit_marker(&mut self, out: &mut Vec<TcspcEvent>, time_bins: u64, marks: Mark) {
        let before = self.encoder.rollovers_emitted();
        self.encoder
            .push_marker(out, time_bins >> self.config.macro_downsample, marks);
        self.stats.rollovers += self.encoder.rollovers_emitted() - before;
        self.stats.markers += 1;
    }

    fn push_packet(
        &mut self,
        header: &PacketHeader,
        mut hits: &[u8],
        out: &mut Vec<TcspcEvent>,
    ) -> Result<(), ProducerFault> {
        if header.flags & (flags::FIFO_FULL | flags::DMA_FIFO_FULL) != 0 {
            return Err(ProducerFault::new(
                self.name(),
                ProducerFaultKind::FifoOverflow,
                format!("packet flags {:#04x} report a FIFO overflow", header.flags),
            ));
        }
        if header.flags & flags::SLOW_SYNC != 0 {
            trace!(timestamp = header.timestamp, "slow sync");
        }

        if let Some(estimate) = self.estimator.observe(header.timestamp) {
            if self.config.mode == AcquisitionMode::Flim {
                self.correction.update(&estimate);
            }
        }

        if self.config.mode == AcquisitionMode::Plim {
            self.emit_marker(out, header.timestamp, Mark::PIXEL);
        }

        for _ in 0..header.hit_count() {
            let hit = hits.get_u32_le();
            let channel = (hit & 0xF) as u8;
            let fine = u64::from(hit >> 8);

            if channel == self.config.marker_channel {
                let rising = hit & 0x10 != 0;
                match self.edges.edge(header.timestamp + fine, rising) {
                    EdgeOutcome::Pending => self.stats.ignored_edges += 1,
                    EdgeOutcome::Marker(kind) => {
                        self.emit_marker(out, header.timestamp + fine, kind.mark())
                    }
                    EdgeOutcome::Unrecognized => self.stats.dropped += 1,
                }
                continue;
            }

            if channel >= MARKER_CHANNEL || u32::from(channel) >= self.config.n_channels {
                self.stats.dropped += 1;
                continue;
            }

            let (micro, abs_bins) = match self.config.mode {
                AcquisitionMode::Flim => {
                    let (micro, increment) = self.correction.apply(channel, fine);
                    (micro, header.timestamp + increment)
                }
                AcquisitionMode::Plim => (fine, header.timestamp),
            };
            let micro = (micro >> self.config.micro_downsample) as u16;

            let before = self.encoder.rollovers_emitted();
            self.encoder.push_photon(
                out,
                abs_bins >> self.config.macro_downsample,
                channel,
                micro,
            );
            self.stats.rollovers += self.encoder.rollovers_emitted() - before;
            self.stats.photons += 1;
        }
        Ok(())
    }
}

impl RawDecoder for TimeTaggerDecoder {
    fn decode(&mut self, raw: &[u8], out: &mut Vec<TcspcEvent>) -> Result<usize, ProducerFault> {
        let mut consumed = 0;
        while let Some((header, hits)) = parse_packet(&raw[consumed..]) {
            self.push_packet(&header, hits, out)?;
            consumed += header.packet_bytes();
        }
        Ok(consumed)
    }

    fn stats(&self) -> DecodeStats {
        self.stats
    }

    fn acquisition(&self) -> AcquisitionParameters {
        let c = &self.config;
        let sync_rate_hz = self
            .estimator
            .latest()
            .map(|e| e.rate_hz)
            .unwrap_or_else(|| {
                1e12 / (c.bin_size_ps * c.initial_period_bins.max(f64::MIN_POSITIVE))
            });
        let n_timebins = match c.mode {
            AcquisitionMode::Flim => (self.correction.n_bins >> c.micro_downsample).max(1),
            AcquisitionMode::Plim => (u32::MAX >> 8 >> c.micro_downsample).clamp(1, 4096),
        };
        AcquisitionParameters {
            tcspc_system: String::from("Cronologic TimeTagger"),
            sync_rate_hz,
            n_timebins,
            n_channels: c.n_channels,
            micro_resolution_ps: c.bin_size_ps * f64::from(1u32 << c.micro_downsample),
            macro_resolution_ps: c.bin_size_ps * f64::from(1u32 << c.macro_downsample),
            using_pixel_markers: c.mode == AcquisitionMode::Plim,
            bidirectional: false,
        }
    }

    fn reset(&mut self) {
        self.encoder.reset(true);
        self.estimator.reset();
        self.edges.reset();
        self.correction = SyncCorrection::new(self.config.initial_period_bins);
        self.correction.time_shift_bins = self.config.time_shift_bins.clone();
        self.stats = DecodeStats::default();
        debug!("time tagger decoder reset");
    }

    fn name(&self) -> &str {
        "timetagger"
    }
}

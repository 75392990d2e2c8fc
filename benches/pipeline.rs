//! Criterion benchmarks for the event pipeline hot paths.
//!
//! Key metrics:
//! - Slot handoff cost between the fill and process sides of the ring
//! - Reconstructor throughput in events/sec for line-clocked scans
//! - LZ4 payload compression throughput
//!
//! Run with: cargo bench --bench pipeline

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flim_stream::config::ImageConfig;
use flim_stream::flim_codec::CanonicalEncoder;
use flim_stream::flim_core::{
    event::put_events, AcquisitionParameters, EventConsumer, Mark, TcspcEvent,
};
use flim_stream::flim_pool::SlotRing;
use flim_stream::flim_storage::Lz4FrameWriter;
use flim_stream::ImageReconstructor;
use std::io::{self, Write};

/// One 256 x 256 frame with `photons_per_line` photons on every line.
fn raster_frame(photons_per_line: u64) -> Vec<TcspcEvent> {
    let mut enc = CanonicalEncoder::new();
    let mut events = Vec::new();
    let line_ticks = 10_000u64;
    for line in 0..256u64 {
        let start = line * (line_ticks + 500);
        enc.push_marker(&mut events, start, Mark::LINE_START);
        for k in 0..photons_per_line {
            let at = start + k * line_ticks / photons_per_line;
            enc.push_photon(&mut events, at, (k % 2) as u8, ((k * 37) % 4096) as u16);
        }
        enc.push_marker(&mut events, start + line_ticks, Mark::LINE_END);
    }
    enc.push_marker(&mut events, 256 * (line_ticks + 500), Mark::FRAME);
    events
}

/// Fill and drain one slot at a time, for several slot sizes.
fn slot_ring_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_ring");

    for capacity in [1_000usize, 10_000, 100_000] {
        let ring = SlotRing::<TcspcEvent>::new(8, capacity);
        let data = vec![TcspcEvent::photon(0, 100, 7); capacity];

        group.throughput(Throughput::Elements(capacity as u64));
        group.bench_with_input(BenchmarkId::new("fill_process", capacity), &capacity, |b, _| {
            b.iter(|| {
                let Ok(mut slot) = ring.try_acquire_fill() else {
                    return;
                };
                slot.copy_from_slice(&data);
                slot.commit(capacity);
                if let Some(slot) = ring.acquire_for_process() {
                    black_box(slot.len());
                    slot.commit();
                }
            });
        });
    }

    group.finish();
}

/// Reconstructor cost per event at different photon densities.
fn reconstructor_add_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstructor");
    let params = AcquisitionParameters {
        n_channels: 2,
        ..Default::default()
    };

    for (name, histogramming) in [("intensity", false), ("pixel_histograms", true)] {
        for photons in [16u64, 256] {
            let events = raster_frame(photons);
            let image = ImageConfig {
                n_x: 256,
                n_y: 256,
                histogramming,
                refresh_interval_ms: 60_000,
                ..Default::default()
            };
            let mut recon = ImageReconstructor::new(&params, &image);
            recon.event_stream_about_to_start();

            group.throughput(Throughput::Elements(events.len() as u64));
            group.bench_with_input(BenchmarkId::new(name, photons), &events, |b, events| {
                b.iter(|| {
                    for chunk in events.chunks(10_000) {
                        recon.add_events(black_box(chunk));
                    }
                });
            });
            recon.event_stream_finished();
        }
    }

    group.finish();
}

/// LZ4 framing of a recorded payload.
fn lz4_payload(c: &mut Criterion) {
    let mut payload = Vec::new();
    put_events(&mut payload, &raster_frame(256));

    let mut group = c.benchmark_group("lz4");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("frame_writer", |b| {
        b.iter(|| {
            let mut writer = Lz4FrameWriter::new(io::sink());
            writer.write_all(black_box(&payload)).unwrap();
            black_box(writer.finish().unwrap().1);
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    slot_ring_cycle,
    reconstructor_add_events,
    lz4_payload
);
criterion_main!(benches);

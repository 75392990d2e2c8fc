//! Recording a scan and replaying it through the reconstructor.

use flim_stream::config::FlimConfig;
use flim_stream::flim_codec::CanonicalEncoder;
use flim_stream::flim_core::{AcquisitionParameters, EventConsumer, Mark, TcspcEvent, VecProducer};
use flim_stream::flim_storage::{Compression, FlimFileReader};
use flim_stream::{FlimPipeline, ImageReconstructor};
use ndarray::Array2;
use std::path::Path;

const LINES: u16 = 4;
const LINE_TICKS: u16 = 400;

fn params() -> AcquisitionParameters {
    AcquisitionParameters {
        tcspc_system: "synthetic raster".into(),
        n_channels: 2,
        micro_resolution_ps: 10.0,
        macro_resolution_ps: 1000.0,
        ..Default::default()
    }
}

/// Three 4 x 4 frames of line-clocked photons, wrapping the 16-bit
/// macro counter more than once.
fn scan() -> Vec<TcspcEvent> {
    let mut enc = CanonicalEncoder::new();
    let mut events = Vec::new();
    let mut t: u64 = 0;
    for frame in 0..3u64 {
        for line in 0..u64::from(LINES) {
            enc.push_marker(&mut events, t, Mark::LINE_START);
            for k in 0..8u64 {
                let (channel, micro) = match (frame + line + k) % 3 {
                    0 => (0, 120),
                    1 => (1, 900),
                    _ => (0, 2048),
                };
                enc.push_photon(&mut events, t + 20 + k * 45, channel, micro);
            }
            enc.push_marker(&mut events, t + u64::from(LINE_TICKS), Mark::LINE_END);
            t += 30_000;
        }
        enc.push_marker(&mut events, t, Mark::FRAME);
        t += 1000;
    }
    assert!(enc.rollovers_emitted() > 1);
    events
}

fn config(compression: Compression, threaded: bool) -> FlimConfig {
    let mut config = FlimConfig::default();
    // Room for the whole scan, so no batch can be dropped.
    config.pipeline.slots = 64;
    config.pipeline.slot_capacity = 7;
    config.pipeline.idle_sleep_us = 0;
    config.pipeline.continuous = true;
    config.image.n_x = usize::from(LINES);
    config.image.n_y = usize::from(LINES);
    config.image.refresh_interval_ms = 60_000;
    config.recording.compression = compression;
    config.recording.threaded = threaded;
    config
}

fn record(path: &Path, config: &FlimConfig) -> (Array2<u32>, Array2<f64>) {
    let producer = VecProducer::new(scan(), 5, params());
    let mut pipeline = FlimPipeline::new(Box::new(producer), config).unwrap();
    pipeline.start_recording(path).unwrap();
    let stats = pipeline.run_to_end().unwrap();
    assert_eq!(stats.dropped_batches, 0);

    let summary = pipeline.stop_recording().unwrap();
    assert_eq!(summary.files, vec![path.to_path_buf()]);
    assert_eq!(summary.events, scan().len() as u64);

    let image = pipeline.image();
    (image.intensity(), image.mean_arrival_time())
}

fn replay(path: &Path, config: &FlimConfig) -> (Array2<u32>, Array2<f64>) {
    let reader = FlimFileReader::open(path).unwrap();
    let mut pipeline = FlimPipeline::new(Box::new(reader), config).unwrap();
    pipeline.run_to_end().unwrap();
    let image = pipeline.image();
    assert_eq!(image.frame_index(), 3);
    (image.intensity(), image.mean_arrival_time())
}

#[test]
fn test_replay_matches_live_image() {
    for (compression, threaded) in [
        (Compression::None, false),
        (Compression::Lz4, false),
        (Compression::Lz4, true),
    ] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.flim");
        let config = config(compression, threaded);

        let live = record(&path, &config);
        let replayed = replay(&path, &config);

        assert_eq!(live.0, replayed.0, "{compression:?} threaded={threaded}");
        assert_eq!(live.1, replayed.1, "{compression:?} threaded={threaded}");
        assert!(live.0.iter().any(|&count| count > 0));
    }
}

#[test]
fn test_reconstruction_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.flim");
    let config = config(Compression::Lz4, false);
    record(&path, &config);

    let mut reader = FlimFileReader::open(&path).unwrap();
    let acquisition = reader.header().acquisition().unwrap();
    assert_eq!(acquisition.tcspc_system, "synthetic raster");
    let events = reader.read_all().unwrap();
    assert_eq!(events, scan());

    let mut recon = ImageReconstructor::new(&acquisition, &config.image);
    let mut run = || {
        recon.event_stream_about_to_start();
        for chunk in events.chunks(11) {
            recon.add_events(chunk);
        }
        recon.event_stream_finished();
        recon.handle().snapshot()
    };

    let first = run();
    let second = run();
    assert_eq!(first.frame_index, 3);
    assert_eq!(first.grids.intensity, second.grids.intensity);
    // Bit-identical, not merely close.
    let bits = |grid: &Array2<f64>| grid.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(
        bits(&first.grids.mean_arrival_ps),
        bits(&second.grids.mean_arrival_ps)
    );
}

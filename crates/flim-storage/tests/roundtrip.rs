//! Recorder output read back through the file reader.

use flim_core::{AcquisitionParameters, EventConsumer, EventProducer, Fill, Mark, TcspcEvent};
use flim_storage::format::{names, FileHeader, TagValue};
use flim_storage::{
    Compression, FlimFileReader, FormatError, RecorderConfig, StreamRecorder,
};
use std::fs;
use std::io::Write;

fn params() -> AcquisitionParameters {
    AcquisitionParameters {
        tcspc_system: "Simulated TCSPC".into(),
        sync_rate_hz: 40e6,
        n_timebins: 1024,
        n_channels: 2,
        micro_resolution_ps: 24.4,
        macro_resolution_ps: 25_000.0,
        using_pixel_markers: true,
        bidirectional: false,
    }
}

fn events(n: usize) -> Vec<TcspcEvent> {
    (0..n)
        .map(|i| match i % 97 {
            0 => TcspcEvent::rollover(1),
            1 => TcspcEvent::marker(Mark::PIXEL, i as u16),
            _ => TcspcEvent::photon((i % 2) as u8, (i % 4096) as u16, i as u16),
        })
        .collect()
}

fn record(config: RecorderConfig, data: &[TcspcEvent], batch: usize) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let mut rec = StreamRecorder::new(params(), config);
    rec.add_metadata("Objective", TagValue::String("60x water".into()));
    rec.start_recording(dir.path().join("run.flim")).unwrap();

    rec.event_stream_about_to_start();
    for chunk in data.chunks(batch) {
        rec.add_events(chunk);
    }
    let summary = rec.stop_recording().unwrap();
    assert_eq!(summary.events, data.len() as u64);
    assert_eq!(summary.dropped_frames, 0);
    rec.event_stream_finished();
    dir
}

#[test]
fn roundtrip_all_payload_encodings() {
    let data = events(50_000);
    let configs = [
        RecorderConfig::default(),
        RecorderConfig {
            compression: Compression::Lz4,
            ..Default::default()
        },
        RecorderConfig {
            compression: Compression::Lz4,
            threaded: true,
            writer_slots: 64,
            ..Default::default()
        },
    ];

    for config in configs {
        let dir = record(config.clone(), &data, 333);
        let mut reader = FlimFileReader::open(dir.path().join("run.flim")).unwrap();

        assert_eq!(reader.header().compression().unwrap(), config.compression);
        assert_eq!(reader.acquisition(), params());
        assert_eq!(reader.header().get_str("Objective"), Some("60x water"));
        assert!(reader.header().creation_date().is_some());

        let back = reader.read_all().unwrap();
        assert_eq!(back.len(), data.len(), "{config:?}");
        assert_eq!(back, data, "{config:?}");
    }
}

#[test]
fn replay_as_producer_reports_end_of_stream() {
    let data = events(1000);
    let dir = record(RecorderConfig::default(), &data, 100);
    let mut reader = FlimFileReader::open(dir.path().join("run.flim")).unwrap();

    let mut buf = vec![TcspcEvent::default(); 300];
    let mut seen = Vec::new();
    loop {
        match reader.fill_buffer(&mut buf, 0.0).unwrap() {
            Fill::Events(n) => seen.extend_from_slice(&buf[..n]),
            Fill::NoData => unreachable!("files always have data or end"),
            Fill::EndOfStream => break,
        }
    }
    assert_eq!(seen, data);
    assert_eq!(reader.events_read(), 1000);
}

#[test]
fn segmented_recording_names_files_per_image() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("stack.flim");
    let mut rec = StreamRecorder::new(
        params(),
        RecorderConfig {
            segment_by_image: true,
            ..Default::default()
        },
    );
    rec.start_recording(&base).unwrap();
    rec.event_stream_about_to_start();

    for image in 0..3u16 {
        if image > 0 {
            rec.next_image_started();
        }
        rec.add_events(&[TcspcEvent::photon(0, image, image)]);
    }
    rec.image_sequence_finished();
    assert!(!rec.is_recording());
    rec.add_events(&[TcspcEvent::photon(0, 9, 9)]);
    rec.event_stream_finished();

    let summary = rec.stop_recording().unwrap();
    assert_eq!(summary.files.len(), 3);
    for image in 0..3u16 {
        let path = dir.path().join(format!("stack_{image:03}.flim"));
        assert_eq!(summary.files[image as usize], path);
        let mut reader = FlimFileReader::open(&path).unwrap();
        assert_eq!(
            reader.header().get_i64(names::IMAGE_INDEX),
            Some(i64::from(image))
        );
        assert_eq!(
            reader.read_all().unwrap(),
            vec![TcspcEvent::photon(0, image, image)]
        );
    }
}

#[test]
fn unknown_tags_are_skipped_in_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.flim");

    let mut header = FileHeader::for_acquisition(
        &params(),
        Compression::None,
        chrono::Local::now().naive_local(),
    );
    header.push(
        "CalibrationTable",
        TagValue::Unknown {
            type_tag: 0x0101,
            data: vec![0xAB; 37],
        },
    );
    header.push(names::NUM_CHANNELS, TagValue::Int64(2));

    let mut file = fs::File::create(&path).unwrap();
    file.write_all(&header.encode()).unwrap();
    file.write_all(&TcspcEvent::photon(1, 5, 6).to_le_bytes())
        .unwrap();
    drop(file);

    let mut reader = FlimFileReader::open(&path).unwrap();
    assert!(matches!(
        reader.header().get("CalibrationTable"),
        Some(TagValue::Unknown { type_tag: 0x0101, .. })
    ));
    assert_eq!(reader.read_all().unwrap(), vec![TcspcEvent::photon(1, 5, 6)]);
}

#[test]
fn wrong_magic_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.flim");
    fs::write(&path, [0u8; 64]).unwrap();
    assert!(matches!(
        FlimFileReader::open(&path),
        Err(FormatError::BadMagic { found: 0, .. })
    ));
}

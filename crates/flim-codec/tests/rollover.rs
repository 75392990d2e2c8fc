//! Absolute macro time must not depend on how rollovers fall across reads.

use flim_codec::spc::{SpcConfig, SpcDecoder};
use flim_codec::{MacroClock, StreamProducer};
use flim_core::{EventProducer, Fill, TcspcEvent, ROLLOVER_PERIOD};
use std::io::Cursor;

fn drain(producer: &mut impl EventProducer, batch: usize) -> Vec<TcspcEvent> {
    let mut buf = vec![TcspcEvent::default(); batch];
    let mut all = Vec::new();
    loop {
        match producer.fill_buffer(&mut buf, 0.0).unwrap() {
            Fill::Events(n) => all.extend_from_slice(&buf[..n]),
            Fill::NoData => {}
            Fill::EndOfStream => return all,
        }
    }
}

#[test]
fn sentinel_count_times_period_plus_raw() {
    for k in 0..6u64 {
        for split in 0..=k as usize {
            let mut events = Vec::new();
            events.extend((0..split).map(|_| TcspcEvent::rollover(1)));
            events.push(TcspcEvent::photon(0, 1, 0));
            events.extend((split..k as usize).map(|_| TcspcEvent::rollover(1)));
            events.push(TcspcEvent::photon(1, 2, 777));

            for batch in 1..=events.len() {
                let mut clock = MacroClock::new();
                let mut last = None;
                for chunk in events.chunks(batch) {
                    for e in chunk {
                        if let Some(t) = clock.observe(e) {
                            last = Some(t);
                        }
                    }
                }
                assert_eq!(last, Some(k * ROLLOVER_PERIOD + 777));
            }
        }
    }
}

#[test]
fn spc_stream_independent_of_read_size() {
    // Photons spaced 3000 macro units apart cross many 4096 overflows and
    // several 65536 canonical periods.
    let mut words = Vec::new();
    let mut expected = Vec::new();
    let mut t = 0u64;
    for i in 0..200u64 {
        let next = t + 3000 + i;
        let crossings = next / 4096 - t / 4096;
        for _ in 0..crossings.saturating_sub(1) {
            words.push((1u32 << 31) | (1 << 30) | 1);
        }
        let mtov = if crossings > 0 { 1u32 << 30 } else { 0 };
        words.push(mtov | ((next % 4096) as u32));
        expected.push(next);
        t = next;
    }
    let raw: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

    for (chunk, batch) in [(16, 1), (17, 3), (4096, 64), (1 << 20, 1024)] {
        let decoder = SpcDecoder::new(SpcConfig {
            invert_adc: false,
            ..SpcConfig::default()
        });
        let mut producer = StreamProducer::with_chunk(Cursor::new(raw.clone()), decoder, chunk);
        let events = drain(&mut producer, batch);

        let mut clock = MacroClock::new();
        let times: Vec<u64> = events.iter().filter_map(|e| clock.observe(e)).collect();
        assert_eq!(times, expected, "chunk={chunk} batch={batch}");
        assert_eq!(producer.decode_stats().photons, 200);
    }
}

//! Property tests over authored and fragmented files.

use bytes::Bytes;
use mp4forge_media::{
    BoxFields, BoxType, MovieOptions, Mp4Box, Mp4File, Progress, Sample, SampleOptions,
    TrackOptions,
};
use proptest::prelude::*;

/// (size, duration, is_sync) of one sample.
fn arb_sample() -> impl Strategy<Value = (usize, u32, bool)> {
    (0usize..200, 1u32..5000, any::<bool>())
}

fn progressive(samples: &[(usize, u32, bool)]) -> Bytes {
    let mut movie = Mp4File::new_movie(MovieOptions::default());
    let id = movie
        .add_track(TrackOptions::video(64, 64).with_timescale(1000))
        .unwrap();
    for (i, (size, duration, sync)) in samples.iter().enumerate() {
        movie
            .add_sample(
                id,
                Bytes::from(vec![i as u8; *size]),
                SampleOptions::new(*duration).sync(*sync),
            )
            .unwrap();
    }
    movie.serialize().unwrap()
}

fn samples(file: &Mp4File) -> Vec<Sample> {
    file.samples_for_track(1).unwrap().collect()
}

fn parse_in_chunks(data: &Bytes, cuts: &[usize]) -> Mp4File {
    let mut file = Mp4File::open_for_streaming();
    let mut at = 0;
    let mut cuts = cuts.iter().cycle();
    while at < data.len() {
        let len = (*cuts.next().unwrap()).min(data.len() - at);
        file.append(data.slice(at..at + len));
        let _ = file.resume().unwrap();
        at += len;
    }
    file.finish();
    match file.resume().unwrap() {
        Progress::Ready(delta) => assert!(delta.finished),
        Progress::NeedMoreData => panic!("input was finished"),
    }
    file
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Splitting the input differently never changes the parsed result.
    #[test]
    fn split_does_not_change_parse(
        table in prop::collection::vec(arb_sample(), 0..20),
        cuts in prop::collection::vec(1usize..97, 1..8),
    ) {
        let data = progressive(&table);
        let whole = Mp4File::parse_bytes(data.clone()).unwrap();
        let split = parse_in_chunks(&data, &cuts);

        prop_assert_eq!(split.boxes(), whole.boxes());
        prop_assert_eq!(samples(&split), samples(&whole));
        prop_assert_eq!(split.warnings(), whole.warnings());
        prop_assert_eq!(split.serialize().unwrap(), data);
    }

    /// Authored tables describe exactly the samples that were added.
    #[test]
    fn authored_samples_read_back(table in prop::collection::vec(arb_sample(), 1..30)) {
        let file = Mp4File::parse_bytes(progressive(&table)).unwrap();
        let parsed = samples(&file);
        prop_assert_eq!(parsed.len(), table.len());

        let mut dts = 0u64;
        for (i, (sample, (size, duration, sync))) in parsed.iter().zip(&table).enumerate() {
            prop_assert_eq!(sample.number as usize, i + 1);
            prop_assert_eq!(sample.size as usize, *size);
            prop_assert_eq!(sample.dts, dts);
            // Without any non-sync sample there is no stss and every sample is sync.
            let all_sync = table.iter().all(|(_, _, s)| *s);
            prop_assert_eq!(sample.is_sync, *sync || all_sync);
            let data = file.read_sample_data(sample).unwrap();
            prop_assert!(data.iter().all(|b| *b == i as u8));
            dts += *duration as u64;
        }
    }

    /// Appended fragments keep numbers, times, sequence numbers and data
    /// positions increasing.
    #[test]
    fn fragments_are_monotonic(
        table in prop::collection::vec(arb_sample(), 1..5),
        appended in prop::collection::vec(arb_sample(), 1..12),
        cuts in prop::collection::vec(1usize..257, 1..4),
    ) {
        let mut file = Mp4File::parse_bytes(progressive(&table)).unwrap();
        for (size, duration, sync) in &appended {
            file.append_sample(
                1,
                Bytes::from(vec![0xA5; *size]),
                SampleOptions::new(*duration).sync(*sync),
            )
            .unwrap();
        }
        let data = file.serialize().unwrap();
        let reparsed = parse_in_chunks(&data, &cuts);
        prop_assert!(reparsed.warnings().is_empty());

        let all = samples(&reparsed);
        prop_assert_eq!(all.len(), table.len() + appended.len());
        for pair in all.windows(2) {
            prop_assert_eq!(pair[1].number, pair[0].number + 1);
            prop_assert_eq!(pair[1].dts, pair[0].dts + pair[0].duration as u64);
        }
        let fragment_samples = &all[table.len()..];
        for pair in fragment_samples.windows(2) {
            prop_assert!(pair[1].data_offset > pair[0].data_offset);
        }
        for sample in fragment_samples {
            prop_assert!(sample.data_offset + sample.size as u64 <= data.len() as u64);
            let bytes = reparsed.read_sample_data(sample).unwrap();
            prop_assert!(bytes.iter().all(|b| *b == 0xA5));
        }

        let sequence: Vec<u32> = reparsed
            .moofs()
            .filter_map(|moof| match moof.child(BoxType::MFHD).and_then(Mp4Box::fields) {
                Some(BoxFields::MovieFragmentHeader { sequence_number }) => Some(*sequence_number),
                _ => None,
            })
            .collect();
        let expected: Vec<u32> = (1..=appended.len() as u32).collect();
        prop_assert_eq!(sequence, expected);
        prop_assert_eq!(reparsed.next_sequence_number(), appended.len() as u32 + 1);
    }
}

//! Samples of parsed movie fragments.

use super::sample_table::Sample;
use super::track::FragmentCursor;
use crate::boxes::{
    sample_flags, tfhd_flags, trun_flags, BoxFields, BoxType, Mp4Box, TrackExtends,
    TrackFragmentHeader,
};
use crate::{Error, Result};

/// Samples of one `traf`.
#[derive(Debug)]
pub(crate) struct TrafSamples {
    pub samples: Vec<Sample>,
    /// Cursor after the last sample.
    pub cursor: FragmentCursor,
    /// File position right after the last sample's data.
    pub data_end: u64,
}

fn tfhd_of(traf: &Mp4Box) -> Result<(&Mp4Box, &TrackFragmentHeader)> {
    let tfhd = traf.child(BoxType::TFHD).ok_or_else(|| {
        Error::structural(BoxType::TRAF, traf.offset, "track fragment without tfhd")
    })?;
    match tfhd.fields() {
        Some(BoxFields::TrackFragmentHeader(header)) => Ok((tfhd, header)),
        _ => Err(Error::structural(
            BoxType::TFHD,
            tfhd.offset,
            "track fragment header could not be decoded",
        )),
    }
}

/// Track a `traf` belongs to.
pub(crate) fn traf_track_id(traf: &Mp4Box) -> Result<u32> {
    tfhd_of(traf).map(|(_, header)| header.track_id)
}

/// Resolve the samples of a `traf`.
///
/// `default_base` is where the data of this `traf` starts when `tfhd` gives
/// neither an explicit base offset nor default-base-is-moof: the `moof`
/// start for the first `traf`, the end of the previous `traf`'s data after
/// that. Values missing from `trun` come from `tfhd`, then `trex`.
pub(crate) fn resolve_traf(
    traf: &Mp4Box,
    moof_offset: u64,
    default_base: u64,
    trex: Option<&TrackExtends>,
    cursor: FragmentCursor,
) -> Result<TrafSamples> {
    let (tfhd, header) = tfhd_of(traf)?;
    let flags = tfhd.flags();
    let trex = trex.copied().unwrap_or_else(|| TrackExtends::new(header.track_id));

    let base = if flags & tfhd_flags::BASE_DATA_OFFSET != 0 {
        header.base_data_offset
    } else if flags & tfhd_flags::DEFAULT_BASE_IS_MOOF != 0 {
        moof_offset
    } else {
        default_base
    };
    let pick = |bit: u32, own: u32, fallback: u32| if flags & bit != 0 { own } else { fallback };
    let description_index = pick(
        tfhd_flags::SAMPLE_DESCRIPTION_INDEX,
        header.sample_description_index,
        trex.default_sample_description_index,
    );
    let default_duration = pick(
        tfhd_flags::DEFAULT_SAMPLE_DURATION,
        header.default_sample_duration,
        trex.default_sample_duration,
    );
    let default_size = pick(
        tfhd_flags::DEFAULT_SAMPLE_SIZE,
        header.default_sample_size,
        trex.default_sample_size,
    );
    let default_flags = pick(
        tfhd_flags::DEFAULT_SAMPLE_FLAGS,
        header.default_sample_flags,
        trex.default_sample_flags,
    );

    let mut dts = match traf.child(BoxType::TFDT).and_then(Mp4Box::fields) {
        Some(BoxFields::DecodeTime {
            base_media_decode_time,
        }) => *base_media_decode_time,
        _ => cursor.next_decode_time,
    };
    let mut number = cursor.next_number;
    let mut position = base;
    let mut samples = Vec::new();

    for trun in traf.children_of(BoxType::TRUN) {
        let Some(BoxFields::TrackRun(run)) = trun.fields() else {
            return Err(Error::structural(
                BoxType::TRUN,
                trun.offset,
                "track run could not be decoded",
            ));
        };
        let run_flags = trun.flags();
        if run_flags & trun_flags::DATA_OFFSET != 0 {
            position = base
                .checked_add_signed(run.data_offset as i64)
                .ok_or_else(|| {
                    Error::structural(
                        BoxType::TRUN,
                        trun.offset,
                        format!("data offset {} points before the file start", run.data_offset),
                    )
                })?;
        }
        samples.reserve(run.samples.len());
        for (i, entry) in run.samples.iter().enumerate() {
            let duration = if run_flags & trun_flags::SAMPLE_DURATION != 0 {
                entry.duration
            } else {
                default_duration
            };
            let size = if run_flags & trun_flags::SAMPLE_SIZE != 0 {
                entry.size
            } else {
                default_size
            };
            let flags = if i == 0 && run_flags & trun_flags::FIRST_SAMPLE_FLAGS != 0 {
                run.first_sample_flags
            } else if run_flags & trun_flags::SAMPLE_FLAGS != 0 {
                entry.flags
            } else {
                default_flags
            };
            let cts_offset = if run_flags & trun_flags::SAMPLE_COMPOSITION_TIME_OFFSET != 0 {
                entry.composition_time_offset
            } else {
                0
            };
            samples.push(Sample {
                track_id: header.track_id,
                number,
                data_offset: position,
                size,
                duration,
                dts,
                cts_offset,
                is_sync: sample_flags::is_sync(flags),
                description_index,
            });
            number += 1;
            dts += duration as u64;
            position += size as u64;
        }
    }

    Ok(TrafSamples {
        samples,
        cursor: FragmentCursor {
            next_number: number,
            next_decode_time: dts,
        },
        data_end: position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{TrackRun, TrackRunSample};

    fn traf(tfhd_flags: u32, header: TrackFragmentHeader, runs: Vec<(u32, TrackRun)>, tfdt: Option<u64>) -> Mp4Box {
        let mut children = vec![Mp4Box::full_fields(
            BoxType::TFHD,
            0,
            tfhd_flags,
            BoxFields::TrackFragmentHeader(header),
        )];
        if let Some(time) = tfdt {
            children.push(Mp4Box::full_fields(
                BoxType::TFDT,
                1,
                0,
                BoxFields::DecodeTime {
                    base_media_decode_time: time,
                },
            ));
        }
        for (flags, run) in runs {
            children.push(Mp4Box::full_fields(BoxType::TRUN, 0, flags, BoxFields::TrackRun(run)));
        }
        Mp4Box::container(BoxType::TRAF, children)
    }

    #[test]
    fn test_defaults_from_trex_and_tfhd() {
        let header = TrackFragmentHeader {
            track_id: 1,
            default_sample_size: 40,
            ..TrackFragmentHeader::default()
        };
        let run = TrackRun {
            data_offset: 0,
            first_sample_flags: sample_flags::SYNC,
            samples: vec![TrackRunSample::default(); 3],
        };
        let traf = traf(
            tfhd_flags::DEFAULT_SAMPLE_SIZE,
            header,
            vec![(trun_flags::FIRST_SAMPLE_FLAGS, run)],
            None,
        );
        let trex = TrackExtends {
            track_id: 1,
            default_sample_description_index: 2,
            default_sample_duration: 512,
            default_sample_size: 1,
            default_sample_flags: sample_flags::NON_SYNC,
        };
        let cursor = FragmentCursor {
            next_number: 11,
            next_decode_time: 5120,
        };

        let out = resolve_traf(&traf, 1000, 1200, Some(&trex), cursor).unwrap();
        let numbers: Vec<u32> = out.samples.iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![11, 12, 13]);
        let offsets: Vec<u64> = out.samples.iter().map(|s| s.data_offset).collect();
        assert_eq!(offsets, vec![1200, 1240, 1280]);
        assert!(out.samples[0].is_sync);
        assert!(!out.samples[1].is_sync);
        assert!(out.samples.iter().all(|s| s.duration == 512 && s.description_index == 2));
        assert_eq!(out.samples[2].dts, 5120 + 1024);
        assert_eq!(out.data_end, 1320);
        assert_eq!(
            out.cursor,
            FragmentCursor {
                next_number: 14,
                next_decode_time: 5120 + 1536
            }
        );
    }

    #[test]
    fn test_base_is_moof_and_tfdt() {
        let header = TrackFragmentHeader {
            track_id: 3,
            ..TrackFragmentHeader::default()
        };
        let run = TrackRun {
            data_offset: 120,
            first_sample_flags: 0,
            samples: vec![TrackRunSample {
                duration: 10,
                size: 5,
                flags: sample_flags::SYNC,
                composition_time_offset: 20,
            }],
        };
        let all = trun_flags::DATA_OFFSET
            | trun_flags::SAMPLE_DURATION
            | trun_flags::SAMPLE_SIZE
            | trun_flags::SAMPLE_FLAGS
            | trun_flags::SAMPLE_COMPOSITION_TIME_OFFSET;
        let traf = traf(tfhd_flags::DEFAULT_BASE_IS_MOOF, header, vec![(all, run)], Some(90_000));
        let out = resolve_traf(&traf, 4000, 9999, None, FragmentCursor::default()).unwrap();
        let sample = out.samples[0];
        assert_eq!(sample.data_offset, 4120);
        assert_eq!(sample.dts, 90_000);
        assert_eq!(sample.cts(), 90_020);
        assert_eq!(sample.number, 1);
        assert_eq!(sample.description_index, 1);
    }

    #[test]
    fn test_negative_position_is_structural() {
        let header = TrackFragmentHeader {
            track_id: 1,
            ..TrackFragmentHeader::default()
        };
        let run = TrackRun {
            data_offset: -100,
            first_sample_flags: 0,
            samples: vec![TrackRunSample::default()],
        };
        let traf = traf(0, header, vec![(trun_flags::DATA_OFFSET, run)], None);
        let err = resolve_traf(&traf, 10, 10, None, FragmentCursor::default()).unwrap_err();
        assert!(matches!(err, Error::Structural { box_type, .. } if box_type == BoxType::TRUN));
    }

    #[test]
    fn test_missing_tfhd() {
        let traf = Mp4Box::container(BoxType::TRAF, Vec::new());
        assert!(traf_track_id(&traf).is_err());
    }
}

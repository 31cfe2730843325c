//! Movie fragment (moof) box builder.

use crate::boxes::{
    sample_flags, tfhd_flags, trun_flags, BoxFields, BoxType, Mp4Box, TrackFragmentHeader,
    TrackRun, TrackRunSample,
};
use crate::{Error, Result};
use bytes::Bytes;

/// One sample of a fragment being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSample {
    pub size: u32,
    pub duration: u32,
    pub cts_offset: i32,
    pub is_sync: bool,
}

/// Builder for `moof` boxes whose data sits in the `mdat` right after them.
#[derive(Debug, Clone)]
pub struct MoofBuilder {
    sequence_number: u32,
    track_id: u32,
    base_media_decode_time: u64,
    sample_description_index: Option<u32>,
}

impl MoofBuilder {
    /// Create a new moof builder.
    pub fn new(sequence_number: u32, track_id: u32) -> Self {
        Self {
            sequence_number,
            track_id,
            base_media_decode_time: 0,
            sample_description_index: None,
        }
    }

    /// Set base media decode time.
    pub fn base_media_decode_time(mut self, time: u64) -> Self {
        self.base_media_decode_time = time;
        self
    }

    /// Sample description used by the fragment, when it is not the track default.
    pub fn sample_description_index(mut self, index: u32) -> Self {
        self.sample_description_index = Some(index);
        self
    }

    /// Build `moof` + `mdat` for the given samples and their concatenated data.
    pub fn build_with_mdat(&self, samples: &[FragmentSample], data: Bytes) -> Result<(Mp4Box, Mp4Box)> {
        let mdat = Mp4Box::mdat(data);
        let moof = self.build(samples, mdat.header_len())?;
        Ok((moof, mdat))
    }

    /// Build the `moof`. The `trun` data offset points just past an `mdat`
    /// header of `mdat_header_len` bytes that follows the `moof`.
    pub fn build(&self, samples: &[FragmentSample], mdat_header_len: u64) -> Result<Mp4Box> {
        let mfhd = Mp4Box::full_fields(
            BoxType::MFHD,
            0,
            0,
            BoxFields::MovieFragmentHeader {
                sequence_number: self.sequence_number,
            },
        );

        let mut tfhd_bits = tfhd_flags::DEFAULT_BASE_IS_MOOF;
        if self.sample_description_index.is_some() {
            tfhd_bits |= tfhd_flags::SAMPLE_DESCRIPTION_INDEX;
        }
        let tfhd = Mp4Box::full_fields(
            BoxType::TFHD,
            0,
            tfhd_bits,
            BoxFields::TrackFragmentHeader(TrackFragmentHeader {
                track_id: self.track_id,
                sample_description_index: self.sample_description_index.unwrap_or(0),
                ..TrackFragmentHeader::default()
            }),
        );

        let tfdt = Mp4Box::full_fields(
            BoxType::TFDT,
            1,
            0,
            BoxFields::DecodeTime {
                base_media_decode_time: self.base_media_decode_time,
            },
        );

        let mut trun_bits = trun_flags::DATA_OFFSET
            | trun_flags::SAMPLE_DURATION
            | trun_flags::SAMPLE_SIZE
            | trun_flags::SAMPLE_FLAGS;
        if samples.iter().any(|s| s.cts_offset != 0) {
            trun_bits |= trun_flags::SAMPLE_COMPOSITION_TIME_OFFSET;
        }
        let trun_version = u8::from(samples.iter().any(|s| s.cts_offset < 0));
        let run = TrackRun {
            data_offset: 0,
            first_sample_flags: 0,
            samples: samples
                .iter()
                .map(|s| TrackRunSample {
                    duration: s.duration,
                    size: s.size,
                    flags: if s.is_sync {
                        sample_flags::SYNC
                    } else {
                        sample_flags::NON_SYNC
                    },
                    composition_time_offset: s.cts_offset,
                })
                .collect(),
        };
        let trun = Mp4Box::full_fields(BoxType::TRUN, trun_version, trun_bits, BoxFields::TrackRun(run));

        let traf = Mp4Box::container(BoxType::TRAF, vec![tfhd, tfdt, trun]);
        let mut moof = Mp4Box::container(BoxType::MOOF, vec![mfhd, traf]);

        // The data offset does not change the moof size, so it can be set last.
        let data_offset = i32::try_from(moof.encoded_size() + mdat_header_len)
            .map_err(|_| Error::structural(BoxType::MOOF, 0, "fragment header too large"))?;
        if let Some(BoxFields::TrackRun(run)) = moof
            .child_mut(BoxType::TRAF)
            .and_then(|traf| traf.child_mut(BoxType::TRUN))
            .and_then(Mp4Box::fields_mut)
        {
            run.data_offset = data_offset;
        }
        Ok(moof)
    }
}

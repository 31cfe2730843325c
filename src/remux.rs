//! Rewriting movies.
//!
//! Both operations rebuild the movie from its tracks and samples:
//!
//! - [`remux`] writes a progressive file (`moov` first, one `mdat`)
//! - [`fragment`] writes an init segment followed by one fragment per sample
//!
//! Only the first sample description of each track is carried over.

use crate::config::{parse_brand, FragmentConfig, ParserConfig};
use anyhow::{Context, Result};
use mp4forge_media::mp4::{EntryParams, ReadOptions};
use mp4forge_media::{MovieOptions, Mp4File, Sample, SampleOptions, Track, TrackOptions};
use std::path::Path;

/// Parse a file from disk with the configured parser settings.
pub fn read_movie(path: &Path, parser: &ParserConfig) -> Result<Mp4File> {
    let options = ReadOptions {
        strict: parser.strict,
        chunk_size: parser.read_chunk_size,
    };
    let file = Mp4File::open_with(path, options)
        .with_context(|| format!("Failed to parse {:?}", path))?;
    for warning in file.warnings() {
        tracing::warn!("{}: {}", path.display(), warning);
    }
    Ok(file)
}

/// Options that recreate a track's header boxes and first sample entry, or
/// `None` when the track has no sample description.
pub fn track_options(track: &Track) -> Option<TrackOptions> {
    let description = track.descriptions.first()?;
    let mut options = TrackOptions {
        track_id: Some(track.track_id),
        handler: track.handler,
        timescale: track.timescale,
        language: track.language.clone(),
        name: track.handler_name.clone(),
        format: description.format,
        width: track.width as u16,
        height: track.height as u16,
        channel_count: 0,
        sample_size: 0,
        sample_rate: 0,
        codec_config: description.codec_config.clone(),
    };
    match description.params {
        EntryParams::Visual { width, height } => {
            options.width = width;
            options.height = height;
        }
        EntryParams::Audio {
            channel_count,
            sample_size,
            sample_rate,
        } => {
            options.channel_count = channel_count;
            options.sample_size = sample_size;
            options.sample_rate = sample_rate;
        }
        EntryParams::Other => {}
    }
    Some(options)
}

fn sample_options(sample: &Sample) -> SampleOptions {
    SampleOptions::new(sample.duration)
        .sync(sample.is_sync)
        .cts_offset(sample.cts_offset)
}

/// Samples of every track in decode-time order.
fn interleaved(movie: &Mp4File) -> Vec<Sample> {
    let mut all: Vec<(f64, Sample)> = movie
        .tracks()
        .filter(|track| track.timescale > 0)
        .flat_map(|track| {
            let timescale = track.timescale as f64;
            track.samples.iter().map(move |s| (s.dts as f64 / timescale, *s))
        })
        .collect();
    all.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.track_id.cmp(&b.1.track_id)));
    all.into_iter().map(|(_, sample)| sample).collect()
}

fn movie_timescale(movie: &Mp4File) -> u32 {
    match movie.info().timescale {
        0 => 1000,
        timescale => timescale,
    }
}

fn add_tracks(input: &Mp4File, output: &mut Mp4File) -> Result<()> {
    for track in input.tracks() {
        if let Some(error) = &track.table_error {
            anyhow::bail!("Track {} has unreadable sample tables: {}", track.track_id, error);
        }
        if track.descriptions.len() > 1 {
            tracing::warn!(
                "Track {} has {} sample descriptions; only the first is kept",
                track.track_id,
                track.descriptions.len()
            );
        }
        let options = track_options(track).with_context(|| {
            format!("Track {} has no sample description", track.track_id)
        })?;
        output
            .add_track(options)
            .with_context(|| format!("Failed to add track {}", track.track_id))?;
    }
    Ok(())
}

/// Rebuild `input` as a progressive movie.
pub fn remux(input: &Mp4File) -> Result<Mp4File> {
    let mut output = Mp4File::new_movie(MovieOptions {
        timescale: movie_timescale(input),
        ..MovieOptions::default()
    });
    add_tracks(input, &mut output)?;

    for sample in interleaved(input) {
        let data = input.read_sample_data(&sample)?;
        output.add_sample(sample.track_id, data, sample_options(&sample))?;
    }
    tracing::debug!("Remuxed {} tracks", output.tracks().count());
    Ok(output)
}

/// Rebuild `input` as an init segment followed by single-sample fragments.
pub fn fragment(input: &Mp4File, config: &FragmentConfig) -> Result<Mp4File> {
    let compatible_brands = config
        .brands
        .iter()
        .map(|brand| parse_brand(brand))
        .collect::<Result<Vec<_>>>()?;
    let mut output = Mp4File::new_movie(MovieOptions {
        timescale: movie_timescale(input),
        major_brand: parse_brand(&config.major_brand)?,
        minor_version: 0,
        compatible_brands,
        fragmented: true,
    });
    add_tracks(input, &mut output)?;

    let mut fragments = 0usize;
    for sample in interleaved(input) {
        let data = input.read_sample_data(&sample)?;
        output.append_sample(sample.track_id, data, sample_options(&sample))?;
        fragments += 1;
    }
    tracing::debug!("Wrote {} fragments", fragments);
    Ok(output)
}

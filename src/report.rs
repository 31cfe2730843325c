//! Text and JSON reports printed by the CLI.

use anyhow::Result;
use mp4forge_media::{MovieInfo, Sample};
use std::fmt::Write;

fn clock(secs: f64) -> String {
    let total = secs.max(0.0);
    let whole = total as u64;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        whole / 3600,
        (whole / 60) % 60,
        whole % 60,
        ((total - whole as f64) * 1000.0) as u64
    )
}

/// Human-readable movie summary.
pub fn info_text(info: &MovieInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Brand: {} ({})",
        info.major_brand.as_deref().unwrap_or("none"),
        info.compatible_brands.join(", ")
    );
    let _ = writeln!(
        out,
        "Duration: {} ({} @ {})",
        clock(info.duration_secs),
        info.duration,
        info.timescale
    );
    let layout = match (info.is_fragmented, info.is_progressive) {
        (true, _) => format!("fragmented, {} fragments", info.fragment_count),
        (false, true) => "progressive".to_string(),
        (false, false) => "media data before movie header".to_string(),
    };
    let _ = writeln!(out, "Layout: {}", layout);

    let _ = writeln!(out, "\nTracks: {}", info.tracks.len());
    for track in &info.tracks {
        let _ = write!(
            out,
            "  [{}] {} {}",
            track.track_id,
            track.handler,
            track.codec.as_deref().unwrap_or("unknown")
        );
        if let (Some(w), Some(h)) = (track.width, track.height) {
            let _ = write!(out, " {}x{}", w, h);
        }
        if let (Some(ch), Some(rate)) = (track.channel_count, track.sample_rate) {
            let _ = write!(out, " {} Hz, {} ch", rate, ch);
        }
        let _ = writeln!(out, " [{}]", track.language);
        let _ = write!(
            out,
            "      {} samples ({} sync), {}",
            track.sample_count,
            track.sync_sample_count,
            clock(track.duration_secs)
        );
        if let Some(interval) = track.max_sync_interval_secs {
            let _ = write!(out, ", max sync interval {:.3}s", interval);
        }
        let _ = writeln!(out);
    }
    out
}

/// One line per sample.
pub fn samples_text(samples: &[Sample]) -> String {
    let mut out = String::from("number      offset     size      dts    cts  sync\n");
    for s in samples {
        let _ = writeln!(
            out,
            "{:>6} {:>11} {:>8} {:>8} {:>6}  {}",
            s.number,
            s.data_offset,
            s.size,
            s.dts,
            s.cts_offset,
            if s.is_sync { "*" } else { "" }
        );
    }
    out
}

pub fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock() {
        assert_eq!(clock(0.0), "00:00:00.000");
        assert_eq!(clock(3723.5), "01:02:03.500");
    }

    #[test]
    fn test_samples_text_marks_sync() {
        let sample = Sample {
            track_id: 1,
            number: 1,
            data_offset: 48,
            size: 10,
            duration: 1,
            dts: 0,
            cts_offset: 0,
            is_sync: true,
            description_index: 1,
        };
        let text = samples_text(&[sample, Sample { number: 2, is_sync: false, ..sample }]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with('*'));
        assert!(!lines[2].ends_with('*'));
    }
}

mod cli;

use mp4forge::{config, remux, report};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mp4forge=trace,mp4forge_media=trace".to_string()
        } else {
            "mp4forge=info,mp4forge_media=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::load_config_or_default(cli.config.as_deref())?;
    if cli.strict {
        config.parser.strict = true;
    }

    match cli.command {
        Commands::Dump { input } => {
            let movie = remux::read_movie(&input, &config.parser)?;
            print!("{}", movie.dump());
            Ok(())
        }
        Commands::Info { input, json } => {
            let movie = remux::read_movie(&input, &config.parser)?;
            let info = movie.info();
            if json || config.output.json {
                println!("{}", report::to_json(&info)?);
            } else {
                println!("File: {}", input.display());
                print!("{}", report::info_text(&info));
            }
            Ok(())
        }
        Commands::Samples { input, track, json } => {
            let movie = remux::read_movie(&input, &config.parser)?;
            let samples: Vec<_> = movie.samples_for_track(track)?.collect();
            if json || config.output.json {
                println!("{}", report::to_json(&samples)?);
            } else {
                print!("{}", report::samples_text(&samples));
            }
            Ok(())
        }
        Commands::Remux { input, output } => {
            let movie = remux::read_movie(&input, &config.parser)?;
            let rewritten = remux::remux(&movie)?;
            write_movie(&rewritten, &output)
        }
        Commands::Fragment { input, output } => {
            let movie = remux::read_movie(&input, &config.parser)?;
            let rewritten = remux::fragment(&movie, &config.fragment)?;
            write_movie(&rewritten, &output)
        }
        Commands::Validate { input } => validate_file(&input, &config),
        Commands::Version => {
            println!("mp4forge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn write_movie(movie: &mp4forge_media::Mp4File, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut out = BufWriter::new(file);
    movie
        .write_to(&mut out)
        .with_context(|| format!("Failed to write {:?}", path))?;
    out.flush()?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}

fn validate_file(path: &Path, config: &config::Config) -> Result<()> {
    let movie = remux::read_movie(path, &config.parser)?;
    let warnings = movie.warnings();
    let broken: Vec<_> = movie
        .tracks()
        .filter_map(|t| t.table_error.as_ref().map(|e| (t.track_id, e)))
        .collect();

    println!("Validating: {}", path.display());
    println!("  Top-level boxes: {}", movie.boxes().len());
    println!("  Tracks: {}", movie.tracks().count());
    for (track_id, error) in &broken {
        println!("  Track {}: {}", track_id, error);
    }
    for warning in warnings {
        println!("  Warning: {}", warning);
    }
    if warnings.is_empty() && broken.is_empty() {
        println!("✓ File is valid");
        Ok(())
    } else {
        anyhow::bail!("{} problem(s) found", warnings.len() + broken.len())
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mp4forge")]
#[command(author, version, about = "Inspect, remux and fragment MP4 files")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Fail on the first structural problem instead of recovering
    #[arg(long, global = true)]
    pub strict: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the box tree of a file
    Dump {
        /// File to dump
        #[arg(required = true)]
        input: PathBuf,
    },

    /// Show movie and track information
    Info {
        /// File to inspect
        #[arg(required = true)]
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the samples of a track
    Samples {
        /// File to inspect
        #[arg(required = true)]
        input: PathBuf,

        /// Track ID
        #[arg(short, long)]
        track: u32,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rewrite a file as a progressive movie
    Remux {
        /// Input file
        #[arg(required = true)]
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Rewrite a file as an init segment followed by fragments
    Fragment {
        /// Input file
        #[arg(required = true)]
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Check that a file parses without structural problems
    Validate {
        /// File to check
        #[arg(required = true)]
        input: PathBuf,
    },

    /// Show version information
    Version,
}

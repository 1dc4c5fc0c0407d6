use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "reeltrack",
    version,
    about = "Resolve protected episode lists and track bookmarks and resume positions"
)]
pub struct Cli {
    /// Database file (overrides REELTRACK_DB)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decode an episode list and print it grouped into seasons
    Episodes {
        file: PathBuf,
        /// Episodes per season (overrides REELTRACK_CHUNK_SIZE)
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Encrypt a play url with the built-in key and print it as hex
    Encrypt { plaintext: String },
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
    #[command(subcommand)]
    Progress(ProgressCommand),
    /// Play an episode and record the resume position
    Play(PlayArgs),
    Tui,
}

#[derive(Debug, Subcommand)]
pub enum BookmarkCommand {
    Add {
        id: String,
    },
    /// Remove one or more bookmarks in a single operation
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Toggle {
        id: String,
    },
    List,
}

#[derive(Debug, Subcommand)]
pub enum ProgressCommand {
    Set { id: String, seconds: f64 },
    Get { id: String },
    List,
}

#[derive(Debug, Args)]
pub struct PlayArgs {
    /// Title identifier the resume position is stored under
    pub title_id: String,
    /// Episode list in the upstream JSON format
    pub file: PathBuf,
    /// Overall episode number across all seasons
    #[arg(long, conflicts_with_all = ["season", "number"])]
    pub episode: Option<u32>,
    #[arg(long, requires = "number")]
    pub season: Option<u32>,
    /// Episode number within --season
    #[arg(long, requires = "season")]
    pub number: Option<u32>,
    /// Known duration in seconds; the saved position never exceeds it
    #[arg(long)]
    pub duration: Option<f64>,
    /// Ignore the saved position
    #[arg(long)]
    pub from_start: bool,
    /// Player binary (overrides REELTRACK_PLAYER)
    #[arg(long)]
    pub player: Option<PathBuf>,
}

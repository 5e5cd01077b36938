use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docshelf",
    about = "Manage, search and serve a local library of docsets"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage installed docsets
    Docset {
        #[command(subcommand)]
        action: DocsetAction,
    },
    /// Manage the downloads cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Search across enabled docsets
    Search(SearchArgs),
    /// Record that a search result was chosen
    Choose(ChooseArgs),
    /// Inspect or seed the result preference ranks
    Ranks {
        #[command(subcommand)]
        action: RanksAction,
    },
    /// Fetch a docset URL through the content transport
    Fetch(FetchArgs),
    /// Show system status and statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Docset subcommands --

#[derive(Debug, Subcommand)]
pub enum DocsetAction {
    /// Copy a docset bundle into the library and register it
    Import {
        /// Path to the `.docset` bundle
        path: PathBuf,
        /// Replace an installed docset with the same name
        #[arg(long)]
        replace: bool,
    },
    /// Register a bundle that already lives inside the data directory
    Add {
        /// Path to the `.docset` bundle
        path: PathBuf,
        /// Replace an installed docset with the same name
        #[arg(long)]
        replace: bool,
    },
    /// List installed docsets in order
    List {
        /// Only list docsets whose name matches this glob
        pattern: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Include a docset in searches
    Enable {
        /// Docset name or identifier
        name: String,
    },
    /// Exclude a docset from searches
    Disable {
        /// Docset name or identifier
        name: String,
    },
    /// Move a docset to another position
    Move {
        /// Current position (0-based)
        from: usize,
        /// New position (0-based)
        to: usize,
    },
    /// Unregister a docset and delete its files
    Remove {
        /// Docset name or identifier
        name: String,
    },
    /// Unregister every docset stored inside a folder
    RemoveFolder {
        /// Folder containing docset bundles
        path: PathBuf,
    },
    /// Build a docset bundle from a directory of pages
    Build(BuildArgs),
}

#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// Directory containing the pages
    pub source: PathBuf,

    /// Display name of the docset
    #[arg(long)]
    pub name: String,

    /// Platform family, used to derive the identifier
    #[arg(long, default_value = "")]
    pub platform: String,

    /// Explicit identifier
    #[arg(long)]
    pub identifier: Option<String>,

    /// Version string recorded in the metadata
    #[arg(long)]
    pub version: Option<String>,

    /// Directory to write the bundle into
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,

    /// Import the built bundle into the library
    #[arg(long)]
    pub import: bool,
}

// -- Cache subcommands --

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Delete leftover downloads and failed imports
    Clean,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "20")]
    pub count: usize,

    /// Search only within this docset
    #[arg(short = 'd', long)]
    pub docset: Option<String>,

    /// Search the docset serving this platform (e.g. ios, python)
    #[arg(short = 'p', long, conflicts_with = "docset")]
    pub platform: Option<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Minimum score threshold
    #[arg(long, default_value = "0.0")]
    pub min_score: f64,
}

// -- Choose --

#[derive(Debug, Parser)]
pub struct ChooseArgs {
    /// Result identity, as shown by `search --json`
    pub identity: String,
}

// -- Ranks subcommands --

#[derive(Debug, Subcommand)]
pub enum RanksAction {
    /// Show stored ranks, highest first
    Show {
        /// Show at most this many entries
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Merge ranks from a JSON object of `identity -> rank`
    Seed {
        /// Path to the JSON file
        file: PathBuf,
    },
    /// Forget every stored rank
    Reset,
}

// -- Fetch --

#[derive(Debug, Parser)]
pub struct FetchArgs {
    /// `dash-docset://` or `file://` URL
    pub url: String,

    /// Caller identifier reported with the response
    #[arg(long, default_value = "cli")]
    pub identifier: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,

    /// Fetches allowed to run at once
    #[arg(long, default_value = "4")]
    pub workers: usize,

    /// Print response metadata instead of the payload
    #[arg(long)]
    pub info: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docshelf",
            &mut std::io::stdout(),
        );
    }
}

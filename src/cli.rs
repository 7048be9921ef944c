// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// cdiscover - find the files that matter for a question
///
/// Ranks repository files by semantic similarity to a natural-language query,
/// using a local embedding index that is refreshed incrementally.
#[derive(Parser, Debug)]
#[command(name = "cdiscover")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rank files by relevance to a natural-language query
    Discover {
        /// What you are looking for, in plain words
        query: String,

        /// Print the ranked paths to stdout, one per line, for adding to a context
        #[arg(short, long)]
        add: bool,

        /// Maximum number of files to return (default: 5, or search.limit)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Refresh the index before searching
        #[arg(short, long)]
        refresh: bool,

        /// Path inside the repository (defaults to current directory)
        #[arg(long)]
        path: Option<String>,
    },

    /// Build or refresh the index
    Index {
        /// Path inside the repository (defaults to current directory)
        #[arg(short, long)]
        path: Option<String>,

        /// Re-chunk every file instead of only changed ones
        #[arg(short, long)]
        force: bool,

        /// Extra paths/patterns to exclude (gitignore syntax, repeatable).
        /// Stored with the index and applied to every later refresh
        #[arg(long = "exclude", short = 'e')]
        exclude_paths: Vec<String>,
    },

    /// Watch for file changes and refresh the index
    Watch {
        /// Path inside the repository (defaults to current directory)
        #[arg(short, long)]
        path: Option<String>,

        /// Debounce interval in seconds (default: 2)
        #[arg(long, default_value = "2")]
        debounce: u64,
    },

    /// Show what the index holds for a repository
    Status {
        /// Path inside the repository (defaults to current directory)
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Delete the cached index for a repository
    Clear {
        /// Path inside the repository (defaults to current directory)
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_discover_flags() {
        let cli = Cli::try_parse_from(["cdiscover", "discover", "auth flow", "-a", "-l", "3", "-r"]).unwrap();
        match cli.command {
            Commands::Discover {
                query,
                add,
                limit,
                refresh,
                path,
            } => {
                assert_eq!(query, "auth flow");
                assert!(add);
                assert_eq!(limit, Some(3));
                assert!(refresh);
                assert!(path.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.format, OutputFormat::Text);
    }
}

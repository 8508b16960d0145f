//! CLI command definitions.

use clap::Subcommand;
use monobuild_core::Runtime;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Check the unit graph and the configured executors
    Validate {
        /// Graph file, overriding the config
        #[arg(short, long)]
        graph: Option<PathBuf>,
    },

    /// List units
    Units {
        /// Only units with this runtime
        #[arg(short, long)]
        runtime: Option<Runtime>,
    },

    /// Show a unit's configuration
    Show {
        /// Unit name, e.g. tools/haywire
        unit: String,
    },

    /// Print units grouped into layers that may build concurrently
    Plan,

    /// Build the whole graph or selected units
    Build {
        /// Build only these units and their dependencies
        #[arg(short, long = "unit")]
        units: Vec<String>,

        /// Maximum number of units running their pipeline at once
        #[arg(short = 'j', long)]
        max_concurrency: Option<usize>,

        /// Print the build report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a JSON schema
    Schema {
        /// Schema of the config file instead of the graph file
        #[arg(long = "for-config")]
        for_config: bool,
    },
}

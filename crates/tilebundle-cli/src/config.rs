//! Command-line arguments.
//!
//! Cache settings come from, in order of precedence:
//! - CLI arguments (`--root`, `--max-open-bundles`)
//! - Environment variables (`TILEBUNDLE_ROOT`, `TILEBUNDLE_MAX_OPEN_BUNDLES`)
//! - A JSON file given with `--config` / `TILEBUNDLE_CONFIG`
//! - Library defaults

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tilebundle::{CacheConfig, TileCoordinate};

/// Inspect and edit bundled tile caches.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tilebundle",
    about = "Read and write bundled raster tile caches",
    version = tilebundle::VERSION
)]
pub struct Cli {
    /// Tile-set root holding the `Lxx` level directories
    #[arg(long, global = true, env = "TILEBUNDLE_ROOT")]
    pub root: Option<PathBuf>,

    /// Maximum number of block file pairs held open
    #[arg(long, global = true, env = "TILEBUNDLE_MAX_OPEN_BUNDLES")]
    pub max_open_bundles: Option<usize>,

    /// JSON cache configuration file
    #[arg(long, global = true, env = "TILEBUNDLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Tile address shared by all commands.
#[derive(Debug, Clone, Copy, clap::Args)]
pub struct TileArgs {
    /// Zoom level
    pub level: u32,
    /// Tile row
    pub row: u32,
    /// Tile column
    pub col: u32,
}

impl TileArgs {
    /// Coordinate named by the arguments.
    pub const fn coordinate(&self) -> TileCoordinate {
        TileCoordinate::new(self.row, self.col, self.level)
    }
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print a tile's bytes, or write them to a file
    Get {
        #[command(flatten)]
        tile: TileArgs,

        /// Write the tile here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Store a file as a tile
    Put {
        #[command(flatten)]
        tile: TileArgs,

        /// File holding the tile bytes
        input: PathBuf,
    },

    /// Show the header and occupied slots of the block holding a tile
    Inspect {
        #[command(flatten)]
        tile: TileArgs,

        /// Also dump the raw 60-byte header as hex
        #[arg(long)]
        raw: bool,
    },

    /// Print the bundle and bundlx paths for a tile
    Path {
        #[command(flatten)]
        tile: TileArgs,
    },
}

impl Cli {
    /// Resolve the cache configuration from arguments, environment and file.
    pub fn cache_config(&self) -> Result<CacheConfig> {
        let mut config = match &self.config {
            Some(path) => CacheConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => CacheConfig::default(),
        };

        if let Some(root) = &self.root {
            config = config.with_root(root);
        }
        if let Some(max) = self.max_open_bundles {
            config = config.with_max_open_bundles(max);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_get() {
        let cli = Cli::try_parse_from(["tilebundle", "--root", "/srv/tiles", "get", "3", "5", "7"])
            .expect("parse");
        let Command::Get { tile, output } = cli.command else {
            panic!("expected get");
        };
        assert_eq!(tile.coordinate(), TileCoordinate::new(5, 7, 3));
        assert_eq!(output, None);
        assert_eq!(cli.root, Some(PathBuf::from("/srv/tiles")));
    }

    #[test]
    fn test_arguments_override_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{ "root": "/from/file", "max_open_bundles": 9 }"#)
            .expect("write");

        let cli = Cli::try_parse_from([
            "tilebundle",
            "path",
            "1",
            "2",
            "3",
            "--config",
            path.to_str().expect("utf-8 path"),
            "--max-open-bundles",
            "4",
        ])
        .expect("parse");

        let config = cli.cache_config().expect("config");
        assert_eq!(config.root, PathBuf::from("/from/file"));
        assert_eq!(config.max_open_bundles, 4);
    }

    #[test]
    fn test_version_is_library_version() {
        use clap::CommandFactory;
        assert_eq!(Cli::command().get_version(), Some(tilebundle::VERSION));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let cli = Cli::try_parse_from([
            "tilebundle",
            "--root",
            "/srv/tiles",
            "--max-open-bundles",
            "0",
            "path",
            "1",
            "2",
            "3",
        ])
        .expect("parse");
        assert!(cli.cache_config().is_err());
    }
}

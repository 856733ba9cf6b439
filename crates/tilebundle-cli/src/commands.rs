//! Command implementations.
//!
//! Every command writes its report to the supplied writer so the binary can
//! hand over stdout and tests can capture output.

use crate::config::{Cli, Command};
use anyhow::{Context, Result, bail};
use std::io::Write;
use std::path::Path;
use tilebundle::{BundlePaths, CacheConfig, TileCache, TileCoordinate};
use tracing::info;

/// Run the command selected on the command line.
pub fn run<W: Write>(cli: &Cli, out: &mut W) -> Result<()> {
    let config = cli.cache_config()?;

    match &cli.command {
        Command::Path { tile } => path(&config, tile.coordinate(), out),
        Command::Get { tile, output } => {
            let cache = open_existing(&config)?;
            get(&cache, tile.coordinate(), output.as_deref(), out)
        }
        Command::Put { tile, input } => {
            let cache = TileCache::open(config)?;
            put(&cache, tile.coordinate(), input, out)
        }
        Command::Inspect { tile, raw } => {
            let cache = open_existing(&config)?;
            inspect(&cache, tile.coordinate(), *raw, out)
        }
    }
}

/// Read-only commands never create the root.
fn open_existing(config: &CacheConfig) -> Result<TileCache> {
    let config = config.clone().with_create_root(false);
    TileCache::open(config).context("opening tile cache")
}

fn path<W: Write>(config: &CacheConfig, coord: TileCoordinate, out: &mut W) -> Result<()> {
    let paths = BundlePaths::for_tile(&config.root, coord);
    writeln!(out, "{}", paths.bundle().display())?;
    writeln!(out, "{}", paths.bundlx().display())?;
    Ok(())
}

fn get<W: Write>(
    cache: &TileCache,
    coord: TileCoordinate,
    output: Option<&Path>,
    out: &mut W,
) -> Result<()> {
    let Some(tile) = cache.read_tile(coord)? else {
        bail!("no tile at {coord}");
    };

    match output {
        Some(path) => {
            std::fs::write(path, &tile)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Wrote {} bytes to {}", tile.len(), path.display());
        }
        None => out.write_all(&tile)?,
    }
    Ok(())
}

fn put<W: Write>(cache: &TileCache, coord: TileCoordinate, input: &Path, out: &mut W) -> Result<()> {
    let data = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let offset = cache.write_tile(coord, &data)?;
    cache.close().context("flushing tile cache")?;

    writeln!(
        out,
        "{coord}: {} bytes at offset {offset} in {}",
        data.len(),
        cache.paths(coord).bundle().display()
    )?;
    Ok(())
}

fn inspect<W: Write>(cache: &TileCache, coord: TileCoordinate, raw: bool, out: &mut W) -> Result<()> {
    let block = coord.block();
    let Some(header) = cache.block_header(block)? else {
        bail!("no block at {block}");
    };
    let mut tiles = cache.block_tiles(block)?;
    tiles.sort_by_key(|(_, offset)| *offset);

    writeln!(out, "Block:          {block}")?;
    writeln!(out, "Bundle:         {}", cache.paths(coord).bundle().display())?;
    writeln!(out, "Rows:           {}..={}", header.row_start, header.row_end)?;
    writeln!(out, "Columns:        {}..={}", header.col_start, header.col_end)?;
    writeln!(out, "File size:      {}", header.file_size)?;
    writeln!(out, "Max tile size:  {}", header.max_tile_size)?;
    writeln!(out, "Non-null count: {}", header.non_null_count)?;
    writeln!(out, "Tiles:          {}", tiles.len())?;

    if raw {
        writeln!(out, "Header bytes:")?;
        for (i, chunk) in header.to_bytes()?.chunks(16).enumerate() {
            writeln!(out, "  {:04x}  {}", i * 16, hex::encode(chunk))?;
        }
    }

    for (tile, offset) in tiles {
        writeln!(out, "  {tile} @ {offset}")?;
    }
    Ok(())
}

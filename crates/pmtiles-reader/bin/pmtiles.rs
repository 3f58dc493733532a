//! `pmtiles` command line tool.
//!
//! Prints an archive's header or metadata, or extracts a single tile. The
//! archive may be a local path or an `http(s)://` URL.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pmtiles_reader::{Archive, CacheStrategy, ReaderConfig};

#[derive(Debug, Parser)]
#[command(name = "pmtiles", about = "Inspect PMTiles archives", version)]
struct Cli {
    /// Cache strategy: shared-promise or resolved-value
    #[arg(long, env = "PMTILES_CACHE_STRATEGY", default_value = "shared-promise")]
    strategy: CacheStrategy,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the header as JSON
    Header {
        /// Archive path or URL
        archive: String,
    },
    /// Print the metadata JSON
    Metadata {
        /// Archive path or URL
        archive: String,
    },
    /// Write one tile's bytes
    Tile {
        /// Archive path or URL
        archive: String,
        z: u8,
        x: u32,
        y: u32,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Undo the archive's tile compression
        #[arg(long)]
        decompress: bool,
    },
}

fn open(location: &str, strategy: CacheStrategy) -> Result<Archive> {
    let config = ReaderConfig::from_env().with_strategy(strategy);
    Archive::open_with_config(location, config).with_context(|| format!("opening {location}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Header { archive } => {
            let header = open(&archive, cli.strategy)?.get_header().await?;
            println!("{}", serde_json::to_string_pretty(&*header)?);
        }
        Command::Metadata { archive } => {
            let metadata = open(&archive, cli.strategy)?.get_metadata().await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Command::Tile {
            archive,
            z,
            x,
            y,
            output,
            decompress,
        } => {
            let reader = open(&archive, cli.strategy)?;
            let Some(tile) = reader.get_zxy(z, x, y, None).await? else {
                bail!("tile {z}/{x}/{y} not found in {archive}");
            };
            let bytes = if decompress {
                reader.decompress_tile(tile.data).await?
            } else {
                tile.data
            };

            let header = reader.get_header().await?;
            tracing::info!(
                z,
                x,
                y,
                bytes = bytes.len(),
                content_type = header.tile_type.content_type(),
                "extracted tile"
            );
            match output {
                Some(path) => std::fs::write(&path, &bytes)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => std::io::stdout().write_all(&bytes)?,
            }
        }
    }

    Ok(())
}

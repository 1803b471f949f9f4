//! flatfs shell
//!
//! Interactive command shell over a flatfs disk image

use anyhow::{Context, Result};
use clap::Parser;
use flatfs::shell::Shell;
use flatfs::{FsConfig, FsBuilder, OverflowPolicy};
use std::io;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flatfs")]
#[command(about = "Interactive shell for a flat single-image filesystem")]
struct Args {
    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Path to the disk image [default: filesys.db]
    #[arg(short = 's', long)]
    store: Option<PathBuf>,

    /// Image size in bytes, used when the image is created [default: 1048576]
    #[arg(long)]
    size: Option<u64>,

    /// Write overflow policy (relocate, legacy)
    #[arg(long)]
    overflow: Option<OverflowPolicy>,

    /// Fail instead of creating or reinitializing the image
    #[arg(long)]
    no_format: bool,

    /// Print stats and listings as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    // Logs go to stderr so the shell output stays clean
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => FsConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => FsConfig::default(),
    };
    if let Some(store) = args.store {
        config.store_path = store;
    }
    if let Some(size) = args.size {
        config.store_size = size;
    }
    if let Some(policy) = args.overflow {
        config.write_overflow = policy;
    }
    if args.no_format {
        config.format_if_invalid = false;
    }

    info!("Store path: {:?}", config.store_path);
    let path = config.store_path.clone();
    let mut fs = FsBuilder::from_config(config)
        .build()
        .with_context(|| format!("Failed to open store {:?}", path))?;

    {
        let mut shell = Shell::new(&mut fs, io::stdout().lock()).json(args.json);
        shell.run(io::stdin().lock())?;
    }

    fs.sync().context("Failed to sync store")?;
    info!("Store closed");
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fwimport_core::{
    CommandIntrospector, ExtractionScheduler, FirmwareImporter, FirmwareStore, ImportConfig,
    ZipUnpacker, extract_asset, list_images, validate,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Console firmware importer and avatar extractor", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data root for the default layout (ignored with --config)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a firmware dump archive (zip)
    Import {
        archive: PathBuf,
    },
    /// Check whether a directory holds a firmware dump
    Validate {
        dir: PathBuf,
    },
    /// Decode every avatar archive under a directory into PNGs
    Extract {
        source: Option<PathBuf>,
        /// Defaults to the source directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Worker threads
        #[arg(short = 'j', long)]
        threads: Option<usize>,
    },
    /// Decode a single Yaz0 avatar archive into a PNG
    Decode {
        input: PathBuf,
        output: Option<PathBuf>,
    },
    /// Show installed firmware version and key status
    Status,
    /// Write the effective configuration to a file
    InitConfig {
        path: PathBuf,
    },
}

fn load_config(args: &Args) -> Result<ImportConfig> {
    if let Some(path) = &args.config {
        return ImportConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()));
    }
    Ok(match &args.root {
        Some(root) => ImportConfig::with_root(root),
        None => ImportConfig::default(),
    })
}

fn introspector(config: &ImportConfig) -> Result<CommandIntrospector> {
    match &config.introspector {
        Some(tools) => Ok(CommandIntrospector::new(tools.clone())),
        None => bail!("no [introspector] table configured; pass --config"),
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;

    match args.command {
        Command::Import { archive } => {
            if !config.keys_available() {
                bail!("no keys found in {}", config.keys_dir.display());
            }
            let introspector = introspector(&config)?;
            let importer =
                FirmwareImporter::new(config, Arc::new(introspector), Box::new(ZipUnpacker::new()));
            let summary = importer
                .import_file(&archive)
                .with_context(|| format!("importing {}", archive.display()))?;
            info!(
                version = %summary.version,
                files = summary.unpacked_files,
                avatars = summary.avatars.succeeded,
                "Import finished"
            );
            println!("Installed firmware {}", summary.version);
        }
        Command::Validate { dir } => {
            let introspector = introspector(&config)?;
            let result = validate(&dir, &config.keys_dir, &introspector);
            println!("{}: {}", dir.display(), result);
            if !result.is_valid() {
                std::process::exit(2);
            }
        }
        Command::Extract {
            source,
            output,
            threads,
        } => {
            if threads.is_some() {
                config.extract.threads = threads;
            }
            let source = source.unwrap_or_else(|| config.avatar_dir.clone());
            let output = output.unwrap_or_else(|| source.clone());
            let report = ExtractionScheduler::new(config.extract).extract_all(&source, &output);
            println!(
                "{} written, {} skipped",
                report.succeeded, report.skipped
            );
        }
        Command::Decode { input, output } => {
            let output =
                output.unwrap_or_else(|| input.with_extension(&config.extract.image_extension));
            extract_asset(&input, &output, config.extract.max_decoded_size)
                .with_context(|| format!("decoding {}", input.display()))?;
            println!("{}", output.display());
        }
        Command::Status => {
            let store = FirmwareStore::new(&config.firmware_dir, &config.version_file);
            match store.installed_version()? {
                Some(version) => println!("Firmware: {}", version),
                None => println!("Firmware: not installed"),
            }
            println!(
                "Keys: {}",
                if config.keys_available() { "present" } else { "missing" }
            );
            let images = list_images(&config.avatar_dir, &config.extract.image_extension);
            println!("Avatars: {}", images.len());
        }
        Command::InitConfig { path } => {
            config.save_to_file(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {}", e);
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

use std::fs::{self, File};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use pagecache::preview::{CacheCoordinator, DocumentSource, PreviewThrottle, RenderBackend};
use pagecache::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "pagecache", version, about = "Layered page-image cache for live document previews")]
struct Cli {
    /// Settings file (defaults to <config dir>/pagecache/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the log level from the settings file
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a document and render its pages through the cache
    Render {
        file: PathBuf,
        /// Only render this page (zero-based)
        #[arg(long)]
        page: Option<usize>,
        /// Write rendered pages as page-<n>.png into this directory
        #[arg(long)]
        output: Option<PathBuf>,
        /// Render thumbnails instead of full page images
        #[arg(long)]
        thumbnails: bool,
    },
    /// Diff an edited rendering against an opened document and print the updates as JSON
    Diff { file: PathBuf, edited: PathBuf },
    /// Open a document, then read edited renderings' paths from stdin, one per
    /// line. Bursts are throttled and each batch of updates prints as a JSON line.
    Preview { file: PathBuf },
}

fn main() -> Result<()> {
    install_panic_handler();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref());
    init_logging(&settings, cli.log_level)?;

    let coordinator = Arc::new(CacheCoordinator::new(backend()?, settings.cache_config()));
    match cli.command {
        Command::Render {
            file,
            page,
            output,
            thumbnails,
        } => render(&coordinator, &file, page, output.as_deref(), thumbnails),
        Command::Diff { file, edited } => diff(&coordinator, &file, &edited),
        Command::Preview { file } => preview(coordinator, &file, &settings),
    }
}

fn install_panic_handler() {
    if cfg!(debug_assertions) {
        better_panic::install();
    } else {
        human_panic::setup_panic!();
    }
}

fn init_logging(settings: &Settings, level: Option<LevelFilter>) -> Result<()> {
    let level = level.unwrap_or_else(|| settings.log_level_filter());
    let log_file = File::create(&settings.log_file)
        .with_context(|| format!("creating log file {}", settings.log_file.display()))?;
    WriteLogger::init(level, Config::default(), log_file)?;
    info!("Starting pagecache {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[cfg(feature = "pdf")]
fn backend() -> Result<Arc<dyn RenderBackend>> {
    Ok(Arc::new(pagecache::preview::MupdfBackend))
}

#[cfg(not(feature = "pdf"))]
fn backend() -> Result<Arc<dyn RenderBackend>> {
    bail!("pagecache was built without the `pdf` feature; no render backend available")
}

fn open(coordinator: &CacheCoordinator, file: &Path) -> Result<usize> {
    if !coordinator.open_session(DocumentSource::File(file.to_path_buf())) {
        bail!("could not open {}", file.display());
    }
    Ok(coordinator.get_current_total_pages())
}

fn render(
    coordinator: &CacheCoordinator,
    file: &Path,
    page: Option<usize>,
    output: Option<&Path>,
    thumbnails: bool,
) -> Result<()> {
    let total = open(coordinator, file)?;
    println!("{}: {total} pages", file.display());

    let pages = match page {
        Some(page) if page >= total => bail!("page {page} out of range (0..{total})"),
        Some(page) => page..page + 1,
        None => 0..total,
    };
    if let Some(dir) = output {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    for index in pages {
        let artifact = if thumbnails {
            coordinator.get_thumbnail(index)
        } else {
            coordinator.get_image_data(index)
        };
        let Some(artifact) = artifact else {
            warn!("Page {index} did not render");
            println!("page {index}: failed");
            continue;
        };
        println!(
            "page {index}: {}x{} pt, {} bytes",
            artifact.size.width,
            artifact.size.height,
            artifact.bytes.len()
        );
        if let Some(dir) = output {
            let path = dir.join(format!("page-{index}.png"));
            fs::write(&path, &artifact.bytes)
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }

    coordinator.close_session();
    Ok(())
}

fn diff(coordinator: &CacheCoordinator, file: &Path, edited: &Path) -> Result<()> {
    let total = open(coordinator, file)?;
    for index in 0..total {
        if coordinator.get_image_data(index).is_none() {
            warn!("Page {index} of {} did not render", file.display());
        }
    }

    let bytes = fs::read(edited).with_context(|| format!("reading {}", edited.display()))?;
    let updates = coordinator.diff_and_update(&bytes);
    info!("{} page updates", updates.len());

    println!("{}", serde_json::to_string_pretty(&updates)?);
    coordinator.close_session();
    Ok(())
}

fn preview(coordinator: Arc<CacheCoordinator>, file: &Path, settings: &Settings) -> Result<()> {
    open(&coordinator, file)?;
    let throttle = PreviewThrottle::spawn(
        coordinator.clone(),
        settings.throttle_delay(),
        |updates| match serde_json::to_string(&updates) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Could not serialize updates: {e}"),
        },
    )
    .context("starting preview throttle")?;

    for line in io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        let path = line.trim();
        if path.is_empty() {
            continue;
        }
        match fs::read(path) {
            Ok(bytes) => throttle.submit(bytes),
            Err(e) => warn!("Skipping {path}: {e}"),
        }
    }

    throttle.finish();
    coordinator.close_session();
    Ok(())
}

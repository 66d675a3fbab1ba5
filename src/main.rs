use clap::{Parser, Subcommand};
use rayon::prelude::*;
use respimg::output::{self, WarmEvent};
use respimg::paths::{self, Ineligible};
use respimg::types::SOURCE_EXTENSIONS;
use respimg::{Configuration, Responsive, SkipReason, config};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG: &str = "respimg.toml";

#[derive(Parser)]
#[command(name = "respimg")]
#[command(about = "Responsive <picture> markup with cached image variants")]
#[command(long_about = "\
Responsive <picture> markup with cached image variants

Takes an <img> fragment pointing at a local JPEG or PNG and emits a <picture>
with WebP/AVIF <source> elements and a sized, lazy-loading fallback <img>.
Variants are generated once and reused until the source's content changes.

Layout under the content root (defaults):

  images/photo.jpg                                      # source
  media/cached-resp-images/images/photo_480.jpg         # variants
  media/cached-resp-images/images/photo_480.webp
  media/cached-resp-images/___data___/images/photo.jpg.json   # sidecar

Run 'respimg gen-config' to generate a documented respimg.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./respimg.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rewrite one <img> fragment and print the result
    Transform {
        /// Breakpoints to offer (defaults to every configured size)
        #[arg(long, value_delimiter = ',')]
        breakpoints: Option<Vec<u32>>,
        /// HTML fragment, or '-' to read it from stdin
        fragment: String,
    },
    /// Generate variants for every image under a directory
    Warm {
        /// Directory to walk (defaults to the content root)
        dir: Option<PathBuf>,
    },
    /// Print a stock respimg.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Transform {
            breakpoints,
            fragment,
        } => {
            let config = load(cli.config.as_deref())?;
            let fragment = if fragment == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                fragment
            };
            let breakpoints = breakpoints.unwrap_or_else(|| config.images.sizes.clone());
            let html = Responsive::new().transform(&config, &fragment, &breakpoints);
            println!("{}", html.trim_end());
        }
        Command::Warm { dir } => {
            let config = load(cli.config.as_deref())?;
            init_thread_pool(&config.processing);
            warm(&config, dir.as_deref())?;
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Load the explicit config file, `./respimg.toml`, or the stock defaults.
fn load(path: Option<&Path>) -> Result<Configuration, config::ConfigError> {
    match path {
        Some(path) => config::load_config(path),
        None if Path::new(DEFAULT_CONFIG).is_file() => config::load_config(Path::new(DEFAULT_CONFIG)),
        None => config::resolve_config(None),
    }
}

/// Initialize the rayon thread pool based on processing config.
///
/// Never more threads than CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn warm(config: &Configuration, dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let root = config.content_root.canonicalize()?;
    let dir = match dir {
        Some(dir) => dir.canonicalize()?,
        None => root.clone(),
    };
    let cache_dir = root.join(config.cache.dir_path());

    let files: Vec<PathBuf> = WalkDir::new(&dir)
        .into_iter()
        .filter_entry(|e| e.path() != cache_dir)
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_source_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    println!("==> Warming {} images under {}", files.len(), dir.display());

    let responsive = Responsive::new();
    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        let mut skipped = 0;
        for event in rx {
            if matches!(event, WarmEvent::Skipped { .. }) {
                skipped += 1;
            }
            for line in output::format_warm_event(&event) {
                println!("{}", line);
            }
        }
        skipped
    });

    files.par_iter().for_each_with(tx, |tx, path| {
        tx.send(warm_one(&responsive, config, &root, path)).ok();
    });
    let skipped = printer.join().map_err(|_| "output thread panicked")?;

    println!();
    println!("{}", output::format_warm_summary(&responsive.stats(), skipped));
    Ok(())
}

fn warm_one(responsive: &Responsive, config: &Configuration, root: &Path, path: &Path) -> WarmEvent {
    let Ok(relative) = path.strip_prefix(root) else {
        return WarmEvent::skipped(path, Ineligible::OutsideRoot);
    };
    let reference: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let reference = format!("/{}", reference.join("/"));

    match paths::resolve_under(root, &reference, config)
        .map_err(SkipReason::from)
        .and_then(|source| responsive.prepare_resolved(config, source))
    {
        Ok(prepared) => WarmEvent::prepared(&prepared),
        Err(reason) => WarmEvent::skipped(relative, reason),
    }
}

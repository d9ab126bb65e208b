use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use facefind_core::OnnxEmbedder;
use facefind_search::{
    encode_data_url, CandidatePhoto, ConfigResolver, ConfigStore, EngineSettings, LocatorResolver, MemoryStore,
    PhotoMatch, ProbeImage, Progress, ProviderConfig, ProviderKind, SearchEngine, SearchError, SqliteStore,
    PROVIDER_CONFIG_KEY,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

#[derive(Parser)]
#[command(name = "facefind", about = "Find the photos you appear in")]
struct Cli {
    /// Gallery/settings database (overrides FACEFIND_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search a gallery for photos of the person in a selfie
    Search(SearchArgs),
    /// Show or change the matching provider
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show settings and model availability
    Status,
}

#[derive(Args)]
struct SearchArgs {
    /// Selfie image: path, file:// or http(s) URL
    #[arg(long)]
    probe: String,
    /// Search the photos of this event in the database
    #[arg(long, conflicts_with = "dir", required_unless_present = "dir")]
    event: Option<String>,
    /// Search the images in this directory
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Override the stored provider for this search
    #[arg(long, value_enum)]
    provider: Option<ProviderArg>,
    /// Remote matching API endpoint
    #[arg(long, requires = "provider")]
    endpoint: Option<String>,
    /// Remote matching API key
    #[arg(long, requires = "provider")]
    key: Option<String>,
    /// Print matches as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the active provider configuration
    Show,
    /// Store a new provider configuration
    Set {
        #[arg(long, value_enum)]
        provider: ProviderArg,
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        key: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderArg {
    Local,
    Remote,
}

impl ProviderArg {
    fn config(self, endpoint: Option<String>, key: Option<String>) -> Result<ProviderConfig> {
        match self {
            ProviderArg::Local => Ok(ProviderConfig::local()),
            ProviderArg::Remote => {
                let endpoint = endpoint.context("--endpoint is required for the remote provider")?;
                Ok(ProviderConfig::remote(endpoint, key))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = EngineSettings::from_env();
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    match cli.command {
        Commands::Search(args) => search(settings, args).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => config_show(&settings).await,
            ConfigAction::Set {
                provider,
                endpoint,
                key,
            } => config_set(&settings, provider.config(endpoint, key)?).await,
        },
        Commands::Status => status(&settings).await,
    }
}

async fn open_store(settings: &EngineSettings) -> Result<SqliteStore> {
    if let Some(parent) = settings.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    SqliteStore::open(&settings.db_path)
        .await
        .with_context(|| format!("opening {}", settings.db_path.display()))
}

async fn search(settings: EngineSettings, args: SearchArgs) -> Result<()> {
    let store = Arc::new(open_store(&settings).await?);

    // A provider given on the command line replaces the stored one for this run.
    let config_store: Arc<dyn ConfigStore> = match args.provider {
        Some(provider) => {
            let config = provider.config(args.endpoint.clone(), args.key.clone())?;
            let overrides = MemoryStore::new();
            overrides.set_setting(PROVIDER_CONFIG_KEY, serde_json::to_value(&config)?);
            Arc::new(overrides)
        }
        None => store.clone(),
    };

    let resolver = LocatorResolver::default();
    let probe = ProbeImage::from_locator(&resolver, &args.probe)
        .await
        .with_context(|| format!("reading selfie {}", args.probe))?;

    let config = Arc::new(ConfigResolver::new(config_store));
    let remote = config.load().await.effective_provider() == ProviderKind::Remote;

    let embedder = Arc::new(OnnxEmbedder::new(settings.model_assets()));
    let engine = SearchEngine::new(config, embedder, settings)
        .with_resolver(resolver)
        .with_photo_store(store);

    let bar = if args.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .context("progress template")?,
    );
    let on_progress = |p: Progress| {
        bar.set_length(p.total as u64);
        bar.set_position(p.processed as u64);
        bar.set_message(p.message);
    };

    let result = match (&args.event, &args.dir) {
        (Some(event_id), _) => engine.search_event(event_id, &probe, &on_progress).await,
        (None, Some(dir)) => {
            let mut candidates = scan_dir(dir)?;
            if remote {
                // The matching API cannot read local paths.
                candidates = inline_images(candidates)?;
            }
            engine.search(&probe, &candidates, &on_progress).await
        }
        (None, None) => bail!("either --event or --dir is required"),
    };
    bar.finish_and_clear();

    match result {
        Ok(matches) => print_matches(&matches, args.json),
        Err(SearchError::NoFaceDetected) => {
            eprintln!("{}", SearchError::NoFaceDetected);
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}

fn print_matches(matches: &[PhotoMatch], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(matches)?);
        return Ok(());
    }
    if matches.is_empty() {
        println!("No matching photos found.");
        return Ok(());
    }
    println!("Found you in {} photo(s):", matches.len());
    for m in matches {
        match m.score {
            Some(score) => println!("  {} ({score:.3})", m.id),
            None => println!("  {}", m.id),
        }
    }
    Ok(())
}

/// Image files directly inside `dir`, sorted by name. The file name is the photo id.
fn scan_dir(dir: &Path) -> Result<Vec<CandidatePhoto>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();

    Ok(paths
        .into_iter()
        .filter_map(|path| {
            let id = path.file_name()?.to_str()?.to_string();
            Some(CandidatePhoto::new(id, path.to_str()?.to_string()))
        })
        .collect())
}

/// Replace file locators with `data:` URLs holding the image bytes.
fn inline_images(candidates: Vec<CandidatePhoto>) -> Result<Vec<CandidatePhoto>> {
    candidates
        .into_iter()
        .map(|c| {
            let path = Path::new(&c.locator);
            let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            let locator = encode_data_url(media_type(path), &bytes);
            Ok(CandidatePhoto::new(c.id, locator))
        })
        .collect()
}

fn media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

fn redacted(config: &ProviderConfig) -> ProviderConfig {
    ProviderConfig {
        remote_key: config.remote_key.as_ref().map(|_| "********".to_string()),
        ..config.clone()
    }
}

async fn config_show(settings: &EngineSettings) -> Result<()> {
    let store = open_store(settings).await?;
    let config = ConfigResolver::new(Arc::new(store)).load().await;
    println!("{}", serde_json::to_string_pretty(&redacted(&config))?);
    println!("effective provider: {:?}", config.effective_provider());
    Ok(())
}

async fn config_set(settings: &EngineSettings, config: ProviderConfig) -> Result<()> {
    let store = Arc::new(open_store(settings).await?);
    store
        .save_setting(PROVIDER_CONFIG_KEY, &serde_json::to_value(&config)?)
        .await
        .context("saving provider configuration")?;

    let resolver = ConfigResolver::new(store);
    let saved = resolver.reload().await;
    tracing::info!(provider = ?saved.effective_provider(), "provider configuration saved");
    println!("{}", serde_json::to_string_pretty(&redacted(&saved))?);
    Ok(())
}

async fn status(settings: &EngineSettings) -> Result<()> {
    let assets = settings.model_assets();
    println!("database:        {}", settings.db_path.display());
    println!("model dir:       {}", assets.dir().display());
    println!(
        "models:          {}",
        if assets.is_present() { "present" } else { "missing" }
    );
    match settings.match_threshold {
        Some(threshold) => println!("match threshold: {threshold}"),
        None => println!("match threshold: model default"),
    }
    println!("local chunk:     {}", settings.local_chunk_size);
    println!("remote batch:    {}", settings.remote_batch_size);
    println!("remote timeout:  {} ms", settings.remote_timeout.as_millis());
    println!("secure context:  {}", settings.secure_context);

    match open_store(settings).await {
        Ok(store) => {
            let config = ConfigResolver::new(Arc::new(store)).load().await;
            println!("provider:        {:?}", config.effective_provider());
            if let Some(endpoint) = config.endpoint() {
                println!("endpoint:        {endpoint}");
            }
        }
        Err(e) => println!("provider:        unavailable ({e:#})"),
    }
    Ok(())
}

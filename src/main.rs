use anyhow::Result;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

mod cache;
mod error;
mod mock;
mod models;
mod refresh;
mod render;
mod settings;
mod sources;

use cache::CacheStore;
use models::WidgetData;
use refresh::{Origin, RefreshOutcome, Refresher, Snapshot};
use render::{OutputFormat, Panel, WidgetSize};
use settings::{Settings, SettingsStore};
use sources::HttpSource;

#[derive(Parser)]
#[command(name = "dtuwidget")]
#[command(about = "Show OpenDTU solar inverter output as a terminal or Waybar widget")]
struct Cli {
    /// Settings file (overridden by $DTUWIDGET_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Per-request timeout in milliseconds
    #[arg(long, global = true, default_value_t = 10_000)]
    timeout_ms: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the widget (shows recent cached data first, refreshes in background)
    Widget(RenderArgs),
    /// Force fetch, update cache and render
    Fetch(RenderArgs),
    /// Print settings and cache locations with the cached reading
    Status,
    /// Create the default settings file if it does not exist
    Init,
}

#[derive(Args)]
struct RenderArgs {
    #[arg(long, value_enum, default_value = "small")]
    size: WidgetSize,
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
    /// Use mock data instead of the DTU
    #[arg(long)]
    mock: bool,
    /// Disable ANSI colours in text output
    #[arg(long)]
    no_color: bool,
}

impl RenderArgs {
    fn color(&self) -> bool {
        !self.no_color && std::io::stdout().is_terminal()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is reserved for the widget output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = SettingsStore::locate(cli.config);
    let timeout = Duration::from_millis(cli.timeout_ms);

    match cli.command {
        Commands::Widget(args) => run_widget(&store, &args, timeout, false).await?,
        Commands::Fetch(args) => run_widget(&store, &args, timeout, true).await?,
        Commands::Status => status(&store)?,
        Commands::Init => init(&store)?,
    }

    Ok(())
}

async fn run_widget(
    store: &SettingsStore,
    args: &RenderArgs,
    timeout: Duration,
    force: bool,
) -> Result<()> {
    let settings = match store.load() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            emit(&Panel::settings_error(&e).render(args.format, args.color())?)?;
            return Ok(());
        }
    };
    if settings.is_placeholder() && !args.mock {
        warn!(
            "settings still contain placeholder values, edit {}",
            store.path().display()
        );
    }

    if args.mock {
        let data = mock::mock_data(settings.power_meter);
        let outcome = RefreshOutcome::Fresh(Snapshot {
            widget: WidgetData::from_cached(&data, &settings)?,
            as_of: Utc::now(),
            origin: Origin::Network,
            cache_write_failed: false,
        });
        return show(&outcome, &settings, args);
    }

    let settings = Arc::new(settings);
    let refresher = Refresher::new(
        Arc::new(HttpSource::new()),
        CacheStore::new(CacheStore::cache_path()),
        Arc::clone(&settings),
    )
    .with_timeout(timeout);

    if force {
        let outcome = refresher.refresh_now().await;
        return show(&outcome, &settings, args);
    }

    let refresh = refresher.refresh().await;
    show(&refresh.outcome, &settings, args)?;

    // Output is already written; only keep the runtime up for the cache write.
    if let Some(background) = refresh.background {
        background.settle().await;
    }
    Ok(())
}

fn show(outcome: &RefreshOutcome, settings: &Settings, args: &RenderArgs) -> Result<()> {
    let panel = Panel::from_outcome(outcome, settings, args.size, Utc::now());
    emit(&panel.render(args.format, args.color())?)
}

fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", output)?;
    stdout.flush()?;
    Ok(())
}

fn status(store: &SettingsStore) -> Result<()> {
    let settings = store.load()?;
    let cache = CacheStore::new(CacheStore::cache_path());
    let now = Utc::now();

    println!("Settings: {}", store.path().display());
    println!("Cache:    {}", cache.path().display());

    let Some(entry) = cache.load() else {
        println!("No cached data yet. Run `dtuwidget fetch`.");
        return Ok(());
    };
    println!("Cached:   {}", render::format_age(entry.timestamp, now));
    println!();

    let outcome = RefreshOutcome::Fresh(Snapshot {
        widget: WidgetData::from_cached(&entry.data, &settings)?,
        as_of: entry.timestamp,
        origin: Origin::Cache,
        cache_write_failed: false,
    });
    let panel = Panel::from_outcome(&outcome, &settings, WidgetSize::Medium, now);
    println!("{}", panel.to_text(std::io::stdout().is_terminal()));
    Ok(())
}

fn init(store: &SettingsStore) -> Result<()> {
    if store.path().exists() {
        println!("Settings already exist at {}", store.path().display());
    } else {
        store.create_default()?;
        println!("Created default settings at {}", store.path().display());
    }
    Ok(())
}

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hatom4sparkle::{
    build_client, render_appcast, render_text, AppcastOptions, Feed, FetchConfig,
};

#[derive(Parser)]
#[command(name = "hatom4sparkle")]
#[command(about = "Read a feed from a URL and print it as JSON, text or a Sparkle appcast")]
struct Cli {
    /// Page or feed URL to read
    url: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Leave out entries that have no download enclosure (appcast only)
    #[arg(long)]
    only_with_enclosures: bool,

    /// Channel description for appcast output
    #[arg(long)]
    description: Option<String>,

    /// Channel language for appcast output
    #[arg(long)]
    language: Option<String>,

    /// Request timeout in seconds (overrides HATOM_TIMEOUT_SECS)
    #[arg(long)]
    timeout: Option<u64>,

    /// Retries for transport and 5xx failures (overrides HATOM_MAX_RETRIES)
    #[arg(long)]
    retries: Option<usize>,

    /// User-Agent header (overrides HATOM_USER_AGENT)
    #[arg(long)]
    user_agent: Option<String>,

    /// Exit with an error when the URL does not hold a valid feed
    #[arg(long)]
    strict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
    Appcast,
}

/// Logs go to stderr; stdout carries the feed.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "hatom4sparkle=info".into()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn apply_overrides(mut config: FetchConfig, cli: &Cli) -> FetchConfig {
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(retries) = cli.retries {
        config.max_retries = retries;
    }
    if let Some(user_agent) = &cli.user_agent {
        config.user_agent = user_agent.clone();
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = apply_overrides(FetchConfig::from_env()?, &cli);
    tracing::debug!(?config, "using fetch configuration");
    let client = build_client(&config)?;

    let feed = Feed::from_url(&client, &config, &cli.url).await;
    if cli.strict && !feed.is_valid() {
        anyhow::bail!("{} does not hold a valid feed", cli.url);
    }

    let output = match cli.format {
        OutputFormat::Json => serde_json::to_string_pretty(&feed)?,
        OutputFormat::Text => render_text(&feed, 80)?,
        OutputFormat::Appcast => {
            let options = AppcastOptions {
                description: cli.description.clone(),
                language: cli.language.clone(),
                only_with_enclosures: cli.only_with_enclosures,
            };
            render_appcast(&feed, &options)?
        }
    };
    println!("{}", output.trim_end());

    Ok(())
}

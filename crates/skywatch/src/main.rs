//! Skywatch: headless weather dashboard
//!
//! Subcommands:
//! - `watch`: poll readings and log every dashboard change
//! - `login` / `logout` / `status`: manage the local backend session
//! - `weekly`: print the past week's daily statistics
//! - `predict`: print the hourly forecast for one of the next five days

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use skywatch_feed::{FeedConfig, GeoPoint, Metric, PollConfig, SourceResolver};
use skywatch_session::{
    FileStore, MemoryStore, Navigator, Route, RouteSignal, SessionManager, StorageTiers,
    build_http_client,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod account;
mod dashboard;

#[derive(Parser)]
#[command(name = "skywatch")]
#[command(about = "Headless weather dashboard", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Local backend base URL
    #[arg(long, global = true, env = "SKYWATCH_BACKEND_URL", default_value = skywatch_feed::DEFAULT_BACKEND_URL)]
    backend_url: String,

    /// Open-Meteo forecast endpoint
    #[arg(long, global = true, env = "SKYWATCH_PUBLIC_API_URL", default_value = skywatch_feed::DEFAULT_PUBLIC_API_URL)]
    public_api_url: String,

    /// Latitude of the observed location
    #[arg(long, global = true, env = "SKYWATCH_LATITUDE", default_value_t = GeoPoint::default().latitude, allow_negative_numbers = true)]
    latitude: f64,

    /// Longitude of the observed location
    #[arg(long, global = true, env = "SKYWATCH_LONGITUDE", default_value_t = GeoPoint::default().longitude, allow_negative_numbers = true)]
    longitude: f64,

    /// Metric to watch (temperature or humidity)
    #[arg(long, global = true, env = "SKYWATCH_METRIC", default_value = "temperature")]
    metric: Metric,

    /// Durable storage file (defaults to the platform config directory)
    #[arg(long, global = true, env = "SKYWATCH_STORAGE")]
    storage: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll readings and log dashboard updates until interrupted
    Watch {
        /// Refresh interval in seconds (5, 10, 30 or 60)
        #[arg(long, env = "SKYWATCH_INTERVAL", default_value_t = PollConfig::default().interval_secs())]
        interval: u64,

        /// Number of history points to keep
        #[arg(long, env = "SKYWATCH_WINDOW", default_value_t = PollConfig::default().window_size())]
        window: usize,

        /// Log in before polling; the password is read from
        /// SKYWATCH_PASSWORD or prompted for
        #[arg(long, env = "SKYWATCH_USERNAME")]
        username: Option<String>,

        /// Keep the session across restarts
        #[arg(long)]
        remember: bool,
    },

    /// Log in to the local backend
    Login {
        /// Username (defaults to the remembered user)
        #[arg(long, env = "SKYWATCH_USERNAME")]
        username: Option<String>,

        /// Keep the session across restarts
        #[arg(long)]
        remember: bool,
    },

    /// Forget the stored session
    Logout,

    /// Show session state
    Status,

    /// Print daily statistics for the past week as JSON
    Weekly,

    /// Print the hourly forecast for a coming day as JSON
    Predict {
        /// Days ahead, 1 being tomorrow
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=5))]
        day: u8,
    },
}

/// Shared wiring for every subcommand.
pub(crate) struct App {
    pub(crate) feed: FeedConfig,
    pub(crate) session: Arc<SessionManager>,
    pub(crate) routes: Arc<RouteSignal>,
    pub(crate) tiers: StorageTiers,
    http: reqwest::Client,
}

impl App {
    async fn new(global: GlobalArgs, poll: PollConfig) -> Result<Self> {
        let feed = FeedConfig {
            backend_url: global.backend_url,
            public_api_url: global.public_api_url,
            location: GeoPoint::new(global.latitude, global.longitude),
            metric: global.metric,
            poll,
            ..FeedConfig::default()
        };
        feed.validate().into_diagnostic()?;

        let durable = FileStore::open(global.storage).await.into_diagnostic()?;
        tracing::debug!(path = %durable.path().display(), "durable storage");
        let tiers = StorageTiers::new(Arc::new(durable), Arc::new(MemoryStore::new()));

        let http = build_http_client().into_diagnostic()?;
        let routes = Arc::new(RouteSignal::new(Route::Login));
        let session = Arc::new(SessionManager::new(
            http.clone(),
            feed.backend_url.clone(),
            tiers.clone(),
            routes.clone(),
        ));

        if session.is_authenticated().await {
            routes.navigate(Route::Dashboard);
        }

        Ok(Self {
            feed,
            session,
            routes,
            tiers,
            http,
        })
    }

    /// Backend first, then Open-Meteo; backend requests carry the session.
    pub(crate) fn resolver(&self) -> SourceResolver {
        self.feed.resolver(self.http.clone(), Some(Arc::clone(&self.session)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "skywatch=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            interval,
            window,
            username,
            remember,
        } => {
            let poll = PollConfig::new(interval, window).into_diagnostic()?;
            let app = App::new(cli.global, poll).await?;
            if let Some(username) = username {
                account::login(&app, Some(username), remember).await?;
            }
            dashboard::run(&app).await
        }

        Commands::Login { username, remember } => {
            let app = App::new(cli.global, PollConfig::default()).await?;
            account::login(&app, username, remember).await
        }

        Commands::Logout => {
            let app = App::new(cli.global, PollConfig::default()).await?;
            app.session.logout().await;
            println!("Logged out");
            Ok(())
        }

        Commands::Status => {
            let app = App::new(cli.global, PollConfig::default()).await?;
            account::status(&app).await
        }

        Commands::Weekly => {
            let app = App::new(cli.global, PollConfig::default()).await?;
            dashboard::weekly(&app).await
        }

        Commands::Predict { day } => {
            let app = App::new(cli.global, PollConfig::default()).await?;
            dashboard::predict(&app, day).await
        }
    }
}

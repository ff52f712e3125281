// # dnsmirror - zone browser
//
// Thin front end over `dnsmirror-core`. It reads configuration from the
// environment, logs in to the proxy, opens a session on one zone and prints
// the projected record table. Caching, verification and selection live in
// the core crate; nothing here talks to the proxy except through the session.
//
// ## Configuration
//
// - `DNSMIRROR_API_BASE`: Proxy base URL (default `http://localhost:3000`)
// - `DNSMIRROR_PASSWORD`: Proxy password (required)
// - `DNSMIRROR_ZONE`: Zone id or name (default: first zone)
// - `DNSMIRROR_QUERY`: Search text applied to name, type and content
// - `DNSMIRROR_SORT`: Sort column (`name`, `type`, `content`, `proxied`), prefix `-` for descending
// - `DNSMIRROR_PAGE_SIZE`: Rows per page (default 50)
// - `DNSMIRROR_PAGE`: Page to print (default 1)
// - `DNSMIRROR_TIMEOUT_SECS`: Request timeout (default 45)
// - `DNSMIRROR_WATCH_SECS`: Refresh and reprint every N seconds until interrupted
// - `DNSMIRROR_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export DNSMIRROR_PASSWORD=changeme
// export DNSMIRROR_ZONE=example.com
// export DNSMIRROR_SORT=-content
//
// dnsmirror
// ```

use anyhow::{Context, Result};
use dnsmirror_core::{
    Authenticator, Projection, RecordStore, Session, SessionConfig, SessionEvent, SortDirection, SortKey,
    StoreConfig,
};
use dnsmirror_http::HttpRecordStore;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
#[derive(Debug, Clone, Copy)]
enum CliExitCode {
    /// Listing printed (or watch interrupted)
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// The proxy rejected the password or the session
    AuthError = 2,
    /// Any other runtime failure
    RuntimeError = 3,
}

impl From<CliExitCode> for ExitCode {
    fn from(code: CliExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    store: StoreConfig,
    password: String,
    zone: Option<String>,
    query: Option<String>,
    sort: Option<(SortKey, SortDirection)>,
    page_size: Option<usize>,
    page: usize,
    watch: Option<Duration>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mut store = StoreConfig::default();
        if let Ok(base) = env::var("DNSMIRROR_API_BASE") {
            store.base_url = base;
        }
        if let Some(timeout) = parse_var::<u64>("DNSMIRROR_TIMEOUT_SECS")? {
            store.timeout_secs = timeout;
        }

        let sort = env::var("DNSMIRROR_SORT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_sort(&s))
            .transpose()?;

        Ok(Self {
            store,
            password: env::var("DNSMIRROR_PASSWORD").context("DNSMIRROR_PASSWORD is required")?,
            zone: env::var("DNSMIRROR_ZONE").ok().filter(|s| !s.trim().is_empty()),
            query: env::var("DNSMIRROR_QUERY").ok(),
            sort,
            page_size: parse_var("DNSMIRROR_PAGE_SIZE")?,
            page: parse_var("DNSMIRROR_PAGE")?.unwrap_or(1),
            watch: parse_var::<u64>("DNSMIRROR_WATCH_SECS")?.map(Duration::from_secs),
            log_level: env::var("DNSMIRROR_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    fn validate(&self) -> Result<()> {
        self.store.validate()?;

        if self.password.is_empty() {
            anyhow::bail!("DNSMIRROR_PASSWORD cannot be empty");
        }

        if self.page_size == Some(0) {
            anyhow::bail!("DNSMIRROR_PAGE_SIZE must be at least 1");
        }

        if let Some(watch) = self.watch
            && !(5..=3600).contains(&watch.as_secs())
        {
            anyhow::bail!(
                "DNSMIRROR_WATCH_SECS must be between 5 and 3600 seconds. Got: {}",
                watch.as_secs()
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => anyhow::bail!(
                "DNSMIRROR_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} '{}' is not valid: {}", name, raw, e)),
        _ => Ok(None),
    }
}

fn parse_sort(raw: &str) -> Result<(SortKey, SortDirection)> {
    let raw = raw.trim();
    let (column, direction) = match raw.strip_prefix('-') {
        Some(column) => (column, SortDirection::Descending),
        None => (raw, SortDirection::Ascending),
    };
    let key: SortKey = column.parse()?;
    Ok((key, direction))
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return CliExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return CliExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // logs go to stderr so the table on stdout stays clean
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return CliExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return CliExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run(config).await {
            Ok(()) => CliExitCode::Success,
            Err(e) => {
                error!("{:#}", e);
                let unauthorized = e
                    .downcast_ref::<dnsmirror_core::Error>()
                    .is_some_and(|e| e.is_unauthorized());
                if unauthorized {
                    CliExitCode::AuthError
                } else {
                    CliExitCode::RuntimeError
                }
            }
        }
    })
    .into()
}

async fn run(config: Config) -> Result<()> {
    let store = Arc::new(HttpRecordStore::from_config(&config.store)?);
    info!("Connecting to {}", config.store.base_url);
    store.login(&config.password).await?;

    let session_config = SessionConfig {
        default_page_size: config.page_size.unwrap_or(SessionConfig::default().default_page_size),
        ..SessionConfig::default()
    };
    let (session, events) = Session::new(store.clone() as Arc<dyn RecordStore>, session_config)?;
    let logger = tokio::spawn(log_events(events));

    let zones = session.load_zones().await?;
    let zone = match &config.zone {
        Some(key) => key.clone(),
        None => zones
            .first()
            .map(|z| z.id.clone())
            .context("The proxy reports no zones")?,
    };
    session.select_zone(&zone).await?;

    if let Some(query) = &config.query {
        session.set_query(query.as_str());
    }
    if let Some((key, direction)) = config.sort {
        session.set_sort(key, direction);
    }
    session.set_page(config.page);

    print_listing(&session);

    if let Some(interval) = config.watch {
        watch(&session, store.as_ref(), &config.password, interval).await?;
    }

    session.shutdown();
    drop(session);
    // the logger ends once every sender is gone
    if let Err(e) = logger.await {
        warn!("Event logger ended abnormally: {}", e);
    }
    Ok(())
}

/// Refresh on an interval until SIGINT or SIGTERM
async fn watch(session: &Session, authenticator: &dyn Authenticator, password: &str, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                info!("Received {}, stopping", signal?);
                return Ok(());
            }
            _ = ticker.tick() => {
                if session.auth_required() {
                    session.reauthenticate(authenticator, password).await?;
                }
                match session.refresh(true).await {
                    Ok(()) => print_listing(session),
                    Err(e) if e.is_unauthorized() => warn!("Session expired, logging in again on next tick"),
                    Err(e) => warn!("Refresh failed: {}", e),
                }
            }
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to set up SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await.context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}

async fn log_events(events: mpsc::Receiver<SessionEvent>) {
    let mut stream = ReceiverStream::new(events);
    while let Some(event) = stream.next().await {
        match event {
            SessionEvent::RecordsLoaded { zone_id, count, stale } => {
                debug!(%zone_id, count, stale, "Records loaded")
            }
            SessionEvent::StaleData { zone_id, reason } => warn!(%zone_id, "Showing cached data: {}", reason),
            SessionEvent::AuthenticationRequired => warn!("Proxy requires a new login"),
            SessionEvent::ZoneSwitched { zone_id } => info!(?zone_id, "Zone selected"),
            other => debug!(?other, "Session event"),
        }
    }
}

fn print_listing(session: &Session) {
    let view = session.view();
    let zone = session.active_zone().map(|z| z.name).unwrap_or_default();
    println!("{}", render_table(&zone, &view, |r| session.display_name(r)));

    for notice in session.notices() {
        eprintln!("[{:?}] {}", notice.level, notice.message);
    }
}

fn render_table(zone: &str, view: &Projection, display_name: impl Fn(&dnsmirror_core::Record) -> String) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}: {} of {} record(s), page {}/{}\n",
        zone, view.page.filtered_count, view.page.total_count, view.page.page_index, view.page.total_pages
    ));

    let types: Vec<String> = view.facets.by_type.iter().map(|(t, n)| format!("{} {}", t, n)).collect();
    out.push_str(&format!(
        "types: {} | proxied {} / dns-only {}\n",
        if types.is_empty() { "-".to_string() } else { types.join(", ") },
        view.facets.proxied,
        view.facets.unproxied
    ));

    out.push_str(&format!("{:<6} {:<32} {:<40} {:>6} {}\n", "TYPE", "NAME", "CONTENT", "TTL", "PROXY"));
    for record in &view.records {
        let ttl = if record.is_auto_ttl() { "auto".to_string() } else { record.ttl.to_string() };
        out.push_str(&format!(
            "{:<6} {:<32} {:<40} {:>6} {}\n",
            record.record_type,
            display_name(record),
            record.content,
            ttl,
            if record.proxied { "on" } else { "off" }
        ));
    }
    out
}

use std::process;
use std::sync::Arc;

use clap::Parser;
use gtfs::database::{Database, DatabaseError};
use gtfs::loader::{LoaderConfig, LoaderError};
use transit::engine::Transit;
use transit::fetch;
use web::config::read_config;
use web::{start_metrics_server, start_web_server, WebState};

/// Reports upcoming transit arrivals for a set of stops by merging a static
/// GTFS schedule with a GTFS-Realtime trip update feed.
#[derive(Parser, Debug)]
#[command(name = "gtfs-arrivals")]
struct Args {
    /// Configuration file (INI file).
    #[arg(long, default_value = "config.ini")]
    config: String,

    /// Endpoint environment: test or prod for NTA; metrobus, metrotrain or
    /// tram for VicRoads.
    #[arg(long, default_value = "test")]
    env: String,

    /// Port to run the webserver on.
    #[arg(long, default_value_t = 6824)]
    port: u16,

    /// Port to run the Prometheus webserver on.
    #[arg(long)]
    promport: Option<u16>,

    /// GTFS definitions directory.
    #[arg(long, default_value = "google_transit_combined")]
    gtfs: String,

    /// Max loader threads; defaults to the available parallelism.
    #[arg(long = "loader_max_threads")]
    loader_max_threads: Option<usize>,

    /// Number of rows per loader chunk.
    #[arg(long = "loader_max_rows_per_chunk", default_value_t = 100_000)]
    loader_max_rows_per_chunk: usize,

    /// One of nta (Ireland) or vicroads (Victoria, Australia).
    #[arg(long, default_value = "nta")]
    provider: String,

    /// Logging level (DEBUG, INFO, WARNING, ERROR).
    #[arg(long = "log_level", default_value = "INFO")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let Some(level) = parse_log_level(&args.log_level) else {
        eprintln!("Invalid --log_level: {}", args.log_level);
        process::exit(-1);
    };
    env_logger::Builder::new().filter_level(level).init();

    log::info!("Starting up gtfs-arrivals");

    // Prometheus gets its own server: if the main webserver locks up or
    // crashes, we retain metrics insight.
    if let Some(promport) = args.promport {
        log::info!("Starting Prometheus server on port {}", promport);
        tokio::spawn(async move {
            if let Err(why) = start_metrics_server(promport).await {
                log::error!("metrics server failed: {}", why);
            }
        });
    }

    let config = match read_config(&args.config) {
        Ok(config) => config,
        Err(why) => {
            log::error!("Could not read {:?}: {}", args.config, why);
            process::exit(-1);
        }
    };

    let mut loader_config = LoaderConfig::default();
    if let Some(threads) = args.loader_max_threads {
        loader_config.max_threads = threads;
    }
    loader_config.max_rows_per_chunk = args.loader_max_rows_per_chunk;
    log::info!(
        "Configured loader with {} threads, {} rows per chunk",
        loader_config.max_threads,
        loader_config.max_rows_per_chunk
    );

    log::info!("Loading GTFS data sources from {:?}", args.gtfs);
    if config.interesting_stops.is_empty() {
        log::info!("Loading data for all stops.");
    } else {
        log::info!(
            "Restricting data sources to {} interesting stops",
            config.interesting_stops.len()
        );
    }

    let database = match Database::load(&args.gtfs, &config.interesting_stops, &loader_config) {
        Ok(database) => Arc::new(database),
        Err(why) => {
            log::error!("{}", why);
            if is_missing_file(&why) {
                log::error!("Incomplete or missing GTFS database in {:?}.", args.gtfs);
                process::exit(-2);
            }
            process::exit(1);
        }
    };
    log::info!("Load complete.");

    let Some(fetcher) =
        fetch::make_fetcher(&args.provider, &args.env, config.api_key_primary.clone())
    else {
        process::exit(-1);
    };

    let transit = Arc::new(Transit::new(fetcher, database));
    let state = WebState {
        transit,
        interesting_stops: Arc::new(config.interesting_stops),
    };

    log::info!("Starting HTTP server on port {}", args.port);
    if let Err(why) = start_web_server(args.port, state).await {
        log::error!("web server failed: {}", why);
        process::exit(1);
    }
}

fn parse_log_level(value: &str) -> Option<log::LevelFilter> {
    match value.to_ascii_uppercase().as_str() {
        "DEBUG" => Some(log::LevelFilter::Debug),
        "INFO" => Some(log::LevelFilter::Info),
        "WARNING" | "WARN" => Some(log::LevelFilter::Warn),
        "ERROR" => Some(log::LevelFilter::Error),
        _ => None,
    }
}

fn is_missing_file(error: &DatabaseError) -> bool {
    matches!(
        error,
        DatabaseError::Loader(LoaderError::Io { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound
    )
}

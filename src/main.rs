//! Command-line front end for the CO2 map backend.
//!
//! Each subcommand runs one route handler and prints its JSON body on stdout.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use co2map::api::{Api, ApiResponse};
use co2map::{Env, ProcessEnv, Settings};

#[derive(Parser, Debug)]
#[command(name = "co2map")]
#[command(about = "CO2 concentration near Peruvian cities from CAMS forecasts", version)]
struct Args {
    /// Log level or filter directives (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for temporary forecast downloads
    #[arg(long, env = "CO2MAP_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Show a progress bar while downloading
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the predefined cities
    Cities,

    /// Coordinates of a city (predefined table, then geocoding)
    City { name: String },

    /// Search places by name
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// CO2 forecast for a predefined city
    Co2 {
        city: String,
        /// Forecast date, YYYY-MM-DD (default: a week ago)
        #[arg(long)]
        date: Option<String>,
        /// Lead times in hours (default: 0 12 24)
        #[arg(long, num_args = 1..)]
        hours: Vec<String>,
    },

    /// CO2 forecast for an arbitrary point
    Custom {
        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,
        /// Label for the point
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long, num_args = 1..)]
        hours: Vec<String>,
    },

    /// Current weather, forecast and air quality
    Weather {
        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,
    },

    /// Report which integrations are configured
    Health,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: Args) -> Result<ApiResponse> {
    let env: Arc<dyn Env> = Arc::new(ProcessEnv);
    let mut settings = Settings::from_env(env.as_ref());
    if let Some(dir) = args.work_dir {
        settings.work_dir = dir;
    }
    settings.progress = args.progress;
    debug!(work_dir = %settings.work_dir.display(), timeout = ?settings.provider_timeout, "settings loaded");

    let api = Api::from_settings(&settings, env).context("failed to initialise service")?;

    Ok(match args.command {
        Command::Cities => api.cities(),
        Command::City { name } => api.city_coordinates(&name),
        Command::Search { query, limit } => api.search_cities(&query, limit),
        Command::Co2 { city, date, hours } => api.co2_for_city(&city, date.as_deref(), &hours),
        Command::Custom {
            lat,
            lon,
            city,
            date,
            hours,
        } => api.co2_custom(lat, lon, city.as_deref(), date.as_deref(), &hours),
        Command::Weather { lat, lon } => api.weather(lat, lon),
        Command::Health => api.health(),
    })
}

fn main() -> ExitCode {
    // Existing environment variables win over .env entries.
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level);

    match run(args) {
        Ok(resp) => {
            match serde_json::to_string_pretty(&resp.body) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("error: failed to render response: {}", e);
                    return ExitCode::FAILURE;
                }
            }
            if resp.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

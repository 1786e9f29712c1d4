use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mealdrop_location::{
    load_config, validate_postal_code, Coordinate, GeocodingProvider, LocationError,
    NominatimGeocoder, ZoneSet,
};

#[derive(Parser)]
#[command(
    name = "mealdrop-location",
    about = "Resolve locations and check delivery eligibility",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search for locations by free text
    Search { query: String },
    /// Look up a six-digit postal code
    Postal { code: String },
    /// Reverse-geocode a coordinate
    Reverse { latitude: f64, longitude: f64 },
    /// Check delivery eligibility for a coordinate
    Check { latitude: f64, longitude: f64 },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<(), LocationError> {
    let cli = Cli::parse();
    let config = load_config().map_err(|e| LocationError::Config(e.to_string()))?;
    let zones = ZoneSet::new(config.zones.clone());
    let geocoder = NominatimGeocoder::new(&config.geocoder)?;

    match cli.command {
        Command::Search { query } => {
            let results = geocoder.search(&query).await?;
            if results.is_empty() {
                println!("No results for {:?}", query);
                return Ok(());
            }
            for suggestion in results {
                print_suggestion(&suggestion, &zones);
            }
        }
        Command::Postal { code } => {
            validate_postal_code(&code)?;
            let results = geocoder.search(&code).await?;
            if results.is_empty() {
                println!("No results for postal code {}", code);
                return Ok(());
            }
            for suggestion in results {
                print_suggestion(&suggestion, &zones);
            }
        }
        Command::Reverse {
            latitude,
            longitude,
        } => {
            let coordinate = Coordinate::new(latitude, longitude);
            match geocoder.reverse_geocode(coordinate).await? {
                Some(suggestion) => print_suggestion(&suggestion, &zones),
                None => println!("No address found at {}", coordinate.label()),
            }
        }
        Command::Check {
            latitude,
            longitude,
        } => {
            let coordinate = Coordinate::new(latitude, longitude);
            let result = zones.check(coordinate);
            if result.available {
                let zone = result.zone.map(|z| z.name).unwrap_or_default();
                println!("Deliverable: yes (zone {})", zone);
            } else {
                println!("Deliverable: no ({})", result.rejection_reason());
                process::exit(2);
            }
        }
    }
    Ok(())
}

fn print_suggestion(suggestion: &mealdrop_location::LocationSuggestion, zones: &ZoneSet) {
    let place = match &suggestion.subtitle {
        Some(subtitle) => format!("{} ({})", suggestion.title, subtitle),
        None => suggestion.title.clone(),
    };
    match suggestion.coordinate {
        Some(coordinate) => {
            let eligibility = zones.check(coordinate);
            let verdict = if eligibility.available {
                match &eligibility.zone {
                    Some(zone) => format!("deliverable, zone {}", zone.name),
                    None => "deliverable".to_string(),
                }
            } else {
                "outside delivery area".to_string()
            };
            println!("{} [{}] {}", place, coordinate.label(), verdict);
        }
        None => println!("{} [unresolved]", place),
    }
}

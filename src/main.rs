use anyhow::Result;
use bayscan::{
    ArrivalState, BayScanConfig, BayScanEvent, BayScanService, SimulatedTransportFactory,
    TemplateDescriber, TransportKind,
};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "bayscan")]
#[command(about = "RFID bay scanner service for bus arrival tracking")]
#[command(version)]
#[command(long_about = "Tracks bus arrivals at a terminal loading bay from a proximity tag \
scanner. Reads tag/rssi lines over a wired or wireless scanner link, runs the arrival state \
machine and reports bus status, scanner health and connection events on stdout.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "bayscan.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the service")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Run against a simulated scanner instead of real hardware
    #[arg(long, help = "Use a simulated scanner cycling through the configured registry")]
    simulate: bool,

    /// Scanner link to connect at startup (wired or wireless)
    #[arg(long, value_name = "KIND", help = "Connect this scanner link at startup: wired or wireless")]
    transport: Option<String>,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    info!("Starting bayscan v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // Load and validate configuration
    let config = match BayScanConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let startup_transport = match parse_transport(&args)? {
        Some(kind) => Some(kind),
        None if args.simulate => Some(TransportKind::Wired),
        None => None,
    };

    // Assemble the service
    let service = if args.simulate {
        info!("Simulated scanner mode");
        let tags: Vec<String> = config.registry.iter().map(|e| e.tag.clone()).collect();
        BayScanService::with_parts(
            config,
            Arc::new(SimulatedTransportFactory::new(tags)),
            Arc::new(TemplateDescriber),
        )
    } else {
        BayScanService::new(config)
    };

    let mut events = service.subscribe();
    service.start().await?;

    if let Some(kind) = startup_transport {
        if !service.connect(kind).await {
            warn!("Could not connect {} scanner at startup", kind);
        }
    }

    // Main loop: render events until interrupted.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => render_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event feed lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    service.shutdown().await;
    info!("bayscan exited");
    Ok(())
}

fn parse_transport(args: &Args) -> Result<Option<TransportKind>> {
    match args.transport.as_deref() {
        None => Ok(None),
        Some("wired") => Ok(Some(TransportKind::Wired)),
        Some("wireless") => Ok(Some(TransportKind::Wireless)),
        Some(other) => anyhow::bail!("Unknown transport '{}', expected wired or wireless", other),
    }
}

fn render_event(event: &BayScanEvent) {
    match event {
        BayScanEvent::BusUpdated {
            bus,
            previous_state,
        } => {
            if bus.state == ArrivalState::Arrived && *previous_state != ArrivalState::Arrived {
                info!("ARRIVAL: {} - {}", bus.route, bus.description);
            } else {
                info!("{}", event.description());
            }
        }
        BayScanEvent::HealthReport { snapshot } => {
            let last_read = snapshot
                .last_read_time_ms
                .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms as i64))
                .map(|dt| dt.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| "never".to_string());
            info!(
                "Health: {} | battery {}% | link {:?} | last read {}",
                snapshot.status, snapshot.battery_level, snapshot.link_quality, last_read
            );
            for fault in &snapshot.faults {
                warn!("Fault: {}", fault);
            }
        }
        _ => info!("{}", event.description()),
    }
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bayscan={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        None => fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Bayscan Configuration File");
    println!("# Default configuration with all available options");
    println!();
    let rendered = toml::to_string_pretty(&BayScanConfig::default())?;
    println!("{}", rendered);
    Ok(())
}

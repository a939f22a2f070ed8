mod cli;

use std::path::Path;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;
use vaultstream::config::{self, Config};
use vaultstream::transcode::{probe, HlsEncoder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing. Respect RUST_LOG env var; otherwise use defaults
    // based on the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vaultstream=trace,tower_http=debug".to_string()
        } else {
            "vaultstream=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&env_filter))
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(host, port, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vaultstream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::HashPassphrase { passphrase } => hash_passphrase(&passphrase),
        Commands::GenerateSecret => generate_secret(),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn serve(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags override the file.
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("starting vaultstream server");
    vaultstream::server::start_server(config).await?;
    Ok(())
}

async fn probe_file(
    file: &Path,
    json: bool,
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !file.exists() {
        return Err(format!("File does not exist: {}", file.display()).into());
    }

    let config = config::load_config_or_default(config_path)?;
    let encoder = HlsEncoder::from_config(&config.transcode)?;
    let info = probe::probe_source(encoder.ffprobe_path(), file).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "durationSecs": info.duration_secs,
                "width": info.width,
                "height": info.height,
                "codec": info.codec,
                "fps": info.fps,
                "bitrate": info.bitrate,
                "container": info.container,
            })
        );
    } else {
        println!("File: {}", file.display());
        println!("Container: {}", info.container);
        println!("Video: {} {}x{}", info.codec, info.width, info.height);
        let secs = info.duration_secs as u64;
        println!("Duration: {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
        if let Some(fps) = info.fps {
            println!("Frame rate: {fps:.3} fps");
        }
        if let Some(bitrate) = info.bitrate {
            println!("Bitrate: {} kb/s", bitrate / 1000);
        }
        let ladder = vaultstream::transcode::derive_ladder(info.height);
        let names: Vec<_> = ladder.iter().map(|r| r.name.as_str()).collect();
        println!("Ladder: {}", names.join(", "));
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config_or_default(config_path)?;

    println!("Checking external tools...\n");

    let mut all_ok = true;
    for (name, configured) in [
        ("ffmpeg", config.transcode.ffmpeg_path.clone()),
        ("ffprobe", config.transcode.ffprobe_path.clone()),
    ] {
        let found = match configured {
            Some(path) if path.exists() => Some(path),
            Some(_) | None => which::which(name).ok(),
        };
        match found {
            Some(path) => println!("[     OK] {} - {}", name, path.display()),
            None => {
                all_ok = false;
                println!("[MISSING] {name}");
            }
        }
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable transcoding.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let config = config::load_config(p)?;
            println!("Configuration is valid");
            print_summary(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            print_summary(&config);
        }
    }
    Ok(())
}

fn print_summary(config: &Config) {
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Storage backend: {:?}", config.storage.backend);
    println!("  Signed-URL TTL: {}s", config.signer.ttl_secs);
    println!("  Segment duration: {}s", config.transcode.segment_seconds);
    println!("  Max upload: {} MiB", config.upload.max_size_mib);
    println!(
        "  Signer secret: {}",
        if config.signer.secret.is_some() {
            "configured"
        } else if config.signer.dev_mode {
            "ephemeral (dev mode)"
        } else {
            "MISSING"
        }
    );
}

fn hash_passphrase(passphrase: &str) -> Result<(), Box<dyn std::error::Error>> {
    let hash = bcrypt::hash(passphrase, bcrypt::DEFAULT_COST)?;
    println!("{hash}");
    Ok(())
}

fn generate_secret() -> Result<(), Box<dyn std::error::Error>> {
    use rand::Rng;
    let mut buf = [0u8; 32];
    rand::thread_rng().fill(&mut buf);
    let hex_str: String = buf.iter().map(|b| format!("{b:02x}")).collect();
    println!("{hex_str}");
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use modelhost::{
    client::EndpointClient,
    config::{self, Config},
    deploy::{DeploymentStore, Deployer},
    model::BuiltinInitializer,
    server::{
        self, ServeOptions,
        types::{GenerateRequest, TextToImageRequest},
    },
};
use std::{io::Write, path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to $CONFIG_PATH, then ./config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy the configured apps, print their endpoints and serve them
    Serve {
        /// Only deploy these apps
        #[arg(long = "app")]
        apps: Vec<String>,
        /// Keep deployments marked ready after the server exits
        #[arg(long)]
        keep: bool,
    },
    /// Show recorded deployments
    Inspect {
        /// Only the newest deployment of this app
        #[arg(long)]
        app: Option<String>,
    },
    /// Mark a deployment as stopped
    Teardown {
        deployment_id: String,
    },
    /// Call an endpoint of a running app
    Invoke {
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        url: String,
        #[arg(long)]
        app: String,
        #[command(subcommand)]
        call: Call,
    },
}

#[derive(Subcommand, Debug)]
enum Call {
    Generate {
        prompt: String,
        #[arg(long)]
        max_new_tokens: Option<usize>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        seed: Option<u64>,
    },
    Stream {
        prompt: String,
        #[arg(long)]
        max_new_tokens: Option<usize>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        seed: Option<u64>,
    },
    Image {
        prompt: String,
        #[arg(long)]
        steps: Option<u32>,
        #[arg(long)]
        guidance_scale: Option<f32>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value = "output.png")]
        out: PathBuf,
    },
}

/// Validates that a log level string is valid
fn validate_log_level(level: &str) -> Result<()> {
    level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .map_err(|_| {
            anyhow::anyhow!(
                "Invalid log level: '{}'. Valid levels: error, warn, info, debug, trace",
                level
            )
        })?;
    Ok(())
}

async fn load_config(path: Option<&PathBuf>) -> modelhost::Result<Config> {
    match path {
        Some(path) => config::load_from(path).await,
        None => config::load().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (before logging setup)
    let config = match load_config(cli.config.as_ref()).await {
        Ok(config) => config,
        // Invoking a remote app needs nothing from the local configuration.
        Err(_) if matches!(cli.command, Command::Invoke { .. }) => Config::default(),
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Determine log level: environment variable overrides config
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.server.logs.level.clone());

    if let Err(e) = validate_log_level(&log_level) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
        .json()
        .init();

    info!("modelhost starting with log level: {}", log_level);

    match cli.command {
        Command::Serve { apps, keep } => {
            server::run(config, ServeOptions { apps, keep }).await?;
        }
        Command::Inspect { app } => {
            let deployer = registry(&config).await?;
            let records = deployer.inspect(app.as_deref()).await?;
            if records.is_empty() {
                println!("No deployments recorded");
            }
            for record in records {
                println!(
                    "{}  {:<10} {:<12} {}  {}",
                    record.id,
                    record.app_name,
                    record.state.as_str(),
                    record.created_at.to_rfc3339(),
                    record.base_url
                );
            }
        }
        Command::Teardown { deployment_id } => {
            let deployer = registry(&config).await?;
            let record = deployer.teardown(&deployment_id).await?;
            println!("Deployment {} of {} is {}", record.id, record.app_name, record.state);
        }
        Command::Invoke { url, app, call } => invoke(EndpointClient::new(url, app), call).await?,
    }

    Ok(())
}

async fn registry(config: &Config) -> Result<Deployer> {
    let db_path = std::env::var("DEPLOYMENTS_DB_PATH")
        .unwrap_or_else(|_| config.server.database_path.clone());
    let store = DeploymentStore::new(&db_path).await?;
    Ok(Deployer::new(
        Arc::new(store),
        Arc::new(BuiltinInitializer),
        String::new(),
    ))
}

async fn invoke(client: EndpointClient, call: Call) -> Result<()> {
    match call {
        Call::Generate {
            prompt,
            max_new_tokens,
            temperature,
            seed,
        } => {
            let request = GenerateRequest {
                max_new_tokens,
                temperature,
                seed,
                ..GenerateRequest::new(prompt)
            };
            println!("{}", client.generate(&request).await?);
        }
        Call::Stream {
            prompt,
            max_new_tokens,
            temperature,
            seed,
        } => {
            let request = GenerateRequest {
                max_new_tokens,
                temperature,
                seed,
                ..GenerateRequest::new(prompt)
            };
            let mut stream = Box::pin(client.generate_stream(&request).await?);
            let mut stdout = std::io::stdout();
            while let Some(chunk) = stream.next().await {
                write!(stdout, "{}", chunk?)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
        Call::Image {
            prompt,
            steps,
            guidance_scale,
            seed,
            out,
        } => {
            let request = TextToImageRequest {
                num_inference_steps: steps,
                guidance_scale,
                seed,
                ..TextToImageRequest::new(prompt)
            };
            let png = client.text_to_image(&request).await?;
            tokio::fs::write(&out, &png)
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            println!("Wrote {} bytes to {}", png.len(), out.display());
        }
    }
    Ok(())
}

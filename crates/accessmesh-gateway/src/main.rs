//! AccessMesh gateway entry point.

use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::{error, info};

use accessmesh_config::{AccessMeshConfig, ConfigLoader, ENV_PREFIX};
use accessmesh_core::SystemClock;
use accessmesh_gateway::{issue_token, App, ShutdownSignal, VERSION};

enum Command {
    Serve,
    IssueToken { role: String },
}

/// Command-line arguments.
struct Args {
    command: Command,
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut args = std::env::args().skip(1).peekable();
        let mut config = None;
        let mut role = None;

        let issue = match args.peek().map(String::as_str) {
            Some("issue-token") => {
                args.next();
                true
            }
            Some("serve") => {
                args.next();
                false
            }
            _ => false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = Some(PathBuf::from(
                        args.next().context("--config requires a path")?,
                    ));
                }
                "--role" | "-r" if issue => {
                    role = Some(args.next().context("--role requires a value")?);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("accessmesh {VERSION}");
                    std::process::exit(0);
                }
                other => bail!("unknown argument: {other}, use --help for usage information"),
            }
        }

        let command = if issue {
            Command::IssueToken {
                role: role.context("issue-token requires --role")?,
            }
        } else {
            Command::Serve
        };

        Ok(Self { command, config })
    }
}

fn print_help() {
    println!(
        r"AccessMesh - HTTP access-control gateway

USAGE:
    accessmesh [serve] [OPTIONS]
    accessmesh issue-token --role <ROLE> [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -r, --role <ROLE>      Role to embed in the issued token
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    ACCESSMESH__AUTH__SECRET                     Token signing secret (required)
    ACCESSMESH__SERVER__HTTP_ADDR                Listen address (default: 0.0.0.0:8080)
    ACCESSMESH__UPSTREAM__URL                    Upstream service URL (forward-auth if unset)
    ACCESSMESH__AUTHORIZATION__POLICY_FILE       Path to the JSON policy file
    ACCESSMESH__RATE_LIMIT__CAPACITY             Bucket capacity (default: 100)
    ACCESSMESH__RATE_LIMIT__REFILL_PER_SECOND    Refill rate (default: 10)
    ACCESSMESH__TELEMETRY__METRICS__ADDR         Prometheus listen address
    RUST_LOG                                     Log filter, overrides the configured level

A .env file in the working directory is read before the environment.

EXAMPLES:
    accessmesh --config /etc/accessmesh/gateway.toml
    ACCESSMESH__AUTH__SECRET=s3cret accessmesh issue-token --role manager
"
    );
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AccessMeshConfig> {
    let mut loader = ConfigLoader::new().with_production();
    if let Some(path) = path {
        loader = loader
            .with_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
    }
    let config = loader
        .with_dotenv()?
        .with_env_prefix(ENV_PREFIX)
        .load()
        .context("invalid configuration")?;
    Ok(config)
}

async fn serve(config: AccessMeshConfig) -> anyhow::Result<()> {
    let telemetry = accessmesh_telemetry::TelemetryConfig::from(&config.telemetry);
    accessmesh_telemetry::init(&telemetry).context("failed to initialize telemetry")?;

    info!(version = VERSION, addr = %config.server.http_addr, "starting AccessMesh gateway");

    let app = App::from_config(&config).await?;
    app.run(ShutdownSignal::with_os_signals()).await?;
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse()?;
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Serve => serve(config).await,
        Command::IssueToken { role } => {
            let token = issue_token(&config, &role, &SystemClock)?;
            println!("{token}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

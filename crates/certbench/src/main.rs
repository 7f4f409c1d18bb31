use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use certbench_fetch::{FetchOptions, RemoteFetcher, SslOptions};
use certbench_fixtures::{FixtureLayout, FixtureSet};
use certbench_supervisor::{
    HarnessSettings, ResolvedSettings, Scenario, TlsServerSupervisor, DEFAULT_SETTINGS_FILE,
};

/// TLS trust scenarios - serve certificate fixtures and fetch from them
#[derive(Parser, Debug)]
#[command(name = "certbench")]
#[command(about = "Run TLS certificate trust scenarios against an HTTPS client")]
struct Cli {
    /// Path to settings file
    #[arg(short, long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the certificate fixture tree
    Fixtures {
        /// Output directory (defaults to the configured fixtures directory)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Regenerate even if a complete tree exists
        #[arg(long)]
        force: bool,
    },

    /// Start an `openssl s_server` for a scenario and keep it running
    Serve {
        /// Scenario name (e.g. self-signed-localhost, signed-localhost-chain, nip-io)
        #[arg(long)]
        scenario: Scenario,

        /// Port to listen on (random in 61001-65535 if omitted)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host name used in the printed URL
        #[arg(long)]
        host: Option<String>,

        /// Serve files from this directory instead of the status page
        #[arg(long)]
        responses: Option<PathBuf>,

        /// Fixtures directory
        #[arg(long)]
        fixtures: Option<PathBuf>,

        /// Cipher list (colon separated)
        #[arg(long)]
        ciphers: Option<String>,
    },

    /// GET a URL with the given certificate trust options
    Fetch {
        url: String,

        /// Skip peer verification
        #[arg(short = 'k', long)]
        insecure: bool,

        /// Accept a self-signed peer certificate matching the host
        #[arg(long)]
        allow_self_signed: bool,

        /// CA bundle file
        #[arg(long)]
        cafile: Option<PathBuf>,

        /// Directory of CA certificates
        #[arg(long)]
        capath: Option<PathBuf>,

        /// Name to verify instead of the URL host
        #[arg(long)]
        peer_name: Option<String>,

        /// Fixed address for a host, as HOST:IP (repeatable)
        #[arg(long, value_parser = parse_resolve)]
        resolve: Vec<(String, SocketAddr)>,
    },
}

fn parse_resolve(value: &str) -> Result<(String, SocketAddr), String> {
    let (host, ip) = value
        .split_once(':')
        .ok_or_else(|| format!("expected HOST:IP, got '{}'", value))?;
    if host.is_empty() {
        return Err(format!("missing host in '{}'", value));
    }
    let ip: IpAddr = ip
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|e| format!("invalid address in '{}': {}", value, e))?;
    Ok((host.to_string(), SocketAddr::new(ip, 0)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("certbench=info".parse()?)
                .add_directive("certbench_supervisor=info".parse()?)
                .add_directive("certbench_fixtures=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let settings = HarnessSettings::load_and_resolve(&cli.settings)
        .with_context(|| format!("Failed to load settings from {}", cli.settings.display()))?;

    match cli.command {
        Command::Fixtures { out, force } => {
            let out = out.unwrap_or_else(|| settings.fixtures_dir.clone());
            generate_fixtures(out, force)
        }
        Command::Serve {
            scenario,
            port,
            host,
            responses,
            fixtures,
            ciphers,
        } => {
            let fixtures = fixtures.unwrap_or_else(|| settings.fixtures_dir.clone());
            serve(
                &settings,
                ServeArgs {
                    scenario,
                    port,
                    host,
                    responses,
                    fixtures,
                    ciphers,
                },
            )
            .await
        }
        Command::Fetch {
            url,
            insecure,
            allow_self_signed,
            cafile,
            capath,
            peer_name,
            resolve,
        } => {
            let options = FetchOptions {
                ssl: SslOptions {
                    verify_peer: !insecure,
                    allow_self_signed,
                    cafile,
                    capath,
                    peer_name,
                },
                resolve,
                ..FetchOptions::default()
            };
            fetch(&url, options).await
        }
    }
}

fn generate_fixtures(out: PathBuf, force: bool) -> Result<()> {
    let layout = FixtureLayout::new(&out);
    if layout.is_complete() && !force {
        tracing::info!(
            "Fixtures already present in {} (use --force to regenerate)",
            out.display()
        );
        return Ok(());
    }

    let layout = FixtureSet::generate()
        .context("Failed to generate certificates")?
        .write_to(&out)
        .with_context(|| format!("Failed to write fixtures to {}", out.display()))?;
    println!("{}", layout.root().display());
    Ok(())
}

struct ServeArgs {
    scenario: Scenario,
    port: Option<u16>,
    host: Option<String>,
    responses: Option<PathBuf>,
    fixtures: PathBuf,
    ciphers: Option<String>,
}

async fn serve(settings: &ResolvedSettings, args: ServeArgs) -> Result<()> {
    let layout = certbench_fixtures::ensure(&args.fixtures)
        .with_context(|| format!("Failed to prepare fixtures in {}", args.fixtures.display()))?;

    let mut builder = settings.apply(args.scenario.builder(&layout));
    if let Some(port) = args.port {
        builder = builder.port(port);
    }
    if let Some(host) = args.host {
        builder = builder.host(host);
    }
    if let Some(ciphers) = args.ciphers {
        builder = builder.ciphers(ciphers);
    }
    if let Some(responses) = args.responses {
        builder = builder.responses(responses)?;
    }

    let config = builder.build();
    tracing::info!("Scenario: {}", args.scenario);
    tracing::info!("Certificate: {}", config.certificate_path().display());

    let mut server = TlsServerSupervisor::new(config);
    let url = server
        .start()
        .with_context(|| format!("Failed to start server for scenario {}", args.scenario))?;
    println!("{}", url);

    shutdown_signal().await;

    server.stop();
    tracing::info!("Server stopped");
    Ok(())
}

async fn fetch(url: &str, options: FetchOptions) -> Result<()> {
    let fetcher = RemoteFetcher::new(options).context("Failed to build HTTPS client")?;
    let response = fetcher
        .get(url)
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    println!("{}", response.status);
    print!("{}", response.text());
    if !response.status.is_success() {
        bail!("Server answered {}", response.status);
    }
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolve() {
        let (host, addr) = parse_resolve("www.127.0.0.1.nip.io:127.0.0.1").unwrap();
        assert_eq!(host, "www.127.0.0.1.nip.io");
        assert_eq!(addr.ip(), "127.0.0.1".parse::<IpAddr>().unwrap());

        let (host, addr) = parse_resolve("localhost:::1").unwrap();
        assert_eq!(host, "localhost");
        assert!(addr.is_ipv6());

        assert!(parse_resolve("localhost").is_err());
        assert!(parse_resolve(":127.0.0.1").is_err());
        assert!(parse_resolve("localhost:nowhere").is_err());
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from([
            "certbench",
            "serve",
            "--scenario",
            "signed-localhost-chain",
            "--port",
            "62000",
        ])
        .unwrap();
        match cli.command {
            Command::Serve { scenario, port, .. } => {
                assert_eq!(scenario, Scenario::SignedLocalhostChain);
                assert_eq!(port, Some(62000));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_scenario_rejected() {
        let result = Cli::try_parse_from(["certbench", "serve", "--scenario", "nope"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "certbench",
            "fetch",
            "https://localhost:61001",
            "--allow-self-signed",
            "--resolve",
            "localhost:127.0.0.1",
        ])
        .unwrap();
        match cli.command {
            Command::Fetch {
                url,
                insecure,
                allow_self_signed,
                resolve,
                ..
            } => {
                assert_eq!(url, "https://localhost:61001");
                assert!(!insecure);
                assert!(allow_self_signed);
                assert_eq!(resolve.len(), 1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}

//! ic -- inventory CLI, authentication commands.
//!
//! Entry point wiring configuration, logging and the OIDC authenticator:
//!   - `login`       interactive login (cached / refreshed when possible)
//!   - `logout`      end the provider session and forget the cached tokens
//!   - `api-token`   print a valid access token without prompting
//!   - `token-info`  show the claims of the cached ID token

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use ic::auth::oidc::build_http_client;
use ic::auth::{Authenticator, DiscoveryConnector, IdClaims, LoginParams};
use ic::config::Config;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Login,
    Logout,
    ApiToken,
    TokenInfo,
}

struct CliArgs {
    command: Command,
    config_path: Option<PathBuf>,
    force_refresh: bool,
    skip_open_browser: bool,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut command = None;
    let mut config_path = None;
    let mut force_refresh = false;
    let mut skip_open_browser = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--force-refresh" => force_refresh = true,
            "--skip-open-browser" => skip_open_browser = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("ic {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "login" if command.is_none() => command = Some(Command::Login),
            "logout" if command.is_none() => command = Some(Command::Logout),
            "api-token" if command.is_none() => command = Some(Command::ApiToken),
            "token-info" if command.is_none() => command = Some(Command::TokenInfo),
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    let Some(command) = command else {
        print_usage();
        std::process::exit(1);
    };

    CliArgs {
        command,
        config_path,
        force_refresh,
        skip_open_browser,
    }
}

fn print_usage() {
    eprintln!(
        "\
ic {version} -- inventory CLI

USAGE:
    ic [OPTIONS] <COMMAND>

COMMANDS:
    login                  Log in to the identity provider
    logout                 Log out and remove the cached tokens
    api-token              Print a valid access token (never prompts)
    token-info             Print the claims of the cached ID token

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: <config dir>/ic/config.toml]
        --force-refresh    Refresh the cached token even if it has not expired
        --skip-open-browser
                           Print the login URL instead of opening a browser
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    IC_CONFIG              Alternative to --config flag
    IC_OIDC_ISSUER_URL, IC_OIDC_CLIENT_ID, IC_GRANT_TYPE, IC_CACHE_DIR, ...
                           Override the corresponding configuration settings
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building Tokio runtime")?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = parse_args();

    let config_path = cli.config_path.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    if cli.skip_open_browser {
        config.grant.skip_open_browser = true;
    }

    init_tracing(&config);
    tracing::debug!(path = %config_path.display(), "Configuration loaded");

    let provider = config.provider_config()?;
    let http = build_http_client()?;
    let authenticator = Authenticator::new(
        provider,
        config.token_cache(),
        Arc::new(DiscoveryConnector::new(http)),
    );

    match cli.command {
        Command::Login => {
            let outcome = authenticator
                .login(LoginParams {
                    grant: config.grant_selection(),
                    silent: false,
                    force_refresh: cli.force_refresh,
                })
                .await
                .context("logging in")?;

            if outcome.using_cached_token {
                eprintln!("Already logged in as {}.", outcome.claims.subject);
            } else {
                eprintln!("Logged in as {}.", outcome.claims.subject);
            }
            eprintln!("Token expires at {}.", outcome.claims.expiry);
        }
        Command::Logout => {
            authenticator.logout().await.context("logging out")?;
            eprintln!("Logged out.");
        }
        Command::ApiToken => {
            let outcome = authenticator
                .login(LoginParams {
                    grant: config.grant_selection(),
                    silent: true,
                    force_refresh: cli.force_refresh,
                })
                .await
                .context("logging in")?;
            println!("{}", outcome.tokens.access_token);
        }
        Command::TokenInfo => {
            let tokens = authenticator
                .cached_tokens()
                .context("reading cached token")?;
            let claims = IdClaims::decode(&tokens.id_token).context("decoding cached ID token")?;
            println!("{}", claims.pretty());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber. Logs go to stderr; stdout carries command output.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("ic={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

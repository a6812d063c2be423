use std::io::IsTerminal;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use shopcli_core::auth::{AuthError, AuthFlow, AuthManager, AuthRequest, FileSecretStore, Host};
use shopcli_core::config::AuthConfig;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "SHOPCLI_LOG";

#[derive(Parser, Debug)]
#[command(author, version, about = "Shopify developer CLI session management")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authentication related commands
    #[command(subcommand)]
    Auth(AuthCommand),
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Log in and cache tokens for the partners and storefront APIs
    Login(LoginArgs),
    /// Remove every cached credential
    Logout,
    /// Print access tokens for the requested APIs as JSON
    Token(TokenArgs),
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Interactive flow to use (browser or device)
    #[arg(long)]
    flow: Option<AuthFlow>,
    /// Also obtain an admin token for this store
    #[arg(long)]
    store: Option<String>,
}

#[derive(Args, Debug)]
struct TokenArgs {
    /// Store whose admin API token is needed
    #[arg(long = "admin", value_name = "STORE")]
    admin: Option<String>,
    /// Include a partners API token
    #[arg(long)]
    partners: bool,
    /// Include a storefront renderer token
    #[arg(long)]
    storefront: bool,
    /// Extra scopes added to every requested API
    #[arg(long = "scope")]
    scopes: Vec<String>,
    /// Refresh tokens even when the cached ones are still valid
    #[arg(long)]
    refresh: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<AuthError>() {
            Some(auth) if auth.is_cancellation() => ExitCode::SUCCESS,
            Some(auth) => {
                eprintln!("error: {auth}");
                if let Some(remedy) = auth.remedy() {
                    eprintln!("{remedy}");
                }
                ExitCode::FAILURE
            }
            None => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    tracing::debug!(?cli, "parsed arguments");
    match cli.command {
        Commands::Auth(cmd) => match cmd {
            AuthCommand::Login(args) => auth_login(args).await,
            AuthCommand::Logout => auth_logout(),
            AuthCommand::Token(args) => auth_token(args).await,
        },
    }
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn manager(config: AuthConfig) -> Result<AuthManager<FileSecretStore>> {
    let secrets =
        FileSecretStore::with_default_locator().context("failed to open credential storage")?;
    Ok(AuthManager::new(secrets, config, Host::system())?)
}

fn load_config() -> Result<AuthConfig> {
    AuthConfig::from_env().context("failed to read configuration from the environment")
}

async fn auth_login(args: LoginArgs) -> Result<()> {
    let mut config = load_config()?;
    if let Some(flow) = args.flow {
        config = config.with_flow(flow);
    }

    let mut request = AuthRequest::new()
        .with_partners(Vec::<String>::new())
        .with_storefront_renderer(Vec::<String>::new());
    if let Some(store) = args.store {
        request = request.with_admin(store, Vec::<String>::new());
    }

    let session = manager(config)?.ensure_authenticated(request, false).await?;
    if let Some(admin) = &session.admin {
        println!("Session ready, with admin access for {}.", admin.store_fqdn);
    } else {
        println!("Session ready.");
    }
    Ok(())
}

fn auth_logout() -> Result<()> {
    manager(load_config()?)?.logout()?;
    println!("Logged out.");
    Ok(())
}

async fn auth_token(args: TokenArgs) -> Result<()> {
    let mut request = AuthRequest::new();
    if let Some(store) = args.admin {
        request = request.with_admin(store, args.scopes.clone());
    }
    if args.partners {
        request = request.with_partners(args.scopes.clone());
    }
    if args.storefront {
        request = request.with_storefront_renderer(args.scopes.clone());
    }
    if request.is_empty() {
        request = request.with_partners(args.scopes);
    }

    let session = manager(load_config()?)?
        .ensure_authenticated(request, args.refresh)
        .await?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fbsession::browser::chromium::ChromiumLauncher;
use fbsession::config::default_config_path;
use fbsession::{AuthResult, Authenticator, Config, CookieInput, CookiesFile, LoginRequest};
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "fbsession")]
#[command(about = "Log into mobile Facebook and keep the session cookies")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging for this crate
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Show the browser window
    #[arg(long, global = true)]
    headed: bool,

    /// Include the session as a `Cookie:` header in the output
    #[arg(long, global = true)]
    print_header: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in, reusing stored cookies when they still work
    Login(LoginArgs),
    /// Check whether stored or supplied cookies are still signed in
    Check(CookieArgs),
    /// Show current configuration
    Config,
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long, env = "FB_EMAIL")]
    email: String,

    #[arg(long, env = "FB_PASSWORD", hide_env_values = true)]
    password: String,

    /// Base32 authenticator secret for two-factor codes
    #[arg(long = "2fa-secret", env = "FB_2FA_SECRET", hide_env_values = true)]
    two_fa_secret: Option<String>,

    #[command(flatten)]
    cookies: CookieArgs,
}

#[derive(Args)]
struct CookieArgs {
    /// Cookie snapshot to read and update (defaults to the configured path)
    #[arg(long, conflicts_with = "no_cookies_file")]
    cookies_file: Option<PathBuf>,

    /// Never read or write a cookie snapshot
    #[arg(long)]
    no_cookies_file: bool,

    /// Cookies to try, as a `Cookie:` header value
    #[arg(long)]
    cookie_header: Option<String>,
}

impl CookieArgs {
    fn cookies_file(&self) -> CookiesFile {
        match (&self.cookies_file, self.no_cookies_file) {
            (_, true) => CookiesFile::Disabled,
            (Some(path), false) => CookiesFile::Path(path.clone()),
            (None, false) => CookiesFile::Default,
        }
    }

    fn supplied(&self) -> Option<CookieInput> {
        self.cookie_header.clone().map(CookieInput::Header)
    }
}

fn init_tracing(debug: bool, json: bool) {
    let default = if debug {
        "info,fbsession=debug,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off"
    } else {
        "info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}

fn print_result(result: &AuthResult, with_header: bool) -> Result<()> {
    let mut output = json!({
        "success": result.authenticated,
        "userID": result.user_id,
        "profileName": result.profile_name,
    });
    if with_header {
        output["cookieHeader"] = json!(result.cookie_header());
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.json_logs);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load_or_default(&config_path)?;
    config.apply_env();
    let print_header = cli.print_header;
    if cli.headed {
        config.browser.headless = false;
    }

    match cli.command {
        Command::Config => {
            println!("Config file: {}", config_path.display());
            print!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);
        }
        Command::Check(args) => {
            let auth = Authenticator::new(config, Arc::new(ChromiumLauncher));
            let supplied = args.supplied();
            let result = auth
                .check_cookies(&args.cookies_file(), supplied.as_ref())
                .await?;
            print_result(&result, print_header)?;
        }
        Command::Login(args) => {
            let mut request = LoginRequest::new(args.email, args.password)
                .with_cookies_file(args.cookies.cookies_file());
            if let Some(secret) = args.two_fa_secret.filter(|s| !s.trim().is_empty()) {
                request = request.with_two_fa_secret(secret);
            }
            if let Some(supplied) = args.cookies.supplied() {
                request = request.with_existing_cookies(supplied);
            }

            let auth = Authenticator::new(config, Arc::new(ChromiumLauncher));
            let result = auth.login(&request).await?;
            print_result(&result, print_header)?;
        }
    }

    Ok(())
}

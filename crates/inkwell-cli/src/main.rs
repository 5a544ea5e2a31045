//! inkwell command line client.
//!
//! Signs in to an inkwell notes server, keeps the session alive between runs
//! and issues authenticated requests. Set `RUST_LOG=debug` to watch token
//! renewal happen.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use inkwell_core::{
    AuthError, Config, LoginParams, ProfileUpdate, RegisterParams, RequestSpec, SessionManager,
    TerminationHook, TerminationReason, TokenStoreKind,
};

/// Environment variable naming a directory for daily-rotated log files
const LOG_DIR_ENV: &str = "INKWELL_LOG_DIR";

/// Environment variable the password can be read from instead of prompting
const PASSWORD_ENV: &str = "INKWELL_PASSWORD";

/// inkwell notes client
#[derive(Parser, Debug)]
#[command(name = "inkwell", version)]
#[command(about = "Sign in to an inkwell server and stay signed in", long_about = None)]
struct Args {
    /// API base URL (overrides INKWELL_API_URL and the config file)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Where tokens are kept between runs
    #[arg(long, global = true, value_enum)]
    store: Option<StoreArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: Option<String>,
        #[arg(long, env = PASSWORD_ENV, hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account and sign in
    Register {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        username: String,
    },
    /// Sign out and forget stored tokens
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Show session state as JSON
    Status,
    /// GET one or more API paths concurrently and print the JSON responses.
    /// A path may carry a query, e.g. `notes?page=2`
    Get {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Update username or bio
    Profile {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        bio: Option<String>,
    },
    /// Change the account password
    ChangePassword,
    /// Download everything stored for the account as JSON
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Permanently delete the account
    DeleteAccount {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreArg {
    File,
    Keyring,
    Memory,
}

impl From<StoreArg> for TokenStoreKind {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::File => TokenStoreKind::File,
            StoreArg::Keyring => TokenStoreKind::Keyring,
            StoreArg::Memory => TokenStoreKind::Memory,
        }
    }
}

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit or buffered file logs are lost.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match std::env::var(LOG_DIR_ENV).ok().filter(|dir| !dir.is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inkwell.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let _log_guard = init_tracing();
    info!("inkwell starting");

    let mut config = Config::load().context("Failed to load config")?;
    if let Some(store) = args.store {
        config.token_store = store.into();
    }

    let hook: TerminationHook = Arc::new(|reason: TerminationReason| {
        if reason == TerminationReason::Expired {
            eprintln!("Your session has expired. Run `inkwell login` to sign in again.");
        }
    });

    let store = config.credential_store()?;
    let manager = match args.api_url.as_deref() {
        Some(url) => SessionManager::new(url, config.request_timeout(), store, Some(hook))?,
        None => SessionManager::from_config(&config, store, Some(hook))?,
    };
    debug!(base_url = manager.client().base_url(), "Client ready");

    manager.initialize().await;

    let result = run(&manager, &mut config, args.command).await;
    info!("inkwell exiting");
    result
}

async fn run(manager: &SessionManager, config: &mut Config, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = match password {
                Some(password) => password,
                None => rpassword::prompt_password("Password: ")?,
            };

            let snapshot = manager
                .login(&LoginParams::new(email.clone(), password))
                .await
                .map_err(report_auth_error)?;

            config.last_email = Some(email);
            config.save().context("Failed to save config")?;
            if let Some(user) = snapshot.user {
                println!("Signed in as {}", user.display_name());
            }
        }

        Command::Register { email, username } => {
            let password = rpassword::prompt_password("Password: ")?;
            let password_confirm = rpassword::prompt_password("Confirm password: ")?;
            let params = RegisterParams {
                email: email.clone(),
                username,
                password,
                password_confirm,
            };

            let snapshot = manager.register(&params).await.map_err(report_auth_error)?;

            config.last_email = Some(email);
            config.save().context("Failed to save config")?;
            if let Some(user) = snapshot.user {
                println!("Welcome, {}", user.display_name());
            }
        }

        Command::Logout => {
            manager.logout().await;
            println!("Signed out");
        }

        Command::Whoami => {
            require_session(manager)?;
            let user = manager.fetch_profile().await?;
            println!("{} <{}>", user.display_name(), user.email);
        }

        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&manager.snapshot())?);
        }

        Command::Get { paths } => {
            require_session(manager)?;
            let client = manager.client();
            let requests = paths.iter().map(|path| async move {
                let result = client
                    .send_json::<serde_json::Value>(resource_request(path))
                    .await;
                (path, result)
            });

            // Concurrent requests share a single token refresh if the access token expired
            let mut failed = false;
            let mut signed_out = false;
            for (path, result) in futures::future::join_all(requests).await {
                match result {
                    Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                    Err(e) => {
                        eprintln!("{}: {}", path, e);
                        signed_out |= e.is_auth_failure();
                        failed = true;
                    }
                }
            }
            if signed_out {
                bail!("Not signed in. Run `inkwell login` to sign in again.");
            }
            if failed {
                bail!("One or more requests failed");
            }
        }

        Command::Profile { username, bio } => {
            require_session(manager)?;
            let user = manager.update_profile(&ProfileUpdate { username, bio }).await?;
            println!("Updated profile for {}", user.display_name());
        }

        Command::ChangePassword => {
            require_session(manager)?;
            let old_password = rpassword::prompt_password("Current password: ")?;
            let new_password = rpassword::prompt_password("New password: ")?;
            let confirm = rpassword::prompt_password("Confirm new password: ")?;
            if new_password != confirm {
                bail!("Passwords do not match");
            }
            manager.change_password(&old_password, &new_password).await?;
            println!("Password changed");
        }

        Command::Export { output } => {
            require_session(manager)?;
            let data = manager.export_data().await?;
            let text = serde_json::to_string_pretty(&data)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported account data to {}", path.display());
                }
                None => println!("{}", text),
            }
        }

        Command::DeleteAccount { yes } => {
            require_session(manager)?;
            if !yes && prompt("Type 'delete' to permanently delete your account: ")? != "delete" {
                bail!("Aborted");
            }
            let password = rpassword::prompt_password("Password: ")?;
            manager.delete_account(&password).await?;
            println!("Account deleted");
        }
    }

    Ok(())
}

fn require_session(manager: &SessionManager) -> Result<()> {
    if !manager.snapshot().authenticated {
        bail!("Not signed in. Run `inkwell login` first.");
    }
    Ok(())
}

/// Accept `notes`, `/notes` or `/notes/`, optionally followed by `?key=value&...`.
/// The server wants a leading and trailing slash on the path itself.
fn resource_request(target: &str) -> RequestSpec {
    let target = target.trim();
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };

    let trimmed = path.trim_matches('/');
    let path = if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    };

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .fold(RequestSpec::get(path), |spec, pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            spec.query(key, value)
        })
}

/// Print per-field server messages before handing the error back
fn report_auth_error(error: AuthError) -> anyhow::Error {
    for line in error.field_messages() {
        eprintln!("  {}", line);
    }
    anyhow::Error::new(error)
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_request_paths() {
        assert_eq!(resource_request("notes").path, "/notes/");
        assert_eq!(resource_request("/notes/42").path, "/notes/42/");
        assert_eq!(resource_request("/notes/").path, "/notes/");
        assert_eq!(resource_request("").path, "/");
        assert!(resource_request("notes").query.is_empty());
    }

    #[test]
    fn test_resource_request_keeps_query_off_the_path() {
        let spec = resource_request("notes?page=2");
        assert_eq!(spec.path, "/notes/");
        assert_eq!(spec.query, vec![("page".to_string(), "2".to_string())]);

        let spec = resource_request("/notes/tags/?q=work&archived&");
        assert_eq!(spec.path, "/notes/tags/");
        assert_eq!(
            spec.query,
            vec![
                ("q".to_string(), "work".to_string()),
                ("archived".to_string(), String::new()),
            ]
        );
        assert_eq!(spec.to_string(), "GET /notes/tags/");
    }

    #[test]
    fn test_args_parse_export() {
        let args = Args::try_parse_from(["inkwell", "export", "--output", "backup.json"])
            .expect("arguments should parse");
        match args.command {
            Command::Export { output } => assert_eq!(output, Some(PathBuf::from("backup.json"))),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_args_parse_global_flags() {
        let args = Args::try_parse_from([
            "inkwell",
            "get",
            "notes",
            "tags",
            "--store",
            "memory",
            "--api-url",
            "http://127.0.0.1:9000/api",
        ])
        .expect("arguments should parse");

        assert!(matches!(args.store, Some(StoreArg::Memory)));
        assert_eq!(args.api_url.as_deref(), Some("http://127.0.0.1:9000/api"));
        match args.command {
            Command::Get { paths } => assert_eq!(paths, vec!["notes", "tags"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}

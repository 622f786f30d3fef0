// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use console_session::callback::{serve, CALLBACK_PATH};
use console_session::client::ensure_crypto;
use console_session::config::SessionConfig;
use console_session::oauth::{CallbackOutcome, OAuthMode, OAuthState, Transition};
use console_session::session::Session;

/// Admin console session client.
#[derive(Debug, Parser)]
#[command(name = "console-session", version)]
struct Cli {
    #[command(flatten)]
    session: SessionConfig,

    /// Log filter (tracing `EnvFilter` syntax).
    #[arg(long, default_value = "info", env = "CONSOLE_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log output format: `json` or `text`.
    #[arg(long, default_value = "text", env = "CONSOLE_LOG_FORMAT", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Sign in with email and password, keep the session renewed until
    /// Ctrl-C, then sign out.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CONSOLE_PASSWORD", hide_env_values = true)]
        password: String,
        /// Page to land on once signed in.
        #[arg(long)]
        return_to: Option<String>,
    },
    /// Run startup hydration as if the console was opened at `url`.
    Hydrate {
        #[arg(long, default_value = "/")]
        url: String,
    },
    /// Listen for a provider redirect on localhost and drive the OAuth flow.
    Oauth {
        #[arg(long, default_value = "login")]
        mode: OAuthMode,
        #[arg(long, default_value_t = 8765)]
        port: u16,
        #[arg(long)]
        return_to: Option<String>,
    },
    /// Restore the session and print the current user.
    Me,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_crypto();
    let session = Arc::new(Session::open(cli.session)?);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    match cli.command {
        Command::Login { email, password, return_to } => {
            let transition = session.login(&email, &password, return_to).await?;
            let transition = resolve_interactive(&session, transition, &mut stdin).await?;
            print_json(&transition)?;
            if !matches!(transition.state, OAuthState::Authenticated) {
                return Ok(());
            }

            let scheduler = session.start();
            info!("session active, press Ctrl-C to sign out");
            tokio::signal::ctrl_c().await?;
            session.logout().await;
            session.shutdown();
            scheduler.await?;
        }
        Command::Hydrate { url } => {
            let outcome = session.hydrate(&url).await;
            print_json(&outcome)?;
            print_json(&session.store().status())?;
        }
        Command::Oauth { mode, port, return_to } => {
            let flow = session.oauth().begin(mode, return_to);
            let listener = TcpListener::bind(("127.0.0.1", port)).await?;
            eprintln!(
                "redirect the provider to http://127.0.0.1:{port}{CALLBACK_PATH} with state={}",
                flow.state
            );

            let (tx, mut rx) = mpsc::channel(8);
            let shutdown = CancellationToken::new();
            let server =
                tokio::spawn(serve(Arc::clone(&session), listener, Some(tx), shutdown.clone()));

            let transition = loop {
                match rx.recv().await {
                    Some(CallbackOutcome::Resolved(t)) => break t,
                    Some(other) => info!(?other, "ignoring landing"),
                    None => anyhow::bail!("callback listener stopped"),
                }
            };
            shutdown.cancel();
            server.await??;

            let transition = resolve_interactive(&session, transition, &mut stdin).await?;
            print_json(&transition)?;
        }
        Command::Me => {
            let outcome = session.hydrate("/").await;
            info!(?outcome, "hydrated");
            let user = session.fetch_me().await?;
            print_json(&user)?;
        }
    }
    Ok(())
}

/// Answer business-selection and account-linking prompts from stdin. An
/// empty answer cancels the flow.
async fn resolve_interactive(
    session: &Session,
    mut transition: Transition,
    stdin: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<Transition> {
    loop {
        transition = match transition.state {
            OAuthState::BusinessSelectionRequired { ref selection, .. } => {
                eprintln!("choose a business:");
                for (i, business) in selection.businesses.iter().enumerate() {
                    eprintln!("  [{}] {} ({})", i + 1, business.name, business.id);
                }
                let answer = stdin.next_line().await?.unwrap_or_default();
                let answer = answer.trim();
                if answer.is_empty() {
                    return Ok(session.oauth().cancel());
                }
                let id = answer
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| selection.businesses.get(n.wrapping_sub(1)))
                    .map_or(answer, |b| b.id.as_str())
                    .to_owned();
                session.oauth().select_business(&id).await
            }
            OAuthState::AccountLinkingRequired { ref linking, ref error, .. } => {
                if let Some(error) = error {
                    eprintln!("{error}");
                }
                eprintln!("an account exists for {}; enter its password to link:", linking.email);
                let answer = stdin.next_line().await?.unwrap_or_default();
                if answer.is_empty() {
                    return Ok(session.oauth().cancel());
                }
                session.oauth().confirm_account_link(&answer).await
            }
            _ => return Ok(transition),
        };
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

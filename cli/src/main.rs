use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use auctionverse::config::AuthConfig;
use auctionverse::routes::auth::USER_ID_HEADER;
use auctionverse::services::auction::{Auction, AuctionListing, Bid, NewAuction};
use auctionverse::services::auth::AuthError;
use auctionverse::services::context::ClientContext;
use auctionverse::services::directory::HttpUserRepository;
use auctionverse::services::guard::GuardDecision;
use auctionverse::services::session::SessionState;
use auctionverse::services::storage::FileStorage;
use auctionverse::services::user::{InMemoryUserRepository, RepositoryError, User, UserRepository};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use time::OffsetDateTime;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const STORAGE_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("directory error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("invalid server URL: {0}")]
    InvalidServerUrl(String),
    #[error("`{0}` needs a server; drop --offline")]
    NeedsServer(&'static str),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket failed: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("server rejected request ({0}): {1}")]
    Rejected(u16, String),
    #[error("{0}")]
    Denied(String),
}

#[derive(Parser, Debug)]
#[command(name = "auctionverse-cli", about = "AuctionVerse session and marketplace client")]
struct Cli {
    /// File holding the persisted session (this client's local storage).
    #[arg(long, env = "AUCTIONVERSE_STORAGE", default_value = ".auctionverse/storage.json")]
    storage: PathBuf,

    #[arg(long, env = "AUCTIONVERSE_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Use the built-in demo directory instead of a server.
    #[arg(long, default_value_t = false)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    /// Evaluate the route guard for a view path, e.g. `/my-bids`.
    Visit { path: String },
    /// List a new auction as the signed-in user.
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        starting_bid: u64,
        #[arg(long, default_value_t = 72, help = "Hours until bidding closes")]
        ends_in_hours: u32,
        #[arg(long)]
        image_url: Option<String>,
    },
    /// Bids placed by the signed-in user.
    MyBids,
    /// Auctions listed by the signed-in user.
    MyAuctions,
    /// Stream live bids for an auction until interrupted.
    Watch {
        auction_id: String,
        #[arg(long, help = "Stop after this many bids")]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_owned();

    if let Command::Ping = cli.command {
        return run_ping(&server, cli.offline).await;
    }

    let repo: Arc<dyn UserRepository> = if cli.offline {
        Arc::new(InMemoryUserRepository::seeded())
    } else {
        Arc::new(HttpUserRepository::new(&server, AuthConfig::from_env().timeout)?)
    };
    let storage = Arc::new(FileStorage::new(&cli.storage));
    let ctx = ClientContext::new(storage.clone(), repo, AuthConfig::from_env());
    ctx.start().await;

    match cli.command {
        Command::Ping => Ok(()),
        Command::Login { email, password } => {
            let outcome = ctx.auth().login(&email, &password).await?;
            println!("logged in as {} <{}>", outcome.user.name, outcome.user.email);
            if let Some(target) = outcome.redirect {
                println!("redirect {target}");
            }
            Ok(())
        }
        Command::Signup { name, email, password } => {
            let outcome = ctx.auth().signup(&name, &email, &password).await?;
            println!("welcome, {}", outcome.user.name);
            if let Some(target) = outcome.redirect {
                println!("redirect {target}");
            }
            Ok(())
        }
        Command::Logout => {
            let target = ctx.auth().logout().await;
            println!("logged out");
            println!("redirect {target}");
            Ok(())
        }
        Command::Whoami => {
            match ctx.session().current() {
                SessionState::Authenticated(user) => println!("{}", serde_json::to_string_pretty(&user)?),
                SessionState::Restoring | SessionState::Anonymous => println!("anonymous"),
            }
            Ok(())
        }
        Command::Visit { path } => {
            let decision = ctx.navigate(&path).await;
            println!("{}", describe_decision(&path, &decision));
            Ok(())
        }
        Command::Create { title, description, starting_bid, ends_in_hours, image_url } => {
            if cli.offline {
                return Err(CliError::NeedsServer("create"));
            }
            let user = signed_in(&ctx, "/create-auction").await?;
            let new = NewAuction {
                title,
                description,
                image_url,
                starting_bid,
                starts_at: None,
                ends_at: OffsetDateTime::now_utc() + time::Duration::hours(i64::from(ends_in_hours)),
            };
            let response = reqwest::Client::new()
                .post(format!("{server}/api/auctions"))
                .header(USER_ID_HEADER, &user.id)
                .json(&new)
                .send()
                .await?;
            let auction: Auction = read_json(response).await?;
            println!("listed auction {}: {} (starting at ${})", auction.id, auction.title, auction.starting_bid);
            Ok(())
        }
        Command::MyBids => {
            if cli.offline {
                return Err(CliError::NeedsServer("my-bids"));
            }
            let user = signed_in(&ctx, "/my-bids").await?;
            let bids: Vec<Bid> = fetch_own(&server, "bids", &user).await?;
            if bids.is_empty() {
                println!("no bids yet");
            }
            for bid in &bids {
                println!("auction {}: {}", bid.auction_id, describe_bid(bid));
            }
            Ok(())
        }
        Command::MyAuctions => {
            if cli.offline {
                return Err(CliError::NeedsServer("my-auctions"));
            }
            let user = signed_in(&ctx, "/my-auctions").await?;
            let listings: Vec<AuctionListing> = fetch_own(&server, "auctions", &user).await?;
            if listings.is_empty() {
                println!("no auctions yet");
            }
            for listing in &listings {
                println!("{}", describe_listing(listing));
            }
            Ok(())
        }
        Command::Watch { auction_id, count } => {
            if cli.offline {
                return Err(CliError::NeedsServer("watch"));
            }
            let _watcher = storage.spawn_watcher(STORAGE_POLL_INTERVAL);
            let _sync = ctx.session().spawn_sync();
            run_watch(&ctx, &server, &auction_id, count).await
        }
    }
}

/// Guard `path` for the current session and return the signed-in user.
async fn signed_in(ctx: &ClientContext, path: &str) -> Result<User, CliError> {
    let decision = ctx.navigate(path).await;
    if !decision.renders() {
        return Err(CliError::Denied(describe_decision(path, &decision)));
    }
    ctx.session()
        .current()
        .user()
        .cloned()
        .ok_or_else(|| CliError::Denied(describe_decision(path, &GuardDecision::RedirectToLogin)))
}

async fn fetch_own<T: serde::de::DeserializeOwned>(server: &str, what: &str, user: &User) -> Result<T, CliError> {
    let response = reqwest::Client::new()
        .get(format!("{server}/api/me/{what}"))
        .header(USER_ID_HEADER, &user.id)
        .send()
        .await?;
    read_json(response).await
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, CliError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        tracing::debug!(status = status.as_u16(), %body, "request rejected");
        return Err(CliError::Rejected(status.as_u16(), body));
    }
    Ok(serde_json::from_str(&body)?)
}

async fn run_ping(server: &str, offline: bool) -> Result<(), CliError> {
    if offline {
        return Err(CliError::NeedsServer("ping"));
    }
    let response = reqwest::get(format!("{server}/healthz")).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Status(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn run_watch(ctx: &ClientContext, server: &str, auction_id: &str, count: Option<usize>) -> Result<(), CliError> {
    let url = feed_url(server, auction_id)?;
    tracing::debug!(%url, "connecting to bid feed");
    let (mut stream, _) = connect_async(url).await.map_err(|e| CliError::Ws(Box::new(e)))?;
    tracing::info!(%auction_id, "bid feed connected");
    let mut session_rx = ctx.session().subscribe();
    let mut seen = 0_usize;
    eprintln!("watching auction {auction_id}; ctrl-c to stop");

    loop {
        tokio::select! {
            message = stream.next() => {
                let Some(message) = message else { break };
                match message.map_err(|e| CliError::Ws(Box::new(e)))? {
                    Message::Text(text) => {
                        let bid: Bid = serde_json::from_str(text.as_str())?;
                        println!("{}", describe_bid(&bid));
                        seen += 1;
                        if count.is_some_and(|limit| seen >= limit) {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            changed = session_rx.changed() => {
                if changed.is_err() {
                    continue;
                }
                let state = session_rx.borrow_and_update().clone();
                tracing::debug!(authenticated = state.is_authenticated(), "session changed during watch");
                match state {
                    SessionState::Authenticated(user) => eprintln!("session changed: now {}", user.email),
                    SessionState::Restoring | SessionState::Anonymous => eprintln!("signed out in another client"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn feed_url(server: &str, auction_id: &str) -> Result<String, CliError> {
    if let Some(rest) = server.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/auctions/{auction_id}/feed"));
    }
    if let Some(rest) = server.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/auctions/{auction_id}/feed"));
    }
    Err(CliError::InvalidServerUrl(server.to_owned()))
}

fn describe_decision(path: &str, decision: &GuardDecision) -> String {
    match decision {
        GuardDecision::Render => format!("render {path}"),
        GuardDecision::Loading => "loading".to_owned(),
        GuardDecision::Suspended { user_id } => {
            format!("suspended: account {user_id} has been banned; log out to continue")
        }
        GuardDecision::RedirectToLogin | GuardDecision::RedirectToHome => {
            format!("redirect {}", decision.redirect_target().unwrap_or("/"))
        }
    }
}

fn describe_listing(listing: &AuctionListing) -> String {
    let auction = &listing.auction;
    let status = serde_json::to_value(listing.status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default();
    format!("{} [{status}] {}: ${} ({} bids)", auction.id, auction.title, auction.current_bid, auction.bid_count)
}

fn describe_bid(bid: &Bid) -> String {
    let mut line = format!("${} by {} ({})", bid.amount, bid.user_name, bid.user_id);
    if let Some(message) = &bid.message {
        line.push_str(&format!(": \"{message}\""));
    }
    line
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;

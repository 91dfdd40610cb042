use std::io::{self, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::warn;

use shrinecache_core::models::{GalleryItem, LivestreamStatus};
use shrinecache_core::utils::{format_optional, freshness_note, truncate_string, user_message};
use shrinecache_core::{ApiError, Config, Loaded, SessionManager, ShrineApi};

use crate::Command;

/// Column width for titles in list output
const TITLE_WIDTH: usize = 40;

pub async fn run(
    command: Command,
    config: &mut Config,
    session: &SessionManager,
    api: &ShrineApi,
) -> Result<()> {
    match command {
        Command::Login { username } => login(username, config, session).await,
        Command::Logout => {
            session.logout().await;
            api.clear();
            println!("Signed out.");
            Ok(())
        }
        Command::Status => {
            if session.is_verifying() {
                println!("Checking session...");
            }
            match session.revalidate().await {
                Ok(principal) => println!("Signed in as {}", principal.display_name()),
                Err(ApiError::Unauthorized(_)) => println!("Not signed in."),
                Err(e) => println!("Not signed in: {}", user_message(&e)),
            }
            Ok(())
        }
        Command::Gallery {
            limit,
            page,
            category,
            admin,
        } => {
            let loaded = if admin {
                require_session(session).await?;
                api.admin_gallery(page).await
            } else {
                api.public_gallery(limit, page, category.as_deref()).await
            };
            print_gallery(&report(loaded)?);
            Ok(())
        }
        Command::Toggle { id } => {
            require_session(session).await?;
            let item = api.toggle_gallery_item(id).await.map_err(to_anyhow)?;
            let state = if item.is_published { "published" } else { "hidden" };
            println!("{} is now {}", item.title, state);
            Ok(())
        }
        Command::Delete { id } => {
            require_session(session).await?;
            api.delete_gallery_item(id).await.map_err(to_anyhow)?;
            println!("Deleted gallery item {}", id);
            Ok(())
        }
        Command::Team => {
            let loaded = report(api.management_team().await)?;
            for member in &loaded.payload {
                println!(
                    "{:<30} {}",
                    truncate_string(&member.name, 30),
                    format_optional(&member.designation, "-")
                );
            }
            Ok(())
        }
        Command::Stats => {
            require_session(session).await?;
            let stats = report(api.dashboard_stats().await)?.payload;
            println!("Gallery items:      {} ({} published)", stats.gallery_items, stats.published_items);
            println!("Team members:       {}", stats.team_members);
            println!("Pending bookings:   {}", stats.pending_bookings);
            println!("Donations (month):  {}", stats.donations_this_month);
            Ok(())
        }
        Command::Livestream { watch: None } => {
            print_livestream(&report(api.livestream_status().await)?.payload);
            Ok(())
        }
        Command::Livestream { watch: Some(secs) } => {
            let mut rx = api.watch_livestream(Duration::from_secs(secs.max(1)));
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if let Some(status) = rx.borrow_and_update().clone() {
                            print_livestream(&status);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            Ok(())
        }
    }
}

async fn login(username: Option<String>, config: &mut Config, session: &SessionManager) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(u) => u,
        None => prompt("Username: ")?,
    };
    let password = match std::env::var("SHRINECACHE_PASSWORD") {
        Ok(p) if !p.is_empty() => p,
        _ => rpassword::prompt_password("Password: ")?,
    };

    println!("Signing in...");
    match session.login(&username, &password).await {
        Ok(principal) => {
            config.last_username = Some(username);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            println!("Welcome, {}.", principal.display_name());
            Ok(())
        }
        Err(e) => bail!("Login failed: {}", user_message(&e)),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("Failed to read input")?;
    Ok(input.trim().to_string())
}

/// Settle a restored session before an admin command.
async fn require_session(session: &SessionManager) -> Result<()> {
    if session.is_authenticated() || session.resume().await {
        return Ok(());
    }
    bail!("Not signed in. Run `shrinecache login` first.")
}

/// Print where the data came from, then hand back the payload.
fn report<T>(result: Result<Loaded<T>, ApiError>) -> Result<Loaded<T>> {
    let loaded = result.map_err(to_anyhow)?;
    eprintln!("({})", freshness_note(&loaded, Utc::now()));
    Ok(loaded)
}

fn to_anyhow(err: ApiError) -> anyhow::Error {
    let message = user_message(&err);
    anyhow::Error::new(err).context(message)
}

fn print_gallery(loaded: &Loaded<Vec<GalleryItem>>) {
    if loaded.payload.is_empty() {
        println!("No gallery items.");
        return;
    }
    for item in &loaded.payload {
        let marker = if item.is_published { " " } else { "*" };
        println!(
            "{}{:>5}  {:<width$}  {}",
            marker,
            item.id,
            truncate_string(&item.title, TITLE_WIDTH),
            format_optional(&item.category, "-"),
            width = TITLE_WIDTH
        );
    }
}

fn print_livestream(status: &LivestreamStatus) {
    if status.is_live {
        println!(
            "LIVE: {} {}",
            format_optional(&status.title, "Livestream"),
            format_optional(&status.stream_url, "")
        );
    } else {
        println!("Not live.");
    }
}

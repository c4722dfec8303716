//! vinylia - command-line front end for the resonance synchronizer
//!
//! Runs one action against the hosted backend with the session given in the
//! environment, using the same cache/coordinator wiring the app uses.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use vinylia_common::config::BackendConfig;
use vinylia_common::events::SyncEvent;
use vinylia_sync::session::Session;
use vinylia_sync::SyncContext;

#[derive(Debug, Parser)]
#[command(name = "vinylia", version, about = "Vinylia social sync client")]
struct Cli {
    /// Config file (overrides VINYLIA_CONFIG and the platform default)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Authenticated user ID
    #[arg(long, env = "VINYLIA_USER_ID")]
    user_id: String,

    /// Session access token (JWT)
    #[arg(long, env = "VINYLIA_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List stories you have resonated with
    Resonances,
    /// Toggle your resonance on a story
    Toggle {
        story_id: String,
    },
    /// Print a page of the discover feed
    Feed {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Replace a story's text through the auto-saver
    Edit {
        story_id: String,
        content: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting vinylia v{}", env!("CARGO_PKG_VERSION"));

    let config = BackendConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let context = SyncContext::connect(config)?;

    let membership = context
        .sign_in(Session::new(cli.user_id, cli.access_token))
        .await
        .context("loading resonances")?;

    match cli.command {
        Command::Resonances => {
            for story_id in &membership {
                println!("{story_id}");
            }
            info!("{} resonated stories", membership.len());
        }
        Command::Toggle { story_id } => {
            let outcome = context.coordinator().toggle(&story_id).await?;
            let state = if outcome.resonated { "resonated" } else { "not resonated" };
            match outcome.resonance_count {
                Some(count) => println!("{story_id}: {state} ({count} total)"),
                None => println!("{story_id}: {state}"),
            }
            if !outcome.reconciled {
                println!("warning: could not confirm final state with the server");
            }
        }
        Command::Feed { page } => {
            let page = page.max(1);
            let mut feed = context.feed();
            for _ in 0..page {
                feed.load_more().await?;
            }
            for card in feed.last_page_cards() {
                let marker = if card.resonated { "*" } else { " " };
                println!(
                    "{marker} {} | {} - {} | {} ({} resonances)",
                    card.story_id,
                    card.artist.as_deref().unwrap_or("?"),
                    card.album.as_deref().unwrap_or("?"),
                    card.author_name,
                    card.resonance_count,
                );
            }
        }
        Command::Edit { story_id, content } => {
            let mut events = context.subscribe_events();
            let autosave = context.story_autosave(story_id);
            autosave.edit(content);
            autosave.flush();

            loop {
                match events.recv().await? {
                    SyncEvent::StoryAutosaved { story_id, length, .. } => {
                        println!("saved {length} characters to {story_id}");
                        break;
                    }
                    SyncEvent::StoryAutosaveFailed { message, .. } => bail!("save failed: {message}"),
                    _ => {}
                }
            }
        }
    }

    context.sign_out();
    Ok(())
}

//! collabdocs: terminal client for collaborative documents.
//!
//! Joins a document session over the relay WebSocket, prints what other
//! participants do and turns stdin lines into edits and comments.

mod input;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;
use uuid::Uuid;

use collabdocs_sync::{
    ConfigError, DocumentApi, Edit, FileStore, HttpApi, Preferences, RecentDoc, Session,
    SessionConfig, SessionEvent, SessionHandle, WsConnector, YrsReplica,
};
use input::{Input, HELP};

#[derive(Parser)]
#[command(name = "collabdocs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// WebSocket relay endpoint (overrides COLLABDOCS_WS_URL)
    #[arg(long)]
    server: Option<Url>,

    /// REST API base (overrides COLLABDOCS_API_URL)
    #[arg(long)]
    api: Option<Url>,

    /// Local preferences file
    #[arg(long, default_value = "collabdocs-prefs.json")]
    prefs: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new document and join it
    New {
        /// Document title
        #[arg(long)]
        title: Option<String>,

        /// Display name (remembered for next time)
        #[arg(long)]
        name: Option<String>,
    },

    /// Join an existing document
    Join {
        doc_id: Uuid,

        /// Display name (remembered for next time)
        #[arg(long)]
        name: Option<String>,
    },

    /// List recently opened documents
    Recent,

    /// Rename a document
    Rename { doc_id: Uuid, title: String },

    /// Delete a document you created from this client
    Delete { doc_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = endpoint_config(cli.server, cli.api).context("reading endpoint configuration")?;

    let store = FileStore::open(&cli.prefs)
        .with_context(|| format!("opening preferences at {}", cli.prefs.display()))?;
    let mut prefs = Preferences::new(store);
    let api = HttpApi::new(config.api_url.clone());

    match cli.command {
        Commands::New { title, name } => {
            let doc = api.create_document(title).await.context("creating document")?;
            prefs.mark_owner(doc.id)?;
            println!("Created \"{}\" ({})", doc.title, doc.id);
            run_session(config, &mut prefs, &api, doc.id, name).await
        }
        Commands::Join { doc_id, name } => {
            run_session(config, &mut prefs, &api, doc_id, name).await
        }
        Commands::Recent => {
            let recent = prefs.recent_docs();
            if recent.is_empty() {
                println!("No recent documents");
            }
            for doc in recent {
                let owner = if prefs.is_owner(doc.id) { " (owner)" } else { "" };
                println!("{}  {}{}  {}", doc.id, doc.title, owner, doc.updated_at);
            }
            Ok(())
        }
        Commands::Rename { doc_id, title } => {
            let doc = api.rename_document(doc_id, title).await.context("renaming document")?;
            prefs.save_recent(RecentDoc::from(&doc))?;
            println!("Renamed to \"{}\"", doc.title);
            Ok(())
        }
        Commands::Delete { doc_id } => {
            if !prefs.is_owner(doc_id) {
                bail!("only the client that created {doc_id} can delete it");
            }
            api.delete_document(doc_id).await.context("deleting document")?;
            prefs.remove_recent(doc_id)?;
            println!("Deleted {doc_id}");
            Ok(())
        }
    }
}

/// Environment endpoints first, then command-line flags on top.
fn endpoint_config(server: Option<Url>, api: Option<Url>) -> Result<SessionConfig, ConfigError> {
    let mut config = SessionConfig::from_env()?;
    if let Some(server) = server {
        config.server_url = server;
    }
    if let Some(api) = api {
        config.api_url = api;
    }
    Ok(config)
}

async fn run_session(
    config: SessionConfig,
    prefs: &mut Preferences<FileStore>,
    api: &HttpApi,
    doc_id: Uuid,
    name: Option<String>,
) -> Result<()> {
    let identity = match name {
        Some(name) => prefs.set_display_name(&name)?,
        None => prefs.display_name(),
    };
    if identity.is_none() {
        println!("No display name yet: set one with /name <name> to connect");
    }

    match api.get_document(doc_id).await {
        Ok(doc) => {
            println!("Opened \"{}\"", doc.title);
            prefs.save_recent(RecentDoc::from(&doc))?;
        }
        Err(e) => log::warn!("Could not load document metadata: {e}"),
    }

    let (session, mut events) = Session::spawn(
        config,
        identity,
        doc_id,
        Arc::new(WsConnector),
        YrsReplica::new(),
    );
    if let Err(e) = session.load_comments().await {
        log::warn!("{e}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => report(&session, event).await,
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(&session, prefs, &line).await? {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    session.teardown().await;
    info!("Left document {doc_id}");
    Ok(())
}

/// Returns `false` when the user asked to leave.
async fn handle_line(
    session: &SessionHandle,
    prefs: &mut Preferences<FileStore>,
    line: &str,
) -> Result<bool> {
    let input = match input::parse(line) {
        Ok(Some(input)) => input,
        Ok(None) => return Ok(true),
        Err(usage) => {
            println!("{usage}");
            return Ok(true);
        }
    };

    match input {
        Input::Append(text) => session.edit(Edit::append(text))?,
        Input::Insert { at, text } => session.edit(Edit::insert(at, text))?,
        Input::Delete { at, len } => session.edit(Edit::delete(at, len))?,
        Input::Select(range) => session.select(range)?,
        Input::Comment { range, text } => match session.add_comment(range, &text).await {
            Ok(comment) => println!("Comment {} added", comment.id),
            Err(e) => println!("{e}"),
        },
        Input::Resolve(id) => match session.resolve_comment(&id).await {
            Ok(_) => println!("Comment {id} resolved"),
            Err(e) => println!("{e}"),
        },
        Input::Comments => {
            for comment in session.comments().await? {
                let mark = if comment.resolved { "x" } else { " " };
                println!(
                    "[{mark}] {} {}..{} {}: {}",
                    comment.id, comment.from_pos, comment.to_pos, comment.author_name, comment.text
                );
            }
        }
        Input::Who => {
            for who in session.collaborators().await? {
                let you = if who.is_local { " (you)" } else { "" };
                let typing = if who.is_typing { " typing" } else { "" };
                println!("{} {}{}{}", who.color, who.name, you, typing);
            }
        }
        Input::Text => println!("{}", session.text().await?),
        Input::Name(name) => {
            if let Some(name) = prefs.set_display_name(&name)? {
                session.set_identity(&name)?;
            }
        }
        Input::Quit => return Ok(false),
        Input::Help => println!("{HELP}"),
    }
    Ok(true)
}

async fn report(session: &SessionHandle, event: SessionEvent) {
    match event {
        SessionEvent::Connected => println!("* connected"),
        SessionEvent::Disconnected => println!("* disconnected"),
        SessionEvent::Reconnecting => println!("* connection lost, reconnecting…"),
        SessionEvent::DocumentChanged {
            origin: collabdocs_sync::Origin::Remote,
        } => {
            if let Ok(text) = session.text().await {
                println!("--- document ---\n{text}\n----------------");
            }
        }
        SessionEvent::DocumentChanged { .. } => {}
        SessionEvent::PresenceChanged => {
            if let Ok(typing) = session.typing_collaborators().await {
                match typing.as_slice() {
                    [] => {}
                    [one] => println!("* {} is typing…", one.name),
                    many => println!("* {} people are typing…", many.len()),
                }
            }
        }
        SessionEvent::CommentsChanged => {
            if let Ok(comments) = session.comments().await {
                let open = comments.iter().filter(|c| !c.resolved).count();
                println!("* {open} open comments");
            }
        }
    }
}

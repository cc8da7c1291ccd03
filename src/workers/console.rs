//! Line-oriented front end.
//!
//! Stdin lines become chat messages; lines starting with `/` are commands
//! (see [`HELP`]). Session events are printed as they arrive and received
//! files are written to the output directory.

use crate::core::chat::ChatEntry;
use crate::core::events::SessionEvent;
use crate::core::model::{ConnectionState, SessionId, User};
use crate::core::protocol::FileId;
use crate::core::session::SessionManager;
use crate::core::signaling::DirSignaling;
use crate::core::transfer::OutgoingFile;
use crate::core::transport::WebRtcTransport;
use crate::utils::data_dir;
use crate::utils::sos::SignalOfStop;
use crate::workers::args::{Args, Command};
use crate::workers::settings::Settings;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

const HELP: &str = "\
/send <path>   send a file
/cancel <id>   cancel a transfer in either direction
/transfers     list transfers in progress
/history       show the chat log
/status        show session state and peers
/quit          leave the session";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Chat(String),
    SendFile(PathBuf),
    Cancel(FileId),
    Transfers,
    History,
    Status,
    Help,
    Quit,
    Empty,
}

fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    match trimmed {
        "/quit" => return Input::Quit,
        "/help" => return Input::Help,
        "/status" => return Input::Status,
        "/history" => return Input::History,
        "/transfers" => return Input::Transfers,
        _ => {}
    }
    if let Some(path) = trimmed.strip_prefix("/send ").map(str::trim)
        && !path.is_empty()
    {
        return Input::SendFile(PathBuf::from(path));
    }
    if let Some(id) = trimmed.strip_prefix("/cancel ").map(str::trim)
        && !id.is_empty()
    {
        return Input::Cancel(FileId::new(id));
    }
    Input::Chat(line.to_string())
}

pub async fn run(args: Args, settings: Settings, sos: SignalOfStop) -> anyhow::Result<()> {
    let store = settings.store.clone().unwrap_or_else(data_dir::signaling_dir);
    let out_dir = settings.out.clone().unwrap_or_else(data_dir::downloads_dir);

    let user = User::anonymous(settings.display_name.as_deref().unwrap_or("anonymous"));

    let transport = WebRtcTransport::new(&settings.network.ice_servers)
        .await
        .context("creating WebRTC transport")?;
    let signaling = DirSignaling::new(&store);
    let (app_tx, mut app_rx) = mpsc::unbounded_channel();

    let session = Arc::new(SessionManager::new(
        user.clone(),
        Arc::new(transport),
        Arc::new(signaling),
        settings.session_config(),
        Some(app_tx),
    ));
    info!(event = "console_started", user = %user.name, store = %store.display());

    match &args.command {
        Command::Host => {
            let id = session.initiate().await.context("creating session")?;
            println!("Session id: {id}");
            println!("Share it with the peer: peerdrop join {id} --store {}", store.display());
        }
        Command::Join { session: id } => {
            if !join_or_stop(&session, id, &sos).await? {
                return Ok(());
            }
            println!("Joined session {id}");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = sos.wait() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                match parse_input(&line) {
                    Input::Empty => {}
                    Input::Quit => break,
                    Input::Chat(text) => {
                        if let Err(e) = session.send_chat(text).await {
                            println!("! chat not sent: {e}");
                        }
                    }
                    Input::SendFile(path) => spawn_send(session.clone(), path),
                    Input::Cancel(id) => {
                        let cancelled = session.cancel_outbound(&id).await
                            || session.cancel_inbound(&id).await;
                        if cancelled {
                            println!("* cancelled {id}");
                        } else {
                            println!("! no transfer {id}");
                        }
                    }
                    Input::Transfers => print_transfers(&session).await,
                    Input::History => print_history(&session).await,
                    Input::Status => print_status(&session).await,
                    Input::Help => println!("{HELP}"),
                }
            }
            Some(event) = app_rx.recv() => {
                if !on_event(&session, event, &out_dir).await {
                    break;
                }
            }
        }
    }

    session.close().await;
    Ok(())
}

/// Join `id`, giving up when `sos` fires. Returns `false` if interrupted.
async fn join_or_stop(session: &SessionManager, id: &str, sos: &SignalOfStop) -> anyhow::Result<bool> {
    let Some(joined) = sos.select(session.join(SessionId::new(id))).await else {
        info!(event = "join_interrupted", session = %id);
        session.close().await;
        return Ok(false);
    };
    joined.with_context(|| format!("joining session {id}"))?;
    Ok(true)
}

fn spawn_send(session: Arc<SessionManager>, path: PathBuf) {
    tokio::spawn(async move {
        let file = match OutgoingFile::from_path(&path).await {
            Ok(file) => file,
            Err(e) => {
                println!("! cannot read {}: {e}", path.display());
                return;
            }
        };
        println!("Sending {} ({} bytes)", file.name, file.data.len());
        if let Err(e) = session.send_file(file).await {
            println!("! send of {} failed: {e}", path.display());
        }
    });
}

async fn print_status(session: &SessionManager) {
    let id = session
        .session_id()
        .await
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".into());
    println!("* {} as {} in session {id}", session.state(), session.user().name);
    for user in session.remote_users().await {
        println!("  peer {} ({})", user.name, user.id);
    }
    println!("  {} chat messages", session.chat_messages().await.len());
}

async fn print_history(session: &SessionManager) {
    for entry in session.chat_log().await {
        match entry {
            ChatEntry::Message(m) => {
                println!("[{}] {}: {}", m.date.format("%H:%M:%S"), m.sender, m.text);
            }
            ChatEntry::Download { file_id, name, size } => {
                println!("[file] {name} ({size} bytes) id {file_id}");
            }
        }
    }
}

async fn print_transfers(session: &SessionManager) {
    for id in session.outbound_transfers().await {
        println!("  -> {id}");
    }
    for t in session.inbound_transfers().await {
        let status = if t.data.is_some() { "done" } else { "receiving" };
        println!("  <- {} {} {}% {status}", t.id, t.name, t.progress);
    }
}

/// Print one session event. Returns `false` when the console should stop.
async fn on_event(session: &SessionManager, event: SessionEvent, out_dir: &Path) -> bool {
    match event {
        SessionEvent::StateChanged(state) => {
            println!("* {state}");
            if state == ConnectionState::Connected {
                println!("Type to chat, /help for commands.");
            }
        }
        SessionEvent::RemoteUser(user) => println!("* peer: {}", user.name),
        SessionEvent::ChatReceived(message) => {
            println!(
                "[{}] {}: {}",
                message.date.format("%H:%M:%S"),
                message.sender,
                message.text
            );
        }
        SessionEvent::FileStarted {
            file_id,
            name,
            size,
        } => println!("* [{file_id}] receiving {name} ({size} bytes)"),
        SessionEvent::FileProgress {
            file_id,
            name,
            progress,
        } => println!("* [{file_id}] {name}: {progress}%"),
        SessionEvent::FileReceived {
            file_id,
            name,
            data,
        } => match session.save_received(&file_id, out_dir).await {
            Ok(path) => println!(
                "* [{file_id}] saved {name} ({} bytes) to {}",
                data.len(),
                path.display()
            ),
            Err(e) => {
                warn!(event = "save_received_failed", file_id = %file_id, error = %e);
                println!("! [{file_id}] could not save {name}: {e}");
            }
        },
        SessionEvent::SendProgress {
            file_id,
            name,
            sent_chunks,
            total_chunks,
        } => println!("* [{file_id}] {name}: {sent_chunks}/{total_chunks} chunks"),
        SessionEvent::SendComplete { file_id, name } => println!("* [{file_id}] sent {name}"),
        SessionEvent::TransferFailed { file_id, reason } => {
            println!("! transfer {file_id} failed: {reason}");
        }
        SessionEvent::TransportFailed => {
            println!("! connection lost");
            return false;
        }
        SessionEvent::Error(e) => println!("! {e}"),
    }
    true
}

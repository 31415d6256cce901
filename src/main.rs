use conecta_chat::chat::reconnect_backoff;
use conecta_chat::logging::{init_logging, log_configuration};
use conecta_chat::{
    ChatClient, Config, ConversationDirectory, Message, SessionContext, SessionState, SessionStore,
    SocketConfig, SocketSession,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;

    let config = Config::from_env()?;
    log_configuration(&config);

    // The login flow lives in the app; here we only restore what it stored
    let store = SessionStore::new(&config.session_file);
    let identity = match store.load().await {
        Some(identity) => identity,
        None => {
            tracing::error!(
                "No valid session in {}. Sign in with the app first.",
                config.session_file.display()
            );
            return Ok(());
        }
    };
    let session = SessionContext::new(identity);

    let socket = Arc::new(SocketSession::new(SocketConfig {
        url: config.socket_url.clone(),
        connect_timeout: config.connect_timeout,
        ack_timeout: config.ack_timeout,
    }));
    let directory = Arc::new(ConversationDirectory::new(
        config.api_url.clone(),
        session.clone(),
        config.request_timeout,
    )?);
    let client = Arc::new(ChatClient::new(session.clone(), directory, socket.clone()));

    let conversation = client.open_or_create().await?;
    println!(
        "💬 Conversation #{} ({} as {})",
        conversation.id,
        conversation.channel_token,
        session.identity().user.username
    );

    if socket.authenticated_as().as_deref() != Some(session.token()) {
        tracing::warn!("⚠️ Chat socket is not authenticated; messages will be stored over REST");
    }

    // The transport never rebinds on its own; do it here after a drop
    let mut state_rx = socket.watch_state();
    let watcher = tokio::spawn({
        let client = client.clone();
        async move {
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                if state != SessionState::Disconnected {
                    continue;
                }
                if let Err(e) = client.reconnect_with_backoff(reconnect_backoff()).await {
                    tracing::error!("Giving up on the chat socket: {}", e);
                }
                // Attempts made while retrying are not new drops
                let _ = state_rx.borrow_and_update();
            }
        }
    });

    let printer = tokio::spawn({
        let client = client.clone();
        let me = session.user_id();
        async move {
            let mut seen = HashSet::new();
            let mut was_typing = false;
            let mut ticker = tokio::time::interval(Duration::from_millis(300));
            loop {
                ticker.tick().await;
                for message in client.timeline() {
                    if seen.insert(message.id) {
                        print_message(&message, message.is_from(me));
                    }
                }
                let typing = client.remote_typing();
                if typing && !was_typing {
                    println!("   ✍️  typing...");
                }
                was_typing = typing;
            }
        }
    });

    println!("Type a message and press enter. /quit leaves.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            _ => {
                if let Err(e) = client.send_message(line).await {
                    tracing::error!("Failed to send message: {}", e);
                }
                if let Err(e) = client.set_typing(false).await {
                    tracing::debug!("Failed to clear typing flag: {}", e);
                }
            }
        }
    }

    watcher.abort();
    printer.abort();
    client.shutdown().await;
    Ok(())
}

fn print_message(message: &Message, mine: bool) {
    let who = if mine { "you" } else { "support" };
    println!(
        "[{}] {}: {}",
        message.sent_at.format("%d/%m %H:%M"),
        who,
        message.body
    );
}

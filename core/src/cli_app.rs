use crate::api::ApiClient;
use crate::chat_types::{ConversationEvent, DeliveryState, Message};
use crate::config::ClientConfig;
use crate::credential_store::SledCredentialStore;
use crate::realtime::{ConversationChannel, NotificationFeed, SendOutcome, WebSocketConnector};
use crate::session::SessionEvent;
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Shared CLI implementation for the `marketlink` and `core` binaries.
pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let bin = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("marketlink")
        .to_string();

    if args.len() < 2 {
        print_usage(&bin);
        return Ok(());
    }

    let command = &args[1];

    match command.as_str() {
        "login" => {
            if args.len() < 4 {
                eprintln!("{}", format!("Usage: {} login <username> <password>", bin).yellow());
                return Ok(());
            }
            let api = build_client()?;
            let login = api.login(&args[2], &args[3]).await?;
            println!("{} Logged in as {}", "✓".green(), args[2].cyan());
            if login.refresh.is_none() {
                println!("  {}", "No refresh credential issued; session will not renew".yellow());
            }
        }
        "register" => {
            if args.len() < 5 {
                eprintln!("{}", format!("Usage: {} register <username> <email> <password>", bin).yellow());
                return Ok(());
            }
            let payload = serde_json::json!({
                "username": args[2],
                "email": args[3],
                "password": args[4],
            });
            build_client()?.register(&payload).await?;
            println!("{} Registered {}, check your email before logging in", "✓".green(), args[2].cyan());
        }
        "notifications" => {
            notifications().await?;
        }
        "logout" => {
            build_client()?.logout()?;
            println!("{} Logged out", "✓".green());
        }
        "whoami" => {
            let profile = build_client()?.profile().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        "history" => {
            let Some(conversation_id) = parse_conversation(&bin, &args, "history <conversation_id>") else {
                return Ok(());
            };
            let messages = build_client()?.get_messages(conversation_id).await?;
            if messages.is_empty() {
                println!("{}", "No messages yet.".dimmed());
            }
            for message in &messages {
                print_message(message);
            }
        }
        "send" => {
            if args.len() < 4 {
                eprintln!("{}", format!("Usage: {} send <conversation_id> <message>", bin).yellow());
                return Ok(());
            }
            let Some(conversation_id) = parse_conversation(&bin, &args, "send <conversation_id> <message>") else {
                return Ok(());
            };
            let message = args[3..].join(" ");
            let sent = build_client()?.post_message(conversation_id, &message).await?;
            print_message(&sent);
        }
        "chat" => {
            let Some(conversation_id) = parse_conversation(&bin, &args, "chat <conversation_id> [display_name]") else {
                return Ok(());
            };
            let display_name = args.get(3).cloned().unwrap_or_else(|| "me".to_string());
            chat(conversation_id, display_name).await?;
        }
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
            print_usage(&bin);
        }
    }

    Ok(())
}

fn print_usage(bin: &str) {
    println!("{}", "⚡ MarketLink CLI".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} <command> [args]", bin.cyan());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {} <user> <email> <password> Create an account", "register".cyan());
    println!("  {} <username> <password>     Log in and store credentials", "login".cyan());
    println!("  {}                          Forget stored credentials", "logout".cyan());
    println!("  {}                          Show the logged-in profile", "whoami".cyan());
    println!("  {} <conversation_id>       Print a conversation", "history".cyan());
    println!("  {} <conversation_id> <msg>    Post a message over REST", "send".cyan());
    println!("  {} <conversation_id> [name]   Interactive realtime chat", "chat".cyan());
    println!("  {}                   Stream account notifications", "notifications".cyan());
    println!();
    println!(
        "  {} {}",
        "-".dimmed(),
        "MARKETLINK_API_URL=https://host/api must be set".yellow()
    );
}

fn parse_conversation(bin: &str, args: &[String], usage: &str) -> Option<u64> {
    match args.get(2).map(|raw| raw.parse::<u64>()) {
        Some(Ok(id)) => Some(id),
        Some(Err(_)) => {
            eprintln!("{} Conversation id must be a number", "✗".red().bold());
            None
        }
        None => {
            eprintln!("{}", format!("Usage: {} {}", bin, usage).yellow());
            None
        }
    }
}

fn build_client() -> anyhow::Result<ApiClient> {
    let config = ClientConfig::from_env()?;
    std::fs::create_dir_all(&config.data_dir)?;
    let credentials = Arc::new(SledCredentialStore::new(&config.data_dir)?);
    Ok(ApiClient::new(config, credentials)?)
}

fn print_message(message: &Message) {
    let when = message.created_at.format("%Y-%m-%d %H:%M");
    let marker = match message.delivery_state {
        DeliveryState::Pending => "…".yellow(),
        DeliveryState::Confirmed => "✓".green(),
    };
    println!(
        "{} {} {}: {}",
        marker,
        when.to_string().dimmed(),
        message.sender_display_name.bright_blue().bold(),
        message.content
    );
}

/// Interactive chat on one conversation until EOF or `/quit`.
pub async fn chat(conversation_id: u64, display_name: String) -> anyhow::Result<()> {
    let api = build_client()?;
    let connector = Arc::new(WebSocketConnector::new(api.config().connect_timeout));
    let mut session = api.subscribe_session();

    let channel = ConversationChannel::open(api, connector, conversation_id, display_name).await?;
    let mut events = channel.subscribe();

    let mut rendered = channel.messages().await;
    for message in &rendered {
        print_message(message);
    }
    println!(
        "{} conversation {} ({:?}) - type a message, /quit to leave",
        "⚡".bright_cyan(),
        conversation_id.to_string().cyan(),
        channel.state().await
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim() == "/quit" {
                    break;
                }
                if line.trim().is_empty() {
                    continue;
                }
                match channel.send(&line).await {
                    Ok(SendOutcome::Pending { .. }) | Ok(SendOutcome::Delivered(_)) => {}
                    Err(e) if e.requires_reauthentication() => {
                        eprintln!("{} {}", "✗".red().bold(), "Session expired, run `login` again".red());
                        break;
                    }
                    Err(e) => eprintln!("{} Send failed: {}", "✗".red().bold(), e),
                }
            }
            event = events.recv() => match event {
                Ok(ConversationEvent::MessagesChanged) | Err(RecvError::Lagged(_)) => {
                    let current = channel.messages().await;
                    render_changes(&rendered, &current);
                    rendered = current;
                }
                Ok(ConversationEvent::ChannelStateChanged { state }) => {
                    println!("{} channel {:?}", "•".dimmed(), state);
                }
                Err(RecvError::Closed) => break,
            },
            event = session.recv() => {
                if let Ok(SessionEvent::Expired { reason }) = event {
                    eprintln!("{} Session expired ({}), run `login` again", "✗".red().bold(), reason);
                    break;
                }
            }
        }
    }

    channel.close().await;
    Ok(())
}

fn render_changes(before: &[Message], after: &[Message]) {
    for message in changed_entries(before, after) {
        print_message(message);
    }
}

/// Entries of `after` that are new or changed delivery state. Matched on
/// server id or client temp id, so removals do not shift the comparison.
fn changed_entries<'a>(before: &[Message], after: &'a [Message]) -> Vec<&'a Message> {
    after
        .iter()
        .filter(|message| {
            !before.iter().any(|previous| {
                same_entry(previous, message)
                    && previous.id == message.id
                    && previous.delivery_state == message.delivery_state
            })
        })
        .collect()
}

fn same_entry(a: &Message, b: &Message) -> bool {
    if let (Some(x), Some(y)) = (a.id, b.id) {
        if x == y {
            return true;
        }
    }
    matches!((&a.client_temp_id, &b.client_temp_id), (Some(x), Some(y)) if x == y)
}

/// Stream notifications for the logged-in user until the feed closes.
async fn notifications() -> anyhow::Result<()> {
    let api = build_client()?;
    let connector = WebSocketConnector::new(api.config().connect_timeout);
    let feed = NotificationFeed::open(&api, &connector).await?;
    let mut incoming = feed.subscribe();
    println!("{} Listening for notifications, Ctrl-C to stop", "🔔".bright_cyan());

    loop {
        tokio::select! {
            notification = incoming.recv() => match notification {
                Ok(notification) => {
                    println!("{} {}", "•".cyan(), notification.title.bright_white().bold());
                    println!("  {}", notification.message);
                    if let Some(url) = notification.attachment_url() {
                        println!("  {} {}", "attachment:".dimmed(), url);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    eprintln!("{} {} notifications missed", "!".yellow(), missed);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                if !feed.is_open() {
                    println!("{} Notifications disconnected", "🔕".dimmed());
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

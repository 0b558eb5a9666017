use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Context, Result};

use instalk_api::{GroupUpdate, HttpApi, HttpApiConfig};
use instalk_cache::SessionCache;
use instalk_client::{ChatSession, SessionEvent};
use instalk_core::{ChatKind, Conversation, ConversationKey};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .from_env_lossy()
                .add_directive("instalk_cli=info".parse().unwrap())
                .add_directive("instalk_client=info".parse().unwrap())
                .add_directive("instalk_api=info".parse().unwrap())
                .add_directive("instalk_cache=info".parse().unwrap()),
        )
        .init();

    let server = std::env::var("INSTALK_SERVER")
        .unwrap_or_else(|_| "http://localhost:8080".to_string());
    println!("🌐 Server: {}", server);

    let api = HttpApi::new(&server, HttpApiConfig::default()).wrap_err("Failed to build API client")?;

    if read_line("Login or register? (l/r): ")?.as_str() == "r" {
        register(&api).await.wrap_err("Registration failed")?;
    }
    let username = read_line("Username: ")?;
    let password = read_line("Password: ")?;
    api.login(&username, &password)
        .await
        .wrap_err("Login failed")?;
    let me = api.fetch_user_info().await.wrap_err("Failed to fetch profile")?;
    println!("👤 Logged in as {} (id {})", me.username, me.id);

    let cache = Arc::new(SessionCache::open().await.wrap_err("Failed to open cache")?);
    let session = Arc::new(ChatSession::new(Arc::new(api), cache, me.id));

    let mut event_rx = session
        .take_event_receiver()
        .ok_or_else(|| color_eyre::eyre::eyre!("Failed to get event receiver"))?;

    session.restore().await.wrap_err("Failed to restore cache")?;
    session.start().await.wrap_err("Failed to start session")?;

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            handle_event(event);
        }
    });

    // No push channel on this transport; poll for new messages instead.
    {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(POLL_INTERVAL);
            loop {
                tick.tick().await;
                session.poll_new().await;
            }
        });
    }

    loop {
        print_menu();
        let choice = read_line("Choice: ")?;

        let outcome = match choice.as_str() {
            "1" => list_conversations(&session).await,
            "2" => open_conversation(&session).await,
            "3" => send_message(&session).await,
            "4" => toggle_pin(&session).await,
            "5" => retract_message(&session).await,
            "6" => forward_message(&session).await,
            "7" => list_friends(&session).await,
            "8" => review_requests(&session).await,
            "9" => add_friend(&session).await,
            "g" => manage_groups(&session).await,
            "p" => change_password(&session).await,
            "r" => {
                session.resync().await?;
                println!("🔄 Conversations rebuilt");
                Ok(())
            }
            "l" => {
                session.logout().await?;
                println!("🚪 Logged out");
                break;
            }
            "0" => {
                println!("👋 Shutting down...");
                session.shutdown().await?;
                break;
            }
            _ => {
                println!("❌ Invalid choice");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            println!("❌ {}", e);
        }
    }

    Ok(())
}

fn print_menu() {
    println!();
    println!("╔════════════════════════════════════╗");
    println!("║           InsTalk CLI              ║");
    println!("╠════════════════════════════════════╣");
    println!("║  1. List Conversations             ║");
    println!("║  2. Open Conversation              ║");
    println!("║  3. Send Message                   ║");
    println!("║  4. Pin / Unpin Conversation       ║");
    println!("║  5. Retract Message                ║");
    println!("║  6. Forward Message                ║");
    println!("║  7. List Friends                   ║");
    println!("║  8. Review Friend Requests         ║");
    println!("║  9. Add Friend                     ║");
    println!("║  g. Groups                         ║");
    println!("║  p. Change Password                ║");
    println!("║  r. Rebuild Conversations          ║");
    println!("║  l. Logout (clears local cache)    ║");
    println!("║  0. Exit                           ║");
    println!("╚════════════════════════════════════╝");
}

fn handle_event(event: SessionEvent) {
    match event {
        SessionEvent::PushConnected => println!("\n🔌 Push channel connected"),
        SessionEvent::PushDisconnected { reason } => {
            println!("\n🔌 Push channel disconnected: {}", reason);
        }
        SessionEvent::MessageReceived { message } => {
            println!("\n💬 New message from {}: {}", message.sender_id, message.content);
        }
        SessionEvent::MessageRetracted { message_id } => {
            println!("\n↩️  Message {} was retracted", message_id);
        }
        SessionEvent::PresenceChanged { user_id, online } => {
            let state = if online { "online" } else { "offline" };
            println!("\n🟢 User {} is now {}", user_id, state);
        }
        SessionEvent::FriendRemoved { friend_id } => {
            println!("\n💔 Friend {} removed you", friend_id);
        }
        SessionEvent::GroupDissolved { group_id } => {
            println!("\n👥 Group {} was dissolved", group_id);
        }
        SessionEvent::HistoryLoaded { count } => {
            println!("\n📜 History ready: {} messages", count);
        }
    }
}

async fn list_conversations(session: &Arc<ChatSession<HttpApi>>) -> Result<()> {
    let conversations = session.conversations.ordered().await;
    if conversations.is_empty() {
        println!("📭 No conversations");
        return Ok(());
    }

    println!("\n💬 Conversations ({}):", conversations.len());
    for conversation in &conversations {
        print_conversation(session, conversation).await;
    }
    println!("  📬 {} unread in total", session.conversations.total_unread().await);
    Ok(())
}

async fn print_conversation(session: &Arc<ChatSession<HttpApi>>, conversation: &Conversation) {
    let pin = if conversation.is_pinned { "📌" } else { "  " };
    let name = match conversation.kind {
        ChatKind::Friend => session.profiles.display_name(conversation.id).await,
        ChatKind::Group => match session.groups.get(conversation.id).await {
            Some(group) => group.name,
            None => format!("group {}", conversation.id),
        },
    };
    let preview = match conversation.last_message_id {
        Some(id) => match session.messages.get(id).await {
            Some(message) => message.content,
            None => "(message gone)".to_string(),
        },
        None => "(no messages)".to_string(),
    };
    let badge = if conversation.unread_count > 0 {
        format!(" [{}]", conversation.unread_count)
    } else {
        String::new()
    };
    println!(
        "  {} {}/{} {}{} - {}",
        pin,
        conversation.kind.as_str(),
        conversation.id,
        name,
        badge,
        preview
    );
}

fn read_key(kind_raw: &str, id_raw: &str) -> Result<ConversationKey> {
    let id: i64 = id_raw.parse().wrap_err("Not a numeric id")?;
    match kind_raw {
        "f" | "friend" => Ok(ConversationKey::friend(id)),
        "g" | "group" => Ok(ConversationKey::group(id)),
        other => Err(color_eyre::eyre::eyre!("Unknown kind: {}", other)),
    }
}

async fn open_conversation(session: &Arc<ChatSession<HttpApi>>) -> Result<()> {
    let kind = read_line("Kind (f/g): ")?;
    let id = read_line("Id: ")?;
    let key = read_key(&kind, &id)?;

    let messages = session.open_conversation(key).await?;
    if messages.is_empty() {
        println!("📭 No messages yet");
        return Ok(());
    }

    println!("\n💬 Messages ({}):", messages.len());
    for message in messages.iter().rev().take(20).rev() {
        let direction = if message.sender_id == session.self_id() {
            "→"
        } else {
            "←"
        };
        let sender = session.profiles.display_name(message.sender_id).await;
        println!(
            "  {} #{} [{}] {}: {}",
            direction,
            message.id,
            message.sent_at.format("%H:%M"),
            sender,
            message.content
        );
    }
    Ok(())
}

async fn send_message(session: &Arc<ChatSession<HttpApi>>) -> Result<()> {
    let key = match session.current_chat().await {
        Some(key) => key,
        None => {
            let kind = read_line("Kind (f/g): ")?;
            let id = read_line("Id: ")?;
            read_key(&kind, &id)?
        }
    };
    let content = read_line("Message: ")?;
    if content.is_empty() {
        println!("❌ Empty message");
        return Ok(());
    }

    let draft = ChatSession::<HttpApi>::draft_for(key, content);
    let message = session.send(&draft).await?;
    println!("📤 Sent as #{}", message.id);
    Ok(())
}

async fn toggle_pin(session: &Arc<ChatSession<HttpApi>>) -> Result<()> {
    let kind = read_line("Kind (f/g): ")?;
    let id = read_line("Id: ")?;
    let key = read_key(&kind, &id)?;

    match session.toggle_pin(key).await? {
        Some(true) => println!("📌 Pinned"),
        Some(false) => println!("📎 Unpinned"),
        None => println!("❌ No such conversation"),
    }
    Ok(())
}

async fn retract_message(session: &Arc<ChatSession<HttpApi>>) -> Result<()> {
    let id: i64 = read_line("Message id: ")?.parse().wrap_err("Not a numeric id")?;
    session.retract(id).await?;
    println!("↩️  Retracted #{}", id);
    Ok(())
}

async fn forward_message(session: &Arc<ChatSession<HttpApi>>) -> Result<()> {
    let id: i64 = read_line("Message id: ")?.parse().wrap_err("Not a numeric id")?;
    let kind = read_line("To kind (f/g): ")?;
    let target = read_line("To id: ")?;
    let key = read_key(&kind, &target)?;

    match session.forward(id, key).await? {
        Some(message) => println!("📤 Forwarded as #{}", message.id),
        None => println!("❌ No such message"),
    }
    Ok(())
}

async fn list_friends(session: &Arc<ChatSession<HttpApi>>) -> Result<()> {
    let friends = session.friends.friends().await;
    if friends.is_empty() {
        println!("📭 No friends yet");
        return Ok(());
    }

    println!("\n📇 Friends ({}):", friends.len());
    for friend in friends {
        let presence = if session.presence.is_online(friend.id).await {
            "🟢"
        } else {
            "⚪"
        };
        println!("  {} {} (id {})", presence, friend.username, friend.id);
    }
    Ok(())
}

async fn review_requests(session: &Arc<ChatSession<HttpApi>>) -> Result<()> {
    session.friends.refresh_pending().await?;
    let pending = session.friends.pending().await;
    if pending.is_empty() {
        println!("📭 No pending requests");
        return Ok(());
    }

    for request in pending {
        println!(
            "\n📨 Request #{} from {} (id {})",
            request.id, request.sender.username, request.sender.id
        );
        let answer = read_line("Accept? (y/n/skip): ")?;
        match answer.as_str() {
            "y" => {
                let friend = session.friends.accept(request.id).await?;
                session.profiles.record_friend(&friend).await;
                println!("✅ {} is now a friend", friend.username);
            }
            "n" => {
                session.friends.reject(request.id).await?;
                println!("🚫 Rejected");
            }
            _ => {}
        }
    }
    Ok(())
}

async fn add_friend(session: &Arc<ChatSession<HttpApi>>) -> Result<()> {
    let query = read_line("User id or username: ")?;
    let id: i64 = match query.parse() {
        Ok(id) => id,
        Err(_) => {
            let matches = session.api().search_users(&query).await?;
            if matches.is_empty() {
                println!("📭 No users matching '{}'", query);
                return Ok(());
            }
            println!("\n🔎 Matches:");
            for user in &matches {
                println!("  {} (id {})", user.username, user.id);
            }
            read_line("User id: ")?.parse().wrap_err("Not a numeric id")?
        }
    };
    session.friends.send_request(id).await?;
    println!("📨 Request sent");
    Ok(())
}

async fn manage_groups(session: &Arc<ChatSession<HttpApi>>) -> Result<()> {
    session.groups.refresh_all().await?;
    let mine = session.groups.mine().await;
    let all = session.groups.all().await;

    println!("\n👥 My groups ({}):", mine.len());
    for group in &mine {
        println!("  {} (id {})", group.name, group.id);
    }
    println!("👥 Discoverable ({}):", all.len());
    for group in all.iter().take(20) {
        println!("  {} (id {})", group.name, group.id);
    }

    let action = read_line("Action (create/join/leave/search/update/none): ")?;
    match action.as_str() {
        "create" => {
            let name = read_line("Group name: ")?;
            let group = session.groups.create(&name).await?;
            println!("✅ Created {} (id {})", group.name, group.id);
        }
        "join" => {
            let id: i64 = read_line("Group id: ")?.parse().wrap_err("Not a numeric id")?;
            session.groups.join(id).await?;
            println!("✅ Joined group {}", id);
        }
        "leave" => {
            let id: i64 = read_line("Group id: ")?.parse().wrap_err("Not a numeric id")?;
            session.leave_group(id).await?;
            println!("🚪 Left group {}", id);
        }
        "search" => {
            let name = read_line("Name: ")?;
            let matches = session.api().search_groups(&name).await?;
            if matches.is_empty() {
                println!("📭 No groups matching '{}'", name);
            }
            for group in matches {
                println!("  {} (id {})", group.name, group.id);
            }
        }
        "update" => {
            let id: i64 = read_line("Group id: ")?.parse().wrap_err("Not a numeric id")?;
            let name = read_line("New name (empty keeps current): ")?;
            let avatar = read_line("New avatar (empty keeps current): ")?;
            let update = GroupUpdate {
                id,
                name: (!name.is_empty()).then_some(name),
                avatar: (!avatar.is_empty()).then_some(avatar),
            };
            session.api().update_group_info(&update).await?;
            session.groups.refresh_mine().await?;
            println!("✅ Group updated");
        }
        _ => {}
    }
    Ok(())
}

async fn register(api: &HttpApi) -> Result<()> {
    let captcha = api.fetch_captcha().await?;
    println!("🔐 Captcha {} (base64 image): {}", captcha.id, captcha.image);
    let username = read_line("Username: ")?;
    let password = read_line("Password: ")?;
    let code = read_line("Captcha code: ")?;
    api.register(&username, &password, &captcha.id, &code).await?;
    println!("✅ Account created, log in to continue");
    Ok(())
}

async fn change_password(session: &Arc<ChatSession<HttpApi>>) -> Result<()> {
    let current = read_line("Current password: ")?;
    let new = read_line("New password: ")?;
    session.api().change_password(&current, &new).await?;
    println!("🔑 Password changed");
    Ok(())
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

use chatdesk::Client;
use chatdesk::config::{
    ClientConfig, ENV_ACK_TIMEOUT_MS, ENV_API_URL, ENV_SOCKET_URL, ENV_TOKEN, ENV_USER_ID,
};
use chatdesk::error::ConfigError;
use chatdesk::http::UreqHttpClient;
use chatdesk::transport::TokioWebSocketTransportFactory;
use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

// Terminal front-end for the operator console.
//
// Usage:
//   chatdesk --api-url http://localhost:3000/api --user-id op-1
//   chatdesk ... --search ana                  # filter the chat list
//   chatdesk ... --chat 42 --send "Hola"       # open chat 42 and reply
//   chatdesk ... --watch                       # follow live events until Ctrl-C

#[derive(Parser, Debug)]
#[command(name = "chatdesk", version, about = "Operator console for business chats")]
struct Args {
    /// Base URL of the REST API [env: CHATDESK_API_URL]
    #[arg(long)]
    api_url: Option<String>,

    /// Operator account id [env: CHATDESK_USER_ID]
    #[arg(long)]
    user_id: Option<String>,

    /// Socket.IO server, defaults to the API origin [env: CHATDESK_SOCKET_URL]
    #[arg(long)]
    socket_url: Option<String>,

    /// Bearer token [env: CHATDESK_TOKEN]
    #[arg(long)]
    token: Option<String>,

    /// Request acknowledgements and report messages not confirmed in time
    /// [env: CHATDESK_ACK_TIMEOUT_MS]
    #[arg(long)]
    ack_timeout_ms: Option<u64>,

    /// Only list chats whose name contains this text
    #[arg(short, long)]
    search: Option<String>,

    /// Chat to open
    #[arg(short, long)]
    chat: Option<String>,

    /// Text to send to the opened chat
    #[arg(long, requires = "chat")]
    send: Option<String>,

    /// Keep running and log server events
    #[arg(short, long)]
    watch: bool,
}

impl Args {
    /// Flags win over `CHATDESK_*` environment variables.
    fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let flags = [
            (ENV_API_URL, self.api_url.clone()),
            (ENV_USER_ID, self.user_id.clone()),
            (ENV_SOCKET_URL, self.socket_url.clone()),
            (ENV_TOKEN, self.token.clone()),
            (ENV_ACK_TIMEOUT_MS, self.ack_timeout_ms.map(|ms| ms.to_string())),
        ];
        ClientConfig::from_lookup(|key| {
            flags
                .iter()
                .find(|(name, _)| *name == key)
                .and_then(|(_, value)| value.clone())
                .or_else(|| std::env::var(key).ok())
        })
    }
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        if let Err(e) = run(args).await {
            error!("{e:#}");
        }
    });
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.client_config()?;
    let transport_factory = TokioWebSocketTransportFactory::new(config.websocket_url());

    let client = Client::builder()
        .with_config(config)
        .with_transport_factory(Arc::new(transport_factory))
        .with_http_client(Arc::new(UreqHttpClient::new()))
        .build()?;

    let mut connected = client.event_bus().connected.subscribe();
    if let Err(e) = client.connect().await {
        warn!("Real-time channel unavailable, continuing without it: {e}");
    }

    if let Some(search) = &args.search {
        client.set_search(search.clone()).await;
    }

    if let Some(chat_id) = &args.chat {
        let log = client.open_chat(chat_id).await?;
        info!(
            "Chat {chat_id}: {} messages, assistant {}",
            log.messages.len(),
            if log.thread.enabled { "on" } else { "off" }
        );
        for message in log.messages.iter().rev().take(10).rev() {
            info!("  [{:?}] {}", message.role, message.preview_text());
        }

        if let Some(text) = &args.send {
            if tokio::time::timeout(Duration::from_secs(10), connected.recv())
                .await
                .is_err()
            {
                warn!("Not connected yet, the message may be dropped");
            }
            let message = client.send_text(text).await?;
            info!("Sent {} to chat {chat_id}", message.id);
        }
    }

    print_chats(&client).await?;

    if args.watch {
        watch(&client).await;
    }

    client.disconnect().await;
    Ok(())
}

async fn print_chats(client: &Client) -> anyhow::Result<()> {
    let rows = client.load_chats().await?;
    info!("{} chats", rows.len());
    for row in rows {
        let marker = if row.selected { ">" } else { " " };
        let unread = if row.unread > 0 {
            format!(" ({})", row.unread)
        } else {
            String::new()
        };
        info!("{marker} {}{unread}: {}", row.title, row.preview);
    }
    Ok(())
}

async fn watch(client: &Client) {
    let bus = client.event_bus();
    let mut inbound = bus.inbound.subscribe();
    let mut notices = bus.notice.subscribe();
    let mut disconnected = bus.disconnected.subscribe();

    info!("Watching for events, press Ctrl-C to exit");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Ok(event) = inbound.recv() => {
                info!("<- {} {}", event.name, event.data);
                if event.conversation_id().is_some()
                    && let Err(e) = print_chats(client).await
                {
                    warn!("Failed to refresh chats: {e}");
                }
            }
            Ok(notice) = notices.recv() => {
                warn!("{}: {}", notice.title, notice.description);
            }
            Ok(_) = disconnected.recv() => {
                warn!("Event channel closed");
                break;
            }
        }
    }
}

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::{
    parse_keywords, Backend, ConfigStore, ForwardingConfig, DEFAULT_DELAY_SECONDS,
    DEFAULT_DESTINATION,
};
use crate::error::ForwarderError;
use crate::forward::ForwardHandler;
use crate::platform::bot::BotConnector;
use crate::platform::user::UserConnector;
use crate::platform::{ChatRef, ChatSummary, Connector, Login};
use crate::prompt::Prompt;

pub const ENV_CODE: &str = "TELEGRAM_CODE";
pub const ENV_PASSWORD: &str = "TELEGRAM_PASSWORD";

/// Interactive entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Menu,
    Setup,
    ListChats,
    Start,
}

/// Exponential restart delay for the 24/7 runner.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

/// Login details for `phone`, with code and password pre-answered from
/// the environment when set.
pub fn login_from_env(phone: &str, env: &dyn Fn(&str) -> Option<String>) -> Login {
    let get = |name: &str| env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    Login {
        phone: phone.to_string(),
        code: get(ENV_CODE),
        password: get(ENV_PASSWORD),
    }
}

pub fn login_for(backend: &Backend, env: &dyn Fn(&str) -> Option<String>) -> Login {
    match backend {
        Backend::User(credentials) => login_from_env(&credentials.phone, env),
        Backend::Bot(_) => login_from_env("", env),
    }
}

/// Resolve both ends and keep forwarding until the subscription ends.
pub async fn start_forwarding<C: Connector>(
    connector: Arc<C>,
    config: &ForwardingConfig,
) -> Result<(), ForwarderError> {
    let source_id = config.source_chat_id.as_deref().ok_or_else(|| {
        ForwarderError::Config("source_chat_id is not configured; run setup first".into())
    })?;
    let source = connector.resolve_entity(&ChatRef::parse(source_id)?).await?;
    let destination = connector
        .resolve_entity(&ChatRef::parse(&config.destination_chat_id)?)
        .await?;

    let source_label = source
        .id
        .map_or_else(|| source.chat.to_string(), |id| id.to_string());
    info!("Monitoring messages from {} ({})", source.name, source_label);
    if config.keywords.is_empty() {
        info!("No keywords filter, forwarding all messages");
    } else {
        info!(
            "Filtering for messages containing any of these keywords: {}",
            config.keywords.join(", ")
        );
    }
    info!("Forwarding to {} ({})", destination.name, destination.chat);
    info!(
        "Media forwarding: {}",
        if config.forward_media {
            "Enabled"
        } else {
            "Disabled"
        }
    );
    info!("Delay between forwards: {} seconds", config.delay_seconds);
    info!("Press Ctrl+C to stop");

    let handler = Arc::new(ForwardHandler::new(
        connector.clone(),
        destination,
        config.keywords.clone(),
        config.forward_media,
        Duration::from_secs(config.delay_seconds),
    ));
    connector.subscribe(&source, handler).await
}

async fn forward_with<C: Connector>(
    connector: Arc<C>,
    login: &Login,
    prompt: &mut (dyn Prompt + Send),
    config: &ForwardingConfig,
) -> Result<(), ForwarderError> {
    let me = connector.authenticate(login, prompt).await?;
    info!("Connected to Telegram as {} ({} account)", me, connector.name());
    let result = start_forwarding(connector.clone(), config).await;
    connector.disconnect().await;
    result
}

/// One connect → login → forward cycle.
pub async fn run_session(
    backend: &Backend,
    session_path: &Path,
    login: &Login,
    prompt: &mut (dyn Prompt + Send),
    config: &ForwardingConfig,
) -> Result<(), ForwarderError> {
    match backend {
        Backend::User(credentials) => {
            let connector = Arc::new(UserConnector::connect(credentials, session_path).await?);
            forward_with(connector, login, prompt, config).await
        }
        Backend::Bot(token) => {
            forward_with(Arc::new(BotConnector::new(token)), login, prompt, config).await
        }
    }
}

/// Keep sessions running, restarting after connection failures. Only
/// configuration and authentication problems stop the loop.
pub async fn run_forever(
    backend: &Backend,
    session_path: &Path,
    login: &Login,
    prompt: &mut (dyn Prompt + Send),
    config: &ForwardingConfig,
) -> Result<(), ForwarderError> {
    let mut backoff = Backoff::default();
    loop {
        let started = Instant::now();
        match run_session(backend, session_path, login, prompt, config).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() => {
                if started.elapsed() > backoff.max() {
                    backoff.reset();
                }
                let delay = backoff.next_delay();
                warn!("Session ended: {}. Restarting in {}s", e, delay.as_secs());
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupt received, exiting");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Connect with `backend` and run one interactive entry point.
pub async fn run_interactive(
    mode: Mode,
    backend: &Backend,
    session_path: &Path,
    store: &mut ConfigStore,
    login: &Login,
    prompt: &mut (dyn Prompt + Send),
) -> Result<()> {
    match backend {
        Backend::User(credentials) => {
            let connector = Arc::new(UserConnector::connect(credentials, session_path).await?);
            interact(mode, connector, store, login, prompt).await
        }
        Backend::Bot(token) => {
            interact(mode, Arc::new(BotConnector::new(token)), store, login, prompt).await
        }
    }
}

async fn interact<C: Connector>(
    mode: Mode,
    connector: Arc<C>,
    store: &mut ConfigStore,
    login: &Login,
    prompt: &mut (dyn Prompt + Send),
) -> Result<()> {
    let me = connector.authenticate(login, prompt).await?;
    println!("Connected to Telegram as {}", me);

    let result = match mode {
        Mode::Menu => menu(connector.clone(), store, prompt).await,
        Mode::Setup => setup_forwarding(connector.as_ref(), store, prompt)
            .await
            .map(|_| ()),
        Mode::ListChats => print_chats(connector.as_ref()).await,
        Mode::Start => {
            let config = store.forwarding()?;
            start_forwarding(connector.clone(), &config)
                .await
                .map_err(Into::into)
        }
    };
    connector.disconnect().await;
    result
}

pub async fn menu<C: Connector>(
    connector: Arc<C>,
    store: &mut ConfigStore,
    prompt: &mut (dyn Prompt + Send),
) -> Result<()> {
    loop {
        println!("\n===== Telegram Auto Forwarder =====");
        println!("1. List all chats");
        println!("2. Setup forwarding");
        println!("3. Start forwarding");
        println!("4. Exit");

        let choice = prompt.ask("\nEnter your choice (1-4): ")?;
        match choice.as_str() {
            "1" => {
                if let Err(e) = print_chats(connector.as_ref()).await {
                    error!("Failed to list chats: {:#}", e);
                }
            }
            "2" => {
                setup_forwarding(connector.as_ref(), store, prompt).await?;
            }
            "3" => match store.forwarding() {
                Ok(config) if config.source_chat_id.is_some() => {
                    if let Err(e) = start_forwarding(connector.clone(), &config).await {
                        error!("Forwarding stopped: {}", e);
                    }
                }
                Ok(_) => {
                    println!("Forwarding not configured correctly.");
                    println!("Please choose option 2 to setup forwarding first.");
                }
                Err(e) => println!("Invalid forwarding configuration: {}", e),
            },
            "4" => {
                println!("Exiting...");
                return Ok(());
            }
            _ => println!("Invalid choice. Please try again."),
        }
    }
}

pub fn format_chat_table(chats: &[ChatSummary]) -> String {
    let rule = "=".repeat(70);
    let divider = "-".repeat(70);
    let mut out = format!(
        "{rule}\n{:<10} | {:<30} | {:<15} | {:<15}\n{rule}\n",
        "Type", "Name", "ID", "Username"
    );
    for chat in chats {
        let name: String = chat.name.chars().take(30).collect();
        let username = chat
            .username
            .as_deref()
            .map(|u| format!("@{}", u))
            .unwrap_or_else(|| "None".to_string());
        out.push_str(&format!(
            "{:<10} | {:<30} | {:<15} | {:<15}\n{divider}\n",
            chat.kind.to_string(),
            name,
            chat.id,
            username
        ));
    }
    out
}

pub async fn print_chats<C: Connector>(connector: &C) -> Result<()> {
    println!("\nFetching your chats, please wait...\n");
    let chats = connector.list_chats().await?;
    print!("{}", format_chat_table(&chats));
    println!("\nTip: for public channels/groups with usernames, you can use either the numeric ID");
    println!("     or the username format (e.g. @channelname) as your source chat ID.");
    Ok(())
}

async fn describe<C: Connector>(connector: &C, raw: &str) {
    let resolved = match ChatRef::parse(raw) {
        Ok(chat) => connector.resolve_entity(&chat).await,
        Err(e) => Err(e),
    };
    match resolved {
        Ok(entity) => println!("  Chat name: {}", entity.name),
        Err(e) => println!("  Unable to get chat name: {}", e),
    }
}

fn ask_chat(prompt: &mut (dyn Prompt + Send), question: &str) -> Result<Option<String>> {
    let answer = prompt.ask(question)?;
    match ChatRef::parse(&answer) {
        Ok(_) => Ok(Some(answer)),
        Err(e) => {
            println!("{}", e);
            Ok(None)
        }
    }
}

/// Walk through every forwarding setting, showing the current value and
/// asking whether to change it, then persist the result.
pub async fn setup_forwarding<C: Connector>(
    connector: &C,
    store: &mut ConfigStore,
    prompt: &mut (dyn Prompt + Send),
) -> Result<ForwardingConfig> {
    let mut config = store.forwarding().unwrap_or_else(|e| {
        warn!("Resetting invalid forwarding settings: {}", e);
        ForwardingConfig::default()
    });
    let first_run = config.source_chat_id.is_none();

    println!("\n===== Forwarding Setup =====");

    let change_source = match &config.source_chat_id {
        Some(current) => {
            println!("Current source chat ID: {}", current);
            describe(connector, current).await;
            prompt.confirm("Change source chat? (y/n): ")?
        }
        None => true,
    };
    if change_source {
        if let Some(source) =
            ask_chat(prompt, "Enter source chat ID (where to monitor messages from): ")?
        {
            config.source_chat_id = Some(source);
        }
    }

    println!("Current destination chat ID: {}", config.destination_chat_id);
    describe(connector, &config.destination_chat_id).await;
    if prompt.confirm("Change destination chat? (y/n, default is @INRDealsBot): ")? {
        let answer = prompt.ask_or(
            "Enter destination chat ID (where to forward messages to, default @INRDealsBot): ",
            DEFAULT_DESTINATION,
        )?;
        if ChatRef::parse(&answer).is_ok() {
            config.destination_chat_id = answer;
        }
    }

    let change_keywords = if first_run {
        true
    } else {
        let current = if config.keywords.is_empty() {
            "None (forwarding all messages)".to_string()
        } else {
            config.keywords.join(", ")
        };
        println!("Current keywords filter: {}", current);
        prompt.confirm("Change keywords? (y/n): ")?
    };
    if change_keywords {
        let raw = prompt.ask(
            "Enter keywords to filter (comma-separated, leave empty to forward all messages): ",
        )?;
        config.keywords = parse_keywords(&raw);
    }

    println!("Forward media with captions: {}", config.forward_media);
    if prompt.confirm("Change media forwarding setting? (y/n): ")? {
        let answer = prompt.ask("Forward media with captions? (y/n, default y): ")?;
        config.forward_media = !matches!(answer.to_ascii_lowercase().as_str(), "n" | "no");
    }

    println!(
        "Current delay between forwards (seconds): {}",
        config.delay_seconds
    );
    if prompt.confirm("Change delay setting? (y/n): ")? {
        let raw = prompt.ask_or(
            "Enter delay between forwards in seconds (default: 5): ",
            &DEFAULT_DELAY_SECONDS.to_string(),
        )?;
        config.delay_seconds = raw.parse().unwrap_or_else(|_| {
            println!("Invalid input. Using default delay of 5 seconds.");
            DEFAULT_DELAY_SECONDS
        });
    }

    store.set_forwarding(&config);
    store.save()?;
    println!(
        "\nForwarding configuration saved to {}",
        store.path().display()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{message, Call, MockConnector};
    use crate::platform::ChatKind;
    use crate::prompt::Scripted;
    use std::sync::Mutex;

    fn empty_store(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::load(&dir.path().join("config.toml")).unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(30));
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 30, 30]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_login_reads_code_and_password() {
        let env = |name: &str| match name {
            ENV_CODE => Some(" 12345 ".to_string()),
            ENV_PASSWORD => Some(String::new()),
            _ => None,
        };
        let login = login_from_env("+1555", &env);
        assert_eq!(login.phone, "+1555");
        assert_eq!(login.code.as_deref(), Some("12345"));
        assert_eq!(login.password, None);
    }

    #[test]
    fn test_chat_table_rows() {
        let table = format_chat_table(&[ChatSummary {
            kind: ChatKind::Channel,
            name: "Daily Deals and Offers From Everywhere".to_string(),
            id: 1234567,
            username: Some("dailydeals".to_string()),
        }]);
        assert!(table.contains("Type       | Name"));
        assert!(table.contains("Channel    | Daily Deals and Offers From Ev |"));
        assert!(table.contains("@dailydeals"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_forwarding_filters_stream() {
        let connector = Arc::new(MockConnector {
            inbox: Mutex::new(vec![
                message(Some("Big SALE today"), false),
                message(Some("weather report"), false),
                message(None, true),
                message(Some("discount on shoes"), true),
            ]),
            ..Default::default()
        });
        let config = ForwardingConfig {
            source_chat_id: Some("-1001234567".to_string()),
            keywords: vec!["sale".to_string(), "discount".to_string()],
            ..Default::default()
        };

        start_forwarding(connector.clone(), &config).await.unwrap();

        assert_eq!(
            connector.calls(),
            vec![
                Call::Text {
                    destination: "@INRDealsBot".to_string(),
                    text: "Big SALE today".to_string()
                },
                Call::NativeForward {
                    destination: "@INRDealsBot".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_start_forwarding_requires_source() {
        let connector = Arc::new(MockConnector::default());
        let err = start_forwarding(connector, &ForwardingConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ForwarderError::Config(_)));
    }

    #[tokio::test]
    async fn test_first_setup_persists_answers() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        let connector = MockConnector::default();
        let mut prompt = Scripted::new(&[
            "@deals",         // source
            "n",              // keep destination
            "sale, discount", // keywords
            "y",              // change media setting
            "n",              // no media
            "y",              // change delay
            "abc",            // invalid, falls back to 5
        ]);

        let config = setup_forwarding(&connector, &mut store, &mut prompt)
            .await
            .unwrap();

        let expected = ForwardingConfig {
            source_chat_id: Some("@deals".to_string()),
            destination_chat_id: "@INRDealsBot".to_string(),
            keywords: vec!["sale".to_string(), "discount".to_string()],
            forward_media: false,
            delay_seconds: 5,
        };
        assert_eq!(config, expected);
        let reloaded = ConfigStore::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(reloaded.forwarding().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_setup_keeps_values_when_declined() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        let existing = ForwardingConfig {
            source_chat_id: Some("-100999".to_string()),
            keywords: vec!["deal".to_string()],
            delay_seconds: 2,
            ..Default::default()
        };
        store.set_forwarding(&existing);
        let mut prompt = Scripted::new(&["n", "n", "n", "n", "n"]);

        let config = setup_forwarding(&MockConnector::default(), &mut store, &mut prompt)
            .await
            .unwrap();
        assert_eq!(config, existing);
        assert_eq!(prompt.asked.len(), 5);
    }

    #[tokio::test]
    async fn test_setup_accepts_no_for_media() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        store.set_forwarding(&ForwardingConfig {
            source_chat_id: Some("@deals".to_string()),
            ..Default::default()
        });
        let mut prompt = Scripted::new(&["n", "n", "n", "y", "No", "n"]);

        let config = setup_forwarding(&MockConnector::default(), &mut store, &mut prompt)
            .await
            .unwrap();
        assert!(!config.forward_media);
    }

    #[tokio::test]
    async fn test_menu_rejects_start_without_setup() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(&dir);
        let connector = Arc::new(MockConnector::default());
        let mut prompt = Scripted::new(&["9", "3", "4"]);

        menu(connector.clone(), &mut store, &mut prompt).await.unwrap();
        assert!(connector.calls().is_empty());
        assert_eq!(prompt.asked.len(), 3);
    }
}

use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use ferry_core::{
    cache::RecentMessages,
    commands::CommandRouter,
    config::Config,
    domain::{ChatId, Role},
    download::{Downloader, FileSource},
    formatting::escape_html,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    plugins::Plugin,
};

use crate::{handlers, TelegramFileSource, TelegramMessenger};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub files: Arc<dyn FileSource>,
    pub router: Arc<CommandRouter>,
    pub recent: Arc<RecentMessages>,
    pub downloader: Arc<Downloader>,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        messenger: Arc<dyn MessagingPort>,
        files: Arc<dyn FileSource>,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> ferry_core::Result<Self> {
        let mut router = CommandRouter::new(Arc::new(cfg.user_roles.clone()));
        for plugin in plugins {
            info!(plugin = plugin.name(), "installing plugin commands");
            router.register_plugin(plugin)?;
        }

        Ok(Self {
            recent: Arc::new(RecentMessages::new(cfg.recent_message_capacity)),
            downloader: Arc::new(Downloader::new(cfg.download_dir.clone(), cfg.max_file_size)),
            router: Arc::new(router),
            cfg,
            messenger,
            files,
        })
    }
}

pub async fn run_polling(cfg: Arc<Config>, plugins: Vec<Arc<dyn Plugin>>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "ferry started"),
        Err(e) => warn!(error = %e, "get_me failed; continuing"),
    }
    info!(
        download_dir = %cfg.download_dir.display(),
        configured_users = cfg.user_roles.len(),
        "runtime configuration"
    );

    // RetryAfter is still retried once inside the Telegram messenger.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));
    // No total timeout: large files legitimately take minutes.
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    let files: Arc<dyn FileSource> = Arc::new(TelegramFileSource::new(bot.clone(), http));

    let state = Arc::new(AppState::new(cfg.clone(), messenger.clone(), files, plugins)?);

    if let Some(admin) = cfg.user_roles.first_with(Role::Admin) {
        let text = startup_notice(&cfg, &state.router);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            if let Err(e) = messenger.send_html(ChatId(admin.0), &text).await {
                warn!(error = %e, "startup notification failed");
            }
        });
    }

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            tracing::debug!(update_id = ?upd.id, "unhandled update");
        })
        .build()
        .dispatch()
        .await;

    info!("dispatcher stopped");
    Ok(())
}

fn startup_notice(cfg: &Config, router: &CommandRouter) -> String {
    format!(
        "<b>ferry is running</b>\n\nDownloads: <code>{}</code>\nCommands available to admins: {}",
        escape_html(&cfg.download_dir.display().to_string()),
        router
            .specs()
            .iter()
            .filter(|s| s.roles.contains(&Role::Admin))
            .count()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::security::RoleMap;

    fn config() -> Config {
        Config::from_lookup(|k| match k {
            "TELEGRAM_BOT_TOKEN" => Some("t".to_string()),
            "DOWNLOAD_DIR" => Some("/srv/<media>".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn startup_notice_escapes_paths() {
        let router = CommandRouter::new(Arc::new(RoleMap::default()));
        let text = startup_notice(&config(), &router);
        assert!(text.contains("<code>/srv/&lt;media&gt;</code>"));
        assert!(text.ends_with("Commands available to admins: 3"));
    }
}

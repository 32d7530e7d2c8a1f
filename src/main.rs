use std::sync::Arc;

use teloxide::prelude::*;
use tg_spam_core::clock::SystemClock;
use tg_spam_core::config::Config;
use tg_spam_core::context::AppContext;
use tg_spam_core::detector::RspamdDetector;
use tg_spam_core::locator::Locator;
use tg_spam_core::platform::TeloxidePlatform;
use tg_spam_core::reports::ReportsStore;
use tg_spam_core::super_users::SuperUsers;
use tg_spam_core::{db, dispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    log::info!("starting tg-spam-core...");

    let config = Config::from_env()?;
    let pool = db::connect(&config.database_path).await?;

    let bot = Bot::new(config.bot_token.clone());
    let platform: Arc<dyn tg_spam_core::platform::PlatformClient> = Arc::new(TeloxidePlatform::new(bot.clone()));
    let detector: Arc<dyn tg_spam_core::detector::SpamDetector> = Arc::new(RspamdDetector::new(config.rspamd_url.clone()));
    let clock: Arc<dyn tg_spam_core::clock::Clock> = Arc::new(SystemClock);

    let locator = Locator::new(pool.clone(), clock.clone(), "default", config.ttl, config.min_size);
    let reports = ReportsStore::new(pool, clock.clone(), "default");
    let super_users = SuperUsers::new();

    let ctx = Arc::new(AppContext {
        platform,
        detector,
        locator,
        reports,
        clock,
        config: config.clone(),
        super_users,
    });

    if !config.startup_msg.is_empty() {
        if let Err(e) =
            tg_spam_core::markdown::send_with_fallback(ctx.platform.as_ref(), config.admin_chat_id, &config.startup_msg, None)
                .await
        {
            log::warn!("failed to post startup message: {e}");
        }
    }

    dispatcher::run(bot, ctx).await
}

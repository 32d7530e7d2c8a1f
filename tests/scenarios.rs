//! End-to-end scenarios (spec §8), composed at the `AppContext` level: a
//! forwarded missed-spam report, the unban confirmation dialog, a
//! threshold-triggered user report, a rate-limited reporter, and a direct
//! admin `/ban` command. Each wires a real in-memory SQLite pool with
//! `MockPlatform`/`MockDetector`/`FixedClock`, the same recording-test-double
//! pattern the unit tests in each module use.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tg_spam_core::clock::FixedClock;
use tg_spam_core::commands::{self, CommandTrigger, DirectCommand};
use tg_spam_core::config::Config;
use tg_spam_core::context::AppContext;
use tg_spam_core::db::connect_in_memory;
use tg_spam_core::detector::mock::MockDetector;
use tg_spam_core::detector::{DetectMeta, DetectRequest, DetectResult};
use tg_spam_core::locator::{CheckResult, Locator};
use tg_spam_core::platform::mock::MockPlatform;
use tg_spam_core::platform::PlatformOp;
use tg_spam_core::reports::ReportsStore;
use tg_spam_core::super_users::SuperUsers;
use tg_spam_core::{admin_dialog, user_reports};

fn test_config() -> Config {
    Config {
        bot_token: "t".into(),
        database_path: ":memory:".into(),
        rspamd_url: "http://127.0.0.1:11333".into(),
        prim_chat_id: -100,
        admin_chat_id: -200,
        super_users: vec![],
        training_mode: false,
        dry: false,
        soft_ban_mode: false,
        keep_user: true,
        ttl: StdDuration::from_secs(3600),
        min_size: 1000,
        report_threshold: 3,
        report_rate_limit: 5,
        report_rate_period: StdDuration::from_secs(3600),
        aggressive_cleanup: false,
        aggressive_cleanup_limit: 50,
        warn_msg: "this looks like spam, please behave".into(),
        startup_msg: "tg-spam is online".into(),
        suppress_join_message: true,
        idle_duration: StdDuration::from_secs(30),
    }
}

async fn build_ctx() -> (AppContext, Arc<MockPlatform>, Arc<MockDetector>) {
    let pool = connect_in_memory().await.unwrap();
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let platform = Arc::new(MockPlatform::new());
    let detector = Arc::new(MockDetector::new());

    let ctx = AppContext {
        platform: platform.clone(),
        detector: detector.clone(),
        locator: Locator::new(pool.clone(), clock.clone(), "default", StdDuration::from_secs(3600), 1000),
        reports: ReportsStore::new(pool, clock.clone(), "default"),
        clock,
        config: test_config(),
        super_users: SuperUsers::new(),
    };
    (ctx, platform, detector)
}

/// Scenario: a classifier-missed spam message gets forwarded into the admin
/// chat and flagged. The forwarded-message handler bans the original sender
/// and posts a notification with an inline keyboard (spec §4.4.1, §8).
#[tokio::test]
async fn forwarded_spam_is_banned_and_reported() {
    let (ctx, platform, detector) = build_ctx().await;
    ctx.locator.add_message("free bitcoin click here", -100, 42, "scammer", 555).await.unwrap();
    detector.set_verdict(
        "free bitcoin click here",
        DetectResult { spam: true, checks: vec![CheckResult { name: "bayes".into(), spam: true, details: "0.9".into() }] },
    );

    admin_dialog::handle_forwarded_message(&ctx, "moderator", true, "free bitcoin click here").await.unwrap();

    let calls = platform.calls();
    assert!(calls.iter().any(|c| matches!(c, PlatformOp::DeleteMessage { message_id: 555, .. })));
    assert!(calls.iter().any(|c| matches!(c, PlatformOp::BanChatMember { user_id: 42, .. })));
    assert_eq!(detector.spam_updates.lock().unwrap().as_slice(), ["free bitcoin click here"]);
    assert_eq!(ctx.locator.spam(42).await.unwrap().checks.len(), 1);
}

/// Scenario: the admin presses `?` to ask for unban confirmation, then `+`
/// is never pressed -- instead the real unban confirmation comes through,
/// which must unban, whitelist the user with the detector, and feed the
/// recovered original text back as a ham sample (spec §4.4.2, §8).
#[tokio::test]
async fn ask_then_confirm_unban_flow() {
    let (ctx, platform, detector) = build_ctx().await;
    ctx.locator.add_message("hello world", -100, 42, "alice", 555).await.unwrap();

    // Stands in for the rendered ban notification a real forwarded-message
    // handler would have posted; its shape (header + TEXT_MARKER + original
    // text) is what `extract_marked_text` parses back out on unban.
    let notification_text = "banned [alice](tg://user?id=42)\n\n> hello world";
    let data = tg_spam_core::callback::CallbackAction::AskUnban { id: 42, msg_id: 555 }.to_data();
    admin_dialog::handle_callback(&ctx, -200, "q1", 777, notification_text, "moderator", &data).await.unwrap();
    assert!(platform.calls().iter().any(|c| matches!(c, PlatformOp::EditMessageReplyMarkup { .. })));

    let confirm_data = tg_spam_core::callback::CallbackAction::ConfirmUnban { id: 42, msg_id: 555 }.to_data();
    admin_dialog::handle_callback(&ctx, -200, "q2", 777, notification_text, "moderator", &confirm_data).await.unwrap();

    assert!(platform.calls().iter().any(|c| matches!(c, PlatformOp::UnbanChatMember { user_id: 42, .. })));
    assert!(detector.approved.lock().unwrap().contains(&42));
    assert_eq!(detector.ham_updates.lock().unwrap().as_slice(), ["hello world"]);
}

/// Scenario: three distinct reporters flag the same message; the third
/// crosses the report threshold and triggers exactly one admin notification
/// (spec §4.5, §8).
#[tokio::test]
async fn third_reporter_crosses_threshold() {
    let (ctx, platform, _detector) = build_ctx().await;

    for reporter in [1_i64, 2, 3] {
        let trigger = user_reports::ReportTrigger {
            reporter_user_id: reporter,
            reporter_user_name: format!("reporter{reporter}"),
            reported_user_id: Some(99),
            reported_user_name: "spammer".into(),
            msg_id: 500,
            chat_id: -100,
            msg_text: "buy crypto now".into(),
            command_msg_id: 100 + reporter,
        };
        user_reports::handle_report(&ctx, trigger).await.unwrap();
    }

    let sends = platform.calls().into_iter().filter(|c| matches!(c, PlatformOp::SendMessage { .. })).count();
    assert_eq!(sends, 1, "exactly one admin notification should fire once the threshold is crossed");

    let rows = ctx.reports.get_by_message(500, -100).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.notification_sent));
}

/// Scenario: a reporter exceeding the per-reporter rate limit is rejected
/// and their `/report` command is deleted, but earlier reports on other
/// messages are unaffected (spec §4.5, §8).
#[tokio::test]
async fn rate_limited_reporter_is_rejected() {
    let (ctx, platform, _detector) = build_ctx().await;

    for msg_id in [501_i64, 502] {
        let trigger = user_reports::ReportTrigger {
            reporter_user_id: 7,
            reporter_user_name: "serial_reporter".into(),
            reported_user_id: Some(99),
            reported_user_name: "spammer".into(),
            msg_id,
            chat_id: -100,
            msg_text: "spam text".into(),
            command_msg_id: msg_id + 1000,
        };
        user_reports::handle_report(&ctx, trigger).await.unwrap();
    }

    let third = user_reports::ReportTrigger {
        reporter_user_id: 7,
        reporter_user_name: "serial_reporter".into(),
        reported_user_id: Some(99),
        reported_user_name: "spammer".into(),
        msg_id: 503,
        chat_id: -100,
        msg_text: "spam text".into(),
        command_msg_id: 1503,
    };
    let rate_limited_config = Config { report_rate_limit: 2, ..test_config() };
    let ctx2 = AppContext { config: rate_limited_config, ..ctx };
    let err = user_reports::handle_report(&ctx2, third).await.unwrap_err();
    assert!(err.is_guard());

    let deletes = platform.calls().into_iter().filter(|c| matches!(c, PlatformOp::DeleteMessage { message_id: 1503, .. })).count();
    assert_eq!(deletes, 1, "the rejected /report command must still be deleted for hygiene");
    assert!(ctx2.reports.get_by_message(503, -100).await.unwrap().is_empty());
}

/// Scenario: an admin replies `/ban` to a spam message. The message and
/// command are deleted, the sender is banned, and a summary is posted to
/// the admin chat (spec §4.4.3, §8).
#[tokio::test]
async fn direct_ban_command_deletes_and_bans() {
    let (ctx, platform, _detector) = build_ctx().await;

    let trigger = CommandTrigger {
        admin_user_name: "moderator".into(),
        command: DirectCommand::Ban,
        chat_id: -100,
        command_msg_id: 900,
        replied_msg_id: 901,
        replied_user_id: 55,
        replied_user_name: "spammer".into(),
        replied_text: "buy followers cheap".into(),
        replied_sender_chat_id: 0,
    };
    commands::handle_direct_command(&ctx, trigger).await.unwrap();

    let calls = platform.calls();
    assert!(calls.iter().any(|c| matches!(c, PlatformOp::DeleteMessage { message_id: 901, .. })));
    assert!(calls.iter().any(|c| matches!(c, PlatformOp::DeleteMessage { message_id: 900, .. })));
    assert!(calls.iter().any(|c| matches!(c, PlatformOp::BanChatMember { user_id: 55, .. })));
    assert!(calls.iter().any(|c| matches!(c, PlatformOp::SendMessage { chat_id: -200, .. })));
}

/// Sanity check that the classifier's `check` request shape round-trips
/// through `MockDetector` the way the dispatcher's primary-chat path builds
/// it (chat metadata, default `DetectMeta`).
#[tokio::test]
async fn detector_check_uses_defaulted_meta() {
    let (_ctx, _platform, detector) = build_ctx().await;
    detector.set_verdict("ok message", DetectResult { spam: false, checks: vec![] });

    let result = detector
        .check(DetectRequest {
            text: "ok message".into(),
            user_id: 1,
            user_name: "alice".into(),
            chat_id: -100,
            chat_name: "group".into(),
            meta: DetectMeta::default(),
        })
        .await
        .unwrap();

    assert!(!result.spam);
}

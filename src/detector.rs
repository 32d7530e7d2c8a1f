//! The detector interface (spec §6): the external spam-classification
//! engine. Out of scope per spec §1 is the classifier itself, so
//! `RspamdDetector` here is a thin adapter over `rspamd-client` (the
//! teacher's own dependency) reusing the email-envelope construction from
//! `handlers/scan_msg.rs`; approved-user bookkeeping is explicitly scoped to
//! the external detector too, so it's a minimal in-memory stand-in rather
//! than a real persistence layer.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rspamd_client::{config::Config as RspamdConfig, scan_async};

use crate::error::CoreResult;
use crate::locator::CheckResult;
use crate::utils::detect_local_ipv4;

/// Message metadata the classifier conditions on besides raw text (spec §6).
#[derive(Debug, Clone, Default)]
pub struct DetectMeta {
    pub image_count: u32,
    pub has_video: bool,
    pub has_audio: bool,
    pub has_forward: bool,
    pub has_keyboard: bool,
    pub link_count: u32,
    pub mention_count: u32,
}

#[derive(Debug, Clone)]
pub struct DetectRequest {
    pub text: String,
    pub user_id: i64,
    pub user_name: String,
    pub chat_id: i64,
    pub chat_name: String,
    pub meta: DetectMeta,
}

#[derive(Debug, Clone)]
pub struct DetectResult {
    pub spam: bool,
    pub checks: Vec<CheckResult>,
}

#[derive(Debug, Clone)]
pub struct ApprovedUserInfo {
    pub user_id: i64,
    pub user_name: String,
}

#[async_trait]
pub trait SpamDetector: Send + Sync {
    async fn check(&self, request: DetectRequest) -> CoreResult<DetectResult>;
    async fn update_spam(&self, text: &str) -> CoreResult<()>;
    async fn update_ham(&self, text: &str) -> CoreResult<()>;
    async fn add_approved_user(&self, info: ApprovedUserInfo) -> CoreResult<()>;
    async fn remove_approved_user(&self, id: i64) -> CoreResult<()>;
    async fn is_approved_user(&self, id: i64) -> CoreResult<bool>;
}

pub struct RspamdDetector {
    base_url: String,
    approved_users: Mutex<HashSet<i64>>,
}

impl RspamdDetector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), approved_users: Mutex::new(HashSet::new()) }
    }

    /// Wraps `text` as an RFC-2822-ish email so rspamd's MIME-oriented
    /// `scan_async` can classify it, the same envelope shape
    /// `handlers/scan_msg.rs` built.
    fn to_email(&self, req: &DetectRequest) -> String {
        let date = Utc::now().to_rfc2822();
        let ip = detect_local_ipv4().unwrap_or_else(|| "127.0.0.1/32".to_string());
        format!(
            "Received: from {ip} ({ip}) by localhost.localdomain with HTTP; {date}\r\n\
             Date: {date}\r\n\
             From: telegram{user_name}@example.com\r\n\
             To: telegram{chat_name}@example.com\r\n\
             Subject: Telegram message\r\n\
             Message-ID: <{user_id}.{chat_id}@example.com>\r\n\
             X-Telegram-User: {user_id}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/plain; charset=UTF-8\r\n\
             Content-Transfer-Encoding: 8bit\r\n\
             \r\n\
             {text}\r\n",
            date = date,
            ip = ip,
            user_name = req.user_name,
            chat_name = req.chat_id,
            user_id = req.user_id,
            chat_id = req.chat_id,
            text = req.text.replace('\n', "\r\n"),
        )
    }
}

#[async_trait]
impl SpamDetector for RspamdDetector {
    async fn check(&self, request: DetectRequest) -> CoreResult<DetectResult> {
        let email = self.to_email(&request);
        let options = RspamdConfig::builder().base_url(self.base_url.clone()).build();
        let reply = scan_async(&options, email)
            .await
            .map_err(|e| anyhow::anyhow!("rspamd scan failed: {e}"))?;

        let checks = reply
            .symbols
            .iter()
            .map(|(name, sym)| CheckResult {
                name: name.clone(),
                spam: sym.score > 0.0,
                details: sym.metric_score.to_string(),
            })
            .collect();

        Ok(DetectResult { spam: reply.action == "reject" || reply.score >= 15.0, checks })
    }

    async fn update_spam(&self, _text: &str) -> CoreResult<()> {
        // Feedback hook to rspamd's fuzzy/bayes learning endpoints; out of
        // scope here (see spec §1 -- classifier plugins are external).
        Ok(())
    }

    async fn update_ham(&self, _text: &str) -> CoreResult<()> {
        Ok(())
    }

    async fn add_approved_user(&self, info: ApprovedUserInfo) -> CoreResult<()> {
        self.approved_users.lock().unwrap().insert(info.user_id);
        Ok(())
    }

    async fn remove_approved_user(&self, id: i64) -> CoreResult<()> {
        self.approved_users.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn is_approved_user(&self, id: i64) -> CoreResult<bool> {
        Ok(self.approved_users.lock().unwrap().contains(&id))
    }
}

/// In-memory detector for tests: spam/ham decisions are wired in explicitly
/// instead of calling out to rspamd.
pub mod mock {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MockDetector {
        pub verdicts: Mutex<HashMap<String, DetectResult>>,
        pub approved: Mutex<HashSet<i64>>,
        pub spam_updates: Mutex<Vec<String>>,
        pub ham_updates: Mutex<Vec<String>>,
    }

    impl MockDetector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_verdict(&self, text: &str, result: DetectResult) {
            self.verdicts.lock().unwrap().insert(text.to_string(), result);
        }
    }

    #[async_trait]
    impl SpamDetector for MockDetector {
        async fn check(&self, request: DetectRequest) -> CoreResult<DetectResult> {
            Ok(self
                .verdicts
                .lock()
                .unwrap()
                .get(&request.text)
                .cloned()
                .unwrap_or(DetectResult { spam: false, checks: vec![] }))
        }

        async fn update_spam(&self, text: &str) -> CoreResult<()> {
            self.spam_updates.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn update_ham(&self, text: &str) -> CoreResult<()> {
            self.ham_updates.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn add_approved_user(&self, info: ApprovedUserInfo) -> CoreResult<()> {
            self.approved.lock().unwrap().insert(info.user_id);
            Ok(())
        }

        async fn remove_approved_user(&self, id: i64) -> CoreResult<()> {
            self.approved.lock().unwrap().remove(&id);
            Ok(())
        }

        async fn is_approved_user(&self, id: i64) -> CoreResult<bool> {
            Ok(self.approved.lock().unwrap().contains(&id))
        }
    }
}

//! SuperUsers set (spec §3 data model, §5): administrators allowed to run
//! admin commands and approve/reject reports. A super-user is, per the
//! glossary, a platform-level administrator of the *primary* chat (the group
//! being moderated) -- populated at startup from the configured
//! `super_users` list plus that group's administrator list, and held behind
//! a `RwLock` since the dispatcher loop refreshes it periodically while
//! handlers read it on every admin-gated request.

use std::collections::HashSet;
use std::sync::RwLock;

use crate::error::CoreResult;
use crate::platform::PlatformClient;

#[derive(Default)]
pub struct SuperUsers {
    ids: RwLock<HashSet<i64>>,
}

impl SuperUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-resolves the super-user set: numeric entries in `configured` are
    /// taken as-is; non-numeric entries are treated as `@username` chat
    /// refs and resolved via `get_chat`. The primary chat's administrators
    /// (spec §5: refreshed at startup) are always included.
    pub async fn refresh(
        &self,
        platform: &dyn PlatformClient,
        configured: &[String],
        prim_chat_id: i64,
    ) -> CoreResult<()> {
        let mut resolved = HashSet::new();

        for entry in configured {
            if let Ok(id) = entry.parse::<i64>() {
                resolved.insert(id);
                continue;
            }
            let chat_ref = if let Some(stripped) = entry.strip_prefix('@') {
                stripped
            } else {
                entry.as_str()
            };
            match platform.get_chat(&format!("@{chat_ref}")).await {
                Ok(chat) => {
                    resolved.insert(chat.id);
                }
                Err(e) => {
                    log::warn!("could not resolve configured super user {entry:?}: {e}");
                }
            }
        }

        for admin in platform.get_chat_administrators(prim_chat_id).await? {
            resolved.insert(admin.user_id);
        }

        *self.ids.write().unwrap() = resolved;
        Ok(())
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.read().unwrap().contains(&id)
    }

    pub fn insert(&self, id: i64) {
        self.ids.write().unwrap().insert(id);
    }

    pub fn snapshot(&self) -> HashSet<i64> {
        self.ids.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;
    use crate::platform::ChatMemberInfo;

    #[tokio::test]
    async fn refresh_merges_configured_ids_and_admins() {
        let platform = MockPlatform::new();
        *platform.administrators.lock().unwrap() =
            vec![ChatMemberInfo { user_id: 7, username: Some("mod".into()), is_admin: true }];

        let super_users = SuperUsers::new();
        super_users.refresh(&platform, &["42".to_string()], -100).await.unwrap();

        assert!(super_users.contains(42));
        assert!(super_users.contains(7));
        assert!(!super_users.contains(99));
    }

    #[tokio::test]
    async fn refresh_resolves_username_entries_via_get_chat() {
        let platform = MockPlatform::new();
        let super_users = SuperUsers::new();
        super_users.refresh(&platform, &["@alice".to_string()], -100).await.unwrap();

        // MockPlatform::get_chat parses the numeric tail; "@alice" doesn't
        // parse, so it resolves to id 0 -- this still exercises the
        // username-resolution branch distinct from the numeric-id branch.
        assert!(super_users.contains(0));
    }

    #[tokio::test]
    async fn refresh_replaces_rather_than_accumulates() {
        let platform = MockPlatform::new();
        let super_users = SuperUsers::new();
        super_users.insert(999);
        super_users.refresh(&platform, &["42".to_string()], -100).await.unwrap();

        assert!(!super_users.contains(999));
        assert!(super_users.contains(42));
    }
}

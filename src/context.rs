//! Shared collaborators for every handler module (`admin_dialog`, `ban`,
//! `user_reports`, `commands`, `dispatcher`). Spec §9 REDESIGN FLAGS calls
//! out the teacher's cyclic listener/admin-handler references as something
//! to replace; this is the replacement -- one struct of shared, acyclic
//! dependencies that every handler borrows instead of reaching back into
//! its caller.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::detector::SpamDetector;
use crate::locator::Locator;
use crate::platform::PlatformClient;
use crate::reports::ReportsStore;
use crate::super_users::SuperUsers;

pub struct AppContext {
    pub platform: Arc<dyn PlatformClient>,
    pub detector: Arc<dyn SpamDetector>,
    pub locator: Locator,
    pub reports: ReportsStore,
    pub clock: Arc<dyn Clock>,
    pub config: Config,
    pub super_users: SuperUsers,
}

impl AppContext {
    pub fn is_super_user(&self, id: i64) -> bool {
        self.super_users.contains(id)
    }
}

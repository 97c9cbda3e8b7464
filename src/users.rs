//! Users, groups and the credential store consulted by the worker.
//!
//! Persistence of users is out of scope for the server core; the
//! [`UserStore`] trait is the seam and [`MemoryUserStore`] is the in-memory
//! implementation fed from configuration.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::config::{GroupConfig, UserConfig};

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub guid: String,
    pub name: String,
    /// Lowercase hex SHA-256 digest of the password.
    pub password_hash: String,
    pub disabled: bool,
    /// Guids of the groups the user belongs to.
    pub groups: Vec<String>,
    pub bypass_limits: bool,
    /// `None` defers to the user's groups.
    pub max_sessions: Option<u32>,
    pub max_sessions_per_ip: Option<u32>,
    pub logins: u64,
    pub last_known_ip: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(guid: impl Into<String>, name: impl Into<String>, password: &str) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            password_hash: hash_password(password),
            disabled: false,
            groups: Vec::new(),
            bypass_limits: false,
            max_sessions: None,
            max_sessions_per_ip: None,
            logins: 0,
            last_known_ip: None,
            last_login: None,
        }
    }

    pub fn check_password(&self, password: &str) -> bool {
        hash_password(password).eq_ignore_ascii_case(&self.password_hash)
    }

    pub fn is_member_of(&self, group_guid: &str) -> bool {
        self.groups.iter().any(|g| g == group_guid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub guid: String,
    pub name: String,
    pub disabled: bool,
    pub bypass_limits: bool,
    pub max_sessions: Option<u32>,
    pub max_sessions_per_ip: Option<u32>,
}

impl From<GroupConfig> for Group {
    fn from(config: GroupConfig) -> Self {
        Self {
            guid: config.guid,
            name: config.name,
            disabled: config.disabled,
            bypass_limits: config.bypass_limits,
            max_sessions: config.max_sessions,
            max_sessions_per_ip: config.max_sessions_per_ip,
        }
    }
}

impl From<UserConfig> for User {
    fn from(config: UserConfig) -> Self {
        let password_hash = match (config.password_sha256, config.password) {
            (Some(hash), _) => hash.to_ascii_lowercase(),
            (None, Some(password)) => hash_password(&password),
            (None, None) => String::new(),
        };

        Self {
            guid: config.guid,
            name: config.name,
            password_hash,
            disabled: config.disabled,
            groups: config.groups,
            bypass_limits: config.bypass_limits,
            max_sessions: config.max_sessions,
            max_sessions_per_ip: config.max_sessions_per_ip,
            logins: 0,
            last_known_ip: None,
            last_login: None,
        }
    }
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Credential and role lookups used while authenticating a request.
///
/// Lookups return owned copies so that no lock is held by the caller.
pub trait UserStore: Send + Sync {
    fn find_user_by_name(&self, name: &str) -> Option<User>;

    fn find_user_by_guid(&self, guid: &str) -> Option<User>;

    fn find_group_by_guid(&self, guid: &str) -> Option<Group>;

    /// Records a successful logon.
    fn record_login(&self, user_guid: &str, remote_address: &str);

    /// Enabled groups of `user` that still exist.
    fn active_groups(&self, user: &User) -> Vec<Group> {
        user.groups
            .iter()
            .filter_map(|guid| self.find_group_by_guid(guid))
            .filter(|group| !group.disabled)
            .collect()
    }

    fn role_bypass_limits(&self, user: &User) -> bool {
        user.bypass_limits || self.active_groups(user).iter().any(|g| g.bypass_limits)
    }

    /// The user's own limit if set, otherwise the most generous group limit.
    fn role_max_sessions(&self, user: &User) -> Option<u32> {
        user.max_sessions.or_else(|| {
            self.active_groups(user)
                .iter()
                .filter_map(|g| g.max_sessions)
                .max()
        })
    }

    fn role_max_sessions_per_ip(&self, user: &User) -> Option<u32> {
        user.max_sessions_per_ip.or_else(|| {
            self.active_groups(user)
                .iter()
                .filter_map(|g| g.max_sessions_per_ip)
                .max()
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, User>>,
    groups: RwLock<HashMap<String, Group>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(users: &[UserConfig], groups: &[GroupConfig]) -> Self {
        let store = Self::new();
        for group in groups {
            store.insert_group(Group::from(group.clone()));
        }
        for user in users {
            store.insert_user(User::from(user.clone()));
        }
        store
    }

    pub fn insert_user(&self, user: User) {
        self.users.write().insert(user.guid.clone(), user);
    }

    pub fn remove_user(&self, guid: &str) -> Option<User> {
        self.users.write().remove(guid)
    }

    pub fn insert_group(&self, group: Group) {
        self.groups.write().insert(group.guid.clone(), group);
    }
}

impl UserStore for MemoryUserStore {
    fn find_user_by_name(&self, name: &str) -> Option<User> {
        self.users
            .read()
            .values()
            .find(|u| u.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn find_user_by_guid(&self, guid: &str) -> Option<User> {
        self.users.read().get(guid).cloned()
    }

    fn find_group_by_guid(&self, guid: &str) -> Option<Group> {
        self.groups.read().get(guid).cloned()
    }

    fn record_login(&self, user_guid: &str, remote_address: &str) {
        if let Some(user) = self.users.write().get_mut(user_guid) {
            user.logins += 1;
            user.last_known_ip = Some(remote_address.to_string());
            user.last_login = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(guid: &str, max_sessions: Option<u32>, disabled: bool) -> Group {
        Group {
            guid: guid.to_string(),
            name: guid.to_string(),
            disabled,
            bypass_limits: false,
            max_sessions,
            max_sessions_per_ip: None,
        }
    }

    #[test]
    fn password_check_uses_digest() {
        let user = User::new("u1", "alice", "secret");
        assert!(user.check_password("secret"));
        assert!(!user.check_password("Secret"));
        assert_eq!(user.password_hash.len(), 64);
    }

    #[test]
    fn user_limit_overrides_groups() {
        let store = MemoryUserStore::new();
        store.insert_group(group("g1", Some(5), false));

        let mut user = User::new("u1", "alice", "pw");
        user.groups.push("g1".to_string());
        assert_eq!(store.role_max_sessions(&user), Some(5));

        user.max_sessions = Some(1);
        assert_eq!(store.role_max_sessions(&user), Some(1));
    }

    #[test]
    fn disabled_groups_are_ignored() {
        let store = MemoryUserStore::new();
        store.insert_group(group("g1", Some(5), true));
        store.insert_group(group("g2", Some(2), false));

        let mut user = User::new("u1", "alice", "pw");
        user.groups = vec!["g1".to_string(), "g2".to_string(), "missing".to_string()];
        assert_eq!(store.role_max_sessions(&user), Some(2));
        assert_eq!(store.role_max_sessions_per_ip(&user), None);
    }

    #[test]
    fn record_login_updates_bookkeeping() {
        let store = MemoryUserStore::new();
        store.insert_user(User::new("u1", "alice", "pw"));
        store.record_login("u1", "10.0.0.1");

        let user = store.find_user_by_name("ALICE").unwrap();
        assert_eq!(user.logins, 1);
        assert_eq!(user.last_known_ip.as_deref(), Some("10.0.0.1"));
        assert!(user.last_login.is_some());
    }
}

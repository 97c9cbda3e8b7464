//! Sites: URI scopes with their own document root and auth policy.
//!
//! A request is bound to the site whose path is the longest prefix of the
//! request URI. Everything after the site path is the site-relative path,
//! which is what handler patterns, the auth form and the reserved
//! `/_public/` and `/_private/` prefixes are matched against.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::access_log::AccessLogger;
use crate::config::{ErrorPageConfig, PermissionConfig, SiteConfig};
use crate::users::{User, UserStore};

/// How a site authenticates callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthType {
    Basic,
    Form,
    /// Anything unrecognized. Every protected request is forbidden.
    Other(String),
}

impl AuthType {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "basic" => AuthType::Basic,
            "form" => AuthType::Form,
            _ => AuthType::Other(s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPage {
    /// `"404"` or `"403.3"`.
    pub code: String,
    pub message: String,
    /// Site-relative location the request is forwarded to. Empty means the
    /// message is sent inline.
    pub location: String,
}

impl From<ErrorPageConfig> for ErrorPage {
    fn from(config: ErrorPageConfig) -> Self {
        Self {
            code: config.code,
            message: config.message,
            location: config.location,
        }
    }
}

/// One allow/deny rule. Empty selectors match everyone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub user_guid: Option<String>,
    pub group_guid: Option<String>,
    /// Dotted IPv4 pattern where `*` matches any octet.
    pub remote_address: Option<String>,
    pub allow: bool,
}

impl From<PermissionConfig> for Permission {
    fn from(config: PermissionConfig) -> Self {
        Self {
            user_guid: config.user.filter(|s| !s.is_empty()),
            group_guid: config.group.filter(|s| !s.is_empty()),
            remote_address: config.remote_address.filter(|s| !s.is_empty()),
            allow: config.allow,
        }
    }
}

impl Permission {
    pub fn allow_all() -> Self {
        Self {
            user_guid: None,
            group_guid: None,
            remote_address: None,
            allow: true,
        }
    }

    fn applies_to(&self, user: &User, remote_address: &str, users: &dyn UserStore) -> bool {
        if let Some(guid) = &self.user_guid {
            if *guid != user.guid {
                return false;
            }
        }

        if let Some(guid) = &self.group_guid {
            match users.find_group_by_guid(guid) {
                Some(group) if !group.disabled && user.is_member_of(&group.guid) => {}
                _ => return false,
            }
        }

        if let Some(pattern) = &self.remote_address {
            if !matches_ip_pattern(remote_address, pattern) {
                return false;
            }
        }

        true
    }
}

/// Evaluates rules in order. A matching deny ends evaluation.
pub fn check_permission(
    permissions: &[Permission],
    user: &User,
    remote_address: &str,
    users: &dyn UserStore,
) -> bool {
    if user.disabled {
        return false;
    }

    let mut allowed = false;
    for permission in permissions {
        if !permission.applies_to(user, remote_address, users) {
            continue;
        }
        if permission.allow {
            allowed = true;
        } else {
            return false;
        }
    }
    allowed
}

/// Matches a dotted IPv4 address against a pattern like `192.168.*.*`.
pub fn matches_ip_pattern(address: &str, pattern: &str) -> bool {
    let octets: Vec<&str> = address.split('.').collect();
    let parts: Vec<&str> = pattern.split('.').collect();
    if octets.len() != 4 || parts.len() != 4 {
        return false;
    }

    octets.iter().zip(parts.iter()).all(|(octet, part)| {
        octet.parse::<u8>().is_ok() && (*part == "*" || part == octet)
    })
}

/// Strips trailing slashes so the root site has the empty path.
pub fn normalize_site_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[derive(Debug)]
pub struct Site {
    pub name: String,
    /// Mount path without trailing slash; empty for the root site.
    pub path: String,
    pub root: PathBuf,
    pub auth_type: AuthType,
    /// Site-relative path of the login form.
    pub auth_form: String,
    pub auth_realm: String,
    pub anonymous_access: bool,
    pub anonymous_user_guid: String,
    pub default_documents: Vec<String>,
    pub error_pages: Vec<ErrorPage>,
    pub mime_mappings: HashMap<String, String>,
    pub permissions: Vec<Permission>,
    pub access_logger: Option<AccessLogger>,
}

impl Site {
    pub fn new(path: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            name: String::new(),
            path: normalize_site_path(path),
            root: root.into(),
            auth_type: AuthType::Basic,
            auth_form: String::new(),
            auth_realm: String::new(),
            anonymous_access: false,
            anonymous_user_guid: String::new(),
            default_documents: Vec::new(),
            error_pages: Vec::new(),
            mime_mappings: HashMap::new(),
            permissions: vec![Permission::allow_all()],
            access_logger: None,
        }
    }

    pub fn from_config(config: SiteConfig) -> Self {
        Self {
            name: config.name,
            path: normalize_site_path(&config.path),
            root: config.root,
            auth_type: AuthType::parse(&config.auth_type),
            auth_form: config.auth_form,
            auth_realm: config.auth_realm,
            anonymous_access: config.anonymous_access,
            anonymous_user_guid: config.anonymous_user,
            default_documents: config.default_documents,
            error_pages: config.error_pages.into_iter().map(ErrorPage::from).collect(),
            mime_mappings: config
                .mime_mappings
                .into_iter()
                .map(|(ext, mime)| (ext.to_ascii_lowercase(), mime))
                .collect(),
            permissions: config.permissions.into_iter().map(Permission::from).collect(),
            access_logger: config.access_log.map(AccessLogger::new),
        }
    }

    /// Maps a site-relative path onto the filesystem below the site root.
    pub fn real_path(&self, path: &str) -> PathBuf {
        let mut real = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            real.push(segment);
        }
        real
    }

    pub fn mime_mapping(&self, extension: &str) -> Option<&str> {
        self.mime_mappings
            .get(&extension.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn check_permission(&self, user: &User, remote_address: &str, users: &dyn UserStore) -> bool {
        check_permission(&self.permissions, user, remote_address, users)
    }

    pub fn error_page(&self, code: &str) -> Option<&ErrorPage> {
        self.error_pages.iter().find(|page| page.code == code)
    }
}

/// Resolves the site a request URI belongs to.
pub trait SiteResolver: Send + Sync {
    fn find_site_by_path(&self, uri: &str) -> Option<Arc<Site>>;
}

/// Static set of sites resolved by longest path prefix.
#[derive(Debug, Default)]
pub struct SiteManager {
    sites: Vec<Arc<Site>>,
}

impl SiteManager {
    pub fn new(sites: Vec<Site>) -> Self {
        Self {
            sites: sites.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_config(sites: &[SiteConfig]) -> Self {
        Self::new(sites.iter().cloned().map(Site::from_config).collect())
    }

    pub fn sites(&self) -> &[Arc<Site>] {
        &self.sites
    }
}

impl SiteResolver for SiteManager {
    fn find_site_by_path(&self, uri: &str) -> Option<Arc<Site>> {
        let check = with_trailing_slash(uri);

        self.sites
            .iter()
            .filter(|site| check.starts_with(&with_trailing_slash(&site.path)))
            .max_by_key(|site| site.path.len())
            .cloned()
    }
}

fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{Group, MemoryUserStore};

    #[test]
    fn longest_prefix_wins() {
        let manager = SiteManager::new(vec![
            Site::new("/", "/srv/root"),
            Site::new("/music", "/srv/music"),
            Site::new("/music/live", "/srv/live"),
        ]);

        assert_eq!(manager.find_site_by_path("/index.html").unwrap().path, "");
        assert_eq!(manager.find_site_by_path("/music").unwrap().path, "/music");
        assert_eq!(manager.find_site_by_path("/music/a.mp3").unwrap().path, "/music");
        assert_eq!(
            manager.find_site_by_path("/music/live/b.mp3").unwrap().path,
            "/music/live"
        );
        assert_eq!(manager.find_site_by_path("/musicals/x").unwrap().path, "");
    }

    #[test]
    fn no_site_without_root() {
        let manager = SiteManager::new(vec![Site::new("/music", "/srv/music")]);
        assert!(manager.find_site_by_path("/share/foo.mp3").is_none());
    }

    #[test]
    fn ip_patterns() {
        assert!(matches_ip_pattern("192.168.1.20", "192.168.*.*"));
        assert!(matches_ip_pattern("10.0.0.1", "10.0.0.1"));
        assert!(!matches_ip_pattern("10.0.0.2", "10.0.0.1"));
        assert!(!matches_ip_pattern("::1", "*.*.*.*"));
    }

    #[test]
    fn deny_rule_stops_evaluation() {
        let users = MemoryUserStore::new();
        let user = User::new("u1", "alice", "pw");
        let rules = vec![
            Permission {
                remote_address: Some("10.*.*.*".to_string()),
                allow: false,
                ..Permission::allow_all()
            },
            Permission::allow_all(),
        ];

        assert!(!check_permission(&rules, &user, "10.1.2.3", &users));
        assert!(check_permission(&rules, &user, "192.168.0.1", &users));
    }

    #[test]
    fn group_rule_requires_enabled_membership() {
        let users = MemoryUserStore::new();
        users.insert_group(Group {
            guid: "g1".to_string(),
            name: "listeners".to_string(),
            disabled: false,
            bypass_limits: false,
            max_sessions: None,
            max_sessions_per_ip: None,
        });

        let rules = vec![Permission {
            group_guid: Some("g1".to_string()),
            ..Permission::allow_all()
        }];

        let mut user = User::new("u1", "alice", "pw");
        assert!(!check_permission(&rules, &user, "127.0.0.1", &users));
        user.groups.push("g1".to_string());
        assert!(check_permission(&rules, &user, "127.0.0.1", &users));
    }

    #[test]
    fn real_path_stays_below_root() {
        let site = Site::new("/share", "/srv/share");
        assert_eq!(site.real_path("/a/b.mp3"), PathBuf::from("/srv/share/a/b.mp3"));
        assert_eq!(site.real_path(""), PathBuf::from("/srv/share"));
    }
}

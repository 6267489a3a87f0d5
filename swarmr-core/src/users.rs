use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity a session logs in as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: String,
    pub directory: String,
}

impl User {
    /// `directory\username`, or just the username when there is no directory.
    pub fn qualified_name(&self) -> String {
        if self.directory.is_empty() {
            self.username.clone()
        } else {
            format!("{}\\{}", self.directory, self.username)
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

/// Source of session identities. `draw` is 1-based and monotonic across the run.
pub trait UserGenerator: Send + Sync + std::fmt::Debug {
    fn iterate(&self, draw: u64) -> User;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefixSettings {
    pub prefix: String,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub password: String,
}

/// `<prefix>_<draw>` in a fixed directory.
#[derive(Debug, Clone)]
pub struct PrefixUsers(PrefixSettings);

impl UserGenerator for PrefixUsers {
    fn iterate(&self, draw: u64) -> User {
        User {
            username: format!("{}_{draw}", self.0.prefix),
            password: self.0.password.clone(),
            directory: self.0.directory.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedUser {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListSettings {
    #[serde(default)]
    pub directory: String,
    /// Used for listed users without their own password.
    #[serde(default)]
    pub password: String,
    pub users: Vec<ListedUser>,
}

/// Cycles through a fixed list.
#[derive(Debug, Clone)]
pub struct UserList(UserListSettings);

impl UserGenerator for UserList {
    fn iterate(&self, draw: u64) -> User {
        let len = self.0.users.len() as u64;
        let idx = draw.saturating_sub(1) % len.max(1);
        let Some(listed) = usize::try_from(idx).ok().and_then(|i| self.0.users.get(i)) else {
            return User::default();
        };
        User {
            username: listed.username.clone(),
            password: listed
                .password
                .clone()
                .unwrap_or_else(|| self.0.password.clone()),
            directory: self.0.directory.clone(),
        }
    }
}

/// Every session connects without an identity header.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl UserGenerator for Anonymous {
    fn iterate(&self, _draw: u64) -> User {
        User::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", content = "settings", rename_all = "lowercase")]
pub enum LoginSettings {
    Prefix(PrefixSettings),
    UserList(UserListSettings),
    #[default]
    None,
}

impl LoginSettings {
    pub fn into_generator(self) -> Result<Arc<dyn UserGenerator>> {
        Ok(match self {
            Self::Prefix(settings) => {
                if settings.prefix.is_empty() {
                    return Err(Error::InvalidLoginSettings("prefix".to_string()));
                }
                Arc::new(PrefixUsers(settings))
            }
            Self::UserList(settings) => {
                if settings.users.is_empty() {
                    return Err(Error::InvalidLoginSettings("userlist".to_string()));
                }
                Arc::new(UserList(settings))
            }
            Self::None => Arc::new(Anonymous),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(yaml: &str) -> Arc<dyn UserGenerator> {
        let settings: LoginSettings =
            serde_yaml::from_str(yaml).unwrap_or_else(|err| panic!("parse failed: {err}"));
        settings
            .into_generator()
            .unwrap_or_else(|err| panic!("generator failed: {err}"))
    }

    #[test]
    fn prefix_users_are_numbered_by_draw() {
        let users = generator("type: prefix\nsettings:\n  prefix: load\n  directory: ACME\n");
        let u = users.iterate(7);
        assert_eq!(u.username, "load_7");
        assert_eq!(u.qualified_name(), "ACME\\load_7");
    }

    #[test]
    fn user_list_wraps_around() {
        let users = generator(
            "type: userlist\nsettings:\n  password: shared\n  users:\n    - username: a\n    - username: b\n      password: own\n",
        );
        let names: Vec<String> = (1..=5).map(|d| users.iterate(d).username).collect();
        assert_eq!(names, ["a", "b", "a", "b", "a"]);
        assert_eq!(users.iterate(1).password, "shared");
        assert_eq!(users.iterate(2).password, "own");
    }

    #[test]
    fn none_is_anonymous() {
        let users = generator("type: none\n");
        assert!(users.iterate(1).is_anonymous());
        assert_eq!(users.iterate(1).qualified_name(), "");
    }

    #[test]
    fn empty_user_list_is_rejected() {
        let settings = LoginSettings::UserList(UserListSettings {
            directory: String::new(),
            password: String::new(),
            users: Vec::new(),
        });
        assert!(matches!(
            settings.into_generator(),
            Err(Error::InvalidLoginSettings(kind)) if kind == "userlist"
        ));
    }
}

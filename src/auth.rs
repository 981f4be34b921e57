//! Credential table shared by login and registration handling.
//!
//! The table is loaded once at startup from a YAML file and mutated only
//! in memory afterwards. All access goes through one mutex; request
//! handlers hold it only for the duration of a single lookup or insert.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

pub struct CredentialStore {
    users: Mutex<HashMap<String, String>>,
}

impl CredentialStore {
    pub fn empty() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Loads the username/password table from a YAML mapping.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading credential file {}", path.display()))?;
        let users: HashMap<String, String> = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing credential file {}", path.display()))?;
        Ok(Self {
            users: Mutex::new(users),
        })
    }

    /// Checks a username/password pair against the table.
    pub fn verify(&self, user: &str, password: &str) -> bool {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.get(user).is_some_and(|stored| stored == password)
    }

    /// Registers a new user. The check and the insert happen under the same
    /// lock acquisition, so two racing registrations of the same name yield
    /// exactly one `Inserted`.
    pub fn insert(&self, user: &str, password: &str) -> InsertOutcome {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        if users.contains_key(user) {
            return InsertOutcome::Duplicate;
        }
        users.insert(user.to_string(), password.to_string());
        InsertOutcome::Inserted
    }

    pub fn len(&self) -> usize {
        self.users.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_verify() {
        let store = CredentialStore::empty();
        assert_eq!(store.insert("alice", "secret"), InsertOutcome::Inserted);
        assert!(store.verify("alice", "secret"));
        assert!(!store.verify("alice", "wrong"));
        assert!(!store.verify("bob", "secret"));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = CredentialStore::empty();
        assert_eq!(store.insert("alice", "one"), InsertOutcome::Inserted);
        assert_eq!(store.insert("alice", "two"), InsertOutcome::Duplicate);
        assert!(store.verify("alice", "one"));
        assert_eq!(store.len(), 1);
    }
}

//! Read model of the site's subscribers and newsletters.
//!
//! Jobs carry only ids across the queue and look the rows up here when they run.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
    pub name: String,
    #[serde(default = "default_subscribed")]
    pub subscribed: bool,
}

fn default_subscribed() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Newsletter {
    pub id: i64,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    subscribers: Vec<Subscriber>,
    #[serde(default)]
    newsletters: Vec<Newsletter>,
}

#[derive(Debug, Default)]
pub struct Directory {
    subscribers: RwLock<BTreeMap<i64, Subscriber>>,
    newsletters: RwLock<BTreeMap<i64, Newsletter>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON file of the form `{ "subscribers": [...], "newsletters": [...] }`
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read directory file {:?}", path))?;
        let file: DirectoryFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse directory file {:?}", path))?;

        let directory = Self::new();
        for subscriber in file.subscribers {
            directory.upsert_subscriber(subscriber);
        }
        for newsletter in file.newsletters {
            directory.upsert_newsletter(newsletter);
        }
        Ok(directory)
    }

    pub fn upsert_subscriber(&self, subscriber: Subscriber) {
        self.subscribers.write().insert(subscriber.id, subscriber);
    }

    pub fn upsert_newsletter(&self, newsletter: Newsletter) {
        self.newsletters.write().insert(newsletter.id, newsletter);
    }

    pub fn unsubscribe(&self, subscriber_id: i64) -> bool {
        match self.subscribers.write().get_mut(&subscriber_id) {
            Some(subscriber) => {
                subscriber.subscribed = false;
                true
            }
            None => false,
        }
    }

    pub fn subscriber(&self, id: i64) -> Option<Subscriber> {
        self.subscribers.read().get(&id).cloned()
    }

    pub fn newsletter(&self, id: i64) -> Option<Newsletter> {
        self.newsletters.read().get(&id).cloned()
    }

    pub fn active_subscribers(&self) -> Vec<Subscriber> {
        self.subscribers
            .read()
            .values()
            .filter(|s| s.subscribed)
            .cloned()
            .collect()
    }
}

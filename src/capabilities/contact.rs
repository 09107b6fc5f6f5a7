use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};
use crate::traits::Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Online,
    Away,
    Offline,
    #[default]
    Unknown,
}

/// 連絡先
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub status: ContactStatus,
    pub status_msg: Option<String>,
    pub summary: Option<String>,
    pub url: Option<String>,
    /// Profile fields as labelled on the site.
    pub profile: BTreeMap<String, String>,
}

impl Contact {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: ContactStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            status_msg: None,
            summary: None,
            url: None,
            profile: BTreeMap::new(),
        }
    }
}

/// Selection for `iter_contacts`. The default keeps everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactFilter {
    /// Empty means every status.
    pub statuses: Vec<ContactStatus>,
    pub ids: Option<Vec<String>>,
}

impl ContactFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: ContactStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, contact: &Contact) -> bool {
        let status_ok = self.statuses.is_empty() || self.statuses.contains(&contact.status);
        let id_ok = self
            .ids
            .as_ref()
            .map(|ids| ids.iter().any(|id| *id == contact.id))
            .unwrap_or(true);
        status_ok && id_ok
    }
}

#[async_trait]
pub trait ContactProvider: Connector {
    async fn iter_contacts(&mut self, filter: &ContactFilter) -> Result<Vec<Contact>>;

    async fn get_contact(&mut self, id: &str) -> Result<Contact> {
        let filter = ContactFilter::all().with_ids([id]);
        self.iter_contacts(&filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::NotFound(format!("contact {}", id)))
    }
}

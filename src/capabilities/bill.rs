use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::traits::Connector;

use super::find_object;

/// 契約
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub label: String,
    pub subscriber: Option<String>,
    /// Professional contract (billed through a different API).
    pub is_pro: bool,
}

impl Subscription {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            subscriber: None,
            is_pro: false,
        }
    }
}

/// 請求書
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: String,
    pub date: Option<NaiveDate>,
    pub label: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub format: Option<String>,
    /// Download address of the document.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[async_trait]
pub trait SubscriptionProvider: Connector {
    async fn iter_subscriptions(&mut self) -> Result<Vec<Subscription>>;

    async fn get_subscription(&mut self, id: &str) -> Result<Subscription> {
        let subscriptions = self.iter_subscriptions().await?;
        find_object(subscriptions, |s| s.id == id, "subscription", id)
    }
}

#[async_trait]
pub trait DocumentProvider: Connector {
    async fn iter_documents(&mut self, subscription_id: &str) -> Result<Vec<Bill>>;
}

#[async_trait]
pub trait ProfileProvider: Connector {
    async fn get_profile(&mut self) -> Result<Profile>;
}

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::traits::Connector;

/// スレッド (フォーラムのトピック)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub date: Option<NaiveDateTime>,
    /// Announced message count; listings fill this without fetching.
    pub nb_messages: usize,
    /// Empty in listings, filled by `get_thread`.
    pub messages: Vec<Message>,
}

impl Thread {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            date: None,
            nb_messages: 0,
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub title: String,
    pub sender: String,
    pub date: Option<NaiveDateTime>,
    /// HTML content.
    pub content: String,
    pub signature: Option<String>,
    /// Message this one follows in the thread, `None` for the first.
    pub parent_id: Option<String>,
}

#[async_trait]
pub trait MessagesProvider: Connector {
    async fn iter_threads(&mut self) -> Result<Vec<Thread>>;

    async fn get_thread(&mut self, thread_id: &str) -> Result<Thread>;
}

//! サイトコネクタライブラリ
//!
//! - 認証済みセッション (ログイン・再ログイン・ログアウト)
//! - URLパターンによるページ判定 (NavigationMap)
//! - ページ単位のパーサとページング
//! - 銀行・請求書・天気・フォーラムの各機能をサイト別に実装
//!
//! # コネクタ直接利用
//!
//! ```rust,ignore
//! use site_connectors::sites::binck::BinckConnector;
//! use site_connectors::{transport, AccountProvider, Connector, ConnectorConfig, HistoryProvider};
//!
//! #[tokio::main]
//! async fn main() -> site_connectors::Result<()> {
//!     let config = ConnectorConfig::from_env("BINCK")?;
//!     let transport = transport::open(&config).await?;
//!     let mut binck = BinckConnector::new(config, transport)?;
//!
//!     for account in binck.iter_accounts().await? {
//!         let history = binck.iter_history(&account.id).await?;
//!         println!("{}: {} transactions", account.label, history.len());
//!     }
//!     binck.teardown().await
//! }
//! ```
//!
//! # tower::Service 経由
//!
//! ```rust,ignore
//! use site_connectors::{Capability, CapabilityRequest, ConnectorConfig, ConnectorService, Site};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut service = ConnectorService::new();
//!     let request = CapabilityRequest::new(
//!         Site::Ilmatieteenlaitos,
//!         ConnectorConfig::anonymous(),
//!         Capability::CitySearch { pattern: "Helsinki".into() },
//!     );
//!     let response = service.call(request).await.unwrap();
//!     println!("{}", serde_json::to_string_pretty(&response).unwrap());
//! }
//! ```

pub mod capabilities;
pub mod config;
pub mod error;
pub mod navigation;
pub mod page;
pub mod pagination;
pub mod parse;
pub mod retry;
pub mod service;
pub mod session;
pub mod sites;
pub mod traits;
pub mod transport;

// 主要な型をリエクスポート
pub use capabilities::{
    AccountProvider, ContactProvider, DocumentProvider, HistoryProvider, InvestmentProvider,
    MessagesProvider, ProfileProvider, SubscriptionProvider, WeatherProvider,
};
pub use config::{ConnectorConfig, Credentials, TransportKind};
pub use error::{ConnectorError, Result};
pub use navigation::NavigationMap;
pub use page::ResolvedPage;
pub use pagination::{PageOutcome, Paginator};
pub use service::{Capability, CapabilityRequest, CapabilityResponse, ConnectorService, Site};
pub use session::Session;
pub use traits::{Connector, LoginFlow, NoLogin};

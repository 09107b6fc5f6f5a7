//! Orange / Sosh 請求書
//!
//! Login goes through the JSON API of login.orange.fr; subscriptions and
//! bills come from several hosts depending on the contract (pro or not).

mod pages;
mod scraper;

pub use pages::OrangePage;
pub use scraper::OrangeConnector;

//! Binck (web.binck.fr) 証券口座
//!
//! Accounts come from the HTML overview; history is a JSON listing paged
//! by `EndOfData` / `LastSequenceNumber`.

mod pages;
mod scraper;

pub use pages::BinckPage;
pub use scraper::BinckConnector;

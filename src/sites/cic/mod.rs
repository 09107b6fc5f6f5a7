//! CIC / Crédit Mutuel 銀行口座
//!
//! Both banks run the same HTML platform; members differ by host and by the
//! first path segment.

mod pages;
mod scraper;

pub use pages::CicPage;
pub use scraper::{CicConnector, CicFamily};

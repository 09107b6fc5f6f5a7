//! phpBB フォーラム

mod pages;
mod scraper;

pub use pages::PhpbbPage;
pub use scraper::PhpbbConnector;

//! BNP Paribas family (BNP Paribas, Hello bank!).

mod pages;
mod scraper;

pub use pages::BnpPage;
pub use scraper::{BnpConnector, BnpFamily};

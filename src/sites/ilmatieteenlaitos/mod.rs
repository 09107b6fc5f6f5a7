//! Ilmatieteenlaitos (ilmatieteenlaitos.fi) 天気予報

mod pages;
mod scraper;

pub use pages::FmiPage;
pub use scraper::IlmatieteenlaitosConnector;

//! Spirica 生命保険契約
//!
//! JSF pages: every tab and history page is a post of the contract form
//! carrying its `javax.faces.ViewState`.

mod pages;
mod scraper;

pub use pages::SpiricaPage;
pub use scraper::SpiricaConnector;

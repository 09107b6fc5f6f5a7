//! サイト別コネクタ
//!
//! Each site keeps its page kinds, navigation map and parsers in
//! `pages.rs`, and its login flow plus capability impls in `scraper.rs`.

pub mod binck;
pub mod bnp;
pub mod cic;
pub mod ilmatieteenlaitos;
pub mod orange;
pub mod phpbb;
pub mod spirica;

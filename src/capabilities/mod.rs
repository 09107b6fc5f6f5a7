//! 機能トレイトと返却レコード
//!
//! コネクタはサイトが対応する機能のトレイトだけを実装する。
//! 各操作は必要に応じて認証するので、呼び出し側がログインする必要はない。

pub mod bank;
pub mod bill;
pub mod contact;
pub mod messages;
pub mod weather;

pub use bank::{
    Account, AccountProvider, AccountType, HistoryProvider, Investment, InvestmentProvider,
    LabelPatterns, Transaction, TransactionType,
};
pub use bill::{
    Bill, DocumentProvider, Profile, ProfileProvider, Subscription, SubscriptionProvider,
};
pub use contact::{Contact, ContactFilter, ContactProvider, ContactStatus};
pub use messages::{Message, MessagesProvider, Thread};
pub use weather::{City, CurrentWeather, Forecast, WeatherProvider};

use crate::error::{ConnectorError, Result};

/// `pred` に一致する `items` の要素。なければ `NotFound`
pub fn find_object<T>(
    items: impl IntoIterator<Item = T>,
    pred: impl Fn(&T) -> bool,
    what: &str,
    id: &str,
) -> Result<T> {
    items
        .into_iter()
        .find(|item| pred(item))
        .ok_or_else(|| ConnectorError::NotFound(format!("{} {}", what, id)))
}

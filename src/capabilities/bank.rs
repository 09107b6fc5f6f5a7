//! 銀行系の型定義と capability

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};
use crate::parse::normalize_ws;
use crate::traits::Connector;

use super::find_object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    #[default]
    Unknown,
    Checking,
    Savings,
    Market,
    LifeInsurance,
    Card,
    Loan,
}

/// 口座
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique within one listing call only.
    pub id: String,
    pub label: String,
    pub account_type: AccountType,
    pub balance: f64,
    pub currency: Option<String>,
    /// Pending amount (deferred card lines).
    pub coming: Option<f64>,
    pub iban: Option<String>,
    pub valuation_diff: Option<f64>,
    /// Detail page of the account, when the site has one.
    pub url: Option<String>,
}

impl Account {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            account_type: AccountType::Unknown,
            balance: 0.0,
            currency: None,
            coming: None,
            iban: None,
            valuation_diff: None,
            url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    #[default]
    Unknown,
    Transfer,
    Order,
    Card,
    Withdrawal,
    Check,
    Bank,
    Deposit,
    LoanPayment,
}

/// 取引明細
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Booking date.
    pub date: Option<NaiveDate>,
    /// Real (operation) date, when the label carries one.
    pub rdate: Option<NaiveDate>,
    /// Label as printed by the site.
    pub raw: String,
    /// Cleaned label.
    pub label: String,
    pub amount: f64,
    pub transaction_type: TransactionType,
    pub coming: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub investments: Vec<Investment>,
}

impl Transaction {
    pub fn new(id: impl Into<String>, date: Option<NaiveDate>, raw: &str, amount: f64) -> Self {
        let raw = normalize_ws(raw);
        Self {
            id: id.into(),
            date,
            rdate: date,
            label: raw.clone(),
            raw,
            amount,
            transaction_type: TransactionType::Unknown,
            coming: false,
            investments: Vec::new(),
        }
    }
}

/// Ordered label patterns typing a transaction from its raw label.
///
/// A pattern may capture `text` (the cleaned label) and `dd`/`mm` (the real
/// date, year taken from the booking date).
#[derive(Debug, Clone)]
pub struct LabelPatterns {
    patterns: Vec<(Regex, TransactionType)>,
}

impl LabelPatterns {
    pub fn new(specs: &[(&str, TransactionType)]) -> Result<Self> {
        let patterns = specs
            .iter()
            .map(|(pattern, kind)| {
                Regex::new(pattern)
                    .map(|re| (re, *kind))
                    .map_err(|e| ConnectorError::Config(format!("bad label pattern {:?}: {}", pattern, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn apply(&self, tr: &mut Transaction) {
        for (re, kind) in &self.patterns {
            let Some(caps) = re.captures(&tr.raw) else {
                continue;
            };
            tr.transaction_type = *kind;
            if let Some(text) = caps.name("text") {
                tr.label = normalize_ws(text.as_str());
            }
            let day = caps.name("dd").and_then(|m| m.as_str().parse::<u32>().ok());
            let month = caps.name("mm").and_then(|m| m.as_str().parse::<u32>().ok());
            if let (Some(day), Some(month), Some(date)) = (day, month, tr.date) {
                // an operation in December booked in January belongs to last year
                let year = if month > date.month() {
                    date.year() - 1
                } else {
                    date.year()
                };
                if let Some(rdate) = NaiveDate::from_ymd_opt(year, month, day) {
                    tr.rdate = Some(rdate);
                }
            }
            return;
        }
    }
}

/// 投資ライン
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Investment {
    pub label: String,
    pub code: Option<String>,
    pub quantity: Option<f64>,
    /// Average buy price.
    pub unitprice: Option<f64>,
    /// Current price.
    pub unitvalue: Option<f64>,
    pub valuation: f64,
    pub diff: Option<f64>,
    pub portfolio_share: Option<f64>,
    pub currency: Option<String>,
    pub vdate: Option<NaiveDate>,
}

impl Investment {
    pub fn new(label: impl Into<String>, valuation: f64) -> Self {
        Self {
            label: label.into(),
            valuation,
            ..Default::default()
        }
    }

    /// Cash line of a portfolio.
    pub fn liquidity(valuation: f64, currency: Option<String>) -> Self {
        Self {
            label: "Liquidités".to_string(),
            code: Some("XX-liquidity".to_string()),
            valuation,
            currency,
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait AccountProvider: Connector {
    async fn iter_accounts(&mut self) -> Result<Vec<Account>>;

    async fn get_account(&mut self, id: &str) -> Result<Account> {
        let accounts = self.iter_accounts().await?;
        find_object(accounts, |a| a.id == id, "account", id)
    }
}

#[async_trait]
pub trait HistoryProvider: Connector {
    /// Transactions of one account, most recent first as the site lists them.
    async fn iter_history(&mut self, account_id: &str) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait InvestmentProvider: Connector {
    async fn iter_investments(&mut self, account_id: &str) -> Result<Vec<Investment>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> LabelPatterns {
        LabelPatterns::new(&[
            (r"^VIR(EMENT)? (?P<text>.*)", TransactionType::Transfer),
            (
                r"^(?P<text>.*) CARTE \d+ PAIEMENT CB\s+(?P<dd>\d{2})(?P<mm>\d{2}) ?(.*)$",
                TransactionType::Card,
            ),
            (r"^CHEQUE$", TransactionType::Check),
        ])
        .unwrap()
    }

    #[test]
    fn test_label_patterns_type_and_clean() {
        let mut tr = Transaction::new("0", NaiveDate::from_ymd_opt(2017, 3, 2), "VIR  SALAIRE MARS", 1500.0);
        patterns().apply(&mut tr);
        assert_eq!(tr.transaction_type, TransactionType::Transfer);
        assert_eq!(tr.label, "SALAIRE MARS");
        assert_eq!(tr.raw, "VIR SALAIRE MARS");
    }

    #[test]
    fn test_card_real_date_rolls_back_a_year() {
        let mut tr = Transaction::new(
            "1",
            NaiveDate::from_ymd_opt(2017, 1, 3),
            "SUPERMARCHE CARTE 1234 PAIEMENT CB 3012 PARIS",
            -42.0,
        );
        patterns().apply(&mut tr);
        assert_eq!(tr.transaction_type, TransactionType::Card);
        assert_eq!(tr.label, "SUPERMARCHE");
        assert_eq!(tr.rdate, NaiveDate::from_ymd_opt(2016, 12, 30));
    }

    #[test]
    fn test_unmatched_label_is_kept() {
        let mut tr = Transaction::new("2", None, "FRAIS DIVERS", -1.0);
        patterns().apply(&mut tr);
        assert_eq!(tr.transaction_type, TransactionType::Unknown);
        assert_eq!(tr.label, "FRAIS DIVERS");
    }

    #[test]
    fn test_bad_pattern_is_a_config_error() {
        assert!(matches!(
            LabelPatterns::new(&[("(", TransactionType::Card)]),
            Err(ConnectorError::Config(_))
        ));
    }
}

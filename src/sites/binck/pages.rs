use serde::Deserialize;
use serde_json::Value;

use crate::capabilities::{Account, AccountType, Investment, Transaction};
use crate::error::Result;
use crate::navigation::NavigationMap;
use crate::page::ResolvedPage;
use crate::pagination::PageOutcome;
use crate::parse::{
    attr, cells, clean_amount, currency_from_text, form_inputs, json_amount, json_string,
    parse_date, selector, text,
};
use crate::transport::HttpRequest;

pub const LOGIN_URL: &str = "/Logon";
pub const LOGOFF_URL: &str = "/Account/Logoff";
pub const ACCOUNTS_URL: &str = "/AccountsOverview";
pub const SWITCH_ACCOUNT_URL: &str = "/Header/SwitchAccount";
pub const PORTFOLIO_URL: &str = "/PortfolioOverview/GetPortfolioOverview";
pub const HISTORY_URL: &str = "/TransactionsOverview/GetTransactions";
pub const TOKEN_HEADER: &str = "__RequestVerificationToken";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinckPage {
    Login,
    LogonFlow,
    Accounts,
    Investment,
    History,
    Questions,
    ChangePassword,
}

pub fn navigation(base_url: &str) -> Result<NavigationMap<BinckPage>> {
    NavigationMap::builder(base_url)
        .rule(BinckPage::Login, &["/Logon"])
        .rule(BinckPage::LogonFlow, &["/AmlQuestionnairesOverview/LogonFlow$"])
        .rule(BinckPage::Accounts, &["/AccountsOverview", "/$", "/Home/Index"])
        .rule(BinckPage::Investment, &["/PortfolioOverview/GetPortfolioOverview"])
        .rule(
            BinckPage::History,
            &["/TransactionsOverview/GetTransactions", "/TransactionsOverview/FilteredOverview"],
        )
        .rule(BinckPage::Questions, &["/FDL_Complex_FR_Compte"])
        .rule(BinckPage::ChangePassword, &[r"/EditSetting/GetSetting\?code=MutationPassword"])
        .build()
}

/// Hidden fields of the logon form (anti-forgery token included).
pub fn login_form(page: &ResolvedPage<BinckPage>) -> Result<Vec<(String, String)>> {
    let doc = page.html();
    let form_sel = selector("form")?;
    let mut fields = Vec::new();
    for form in doc.select(&form_sel) {
        if attr(form, "action").map(|a| a.contains("Logon")).unwrap_or(false) {
            fields = form_inputs(form, &["hidden"])?;
            break;
        }
    }
    Ok(fields)
}

pub fn login_error(page: &ResolvedPage<BinckPage>) -> Result<Option<String>> {
    let doc = page.html();
    let sel = selector(".validation-summary-errors, .logon-error")?;
    let error = doc.select(&sel).map(text).find(|t| !t.is_empty());
    Ok(error)
}

/// An account row of the overview, with what the overview alone tells.
#[derive(Debug, Clone)]
pub struct ListedAccount {
    pub account: Account,
    pub liquidity: Option<f64>,
    pub has_portfolio: bool,
}

pub fn parse_accounts(page: &ResolvedPage<BinckPage>) -> Result<Vec<ListedAccount>> {
    let doc = page.html();
    let rows = selector("table.accountoverview-table tbody tr[data-accountnumber]")?;

    let mut accounts = Vec::new();
    for row in doc.select(&rows) {
        let columns: Vec<String> = cells(row).into_iter().map(text).collect();
        if columns.len() < 3 {
            continue;
        }
        let Some(id) = attr(row, "data-accountnumber") else {
            continue;
        };

        let mut account = Account::new(id, columns[0].clone());
        account.account_type = account_type(&columns[0]);
        account.balance = clean_amount(&columns[2]).unwrap_or(0.0);
        account.currency = attr(row, "data-currency")
            .map(str::to_string)
            .or_else(|| currency_from_text(&columns[2]));

        accounts.push(ListedAccount {
            account,
            liquidity: clean_amount(&columns[1]),
            has_portfolio: false,
        });
    }
    Ok(accounts)
}

fn account_type(label: &str) -> AccountType {
    let label = label.to_lowercase();
    if label.contains("pea") || label.contains("titres") {
        AccountType::Market
    } else if label.contains("assurance") {
        AccountType::LifeInsurance
    } else {
        AccountType::Unknown
    }
}

pub fn parse_token(page: &ResolvedPage<BinckPage>) -> Result<Option<String>> {
    let doc = page.html();
    let sel = selector(&format!("input[name=\"{}\"]", TOKEN_HEADER))?;
    let token = doc
        .select(&sel)
        .find_map(|input| attr(input, "value"))
        .map(str::to_string);
    Ok(token)
}

pub fn parse_iban(page: &ResolvedPage<BinckPage>) -> Result<Option<String>> {
    let doc = page.html();
    let sel = selector(".iban")?;
    let iban = doc
        .select(&sel)
        .map(|el| text(el).replace(' ', ""))
        .find(|iban| !iban.is_empty());
    Ok(iban)
}

/// Whether the portfolio link is shown. A hidden link on a non-investment
/// account answers 404.
pub fn has_portfolio(page: &ResolvedPage<BinckPage>) -> Result<bool> {
    let doc = page.html();
    let sel = selector("a[href*=\"PortfolioOverview\"]")?;
    let shown = doc.select(&sel).any(|a| {
        !attr(a, "class")
            .map(|c| c.split_whitespace().any(|c| c == "hidden"))
            .unwrap_or(false)
    });
    Ok(shown)
}

/// Message of a server error page refusing the account switch.
pub fn account_error(body: &str) -> Result<Option<String>> {
    let doc = ::scraper::Html::parse_document(body);
    let sel = selector("p")?;
    let message = doc
        .select(&sel)
        .map(text)
        .find(|t| t.contains("Votre compte est"));
    Ok(message)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortfolioDoc {
    #[serde(default)]
    portfolio_overview_groups: Vec<PortfolioGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortfolioGroup {
    #[serde(default)]
    items: Vec<PortfolioItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortfolioItem {
    security_name: String,
    #[serde(default)]
    isin_code: Option<String>,
    #[serde(default)]
    quantity: Value,
    #[serde(default)]
    quote: Value,
    #[serde(default)]
    historic_buying_price: Value,
    #[serde(default)]
    value_in_euro: Value,
    #[serde(default)]
    result_in_euro: Value,
    #[serde(default)]
    percentage_of_portfolio: Value,
}

#[derive(Debug, Clone, Default)]
pub struct Portfolio {
    pub investments: Vec<Investment>,
    pub valuation_diff: Option<f64>,
}

pub fn parse_portfolio(page: &ResolvedPage<BinckPage>, currency: Option<&str>) -> Result<Portfolio> {
    let doc: PortfolioDoc = page.json_as()?;

    let mut portfolio = Portfolio::default();
    for item in doc.portfolio_overview_groups.into_iter().flat_map(|g| g.items) {
        let mut inv = Investment::new(item.security_name, json_amount(&item.value_in_euro).unwrap_or(0.0));
        inv.code = item.isin_code.filter(|c| !c.is_empty());
        inv.quantity = json_amount(&item.quantity);
        inv.unitvalue = json_amount(&item.quote);
        inv.unitprice = json_amount(&item.historic_buying_price);
        inv.diff = json_amount(&item.result_in_euro);
        inv.portfolio_share = json_amount(&item.percentage_of_portfolio).map(|p| p / 100.0);
        inv.currency = currency.map(str::to_string);

        if let Some(diff) = inv.diff {
            *portfolio.valuation_diff.get_or_insert(0.0) += diff;
        }
        portfolio.investments.push(inv);
    }
    Ok(portfolio)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryDoc {
    #[serde(default)]
    transactions: Vec<HistoryLine>,
    end_of_data: bool,
    #[serde(default)]
    last_sequence_number: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryLine {
    #[serde(default)]
    number: Value,
    transaction_date: String,
    #[serde(default)]
    value_date: Option<String>,
    description: String,
    #[serde(default)]
    mutation: Value,
}

/// One page of the JSON history. The continuation repeats the first
/// request's fields with the last sequence number the site returned.
pub fn parse_history(
    page: &ResolvedPage<BinckPage>,
    fields: &[(String, String)],
    token: &str,
) -> Result<PageOutcome<Transaction>> {
    let doc: HistoryDoc = page.json_as()?;

    let records = doc
        .transactions
        .into_iter()
        .enumerate()
        .map(|(i, line)| {
            let id = json_string(&line.number).unwrap_or_else(|| i.to_string());
            let mut tr = Transaction::new(
                id,
                parse_date(&line.transaction_date),
                &line.description,
                json_amount(&line.mutation).unwrap_or(0.0),
            );
            if let Some(vdate) = line.value_date.as_deref().and_then(parse_date) {
                tr.rdate = Some(vdate);
            }
            tr
        })
        .collect();

    if doc.end_of_data {
        return Ok(PageOutcome::last(records));
    }
    let Some(sequence) = json_string(&doc.last_sequence_number) else {
        return Ok(PageOutcome::last(records));
    };

    let mut next_fields: Vec<(String, String)> = fields
        .iter()
        .filter(|(k, _)| k != "lastSequenceNumber")
        .cloned()
        .collect();
    next_fields.push(("lastSequenceNumber".to_string(), sequence));
    let next = HttpRequest::post_form(HISTORY_URL, next_fields).with_header(TOKEN_HEADER, token);
    Ok(PageOutcome::more(records, next))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn page(kind: BinckPage, body: &str) -> ResolvedPage<BinckPage> {
        ResolvedPage::new(kind, "https://web.binck.fr/x", 200, HashMap::new(), None, body)
    }

    #[test]
    fn test_parse_accounts_skips_short_rows() {
        let page = page(
            BinckPage::Accounts,
            r#"<table class="accountoverview-table"><tbody>
                <tr data-accountnumber="111" data-currency="EUR">
                  <td>Compte-titres</td><td>1 000,00 €</td><td>12 345,67 €</td></tr>
                <tr data-accountnumber="222"><td>broken</td></tr>
                <tr data-accountnumber="333"><td>Assurance vie</td><td></td><td>50,00 €</td></tr>
            </tbody></table>"#,
        );
        let accounts = parse_accounts(&page).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].account.id, "111");
        assert_eq!(accounts[0].account.balance, 12345.67);
        assert_eq!(accounts[0].account.account_type, AccountType::Market);
        assert_eq!(accounts[0].liquidity, Some(1000.0));
        assert_eq!(accounts[1].account.currency.as_deref(), Some("EUR"));
        assert_eq!(accounts[1].liquidity, None);
    }

    #[test]
    fn test_parse_history_continuation() {
        let body = json!({
            "Transactions": [
                {"Number": 7, "TransactionDate": "03-02-2017", "Description": "Achat  X", "Mutation": "-1 234,50"}
            ],
            "EndOfData": false,
            "LastSequenceNumber": 7
        });
        let fields = vec![
            ("currencyCode".to_string(), "EUR".to_string()),
            ("lastSequenceNumber".to_string(), "9".to_string()),
        ];
        let outcome = parse_history(&page(BinckPage::History, &body.to_string()), &fields, "tok").unwrap();

        assert_eq!(outcome.records[0].id, "7");
        assert_eq!(outcome.records[0].amount, -1234.5);
        assert_eq!(outcome.records[0].label, "Achat X");
        let next = outcome.next.unwrap();
        assert_eq!(next.form_value("lastSequenceNumber"), Some("7"));
        assert_eq!(next.form_value("currencyCode"), Some("EUR"));
        assert_eq!(next.headers, vec![(TOKEN_HEADER.to_string(), "tok".to_string())]);
    }

    #[test]
    fn test_account_error_message() {
        let body = "<html><body><h1>Erreur</h1><p>Votre compte est bloqué.</p></body></html>";
        assert_eq!(account_error(body).unwrap().as_deref(), Some("Votre compte est bloqué."));
        assert_eq!(account_error("<p>Oops</p>").unwrap(), None);
    }
}

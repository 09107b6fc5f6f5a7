use regex::Regex;
use scraper::ElementRef;

use crate::capabilities::{Account, AccountType, Investment, Transaction};
use crate::error::{ConnectorError, Result};
use crate::navigation::NavigationMap;
use crate::page::ResolvedPage;
use crate::parse::{
    attr, cells, clean_amount, exactly_one, form_inputs, parse_date, selector, text,
};
use crate::transport::HttpRequest;

pub const LOGIN_URL: &str = "/securite/login.xhtml";
pub const ACCOUNTS_URL: &str = "/sylvea/client/synthese.xhtml";

pub const UNITPRICE_TAB: &str = "contratForm:tabs:prm";
pub const HISTORY_TAB: &str = "contratForm:tabs:historique";
const HISTORY_TABLE: &str = "contratForm:historyTable";
pub const HISTORY_PAGE_SIZE: usize = 100;

const EURO_FUND: &str = "Fonds en euros";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiricaPage {
    Login,
    Accounts,
    Details,
    Maintenance,
}

pub fn navigation(base_url: &str) -> Result<NavigationMap<SpiricaPage>> {
    NavigationMap::builder(base_url)
        .rule(SpiricaPage::Login, &["/securite/login.xhtml"])
        .rule(SpiricaPage::Accounts, &["/sylvea/client/synthese.xhtml"])
        .rule(SpiricaPage::Details, &["/sylvea/contrat/consultationContratEpargne.xhtml"])
        .rule(SpiricaPage::Maintenance, &["/maintenance.html"])
        .build()
}

/// Submission of a JSF form: every input of the form plus `extra`.
fn submit(
    page: &ResolvedPage<SpiricaPage>,
    form_css: &str,
    extra: &[(&str, String)],
) -> Result<HttpRequest> {
    let doc = page.html();
    let sel = selector(form_css)?;
    let form = doc
        .select(&sel)
        .next()
        .ok_or_else(|| ConnectorError::SiteAssertion(format!("no {} on {}", form_css, page.url)))?;

    let action = attr(form, "action").unwrap_or(&page.url).to_string();
    let mut fields = form_inputs(form, &[])?;
    for (name, value) in extra {
        fields.retain(|(k, _)| k != name);
        fields.push((name.to_string(), value.clone()));
    }
    Ok(HttpRequest::post_form(action, fields))
}

pub fn login_request(page: &ResolvedPage<SpiricaPage>, username: &str, password: &str) -> Result<HttpRequest> {
    submit(
        page,
        "form#loginForm",
        &[
            ("loginForm:name", username.to_string()),
            ("loginForm:password", password.to_string()),
            ("loginForm:login", String::new()),
        ],
    )
}

pub fn login_error(page: &ResolvedPage<SpiricaPage>) -> Result<String> {
    let doc = page.html();
    let sel = selector(".ui-messages-error-summary, .ui-messages-error-detail")?;
    let error = doc.select(&sel).map(text).find(|t| !t.is_empty());
    Ok(error.unwrap_or_else(|| "login refused".to_string()))
}

pub fn parse_accounts(page: &ResolvedPage<SpiricaPage>) -> Result<Vec<Account>> {
    let doc = page.html();
    let rows = selector("table.contrats tbody tr")?;
    let link = selector("a")?;

    let mut accounts = Vec::new();
    for row in doc.select(&rows) {
        let tds = cells(row);
        if tds.len() < 3 {
            continue;
        }
        let id = text(tds[1]);
        if id.is_empty() {
            continue;
        }
        let mut account = Account::new(id, text(tds[0]));
        account.account_type = AccountType::LifeInsurance;
        account.balance = clean_amount(&text(tds[2])).unwrap_or(0.0);
        account.currency = Some("EUR".to_string());
        account.url = tds[0]
            .select(&link)
            .next()
            .and_then(|a| attr(a, "href"))
            .map(str::to_string);
        accounts.push(account);
    }
    Ok(accounts)
}

pub fn tab_request(page: &ResolvedPage<SpiricaPage>, tab: &str) -> Result<HttpRequest> {
    submit(
        page,
        "form#contratForm",
        &[("javax.faces.source", tab.to_string()), (tab, tab.to_string())],
    )
}

/// An investment line with the columns used to match it against the
/// unit-price table.
#[derive(Debug, Clone)]
pub struct InvestmentLine {
    pub investment: Investment,
    pub invest_type: String,
    pub gestion_type: String,
}

impl InvestmentLine {
    fn same_line(&self, other: &InvestmentLine) -> bool {
        self.investment.code == other.investment.code
            && self.investment.unitvalue == other.investment.unitvalue
            && self.investment.label == other.investment.label
            && self.gestion_type == other.gestion_type
    }
}

fn opt_text(el: ElementRef<'_>) -> Option<String> {
    Some(text(el)).filter(|t| !t.is_empty())
}

pub fn parse_investments(page: &ResolvedPage<SpiricaPage>) -> Result<Vec<InvestmentLine>> {
    let doc = page.html();
    let rows = selector("table.repartition tbody tr")?;

    let mut lines = Vec::new();
    for row in doc.select(&rows) {
        let tds = cells(row);
        if tds.len() < 8 {
            continue;
        }
        let mut inv = Investment::new(text(tds[0]), clean_amount(&text(tds[6])).unwrap_or(0.0));
        inv.code = opt_text(tds[1]);
        inv.unitvalue = clean_amount(&text(tds[4]));
        inv.quantity = clean_amount(&text(tds[5]));
        inv.portfolio_share = clean_amount(&text(tds[7])).map(|p| p / 100.0);
        inv.currency = Some("EUR".to_string());
        lines.push(InvestmentLine {
            investment: inv,
            invest_type: text(tds[2]),
            gestion_type: text(tds[3]),
        });
    }
    Ok(lines)
}

/// Lines of the unit-price (PRM) table.
pub fn parse_unitprice_lines(page: &ResolvedPage<SpiricaPage>) -> Result<Vec<InvestmentLine>> {
    let doc = page.html();
    let rows = selector("table.prm tbody tr")?;

    let mut lines = Vec::new();
    for row in doc.select(&rows) {
        let tds = cells(row);
        if tds.len() < 6 {
            continue;
        }
        let mut inv = Investment::new(text(tds[0]), 0.0);
        inv.code = opt_text(tds[1]);
        inv.unitvalue = clean_amount(&text(tds[3]));
        inv.unitprice = clean_amount(&text(tds[4]));
        inv.diff = clean_amount(&text(tds[5]));
        lines.push(InvestmentLine {
            investment: inv,
            invest_type: String::new(),
            gestion_type: text(tds[2]),
        });
    }
    Ok(lines)
}

/// Completes investments with their unit-price line. Euro funds have none;
/// every other line must match exactly one.
pub fn merge_unitprices(lines: Vec<InvestmentLine>, unitprices: &[InvestmentLine]) -> Result<Vec<Investment>> {
    let mut investments = Vec::with_capacity(lines.len());
    for line in lines {
        let mut inv = line.investment.clone();
        if line.invest_type != EURO_FUND {
            let matched = exactly_one(
                unitprices.iter().filter(|u| u.same_line(&line)),
                &format!("unit price line for {:?}", inv.label),
            )?;
            if matched.investment.unitprice.is_some() {
                inv.unitprice = matched.investment.unitprice;
            }
            if matched.investment.diff.is_some() {
                inv.diff = matched.investment.diff;
            }
        }
        investments.push(inv);
    }
    Ok(investments)
}

pub fn count_transactions(page: &ResolvedPage<SpiricaPage>) -> Result<usize> {
    let doc = page.html();
    let re = Regex::new(r"(\d+)\s+opérations?")
        .map_err(|e| ConnectorError::Parse(e.to_string()))?;
    let body = text(doc.root_element());
    Ok(re
        .captures(&body)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0))
}

pub fn history_request(page: &ResolvedPage<SpiricaPage>, page_number: usize) -> Result<HttpRequest> {
    let first = page_number * HISTORY_PAGE_SIZE;
    submit(
        page,
        "form#contratForm",
        &[
            ("javax.faces.source", HISTORY_TABLE.to_string()),
            ("contratForm:historyTable_pagination", "true".to_string()),
            ("contratForm:historyTable_first", first.to_string()),
            ("contratForm:historyTable_rows", HISTORY_PAGE_SIZE.to_string()),
        ],
    )
}

/// Rows of a history page, `None` when the page holds no history table.
pub fn parse_history(page: &ResolvedPage<SpiricaPage>, first_id: usize) -> Result<Option<Vec<Transaction>>> {
    let doc = page.html();
    let table = selector("table.historique")?;
    let Some(table) = doc.select(&table).next() else {
        return Ok(None);
    };
    let rows = selector("tbody tr")?;

    let mut history = Vec::new();
    for row in table.select(&rows) {
        let tds = cells(row);
        if tds.len() < 3 {
            continue;
        }
        let Some(amount) = clean_amount(&text(tds[2])) else {
            continue;
        };
        let id = (first_id + history.len()).to_string();
        history.push(Transaction::new(id, parse_date(&text(tds[0])), &text(tds[1]), amount));
    }
    Ok(Some(history))
}

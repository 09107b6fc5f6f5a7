use regex::Regex;
use scraper::ElementRef;
use url::Url;

use crate::capabilities::{Account, LabelPatterns, Transaction, TransactionType};
use crate::error::{ConnectorError, Result};
use crate::navigation::NavigationMap;
use crate::page::ResolvedPage;
use crate::pagination::PageOutcome;
use crate::parse::{
    attr, cells, clean_amount, currency_from_text, first_amount, form_inputs, parse_date, selector,
    signed_amount, text,
};
use crate::site_ensure;
use crate::transport::HttpRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CicPage {
    Login,
    LoginError,
    ChangePassword,
    VerifCode,
    Accounts,
    UserSpace,
    Operations,
    Card,
    NoOperations,
    Info,
    Transfer,
    Empty,
}

pub fn navigation(base_url: &str) -> Result<NavigationMap<CicPage>> {
    NavigationMap::builder(base_url)
        .rule(CicPage::Login, &[r"/[^/]+/fr/banques/particuliers/index\.html"])
        .rule(CicPage::LoginError, &[r"/[^/]+/fr/identification/default\.cgi"])
        .rule(CicPage::Accounts, &[r"/[^/]+/fr/banque/situation_financiere\.cgi"])
        .rule(CicPage::UserSpace, &[r"/[^/]+/fr/banque/espace_personnel\.aspx"])
        .rule(
            CicPage::Operations,
            &[
                r"/[^/]+/fr/banque/mouvements\.cgi",
                r"/[^/]+/fr/banque/mvts_instance\.cgi",
                r"/[^/]+/fr/banque/nr/nr_devbooster\.aspx",
            ],
        )
        .rule(CicPage::Card, &[r"/[^/]+/fr/banque/operations_carte\.cgi"])
        .rule(CicPage::NoOperations, &[r"/[^/]+/fr/banque/CR/arrivee\.asp"])
        .rule(CicPage::Info, &[r"/[^/]+/fr/banque/BAD"])
        .rule(CicPage::Transfer, &[r"/[^/]+/fr/banque/.*Vir"])
        .rule(CicPage::ChangePassword, &[r"/[^/]+/fr/validation/change_password\.cgi"])
        .rule(CicPage::VerifCode, &[r"/[^/]+/fr/validation/verif_code\.cgi"])
        .rule(
            CicPage::Empty,
            &[
                r"/[^/]+/fr/$",
                r"/[^/]+/fr/banques/index\.html",
                r"/[^/]+/fr/banque/paci_beware_of_phishing\.html",
                r"/[^/]+/fr/validation/",
            ],
        )
        .build()
}

pub fn login_url(space: &str) -> String {
    format!("/{}/fr/banques/particuliers/index.html", space)
}

pub fn accounts_url(space: &str) -> String {
    format!("/{}/fr/banque/situation_financiere.cgi", space)
}

/// Submission of the `ident` form.
pub fn login_request(page: &ResolvedPage<CicPage>, username: &str, password: &str) -> Result<HttpRequest> {
    let doc = page.html();
    let sel = selector(r#"form[name="ident"]"#)?;
    let form = doc
        .select(&sel)
        .next()
        .ok_or_else(|| ConnectorError::SiteAssertion(format!("no login form on {}", page.url)))?;

    let action = resolve_link(&page.url, attr(form, "action").unwrap_or(&page.url))?;
    let mut fields: Vec<(String, String)> = form_inputs(form, &["hidden"])?;
    fields.push(("_cm_user".to_string(), username.to_string()));
    fields.push(("_cm_pwd".to_string(), password.to_string()));
    Ok(HttpRequest::post_form(action, fields))
}

/// Links on these pages are relative to the page, not to the site root.
fn resolve_link(page_url: &str, link: &str) -> Result<String> {
    Ok(Url::parse(page_url)?.join(link)?.to_string())
}

fn has_row_class(td: ElementRef<'_>, operations: bool) -> bool {
    let class = attr(td, "class").unwrap_or_default();
    class == "i g" || class == "p g" || (operations && class.ends_with("_c1 c _c1"))
}

/// Python-style title case: first letter of each alphabetic run upper.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// An account of the summary table with the detail links behind it.
#[derive(Debug, Clone)]
pub struct ListedAccount {
    pub account: Account,
    pub link: String,
    /// Deferred card statements attached to the same RIB.
    pub card_links: Vec<String>,
}

/// Summary table. Rows sharing a RIB after the first one are deferred card
/// lines: their balance goes to `coming`.
pub fn parse_accounts(page: &ResolvedPage<CicPage>) -> Result<Vec<ListedAccount>> {
    let doc = page.html();
    let rows = selector("tr")?;
    let link_sel = selector("a")?;

    let mut accounts: Vec<ListedAccount> = Vec::new();
    for row in doc.select(&rows) {
        let tds = cells(row);
        if tds.len() < 3 || !has_row_class(tds[0], false) {
            continue;
        }
        let Some(a) = tds[0].select(&link_sel).next() else {
            continue;
        };
        let href = attr(a, "href").unwrap_or_default();
        if href.starts_with("POR_SyntheseLst") {
            continue;
        }
        let link = resolve_link(&page.url, href)?;
        let Some(rib) = Url::parse(&link)?
            .query_pairs()
            .find(|(k, _)| k == "rib")
            .map(|(_, v)| v.into_owned())
        else {
            continue;
        };

        let columns: Vec<String> = tds.iter().map(|td| text(*td)).collect();
        let balance = first_amount(&columns, &[2, 1]).unwrap_or(0.0);
        let currency = columns[1..=2].iter().find_map(|t| currency_from_text(t));

        if let Some(listed) = accounts.iter_mut().find(|l| l.account.id == rib) {
            listed.account.coming = Some(listed.account.coming.unwrap_or(0.0) + balance);
            listed.card_links.push(link);
            continue;
        }

        let label = text(a);
        let label = label.trim_start_matches(|c: char| c == ' ' || c.is_ascii_digit());
        let mut account = Account::new(rib, title_case(label));
        account.balance = balance;
        account.currency = currency;
        account.url = Some(link.clone());
        accounts.push(ListedAccount {
            account,
            link,
            card_links: Vec::new(),
        });
    }
    Ok(accounts)
}

pub fn label_patterns() -> Result<LabelPatterns> {
    LabelPatterns::new(&[
        (r"^VIR(EMENT)? (?P<text>.*)", TransactionType::Transfer),
        (r"^PRLV (?P<text>.*)", TransactionType::Order),
        (
            r"^(?P<text>.*) CARTE \d+ PAIEMENT CB\s+(?P<dd>\d{2})(?P<mm>\d{2}) ?(.*)$",
            TransactionType::Card,
        ),
        (
            r"^RETRAIT DAB (?P<dd>\d{2})(?P<mm>\d{2}) (?P<text>.*) CARTE \d+",
            TransactionType::Withdrawal,
        ),
        (r"^CHEQUE$", TransactionType::Check),
        (r"^COTIS\.? (?P<text>.*)", TransactionType::Bank),
        (r"^REMISE (?P<text>.*)", TransactionType::Deposit),
    ])
}

fn text_parts(el: ElementRef<'_>) -> Vec<String> {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Operations table. Layouts vary (with or without value date and
/// counter-value columns), so label, debit and credit are read from the end
/// of the first five cells.
pub fn parse_operations(
    page: &ResolvedPage<CicPage>,
    patterns: &LabelPatterns,
    next_id: &mut usize,
) -> Result<Vec<Transaction>> {
    let doc = page.html();
    let rows = selector("tr")?;

    let mut history = Vec::new();
    for row in doc.select(&rows) {
        let mut tds = cells(row);
        tds.truncate(5);
        if tds.len() < 4 || !has_row_class(tds[0], true) {
            continue;
        }
        let n = tds.len();
        let Some(date) = parse_date(&text(tds[0])) else {
            continue;
        };
        let mut parts = text_parts(tds[n - 3]);
        if parts.is_empty() {
            continue;
        }
        // CB の場合は場所と店名を分ける
        if parts[0].starts_with("PAIEMENT CB") {
            parts.reverse();
        }

        let credit = text_parts(tds[n - 1]).concat();
        let debit = text_parts(tds[n - 2]).concat();
        let mut tr = Transaction::new(next_id.to_string(), Some(date), &parts.join(" "), signed_amount(&credit, &debit));
        *next_id += 1;
        patterns.apply(&mut tr);
        history.push(tr);
    }
    Ok(history)
}

/// Deferred card statement: every line is still to come.
pub fn parse_card_operations(
    page: &ResolvedPage<CicPage>,
    patterns: &LabelPatterns,
    next_id: &mut usize,
) -> Result<Vec<Transaction>> {
    let doc = page.html();
    let rows = selector("table.liste tbody tr")?;

    let mut history = Vec::new();
    for row in doc.select(&rows) {
        let mut tds = cells(row);
        tds.truncate(4);
        if tds.len() < 4 {
            continue;
        }
        let Some(amount) = clean_amount(&text(tds[3])) else {
            continue;
        };
        let mut parts = text_parts(tds[1]);
        parts.extend(text_parts(tds[2]));

        let mut tr = Transaction::new(next_id.to_string(), parse_date(&text(tds[0])), &parts.join(" "), amount);
        *next_id += 1;
        patterns.apply(&mut tr);
        tr.transaction_type = TransactionType::Card;
        tr.coming = true;
        history.push(tr);
    }
    Ok(history)
}

/// Next page through `paginationForm` ("n / m"), `None` on the last one.
pub fn next_page(page: &ResolvedPage<CicPage>) -> Result<Option<HttpRequest>> {
    let doc = page.html();
    let form_sel = selector("form#paginationForm")?;
    let Some(form) = doc.select(&form_sel).next() else {
        return Ok(None);
    };

    let re = Regex::new(r"(\d+) / (\d+)").map_err(|e| ConnectorError::Parse(e.to_string()))?;
    let counter = text(form);
    let Some(caps) = re.captures(&counter) else {
        return Ok(None);
    };
    let current: usize = caps[1].parse().map_err(|_| ConnectorError::Parse(counter.clone()))?;
    let last: usize = caps[2].parse().map_err(|_| ConnectorError::Parse(counter.clone()))?;
    site_ensure!(
        current >= 1 && current <= last,
        "impossible page counter {} / {}",
        current,
        last
    );
    if current == last {
        return Ok(None);
    }

    let mut fields = form_inputs(form, &["input"])?;
    fields.retain(|(k, _)| k != "page");
    fields.push(("page".to_string(), (current + 1).to_string()));
    let action = resolve_link(&page.url, attr(form, "action").unwrap_or(&page.url))?;
    Ok(Some(HttpRequest::post_form(action, fields)))
}

/// One page of any listing the history walks through.
pub fn parse_history_page(
    page: &ResolvedPage<CicPage>,
    patterns: &LabelPatterns,
    next_id: &mut usize,
) -> Result<PageOutcome<Transaction>> {
    let records = match page.kind {
        CicPage::Operations => parse_operations(page, patterns, next_id)?,
        CicPage::Card => parse_card_operations(page, patterns, next_id)?,
        _ => return Ok(PageOutcome::last(Vec::new())),
    };
    Ok(PageOutcome::with_next(records, next_page(page)?))
}

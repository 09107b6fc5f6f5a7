use serde_json::Value;

use crate::capabilities::{Bill, Profile, Subscription};
use crate::error::Result;
use crate::navigation::NavigationMap;
use crate::page::ResolvedPage;
use crate::parse::{attr, json_amount, json_string, parse_date, selector, text};

pub const LOGIN_URL: &str = "https://login.orange.fr/?service=sosh&return_url=https://www.sosh.fr/";
pub const LOGIN_API_URL: &str = "https://login.orange.fr/front/login";
pub const PASSWORD_API_URL: &str = "https://login.orange.fr/front/password";
pub const HOME_URL: &str = "https://businesslounge.orange.fr/";
pub const PROFILE_URL: &str = "/?page=profil-infosPerso";
pub const CONTRACTS_URL: &str = "https://espaceclientpro.orange.fr/api/contracts?page=1&nbcontractsbypage=15";
pub const SUBSCRIPTIONS_URL: &str = "https://espaceclientv3.orange.fr/js/necfe.php?zonetype=bandeau&idPage=gt-home-page";
pub const SUBSCRIPTIONS_API_URL: &str =
    "https://sso-f.orange.fr/omoi_erb/portfoliomanager/v2.0/contractSelector/users/current";
const BILLS_PAR_API: &str =
    "https://sso-f.orange.fr/omoi_erb/facture/v2.0/billsAndPaymentInfos/users/current/contracts";
const DOC_PAR_API: &str = "https://sso-f.orange.fr/omoi_erb";
const PRO_API: &str = "https://espaceclientpro.orange.fr/api/contract";

/// Bills asked from the pro API in one call.
pub const PRO_BILLS_COUNT: usize = 72;
/// Contracts per page of the pro contracts API.
pub const PRO_CONTRACTS_PAGE: u64 = 15;

pub const CALLER_ID_HEADER: &str = "X-Orange-Caller-Id";
pub const CALLER_ID: &str = "ECQ";

pub const CGU_MESSAGE: &str = "Nos Conditions Générales d'Utilisation ont évolué";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrangePage {
    Login,
    Password,
    Home,
    ManageCgi,
    Profile,
    GtHome,
    Contracts,
    Subscriptions,
    SubscriptionsApi,
    BillsApiPro,
    BillsApiPar,
}

pub fn navigation(base_url: &str) -> Result<NavigationMap<OrangePage>> {
    NavigationMap::builder(base_url)
        .rule(
            OrangePage::Login,
            &[
                r"https://login\.orange\.fr/\?service=sosh",
                r"https://login\.orange\.fr/front/login",
            ],
        )
        .rule(OrangePage::Password, &[r"https://login\.orange\.fr/front/password"])
        .rule(OrangePage::Home, &[r"https://businesslounge\.orange\.fr/$"])
        .rule(OrangePage::ManageCgi, &[r"https://eui\.orange\.fr/manage_eui/bin/manage\.cgi"])
        .rule(OrangePage::Profile, &[r"/\?page=profil-infosPerso"])
        .rule(OrangePage::GtHome, &[r"/\?page=gt-home-page"])
        .rule(OrangePage::Subscriptions, &[r"https://espaceclientv3\.orange\.fr/js/necfe\.php"])
        .rule(OrangePage::Contracts, &[r"https://espaceclientpro\.orange\.fr/api/contracts\?"])
        .rule(
            OrangePage::BillsApiPro,
            &[r"https://espaceclientpro\.orange\.fr/api/contract/(?P<subid>\d+)/bills"],
        )
        .rule(
            OrangePage::SubscriptionsApi,
            &[r"https://sso-f\.orange\.fr/omoi_erb/portfoliomanager/v2\.0/contractSelector/users/current"],
        )
        .rule(
            OrangePage::BillsApiPar,
            &[r"https://sso-f\.orange\.fr/omoi_erb/facture/v2\.0/billsAndPaymentInfos/users/current/contracts/(?P<subid>\d+)"],
        )
        .build()
}

pub fn gt_home_url(subscription_type: &str) -> String {
    format!("https://espaceclientv3.orange.fr/?page=gt-home-page&{}", subscription_type)
}

pub fn bills_pro_url(subscription_id: &str) -> String {
    format!("{}/{}/bills?count={}", PRO_API, subscription_id, PRO_BILLS_COUNT)
}

pub fn bills_par_url(subscription_id: &str) -> String {
    format!("{}/{}", BILLS_PAR_API, subscription_id)
}

/// Message of the password step when the site asks for a new password.
pub fn change_password_message(page: &ResolvedPage<OrangePage>) -> Result<Option<String>> {
    if !page.is_json() {
        return Ok(None);
    }
    let doc = page.json()?;
    if doc.get("stage").and_then(Value::as_str) != Some("changePassword") {
        return Ok(None);
    }
    Ok(Some(
        doc.get("message")
            .and_then(Value::as_str)
            .unwrap_or("password change required")
            .to_string(),
    ))
}

/// Error body of a refused login step (403 after repeated failures).
pub fn login_refusal(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|doc| doc.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "login refused".to_string())
}

pub fn home_error_message(page: &ResolvedPage<OrangePage>) -> Result<String> {
    let doc = page.html();
    let sel = selector("div.error-message, p.message-cgu")?;
    Ok(doc.select(&sel).map(text).collect::<Vec<_>>().join(" "))
}

/// 個人情報 (dt/dd pairs).
pub fn parse_profile(page: &ResolvedPage<OrangePage>) -> Result<Profile> {
    let doc = page.html();
    let terms = selector("div.ec_personalInformations dl dt")?;
    let descs = selector("div.ec_personalInformations dl dd")?;

    let mut profile = Profile::default();
    let mut first_name = String::new();
    for (dt, dd) in doc.select(&terms).zip(doc.select(&descs)) {
        let key = text(dt).to_lowercase();
        let value = text(dd);
        if value.is_empty() {
            continue;
        }
        if key.starts_with("prénom") {
            first_name = value;
        } else if key.starts_with("nom") {
            profile.name = value;
        } else if key.contains("mail") {
            profile.email = Some(value);
        } else if key.contains("téléphone") {
            profile.phone = Some(value);
        } else if key.starts_with("adresse") {
            profile.address = Some(value);
        }
    }
    if !first_name.is_empty() {
        profile.name = format!("{} {}", first_name, profile.name).trim().to_string();
    }
    Ok(profile)
}

fn subscription_from(item: &Value, is_pro: bool) -> Option<Subscription> {
    let id = item.get("contractId").and_then(json_string)?;
    let label = item
        .get("offerName")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut subscription = Subscription::new(id, label);
    subscription.is_pro = is_pro;
    Some(subscription)
}

/// Pro contracts and the announced total.
pub fn parse_contracts(page: &ResolvedPage<OrangePage>) -> Result<(Vec<Subscription>, u64)> {
    let doc = page.json()?;
    let subscriptions = doc
        .get("contracts")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|i| subscription_from(i, true)).collect())
        .unwrap_or_default();
    let total = doc.get("totalContracts").and_then(Value::as_u64).unwrap_or(0);
    Ok((subscriptions, total))
}

pub fn parse_subscriptions_api(page: &ResolvedPage<OrangePage>) -> Result<Vec<Subscription>> {
    let doc = page.json()?;
    Ok(doc
        .get("contracts")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|i| subscription_from(i, false)).collect())
        .unwrap_or_default())
}

/// Contract links of the header banner.
pub fn parse_subscriptions_banner(page: &ResolvedPage<OrangePage>) -> Result<Vec<Subscription>> {
    let doc = page.html();
    let links = selector(r#"a[href*="idContrat="]"#)?;

    let mut subscriptions: Vec<Subscription> = Vec::new();
    for link in doc.select(&links) {
        let Some(href) = attr(link, "href") else {
            continue;
        };
        let Some(id) = href
            .split(['?', '&'])
            .find_map(|part| part.strip_prefix("idContrat="))
            .filter(|id| !id.is_empty())
        else {
            continue;
        };
        if subscriptions.iter().any(|s| s.id == id) {
            continue;
        }
        subscriptions.push(Subscription::new(id, text(link)));
    }
    Ok(subscriptions)
}

pub fn parse_bills_pro(page: &ResolvedPage<OrangePage>, subscription_id: &str) -> Result<Vec<Bill>> {
    let doc = page.json()?;
    let Some(items) = doc.get("bills").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut bills = Vec::with_capacity(items.len());
    for item in items {
        let Some(number) = item.get("documentNumber").and_then(json_string) else {
            continue;
        };
        let date = item.get("dueDate").and_then(Value::as_str).and_then(parse_date);
        let field = |name: &str| item.get(name).and_then(Value::as_str);
        let url = match (field("mainDir"), field("billType"), field("billParams")) {
            (Some(dir), Some(kind), Some(params)) => Some(format!(
                "{}/{}/bill/{}/{}/?{}",
                PRO_API, subscription_id, dir, kind, params
            )),
            _ => None,
        };
        bills.push(Bill {
            id: format!("{}_{}", subscription_id, number),
            date,
            label: date.map(|d| d.format("%d/%m/%Y").to_string()).unwrap_or_default(),
            price: item.get("amountIncludingTax").and_then(json_amount),
            currency: Some("EUR".to_string()),
            format: Some("pdf".to_string()),
            url,
        });
    }
    Ok(bills)
}

/// Residential bills; amounts are sent in cents.
pub fn parse_bills_par(page: &ResolvedPage<OrangePage>, subscription_id: &str) -> Result<Vec<Bill>> {
    let doc = page.json()?;
    let Some(items) = doc
        .pointer("/billsHistory/billList")
        .and_then(Value::as_array)
    else {
        return Ok(Vec::new());
    };

    let mut bills = Vec::with_capacity(items.len());
    for item in items {
        let Some(date) = item.get("date").and_then(Value::as_str).and_then(parse_date) else {
            continue;
        };
        bills.push(Bill {
            id: format!("{}_{}", subscription_id, date.format("%Y%m%d")),
            date: Some(date),
            label: date.format("%d/%m/%Y").to_string(),
            price: item.get("amount").and_then(json_amount).map(|cents| cents / 100.0),
            currency: Some("EUR".to_string()),
            format: Some("pdf".to_string()),
            url: item
                .get("hrefPdf")
                .and_then(Value::as_str)
                .map(|href| format!("{}{}", DOC_PAR_API, href)),
        });
    }
    Ok(bills)
}

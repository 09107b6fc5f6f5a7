use std::collections::HashMap;

use chrono::{Months, NaiveDate};
use serde::Deserialize;
use serde_json::Value;

use crate::capabilities::{Account, AccountType, Investment, Transaction};
use crate::error::{ConnectorError, Result};
use crate::navigation::NavigationMap;
use crate::page::ResolvedPage;
use crate::parse::{form_inputs, json_amount, json_string, parse_date, selector, text};

pub const ACCOUNTS_URL: &str = "udc-wspl/rest/getlstcpt";
pub const IBANS_URL: &str = "rib-wspl/rpc/comptes";
pub const TRANSFER_INIT_URL: &str = "virement-wspl/rest/initialisationVirement";
pub const HISTORY_URL: &str = "rop-wspl/rest/releveOp";
pub const LIFE_INSURANCE_URL: &str = "mefav-wspl/rest/infosContrat";
pub const LIFE_INSURANCE_HISTORY_URL: &str = "mefav-wspl/rest/listMouvements";
pub const LIFE_INSURANCE_DETAIL_URL: &str = "mefav-wspl/rest/detailMouvement";
pub const MARKET_LIST_URL: &str = "pe-war/rpc/SAVaccountDetails/get";
pub const MARKET_SYN_URL: &str = "pe-war/rpc/synthesis/get";
pub const MARKET_URL: &str = "pe-war/rpc/portfolioDetails/get";
pub const MARKET_HISTORY_URL: &str = "/pe-war/rpc/turnOverHistory/get";
pub const LOGIN_POST_URL: &str = "SEEA-pa01/devServer/seeaserver";

pub fn login_url(timestamp: i64) -> String {
    format!(
        "identification-wspl-pres/identification?acceptRedirection=true&timestamp={}",
        timestamp
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BnpPage {
    Login,
    ConnectionThreshold,
    Home,
    Accounts,
    Ibans,
    History,
    TransferInit,
    LifeInsurances,
    LifeInsurancesHistory,
    LifeInsurancesDetail,
    MarketList,
    MarketSyn,
    Market,
    MarketHistory,
}

pub fn navigation(base_url: &str) -> Result<NavigationMap<BnpPage>> {
    NavigationMap::builder(base_url)
        .rule(
            BnpPage::Login,
            &[
                r"identification-wspl-pres/identification\?acceptRedirection=true&timestamp=(?P<timestamp>\d+)",
                "SEEA-pa01/devServer/seeaserver",
                r"https://mabanqueprivee\.bnpparibas\.net/fr/espace-prive/comptes-et-contrats\?u=%2FSEEA-pa01%2FdevServer%2Fseeaserver",
            ],
        )
        .rule(
            BnpPage::ConnectionThreshold,
            &[
                "/fr/connexion/100-connexions",
                "/fr/connexion/mot-de-passe-expire",
                "/fr/espace-prive/100-connexions.*",
                "/fr/espace-pro/100-connexions-pro.*",
                "/fr/espace-pro/changer-son-mot-de-passe",
                "/fr/espace-client/100-connexions",
                "/fr/espace-prive/mot-de-passe-expire",
                "/fr/systeme/page-indisponible",
            ],
        )
        .rule(BnpPage::Home, &["/fr/espace-(prive|pro|client)/.*", "/$"])
        .rule(BnpPage::Accounts, &[ACCOUNTS_URL])
        .rule(BnpPage::Ibans, &[IBANS_URL])
        .rule(BnpPage::History, &[HISTORY_URL])
        .rule(BnpPage::TransferInit, &[TRANSFER_INIT_URL])
        .rule(BnpPage::LifeInsurances, &[LIFE_INSURANCE_URL])
        .rule(BnpPage::LifeInsurancesHistory, &[LIFE_INSURANCE_HISTORY_URL])
        .rule(BnpPage::LifeInsurancesDetail, &[LIFE_INSURANCE_DETAIL_URL])
        .rule(BnpPage::MarketList, &[MARKET_LIST_URL])
        .rule(BnpPage::MarketSyn, &[MARKET_SYN_URL])
        .rule(BnpPage::Market, &[MARKET_URL])
        .rule(BnpPage::MarketHistory, &[MARKET_HISTORY_URL])
        .build()
}

pub fn login_form(page: &ResolvedPage<BnpPage>) -> Result<Vec<(String, String)>> {
    let doc = page.html();
    let sel = selector("form[name=\"logincanalnet\"]")?;
    match doc.select(&sel).next() {
        Some(form) => form_inputs(form, &["hidden"]),
        None => Ok(Vec::new()),
    }
}

/// Message shown on an HTML page (login error, connection threshold).
pub fn page_message(page: &ResolvedPage<BnpPage>) -> Result<Option<String>> {
    let doc = page.html();
    let sel = selector(".errorMessage, .alert, .infos-connexion h1, h1")?;
    let message = doc.select(&sel).map(text).find(|t| !t.is_empty());
    Ok(message)
}

/// API answers carry a `message` that is `OK` on success.
fn check_api(doc: &Value) -> Result<()> {
    match doc.get("message").and_then(Value::as_str) {
        None | Some("OK") => Ok(()),
        Some(message) => Err(ConnectorError::SiteAssertion(format!("API error: {}", message))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountsDoc {
    data: AccountsData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountsData {
    info_udc: InfoUdc,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoUdc {
    #[serde(default)]
    famille_compte: Vec<AccountFamily>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountFamily {
    id_famille_compte: Value,
    #[serde(default)]
    compte: Vec<AccountLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountLine {
    key: String,
    #[serde(default)]
    libelle_perso_produit: Option<String>,
    #[serde(default)]
    libelle_produit: Option<String>,
    #[serde(default)]
    solde_dispo: Value,
    #[serde(default)]
    devise: Option<String>,
}

fn family_type(family: &str) -> AccountType {
    match family {
        "1" => AccountType::Checking,
        "2" | "3" => AccountType::Savings,
        "4" => AccountType::Market,
        "5" => AccountType::LifeInsurance,
        "8" | "9" => AccountType::Loan,
        _ => AccountType::Unknown,
    }
}

/// Accounts keyed by their encrypted IBAN, which every other API takes as
/// account reference.
pub fn parse_accounts(
    page: &ResolvedPage<BnpPage>,
    ibans: &HashMap<String, String>,
) -> Result<Vec<Account>> {
    check_api(&page.json()?)?;
    let doc: AccountsDoc = page.json_as()?;

    let mut accounts = Vec::new();
    for family in doc.data.info_udc.famille_compte {
        let account_type = family_type(&json_string(&family.id_famille_compte).unwrap_or_default());
        for line in family.compte {
            let label = line
                .libelle_perso_produit
                .filter(|l| !l.trim().is_empty())
                .or(line.libelle_produit)
                .unwrap_or_default();
            let mut account = Account::new(line.key.clone(), label.trim());
            account.account_type = account_type;
            account.balance = json_amount(&line.solde_dispo).unwrap_or(0.0);
            account.currency = line.devise;
            account.iban = ibans.get(&line.key).cloned();
            accounts.push(account);
        }
    }
    Ok(accounts)
}

fn iban_pairs(items: Option<&Value>) -> HashMap<String, String> {
    items
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let info = item.get("infoCompte").unwrap_or(item);
                    let key = info.get("ibanCrypte")?.as_str()?;
                    let iban = info.get("iban")?.as_str()?;
                    Some((key.to_string(), iban.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_ibans(page: &ResolvedPage<BnpPage>) -> Result<HashMap<String, String>> {
    let doc = page.json()?;
    check_api(&doc)?;
    Ok(iban_pairs(doc.pointer("/data/listeRib")))
}

/// `side` is `Crediteur` or `Debiteur`.
pub fn parse_transfer_ibans(page: &ResolvedPage<BnpPage>, side: &str) -> Result<HashMap<String, String>> {
    let doc = page.json()?;
    check_api(&doc)?;
    Ok(iban_pairs(
        doc.pointer(&format!("/data/infoVirement/listeComptes{}", side)),
    ))
}

/// `(securityAccountName, field)` pairs of the market synthesis and list
/// answers.
pub fn parse_market_accounts(page: &ResolvedPage<BnpPage>, list: &str) -> Result<Vec<MarketAccount>> {
    let doc = page.json()?;
    let accounts = doc
        .get(list)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(MarketAccount {
                        name: item.get("securityAccountName")?.as_str()?.to_string(),
                        number: item.get("securityAccountNumber").and_then(json_string),
                        profit_loss: item.get("profitLoss").and_then(json_amount),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(accounts)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketAccount {
    pub name: String,
    pub number: Option<String>,
    pub profit_loss: Option<f64>,
}

/// Booking window of the history API: the last two years, `ddmmyyyy`.
pub fn history_window(today: NaiveDate) -> (String, String) {
    let start = today.checked_sub_months(Months::new(24)).unwrap_or(today);
    (start.format("%d%m%Y").to_string(), today.format("%d%m%Y").to_string())
}

fn operation(item: &Value, index: usize, coming: bool) -> Transaction {
    let id = item
        .get("idOperation")
        .and_then(json_string)
        .unwrap_or_else(|| index.to_string());
    let date = item
        .get("dateOperation")
        .and_then(Value::as_str)
        .and_then(parse_date);
    let label = item
        .get("libelleOperation")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let amount = item
        .pointer("/montant/montant")
        .and_then(json_amount)
        .unwrap_or(0.0);

    let mut tr = Transaction::new(id, date, label, amount);
    if let Some(vdate) = item.get("dateValeur").and_then(Value::as_str).and_then(parse_date) {
        tr.rdate = Some(vdate);
    }
    tr.coming = coming;
    tr
}

/// Past operations, or pending ones when `coming`.
pub fn parse_history(page: &ResolvedPage<BnpPage>, coming: bool) -> Result<Vec<Transaction>> {
    let doc = page.json()?;
    check_api(&doc)?;
    let key = if coming { "operationAVenir" } else { "operationPassee" };
    let operations = doc
        .pointer(&format!("/data/listerOperations/compte/{}", key))
        .and_then(Value::as_array)
        .map(|ops| {
            ops.iter()
                .enumerate()
                .map(|(i, op)| operation(op, i, coming))
                .collect()
        })
        .unwrap_or_default();
    Ok(operations)
}

fn support(item: &Value) -> Investment {
    let label = item
        .get("lsSupport")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let valuation = item
        .get("mtValoSupport")
        .or_else(|| item.get("mtNet"))
        .and_then(json_amount)
        .unwrap_or(0.0);
    let mut inv = Investment::new(label, valuation);
    inv.code = item
        .get("cdSuppIsin")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    inv.quantity = item.get("nbUCSupport").or_else(|| item.get("nbUC")).and_then(json_amount);
    inv.unitvalue = item.get("mtCotaSupport").and_then(json_amount);
    inv.unitprice = item.get("mtPMPDSupport").and_then(json_amount);
    inv.portfolio_share = item
        .get("pcRepartition")
        .and_then(json_amount)
        .map(|p| p / 100.0);
    inv.vdate = item.get("dtCotaSupport").and_then(Value::as_str).and_then(parse_date);
    inv
}

pub fn parse_life_insurance_investments(page: &ResolvedPage<BnpPage>) -> Result<Vec<Investment>> {
    let doc = page.json()?;
    check_api(&doc)?;
    Ok(doc
        .pointer("/data/repartition/listeSupport")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(support).collect())
        .unwrap_or_default())
}

/// A life-insurance movement and the references its detail call needs.
#[derive(Debug, Clone)]
pub struct Movement {
    pub transaction: Transaction,
    pub reference: Value,
}

pub fn parse_life_insurance_history(page: &ResolvedPage<BnpPage>) -> Result<Vec<Movement>> {
    let doc = page.json()?;
    check_api(&doc)?;
    let movements = doc
        .pointer("/data/listeMouvements")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let id = item
                        .get("idMouvement")
                        .and_then(json_string)
                        .unwrap_or_else(|| i.to_string());
                    let date = item.get("dateEffet").and_then(Value::as_str).and_then(parse_date);
                    let label = item.get("lcTypeMouvement").and_then(Value::as_str).unwrap_or_default();
                    let amount = item.get("mtNet").and_then(json_amount).unwrap_or(0.0);
                    Movement {
                        transaction: Transaction::new(id, date, label, amount),
                        reference: serde_json::json!({
                            "idMouvement": item.get("idMouvement").cloned().unwrap_or(Value::Null),
                            "ordreMouvement": item.get("ordreMouvement").cloned().unwrap_or(Value::Null),
                            "codeTypeMouvement": item.get("codeTypeMouvement").cloned().unwrap_or(Value::Null),
                        }),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(movements)
}

pub fn parse_movement_detail(page: &ResolvedPage<BnpPage>) -> Result<Vec<Investment>> {
    let doc = page.json()?;
    check_api(&doc)?;
    Ok(doc
        .pointer("/data/listeSupportsMouvement")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(support).collect())
        .unwrap_or_default())
}

pub fn parse_market_investments(page: &ResolvedPage<BnpPage>) -> Result<Vec<Investment>> {
    let doc = page.json()?;
    Ok(doc
        .get("listofPortfolio")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let label = item
                        .get("securityName")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let valuation = item.get("amount").and_then(json_amount).unwrap_or(0.0);
                    let mut inv = Investment::new(label, valuation);
                    inv.code = item.get("securityCode").and_then(json_string);
                    inv.quantity = item.get("quantity").and_then(json_amount);
                    inv.unitvalue = item.get("lastPrice").and_then(json_amount);
                    inv.unitprice = item.get("averagePrice").and_then(json_amount);
                    inv.diff = item.get("profitLoss").and_then(json_amount);
                    inv.portfolio_share = item
                        .get("percentageOfTotal")
                        .and_then(json_amount)
                        .map(|p| p / 100.0);
                    inv
                })
                .collect()
        })
        .unwrap_or_default())
}

pub fn parse_market_history(page: &ResolvedPage<BnpPage>) -> Result<Vec<Transaction>> {
    let doc = page.json()?;
    Ok(doc
        .get("turnOverHistoryList")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let label = format!(
                        "{} {}",
                        item.get("operationType").and_then(Value::as_str).unwrap_or_default(),
                        item.get("securityName").and_then(Value::as_str).unwrap_or_default()
                    );
                    Transaction::new(
                        i.to_string(),
                        item.get("operationDate").and_then(Value::as_str).and_then(parse_date),
                        &label,
                        item.get("netAmount").and_then(json_amount).unwrap_or(0.0),
                    )
                })
                .collect()
        })
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn page(kind: BnpPage, body: Value) -> ResolvedPage<BnpPage> {
        ResolvedPage::new(
            kind,
            "https://mabanque.bnpparibas/x",
            200,
            HashMap::new(),
            Some("application/json".into()),
            body.to_string(),
        )
    }

    #[test]
    fn test_history_window_is_two_years() {
        let today = NaiveDate::from_ymd_opt(2017, 3, 15).unwrap();
        assert_eq!(
            history_window(today),
            ("15032015".to_string(), "15032017".to_string())
        );
    }

    #[test]
    fn test_accounts_use_personal_label_and_family_type() {
        let body = json!({"message": "OK", "data": {"infoUdc": {"familleCompte": [
            {"idFamilleCompte": 1, "compte": [
                {"key": "K1", "libellePersoProduit": " ", "libelleProduit": "Compte de chèques",
                 "soldeDispo": 1200.5, "devise": "EUR"}]},
            {"idFamilleCompte": "5", "compte": [
                {"key": "K2", "libellePersoProduit": "Mon AV", "soldeDispo": "10 000,00", "devise": "EUR"}]}
        ]}}});
        let mut ibans = HashMap::new();
        ibans.insert("K1".to_string(), "FR7630004000".to_string());

        let accounts = parse_accounts(&page(BnpPage::Accounts, body), &ibans).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].label, "Compte de chèques");
        assert_eq!(accounts[0].account_type, AccountType::Checking);
        assert_eq!(accounts[0].iban.as_deref(), Some("FR7630004000"));
        assert_eq!(accounts[1].account_type, AccountType::LifeInsurance);
        assert_eq!(accounts[1].balance, 10000.0);
    }

    #[test]
    fn test_api_error_is_a_site_assertion() {
        let body = json!({"message": "KO technique", "data": {}});
        assert!(matches!(
            parse_ibans(&page(BnpPage::Ibans, body)),
            Err(ConnectorError::SiteAssertion(_))
        ));
    }
}

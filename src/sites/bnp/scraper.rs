use async_trait::async_trait;
use chrono::{Local, Utc};
use serde_json::json;
use tracing::info;

use crate::capabilities::{
    find_object, Account, AccountProvider, AccountType, HistoryProvider, Investment,
    InvestmentProvider, Transaction,
};
use crate::config::{ConnectorConfig, Credentials};
use crate::error::{ConnectorError, Result};
use crate::page::ResolvedPage;
use crate::retry::or_empty_when_unavailable;
use crate::session::Session;
use crate::traits::{Connector, LoginFlow};
use crate::transport::{HttpRequest, Transport};

use super::pages::{self, BnpPage, MarketAccount};

/// Members of the BNP family. They share every page and differ only by
/// host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BnpFamily {
    BnpParibas,
    HelloBank,
}

impl BnpFamily {
    pub fn base_url(self) -> &'static str {
        match self {
            BnpFamily::BnpParibas => "https://mabanque.bnpparibas/",
            BnpFamily::HelloBank => "https://www.hellobank.fr/",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BnpFamily::BnpParibas => "bnp",
            BnpFamily::HelloBank => "hellobank",
        }
    }
}

struct BnpLogin;

#[async_trait]
impl LoginFlow<BnpPage> for BnpLogin {
    async fn login(&self, session: &mut Session<BnpPage>, credentials: &Credentials) -> Result<()> {
        // 数字以外の認証情報はサイトに送らない
        let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        if !(digits(&credentials.username) && digits(&credentials.password)) {
            return Err(ConnectorError::InvalidCredentials(
                "identifier and password must be numeric".into(),
            ));
        }

        let page = session
            .get(&pages::login_url(Utc::now().timestamp_millis()))
            .await?;
        let mut fields = Vec::new();
        if page.kind == BnpPage::Login {
            fields = pages::login_form(&page)?;
        }
        fields.push(("ch1".to_string(), credentials.username.clone()));
        fields.push(("ch5".to_string(), credentials.password.clone()));

        let page = session
            .fetch(HttpRequest::post_form(pages::LOGIN_POST_URL, fields))
            .await?;
        match page.kind {
            BnpPage::Login => Err(ConnectorError::InvalidCredentials(
                pages::page_message(&page)?.unwrap_or_else(|| "login refused".into()),
            )),
            BnpPage::ConnectionThreshold => Err(ConnectorError::ActionRequired(
                pages::page_message(&page)?
                    .unwrap_or_else(|| "the website requires a password change".into()),
            )),
            _ => Ok(()),
        }
    }

    fn is_login_page(&self, kind: BnpPage) -> bool {
        kind == BnpPage::Login
    }
}

/// BNP Paribas JSON APIs.
pub struct BnpConnector {
    family: BnpFamily,
    session: Session<BnpPage>,
    accounts: Vec<Account>,
}

impl BnpConnector {
    pub fn new(
        family: BnpFamily,
        config: ConnectorConfig,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let navigation = pages::navigation(config.base_url_or(family.base_url()))?;
        Ok(Self {
            family,
            session: Session::new(config, transport, navigation, BnpLogin),
            accounts: Vec::new(),
        })
    }

    pub fn family(&self) -> BnpFamily {
        self.family
    }

    async fn post(
        &mut self,
        url: &str,
        body: serde_json::Value,
        kind: BnpPage,
    ) -> Result<ResolvedPage<BnpPage>> {
        self.session
            .fetch_expecting(HttpRequest::post_json(url, body), &[kind])
            .await
    }

    async fn account(&mut self, account_id: &str) -> Result<Account> {
        if self.accounts.is_empty() {
            self.iter_accounts().await?;
        }
        find_object(self.accounts.iter().cloned(), |a| a.id == account_id, "account", account_id)
    }

    /// Securities accounts; the endpoint fails intermittently.
    async fn market_accounts(&mut self) -> Result<Vec<MarketAccount>> {
        let result = match self
            .post(pages::MARKET_LIST_URL, json!({}), BnpPage::MarketList)
            .await
        {
            Ok(page) => pages::parse_market_accounts(&page, "securityAccountsList"),
            Err(e) => Err(e),
        };
        or_empty_when_unavailable("market account list", result)
    }

    async fn market_account_for(&mut self, account: &Account) -> Result<Option<MarketAccount>> {
        let accounts = self.market_accounts().await?;
        Ok(accounts.into_iter().find(|m| m.name == account.label))
    }

    /// Pending operations of a current account.
    pub async fn iter_coming(&mut self, account_id: &str) -> Result<Vec<Transaction>> {
        let account = self.account(account_id).await?;
        match account.account_type {
            AccountType::LifeInsurance | AccountType::Market => Ok(Vec::new()),
            _ => self.operations(&account, true).await,
        }
    }

    async fn operations(&mut self, account: &Account, coming: bool) -> Result<Vec<Transaction>> {
        let (start, end) = pages::history_window(Local::now().date_naive());
        let page = self
            .post(
                pages::HISTORY_URL,
                json!({
                    "ibanCrypte": account.id,
                    "pastOrPending": 1,
                    "triAV": 0,
                    "startDate": start,
                    "endDate": end,
                }),
                BnpPage::History,
            )
            .await?;
        pages::parse_history(&page, coming)
    }

    async fn life_insurance_history(&mut self, account: &Account) -> Result<Vec<Transaction>> {
        let page = self
            .post(
                pages::LIFE_INSURANCE_HISTORY_URL,
                json!({"ibanCrypte": account.id}),
                BnpPage::LifeInsurancesHistory,
            )
            .await?;

        let mut history = Vec::new();
        for movement in pages::parse_life_insurance_history(&page)? {
            let mut body = movement.reference;
            body["ibanCrypte"] = json!(account.id);
            let detail = self
                .post(pages::LIFE_INSURANCE_DETAIL_URL, body, BnpPage::LifeInsurancesDetail)
                .await?;
            let mut tr = movement.transaction;
            tr.investments = pages::parse_movement_detail(&detail)?;
            history.push(tr);
        }
        Ok(history)
    }

    async fn market_history(&mut self, account: &Account) -> Result<Vec<Transaction>> {
        let Some(number) = self.market_account_for(account).await?.and_then(|m| m.number) else {
            return Ok(Vec::new());
        };
        let page = self
            .post(
                pages::MARKET_HISTORY_URL,
                json!({"securityAccountNumber": number}),
                BnpPage::MarketHistory,
            )
            .await?;
        pages::parse_market_history(&page)
    }

    async fn market_investments(&mut self, account: &Account) -> Result<Vec<Investment>> {
        let Some(number) = self.market_account_for(account).await?.and_then(|m| m.number) else {
            return Ok(Vec::new());
        };
        let result = match self
            .post(
                pages::MARKET_URL,
                json!({"securityAccountNumber": number}),
                BnpPage::Market,
            )
            .await
        {
            Ok(page) => pages::parse_market_investments(&page),
            Err(e) => Err(e),
        };
        or_empty_when_unavailable("portfolio details", result)
    }
}

#[async_trait]
impl Connector for BnpConnector {
    fn name(&self) -> &'static str {
        self.family.name()
    }

    async fn ensure_authenticated(&mut self) -> Result<()> {
        self.session.ensure_authenticated().await
    }

    async fn teardown(&mut self) -> Result<()> {
        self.session.teardown().await
    }
}

#[async_trait]
impl AccountProvider for BnpConnector {
    async fn iter_accounts(&mut self) -> Result<Vec<Account>> {
        self.session.ensure_authenticated().await?;

        let page = self
            .session
            .fetch_expecting(HttpRequest::get(pages::IBANS_URL), &[BnpPage::Ibans])
            .await?;
        let mut ibans = pages::parse_ibans(&page)?;
        let page = self
            .post(
                pages::TRANSFER_INIT_URL,
                json!({"modeBeneficiaire": "0"}),
                BnpPage::TransferInit,
            )
            .await?;
        ibans.extend(pages::parse_transfer_ibans(&page, "Crediteur")?);

        let page = self
            .session
            .fetch_expecting(HttpRequest::get(pages::ACCOUNTS_URL), &[BnpPage::Accounts])
            .await?;
        let mut accounts = pages::parse_accounts(&page, &ibans)?;

        let page = self
            .post(pages::MARKET_SYN_URL, json!({}), BnpPage::MarketSyn)
            .await?;
        let synthesis = pages::parse_market_accounts(&page, "contratList")?;
        for account in accounts
            .iter_mut()
            .filter(|a| a.account_type == AccountType::Market)
        {
            if let Some(market) = synthesis.iter().find(|m| m.name == account.label) {
                account.valuation_diff = market.profit_loss;
            }
        }

        info!("{} accounts listed", accounts.len());
        self.accounts = accounts.clone();
        Ok(accounts)
    }

    async fn get_account(&mut self, id: &str) -> Result<Account> {
        let accounts = self.iter_accounts().await?;
        find_object(accounts, |a| a.id == id, "account", id)
    }
}

#[async_trait]
impl HistoryProvider for BnpConnector {
    async fn iter_history(&mut self, account_id: &str) -> Result<Vec<Transaction>> {
        let account = self.account(account_id).await?;
        match account.account_type {
            AccountType::LifeInsurance => self.life_insurance_history(&account).await,
            AccountType::Market => self.market_history(&account).await,
            _ => self.operations(&account, false).await,
        }
    }
}

#[async_trait]
impl InvestmentProvider for BnpConnector {
    async fn iter_investments(&mut self, account_id: &str) -> Result<Vec<Investment>> {
        let account = self.account(account_id).await?;
        match account.account_type {
            AccountType::LifeInsurance => {
                let page = self
                    .post(
                        pages::LIFE_INSURANCE_URL,
                        json!({"ibanCrypte": account.id}),
                        BnpPage::LifeInsurances,
                    )
                    .await?;
                pages::parse_life_insurance_investments(&page)
            }
            AccountType::Market => self.market_investments(&account).await,
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::MockTransport;

    const BASE: &str = "https://mabanque.bnpparibas/";

    fn connector(mock: &MockTransport, username: &str, password: &str) -> BnpConnector {
        let config = ConnectorConfig::new(username, password).with_retry_backoff(Duration::ZERO);
        BnpConnector::new(BnpFamily::BnpParibas, config, Box::new(mock.clone())).unwrap()
    }

    fn script_login(mock: &MockTransport) {
        mock.push_html(
            "",
            r#"<form name="logincanalnet"><input type="hidden" name="gridId" value="g1"/></form>"#,
        )
        .push_html(&format!("{}fr/espace-prive/comptes-et-contrats", BASE), "");
    }

    fn script_accounts(mock: &MockTransport) {
        mock.push_json("", json!({"message": "OK", "data": {"listeRib": [
                {"infoCompte": {"ibanCrypte": "CHK", "iban": "FR7630004000"}}]}}))
            .push_json("", json!({"message": "OK", "data": {"infoVirement": {"listeComptesCrediteur": [
                {"ibanCrypte": "SAV", "iban": "FR7630004111"}]}}}))
            .push_json("", json!({"message": "OK", "data": {"infoUdc": {"familleCompte": [
                {"idFamilleCompte": 1, "compte": [{"key": "CHK", "libelleProduit": "Compte chèques", "soldeDispo": 100, "devise": "EUR"}]},
                {"idFamilleCompte": 2, "compte": [{"key": "SAV", "libelleProduit": "Livret A", "soldeDispo": 50, "devise": "EUR"}]},
                {"idFamilleCompte": 4, "compte": [{"key": "PEA", "libellePersoProduit": "PEA", "soldeDispo": 900, "devise": "EUR"}]},
                {"idFamilleCompte": 5, "compte": [{"key": "AV", "libellePersoProduit": "Vie", "soldeDispo": 1000, "devise": "EUR"}]}
            ]}}}))
            .push_json("", json!({"contratList": [{"securityAccountName": "PEA", "profitLoss": 12.5}]}));
    }

    #[tokio::test]
    async fn test_non_numeric_credentials_fail_before_any_request() {
        let mock = MockTransport::new();
        let mut bnp = connector(&mock, "abc", "123456");

        let err = bnp.ensure_authenticated().await.unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidCredentials(_)));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_threshold_requires_action() {
        let mock = MockTransport::new();
        mock.push_html(
            "",
            r#"<form name="logincanalnet"><input type="hidden" name="gridId" value="g1"/></form>"#,
        )
        .push_html(
            &format!("{}fr/espace-prive/100-connexions", BASE),
            "<h1>Vous avez atteint 100 connexions</h1>",
        );
        let mut bnp = connector(&mock, "123", "456");

        let err = bnp.ensure_authenticated().await.unwrap_err();
        assert!(matches!(err, ConnectorError::ActionRequired(ref m) if m.contains("100 connexions")));
        assert!(mock.requests()[0].url.contains("timestamp="));
        assert_eq!(mock.requests()[1].form_value("gridId"), Some("g1"));
    }

    #[tokio::test]
    async fn test_accounts_merge_ibans_and_market_synthesis() {
        let mock = MockTransport::new();
        script_login(&mock);
        script_accounts(&mock);
        let mut bnp = connector(&mock, "123", "456");

        let accounts = bnp.iter_accounts().await.unwrap();
        assert_eq!(accounts.len(), 4);
        assert_eq!(accounts[0].iban.as_deref(), Some("FR7630004000"));
        assert_eq!(accounts[1].iban.as_deref(), Some("FR7630004111"));
        assert_eq!(accounts[2].valuation_diff, Some(12.5));
        assert_eq!(mock.requests()[3].body, crate::transport::Body::Json(json!({"modeBeneficiaire": "0"})));
    }

    #[tokio::test]
    async fn test_history_past_and_coming() {
        let ops = json!({"message": "OK", "data": {"listerOperations": {"compte": {
            "operationPassee": [
                {"idOperation": "1", "dateOperation": "03-02-2017", "libelleOperation": "PRLV EDF", "montant": {"montant": -40.0}},
                {"idOperation": "2", "dateOperation": "01-02-2017", "libelleOperation": "VIR SALAIRE", "montant": {"montant": 2000}}
            ],
            "operationAVenir": [
                {"idOperation": "3", "dateOperation": "05-02-2017", "libelleOperation": "CB", "montant": {"montant": "-12,30"}}
            ]
        }}}});
        let mock = MockTransport::new();
        script_login(&mock);
        script_accounts(&mock);
        mock.push_json("", ops.clone()).push_json("", ops);
        let mut bnp = connector(&mock, "123", "456");

        let past = bnp.iter_history("CHK").await.unwrap();
        assert_eq!(past.len(), 2);
        assert_eq!(past[0].amount, -40.0);
        assert!(!past[0].coming);

        let coming = bnp.iter_coming("CHK").await.unwrap();
        assert_eq!(coming.len(), 1);
        assert_eq!(coming[0].amount, -12.3);
        assert!(coming[0].coming);

        match &mock.requests()[6].body {
            crate::transport::Body::Json(body) => {
                assert_eq!(body["ibanCrypte"], "CHK");
                assert_eq!(body["pastOrPending"], 1);
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_market_investments_degrade_on_server_error() {
        let mock = MockTransport::new();
        script_login(&mock);
        script_accounts(&mock);
        mock.push_status("", 500, "Internal Server Error")
            .push_json("", json!({"securityAccountsList": [
                {"securityAccountName": "PEA", "securityAccountNumber": "42"}]}))
            .push_status("", 500, "Internal Server Error");
        let mut bnp = connector(&mock, "123", "456");

        assert!(bnp.iter_investments("PEA").await.unwrap().is_empty());
        assert!(bnp.iter_investments("PEA").await.unwrap().is_empty());
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_market_history_server_error_is_reported() {
        let mock = MockTransport::new();
        script_login(&mock);
        script_accounts(&mock);
        mock.push_json("", json!({"securityAccountsList": [
                {"securityAccountName": "PEA", "securityAccountNumber": "42"}]}))
            .push_status("", 503, "Service Unavailable");
        let mut bnp = connector(&mock, "123", "456");

        assert!(matches!(
            bnp.iter_history("PEA").await,
            Err(ConnectorError::UpstreamUnavailable { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_life_insurance_history_with_movement_details() {
        let mock = MockTransport::new();
        script_login(&mock);
        script_accounts(&mock);
        mock.push_json("", json!({"message": "OK", "data": {"listeMouvements": [
                {"idMouvement": 77, "ordreMouvement": 1, "codeTypeMouvement": "VL",
                 "dateEffet": "10/01/2017", "lcTypeMouvement": "Versement libre", "mtNet": 500}]}}))
            .push_json("", json!({"message": "OK", "data": {"listeSupportsMouvement": [
                {"lsSupport": "Fonds euro", "mtNet": 300}, {"lsSupport": "Actions", "cdSuppIsin": "FR001", "mtNet": 200}]}}));
        let mut bnp = connector(&mock, "123", "456");

        let history = bnp.iter_history("AV").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].label, "Versement libre");
        assert_eq!(history[0].investments.len(), 2);
        assert_eq!(history[0].investments[1].code.as_deref(), Some("FR001"));

        match &mock.requests().last().unwrap().body {
            crate::transport::Body::Json(body) => {
                assert_eq!(body["idMouvement"], 77);
                assert_eq!(body["ibanCrypte"], "AV");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_family_hosts() {
        assert_eq!(BnpFamily::HelloBank.base_url(), "https://www.hellobank.fr/");
        assert_eq!(BnpFamily::BnpParibas.name(), "bnp");
    }
}

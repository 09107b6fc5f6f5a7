use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::capabilities::{
    find_object, Account, AccountProvider, HistoryProvider, Investment, InvestmentProvider,
    Transaction,
};
use crate::config::{ConnectorConfig, Credentials};
use crate::error::{ConnectorError, Result};
use crate::page::ResolvedPage;
use crate::pagination::Paginator;
use crate::retry::or_empty_when_unavailable;
use crate::session::Session;
use crate::site_ensure;
use crate::traits::{impl_connector, LoginFlow};
use crate::transport::{HttpRequest, Transport};

use super::pages::{self, BinckPage, ListedAccount, Portfolio, TOKEN_HEADER};

/// ログイン時にアカウントロックを示すメッセージ
const ACCOUNT_BLOCKED: &[&str] = &[
    "Votre compte a été bloqué / clôturé",
    "Votre compte est bloqué, veuillez contacter le Service Clients",
];

struct BinckLogin;

#[async_trait]
impl LoginFlow<BinckPage> for BinckLogin {
    async fn login(&self, session: &mut Session<BinckPage>, credentials: &Credentials) -> Result<()> {
        let page = session.get(pages::LOGIN_URL).await?;
        let mut fields = pages::login_form(&page)?;
        fields.push(("UserName".to_string(), credentials.username.clone()));
        fields.push(("Password".to_string(), credentials.password.clone()));

        let page = session
            .fetch(HttpRequest::post_form(pages::LOGIN_URL, fields))
            .await?;

        match page.kind {
            BinckPage::Login => {
                let error = pages::login_error(&page)?.unwrap_or_default();
                if error.contains("mot de passe") {
                    Err(ConnectorError::InvalidCredentials(error))
                } else if ACCOUNT_BLOCKED.iter().any(|m| error.contains(m)) {
                    Err(ConnectorError::ActionRequired(error))
                } else {
                    Err(ConnectorError::SiteAssertion(format!(
                        "unhandled behavior at login: error is {:?}",
                        error
                    )))
                }
            }
            BinckPage::LogonFlow | BinckPage::Questions => Err(ConnectorError::ActionRequired(
                "a compliance questionnaire must be filled in on the website".into(),
            )),
            BinckPage::ChangePassword => Err(ConnectorError::ActionRequired(
                "the website requires a password change".into(),
            )),
            _ => Ok(()),
        }
    }

    fn is_login_page(&self, kind: BinckPage) -> bool {
        kind == BinckPage::Login
    }

    async fn logout(&self, session: &mut Session<BinckPage>) -> Result<()> {
        session.fetch_raw(HttpRequest::get(pages::LOGOFF_URL)).await?;
        Ok(())
    }
}

/// Binck brokerage accounts.
///
/// Every account detail lives behind an account switch that re-renders the
/// overview for the selected account, so each operation switches first.
pub struct BinckConnector {
    session: Session<BinckPage>,
    accounts: Vec<ListedAccount>,
    token: Option<String>,
}

impl BinckConnector {
    pub const BASE_URL: &'static str = "https://web.binck.fr/";

    pub fn new(config: ConnectorConfig, transport: Box<dyn Transport>) -> Result<Self> {
        let navigation = pages::navigation(config.base_url_or(Self::BASE_URL))?;
        Ok(Self {
            session: Session::new(config, transport, navigation, BinckLogin),
            accounts: Vec::new(),
            token: None,
        })
    }

    pub fn session(&self) -> &Session<BinckPage> {
        &self.session
    }

    async fn overview(&mut self) -> Result<ResolvedPage<BinckPage>> {
        let page = self
            .session
            .fetch_expecting(HttpRequest::get(pages::ACCOUNTS_URL), &[BinckPage::Accounts])
            .await?;
        self.token = pages::parse_token(&page)?;
        Ok(page)
    }

    /// Selects `account_id` as the current account; returns the re-rendered
    /// overview.
    async fn switch_to(&mut self, account_id: &str) -> Result<ResolvedPage<BinckPage>> {
        if self.token.is_none() {
            self.overview().await?;
        }
        let token = self.token.clone().unwrap_or_default();

        debug!("Switching to account {}", account_id);
        let request = HttpRequest::post_form(pages::SWITCH_ACCOUNT_URL, [("accountNumber", account_id)])
            .with_header(TOKEN_HEADER, token);
        let response = self.session.fetch_raw(request).await?;

        if response.status >= 500 {
            if let Some(message) = pages::account_error(&response.body)? {
                return Err(ConnectorError::ActionRequired(message));
            }
        }
        let page = self.session.resolve_response(response)?;
        site_ensure!(
            page.kind == BinckPage::Accounts,
            "account switch landed on {:?} ({})",
            page.kind,
            page.url
        );
        self.token = pages::parse_token(&page)?;
        Ok(page)
    }

    /// Portfolio of the current account; `None` when the site has none for
    /// it (404 behind a hidden link).
    async fn portfolio(&mut self, currency: Option<&str>) -> Result<Option<Portfolio>> {
        let token = self.token.clone().unwrap_or_default();
        let request = HttpRequest::post_form(pages::PORTFOLIO_URL, [("grouping", "SecurityCategory")])
            .with_header(TOKEN_HEADER, token);

        match self
            .session
            .fetch_expecting(request, &[BinckPage::Investment])
            .await
        {
            Ok(page) => Ok(Some(pages::parse_portfolio(&page, currency)?)),
            Err(ConnectorError::Http { status: 404, .. }) => {
                debug!("No portfolio for the current account");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn listed(&mut self, account_id: &str) -> Result<ListedAccount> {
        if self.accounts.is_empty() {
            self.iter_accounts().await?;
        }
        find_object(
            self.accounts.iter().cloned(),
            |a| a.account.id == account_id,
            "account",
            account_id,
        )
    }
}

impl_connector!(BinckConnector, "binck");

#[async_trait]
impl AccountProvider for BinckConnector {
    async fn iter_accounts(&mut self) -> Result<Vec<Account>> {
        self.session.ensure_authenticated().await?;
        let overview = self.overview().await?;
        let mut listed = pages::parse_accounts(&overview)?;
        info!("{} accounts listed", listed.len());

        for entry in &mut listed {
            let page = self.switch_to(&entry.account.id).await?;
            entry.account.iban = pages::parse_iban(&page)?;
            entry.has_portfolio = pages::has_portfolio(&page)?;
            if !entry.has_portfolio {
                continue;
            }

            let currency = entry.account.currency.clone();
            match self.portfolio(currency.as_deref()).await {
                Ok(Some(portfolio)) => entry.account.valuation_diff = portfolio.valuation_diff,
                Ok(None) => entry.has_portfolio = false,
                Err(ConnectorError::UpstreamUnavailable { status, .. }) => {
                    warn!("Portfolio of {} unavailable (HTTP {})", entry.account.id, status);
                }
                Err(e) => return Err(e),
            }
        }

        self.accounts = listed.clone();
        Ok(listed.into_iter().map(|entry| entry.account).collect())
    }
}

#[async_trait]
impl HistoryProvider for BinckConnector {
    async fn iter_history(&mut self, account_id: &str) -> Result<Vec<Transaction>> {
        let entry = self.listed(account_id).await?;
        self.switch_to(account_id).await?;
        let token = self.token.clone().unwrap_or_default();

        let fields: Vec<(String, String)> = vec![
            (
                "currencyCode".to_string(),
                entry.account.currency.clone().unwrap_or_else(|| "EUR".to_string()),
            ),
            ("startDate".to_string(), String::new()),
            ("endDate".to_string(), String::new()),
        ];
        let start = HttpRequest::post_form(pages::HISTORY_URL, fields.clone())
            .with_header(TOKEN_HEADER, token.clone());

        let history = Paginator::new(start, &[BinckPage::History], move |page| {
            pages::parse_history(page, &fields, &token)
        })
        .collect(&mut self.session)
        .await?;
        info!("{} transactions for account {}", history.len(), account_id);
        Ok(history)
    }
}

#[async_trait]
impl InvestmentProvider for BinckConnector {
    async fn iter_investments(&mut self, account_id: &str) -> Result<Vec<Investment>> {
        let entry = self.listed(account_id).await?;
        if !entry.has_portfolio {
            return Ok(Vec::new());
        }
        self.switch_to(account_id).await?;

        let currency = entry.account.currency.clone();
        let result = match self.portfolio(currency.as_deref()).await {
            Ok(Some(portfolio)) => {
                let mut investments = portfolio.investments;
                if let Some(liquidity) = entry.liquidity {
                    investments.push(Investment::liquidity(liquidity, currency));
                }
                Ok(investments)
            }
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(e),
        };
        or_empty_when_unavailable("portfolio", result)
    }
}

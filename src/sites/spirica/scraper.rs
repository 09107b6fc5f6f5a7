use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::capabilities::{
    find_object, Account, AccountProvider, HistoryProvider, Investment, InvestmentProvider,
    Transaction,
};
use crate::config::{ConnectorConfig, Credentials};
use crate::error::{ConnectorError, Result};
use crate::page::ResolvedPage;
use crate::session::Session;
use crate::traits::{impl_connector, LoginFlow};
use crate::transport::{HttpRequest, Transport};

use super::pages::{self, SpiricaPage, HISTORY_PAGE_SIZE};

struct SpiricaLogin;

#[async_trait]
impl LoginFlow<SpiricaPage> for SpiricaLogin {
    async fn login(&self, session: &mut Session<SpiricaPage>, credentials: &Credentials) -> Result<()> {
        let page = session.get(pages::LOGIN_URL).await?;
        let request = pages::login_request(&page, &credentials.username, &credentials.password)?;
        let page = session.fetch(request).await?;

        match page.kind {
            SpiricaPage::Login => Err(ConnectorError::InvalidCredentials(pages::login_error(&page)?)),
            SpiricaPage::Maintenance => Err(ConnectorError::UpstreamUnavailable {
                status: 503,
                url: page.url,
            }),
            _ => Ok(()),
        }
    }

    fn is_login_page(&self, kind: SpiricaPage) -> bool {
        kind == SpiricaPage::Login
    }
}

/// Spirica life-insurance contracts (white-labelled on partner domains).
pub struct SpiricaConnector {
    session: Session<SpiricaPage>,
    accounts: Vec<Account>,
    /// 口座ごとの投資キャッシュ
    investments: HashMap<String, Vec<Investment>>,
}

impl SpiricaConnector {
    /// The site is served from each partner's domain, so the base URL is
    /// mandatory.
    pub fn new(config: ConnectorConfig, transport: Box<dyn Transport>) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| ConnectorError::Config("spirica needs a base URL".into()))?;
        let navigation = pages::navigation(&base_url)?;
        Ok(Self {
            session: Session::new(config, transport, navigation, SpiricaLogin),
            accounts: Vec::new(),
            investments: HashMap::new(),
        })
    }

    pub fn session(&self) -> &Session<SpiricaPage> {
        &self.session
    }

    async fn account(&mut self, account_id: &str) -> Result<Account> {
        if self.accounts.is_empty() {
            self.iter_accounts().await?;
        }
        find_object(self.accounts.iter().cloned(), |a| a.id == account_id, "account", account_id)
    }

    async fn details(&mut self, account: &Account) -> Result<ResolvedPage<SpiricaPage>> {
        let url = account.url.clone().ok_or_else(|| {
            ConnectorError::SiteAssertion(format!("no detail link for contract {}", account.id))
        })?;
        self.session
            .fetch_expecting(HttpRequest::get(url), &[SpiricaPage::Details])
            .await
    }

    async fn history_tab(&mut self, account: &Account) -> Result<ResolvedPage<SpiricaPage>> {
        let details = self.details(account).await?;
        let request = pages::tab_request(&details, pages::HISTORY_TAB)?;
        self.session
            .fetch_expecting(request, &[SpiricaPage::Details])
            .await
    }

    /// `None` when the page came back without its table.
    async fn history_page(
        &mut self,
        tab: &ResolvedPage<SpiricaPage>,
        page_number: usize,
    ) -> Result<Option<Vec<Transaction>>> {
        let request = pages::history_request(tab, page_number)?;
        let page = self.session.fetch(request).await?;
        if page.kind != SpiricaPage::Details {
            return Ok(None);
        }
        pages::parse_history(&page, page_number * HISTORY_PAGE_SIZE)
    }
}

impl_connector!(SpiricaConnector, "spirica");

#[async_trait]
impl AccountProvider for SpiricaConnector {
    async fn iter_accounts(&mut self) -> Result<Vec<Account>> {
        let page = self
            .session
            .fetch_expecting(HttpRequest::get(pages::ACCOUNTS_URL), &[SpiricaPage::Accounts])
            .await?;
        let mut accounts = pages::parse_accounts(&page)?;
        for account in &mut accounts {
            if let Some(url) = account.url.take() {
                account.url = Some(self.session.absolute(&url)?);
            }
        }
        info!("{} contracts listed", accounts.len());
        self.accounts = accounts.clone();
        Ok(accounts)
    }
}

#[async_trait]
impl InvestmentProvider for SpiricaConnector {
    async fn iter_investments(&mut self, account_id: &str) -> Result<Vec<Investment>> {
        if let Some(cached) = self.investments.get(account_id) {
            debug!("Investments of {} served from cache", account_id);
            return Ok(cached.clone());
        }
        let account = self.account(account_id).await?;
        let details = self.details(&account).await?;
        let lines = pages::parse_investments(&details)?;

        let request = pages::tab_request(&details, pages::UNITPRICE_TAB)?;
        let prm = self
            .session
            .fetch_expecting(request, &[SpiricaPage::Details])
            .await?;
        let unitprices = pages::parse_unitprice_lines(&prm)?;

        let investments = pages::merge_unitprices(lines, &unitprices)?;
        self.investments
            .insert(account_id.to_string(), investments.clone());
        Ok(investments)
    }
}

#[async_trait]
impl HistoryProvider for SpiricaConnector {
    async fn iter_history(&mut self, account_id: &str) -> Result<Vec<Transaction>> {
        let account = self.account(account_id).await?;
        let mut tab = self.history_tab(&account).await?;
        let announced = pages::count_transactions(&tab)? / HISTORY_PAGE_SIZE;
        let cap = self.session.config().max_pages.saturating_sub(1);
        let last_page = announced.min(cap);
        if last_page < announced {
            warn!("Page cap reached, reading {} of {} history pages", last_page + 1, announced + 1);
        }

        let mut history = Vec::new();
        for page_number in 0..=last_page {
            if self.session.is_here(SpiricaPage::Login) {
                warn!("Logged out while reading history, logging in again");
                self.session.authenticate().await?;
                tab = self.history_tab(&account).await?;
            }

            if let Some(rows) = self.history_page(&tab, page_number).await? {
                history.extend(rows);
                continue;
            }
            warn!("History page {} failed, retrying from the contract page", page_number);
            tab = self.history_tab(&account).await?;
            match self.history_page(&tab, page_number).await? {
                Some(rows) => history.extend(rows),
                None => error!("History page {} failed twice, skipping it", page_number),
            }
        }
        info!("{} transactions for contract {}", history.len(), account_id);
        Ok(history)
    }
}

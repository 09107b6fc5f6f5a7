use async_trait::async_trait;
use tracing::info;

use crate::capabilities::{
    find_object, Account, AccountProvider, HistoryProvider, LabelPatterns, Transaction,
};
use crate::config::{ConnectorConfig, Credentials};
use crate::error::{ConnectorError, Result};
use crate::pagination::Paginator;
use crate::session::Session;
use crate::traits::{Connector, LoginFlow};
use crate::transport::{HttpRequest, Transport};

use super::pages::{self, CicPage, ListedAccount};

/// Card statement total repeated in the account history.
const CARD_STATEMENT: &str = "RELEVE CARTE";

/// Banks sharing the Crédit Mutuel platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CicFamily {
    Cic,
    CreditMutuel,
}

impl CicFamily {
    pub fn base_url(self) -> &'static str {
        match self {
            CicFamily::Cic => "https://www.cic.fr/",
            CicFamily::CreditMutuel => "https://www.creditmutuel.fr/",
        }
    }

    /// First path segment of every page of the member.
    pub fn space(self) -> &'static str {
        match self {
            CicFamily::Cic => "sb",
            CicFamily::CreditMutuel => "cmcee",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CicFamily::Cic => "cic",
            CicFamily::CreditMutuel => "creditmutuel",
        }
    }
}

struct CicLogin {
    space: &'static str,
}

#[async_trait]
impl LoginFlow<CicPage> for CicLogin {
    async fn login(&self, session: &mut Session<CicPage>, credentials: &Credentials) -> Result<()> {
        let page = session.get(&pages::login_url(self.space)).await?;
        let request = pages::login_request(&page, &credentials.username, &credentials.password)?;
        let page = session.fetch(request).await?;

        match page.kind {
            CicPage::Login | CicPage::LoginError => Err(ConnectorError::InvalidCredentials(
                "wrong login or password".into(),
            )),
            CicPage::ChangePassword => Err(ConnectorError::ActionRequired(
                "the website asks for a password change".into(),
            )),
            CicPage::VerifCode => Err(ConnectorError::ActionRequired(
                "the website asks for a code from a security card".into(),
            )),
            _ => Ok(()),
        }
    }

    fn is_login_page(&self, kind: CicPage) -> bool {
        kind == CicPage::Login
    }
}

/// CIC and Crédit Mutuel accounts (HTML pages).
pub struct CicConnector {
    family: CicFamily,
    session: Session<CicPage>,
    accounts: Vec<ListedAccount>,
    patterns: LabelPatterns,
}

impl CicConnector {
    pub fn new(family: CicFamily, config: ConnectorConfig, transport: Box<dyn Transport>) -> Result<Self> {
        let navigation = pages::navigation(config.base_url_or(family.base_url()))?;
        let login = CicLogin {
            space: family.space(),
        };
        Ok(Self {
            family,
            session: Session::new(config, transport, navigation, login),
            accounts: Vec::new(),
            patterns: pages::label_patterns()?,
        })
    }

    pub fn family(&self) -> CicFamily {
        self.family
    }

    async fn listed(&mut self, account_id: &str) -> Result<ListedAccount> {
        if self.accounts.is_empty() {
            self.iter_accounts().await?;
        }
        find_object(
            self.accounts.iter().cloned(),
            |l| l.account.id == account_id,
            "account",
            account_id,
        )
    }

    /// Every page of one listing, following `paginationForm`.
    async fn list_operations(&mut self, url: &str, next_id: &mut usize) -> Result<Vec<Transaction>> {
        let patterns = &self.patterns;
        Paginator::new(
            HttpRequest::get(url),
            &[CicPage::Operations, CicPage::Card, CicPage::NoOperations],
            |page| pages::parse_history_page(page, patterns, next_id),
        )
        .collect(&mut self.session)
        .await
    }
}

#[async_trait]
impl Connector for CicConnector {
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
impl AccountProvider for CicConnector {
    async fn iter_accounts(&mut self) -> Result<Vec<Account>> {
        let page = self
            .session
            .fetch_expecting(
                HttpRequest::get(pages::accounts_url(self.family.space())),
                &[CicPage::Accounts],
            )
            .await?;
        let accounts = pages::parse_accounts(&page)?;
        info!("{} accounts listed", accounts.len());
        self.accounts = accounts.clone();
        Ok(accounts.into_iter().map(|l| l.account).collect())
    }
}

#[async_trait]
impl HistoryProvider for CicConnector {
    /// Account operations then deferred card lines, newest first.
    async fn iter_history(&mut self, account_id: &str) -> Result<Vec<Transaction>> {
        let listed = self.listed(account_id).await?;
        let mut next_id = 0;

        let mut history: Vec<Transaction> = self
            .list_operations(&listed.link, &mut next_id)
            .await?
            .into_iter()
            .filter(|tr| tr.raw != CARD_STATEMENT)
            .collect();
        for card_link in &listed.card_links {
            history.extend(self.list_operations(card_link, &mut next_id).await?);
        }

        history.sort_by(|a, b| b.rdate.cmp(&a.rdate));
        info!("{} transactions for account {}", history.len(), account_id);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::capabilities::TransactionType;
    use crate::transport::MockTransport;

    const LOGIN: &str = "https://www.cic.fr/sb/fr/banques/particuliers/index.html";
    const ACCOUNTS: &str = "https://www.cic.fr/sb/fr/banque/situation_financiere.cgi";
    const OPERATIONS: &str = "https://www.cic.fr/sb/fr/banque/mouvements.cgi?rib=123";
    const NEXT: &str = "https://www.cic.fr/sb/fr/banque/mvts_instance.cgi";
    const CARD: &str = "https://www.cic.fr/sb/fr/banque/operations_carte.cgi?rib=123&mois=2";

    const LOGIN_HTML: &str = r#"<form name="ident" action="/sb/fr/identification/default.cgi" method="post">
        <input type="hidden" name="_cm_token" value="t1"/>
        <input type="text" name="_cm_user"/><input type="password" name="_cm_pwd"/></form>"#;

    const ACCOUNTS_HTML: &str = r#"<table>
        <tr><td class="i g"><a href="mouvements.cgi?rib=123">COMPTE CHEQUES</a></td><td>500,00 EUR</td><td></td></tr>
        <tr><td class="p g"><a href="operations_carte.cgi?rib=123&amp;mois=2">CARTE</a></td><td></td><td>-40,00 EUR</td></tr>
        </table>"#;

    fn operations_html(rows: &str, counter: Option<&str>) -> String {
        let form = counter
            .map(|c| {
                format!(
                    r#"<form id="paginationForm" action="mvts_instance.cgi">
                    <input type="input" name="_pid" value="p1"/><span>{}</span></form>"#,
                    c
                )
            })
            .unwrap_or_default();
        format!("<table>{}</table>{}", rows, form)
    }

    fn connector(mock: &MockTransport) -> CicConnector {
        let config = ConnectorConfig::new("user", "secret").with_retry_backoff(Duration::ZERO);
        CicConnector::new(CicFamily::Cic, config, Box::new(mock.clone())).unwrap()
    }

    fn script_login(mock: &MockTransport) {
        mock.push_html(LOGIN, LOGIN_HTML)
            .push_html("https://www.cic.fr/sb/fr/banque/espace_personnel.aspx", "");
    }

    #[tokio::test]
    async fn test_login_error_page() {
        let mock = MockTransport::new();
        mock.push_html(LOGIN, LOGIN_HTML)
            .push_html("https://www.cic.fr/sb/fr/identification/default.cgi", "");
        let mut cic = connector(&mock);

        assert!(matches!(
            cic.ensure_authenticated().await,
            Err(ConnectorError::InvalidCredentials(_))
        ));
        let sent = mock.requests();
        assert_eq!(sent[1].url, "https://www.cic.fr/sb/fr/identification/default.cgi");
        assert_eq!(sent[1].form_value("_cm_token"), Some("t1"));
        assert_eq!(sent[1].form_value("_cm_user"), Some("user"));
        assert_eq!(sent[1].form_value("_cm_pwd"), Some("secret"));
    }

    #[tokio::test]
    async fn test_security_card_code_requires_action() {
        let mock = MockTransport::new();
        mock.push_html(LOGIN, LOGIN_HTML)
            .push_html("https://www.cic.fr/sb/fr/validation/verif_code.cgi?x=1", "");
        let mut cic = connector(&mock);

        assert!(matches!(
            cic.ensure_authenticated().await,
            Err(ConnectorError::ActionRequired(_))
        ));
    }

    #[tokio::test]
    async fn test_history_pages_and_card_lines() {
        let mock = MockTransport::new();
        script_login(&mock);
        mock.push_html(ACCOUNTS, ACCOUNTS_HTML)
            .push_html(
                OPERATIONS,
                &operations_html(
                    r#"<tr><td class="i g">10/02/2017</td><td>PRLV EDF</td><td>45,00</td><td></td></tr>
                       <tr><td class="i g">08/02/2017</td><td>RELEVE CARTE</td><td>40,00</td><td></td></tr>"#,
                    Some("1 / 2"),
                ),
            )
            .push_html(
                NEXT,
                &operations_html(
                    r#"<tr><td class="i g">01/02/2017</td><td>VIR SALAIRE</td><td></td><td>2 000,00</td></tr>"#,
                    Some("2 / 2"),
                ),
            )
            .push_html(
                CARD,
                r#"<table class="liste"><tbody>
                   <tr><td>15/02/2017</td><td>SUPERMARCHE</td><td>PARIS</td><td>-40,00</td></tr>
                   </tbody></table>"#,
            );
        let mut cic = connector(&mock);

        let accounts = cic.iter_accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].coming, Some(-40.0));

        let history = cic.iter_history("123").await.unwrap();
        let labels: Vec<&str> = history.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["SUPERMARCHE PARIS", "EDF", "SALAIRE"]);
        assert!(history[0].coming);
        assert_eq!(history[0].transaction_type, TransactionType::Card);
        assert!(!history[1].coming);

        let sent = mock.requests();
        assert_eq!(sent[4].form_value("page"), Some("2"));
        assert_eq!(sent[4].form_value("_pid"), Some("p1"));
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_account_without_operations() {
        let mock = MockTransport::new();
        script_login(&mock);
        mock.push_html(
            ACCOUNTS,
            r#"<table><tr><td class="i g"><a href="mouvements.cgi?rib=9">LIVRET</a></td><td>10,00</td><td></td></tr></table>"#,
        )
        .push_html("https://www.cic.fr/sb/fr/banque/CR/arrivee.asp?rib=9", "");
        let mut cic = connector(&mock);

        assert!(cic.iter_history("9").await.unwrap().is_empty());
    }

    #[test]
    fn test_family_members() {
        assert_eq!(CicFamily::CreditMutuel.base_url(), "https://www.creditmutuel.fr/");
        assert_eq!(CicFamily::Cic.space(), "sb");
        assert_eq!(CicFamily::CreditMutuel.name(), "creditmutuel");
    }
}

use async_trait::async_trait;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::capabilities::{
    find_object, Bill, DocumentProvider, Profile, ProfileProvider, Subscription,
    SubscriptionProvider,
};
use crate::config::{ConnectorConfig, Credentials};
use crate::error::{ConnectorError, Result};
use crate::session::Session;
use crate::site_ensure;
use crate::traits::{impl_connector, LoginFlow};
use crate::transport::{HttpRequest, Transport};

use super::pages::{self, OrangePage, CALLER_ID, CALLER_ID_HEADER};

struct OrangeLogin;

#[async_trait]
impl LoginFlow<OrangePage> for OrangeLogin {
    async fn login(&self, session: &mut Session<OrangePage>, credentials: &Credentials) -> Result<()> {
        session.get(pages::LOGIN_URL).await?;

        let steps = [
            (pages::LOGIN_API_URL, json!({"login": credentials.username, "params": {}})),
            (
                pages::PASSWORD_API_URL,
                json!({"password": credentials.password, "remember": false}),
            ),
        ];
        let mut last = None;
        for (url, body) in steps {
            let response = session.fetch_raw(HttpRequest::post_json(url, body)).await?;
            match response.status {
                401 => return Err(ConnectorError::InvalidCredentials("wrong login or password".into())),
                // 何度も失敗すると一時的にブロックされる
                403 => return Err(ConnectorError::InvalidCredentials(pages::login_refusal(&response.body))),
                _ => {}
            }
            last = Some(session.resolve_response(response)?);
        }

        if let Some(page) = last.filter(|p| p.kind == OrangePage::Password) {
            if let Some(message) = pages::change_password_message(&page)? {
                return Err(ConnectorError::ActionRequired(message));
            }
        }
        Ok(())
    }

    fn is_login_page(&self, kind: OrangePage) -> bool {
        kind == OrangePage::Login
    }
}

/// Orange / Sosh customer area: subscriptions, bills and profile.
pub struct OrangeConnector {
    session: Session<OrangePage>,
    subscriptions: Vec<Subscription>,
}

impl OrangeConnector {
    pub const BASE_URL: &'static str = "https://espaceclientv3.orange.fr/";

    pub fn new(config: ConnectorConfig, transport: Box<dyn Transport>) -> Result<Self> {
        let navigation = pages::navigation(config.base_url_or(Self::BASE_URL))?;
        Ok(Self {
            session: Session::new(config, transport, navigation, OrangeLogin),
            subscriptions: Vec::new(),
        })
    }

    pub fn session(&self) -> &Session<OrangePage> {
        &self.session
    }

    /// Profile page, or the terms-of-use wall that replaces it.
    async fn profile(&mut self) -> Result<Profile> {
        let page = self
            .session
            .fetch_expecting(
                HttpRequest::get(pages::PROFILE_URL),
                &[OrangePage::Profile, OrangePage::ManageCgi],
            )
            .await?;
        if page.kind == OrangePage::Profile {
            return pages::parse_profile(&page);
        }

        // 規約の文言は manage.cgi ではなくホームにある
        let home = self.session.get(pages::HOME_URL).await?;
        let message = pages::home_error_message(&home)?;
        site_ensure!(
            message.contains(pages::CGU_MESSAGE),
            "unexpected message on the terms page: {:?}",
            message
        );
        Err(ConnectorError::ActionRequired(message))
    }

    async fn banner_subscriptions(&mut self, subscription_type: &str) -> Result<Vec<Subscription>> {
        self.session
            .fetch_expecting(
                HttpRequest::get(pages::gt_home_url(subscription_type)),
                &[OrangePage::GtHome],
            )
            .await?;
        let page = self
            .session
            .fetch_expecting(
                HttpRequest::get(pages::SUBSCRIPTIONS_URL),
                &[OrangePage::Subscriptions],
            )
            .await?;
        pages::parse_subscriptions_banner(&page)
    }

    async fn load_subscriptions(&mut self) -> Result<Vec<Subscription>> {
        let profile = self.profile().await?;
        let mut subscriptions = Vec::new();

        // pro の契約のみ
        match self
            .session
            .fetch_expecting(HttpRequest::get(pages::CONTRACTS_URL), &[OrangePage::Contracts])
            .await
        {
            Ok(page) => {
                let (contracts, total) = pages::parse_contracts(&page)?;
                site_ensure!(
                    total < pages::PRO_CONTRACTS_PAGE,
                    "{} pro contracts announced, more than one page",
                    total
                );
                subscriptions.extend(contracts);
                if total > 0 {
                    return Ok(with_subscriber(subscriptions, &profile.name));
                }
            }
            Err(ConnectorError::UpstreamUnavailable { status, .. }) => {
                debug!("Pro contracts unavailable (HTTP {})", status);
            }
            Err(e) => return Err(e),
        }

        for subscription_type in ["sosh", "orange"] {
            subscriptions.extend(self.banner_subscriptions(subscription_type).await?);
        }

        if subscriptions.is_empty() {
            debug!("No subscription in the banner, asking the contracts API");
            let request = HttpRequest::get(pages::SUBSCRIPTIONS_API_URL)
                .with_header(CALLER_ID_HEADER, CALLER_ID);
            let page = self
                .session
                .fetch_expecting(request, &[OrangePage::SubscriptionsApi])
                .await?;
            subscriptions = pages::parse_subscriptions_api(&page)?;
        }
        Ok(with_subscriber(subscriptions, &profile.name))
    }

    async fn subscription(&mut self, subscription_id: &str) -> Result<Subscription> {
        if self.subscriptions.is_empty() {
            self.iter_subscriptions().await?;
        }
        find_object(
            self.subscriptions.iter().cloned(),
            |s| s.id == subscription_id,
            "subscription",
            subscription_id,
        )
    }
}

fn with_subscriber(mut subscriptions: Vec<Subscription>, name: &str) -> Vec<Subscription> {
    for subscription in &mut subscriptions {
        subscription.subscriber = Some(name.to_string());
    }
    subscriptions
}

impl_connector!(OrangeConnector, "orange");

#[async_trait]
impl SubscriptionProvider for OrangeConnector {
    async fn iter_subscriptions(&mut self) -> Result<Vec<Subscription>> {
        let subscriptions = match self.load_subscriptions().await {
            Err(e @ (ConnectorError::UpstreamUnavailable { .. } | ConnectorError::TransientNetwork { .. })) => {
                warn!("Subscriptions unavailable, trying once more: {}", e);
                sleep(self.session.config().retry_backoff).await;
                self.load_subscriptions().await?
            }
            result => result?,
        };
        info!("{} subscriptions", subscriptions.len());
        self.subscriptions = subscriptions.clone();
        Ok(subscriptions)
    }
}

#[async_trait]
impl DocumentProvider for OrangeConnector {
    async fn iter_documents(&mut self, subscription_id: &str) -> Result<Vec<Bill>> {
        let subscription = self.subscription(subscription_id).await?;

        if subscription.is_pro {
            let page = self
                .session
                .fetch_expecting(
                    HttpRequest::get(pages::bills_pro_url(subscription_id)),
                    &[OrangePage::BillsApiPro],
                )
                .await?;
            let bills = pages::parse_bills_pro(&page, subscription_id)?;
            site_ensure!(
                bills.len() != pages::PRO_BILLS_COUNT,
                "a full page of {} bills for {}, pagination is not handled",
                bills.len(),
                subscription_id
            );
            return Ok(bills);
        }

        let request = HttpRequest::get(pages::bills_par_url(subscription_id))
            .with_header(CALLER_ID_HEADER.to_lowercase(), CALLER_ID);
        let page = self
            .session
            .fetch_expecting(request, &[OrangePage::BillsApiPar])
            .await?;
        pages::parse_bills_par(&page, subscription_id)
    }
}

#[async_trait]
impl ProfileProvider for OrangeConnector {
    async fn get_profile(&mut self) -> Result<Profile> {
        self.profile().await
    }
}

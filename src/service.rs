use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::Serialize;
use tower::Service;
use tracing::{info, warn};

use crate::capabilities::{
    Account, AccountProvider, Bill, City, Contact, ContactFilter, ContactProvider,
    CurrentWeather, DocumentProvider, Forecast, HistoryProvider, Investment, InvestmentProvider,
    MessagesProvider, Profile, ProfileProvider, Subscription, SubscriptionProvider, Thread,
    Transaction, WeatherProvider,
};
use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};
use crate::sites::binck::BinckConnector;
use crate::sites::bnp::{BnpConnector, BnpFamily};
use crate::sites::cic::{CicConnector, CicFamily};
use crate::sites::ilmatieteenlaitos::IlmatieteenlaitosConnector;
use crate::sites::orange::OrangeConnector;
use crate::sites::phpbb::PhpbbConnector;
use crate::sites::spirica::SpiricaConnector;
use crate::traits::Connector;
use crate::transport::{self, Transport};

/// 対応サイト
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Site {
    Binck,
    Bnp,
    HelloBank,
    Spirica,
    Orange,
    Cic,
    CreditMutuel,
    Ilmatieteenlaitos,
    Phpbb,
}

impl Site {
    pub const ALL: [Site; 9] = [
        Site::Binck,
        Site::Bnp,
        Site::HelloBank,
        Site::Spirica,
        Site::Orange,
        Site::Cic,
        Site::CreditMutuel,
        Site::Ilmatieteenlaitos,
        Site::Phpbb,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Site::Binck => "binck",
            Site::Bnp => BnpFamily::BnpParibas.name(),
            Site::HelloBank => BnpFamily::HelloBank.name(),
            Site::Spirica => "spirica",
            Site::Orange => "orange",
            Site::Cic => CicFamily::Cic.name(),
            Site::CreditMutuel => CicFamily::CreditMutuel.name(),
            Site::Ilmatieteenlaitos => "ilmatieteenlaitos",
            Site::Phpbb => "phpbb",
        }
    }

    /// サイトのコネクタが `capability` を実装しているか
    pub fn supports(self, capability: &Capability) -> bool {
        use Capability as C;
        match self {
            Site::Binck | Site::Bnp | Site::HelloBank | Site::Spirica => matches!(
                capability,
                C::Accounts | C::Account { .. } | C::History { .. } | C::Investments { .. }
            ),
            Site::Cic | Site::CreditMutuel => {
                matches!(capability, C::Accounts | C::Account { .. } | C::History { .. })
            }
            Site::Orange => matches!(
                capability,
                C::Subscriptions | C::Subscription { .. } | C::Documents { .. } | C::Profile
            ),
            Site::Ilmatieteenlaitos => matches!(
                capability,
                C::CitySearch { .. } | C::City { .. } | C::Current { .. } | C::Forecast { .. }
            ),
            Site::Phpbb => matches!(
                capability,
                C::Threads | C::Thread { .. } | C::Contacts { .. } | C::Contact { .. }
            ),
        }
    }

    /// 通信を始める前に設定を検証する
    pub fn check_config(self, config: &ConnectorConfig) -> Result<()> {
        match self {
            Site::Spirica | Site::Phpbb if config.base_url.is_none() => Err(ConnectorError::Config(
                format!("{} needs a base URL", self),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Site {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self> {
        Site::ALL
            .into_iter()
            .find(|site| site.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConnectorError::Config(format!("unknown site {:?}", s)))
    }
}

/// 機能操作とその引数
#[derive(Debug, Clone, PartialEq)]
pub enum Capability {
    Accounts,
    Account { account_id: String },
    History { account_id: String },
    Investments { account_id: String },
    Subscriptions,
    Subscription { subscription_id: String },
    Documents { subscription_id: String },
    Profile,
    CitySearch { pattern: String },
    City { city_id: String },
    Current { city_id: String },
    Forecast { city_id: String },
    Threads,
    Thread { thread_id: String },
    Contacts { filter: ContactFilter },
    Contact { contact_id: String },
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Accounts => "iter_accounts",
            Capability::Account { .. } => "get_account",
            Capability::History { .. } => "iter_history",
            Capability::Investments { .. } => "iter_investments",
            Capability::Subscriptions => "iter_subscriptions",
            Capability::Subscription { .. } => "get_subscription",
            Capability::Documents { .. } => "iter_documents",
            Capability::Profile => "get_profile",
            Capability::CitySearch { .. } => "iter_city_search",
            Capability::City { .. } => "get_city",
            Capability::Current { .. } => "get_current",
            Capability::Forecast { .. } => "iter_forecast",
            Capability::Threads => "iter_threads",
            Capability::Thread { .. } => "get_thread",
            Capability::Contacts { .. } => "iter_contacts",
            Capability::Contact { .. } => "get_contact",
        }
    }
}

/// リクエスト: どのサイトで何を取得するか
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub site: Site,
    pub config: ConnectorConfig,
    pub capability: Capability,
}

impl CapabilityRequest {
    pub fn new(site: Site, config: ConnectorConfig, capability: Capability) -> Self {
        Self {
            site,
            config,
            capability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CapabilityResponse {
    Accounts(Vec<Account>),
    Account(Account),
    Transactions(Vec<Transaction>),
    Investments(Vec<Investment>),
    Subscriptions(Vec<Subscription>),
    Subscription(Subscription),
    Documents(Vec<Bill>),
    Profile(Profile),
    Cities(Vec<City>),
    City(City),
    Current(CurrentWeather),
    Forecast(Vec<Forecast>),
    Threads(Vec<Thread>),
    Thread(Thread),
    Contacts(Vec<Contact>),
    Contact(Contact),
}

/// リクエストごとのトランスポート生成 (テストで差し替える)
pub type TransportFactory = Arc<dyn Fn(&ConnectorConfig) -> Box<dyn Transport> + Send + Sync>;

enum AnyConnector {
    Binck(BinckConnector),
    Bnp(BnpConnector),
    Spirica(SpiricaConnector),
    Orange(OrangeConnector),
    Cic(CicConnector),
    Ilmatieteenlaitos(IlmatieteenlaitosConnector),
    Phpbb(PhpbbConnector),
}

impl AnyConnector {
    fn open(site: Site, config: ConnectorConfig, transport: Box<dyn Transport>) -> Result<Self> {
        Ok(match site {
            Site::Binck => AnyConnector::Binck(BinckConnector::new(config, transport)?),
            Site::Bnp => {
                AnyConnector::Bnp(BnpConnector::new(BnpFamily::BnpParibas, config, transport)?)
            }
            Site::HelloBank => {
                AnyConnector::Bnp(BnpConnector::new(BnpFamily::HelloBank, config, transport)?)
            }
            Site::Spirica => AnyConnector::Spirica(SpiricaConnector::new(config, transport)?),
            Site::Orange => AnyConnector::Orange(OrangeConnector::new(config, transport)?),
            Site::Cic => AnyConnector::Cic(CicConnector::new(CicFamily::Cic, config, transport)?),
            Site::CreditMutuel => {
                AnyConnector::Cic(CicConnector::new(CicFamily::CreditMutuel, config, transport)?)
            }
            Site::Ilmatieteenlaitos => {
                AnyConnector::Ilmatieteenlaitos(IlmatieteenlaitosConnector::new(config, transport)?)
            }
            Site::Phpbb => AnyConnector::Phpbb(PhpbbConnector::new(config, transport)?),
        })
    }

    fn connector(&mut self) -> &mut dyn Connector {
        match self {
            AnyConnector::Binck(c) => c,
            AnyConnector::Bnp(c) => c,
            AnyConnector::Spirica(c) => c,
            AnyConnector::Orange(c) => c,
            AnyConnector::Cic(c) => c,
            AnyConnector::Ilmatieteenlaitos(c) => c,
            AnyConnector::Phpbb(c) => c,
        }
    }

    async fn run(&mut self, capability: Capability) -> Result<CapabilityResponse> {
        match self {
            AnyConnector::Binck(c) => run_wealth(c, capability).await,
            AnyConnector::Bnp(c) => run_wealth(c, capability).await,
            AnyConnector::Spirica(c) => run_wealth(c, capability).await,
            AnyConnector::Cic(c) => run_banking(c, capability).await,
            AnyConnector::Orange(c) => run_bills(c, capability).await,
            AnyConnector::Ilmatieteenlaitos(c) => run_weather(c, capability).await,
            AnyConnector::Phpbb(c) => run_forum(c, capability).await,
        }
    }
}

fn unsupported(capability: &Capability) -> ConnectorError {
    ConnectorError::NotImplemented(capability.name())
}

async fn run_banking<C>(c: &mut C, capability: Capability) -> Result<CapabilityResponse>
where
    C: AccountProvider + HistoryProvider,
{
    Ok(match capability {
        Capability::Accounts => CapabilityResponse::Accounts(c.iter_accounts().await?),
        Capability::Account { account_id } => {
            CapabilityResponse::Account(c.get_account(&account_id).await?)
        }
        Capability::History { account_id } => {
            CapabilityResponse::Transactions(c.iter_history(&account_id).await?)
        }
        other => return Err(unsupported(&other)),
    })
}

async fn run_wealth<C>(c: &mut C, capability: Capability) -> Result<CapabilityResponse>
where
    C: AccountProvider + HistoryProvider + InvestmentProvider,
{
    match capability {
        Capability::Investments { account_id } => Ok(CapabilityResponse::Investments(
            c.iter_investments(&account_id).await?,
        )),
        other => run_banking(c, other).await,
    }
}

async fn run_bills<C>(c: &mut C, capability: Capability) -> Result<CapabilityResponse>
where
    C: SubscriptionProvider + DocumentProvider + ProfileProvider,
{
    Ok(match capability {
        Capability::Subscriptions => {
            CapabilityResponse::Subscriptions(c.iter_subscriptions().await?)
        }
        Capability::Subscription { subscription_id } => {
            CapabilityResponse::Subscription(c.get_subscription(&subscription_id).await?)
        }
        Capability::Documents { subscription_id } => {
            CapabilityResponse::Documents(c.iter_documents(&subscription_id).await?)
        }
        Capability::Profile => CapabilityResponse::Profile(c.get_profile().await?),
        other => return Err(unsupported(&other)),
    })
}

async fn run_weather<C: WeatherProvider>(
    c: &mut C,
    capability: Capability,
) -> Result<CapabilityResponse> {
    Ok(match capability {
        Capability::CitySearch { pattern } => {
            CapabilityResponse::Cities(c.iter_city_search(&pattern).await?)
        }
        Capability::City { city_id } => CapabilityResponse::City(c.get_city(&city_id).await?),
        Capability::Current { city_id } => {
            CapabilityResponse::Current(c.get_current(&city_id).await?)
        }
        Capability::Forecast { city_id } => {
            CapabilityResponse::Forecast(c.iter_forecast(&city_id).await?)
        }
        other => return Err(unsupported(&other)),
    })
}

async fn run_forum<C>(c: &mut C, capability: Capability) -> Result<CapabilityResponse>
where
    C: MessagesProvider + ContactProvider,
{
    Ok(match capability {
        Capability::Threads => CapabilityResponse::Threads(c.iter_threads().await?),
        Capability::Thread { thread_id } => {
            CapabilityResponse::Thread(c.get_thread(&thread_id).await?)
        }
        Capability::Contacts { filter } => {
            CapabilityResponse::Contacts(c.iter_contacts(&filter).await?)
        }
        Capability::Contact { contact_id } => {
            CapabilityResponse::Contact(c.get_contact(&contact_id).await?)
        }
        other => return Err(unsupported(&other)),
    })
}

/// tower::Serviceを実装したコネクタサービス
///
/// 呼び出しごとに新しいセッションを開くので、並行呼び出しがCookieを共有することはない
#[derive(Clone, Default)]
pub struct ConnectorService {
    transport_factory: Option<TransportFactory>,
}

impl ConnectorService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 設定で選ばれるトランスポートの代わりに `factory` の生成物を使う
    pub fn with_transport_factory<F>(factory: F) -> Self
    where
        F: Fn(&ConnectorConfig) -> Box<dyn Transport> + Send + Sync + 'static,
    {
        Self {
            transport_factory: Some(Arc::new(factory)),
        }
    }
}

impl fmt::Debug for ConnectorService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorService")
            .field("custom_transport", &self.transport_factory.is_some())
            .finish()
    }
}

impl Service<CapabilityRequest> for ConnectorService {
    type Response = CapabilityResponse;
    type Error = ConnectorError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CapabilityRequest) -> Self::Future {
        info!(
            "リクエスト受信: site={} capability={}",
            req.site,
            req.capability.name()
        );
        let factory = self.transport_factory.clone();

        Box::pin(async move {
            let CapabilityRequest {
                site,
                config,
                capability,
            } = req;
            if !site.supports(&capability) {
                return Err(unsupported(&capability));
            }
            site.check_config(&config)?;

            let transport = match factory {
                Some(factory) => factory(&config),
                None => transport::open(&config).await?,
            };
            let mut connector = AnyConnector::open(site, config, transport)?;

            let result = match connector.connector().ensure_authenticated().await {
                Ok(()) => connector.run(capability).await,
                Err(e) => Err(e),
            };

            // 成否にかかわらずセッションを閉じる
            if let Err(e) = connector.connector().teardown().await {
                warn!("{}: teardown failed: {}", site, e);
            }

            match &result {
                Ok(_) => info!("完了: site={}", site),
                Err(e) => warn!("失敗: site={} error={}", site, e),
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::config::TransportKind;
    use crate::transport::MockTransport;

    fn service(mock: &MockTransport) -> ConnectorService {
        let mock = mock.clone();
        ConnectorService::with_transport_factory(move |_| Box::new(mock.clone()) as Box<dyn Transport>)
    }

    #[test]
    fn test_site_names_round_trip() {
        for site in Site::ALL {
            assert_eq!(site.name().parse::<Site>().unwrap(), site);
        }
        assert_eq!("HelloBank".parse::<Site>().unwrap(), Site::HelloBank);
        assert!(matches!("boursorama".parse::<Site>(), Err(ConnectorError::Config(_))));
    }

    #[test]
    fn test_supported_capabilities() {
        let history = Capability::History {
            account_id: "1".into(),
        };
        let investments = Capability::Investments {
            account_id: "1".into(),
        };
        assert!(Site::Binck.supports(&investments));
        assert!(Site::CreditMutuel.supports(&history));
        assert!(!Site::Cic.supports(&investments));
        assert!(!Site::Orange.supports(&Capability::Accounts));
        assert!(Site::Orange.supports(&Capability::Profile));
        assert!(Site::Phpbb.supports(&Capability::Threads));
        assert!(!Site::Ilmatieteenlaitos.supports(&Capability::Threads));
    }

    #[tokio::test]
    async fn test_unsupported_capability_sends_nothing() {
        let mock = MockTransport::new();
        let request = CapabilityRequest::new(
            Site::Orange,
            ConnectorConfig::new("user", "secret"),
            Capability::Investments {
                account_id: "1".into(),
            },
        );

        let result = service(&mock).call(request).await;
        assert!(matches!(
            result,
            Err(ConnectorError::NotImplemented("iter_investments"))
        ));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_city_search_then_teardown() {
        let mock = MockTransport::new();
        mock.push_json("", json!([{"id": 658225, "value": "Helsinki"}]));
        let request = CapabilityRequest::new(
            Site::Ilmatieteenlaitos,
            ConnectorConfig::anonymous(),
            Capability::CitySearch {
                pattern: "hels".into(),
            },
        );

        let response = service(&mock).call(request).await.unwrap();
        assert_eq!(
            response,
            CapabilityResponse::Cities(vec![City::new("658225", "Helsinki")])
        );
        assert!(mock.is_closed());

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["kind"], "cities");
        assert_eq!(value["data"][0]["name"], "Helsinki");
    }

    #[tokio::test]
    async fn test_failed_login_still_tears_down() {
        let mock = MockTransport::new();
        mock.push_html(
            "https://www.cic.fr/sb/fr/banques/particuliers/index.html",
            r#"<form name="ident" action="/sb/fr/identification/default.cgi">
               <input type="text" name="_cm_user"/></form>"#,
        )
        .push_html("https://www.cic.fr/sb/fr/identification/default.cgi", "");
        let request = CapabilityRequest::new(
            Site::Cic,
            ConnectorConfig::new("user", "wrong"),
            Capability::Accounts,
        );

        let result = service(&mock).call(request).await;
        assert!(matches!(result, Err(ConnectorError::InvalidCredentials(_))));
        assert!(mock.is_closed());
    }

    #[tokio::test]
    async fn test_missing_base_url_is_a_config_error() {
        let mock = MockTransport::new();
        let request =
            CapabilityRequest::new(Site::Phpbb, ConnectorConfig::anonymous(), Capability::Threads);

        let result = service(&mock).call(request).await;
        assert!(matches!(result, Err(ConnectorError::Config(_))));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_config_error_opens_no_transport() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let mut service = ConnectorService::with_transport_factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(MockTransport::new()) as Box<dyn Transport>
        });

        for site in [Site::Spirica, Site::Phpbb] {
            let capability = if site == Site::Phpbb {
                Capability::Threads
            } else {
                Capability::Accounts
            };
            let request = CapabilityRequest::new(
                site,
                ConnectorConfig::new("user", "secret").with_transport(TransportKind::Browser),
                capability,
            );
            let result = service.call(request).await;
            assert!(matches!(result, Err(ConnectorError::Config(_))));
        }
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }
}

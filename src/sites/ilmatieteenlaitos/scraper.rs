use async_trait::async_trait;
use tracing::debug;

use crate::capabilities::{City, CurrentWeather, Forecast, WeatherProvider};
use crate::config::ConnectorConfig;
use crate::error::Result;
use crate::page::ResolvedPage;
use crate::session::Session;
use crate::traits::{impl_connector, NoLogin};
use crate::transport::{HttpRequest, Transport};

use super::pages::{self, FmiPage};

/// Finnish Meteorological Institute, browsed anonymously.
pub struct IlmatieteenlaitosConnector {
    session: Session<FmiPage>,
}

impl IlmatieteenlaitosConnector {
    pub const BASE_URL: &'static str = "https://ilmatieteenlaitos.fi/";

    pub fn new(config: ConnectorConfig, transport: Box<dyn Transport>) -> Result<Self> {
        let navigation = pages::navigation(config.base_url_or(Self::BASE_URL))?;
        Ok(Self {
            session: Session::new(config, transport, navigation, NoLogin),
        })
    }

    /// Local weather page of a city, reached by posting its name.
    async fn weather_page(&mut self, city_id: &str) -> Result<ResolvedPage<FmiPage>> {
        let city = self.get_city(city_id).await?;
        debug!("Weather page of {}", city.name);
        let request = HttpRequest::post_form(
            pages::WEATHER_QUERY_URL,
            [("place", city.name.as_str()), ("forecast", "short")],
        );
        self.session
            .fetch_expecting(request, &[FmiPage::Weather])
            .await
    }
}

impl_connector!(IlmatieteenlaitosConnector, "ilmatieteenlaitos");

#[async_trait]
impl WeatherProvider for IlmatieteenlaitosConnector {
    async fn iter_city_search(&mut self, pattern: &str) -> Result<Vec<City>> {
        let page = self
            .session
            .fetch_expecting(
                HttpRequest::get(pages::city_search_url(pattern)),
                &[FmiPage::Cities],
            )
            .await?;
        pages::parse_cities(&page)
    }

    async fn get_current(&mut self, city_id: &str) -> Result<CurrentWeather> {
        let page = self.weather_page(city_id).await?;
        pages::parse_current(&page)
    }

    async fn iter_forecast(&mut self, city_id: &str) -> Result<Vec<Forecast>> {
        let page = self.weather_page(city_id).await?;
        pages::parse_forecast(&page)
    }
}

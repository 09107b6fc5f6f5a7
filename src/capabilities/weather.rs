use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::traits::Connector;

use super::find_object;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub name: String,
}

impl City {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// 現在の観測値 (摂氏)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub date: Option<NaiveDateTime>,
    pub temperature: f64,
    pub text: String,
}

/// 日別予報 (摂氏)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub date: NaiveDate,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub text: String,
}

#[async_trait]
pub trait WeatherProvider: Connector {
    async fn iter_city_search(&mut self, pattern: &str) -> Result<Vec<City>>;

    /// Searches for `id` and keeps the exact match.
    async fn get_city(&mut self, id: &str) -> Result<City> {
        let cities = self.iter_city_search(id).await?;
        find_object(cities, |c| c.id == id, "city", id)
    }

    async fn get_current(&mut self, city_id: &str) -> Result<CurrentWeather>;

    async fn iter_forecast(&mut self, city_id: &str) -> Result<Vec<Forecast>>;
}

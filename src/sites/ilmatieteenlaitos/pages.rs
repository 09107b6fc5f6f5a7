use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;
use url::form_urlencoded;

use crate::capabilities::{City, CurrentWeather, Forecast};
use crate::error::{ConnectorError, Result};
use crate::navigation::NavigationMap;
use crate::page::ResolvedPage;
use crate::parse::{cells, clean_amount, json_string, parse_date, selector, text};

const PORTLET: &str = "p_p_id=locationmenuportlet_WAR_fmiwwwweatherportlets";
pub const WEATHER_QUERY_URL: &str = "/paikallissaa?p_p_id=locationmenuportlet_WAR_fmiwwwweatherportlets&p_p_lifecycle=1&p_p_state=normal&p_p_mode=view&_locationmenuportlet_WAR_fmiwwwweatherportlets_action=changelocation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmiPage {
    Cities,
    Weather,
}

pub fn navigation(base_url: &str) -> Result<NavigationMap<FmiPage>> {
    NavigationMap::builder(base_url)
        .rule(FmiPage::Cities, &[r"/etusivu\?p_p_id=locationmenuportlet_WAR_fmiwwwweatherportlets&.*term=(?P<pattern>.*)"])
        .rule(FmiPage::Weather, &[r"/saa/(?P<city_url>.*)"])
        .build()
}

pub fn city_search_url(pattern: &str) -> String {
    let term: String = form_urlencoded::byte_serialize(pattern.as_bytes()).collect();
    format!(
        "/etusivu?{}&p_p_lifecycle=2&p_p_state=normal&p_p_mode=view&p_p_cacheability=cacheLevelFull&term={}",
        PORTLET, term
    )
}

#[derive(Debug, Deserialize)]
struct CityItem {
    id: Value,
    value: String,
}

/// 都市検索 (JSON)
pub fn parse_cities(page: &ResolvedPage<FmiPage>) -> Result<Vec<City>> {
    let items: Vec<CityItem> = page.json_as()?;
    Ok(items
        .into_iter()
        .filter_map(|item| Some(City::new(json_string(&item.id)?, item.value)))
        .collect())
}

fn temperature(raw: &str) -> Option<f64> {
    clean_amount(raw.trim_end_matches(|c: char| c == 'C' || c == '°' || c.is_whitespace()))
}

pub fn parse_current(page: &ResolvedPage<FmiPage>) -> Result<CurrentWeather> {
    let doc = page.html();
    let block = selector("div.local-weather-observation")?;
    let block = doc.select(&block).next().ok_or_else(|| {
        ConnectorError::SiteAssertion(format!("no observation on {}", page.url))
    })?;

    let field = |css: &str| -> Result<String> {
        let sel = selector(css)?;
        Ok(block.select(&sel).next().map(text).unwrap_or_default())
    };
    let raw_temperature = field(".temperature")?;
    let temperature = temperature(&raw_temperature).ok_or_else(|| {
        ConnectorError::Parse(format!("observed temperature {:?}", raw_temperature))
    })?;

    Ok(CurrentWeather {
        date: NaiveDateTime::parse_from_str(&field(".time-stamp")?, "%d.%m.%Y %H:%M").ok(),
        temperature,
        text: field(".weather-text")?,
    })
}

/// Forecast table: date, low, high, description.
pub fn parse_forecast(page: &ResolvedPage<FmiPage>) -> Result<Vec<Forecast>> {
    let doc = page.html();
    let rows = selector("table.local-weather-forecast tbody tr")?;

    let mut forecast = Vec::new();
    for row in doc.select(&rows) {
        let tds = cells(row);
        if tds.len() < 4 {
            continue;
        }
        let Some(date) = parse_date(&text(tds[0])) else {
            continue;
        };
        forecast.push(Forecast {
            date,
            low: temperature(&text(tds[1])),
            high: temperature(&text(tds[2])),
            text: text(tds[3]),
        });
    }
    Ok(forecast)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::NaiveDate;

    use super::*;

    fn page(body: &str) -> ResolvedPage<FmiPage> {
        ResolvedPage::new(FmiPage::Weather, "https://ilmatieteenlaitos.fi/saa/helsinki", 200, HashMap::new(), None, body)
    }

    #[test]
    fn test_city_search_url_is_encoded() {
        let nav = navigation("https://ilmatieteenlaitos.fi/").unwrap();
        let url = nav.absolute(&city_search_url("Hämeen linna")).unwrap();
        assert!(url.ends_with("term=H%C3%A4meen+linna"));
        assert!(nav.matches(FmiPage::Cities, &url));
    }

    #[test]
    fn test_current_observation() {
        let current = parse_current(&page(
            r#"<div class="local-weather-observation">
               <span class="time-stamp">3.2.2017 14:00</span>
               <span class="temperature">&minus;3 °C</span>
               <span class="weather-text">Pilvistä</span></div>"#,
        ))
        .unwrap();
        assert_eq!(current.temperature, -3.0);
        assert_eq!(current.text, "Pilvistä");
        assert_eq!(
            current.date,
            NaiveDate::from_ymd_opt(2017, 2, 3).and_then(|d| d.and_hms_opt(14, 0, 0))
        );
    }

    #[test]
    fn test_forecast_rows() {
        let forecast = parse_forecast(&page(
            r#"<table class="local-weather-forecast"><tbody>
               <tr><td>03.02.2017</td><td>-5°</td><td>2°</td><td>Lumisadetta</td></tr>
               <tr><td>huomenna</td><td>-1°</td><td>1°</td><td>?</td></tr>
               <tr><td>04.02.2017</td><td></td><td>1°</td><td>Selkeää</td></tr>
               </tbody></table>"#,
        ))
        .unwrap();
        assert_eq!(forecast.len(), 2);
        assert_eq!(forecast[0].date, NaiveDate::from_ymd_opt(2017, 2, 3).unwrap());
        assert_eq!(forecast[0].low, Some(-5.0));
        assert_eq!(forecast[1].low, None);
        assert_eq!(forecast[1].high, Some(1.0));
    }
}

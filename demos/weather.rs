use site_connectors::sites::ilmatieteenlaitos::IlmatieteenlaitosConnector;
use site_connectors::{transport, Connector, ConnectorConfig, WeatherProvider};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> site_connectors::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let pattern = std::env::args().nth(1).unwrap_or_else(|| "Helsinki".to_string());

    let config = ConnectorConfig::anonymous();
    let transport = transport::open(&config).await?;
    let mut fmi = IlmatieteenlaitosConnector::new(config, transport)?;

    let cities = fmi.iter_city_search(&pattern).await?;
    println!("=== {} cities for {:?} ===", cities.len(), pattern);

    if let Some(city) = cities.first() {
        match fmi.get_current(&city.id).await {
            Ok(current) => println!("{}: {} °C, {}", city.name, current.temperature, current.text),
            Err(e) => eprintln!("エラー: {}", e),
        }
        for day in fmi.iter_forecast(&city.id).await? {
            println!(
                "{}  {:>5}  {:>5}  {}",
                day.date,
                day.low.map(|t| t.to_string()).unwrap_or_default(),
                day.high.map(|t| t.to_string()).unwrap_or_default(),
                day.text
            );
        }
    }

    fmi.teardown().await
}

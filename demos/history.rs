use site_connectors::{
    Capability, CapabilityRequest, CapabilityResponse, ConnectorConfig, ConnectorService, Site,
};
use tower::Service;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // ログ設定 (RUST_LOG=site_connectors=debug など)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 例: SITE=cic CIC_USERNAME=... CIC_PASSWORD=... cargo run --example history
    let site: Site = std::env::var("SITE")
        .unwrap_or_else(|_| "binck".to_string())
        .parse()
        .expect("unknown SITE");
    let config = ConnectorConfig::from_env(&site.name().to_uppercase())
        .expect("credentials not set");

    let mut service = ConnectorService::new();

    println!("=== {} ===", site);

    let accounts = match service
        .call(CapabilityRequest::new(site, config.clone(), Capability::Accounts))
        .await
    {
        Ok(CapabilityResponse::Accounts(accounts)) => accounts,
        Ok(other) => panic!("unexpected response: {:?}", other),
        Err(e) => {
            eprintln!("エラー: {}", e);
            return;
        }
    };

    for account in accounts {
        println!("--- {} {} ({:.2}) ---", account.id, account.label, account.balance);
        let request = CapabilityRequest::new(
            site,
            config.clone(),
            Capability::History {
                account_id: account.id.clone(),
            },
        );
        match service.call(request).await {
            Ok(CapabilityResponse::Transactions(history)) => {
                for tr in history.iter().take(20) {
                    let date = tr.date.map(|d| d.to_string()).unwrap_or_default();
                    println!("{:>10}  {:<40}  {:>10.2}", date, tr.label, tr.amount);
                }
                println!("{} transactions", history.len());
            }
            Ok(other) => println!("unexpected response: {:?}", other),
            Err(e) => eprintln!("エラー: {}", e),
        }
    }
}

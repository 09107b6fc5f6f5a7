use site_connectors::{Capability, CapabilityRequest, ConnectorConfig, ConnectorService, Site};
use tower::Service;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 環境変数から認証情報を取得（JSON形式）
    // 例: ACCOUNTS='[{"site":"binck","username":"u1","password":"p1"},{"site":"cic","username":"u2","password":"p2"}]'
    let accounts_json =
        std::env::var("ACCOUNTS").expect("ACCOUNTS environment variable not set");
    let accounts: Vec<serde_json::Value> =
        serde_json::from_str(&accounts_json).expect("Failed to parse ACCOUNTS JSON");

    println!("=== Multi-Account ({} sessions) ===\n", accounts.len());

    // セッションごとに独立したタスク
    let mut handles = Vec::new();
    for account in accounts {
        let site: Site = account["site"]
            .as_str()
            .expect("site not found")
            .parse()
            .expect("unknown site");
        let username = account["username"].as_str().expect("username not found");
        let password = account["password"].as_str().expect("password not found");
        let mut config = ConnectorConfig::new(username, password);
        config.base_url = account["base_url"].as_str().map(String::from);

        let mut service = ConnectorService::new();
        handles.push(tokio::spawn(async move {
            let result = service
                .call(CapabilityRequest::new(site, config, Capability::Accounts))
                .await;
            (site, result)
        }));
    }

    for handle in handles {
        match handle.await {
            Ok((site, Ok(response))) => {
                println!("✓ {}: {}", site, serde_json::to_string(&response).unwrap_or_default());
            }
            Ok((site, Err(e))) => eprintln!("✗ {}: {}", site, e),
            Err(e) => eprintln!("✗ task failed: {}", e),
        }
    }

    println!("\n=== 完了 ===");
}

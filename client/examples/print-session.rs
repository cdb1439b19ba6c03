use taskhub_client::{Api, Client};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let base_url = std::env::var("TASKHUB_BASE_URL")?;
    let email = std::env::var("TASKHUB_EMAIL")?;
    let password = std::env::var("TASKHUB_PASSWORD")?;

    let client = Client::new(base_url, reqwest::Client::new());
    let api = Api::new(client.clone());
    api.login(&email, &password).await?;

    let token = client
        .tokens()
        .get_auth_token()
        .ok_or_else(|| anyhow::format_err!("no session established"))?;
    println!("{token}");

    Ok(())
}

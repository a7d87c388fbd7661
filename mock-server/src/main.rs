use mock_server::{AuthMode, MockState};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt::init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "6103".to_string());
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    let auth = match std::env::var("AUTH").as_deref() {
        Ok("digest") => AuthMode::Digest,
        _ => AuthMode::Basic,
    };
    tracing::info!(%addr, ?auth, login = %format!("http://{addr}/rets/login"), "mock RETS server listening");
    mock_server::serve(listener, MockState::new(auth)).await
}

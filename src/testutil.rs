//! Local stand-ins for upstream APIs

use axum::Router;

/// Serve `router` on an ephemeral port and return its base URL
pub async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    format!("http://{}", addr)
}

/// Base URL of a port nothing listens on
pub async fn dead_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind placeholder");
    let addr = listener.local_addr().expect("placeholder addr");
    drop(listener);

    format!("http://{}", addr)
}

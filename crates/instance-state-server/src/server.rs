use anyhow::Result;
use instance_state::{
    RefreshScheduler,
    StateAccessor,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct InstanceStateServer {
    pub listener: TcpListener,
    pub scheduler: RefreshScheduler,
    pub accessor: StateAccessor,
}

impl InstanceStateServer {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the refresh scheduler and the status server until the
    /// cancellation token is cancelled.
    pub async fn run(self, cancel_token: CancellationToken) -> Result<()> {
        let scheduler_handle = self.scheduler.start(cancel_token.clone())?;
        tracing::debug!("Started refresh scheduler");

        tracing::info!("Started status server");
        let served = crate::api::serve(self.listener, self.accessor, cancel_token.clone()).await;

        // The scheduler only stops on cancellation; make sure it does even
        // if the server exited on its own.
        cancel_token.cancel();
        scheduler_handle.await?;
        tracing::info!("Refresh scheduler stopped.");

        served?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Config;
    use clap::Parser;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use wiremock::{
        Mock,
        MockServer,
        ResponseTemplate,
        matchers::method,
    };

    async fn provider_answering(state: &'static str) -> MockServer {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(move |req: &wiremock::Request| {
                let body: serde_json::Value = req.body_json().unwrap();
                let id = body["id"].clone();
                ResponseTemplate::new(200).set_body_json(json!({
                    "jsonrpc": "2.0",
                    "result": { "state": state },
                    "id": id,
                }))
            })
            .mount(&provider)
            .await;
        provider
    }

    async fn status_of(client: &reqwest::Client, addr: std::net::SocketAddr) -> String {
        client
            .get(format!("http://{addr}/status"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_converges_to_provider_state() {
        let provider = provider_answering("running").await;
        let config = Config::try_parse_from(vec![
            "program".to_string(),
            "--provider-url".to_string(),
            provider.uri(),
            "--instance-id".to_string(),
            "i-123".to_string(),
            "--listen-addr".to_string(),
            "127.0.0.1:0".to_string(),
        ])
        .unwrap();

        let server = config.build().await.unwrap();
        let addr = server.local_addr().unwrap();
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(server.run(cancel_token.clone()));
        let client = reqwest::Client::new();

        // The first read finds an empty cache and only schedules a refresh.
        assert_eq!(status_of(&client, addr).await, "Server State: ");

        let mut status = String::new();
        for _ in 0..50 {
            status = status_of(&client, addr).await;
            if status == "Server State: running" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(status, "Server State: running");

        cancel_token.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_server_never_queries_provider() {
        let provider = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&provider)
            .await;

        let config = Config::try_parse_from(vec![
            "program".to_string(),
            "--provider-url".to_string(),
            provider.uri(),
            "--listen-addr".to_string(),
            "127.0.0.1:0".to_string(),
        ])
        .unwrap();

        let server = config.build().await.unwrap();
        let addr = server.local_addr().unwrap();
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(server.run(cancel_token.clone()));
        let client = reqwest::Client::new();

        for _ in 0..5 {
            assert_eq!(status_of(&client, addr).await, "Server State: ");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        cancel_token.cancel();
        task.await.unwrap().unwrap();
        provider.verify().await;
    }
}

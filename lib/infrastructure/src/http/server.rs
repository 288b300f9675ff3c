use actix_web::dev::ServerHandle;
use actix_web::*;
use anyhow::Context as _;
use serde::Deserialize;
use tokio::task::JoinHandle;

#[derive(Debug, Deserialize, Clone)]
pub struct HttpServerConfig {
    /// 0 lets the OS pick a free port
    #[serde(default)]
    pub port: u16,
    pub external_host: String,
}

pub struct RunningHttpServer {
    port: u16,
    handle: ServerHandle,
    task: JoinHandle<std::io::Result<()>>,
}

impl HttpServerConfig {
    pub fn start_server<F>(&self, scopes: F) -> anyhow::Result<RunningHttpServer>
    where
        F: Fn() -> Vec<Scope> + Send + Clone + 'static,
    {
        let http_server = HttpServer::new(move || {
            let mut app = App::new().wrap(tracing_actix_web::TracingLogger::default());

            for scope in scopes() {
                app = app.service(scope);
            }

            app
        })
        .workers(1)
        .disable_signals()
        .bind(("0.0.0.0", self.port))
        .with_context(|| format!("Error binding HTTP server to port {}", self.port))?;

        let port = http_server
            .addrs()
            .first()
            .map(|addr| addr.port())
            .with_context(|| format!("HTTP server on port {} has no bound address", self.port))?;

        let server = http_server.run();
        let handle = server.handle();
        let task = tokio::spawn(server);

        tracing::info!("HTTP server listening at http://{}:{}", self.external_host, port);

        Ok(RunningHttpServer { port, handle, task })
    }
}

impl RunningHttpServer {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn stop(self) -> anyhow::Result<()> {
        self.handle.stop(true).await;

        match self.task.await {
            Ok(result) => result.context("HTTP server terminated with error"),
            Err(e) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
        }
    }
}

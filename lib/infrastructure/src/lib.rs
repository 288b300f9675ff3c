mod http;
mod monitoring;

pub use monitoring::{EnvFilterConfig, LogFormat, MonitoringConfig};

pub use http::client::HttpClientConfig;
pub use http::server::{HttpServerConfig, RunningHttpServer};

//! HTTP front-end for the conversation log.
//!
//! `POST /log` accepts any JSON body and hands it to a shared
//! [`convlog_appender::LogAppender`]; `GET /health` reports liveness.

pub mod config;
mod http_server;

pub use config::{CliOptions, CorsConfig, FileConfig, ServerConfig};
pub use http_server::{build_router, run_http_server};

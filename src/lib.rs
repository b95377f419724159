use std::env;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{Layer, Registry};

pub mod bridge;
pub mod phonemes;
pub mod phonemize;
pub mod pipeline;
pub mod training;

pub use phonemes::*;
pub use phonemize::*;

pub fn setup_logging() {
    let filter = match env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_env("RUST_LOG"),
        _ => EnvFilter::new("piper_bridge=info,trainer=info,bridge=info"),
    };

    let fmt = tracing_subscriber::fmt::Layer::default();

    let subscriber = filter.and_then(fmt).with_subscriber(Registry::default());

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Logging already initialised: {}", e);
    }
}

pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod presets;
pub mod registry;
pub mod server;
pub mod translate;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use logging::SharedLogger;
pub use registry::ProviderRegistry;
pub use server::{build_router, AppState};

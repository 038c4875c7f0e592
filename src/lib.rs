//! Share one directory tree over HTTP: paginated listings, text previews and
//! on-demand zip downloads.

pub mod archive;
pub mod config;
pub mod content;
pub mod error;
pub mod listing;
pub mod markdown;
pub mod router;
pub mod server;
pub mod size_cache;
pub mod state;

pub use config::{Args, ServerConfig};
pub use error::ServeError;
pub use router::app;
pub use state::{ServerState, SharedState};

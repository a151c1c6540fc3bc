pub mod config;
pub mod error;
pub mod types;

pub use config::OpscribeConfig;
pub use error::{OpscribeError, ProviderError, ProviderErrorKind, Result};
pub use types::*;

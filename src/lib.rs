pub mod config;
pub mod executor;
pub mod harvest;
pub mod http;
pub mod model;
pub mod store;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export common types for convenience
pub use config::*;
pub use executor::*;
pub use harvest::*;
pub use http::*;
pub use model::*;
pub use store::*;
pub use traits::*;

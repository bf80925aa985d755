pub mod config;
pub mod error;
pub mod evidence;
pub mod finding;
pub mod retry;

pub use config::Config;
pub use error::*;
pub use evidence::*;
pub use finding::*;
pub use retry::RetryPolicy;

pub mod cache;
pub mod error;
pub mod registry;
pub mod types;

pub use cache::*;
pub use error::*;
pub use registry::*;
pub use types::*;

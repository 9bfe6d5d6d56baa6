pub mod address;
pub mod ddo;
mod error;
pub mod signature;
mod types;

pub use error::{DdoError, Result};
pub use types::*;

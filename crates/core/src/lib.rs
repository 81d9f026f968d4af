pub mod error;
pub mod identity;

pub use error::{PrivarionError, Result};
pub use identity::IdentityType;

mod keys;
mod types;

pub use keys::*;
pub use types::*;

mod executor;
mod hprof;
mod logging;
mod session;

pub use hprof::*;
pub use logging::*;
pub use session::*;

#[cfg(test)]
pub(crate) use hprof::fixtures;

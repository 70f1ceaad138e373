pub mod apply;
pub mod backoff;
pub mod backup;
pub mod error;
pub mod guard;
pub mod paths;
pub mod plan;
pub mod progress;
pub mod remote;
pub mod scanner;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::SyncError;

pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod policy;
pub mod sweeper;

pub use error::{CoreError, CoreResult};
pub use lifecycle::Lifecycle;

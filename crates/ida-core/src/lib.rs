pub mod actions;
pub mod audit;
pub mod clock;
pub mod config;
pub mod details;
pub mod error;
pub mod frozen;
pub mod lock;
pub mod storage;

pub use actions::ActionStore;
pub use audit::ChangeAuditLog;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AppConfig;
pub use details::FileDetailsResolver;
pub use error::Error;
pub use frozen::FrozenFileStore;
pub use lock::ProjectLockManager;

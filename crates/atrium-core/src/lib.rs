pub mod config;
pub mod error;
pub mod event;
pub mod record;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{AtriumError, Result};
pub use event::EventBus;
pub use record::{Grade, Phase, Verdict, WorkflowOutput, WorkflowRecord};
pub use types::*;

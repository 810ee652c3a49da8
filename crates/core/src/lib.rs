pub mod config;
pub mod error;
pub mod ids;
pub mod outcome;
pub mod payload;

pub use config::Config;
pub use error::*;
pub use ids::*;
pub use outcome::{Outcome, OutcomeKind, TaskFault};
pub use payload::Payload;

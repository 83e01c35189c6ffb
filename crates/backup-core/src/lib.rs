#![forbid(unsafe_code)]

//! Shared model for the backup daemon: run records, the run state machine,
//! health state and the stage error taxonomy. No I/O lives here.

pub mod error;
pub mod health;
pub mod machine;
pub mod model;
pub mod time;

pub use error::*;
pub use health::*;
pub use machine::*;
pub use model::*;
pub use time::*;

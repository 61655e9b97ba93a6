// Workflow model and document parser
//
// The engine consumes this crate as a pure function: bytes in, validated
// `Workflow` plus warnings out. Nothing here does I/O beyond reading the
// document file.

pub mod error;
pub mod model;
pub mod parser;
pub mod schedule;

pub use error::{ParseWarning, ValidationError};
pub use model::{
    Action, ActionKind, BashAction, CustomAction, ExpectStatus, HttpAction, RetryConfig,
    RetryPredicate, Trigger, WatchEventKind, Workflow,
};
pub use parser::{parse_file, parse_str, Parsed};

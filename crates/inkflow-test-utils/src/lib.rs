//! Test doubles and fixtures shared by the inkflow crates.

mod fixtures;
mod generator;
mod sink;
mod store;

pub use fixtures::{outline_value, temp_file};
pub use generator::{MockGenerator, MockReply};
pub use sink::RecordingSink;
pub use store::{InMemoryCards, MemoryProjectStore};

//! Test helpers for ocr-dispatch: scripted mock workers and event assertions.

pub mod events;
pub mod mock;

pub use events::*;
pub use mock::*;

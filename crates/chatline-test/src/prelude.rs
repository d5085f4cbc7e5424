//! Prelude module - commonly used test utilities.

pub use crate::harness::{settle, setup_test_logging, setup_test_logging_default};
pub use crate::mocks::{MockSession, MockTransport, RecordingSink};

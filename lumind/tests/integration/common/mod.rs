pub mod fixtures;
pub mod logging;

pub use fixtures::{FakeGitHub, RecordedCall, build_zip, signed_push};
pub use logging::init_test_logging;

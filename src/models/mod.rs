
pub use medical_test::*;

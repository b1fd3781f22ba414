//! Domain models for APK signing.

pub mod report;
pub mod signing;
pub mod stage;

pub use report::*;
pub use signing::*;
pub use stage::*;

// Field Tracker Android JNI Library
// Exposes the Rust location reporting pipeline to Kotlin via JNI

pub mod android_jni;
pub mod error;
pub mod session;

pub use error::{BridgeError, JResult};
pub use session::TrackerSession;

pub mod motion;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use motion::MotionBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

pub mod source;
pub mod target;

pub use source::SourceStore;
pub use target::{TargetDbConfig, TargetStore};

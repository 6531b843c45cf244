pub mod files;
pub mod preferences;

pub use files::*;
pub use preferences::*;

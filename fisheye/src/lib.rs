mod builder;
mod engine;
mod error;
mod globe;
mod lens;
mod lensmap;
mod palette;
mod pcx;
pub mod quad;
mod script;

pub use builder::*;
pub use engine::*;
pub use error::*;
pub use globe::*;
pub use lens::*;
pub use lensmap::*;
pub use palette::*;
pub use pcx::*;
pub use script::*;

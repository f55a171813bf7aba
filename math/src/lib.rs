mod basis;
mod latlon;
mod plate;

pub use basis::*;
pub use latlon::*;
pub use plate::*;

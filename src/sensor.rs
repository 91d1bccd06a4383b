mod kind;
mod reading;

pub use kind::*;
pub use reading::*;

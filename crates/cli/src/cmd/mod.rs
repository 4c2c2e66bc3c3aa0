mod build;
mod cat;
mod gc;
mod info;

pub use build::{BuildArgs, cmd_build};
pub use cat::cmd_cat;
pub use gc::cmd_gc;
pub use info::cmd_info;

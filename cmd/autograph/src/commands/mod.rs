//! CLI commands module.

mod config;
mod enroll;
mod gallery;
mod health;
mod train;
mod util;
mod verify;

pub use config::ConfigCommand;
pub use enroll::EnrollCommand;
pub use gallery::GalleryCommand;
pub use health::HealthCommand;
pub use train::{ProfileCommand, TrainCommand};
pub use verify::VerifyCommand;

pub(crate) use util::*;

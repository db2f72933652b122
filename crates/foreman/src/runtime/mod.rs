//! Runtime components for process supervision

pub mod dependency;
pub mod health;
pub mod process;
pub mod reactor;
pub mod sockets;
pub mod supervisor;

pub use dependency::*;
pub use health::*;
pub use process::*;
pub use reactor::*;
pub use sockets::*;
pub use supervisor::*;

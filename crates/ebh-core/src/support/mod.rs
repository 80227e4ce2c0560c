//! Ephemeral resources handed to embedded services: ports and directories.

mod dirs;
mod ports;

pub use dirs::{DirSupplier, TempDirSupplier};
pub use ports::{FixedPortSupplier, PortSupplier, RandomPortSupplier};

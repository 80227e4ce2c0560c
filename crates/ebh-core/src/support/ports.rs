//! Network port suppliers.

use std::net::{Ipv4Addr, TcpListener};

/// Source of the TCP port an embedded service binds to.
pub trait PortSupplier: Send + Sync {
    fn acquire(&self) -> std::io::Result<u16>;
}

/// Picks a free port by letting the OS assign one to a throwaway listener.
///
/// The listener is dropped before the port is returned; another process can
/// still take the port before the service binds it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPortSupplier;

impl PortSupplier for RandomPortSupplier {
    fn acquire(&self) -> std::io::Result<u16> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        Ok(listener.local_addr()?.port())
    }
}

/// Always returns the same port.
#[derive(Debug, Clone, Copy)]
pub struct FixedPortSupplier(pub u16);

impl PortSupplier for FixedPortSupplier {
    fn acquire(&self) -> std::io::Result<u16> {
        Ok(self.0)
    }
}

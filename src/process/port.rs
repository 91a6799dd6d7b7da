use crate::error::Result;
use std::net::TcpListener;

/// Ask the OS for a free loopback port for Chrome's remote debugging.
/// The port is released before Chrome binds it, so two sessions launched
/// concurrently still get distinct ports.
pub fn allocate_cdp_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_cdp_port_is_bindable() {
        let port = allocate_cdp_port().unwrap();
        assert!(port > 0);
        assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
    }
}

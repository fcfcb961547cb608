use std::net::TcpListener;
use tracing::{debug, warn};

pub fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// First bindable port in `base..base + count`, else one the OS assigns.
pub fn allocate_port(base: u16, count: u16) -> std::io::Result<u16> {
    for offset in 0..count {
        let Some(port) = base.checked_add(offset) else {
            break;
        };
        if port_is_free(port) {
            debug!(port, "port allocated");
            return Ok(port);
        }
    }
    let listener = TcpListener::bind(("0.0.0.0", 0))?;
    let port = listener.local_addr()?.port();
    warn!(base, count, port, "no free port in probe range; using an OS-assigned port");
    Ok(port)
}

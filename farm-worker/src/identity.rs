use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// This host's identity as seen by the coordination store: `worker_id` is
/// `{hostname}_{ip}`, computed once at process start and stable across
/// restarts (the worker re-registers under the same id, which the store
/// treats as an upsert rather than a new row).
pub struct Identity {
    pub worker_id: String,
    pub hostname: String,
    pub ip: String,
}

pub fn identity() -> Identity {
    let hostname = hostname();
    let ip = first_non_loopback_ipv4().to_string();
    let worker_id = format!("{hostname}_{ip}");
    Identity { worker_id, hostname, ip }
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Connecting a UDP socket to a public address (without sending anything)
/// is the usual portable trick to learn which local interface the OS would
/// route through, without depending on a platform-specific interface-listing
/// crate.
fn first_non_loopback_ipv4() -> Ipv4Addr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .ok()
        .and_then(|addr| match addr.ip() {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
            _ => None,
        })
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_is_hostname_underscore_ip() {
        let id = identity();
        assert_eq!(id.worker_id, format!("{}_{}", id.hostname, id.ip));
        assert!(id.ip.parse::<Ipv4Addr>().is_ok());
    }
}

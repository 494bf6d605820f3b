use std::net::SocketAddr;
use std::net::ToSocketAddrs;

/// Resolves `host:port` on the blocking pool, logging every address found.
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, anyhow::Error> {
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    let host_clone_for_log = host.clone();

    debug!("Resolving DNS for: {}", &host_clone_for_log);

    let addrs_iter = tokio::task::spawn_blocking(move || (host, port).to_socket_addrs()).await??;
    let addresses: Vec<_> = addrs_iter.collect();

    if addresses.is_empty() {
        error!(
            "DNS resolution for {} returned no addresses.",
            &host_clone_for_log
        );
        return Err(anyhow!(
            "No IP addresses found for host {}",
            host_clone_for_log
        ));
    }

    for (i, addr) in addresses.iter().enumerate() {
        if i == 0 {
            debug!("Resolved IP: {}", addr.ip());
        } else {
            debug!("Resolved IP (alternative): {}", addr.ip());
        }
    }

    Ok(addresses)
}

//! Viewer listener bind with a bounded number of attempts.
//!
//! After each failed bind the operator is asked for a replacement port; the
//! sequence ends with an error once `attempts` binds failed or the prompt
//! gives up.

use std::io::{self, BufRead, Write};
use std::net::{IpAddr, SocketAddr, TcpListener};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("could not bind listener after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: io::Error,
    },
    #[error("no replacement offered after port {port} failed")]
    Aborted { port: u16 },
}

/// Source of replacement ports after a failed bind.
pub trait PortPrompt {
    /// `None` gives up.
    fn replacement_port(&mut self, failed: u16, err: &io::Error) -> Option<u16>;
}

/// Asks on stdin. An empty line, EOF or anything that is not a port gives up.
pub struct StdinPrompt;

impl PortPrompt for StdinPrompt {
    fn replacement_port(&mut self, failed: u16, err: &io::Error) -> Option<u16> {
        let mut out = io::stderr();
        let _ = write!(out, "port {failed} unavailable ({err}); enter another port: ");
        let _ = out.flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => line.trim().parse().ok(),
        }
    }
}

/// Bind `ip:port`, retrying on replacement ports at most `attempts` times in
/// total (zero is treated as one).
pub fn bind_with_retry(
    ip: IpAddr,
    port: u16,
    attempts: u32,
    prompt: &mut dyn PortPrompt,
) -> Result<TcpListener, ListenerError> {
    let attempts = attempts.max(1);
    let mut port = port;
    for attempt in 1..=attempts {
        match TcpListener::bind(SocketAddr::new(ip, port)) {
            Ok(l) => {
                tracing::info!(%ip, port, attempt, "listener bound");
                return Ok(l);
            }
            Err(e) => {
                tracing::warn!(%ip, port, attempt, error = %e, "listener bind failed");
                if attempt == attempts {
                    return Err(ListenerError::Exhausted { attempts, last: e });
                }
                match prompt.replacement_port(port, &e) {
                    Some(p) => port = p,
                    None => return Err(ListenerError::Aborted { port }),
                }
            }
        }
    }
    Err(ListenerError::Aborted { port })
}

//! Request admission.
//!
//! Checks that run after the request head is parsed and before any origin
//! is contacted: the CONNECT switch and the outgoing port restrictions.

use thiserror::Error;

use crate::config::ProxySettings;
use crate::http::request::ClientRequest;

/// Reasons a request is refused with 403.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("CONNECT method not allowed.")]
    ConnectDisabled,
    #[error("Requested CONNECT to forbidden port.")]
    ConnectPortForbidden(u16),
    #[error("Requested HTTP connection to forbidden port.")]
    HttpPortForbidden(u16),
}

/// Decide whether `request` may proceed.
pub fn admit(request: &ClientRequest, settings: &ProxySettings) -> Result<(), AdmissionError> {
    let port = request.headers.port;
    if request.is_connect {
        if !settings.allow_connect {
            return Err(AdmissionError::ConnectDisabled);
        }
        if !port_allowed(&settings.restrict_connect_ports, port) {
            return Err(AdmissionError::ConnectPortForbidden(port));
        }
    } else if !port_allowed(&settings.restrict_http_ports, port) {
        return Err(AdmissionError::HttpPortForbidden(port));
    }
    Ok(())
}

fn port_allowed(allowed: &[u16], port: u16) -> bool {
    allowed.is_empty() || allowed.contains(&port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::http::request::parse_request_line;

    fn request(line: &str) -> ClientRequest {
        parse_request_line(line, &ProxyConfig::default()).unwrap()
    }

    #[test]
    fn connect_switch() {
        let mut settings = ProxySettings::default();
        assert_eq!(admit(&request("CONNECT example.com:443 HTTP/1.1"), &settings), Ok(()));
        settings.allow_connect = false;
        assert_eq!(
            admit(&request("CONNECT example.com:443 HTTP/1.1"), &settings),
            Err(AdmissionError::ConnectDisabled)
        );
        // Plain HTTP is unaffected.
        assert_eq!(admit(&request("GET http://example.com/ HTTP/1.1"), &settings), Ok(()));
    }

    #[test]
    fn port_restrictions() {
        let mut settings = ProxySettings::default();
        settings.restrict_connect_ports = vec![443];
        settings.restrict_http_ports = vec![80, 8080];

        assert_eq!(
            admit(&request("CONNECT example.com:22 HTTP/1.1"), &settings),
            Err(AdmissionError::ConnectPortForbidden(22))
        );
        assert_eq!(admit(&request("CONNECT example.com HTTP/1.1"), &settings), Ok(()));
        assert_eq!(admit(&request("GET http://example.com:8080/ HTTP/1.1"), &settings), Ok(()));
        assert_eq!(
            admit(&request("GET http://example.com:25/ HTTP/1.1"), &settings),
            Err(AdmissionError::HttpPortForbidden(25))
        );
    }
}

//! Endpoint URI normalization.

use etpkit_types::{EtpError, EtpResult};
use url::Url;

/// Turn an endpoint URL into the WebSocket URL to connect to.
///
/// `http` becomes `ws` and `https` becomes `wss`; `ws` and `wss` are kept.
/// Scheme matching is case-insensitive. Any other scheme is rejected.
pub fn to_websocket_uri(input: &str) -> EtpResult<Url> {
    let mut url = Url::parse(input.trim())
        .map_err(|e| EtpError::InvalidArgument(format!("invalid endpoint URI {input:?}: {e}")))?;

    // Url::parse lowercases the scheme.
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(EtpError::InvalidArgument(format!(
                "unsupported URI scheme {other:?}, expected http, https, ws or wss"
            )))
        }
    };

    if url.scheme() != scheme {
        url.set_scheme(scheme).map_err(|()| {
            EtpError::InvalidArgument(format!("cannot use scheme {scheme} for {input:?}"))
        })?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_schemes_mapped() {
        assert_eq!(
            to_websocket_uri("http://localhost:8080/etp").unwrap().as_str(),
            "ws://localhost:8080/etp"
        );
        assert_eq!(
            to_websocket_uri("https://example.com/etp?x=1").unwrap().as_str(),
            "wss://example.com/etp?x=1"
        );
    }

    #[test]
    fn test_scheme_case_insensitive() {
        assert_eq!(to_websocket_uri("HTTP://host/").unwrap().scheme(), "ws");
        assert_eq!(to_websocket_uri("Https://host/").unwrap().scheme(), "wss");
        assert_eq!(to_websocket_uri("WSS://host/").unwrap().scheme(), "wss");
    }

    #[test]
    fn test_websocket_schemes_kept() {
        assert_eq!(
            to_websocket_uri("ws://127.0.0.1:9000").unwrap().as_str(),
            "ws://127.0.0.1:9000/"
        );
        assert_eq!(to_websocket_uri("wss://host/etp").unwrap().scheme(), "wss");
    }

    #[test]
    fn test_other_schemes_rejected() {
        for input in ["ftp://host/", "tcp://host:1", "not a uri"] {
            let err = to_websocket_uri(input).unwrap_err();
            assert!(matches!(err, EtpError::InvalidArgument(_)), "{input}");
        }
    }
}

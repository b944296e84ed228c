// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Proxy URL parsing, grounded in `ConnectManager.ProxySettings.to_telethon_proxy()` in the
//! original implementation: a scheme selector plus `rdns` defaulting to `true`.

use crate::error::ClientError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyScheme {
    Socks5,
    Socks4,
    Http,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub rdns: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Parses a proxy URL into the `(scheme, host, port, rdns, username, password)` shape the
/// client library expects. Rejects any scheme outside `socks5|socks5h`, `socks4|socks4a`,
/// `http|https` with `invalid-proxy`.
pub fn parse_proxy(raw: &str) -> Result<ProxyConfig, ClientError> {
    let url = url::Url::parse(raw).map_err(|err| ClientError::InvalidProxy(err.to_string()))?;

    let scheme = match url.scheme() {
        "socks5" | "socks5h" => ProxyScheme::Socks5,
        "socks4" | "socks4a" => ProxyScheme::Socks4,
        "http" | "https" => ProxyScheme::Http,
        other => return Err(ClientError::InvalidProxy(format!("unsupported proxy scheme: {other}"))),
    };

    let host = url
        .host_str()
        .ok_or_else(|| ClientError::InvalidProxy("proxy URL has no host".to_owned()))?
        .to_owned();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ClientError::InvalidProxy("proxy URL has no port".to_owned()))?;

    let username = (!url.username().is_empty()).then(|| url.username().to_owned());
    let password = url.password().map(str::to_owned);

    Ok(ProxyConfig {
        scheme,
        host,
        port,
        rdns: true,
        username,
        password,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socks5_scheme_variants_map_to_socks5() {
        for scheme in ["socks5", "socks5h"] {
            let cfg = parse_proxy(&format!("{scheme}://user:pass@proxy.example:1080")).unwrap();
            assert_eq!(cfg.scheme, ProxyScheme::Socks5);
            assert_eq!(cfg.host, "proxy.example");
            assert_eq!(cfg.port, 1080);
            assert_eq!(cfg.username.as_deref(), Some("user"));
            assert_eq!(cfg.password.as_deref(), Some("pass"));
            assert!(cfg.rdns);
        }
    }

    #[test]
    fn socks4_and_http_schemes_map_correctly() {
        assert_eq!(
            parse_proxy("socks4a://proxy.example:1080").unwrap().scheme,
            ProxyScheme::Socks4
        );
        assert_eq!(parse_proxy("http://proxy.example:8080").unwrap().scheme, ProxyScheme::Http);
        assert_eq!(parse_proxy("https://proxy.example:8443").unwrap().scheme, ProxyScheme::Http);
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let err = parse_proxy("ftp://proxy.example:21").unwrap_err();
        assert!(matches!(err, ClientError::InvalidProxy(_)));
    }

    #[test]
    fn anonymous_proxy_has_no_credentials() {
        let cfg = parse_proxy("socks5://proxy.example:1080").unwrap();
        assert_eq!(cfg.username, None);
        assert_eq!(cfg.password, None);
    }
}

use anyhow::{Result, bail, ensure};

/// Host, port, and path split out of an absolute-form request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParts {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Returns true when the buffer begins with `method` followed by a single
/// space, the cheapest possible classification of a raw request line.
pub fn starts_with_method(buffer: &[u8], method: &str) -> bool {
    let name = method.as_bytes();
    buffer.len() > name.len() && buffer.starts_with(name) && buffer[name.len()] == b' '
}

/// Extract the request target: the span between the first and second space of
/// the request line. Returns `None` when either space is missing, the span is
/// empty, or the target is not valid UTF-8.
pub fn request_target(buffer: &[u8]) -> Option<&str> {
    let first = buffer.iter().position(|byte| *byte == b' ')?;
    let rest = &buffer[first + 1..];
    let second = rest.iter().position(|byte| *byte == b' ')?;
    if second == 0 {
        return None;
    }
    std::str::from_utf8(&rest[..second]).ok()
}

/// The method token of the request line, for diagnostics on unsupported
/// requests.
pub fn method_token(buffer: &[u8]) -> String {
    let token = buffer
        .split(|byte| *byte == b' ' || *byte == b'\r')
        .next()
        .unwrap_or(b"");
    String::from_utf8_lossy(token).into_owned()
}

/// Split an absolute-form URL (`scheme://authority[/path]`) into parts. The
/// path starts at the first `/` after the scheme separator and defaults to
/// `/`; the port is taken after the last `:` of the authority and defaults
/// to 80.
pub fn parse_absolute_url(url: &str) -> Result<RequestParts> {
    ensure!(!url.is_empty(), "empty request target");

    let Some(scheme_end) = url.find("://") else {
        bail!("request target '{url}' is not absolute-form");
    };
    let after_scheme = &url[scheme_end + 3..];

    let (authority, path) = match after_scheme.find('/') {
        Some(path_start) => (
            &after_scheme[..path_start],
            after_scheme[path_start..].to_string(),
        ),
        None => (after_scheme, "/".to_string()),
    };
    ensure!(!authority.is_empty(), "request target '{url}' has no host");

    let (host, port) = split_host_port(authority, 80)?;
    Ok(RequestParts { host, port, path })
}

/// Parse a CONNECT target (`host[:port]`), defaulting to port 443.
pub fn parse_connect_target(target: &str) -> Result<RequestParts> {
    ensure!(!target.is_empty(), "empty CONNECT target");
    let (host, port) = split_host_port(target, 443)?;
    Ok(RequestParts {
        host,
        port,
        path: String::new(),
    })
}

fn split_host_port(authority: &str, default_port: u16) -> Result<(String, u16)> {
    match authority.rfind(':') {
        Some(colon) => {
            let host = &authority[..colon];
            let port_str = &authority[colon + 1..];
            ensure!(!host.is_empty(), "authority '{authority}' has no host");
            ensure!(
                !port_str.is_empty() && port_str.bytes().all(|b| b.is_ascii_digit()),
                "invalid port in authority '{authority}'"
            );
            let port: u16 = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("port out of range in authority '{authority}'"))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_methods_by_prefix() {
        assert!(starts_with_method(b"GET http://a/ HTTP/1.1\r\n", "GET"));
        assert!(starts_with_method(b"CONNECT a:443 HTTP/1.1\r\n", "CONNECT"));
        assert!(!starts_with_method(b"GETX / HTTP/1.1\r\n", "GET"));
        assert!(!starts_with_method(b"POST / HTTP/1.1\r\n", "GET"));
        assert!(!starts_with_method(b"GET", "GET"));
        assert!(!starts_with_method(b"", "GET"));
    }

    #[test]
    fn extracts_target_between_spaces() {
        assert_eq!(
            request_target(b"GET http://example.com/ HTTP/1.1\r\n"),
            Some("http://example.com/")
        );
        assert_eq!(
            request_target(b"CONNECT example.com:443 HTTP/1.1\r\n"),
            Some("example.com:443")
        );
    }

    #[test]
    fn rejects_request_lines_without_two_spaces() {
        assert_eq!(request_target(b"GET\r\n"), None);
        assert_eq!(request_target(b"GET http://example.com/\r\n"), None);
        assert_eq!(request_target(b"GET  HTTP/1.1\r\n"), None);
    }

    #[test]
    fn splits_absolute_url_with_explicit_port_and_path() {
        let parts = parse_absolute_url("http://example.com:8080/a/b?q=1").expect("parse url");
        assert_eq!(parts.host, "example.com");
        assert_eq!(parts.port, 8080);
        assert_eq!(parts.path, "/a/b?q=1");
    }

    #[test]
    fn defaults_port_and_path() {
        let parts = parse_absolute_url("http://example.com").expect("parse url");
        assert_eq!(parts.host, "example.com");
        assert_eq!(parts.port, 80);
        assert_eq!(parts.path, "/");
    }

    #[test]
    fn path_slash_belongs_to_path() {
        let parts = parse_absolute_url("http://example.com/").expect("parse url");
        assert_eq!(parts.host, "example.com");
        assert_eq!(parts.path, "/");
    }

    #[test]
    fn rejects_missing_scheme_separator() {
        assert!(parse_absolute_url("example.com/path").is_err());
        assert!(parse_absolute_url("").is_err());
        assert!(parse_absolute_url("http://").is_err());
    }

    #[test]
    fn rejects_bad_ports() {
        assert!(parse_absolute_url("http://example.com:/").is_err());
        assert!(parse_absolute_url("http://example.com:8a0/").is_err());
        assert!(parse_absolute_url("http://example.com:-1/").is_err());
        assert!(parse_absolute_url("http://example.com:65536/").is_err());
    }

    #[test]
    fn accepts_port_bounds() {
        assert_eq!(parse_absolute_url("http://h:0/").expect("parse").port, 0);
        assert_eq!(
            parse_absolute_url("http://h:65535/").expect("parse").port,
            65535
        );
    }

    #[test]
    fn connect_target_defaults_to_443() {
        let parts = parse_connect_target("example.com").expect("parse target");
        assert_eq!(parts.host, "example.com");
        assert_eq!(parts.port, 443);

        let parts = parse_connect_target("example.com:8443").expect("parse target");
        assert_eq!(parts.port, 8443);
    }

    #[test]
    fn connect_target_rejects_bad_input() {
        assert!(parse_connect_target("").is_err());
        assert!(parse_connect_target("example.com:").is_err());
        assert!(parse_connect_target(":443").is_err());
        assert!(parse_connect_target("example.com:99999").is_err());
    }

    #[test]
    fn method_token_is_extracted_for_diagnostics() {
        assert_eq!(method_token(b"DELETE /x HTTP/1.1\r\n"), "DELETE");
        assert_eq!(method_token(b""), "");
    }
}

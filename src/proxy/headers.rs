use crate::util::find_subsequence;

use super::request::RequestParts;

const CRLF: &[u8] = b"\r\n";

/// Rewrite an absolute-form client request into the origin-form request sent
/// upstream: new request line, injected `Host` and `Connection: close`, then
/// the client's remaining header lines with any `Host:` / `Connection:`
/// dropped (case-insensitive on the name up to and including the colon).
pub(crate) fn rewrite_request(head: &[u8], parts: &RequestParts) -> Vec<u8> {
    let method = head
        .split(|byte| *byte == b' ')
        .next()
        .filter(|token| !token.is_empty())
        .unwrap_or(b"GET");

    let mut rewritten = Vec::with_capacity(head.len() + 64);
    rewritten.extend_from_slice(method);
    rewritten.extend_from_slice(b" ");
    rewritten.extend_from_slice(parts.path.as_bytes());
    rewritten.extend_from_slice(b" HTTP/1.1\r\n");
    rewritten.extend_from_slice(b"Host: ");
    rewritten.extend_from_slice(parts.host.as_bytes());
    rewritten.extend_from_slice(CRLF);
    rewritten.extend_from_slice(b"Connection: close\r\n");

    let mut rest = match find_subsequence(head, CRLF) {
        Some(line_end) => &head[line_end + CRLF.len()..],
        None => &[][..],
    };

    loop {
        match find_subsequence(rest, CRLF) {
            None => {
                rewritten.extend_from_slice(CRLF);
                break;
            }
            Some(0) => {
                // Blank line: end of the header section.
                rewritten.extend_from_slice(CRLF);
                break;
            }
            Some(line_end) => {
                let line = &rest[..line_end];
                if !name_matches(line, "Host:") && !name_matches(line, "Connection:") {
                    rewritten.extend_from_slice(line);
                    rewritten.extend_from_slice(CRLF);
                }
                rest = &rest[line_end + CRLF.len()..];
            }
        }
    }

    rewritten
}

fn name_matches(line: &[u8], name: &str) -> bool {
    let name = name.as_bytes();
    line.len() >= name.len() && line[..name.len()].eq_ignore_ascii_case(name)
}

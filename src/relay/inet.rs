//! Textual forms of IP addresses

use std::net::{Ipv4Addr, Ipv6Addr};

/// 4 bytes into `a.b.c.d`
pub fn inet_ntoa(buf: &[u8]) -> Option<String> {
    match buf {
        [a, b, c, d] => Some(format!("{a}.{b}.{c}.{d}")),
        _ => None,
    }
}

/// `a.b.c.d` into 4 bytes
pub fn inet_aton(s: &str) -> Option<[u8; 4]> {
    s.parse::<Ipv4Addr>().ok().map(|addr| addr.octets())
}

/// 16 bytes into compressed IPv6 text
///
/// Groups are written in lowercase hex without leading zeros, and the longest run of
/// zero groups (the first one on ties) is collapsed into `::`.
pub fn inet_ntop6(buf: &[u8]) -> Option<String> {
    if buf.len() != 16 {
        return None;
    }

    let groups = buf
        .chunks(2)
        .map(|g| u16::from_be_bytes([g[0], g[1]]))
        .collect::<Vec<u16>>();

    // (start, len) of the longest zero run
    let mut longest: Option<(usize, usize)> = None;
    let mut i = 0;
    while i < groups.len() {
        if groups[i] != 0 {
            i += 1;
            continue;
        }

        let start = i;
        while i < groups.len() && groups[i] == 0 {
            i += 1;
        }

        let len = i - start;
        if longest.map_or(true, |(_, l)| len > l) {
            longest = Some((start, len));
        }
    }

    let join = |gs: &[u16]| gs.iter().map(|g| format!("{g:x}")).collect::<Vec<String>>().join(":");

    let text = match longest {
        None => join(&groups),
        Some((start, len)) => format!("{}::{}", join(&groups[..start]), join(&groups[start + len..])),
    };
    Some(text)
}

/// IPv6 text into 16 bytes, `::` expanded
pub fn inet_pton6(s: &str) -> Option<[u8; 16]> {
    s.parse::<Ipv6Addr>().ok().map(|addr| addr.octets())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ipv4_text() {
        assert_eq!(inet_ntoa(&[1, 2, 3, 4]).unwrap(), "1.2.3.4");
        assert_eq!(inet_aton("8.8.4.4"), Some([8, 8, 4, 4]));
        assert!(inet_ntoa(&[1, 2, 3]).is_none());
        assert!(inet_aton("1.2.3").is_none());
    }

    #[test]
    fn test_ipv6_compress() {
        let addr = inet_pton6("2001:db8:0:0:1:0:0:1").unwrap();
        assert_eq!(inet_ntop6(&addr).unwrap(), "2001:db8::1:0:0:1");

        let addr = inet_pton6("::1").unwrap();
        assert_eq!(inet_ntop6(&addr).unwrap(), "::1");

        assert_eq!(inet_ntop6(&[0u8; 16]).unwrap(), "::");

        let addr = inet_pton6("fe80::").unwrap();
        assert_eq!(inet_ntop6(&addr).unwrap(), "fe80::");

        let addr = inet_pton6("1:2:3:4:5:6:7:8").unwrap();
        assert_eq!(inet_ntop6(&addr).unwrap(), "1:2:3:4:5:6:7:8");

        // A lone zero group is collapsed as well
        let addr = inet_pton6("1:0:2:3:4:5:6:7").unwrap();
        assert_eq!(inet_ntop6(&addr).unwrap(), "1::2:3:4:5:6:7");
    }

    #[test]
    fn test_ipv6_expand() {
        let expected = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01];
        assert_eq!(inet_pton6("2001:db8::1"), Some(expected));
        assert!(inet_pton6("2001:db8::1::2").is_none());
    }
}

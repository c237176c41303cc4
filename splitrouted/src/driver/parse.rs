//! Parsing helpers shared by the platform drivers: the kernel's abbreviated
//! destination forms, and the `key: value` style output of `route`/`ip`
//! commands used by the command-line fallback paths.

use std::net::Ipv4Addr;

use splitroute_core::prefix::Prefix;

use super::Error;

/// Parses a destination as printed by the kernel route dump, tolerating the
/// platform's abbreviated forms:
/// - `"default"` -> `0.0.0.0/0`
/// - `"10.0"` -> `10.0.0.0/16` (dot-count implies the prefix length)
/// - `"203.57.66"` -> `203.57.66.0/24`
/// - `"192.168.1.100"` -> `192.168.1.100/32` (full host address, no slash)
/// - `"1.0.1/24"` -> `1.0.1.0/24` (explicit prefix overrides dot-count)
///
/// An explicit `/N` always wins over the dot-count; a partially-masked
/// input without one is padded with zero octets to match the dot count
/// rather than guessed at some other width.
pub fn parse_kernel_destination(raw: &str) -> Result<Prefix, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::InvalidRoute("empty destination".into()));
    }
    if raw.eq_ignore_ascii_case("default") {
        return Ok(Prefix::new(Ipv4Addr::new(0, 0, 0, 0), 0));
    }

    let (host_part, explicit_len) = match raw.split_once('/') {
        Some((host, len)) => {
            let len: u8 = len.parse().map_err(|_| Error::InvalidRoute(format!("bad prefix length in `{raw}`")))?;
            if len > 32 {
                return Err(Error::InvalidRoute(format!("prefix length out of range in `{raw}`")));
            }
            (host, Some(len))
        }
        None => (raw, None),
    };

    let octets: Vec<&str> = host_part.split('.').collect();
    if octets.len() > 4 || octets.iter().any(|o| o.is_empty()) {
        return Err(Error::InvalidRoute(format!("malformed destination `{raw}`")));
    }
    // A bare single octet with no explicit `/N` is ambiguous kernel-dump
    // noise, not a valid abbreviated network — the shortest real form is
    // a two-octet network like "10.0".
    if explicit_len.is_none() && octets.len() < 2 {
        return Err(Error::InvalidRoute(format!("ambiguous destination `{raw}`, no prefix length")));
    }

    let mut bytes = [0u8; 4];
    for (i, octet) in octets.iter().enumerate() {
        bytes[i] = octet.parse::<u8>().map_err(|_| Error::InvalidRoute(format!("malformed octet in `{raw}`")))?;
    }
    let addr = Ipv4Addr::from(bytes);

    let len = explicit_len.unwrap_or_else(|| (octets.len() as u8) * 8);
    Ok(Prefix::new(addr, len))
}

/// Parses `key: value`-style output such as
/// `route -n get 0.0.0.0` on BSD (`"interface:"`/`"gateway:"`) or
/// `ip route show default` on Linux (`"dev"`/`"via"`).
///
/// `filter_suffix`, when set, skips tokens immediately followed by it —
/// this handles the BSD quirk where `route -n get` sometimes prints
/// `gateway: index: 28` instead of an address, and the bare `"gateway:"`
/// match would otherwise treat `"index:"` as the gateway value.
pub fn parse_key_value_output(
    output: &str,
    iface_key: &str,
    gateway_key: &str,
    filter_suffix: Option<&str>,
) -> Result<(String, Option<String>), Error> {
    let mut iface = None;
    let mut gateway = None;

    let tokens: Vec<&str> = output.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        if token.trim_end_matches(':') == iface_key.trim_end_matches(':') && iface.is_none() {
            if let Some(value) = tokens.get(i + 1) {
                iface = Some((*value).to_string());
            }
        }
        if token.trim_end_matches(':') == gateway_key.trim_end_matches(':') && gateway.is_none() {
            if let Some(value) = tokens.get(i + 1) {
                let skip = filter_suffix.is_some_and(|suffix| value.trim_end_matches(':') == suffix.trim_end_matches(':'));
                if !skip {
                    gateway = Some((*value).to_string());
                }
            }
        }
    }

    let iface = iface.ok_or_else(|| Error::InvalidRoute(format!("no `{iface_key}` found in `{output}`")))?;
    Ok((iface, gateway))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("default", "0.0.0.0/0")]
    #[case("10.0", "10.0.0.0/16")]
    #[case("203.57.66", "203.57.66.0/24")]
    #[case("192.168.1.100", "192.168.1.100/32")]
    #[case("1.0.1/24", "1.0.1.0/24")]
    fn parses_abbreviated_forms(#[case] input: &str, #[case] expect: &str) {
        let prefix = parse_kernel_destination(input).unwrap();
        assert_eq!(prefix.to_string(), expect);
    }

    #[rstest]
    #[case("")]
    #[case("203")]
    fn rejects_bad_input(#[case] input: &str) {
        assert!(parse_kernel_destination(input).is_err());
    }

    #[test]
    fn canonicalization_closure_through_kernel_parser() {
        for input in ["default", "10.0", "203.57.66", "192.168.1.100", "1.0.1/24"] {
            let prefix = parse_kernel_destination(input).unwrap();
            let reparsed = parse_kernel_destination(&prefix.to_string()).unwrap();
            assert_eq!(prefix, reparsed);
        }
    }

    #[test]
    fn parses_macos_interface_and_gateway() {
        let output = "   route to: default\ndestination: default\n       mask: default\n    gateway: 192.168.1.1\n  interface: en0\n";
        let (iface, gateway) = parse_key_value_output(output, "interface:", "gateway:", Some(":")).unwrap();
        assert_eq!(iface, "en0");
        assert_eq!(gateway.as_deref(), Some("192.168.1.1"));
    }

    #[test]
    fn skips_index_sentinel_on_linkscope_gateway() {
        let output = "interface: en0\ngateway: index: 28\n";
        let (iface, gateway) = parse_key_value_output(output, "interface:", "gateway:", Some(":")).unwrap();
        assert_eq!(iface, "en0");
        assert_eq!(gateway, None);
    }

    #[test]
    fn parses_linux_dev_via() {
        let output = "default via 192.168.1.1 dev eth0\n";
        let (iface, gateway) = parse_key_value_output(output, "dev", "via", None).unwrap();
        assert_eq!(iface, "eth0");
        assert_eq!(gateway.as_deref(), Some("192.168.1.1"));
    }
}

//! Syntactic checks applied to domains and addresses recovered from
//! bounce messages before we trust them enough to name files after them.
use regex::Regex;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::LazyLock;

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+(?:[a-zA-Z]{2,63}|xn--[a-zA-Z0-9-]{1,59})$",
    )
    .expect("domain regex to compile")
});

static DOT_ATOM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-zA-Z0-9!#$%&'*+/=?^_`{|}~-]+)*$")
        .expect("dot-atom regex to compile")
});

static QUOTED_LOCAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^"(?:[\x20\x21\x23-\x5b\x5d-\x7e]|\\[\x20-\x7e])*"$"#)
        .expect("quoted local part regex to compile")
});

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LOCAL_PART_LEN: usize = 64;

/// Returns true if `domain` is a syntactically valid, fully qualified
/// domain name. Internationalized names are checked in their ASCII form.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.trim() != domain {
        return false;
    }
    let ascii = match idna::domain_to_ascii(domain) {
        Ok(ascii) => ascii,
        Err(_) => return false,
    };
    ascii.len() <= MAX_DOMAIN_LEN && DOMAIN_RE.is_match(&ascii)
}

/// Returns true if `address` looks like `local@domain`, where the domain
/// is either a valid domain name or a bracketed address literal.
pub fn is_valid_email(address: &str) -> bool {
    let (local, domain) = match address.rsplit_once('@') {
        Some(parts) => parts,
        None => return false,
    };

    if local.is_empty() || local.len() > MAX_LOCAL_PART_LEN {
        return false;
    }
    if !DOT_ATOM_RE.is_match(local) && !QUOTED_LOCAL_RE.is_match(local) {
        return false;
    }

    is_valid_domain(domain) || is_address_literal(domain)
}

fn is_address_literal(domain: &str) -> bool {
    let Some(literal) = domain
        .strip_prefix('[')
        .and_then(|d| d.strip_suffix(']'))
    else {
        return false;
    };
    match literal.strip_prefix("IPv6:") {
        Some(v6) => v6.parse::<Ipv6Addr>().is_ok(),
        None => literal.parse::<IpAddr>().map(|ip| ip.is_ipv4()).unwrap_or(false),
    }
}

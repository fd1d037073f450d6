//! Magnet URI parsing
//!
//! Only the parts the indexer needs are extracted: the BitTorrent info-hash
//! (`xt=urn:btih:`), the display name (`dn`) and the exact length (`xl`).

use url::form_urlencoded;

/// A parsed magnet link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetUri {
    /// The cleaned URI as found in the page
    pub uri: String,
    /// Info-hash as 40 lowercase hex characters
    pub info_hash: String,
    /// Decoded `dn` parameter
    pub display_name: Option<String>,
    /// `xl` parameter (bytes)
    pub exact_length: Option<u64>,
}

impl MagnetUri {
    /// Parse a magnet URI. Returns `None` when it carries no valid btih hash.
    pub fn parse(raw: &str) -> Option<Self> {
        let uri = clean(raw);
        let query = strip_scheme(&uri)?;

        let mut info_hash = None;
        let mut display_name = None;
        let mut exact_length = None;

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "xt" if info_hash.is_none() => {
                    info_hash = value
                        .get(..9)
                        .filter(|prefix| prefix.eq_ignore_ascii_case("urn:btih:"))
                        .and_then(|_| normalize_info_hash(&value[9..]));
                }
                "dn" if display_name.is_none() => {
                    let name = value.trim();
                    if !name.is_empty() {
                        display_name = Some(name.to_string());
                    }
                }
                "xl" if exact_length.is_none() => {
                    exact_length = value.trim().parse().ok().filter(|len| *len > 0);
                }
                _ => {}
            }
        }

        Some(Self {
            info_hash: info_hash?,
            uri,
            display_name,
            exact_length,
        })
    }
}

/// Remove whitespace and any fragment from a magnet href.
pub fn clean(raw: &str) -> String {
    let without_ws: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    match without_ws.split_once('#') {
        Some((head, _)) => head.to_string(),
        None => without_ws,
    }
}

/// Whether `href` looks like a magnet link at all.
pub fn is_magnet_href(href: &str) -> bool {
    href.trim_start()
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("magnet:"))
}

fn strip_scheme(uri: &str) -> Option<&str> {
    if !is_magnet_href(uri) {
        return None;
    }
    uri[7..].strip_prefix('?')
}

/// Normalize a hex or base32 btih value to lowercase hex.
fn normalize_info_hash(value: &str) -> Option<String> {
    let value = value.trim();
    match value.len() {
        40 if value.chars().all(|c| c.is_ascii_hexdigit()) => Some(value.to_ascii_lowercase()),
        32 => base32_to_hex(value),
        _ => None,
    }
}

fn base32_to_hex(value: &str) -> Option<String> {
    let mut bits: u64 = 0;
    let mut bit_count = 0;
    let mut bytes = Vec::with_capacity(20);

    for c in value.chars() {
        let digit = match c.to_ascii_uppercase() {
            c @ 'A'..='Z' => c as u64 - 'A' as u64,
            c @ '2'..='7' => c as u64 - '2' as u64 + 26,
            _ => return None,
        };
        bits = (bits << 5) | digit;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            bytes.push((bits >> bit_count) as u8);
            bits &= (1 << bit_count) - 1;
        }
    }

    if bytes.len() != 20 {
        return None;
    }
    Some(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

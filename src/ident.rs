//! Distinguished name helpers
//! --------------------------
//! Single source of truth for deriving backend-native keys from a DN.
//! Both derivations are deterministic and one-way: tabular stores key rows by
//! the value of the leading RDN, document stores key documents by the reversed
//! RDN values joined with `_`.

pub const BASE_DN: &str = "o=jans";

/// Split a DN into its RDN components, honoring backslash-escaped commas.
pub fn split_rdns(dn: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut escaped = false;
    for ch in dn.chars() {
        if escaped {
            cur.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => { cur.push(ch); escaped = true; }
            ',' => { out.push(cur.trim().to_string()); cur.clear(); }
            _ => cur.push(ch),
        }
    }
    if !cur.trim().is_empty() { out.push(cur.trim().to_string()); }
    out
}

/// Value part of an `attr=value` RDN (the whole string if no `=` is present).
fn rdn_value(rdn: &str) -> &str {
    match rdn.split_once('=') {
        Some((_, v)) => v.trim(),
        None => rdn,
    }
}

/// Row key used by the tabular backends: the value of the leading RDN.
/// The base DN itself maps to `_`.
///
/// `inum=29DA,ou=clients,o=jans` -> `29DA`
pub fn doc_id_from_dn(dn: &str) -> String {
    let rdns = split_rdns(dn);
    let Some(first) = rdns.first() else { return "_".to_string() };
    let v = rdn_value(first);
    if v == "jans" || v.is_empty() { "_".to_string() } else { v.to_string() }
}

/// Document key used by the query backend: RDN values below the base DN in
/// reverse order joined with `_`.
///
/// `ou=jans-lock,ou=configuration,o=jans` -> `configuration_jans-lock`
pub fn id_from_dn(dn: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let rdns = split_rdns(dn);
    for rdn in rdns.iter().rev() {
        if rdn.eq_ignore_ascii_case(BASE_DN) { continue; }
        parts.push(rdn_value(rdn));
    }
    if parts.is_empty() { "_".to_string() } else { parts.join("_") }
}

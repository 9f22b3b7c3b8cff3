//! Hardware-vendor lookup by OUI prefix.
//!
//! Entries may cover any prefix length up to 48 bits (classic 24-bit OUIs,
//! 28-bit MA-M and 36-bit MA-S blocks); the longest matching prefix wins.

use std::path::Path;

use netwatch_core::types::UNKNOWN;
use netwatch_core::MacAddress;

use crate::error::{DiscoverError, Result};

const BUILTIN: &[(&str, &str)] = &[
    ("00:00:0c", "Cisco"),
    ("00:50:56", "VMware"),
    ("00:0c:29", "VMware"),
    ("00:1c:42", "Parallels"),
    ("00:15:5d", "Microsoft"),
    ("00:50:8b", "Intel"),
    ("00:1b:21", "Hewlett Packard"),
];

#[derive(Debug, Clone)]
struct VendorEntry {
    prefix: [u8; 6],
    bits: u8,
    name: String,
}

impl VendorEntry {
    fn matches(&self, mac: &MacAddress) -> bool {
        let octets = mac.octets();
        let full = (self.bits / 8) as usize;
        if self.prefix[..full] != octets[..full] {
            return false;
        }
        let rest = self.bits % 8;
        if rest == 0 {
            return true;
        }
        let mask = 0xffu8 << (8 - rest);
        self.prefix[full] & mask == octets[full] & mask
    }
}

/// Static OUI prefix table.
#[derive(Debug, Clone, Default)]
pub struct VendorTable {
    entries: Vec<VendorEntry>,
}

impl VendorTable {
    /// The built-in prefix set.
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for (prefix, name) in BUILTIN {
            if let Some((prefix, bits)) = parse_prefix(prefix) {
                table.push(prefix, bits, name);
            }
        }
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add one prefix such as `00:50:56`, `001BC5`, or `00:1B:C5:0/28`.
    pub fn insert(&mut self, prefix: &str, name: &str) -> Option<()> {
        let (prefix, bits) = parse_prefix(prefix)?;
        self.push(prefix, bits, name.trim());
        Some(())
    }

    /// Load extra entries from a file, one `<prefix>[/<bits>] <vendor>` per
    /// line. Blank lines and `#` comments are skipped. Returns the number of
    /// entries added.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let mut added = 0;
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (prefix, name) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| DiscoverError::VendorTable {
                    line: idx + 1,
                    reason: "expected `<prefix> <vendor>`".to_string(),
                })?;
            self.insert(prefix, name)
                .ok_or_else(|| DiscoverError::VendorTable {
                    line: idx + 1,
                    reason: format!("bad prefix `{prefix}`"),
                })?;
            added += 1;
        }
        Ok(added)
    }

    /// Longest-prefix match.
    pub fn lookup(&self, mac: &MacAddress) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.matches(mac))
            .map(|e| e.name.as_str())
    }

    /// Vendor name, or "Unknown" when no prefix matches.
    pub fn vendor_or_unknown(&self, mac: &MacAddress) -> String {
        self.lookup(mac).unwrap_or(UNKNOWN).to_string()
    }

    fn push(&mut self, prefix: [u8; 6], bits: u8, name: &str) {
        self.entries.push(VendorEntry {
            prefix,
            bits,
            name: name.to_string(),
        });
        // Longest prefixes first so the first hit is the most specific one.
        self.entries.sort_by(|a, b| b.bits.cmp(&a.bits));
    }
}

fn parse_prefix(raw: &str) -> Option<([u8; 6], u8)> {
    let (digits, explicit_bits) = match raw.split_once('/') {
        Some((d, b)) => (d, Some(b.trim().parse::<u8>().ok()?)),
        None => (raw, None),
    };

    let nibbles: Vec<u8> = digits
        .chars()
        .filter(|c| !matches!(*c, ':' | '-' | '.'))
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<Vec<u8>>>()?;
    if nibbles.is_empty() || nibbles.len() > 12 {
        return None;
    }

    let mut prefix = [0u8; 6];
    for (i, nibble) in nibbles.iter().enumerate() {
        let shift = if i % 2 == 0 { 4 } else { 0 };
        prefix[i / 2] |= *nibble << shift;
    }

    let available = (nibbles.len() * 4) as u8;
    let bits = explicit_bits.unwrap_or(available);
    if bits == 0 || bits > available {
        return None;
    }
    Some((prefix, bits))
}

//! Optional address-to-source sidecar: `[<hex-addr>]:` stanzas each
//! followed by the source lines that produced the instructions at
//! that address, used only to enrich debug metadata.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct A2SMap {
    stanzas: BTreeMap<u32, Vec<String>>,
}

impl A2SMap {
    pub fn source_for(&self, addr: u32) -> Option<&[String]> {
        self.stanzas.get(&addr).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.stanzas.is_empty()
    }
}

/// Parses the `[<hex-addr>]:\n<source-lines>\n…` stanza format.
/// `InvalidA2S` on any bracketed header whose contents are not valid
/// hex.
pub fn parse(text: &str) -> Result<A2SMap> {
    let mut stanzas = BTreeMap::new();
    let mut current: Option<(u32, Vec<String>)> = None;

    for line in text.lines() {
        if let Some(hex) = line.strip_prefix('[').and_then(|s| s.strip_suffix("]:")) {
            if let Some((addr, lines)) = current.take() {
                stanzas.insert(addr, lines);
            }
            let addr = u32::from_str_radix(hex.trim_start_matches("0x"), 16)
                .map_err(|_| Error::InvalidA2S(format!("malformed address header: {line:?}")))?;
            current = Some((addr, Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line.to_string());
        } else if !line.trim().is_empty() {
            return Err(Error::InvalidA2S(format!("source line before any address header: {line:?}")));
        }
    }
    if let Some((addr, lines)) = current {
        stanzas.insert(addr, lines);
    }

    Ok(A2SMap { stanzas })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_stanzas() {
        let text = "[0x1000]:\nint main() {\n    return 0;\n[0x1008]:\n}\n";
        let map = parse(text).unwrap();
        assert_eq!(map.source_for(0x1000), Some(&["int main() {".to_string(), "    return 0;".to_string()][..]));
        assert_eq!(map.source_for(0x1008), Some(&["}".to_string()][..]));
    }

    #[test]
    fn rejects_non_hex_header() {
        assert!(parse("[not-hex]:\nfoo\n").is_err());
    }

    #[test]
    fn rejects_source_before_any_header() {
        assert!(parse("stray line\n[0x1000]:\nfoo\n").is_err());
    }

    #[test]
    fn empty_input_is_an_empty_map() {
        let map = parse("").unwrap();
        assert!(map.is_empty());
    }
}

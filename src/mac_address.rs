use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Hardware address in canonical `AA:BB:CC:DD:EE:FF` form.
///
/// Accepts colon or dash separated input in any letter case; the router
/// reports addresses upper case, so comparisons happen on the canonical form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against an address as reported by the router.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl FromStr for MacAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let octets: Vec<&str> = s.split([':', '-']).collect();

        let well_formed = octets.len() == 6
            && octets
                .iter()
                .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));

        if !well_formed {
            return Err(format!("invalid hardware address: {s:?}"));
        }

        Ok(MacAddress(octets.join(":").to_ascii_uppercase()))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_case_and_separator() {
        let mac: MacAddress = "aa-bb-cc-dd-ee-0f".parse().unwrap();
        assert_eq!(mac.as_str(), "AA:BB:CC:DD:EE:0F");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for raw in ["", "AA:BB:CC:DD:EE", "AA:BB:CC:DD:EE:FF:00", "AA:BB:CC:DD:EE:GG", "AABBCCDDEEFF"] {
            assert!(raw.parse::<MacAddress>().is_err(), "{raw} accepted");
        }
    }

    #[test]
    fn matches_router_reported_form() {
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert!(mac.matches("AA:BB:CC:DD:EE:FF"));
        assert!(!mac.matches("AA:BB:CC:DD:EE:00"));
    }

    #[test]
    fn deserializes_through_validation() {
        let mac: MacAddress = serde_json::from_str("\"aa:bb:cc:dd:ee:ff\"").unwrap();
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");
        assert!(serde_json::from_str::<MacAddress>("\"nope\"").is_err());
    }
}

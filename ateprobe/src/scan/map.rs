//! Register snapshots.
//!
//! A snapshot is persisted as a flat JSON object:
//!
//! ```json
//! {
//!   "0x00": "0x01",
//!   "0x01": "NO_RESPONSE"
//! }
//! ```

use {
    crate::error::{Error, Result},
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, fmt, fs, path::Path},
};

/// Sentinel stored for an address that never answered.
pub const NO_RESPONSE: &str = "NO_RESPONSE";

/// Value of one register.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegisterValue {
    /// Value as printed by the console.
    Value(String),
    /// The address never answered.
    NoResponse,
}

static ABSENT: RegisterValue = RegisterValue::NoResponse;

impl RegisterValue {
    /// Snapshot representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Value(v) => v,
            Self::NoResponse => NO_RESPONSE,
        }
    }

    /// Whether the register answered.
    pub fn is_readable(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

impl From<Option<String>> for RegisterValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::NoResponse, Self::Value)
    }
}

impl From<&str> for RegisterValue {
    fn from(text: &str) -> Self {
        if text == NO_RESPONSE {
            Self::NoResponse
        } else {
            Self::Value(text.to_string())
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of register values keyed by address.
///
/// An address missing from the map reads as `NoResponse`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct RegisterMap {
    entries: BTreeMap<u8, RegisterValue>,
}

impl RegisterMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value.
    pub fn insert(&mut self, addr: u8, value: RegisterValue) {
        self.entries
            .insert(addr, value);
    }

    /// Value at `addr`; `NoResponse` if absent.
    pub fn get(&self, addr: u8) -> &RegisterValue {
        self.entries
            .get(&addr)
            .unwrap_or(&ABSENT)
    }

    /// Whether `addr` was recorded at all.
    pub fn contains(&self, addr: u8) -> bool {
        self.entries
            .contains_key(&addr)
    }

    /// Recorded entries in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &RegisterValue)> {
        self.entries
            .iter()
            .map(|(a, v)| (*a, v))
    }

    /// Recorded addresses in order.
    pub fn addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries
            .keys()
            .copied()
    }

    /// Addresses that answered.
    pub fn readable(&self) -> impl Iterator<Item = u8> + '_ {
        self.iter()
            .filter(|(_, v)| v.is_readable())
            .map(|(a, _)| a)
    }

    /// Number of recorded addresses.
    pub fn len(&self) -> usize {
        self.entries
            .len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries
            .is_empty()
    }

    /// Pretty JSON with sorted `"0x%02x"` keys.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a snapshot.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, String> = serde_json::from_str(text)?;
        Self::try_from(raw)
    }

    /// Write the snapshot to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut json = self.to_json()?;
        json.push('\n');
        fs::write(path, json)?;
        Ok(())
    }

    /// Read a snapshot from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

impl FromIterator<(u8, RegisterValue)> for RegisterMap {
    fn from_iter<I: IntoIterator<Item = (u8, RegisterValue)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .collect(),
        }
    }
}

fn parse_key(key: &str) -> Result<u8> {
    let digits = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .ok_or_else(|| Error::InvalidSnapshot(format!("key {key:?} lacks 0x prefix")))?;
    if digits.is_empty() || digits.len() > 2 {
        return Err(Error::InvalidSnapshot(format!(
            "key {key:?} is not an 8-bit address"
        )));
    }
    u8::from_str_radix(digits, 16)
        .map_err(|_| Error::InvalidSnapshot(format!("key {key:?} is not hexadecimal")))
}

impl TryFrom<BTreeMap<String, String>> for RegisterMap {
    type Error = Error;

    fn try_from(raw: BTreeMap<String, String>) -> Result<Self> {
        raw.iter()
            .map(|(key, value)| Ok::<_, Error>((parse_key(key)?, RegisterValue::from(value.as_str()))))
            .collect()
    }
}

impl From<RegisterMap> for BTreeMap<String, String> {
    fn from(map: RegisterMap) -> Self {
        map.entries
            .into_iter()
            .map(|(addr, value)| {
                let text = match value {
                    RegisterValue::Value(v) => v,
                    RegisterValue::NoResponse => NO_RESPONSE.to_string(),
                };
                (format!("0x{addr:02x}"), text)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RegisterMap {
        [
            (0x00, RegisterValue::from("0x01")),
            (0x0a, RegisterValue::NoResponse),
            (0xfe, RegisterValue::from("0x10")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_json_shape() {
        let json = sample()
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["0x00"], "0x01");
        assert_eq!(value["0x0a"], NO_RESPONSE);
        assert_eq!(value["0xfe"], "0x10");
        // Sorted keys
        let first = json
            .find("0x00")
            .unwrap();
        let last = json
            .find("0xfe")
            .unwrap();
        assert!(first < last);
    }

    #[test]
    fn test_parse_snapshot() {
        let map = RegisterMap::from_json(r#"{"0x00":"0x01","0x01":"NO_RESPONSE"}"#).unwrap();
        assert_eq!(map.get(0x00), &RegisterValue::from("0x01"));
        assert_eq!(map.get(0x01), &RegisterValue::NoResponse);
        assert_eq!(map.readable().collect::<Vec<_>>(), vec![0x00]);
    }

    #[test]
    fn test_absent_address_reads_no_response() {
        let map = sample();
        assert!(!map.contains(0x42));
        assert_eq!(map.get(0x42), &RegisterValue::NoResponse);
    }

    #[test]
    fn test_malformed_keys_rejected() {
        for bad in [r#"{"00":"0x01"}"#, r#"{"0x100":"0x01"}"#, r#"{"0xzz":"0x01"}"#, r#"{"0x":"1"}"#] {
            assert!(
                matches!(RegisterMap::from_json(bad), Err(Error::InvalidSnapshot(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_non_object_is_json_error() {
        assert!(matches!(RegisterMap::from_json("[1,2]"), Err(Error::Json(_))));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("day.json");
        sample()
            .save(&path)
            .unwrap();
        assert_eq!(RegisterMap::load(&path).unwrap(), sample());
    }

    #[test]
    fn test_uppercase_keys_accepted() {
        let map = RegisterMap::from_json(r#"{"0xFE":"0x20"}"#).unwrap();
        assert_eq!(map.get(0xfe).as_str(), "0x20");
    }
}

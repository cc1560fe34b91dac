use std::fmt;
use std::fmt::Write;
use std::str;
use std::str::FromStr;

use anyhow::{bail, ensure, Context, Result};
use data_encoding::{Encoding, HEXLOWER_PERMISSIVE};
use serde::{Deserialize, Serialize};

/// A 128-bit package identity.
///
/// Packages are looked up by UUID, never by name: name collisions across
/// registries are legal, UUID collisions are not.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uuid([u8; 16]);

/// The anchor pseudo-package representing the host language runtime.
///
/// Every registry version row implicitly depends on it; the resolver seeds it
/// with the singleton candidate set containing the host version.
pub const JULIA_UUID: Uuid = Uuid([
    0x12, 0x22, 0xc4, 0xb2, 0x21, 0x14, 0x5b, 0xfd, 0xae, 0xef, 0x88, 0xe4, 0x69, 0x2b, 0xbb, 0x3e,
]);

impl Uuid {
    const ENCODING: Encoding = HEXLOWER_PERMISSIVE;
    // Offsets of the hyphen-separated groups in the canonical form:
    // 8-4-4-4-12 hex digits.
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

    pub fn parse(s: &str) -> Result<Self> {
        fn inner(s: &str) -> Result<Uuid> {
            let groups: Vec<&str> = s.split('-').collect();
            ensure!(
                groups.len() == Uuid::GROUPS.len(),
                "expected 5 hyphen-separated groups, got {}",
                groups.len()
            );
            for (group, expected_len) in groups.iter().zip(Uuid::GROUPS) {
                ensure!(
                    group.len() == expected_len,
                    "group `{group}` has wrong length, expected {expected_len} hex digits"
                );
            }

            let hex: String = groups.concat();
            let mut buffer = [0u8; 16];
            let len = Uuid::ENCODING
                .decode_mut(hex.as_bytes(), &mut buffer)
                .map_err(|e| e.error)?;
            ensure!(len == 16, "invalid UUID length");

            Ok(Uuid(buffer))
        }

        inner(s).with_context(|| format!("failed to parse UUID: {s}"))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_julia(&self) -> bool {
        *self == JULIA_UUID
    }
}

impl FromStr for Uuid {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse(s)
    }
}

impl TryFrom<&str> for Uuid {
    type Error = anyhow::Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<String> for Uuid {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Uuid> for String {
    fn from(u: Uuid) -> Self {
        u.to_string()
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buffer = [0u8; 32];
        Uuid::ENCODING.encode_mut(&self.0, &mut buffer);
        let hex = str::from_utf8(&buffer).expect("hex digits are ASCII");

        let mut offset = 0;
        for (i, len) in Uuid::GROUPS.iter().enumerate() {
            if i > 0 {
                f.write_char('-')?;
            }
            f.write_str(&hex[offset..offset + len])?;
            offset += len;
        }
        Ok(())
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid({self})")
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::{Uuid, JULIA_UUID};

    #[test]
    fn parse_display_round_trip() {
        let s = "7876af07-990d-54b4-ab0e-23690620f79a";
        let uuid = Uuid::parse(s).unwrap();
        assert_eq!(uuid.to_string(), s);
    }

    #[test]
    fn parse_is_case_permissive() {
        let lower = Uuid::parse("7876af07-990d-54b4-ab0e-23690620f79a").unwrap();
        let upper = Uuid::parse("7876AF07-990D-54B4-AB0E-23690620F79A").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(upper.to_string(), "7876af07-990d-54b4-ab0e-23690620f79a");
    }

    #[test]
    fn julia_anchor() {
        assert_eq!(
            JULIA_UUID.to_string(),
            "1222c4b2-2114-5bfd-aeef-88e4692bbb3e"
        );
        assert!(JULIA_UUID.is_julia());
    }

    #[test_case("7876af07990d54b4ab0e23690620f79a"; "missing hyphens")]
    #[test_case("7876af07-990d-54b4-ab0e"; "too few groups")]
    #[test_case("7876af07-990d-54b4-ab0e-23690620f79"; "short last group")]
    #[test_case("7876ag07-990d-54b4-ab0e-23690620f79a"; "non hex digit")]
    fn parse_rejects(s: &str) {
        assert!(Uuid::parse(s).is_err());
    }

    #[test]
    fn serde_string_round_trip() {
        let s = r#""7876af07-990d-54b4-ab0e-23690620f79a""#;
        let uuid = serde_json::from_str::<Uuid>(s).unwrap();
        assert_eq!(serde_json::to_string(&uuid).unwrap(), s);
    }
}

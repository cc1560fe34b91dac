use std::fmt;
use std::io::Read;
use std::str;
use std::str::FromStr;

use anyhow::{ensure, Context, Result};
use data_encoding::{Encoding, HEXLOWER_PERMISSIVE};
use serde::{Deserialize, Serialize};
use sha1::Digest as _;
use sha2::Digest as _;

const ENCODING: Encoding = HEXLOWER_PERMISSIVE;

/// A 160-bit content address identifying a directory tree.
///
/// This is the sole identifier of installed source code: two trees with equal
/// hashes are the same tree, wherever they came from.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TreeHash([u8; 20]);

/// A 256-bit content address of a downloaded file.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash([u8; 32]);

macro_rules! hex_newtype {
    ($name:ident, $bytes:literal, $what:literal) => {
        impl $name {
            pub fn parse(s: &str) -> Result<Self> {
                fn inner(s: &str) -> Result<$name> {
                    let mut buffer = [0u8; $bytes];
                    let expected_len = buffer.len();

                    let decode_len = ENCODING.decode_len(s.len())?;
                    ensure!(
                        decode_len == expected_len,
                        "invalid length {decode_len}, should be {expected_len}"
                    );

                    let len = ENCODING
                        .decode_mut(s.as_bytes(), &mut buffer)
                        .map_err(|e| e.error)?;
                    ensure!(
                        len == expected_len,
                        "invalid length {len}, should be {expected_len}"
                    );

                    Ok($name(buffer))
                }

                inner(s).with_context(|| format!("failed to parse {}: {s}", $what))
            }

            pub fn as_bytes(&self) -> &[u8; $bytes] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::parse(s)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = anyhow::Error;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl TryFrom<String> for $name {
            type Error = anyhow::Error;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(h: $name) -> Self {
                h.to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut buffer = [0u8; $bytes * 2];
                ENCODING.encode_mut(&self.0, &mut buffer);
                let string = str::from_utf8(&buffer).expect("hex digits are ASCII");
                f.write_str(string)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self)
            }
        }
    };
}

hex_newtype!(TreeHash, 20, "tree hash");
hex_newtype!(FileHash, 32, "file hash");

impl TreeHash {
    /// The short on-disk directory name derived from this hash.
    ///
    /// Collisions are resolved by extending the slug; see
    /// [`Depot`](crate::depot::Depot).
    pub fn slug(&self, len: usize) -> String {
        let full = self.to_string();
        full[..len.min(full.len())].to_string()
    }
}

/// Streaming SHA-256 digest producing a [`FileHash`].
pub struct Digest(sha2::Sha256);

impl Digest {
    /// Get recommended digest algorithm for file contents.
    pub fn recommended() -> Self {
        Self(sha2::Sha256::new())
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    pub fn update_read(&mut self, mut input: impl Read) -> Result<&mut Self> {
        let mut buf = [0; 64 * 1024];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break Ok(self);
            }
            self.update(&buf[..n]);
        }
    }

    pub fn finish(&mut self) -> FileHash {
        FileHash(self.0.finalize_reset().into())
    }
}

/// Streaming SHA-1 digest producing a [`TreeHash`].
pub struct TreeDigest(sha1::Sha1);

impl TreeDigest {
    pub fn new() -> Self {
        Self(sha1::Sha1::new())
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    pub fn finish(&mut self) -> TreeHash {
        TreeHash(self.0.finalize_reset().into())
    }
}

impl Default for TreeDigest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{Digest, FileHash, TreeHash};

    const LOREM: &[u8] =
        b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod.";

    fn lorem_hash() -> FileHash {
        "b62fc4b9bfbd9310a47d2e595d2c8f468354266be0827aeea9b465d9984908de"
            .parse()
            .unwrap()
    }

    #[test]
    fn file_hash_parse_display() {
        let s = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        let hash = FileHash::parse(s).unwrap();
        assert_eq!(hash.to_string(), s);
    }

    #[test]
    fn tree_hash_parse_display() {
        let s = "d30e1a5d8d53d3a6dc20a8e2a573068cd6a1ef29";
        let hash = TreeHash::parse(s).unwrap();
        assert_eq!(hash.to_string(), s);
        assert_eq!(hash.slug(8), "d30e1a5d");
        assert_eq!(hash.slug(9), "d30e1a5d8");
    }

    #[test]
    fn tree_hash_rejects_file_hash_length() {
        assert!(
            TreeHash::parse("0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")
                .is_err()
        );
    }

    #[test]
    fn digest() {
        let actual = Digest::recommended().update(LOREM).finish();
        assert_eq!(actual, lorem_hash());
    }

    #[test]
    fn digest_read() {
        let actual = Digest::recommended()
            .update_read(Cursor::new(LOREM))
            .unwrap()
            .finish();
        assert_eq!(actual, lorem_hash());
    }
}

//! Platform triples and artifact selection.
//!
//! A platform is a tagged variant plus an optional compiler-ABI annotation.
//! Wildcards are `None` fields: a candidate leaving `libc` unset matches any
//! host libc. `triplet` is canonical; equal platforms produce equal triplets
//! and parsing is a total inverse modulo wildcards.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86_64,
    I686,
    Aarch64,
    Armv6l,
    Armv7l,
    Powerpc64le,
    Riscv64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::I686 => "i686",
            Arch::Aarch64 => "aarch64",
            Arch::Armv6l => "armv6l",
            Arch::Armv7l => "armv7l",
            Arch::Powerpc64le => "powerpc64le",
            Arch::Riscv64 => "riscv64",
        }
    }

    pub fn wordsize(&self) -> u32 {
        match self {
            Arch::I686 | Arch::Armv6l | Arch::Armv7l => 32,
            _ => 64,
        }
    }
}

impl FromStr for Arch {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "x86_64" => Ok(Arch::X86_64),
            "i686" => Ok(Arch::I686),
            "aarch64" => Ok(Arch::Aarch64),
            "armv6l" => Ok(Arch::Armv6l),
            "armv7l" => Ok(Arch::Armv7l),
            "powerpc64le" => Ok(Arch::Powerpc64le),
            "riscv64" => Ok(Arch::Riscv64),
            _ => Err(()),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Libc {
    Glibc,
    Musl,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAbi {
    Eabihf,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CxxStringAbi {
    Cxx03,
    Cxx11,
}

/// Compiler-ABI constraints; `None` means "any".
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct CompilerAbi {
    pub libgfortran_version: Option<u32>,
    pub libstdcxx_version: Option<u32>,
    pub cxxstring_abi: Option<CxxStringAbi>,
}

impl CompilerAbi {
    fn matches(&self, host: &CompilerAbi) -> bool {
        wildcard_eq(self.libgfortran_version, host.libgfortran_version)
            && wildcard_eq(self.libstdcxx_version, host.libstdcxx_version)
            && wildcard_eq(self.cxxstring_abi, host.cxxstring_abi)
    }
}

fn wildcard_eq<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Platform {
    Linux {
        arch: Arch,
        libc: Option<Libc>,
        call_abi: Option<CallAbi>,
    },
    MacOs {
        arch: Arch,
    },
    Windows {
        arch: Arch,
    },
    FreeBsd {
        arch: Arch,
        call_abi: Option<CallAbi>,
    },
    Unknown,
}

impl Platform {
    pub fn arch(&self) -> Option<Arch> {
        match self {
            Platform::Linux { arch, .. }
            | Platform::MacOs { arch }
            | Platform::Windows { arch }
            | Platform::FreeBsd { arch, .. } => Some(*arch),
            Platform::Unknown => None,
        }
    }

    pub fn wordsize(&self) -> Option<u32> {
        self.arch().map(|a| a.wordsize())
    }

    fn matches(&self, host: &Platform) -> bool {
        match (self, host) {
            (
                Platform::Linux {
                    arch: a,
                    libc: l1,
                    call_abi: c1,
                },
                Platform::Linux {
                    arch: b,
                    libc: l2,
                    call_abi: c2,
                },
            ) => a == b && wildcard_eq(*l1, *l2) && wildcard_eq(*c1, *c2),
            (Platform::MacOs { arch: a }, Platform::MacOs { arch: b }) => a == b,
            (Platform::Windows { arch: a }, Platform::Windows { arch: b }) => a == b,
            (
                Platform::FreeBsd {
                    arch: a,
                    call_abi: c1,
                },
                Platform::FreeBsd {
                    arch: b,
                    call_abi: c2,
                },
            ) => a == b && wildcard_eq(*c1, *c2),
            _ => false,
        }
    }
}

/// A platform together with its compiler-ABI annotation; the unit artifact
/// selection operates on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PlatformSpec {
    pub platform: Platform,
    pub abi: CompilerAbi,
}

impl PlatformSpec {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            abi: CompilerAbi::default(),
        }
    }

    /// The platform this process runs on, with wildcard ABI fields.
    pub fn host() -> Self {
        let arch = if cfg!(target_arch = "x86_64") {
            Arch::X86_64
        } else if cfg!(target_arch = "aarch64") {
            Arch::Aarch64
        } else if cfg!(target_arch = "x86") {
            Arch::I686
        } else if cfg!(target_arch = "riscv64") {
            Arch::Riscv64
        } else if cfg!(target_arch = "powerpc64") {
            Arch::Powerpc64le
        } else {
            Arch::X86_64
        };
        let platform = if cfg!(target_os = "linux") {
            let libc = if cfg!(target_env = "musl") {
                Libc::Musl
            } else {
                Libc::Glibc
            };
            Platform::Linux {
                arch,
                libc: Some(libc),
                call_abi: None,
            }
        } else if cfg!(target_os = "macos") {
            Platform::MacOs { arch }
        } else if cfg!(target_os = "windows") {
            Platform::Windows { arch }
        } else if cfg!(target_os = "freebsd") {
            Platform::FreeBsd {
                arch,
                call_abi: None,
            }
        } else {
            Platform::Unknown
        };
        Self::new(platform)
    }

    /// Whether an artifact built for `self` can run on `host`.
    ///
    /// Wildcards on `libc`, `call_abi` and the compiler-ABI fields are
    /// permitted on either side.
    pub fn compatible_with(&self, host: &PlatformSpec) -> bool {
        self.platform.matches(&host.platform) && self.abi.matches(&host.abi)
    }

    /// The canonical triplet string. Wildcard fields are omitted.
    pub fn triplet(&self) -> String {
        let mut out = match &self.platform {
            Platform::Linux {
                arch,
                libc,
                call_abi,
            } => {
                let mut s = format!("{}-linux", arch.as_str());
                if let Some(libc) = libc {
                    s.push('-');
                    s.push_str(match libc {
                        Libc::Glibc => "gnu",
                        Libc::Musl => "musl",
                    });
                    if call_abi == &Some(CallAbi::Eabihf) {
                        s.push_str("eabihf");
                    }
                }
                s
            }
            Platform::MacOs { arch } => format!("{}-apple-darwin", arch.as_str()),
            Platform::Windows { arch } => format!("{}-w64-mingw32", arch.as_str()),
            Platform::FreeBsd { arch, call_abi } => {
                let mut s = format!("{}-unknown-freebsd", arch.as_str());
                if call_abi == &Some(CallAbi::Eabihf) {
                    s.push_str("-eabihf");
                }
                s
            }
            Platform::Unknown => "unknown".to_string(),
        };
        if let Some(v) = self.abi.libgfortran_version {
            out.push_str(&format!("-libgfortran{v}"));
        }
        if let Some(v) = self.abi.libstdcxx_version {
            out.push_str(&format!("-libstdcxx{v}"));
        }
        if let Some(abi) = self.abi.cxxstring_abi {
            out.push_str(match abi {
                CxxStringAbi::Cxx03 => "-cxx03",
                CxxStringAbi::Cxx11 => "-cxx11",
            });
        }
        out
    }

    /// Parses a triplet. Total: unrecognized input yields
    /// [`Platform::Unknown`] with a warning.
    pub fn parse_triplet(s: &str) -> Self {
        static TRIPLET_RE: OnceLock<Regex> = OnceLock::new();
        let re = TRIPLET_RE.get_or_init(|| {
            Regex::new(
                r"(?x)^
                (?P<arch>x86_64|i686|aarch64|armv6l|armv7l|powerpc64le|riscv64)
                -
                (?P<os>linux|apple-darwin|w64-mingw32|unknown-freebsd)
                (?:-(?P<libc>gnu|musl)(?P<callabi>eabihf)?)?
                (?:-libgfortran(?P<gfortran>\d+))?
                (?:-libstdcxx(?P<stdcxx>\d+))?
                (?:-(?P<cxxabi>cxx03|cxx11))?
                $",
            )
            .expect("triplet regex is valid")
        });

        let Some(caps) = re.captures(s) else {
            warn!("unrecognized platform triplet `{s}`");
            return Self::new(Platform::Unknown);
        };

        let arch: Arch = caps["arch"].parse().expect("regex restricts arch");
        let libc = caps.name("libc").map(|m| match m.as_str() {
            "musl" => Libc::Musl,
            _ => Libc::Glibc,
        });
        let call_abi = caps.name("callabi").map(|_| CallAbi::Eabihf);
        let platform = match &caps["os"] {
            "linux" => Platform::Linux {
                arch,
                libc,
                call_abi,
            },
            "apple-darwin" => Platform::MacOs { arch },
            "w64-mingw32" => Platform::Windows { arch },
            "unknown-freebsd" => Platform::FreeBsd {
                arch,
                call_abi: None,
            },
            _ => unreachable!("regex restricts os"),
        };

        let abi = CompilerAbi {
            libgfortran_version: caps.name("gfortran").and_then(|m| m.as_str().parse().ok()),
            libstdcxx_version: caps.name("stdcxx").and_then(|m| m.as_str().parse().ok()),
            cxxstring_abi: caps.name("cxxabi").map(|m| match m.as_str() {
                "cxx03" => CxxStringAbi::Cxx03,
                _ => CxxStringAbi::Cxx11,
            }),
        };

        Self { platform, abi }
    }
}

impl fmt::Display for PlatformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.triplet())
    }
}

/// Picks the host-compatible candidate.
///
/// When several candidates match, ties are broken by the total order of
/// canonical triplet strings: the lexicographically last one wins.
pub fn select_platform<T>(
    candidates: impl IntoIterator<Item = (PlatformSpec, T)>,
    host: &PlatformSpec,
) -> Option<T> {
    candidates
        .into_iter()
        .filter(|(spec, _)| spec.compatible_with(host))
        .max_by(|(a, _), (b, _)| a.triplet().cmp(&b.triplet()))
        .map(|(_, value)| value)
}

use std::fmt::Display;

/// Monotonically increasing table version. Versions are gap-free and start
/// at 0 with the table's CREATE entry.
#[derive(Debug, Default, PartialEq, PartialOrd, Ord, Eq, Hash, Clone, Copy)]
pub struct Version {
    inner: u64,
}

impl Version {
    pub fn new(version: u64) -> Self {
        Self { inner: version }
    }

    pub fn number(&self) -> u64 {
        self.inner
    }

    pub fn is_immediate_predecessor(&self, other: &Version) -> bool {
        self.inner.wrapping_add(1) == other.inner
    }

    pub fn successor(&self) -> Self {
        Self {
            inner: self.inner.wrapping_add(1),
        }
    }

    pub fn predecessor(&self) -> Option<Self> {
        self.inner.checked_sub(1).map(Version::new)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Version::new(value)
    }
}

impl From<Version> for u64 {
    fn from(value: Version) -> u64 {
        value.inner
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

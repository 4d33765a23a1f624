//! Interpreter versions and the container header.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the magic field (2-byte magic number plus `\r\n`)
pub const MAGIC_SIZE: usize = 4;
/// Size of the modification timestamp field
pub const TIME_SIZE: usize = 4;
/// Size of the source-size field written by Python 3.3 and later
pub const SOURCE_SIZE_SIZE: usize = 4;
/// Smallest header any supported interpreter writes
pub const BASE_HEADER_SIZE: usize = MAGIC_SIZE + TIME_SIZE;

/// Interpreter version as `(major, minor)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PythonVersion {
    pub major: u8,
    pub minor: u8,
}

impl PythonVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Resolve a magic number through the static table
    pub fn from_magic(magic: u16) -> Option<Self> {
        PYTHON_MAGIC
            .iter()
            .find(|(m, _, _)| *m == magic)
            .map(|&(_, major, minor)| Self::new(major, minor))
    }

}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// First magic whose header carries the source-size field (a 3.3 alpha)
pub const SOURCE_SIZE_MAGIC: u16 = 3210;

/// Header length for a file with this magic. Early 3.3 alphas predate the
/// source-size field, so the magic decides rather than the version.
pub fn header_size(magic: u16, version: PythonVersion) -> usize {
    if version.major == 3 && magic >= SOURCE_SIZE_MAGIC {
        BASE_HEADER_SIZE + SOURCE_SIZE_SIZE
    } else {
        BASE_HEADER_SIZE
    }
}

/// Magic number to version mapping, oldest first
const PYTHON_MAGIC: &[(u16, u8, u8)] = &[
    // Python 1
    (20121, 1, 5),
    (50428, 1, 6),
    // Python 2
    (50823, 2, 0),
    (60202, 2, 1),
    (60717, 2, 2),
    (62011, 2, 3),
    (62021, 2, 3),
    (62041, 2, 4),
    (62051, 2, 4),
    (62061, 2, 4),
    (62071, 2, 5),
    (62081, 2, 5),
    (62091, 2, 5),
    (62092, 2, 5),
    (62101, 2, 5),
    (62111, 2, 5),
    (62121, 2, 5),
    (62131, 2, 5),
    (62151, 2, 6),
    (62161, 2, 6),
    (62171, 2, 7),
    (62181, 2, 7),
    (62191, 2, 7),
    (62201, 2, 7),
    (62211, 2, 7),
    // Python 3.0
    (3000, 3, 0),
    (3010, 3, 0),
    (3020, 3, 0),
    (3030, 3, 0),
    (3040, 3, 0),
    (3050, 3, 0),
    (3060, 3, 0),
    (3061, 3, 0),
    (3071, 3, 0),
    (3081, 3, 0),
    (3091, 3, 0),
    (3101, 3, 0),
    (3103, 3, 0),
    (3111, 3, 0),
    (3131, 3, 0),
    // Python 3.1
    (3141, 3, 1),
    (3151, 3, 1),
    // Python 3.2
    (3160, 3, 2),
    (3170, 3, 2),
    (3180, 3, 2),
    // Python 3.3
    (3190, 3, 3),
    (3200, 3, 3),
    (3220, 3, 3),
    (3230, 3, 3),
    // Python 3.4
    (3250, 3, 4),
    (3260, 3, 4),
    (3270, 3, 4),
    (3280, 3, 4),
    (3290, 3, 4),
    (3300, 3, 4),
    (3310, 3, 4),
    // Python 3.5
    (3320, 3, 5),
    (3330, 3, 5),
    (3340, 3, 5),
    (3350, 3, 5),
    (3351, 3, 5),
    // Python 3.6
    (3360, 3, 6),
    (3361, 3, 6),
    (3370, 3, 6),
    (3371, 3, 6),
    (3372, 3, 6),
    (3373, 3, 6),
    (3375, 3, 6),
    (3376, 3, 6),
    (3377, 3, 6),
    (3378, 3, 6),
    (3379, 3, 6),
    // Python 3.7
    (3390, 3, 7),
    (3391, 3, 7),
    (3392, 3, 7),
    (3393, 3, 7),
    (3394, 3, 7),
];

/// The leading bytes of a compiled module, kept verbatim for the output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic: u16,
    pub version: PythonVersion,
    pub timestamp: u32,
    raw: Vec<u8>,
}

impl ContainerHeader {
    /// Parse the header at the start of `data`.
    ///
    /// The caller has already checked that `data` is longer than
    /// [`BASE_HEADER_SIZE`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BASE_HEADER_SIZE {
            return Err(Error::HeaderParse(format!(
                "need {} bytes, got {}",
                BASE_HEADER_SIZE,
                data.len()
            )));
        }

        if &data[2..MAGIC_SIZE] != b"\r\n" {
            return Err(Error::HeaderParse(
                "magic is not terminated by \\r\\n".to_string(),
            ));
        }

        let magic = u16::from_le_bytes([data[0], data[1]]);
        let version = PythonVersion::from_magic(magic)
            .ok_or_else(|| Error::UnsupportedVersion(format!("unknown magic number {}", magic)))?;

        let timestamp = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

        let size = header_size(magic, version);
        if data.len() < size {
            return Err(Error::HeaderParse(format!(
                "python {} header needs {} bytes, got {}",
                version,
                size,
                data.len()
            )));
        }

        tracing::debug!(magic, %version, timestamp, header_size = size, "parsed header");

        Ok(Self {
            magic,
            version,
            timestamp,
            raw: data[..size].to_vec(),
        })
    }

    /// Header bytes exactly as they appeared in the input
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0)
    }

    /// Human readable creation time, in the style of `asctime`
    pub fn creation_time(&self) -> String {
        match self.created_at() {
            Some(time) => time.format("%a %b %e %H:%M:%S %Y UTC").to_string(),
            None => format!("<invalid timestamp {}>", self.timestamp),
        }
    }
}

use crate::errors::InvalidSegmentFileName;
use crate::num;

/// Default soft cap for segment files: 64 MiB.
pub const DEFAULT_SEGMENT_SIZE: u32 = 64 * 1024 * 1024;

/// Configuration for a WAL.
///
/// Optional parameters are `Option<T>` in this struct; the default value is
/// evaluated when the getter method is called.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Base directory for the WAL. Must exist and be writable; an exclusive
    /// lock file is held in it for the lifetime of the WAL.
    pub dir: String,

    /// Soft size cap in bytes forwarded to new segments as their
    /// `size_limit`. The segment writer decides seal time based on it.
    pub segment_size: Option<u32>,
}

impl Config {
    /// Creates a new Config with the specified directory and default values
    /// for other fields.
    pub fn new(dir: impl ToString) -> Self {
        Self {
            dir: dir.to_string(),
            ..Default::default()
        }
    }

    /// Returns the soft segment size cap in bytes (defaults to 64 MiB).
    pub fn segment_size(&self) -> u32 {
        self.segment_size.unwrap_or(DEFAULT_SEGMENT_SIZE)
    }

    /// Returns the full path for a segment keyed by `(base_index, id)`.
    pub fn segment_path(&self, base_index: u64, id: u64) -> String {
        let file_name = Self::segment_file_name(base_index, id);
        format!("{}/{}", self.dir, file_name)
    }

    /// Generates the file name for a segment.
    ///
    /// The format is "seg-{padded_base_index}-{padded_id}.wal" so that a
    /// plain directory listing reconstructs segment identity without reading
    /// any file, and sorts in base-index order.
    pub fn segment_file_name(base_index: u64, id: u64) -> String {
        format!(
            "seg-{}-{}.wal",
            num::format_pad_u64(base_index),
            num::format_pad_u64(id)
        )
    }

    /// Parses a segment file name and returns `(base_index, id)`.
    pub fn parse_segment_file_name(
        file_name: &str,
    ) -> Result<(u64, u64), InvalidSegmentFileName> {
        let without_suffix =
            file_name.strip_suffix(".wal").ok_or_else(|| {
                InvalidSegmentFileName::new(file_name, "has no '.wal' suffix")
            })?;

        let without_prefix =
            without_suffix.strip_prefix("seg-").ok_or_else(|| {
                InvalidSegmentFileName::new(file_name, "has no 'seg-' prefix")
            })?;

        // Two fixed-width padded u64s joined by a single '-'.
        if without_prefix.len() != 26 * 2 + 1 {
            return Err(InvalidSegmentFileName::new(
                file_name,
                "base_index and id parts have wrong width",
            ));
        }
        let (base_part, rest) = without_prefix.split_at(26);
        let id_part = rest.strip_prefix('-').ok_or_else(|| {
            InvalidSegmentFileName::new(
                file_name,
                "missing '-' between base_index and id",
            )
        })?;

        let base_index = parse_padded_u64(file_name, base_part)?;
        let id = parse_padded_u64(file_name, id_part)?;
        Ok((base_index, id))
    }
}

fn parse_padded_u64(
    file_name: &str,
    part: &str,
) -> Result<u64, InvalidSegmentFileName> {
    let digits = part
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();

    if digits.len() != 20 {
        return Err(InvalidSegmentFileName::new(
            file_name,
            "does not have 20 digits per part",
        ));
    }

    digits.parse::<u64>().map_err(|e| {
        InvalidSegmentFileName::new(
            file_name,
            format!("cannot parse as u64: {}", e),
        )
    })
}

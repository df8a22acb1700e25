//! Input file discovery
//!
//! Walks a data-lake root lazily and yields one [`DiscoveredFile`] per
//! candidate, with partition metadata parsed from the path:
//!
//! - messages: `<root>/<YYYY-MM-DD>/<channel>.json`
//! - detections: `<root>/<prefix><stamp>.json` (flat)
//!
//! A candidate whose path does not fit its layout is yielded as
//! [`DiscoveryError::Malformed`]; iteration continues with the next entry.

use chrono::NaiveDate;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const JSON_EXTENSION: &str = "json";
const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Directory shape of a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLayout {
    /// Message lake: one directory per scrape date, one file per channel
    DatePartitioned,
    /// Detection lake: flat files sharing a name prefix
    FlatPrefixed { prefix: String },
}

/// Metadata taken from a file's path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partition {
    Messages {
        scraped_date: NaiveDate,
        channel: String,
    },
    Detections {
        file_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub partition: Partition,
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("malformed path {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("cannot read {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Lazily enumerate candidates under `root`, in file-name order.
pub fn discover(root: &Path, layout: &SourceLayout) -> Discovery {
    let walker = WalkDir::new(root).min_depth(1).follow_links(false).sort_by_file_name();
    let walker = match layout {
        SourceLayout::DatePartitioned => walker,
        SourceLayout::FlatPrefixed { .. } => walker.max_depth(1),
    };

    Discovery {
        root: root.to_path_buf(),
        layout: layout.clone(),
        walker: walker.into_iter(),
    }
}

/// Iterator returned by [`discover`]
pub struct Discovery {
    root: PathBuf,
    layout: SourceLayout,
    walker: walkdir::IntoIter,
}

impl Iterator for Discovery {
    type Item = Result<DiscoveredFile, DiscoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    return Some(Err(DiscoveryError::Walk { path, source: err }));
                },
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let parsed = match &self.layout {
                SourceLayout::DatePartitioned => {
                    if !has_json_extension(path) {
                        continue;
                    }
                    parse_message_path(&self.root, path)
                },
                SourceLayout::FlatPrefixed { prefix } => {
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if !name.starts_with(prefix.as_str()) || !has_json_extension(path) {
                        continue;
                    }
                    parse_detection_path(path, prefix)
                },
            };

            return Some(parsed.map(|partition| DiscoveredFile {
                path: path.to_path_buf(),
                partition,
            }));
        }
    }
}

fn has_json_extension(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(JSON_EXTENSION)
}

fn malformed(path: &Path, reason: impl Into<String>) -> DiscoveryError {
    DiscoveryError::Malformed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Parse `<root>/<YYYY-MM-DD>/<channel>.json`.
///
/// The date segment is validated strictly (zero-padded, real calendar date)
/// rather than trusted by position.
pub fn parse_message_path(root: &Path, path: &Path) -> Result<Partition, DiscoveryError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| malformed(path, "not under the messages root"))?;

    let segments: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_str()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| malformed(path, "path is not valid UTF-8"))?;

    let [date_dir, file_name] = segments.as_slice() else {
        return Err(malformed(
            path,
            format!(
                "expected <YYYY-MM-DD>/<channel>.json, found {} path segment(s)",
                segments.len()
            ),
        ));
    };

    let scraped_date = NaiveDate::parse_from_str(date_dir, PARTITION_DATE_FORMAT)
        .ok()
        .filter(|d| d.format(PARTITION_DATE_FORMAT).to_string() == *date_dir)
        .ok_or_else(|| {
            malformed(path, format!("partition directory '{}' is not a YYYY-MM-DD date", date_dir))
        })?;

    let channel = file_name
        .strip_suffix(".json")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| malformed(path, "empty channel name"))?;

    Ok(Partition::Messages {
        scraped_date,
        channel: channel.to_string(),
    })
}

/// Parse `<prefix><stamp>.json`; the file name itself is the dedup key.
pub fn parse_detection_path(path: &Path, prefix: &str) -> Result<Partition, DiscoveryError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| malformed(path, "file name is not valid UTF-8"))?;

    let stamp = file_name
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(".json"))
        .ok_or_else(|| malformed(path, format!("expected {}<stamp>.json", prefix)))?;

    if stamp.is_empty() {
        return Err(malformed(path, "detection file name has nothing after the prefix"));
    }

    Ok(Partition::Detections {
        file_name: file_name.to_string(),
    })
}

//! Directory trees and jars in, the same shape out.

use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use relocator_engine::archive::{process_entries, ArchiveEntry, AuditSink, EntryOutcome};
use relocator_engine::{Relocator, RewriteError};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Summary {
    pub(crate) seen: usize,
    pub(crate) changed: usize,
    pub(crate) failed: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "classes seen: {}, changed: {}, failed: {}",
            self.seen, self.changed, self.failed
        )
    }
}

pub(crate) fn rewrite_path(
    relocator: &Relocator,
    input: &Path,
    output: &Path,
    audit: Option<&dyn AuditSink>,
) -> Result<Summary> {
    if input.is_dir() {
        rewrite_directory(relocator, input, output, audit)
    } else {
        rewrite_jar(relocator, input, output, audit)
    }
}

/// Pairs every entry with its final bytes. Failed classes keep their
/// original bytes and are counted.
fn settle<'e>(
    entries: &'e [ArchiveEntry],
    results: Vec<Result<EntryOutcome, RewriteError>>,
) -> (Summary, Vec<(&'e ArchiveEntry, EntryOutcome)>) {
    let mut summary = Summary::default();
    let mut settled = Vec::with_capacity(entries.len());
    for (entry, result) in entries.iter().zip(results) {
        if entry.class_name().is_some() {
            summary.seen += 1;
        }
        let outcome = match result {
            Ok(outcome) => {
                if outcome.changed {
                    summary.changed += 1;
                }
                outcome
            }
            Err(err) => {
                summary.failed += 1;
                tracing::warn!(
                    target: "relocator.cli",
                    container = %entry.container,
                    entry = %entry.name,
                    error = %err,
                    "leaving class unchanged"
                );
                EntryOutcome {
                    bytes: entry.bytes.clone(),
                    changed: false,
                }
            }
        };
        settled.push((entry, outcome));
    }
    (summary, settled)
}

fn rewrite_directory(
    relocator: &Relocator,
    input: &Path,
    output: &Path,
    audit: Option<&dyn AuditSink>,
) -> Result<Summary> {
    let container = input.display().to_string();
    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(input)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to walk {container}"))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(input).unwrap_or(entry.path());
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = fs::read(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        entries.push(ArchiveEntry::new(container.clone(), name, bytes));
    }

    let results = process_entries(relocator, &entries, audit);
    let (summary, settled) = settle(&entries, results);
    let in_place = output == input;
    for (entry, outcome) in settled {
        if in_place && !outcome.changed {
            continue;
        }
        let target: PathBuf = output.join(&entry.name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&target, &outcome.bytes)
            .with_context(|| format!("failed to write {}", target.display()))?;
    }
    Ok(summary)
}

fn rewrite_jar(
    relocator: &Relocator,
    input: &Path,
    output: &Path,
    audit: Option<&dyn AuditSink>,
) -> Result<Summary> {
    let container = input.display().to_string();
    let file = File::open(input).with_context(|| format!("failed to open {container}"))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read archive {container}"))?;

    let mut directories = Vec::new();
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut zipped = archive.by_index(index)?;
        if zipped.is_dir() {
            directories.push((entries.len(), zipped.name().to_owned()));
            continue;
        }
        let mut bytes = Vec::with_capacity(zipped.size() as usize);
        zipped
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}!{}", container, zipped.name()))?;
        entries.push(ArchiveEntry::new(container.clone(), zipped.name(), bytes));
    }
    drop(archive);

    let results = process_entries(relocator, &entries, audit);
    let (summary, settled) = settle(&entries, results);

    // Written next to the destination, then moved over it.
    let staging = output.with_extension("jar.partial");
    let file = File::create(&staging)
        .with_context(|| format!("failed to create {}", staging.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut directories = directories.into_iter().peekable();
    for (position, (entry, outcome)) in settled.into_iter().enumerate() {
        while let Some((_, name)) = directories.next_if(|(at, _)| *at == position) {
            writer.add_directory(name, options)?;
        }
        writer.start_file(entry.name.as_str(), options)?;
        writer.write_all(&outcome.bytes)?;
    }
    for (_, name) in directories {
        writer.add_directory(name, options)?;
    }
    writer.finish()?;
    fs::rename(&staging, output)
        .with_context(|| format!("failed to move archive into {}", output.display()))?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reads_well() {
        let summary = Summary {
            seen: 3,
            changed: 1,
            failed: 0,
        };
        assert_eq!(summary.to_string(), "classes seen: 3, changed: 1, failed: 0");
    }
}

use std::collections::BTreeMap;
use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use crate::marker::strip_clash_marker;

/// Paths sharing one base path, bucketed by file size. Each bucket keeps traversal order.
pub type ClashGroup = BTreeMap<u64, Vec<PathBuf>>;

/// Every clash group found in a tree, keyed by the inferred base path.
pub type ClashGroups = BTreeMap<PathBuf, ClashGroup>;

const DEFAULT_SCAN_PROGRESS_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub show_progress: bool,
    pub follow_symlinks: bool,
    pub error_logs: bool,
}

/// Result of walking a tree for clash-marked files.
#[derive(Debug)]
pub struct ScanOutcome {
    pub groups: ClashGroups,
    pub scanned_files: usize,
    pub elapsed: Duration,
}

fn scan_progress_interval() -> Duration {
    env::var("CLASHFIX_SCAN_PROGRESS_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_SCAN_PROGRESS_MS))
}

fn is_broken_pipe(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::BrokenPipe {
        return true;
    }
    matches!(err.raw_os_error(), Some(32) | Some(109))
}

fn write_progress_line(message: &str) -> io::Result<()> {
    if let Ok(mode) = env::var("CLASHFIX_PROGRESS_FAIL") {
        match mode.as_str() {
            "broken_pipe" => {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "simulated broken pipe",
                ))
            }
            "io_error" => return Err(io::Error::other("simulated progress failure")),
            _ => {}
        }
    }
    let mut stdout = io::stdout();
    stdout.write_all(message.as_bytes())?;
    stdout.flush()
}

/// Swallows broken pipes on the progress line by turning progress off; anything else propagates.
fn handle_progress_result(result: io::Result<()>, progress_allowed: &mut bool) -> io::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if is_broken_pipe(&err) => {
            *progress_allowed = false;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Records one clash-marked file under its base path and size bucket.
fn record_candidate(groups: &mut ClashGroups, base_path: PathBuf, size: u64, path: PathBuf) {
    groups
        .entry(base_path)
        .or_default()
        .entry(size)
        .or_default()
        .push(path);
}

/// Walks `dir` and groups every clash-marked regular file by its base path and size.
///
/// Entries are visited sorted by file name, so the first path of a bucket is the same on
/// every run over an unchanged tree. Unreadable entries are reported and skipped; a failed
/// size lookup on a readable entry is returned as an error.
pub fn group_clashing_files(dir: &Path, opts: ScanOptions) -> io::Result<ScanOutcome> {
    let start = Instant::now();
    let mut groups = ClashGroups::new();
    let mut scanned_files = 0usize;
    let mut last_update = Instant::now();
    let scan_interval = scan_progress_interval();
    let mut progress_allowed = opts.show_progress;

    for entry in WalkDir::new(dir)
        .follow_links(opts.follow_symlinks)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                if opts.error_logs {
                    eprintln!("Error reading entry: {}", e);
                }
                continue;
            }
        };
        if entry.file_type().is_file() {
            scanned_files += 1;
            let base_name = entry.file_name().to_str().and_then(strip_clash_marker);
            if let Some(base_name) = base_name {
                let size = entry.metadata().map_err(io::Error::from)?.len();
                let path = entry.into_path();
                let base_path = path.with_file_name(base_name);
                record_candidate(&mut groups, base_path, size, path);
            }
        }
        if progress_allowed && last_update.elapsed() >= scan_interval {
            let message = format!("\rScanning filesystem - found {} files...", scanned_files);
            handle_progress_result(write_progress_line(&message), &mut progress_allowed)?;
            last_update = Instant::now();
        }
    }

    if opts.show_progress && progress_allowed {
        let message = format!(
            "\rFilesystem scan complete - found {} files.\n",
            scanned_files
        );
        handle_progress_result(write_progress_line(&message), &mut progress_allowed)?;
    }

    Ok(ScanOutcome {
        groups,
        scanned_files,
        elapsed: start.elapsed(),
    })
}

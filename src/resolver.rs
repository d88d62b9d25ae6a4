use ansi_term::Colour;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::grouper::{ClashGroup, ClashGroups};

/// What is found at a group's base path before resolving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseState {
    Missing,
    File(u64),
    NotAFile,
}

/// The decision taken for one clash group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Members differ in size; left for manual review.
    Ambiguous,
    /// Something other than a regular file occupies the base path.
    BaseNotAFile,
    /// The base file exists but its size differs from the group's.
    BaseSizeMismatch { base_size: u64, size: u64 },
    /// The base file exists with the group's size; every member is a redundant copy.
    RemoveDuplicates { size: u64, deletes: Vec<PathBuf> },
    /// No base file: the first member takes the base name, the rest are deleted.
    Restore {
        rename_from: PathBuf,
        deletes: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub dry_run: bool,
    pub info_logs: bool,
    pub warn_logs: bool,
    /// Send warnings to stderr, keeping `out` free for a machine-readable summary.
    pub warn_stderr: bool,
    pub color: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Ambiguous,
    SizeMismatch,
    BaseNotAFile,
}

/// A group left for manual review, with everything needed to resolve it by hand.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedGroup {
    pub base_path: PathBuf,
    pub reason: SkipReason,
    pub base_size: Option<u64>,
    pub buckets: ClashGroup,
}

impl SkippedGroup {
    pub fn describe(&self) -> String {
        let detail = match (self.reason, self.base_size) {
            (SkipReason::Ambiguous, _) => "members differ in size".to_string(),
            (SkipReason::SizeMismatch, Some(base_size)) => {
                format!("base file is {} bytes", base_size)
            }
            (SkipReason::SizeMismatch, None) => "base file size differs".to_string(),
            (SkipReason::BaseNotAFile, _) => "base path is not a regular file".to_string(),
        };
        let members = self
            .buckets
            .iter()
            .flat_map(|(size, paths)| {
                paths
                    .iter()
                    .map(move |path| format!("`{}` ({} bytes)", path.display(), size))
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Skipped for review: `{}` ({}): {}",
            self.base_path.display(),
            detail,
            members
        )
    }
}

/// Counters for one resolution pass, plus the groups left for review.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub groups: usize,
    pub renamed: usize,
    pub deleted: usize,
    pub skipped_ambiguous: usize,
    pub skipped_size_mismatch: usize,
    pub skipped_base_not_file: usize,
    pub skipped_groups: Vec<SkippedGroup>,
}

impl ResolveReport {
    pub fn skipped(&self) -> usize {
        self.skipped_ambiguous + self.skipped_size_mismatch + self.skipped_base_not_file
    }

    fn record_skip(
        &mut self,
        base_path: &Path,
        group: &ClashGroup,
        reason: SkipReason,
        base_size: Option<u64>,
    ) {
        match reason {
            SkipReason::Ambiguous => self.skipped_ambiguous += 1,
            SkipReason::SizeMismatch => self.skipped_size_mismatch += 1,
            SkipReason::BaseNotAFile => self.skipped_base_not_file += 1,
        }
        self.skipped_groups.push(SkippedGroup {
            base_path: base_path.to_path_buf(),
            reason,
            base_size,
            buckets: group.clone(),
        });
    }
}

/// Looks up what currently sits at `base_path`.
pub fn probe_base(base_path: &Path) -> io::Result<BaseState> {
    match fs::metadata(base_path) {
        Ok(metadata) if metadata.is_file() => Ok(BaseState::File(metadata.len())),
        Ok(_) => Ok(BaseState::NotAFile),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BaseState::Missing),
        Err(err) => Err(err),
    }
}

/// Decides how to resolve a group without touching the filesystem.
pub fn plan_group(base_path: &Path, group: &ClashGroup, base: BaseState) -> Resolution {
    let mut buckets = group.iter();
    let (size, paths) = match (buckets.next(), buckets.next()) {
        (Some((size, paths)), None) => (*size, paths),
        _ => return Resolution::Ambiguous,
    };
    // A marked name never strips to itself, but the base must never be deleted.
    let mut members: Vec<PathBuf> = paths
        .iter()
        .filter(|path| path.as_path() != base_path)
        .cloned()
        .collect();

    match base {
        BaseState::File(base_size) if base_size == size => Resolution::RemoveDuplicates {
            size,
            deletes: members,
        },
        BaseState::File(base_size) => Resolution::BaseSizeMismatch { base_size, size },
        BaseState::NotAFile => Resolution::BaseNotAFile,
        BaseState::Missing if members.is_empty() => Resolution::RemoveDuplicates {
            size,
            deletes: members,
        },
        BaseState::Missing => {
            let rename_from = members.remove(0);
            Resolution::Restore {
                rename_from,
                deletes: members,
            }
        }
    }
}

struct Reporter<'a, W: Write> {
    out: &'a mut W,
    opts: ResolveOptions,
}

impl<W: Write> Reporter<'_, W> {
    fn info(&mut self, line: impl AsRef<str>) -> io::Result<()> {
        if self.opts.info_logs {
            writeln!(self.out, "{}", line.as_ref())?;
        }
        Ok(())
    }

    fn heading(&mut self, line: impl AsRef<str>) -> io::Result<()> {
        if !self.opts.info_logs {
            return Ok(());
        }
        if self.opts.color {
            writeln!(self.out, "{}", Colour::Fixed(8).paint(line.as_ref()))
        } else {
            writeln!(self.out, "{}", line.as_ref())
        }
    }

    fn warn(&mut self, lines: &[String]) -> io::Result<()> {
        if !self.opts.warn_logs {
            return Ok(());
        }
        if self.opts.warn_stderr {
            let stderr = io::stderr();
            write_warning(&mut stderr.lock(), lines, false)
        } else {
            write_warning(&mut *self.out, lines, self.opts.color)
        }
    }

    fn delete_file(&mut self, path: &Path) -> io::Result<()> {
        if self.opts.dry_run {
            self.info(format!(
                "Would delete `{}`, but this is a dry run.",
                path.display()
            ))
        } else {
            self.info(format!("Deleting `{}`", path.display()))?;
            fs::remove_file(path)
        }
    }

    fn rename_file(&mut self, src: &Path, dst: &Path) -> io::Result<()> {
        if self.opts.dry_run {
            self.info(format!(
                "Would rename `{}` to `{}` and delete all other files in the group, but this is a dry run.",
                src.display(),
                dst.display()
            ))
        } else {
            self.info(format!(
                "Renaming `{}` to `{}` and deleting all other files in the group.",
                src.display(),
                dst.display()
            ))?;
            fs::rename(src, dst)
        }
    }
}

fn write_warning<W: Write>(out: &mut W, lines: &[String], color: bool) -> io::Result<()> {
    for (i, line) in lines.iter().enumerate() {
        if i == 0 && color {
            writeln!(out, "{}", Colour::Yellow.paint(format!("WARN: {}", line)))?;
        } else if i == 0 {
            writeln!(out, "WARN: {}", line)?;
        } else {
            writeln!(out, "{}", line)?;
        }
    }
    Ok(())
}

/// A warning headline followed by the base path and every size bucket with its paths.
fn group_warning(headline: String, base_path: &Path, group: &ClashGroup) -> Vec<String> {
    let mut lines = vec![
        headline,
        format!("    Base path: `{}`", base_path.display()),
    ];
    for (size, paths) in group {
        lines.push(format!("    {} bytes:", size));
        lines.extend(
            paths
                .iter()
                .map(|path| format!("        - `{}`", path.display())),
        );
    }
    lines
}

/// Resolves every clash group in base-path order, writing progress and warnings to `out`.
///
/// Ambiguous groups and base conflicts are only reported. Filesystem failures abort the
/// pass; mutations already made for earlier groups stay in place.
pub fn resolve_groups<W: Write>(
    groups: &ClashGroups,
    opts: ResolveOptions,
    out: &mut W,
) -> io::Result<ResolveReport> {
    let mut report = ResolveReport::default();
    let mut reporter = Reporter { out, opts };

    for (base_path, group) in groups {
        report.groups += 1;
        // The base path is only inspected for single-size groups.
        let base = if group.len() == 1 {
            for (size, paths) in group {
                reporter.heading(format!(
                    "File grouping located. Base path: `{}`; file size: {} bytes; files in group:",
                    base_path.display(),
                    size
                ))?;
                for path in paths {
                    reporter.info(format!("    - `{}`", path.display()))?;
                }
            }
            probe_base(base_path)?
        } else {
            BaseState::Missing
        };

        match plan_group(base_path, group, base) {
            Resolution::Ambiguous => {
                reporter.warn(&group_warning(
                    "The following group of files has differing file sizes:".to_string(),
                    base_path,
                    group,
                ))?;
                report.record_skip(base_path, group, SkipReason::Ambiguous, None);
            }
            Resolution::BaseNotAFile => {
                reporter.warn(&group_warning(
                    "The base path exists but is not a regular file; leaving the group untouched:"
                        .to_string(),
                    base_path,
                    group,
                ))?;
                report.record_skip(base_path, group, SkipReason::BaseNotAFile, None);
            }
            Resolution::BaseSizeMismatch { base_size, size } => {
                reporter.warn(&group_warning(
                    format!(
                        "A file with the base name already exists, but its size ({} bytes) doesn't match that of the rest of the group ({} bytes):",
                        base_size, size
                    ),
                    base_path,
                    group,
                ))?;
                report.record_skip(
                    base_path,
                    group,
                    SkipReason::SizeMismatch,
                    Some(base_size),
                );
            }
            Resolution::RemoveDuplicates { size, deletes } => {
                reporter.info(format!(
                    "A file with the base name already exists ({} bytes); deleting all other files in the group...",
                    size
                ))?;
                for path in &deletes {
                    reporter.delete_file(path)?;
                    report.deleted += 1;
                }
            }
            Resolution::Restore {
                rename_from,
                deletes,
            } => {
                reporter.rename_file(&rename_from, base_path)?;
                report.renamed += 1;
                for path in &deletes {
                    reporter.delete_file(path)?;
                    report.deleted += 1;
                }
            }
        }
        reporter.info("")?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_sized(path: &Path, size: usize) {
        fs::write(path, vec![b'x'; size]).expect("Failed to write file");
    }

    fn group_of(entries: Vec<(u64, Vec<PathBuf>)>) -> ClashGroup {
        entries.into_iter().collect()
    }

    fn live() -> ResolveOptions {
        ResolveOptions {
            dry_run: false,
            info_logs: true,
            warn_logs: true,
            warn_stderr: false,
            color: false,
        }
    }

    fn warnings_only() -> ResolveOptions {
        ResolveOptions {
            info_logs: false,
            ..live()
        }
    }

    fn dry_run() -> ResolveOptions {
        ResolveOptions {
            dry_run: true,
            ..live()
        }
    }

    fn run(groups: &ClashGroups, opts: ResolveOptions) -> (ResolveReport, String) {
        let mut out = Vec::new();
        let report = resolve_groups(groups, opts, &mut out).expect("resolution failed");
        (report, String::from_utf8(out).expect("log should be UTF-8"))
    }

    #[test]
    fn test_plan_ambiguous_group() {
        let base = PathBuf::from("/t/r.txt");
        let a = [PathBuf::from("/t/r (Name Clash 1).txt")];
        let b = [PathBuf::from("/t/r (Name Clash 2).txt")];
        let group = group_of(vec![(100, a.to_vec()), (150, b.to_vec())]);
        assert_eq!(
            plan_group(&base, &group, BaseState::Missing),
            Resolution::Ambiguous
        );
        assert_eq!(
            plan_group(&base, &group, BaseState::File(100)),
            Resolution::Ambiguous
        );
    }

    #[test]
    fn test_plan_restore_takes_first_member() {
        let base = PathBuf::from("/t/r.txt");
        let paths = [
            PathBuf::from("/t/r (Name Clash 1).txt"),
            PathBuf::from("/t/r (Name Clash 2).txt"),
        ];
        let group = group_of(vec![(9, paths.to_vec())]);
        assert_eq!(
            plan_group(&base, &group, BaseState::Missing),
            Resolution::Restore {
                rename_from: paths[0].clone(),
                deletes: vec![paths[1].clone()],
            }
        );
    }

    #[test]
    fn test_plan_never_deletes_base_path() {
        let base = PathBuf::from("/t/r.txt");
        let paths = [base.clone(), PathBuf::from("/t/r (Name Clash 1).txt")];
        let group = group_of(vec![(9, paths.to_vec())]);
        assert_eq!(
            plan_group(&base, &group, BaseState::File(9)),
            Resolution::RemoveDuplicates {
                size: 9,
                deletes: vec![paths[1].clone()],
            }
        );
    }

    #[test]
    fn test_plan_base_conflicts() {
        let base = PathBuf::from("/t/r.txt");
        let paths = [PathBuf::from("/t/r (Name Clash 1).txt")];
        let group = group_of(vec![(90, paths.to_vec())]);
        assert_eq!(
            plan_group(&base, &group, BaseState::File(100)),
            Resolution::BaseSizeMismatch {
                base_size: 100,
                size: 90
            }
        );
        assert_eq!(
            plan_group(&base, &group, BaseState::NotAFile),
            Resolution::BaseNotAFile
        );
    }

    #[test]
    fn test_existing_base_with_matching_size_deletes_duplicates() {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let dir = temp_dir.path();
        let base = dir.join("report.txt");
        let marked = dir.join("report (Name Clash 1).txt");
        write_sized(&base, 100);
        write_sized(&marked, 100);

        let mut groups = ClashGroups::new();
        groups.insert(base.clone(), group_of(vec![(100, vec![marked.clone()])]));

        let (report, log) = run(&groups, live());
        assert_eq!(report.deleted, 1);
        assert_eq!(report.renamed, 0);
        assert!(base.exists());
        assert!(!marked.exists());
        assert!(log.contains(&format!("Deleting `{}`", marked.display())));
    }

    #[test]
    fn test_missing_base_renames_first_and_deletes_rest() {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let dir = temp_dir.path();
        let base = dir.join("report.txt");
        let first = dir.join("report (Name Clash 1).txt");
        let second = dir.join("report (Name Clash 2).txt");
        fs::write(&first, b"first").expect("Failed to write first");
        fs::write(&second, b"other").expect("Failed to write second");

        let mut groups = ClashGroups::new();
        groups.insert(
            base.clone(),
            group_of(vec![(5, vec![first.clone(), second.clone()])]),
        );

        let (report, log) = run(&groups, live());
        assert_eq!(report.renamed, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(
            fs::read_to_string(&base).expect("base should exist"),
            "first"
        );
        assert!(!first.exists());
        assert!(!second.exists());
        assert!(log.contains("Renaming"));
    }

    #[test]
    fn test_size_mismatch_with_base_is_left_alone() {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let dir = temp_dir.path();
        let base = dir.join("report.txt");
        let marked = dir.join("report (Name Clash 1).txt");
        write_sized(&base, 100);
        write_sized(&marked, 90);

        let mut groups = ClashGroups::new();
        groups.insert(base.clone(), group_of(vec![(90, vec![marked.clone()])]));

        let (report, log) = run(&groups, live());
        assert_eq!(report.skipped_size_mismatch, 1);
        assert_eq!(report.deleted + report.renamed, 0);
        assert!(marked.exists());
        assert!(log.contains("WARN:"));
        assert!(log.contains("(100 bytes)"));
        assert!(log.contains("(90 bytes)"));
        assert_eq!(
            report.skipped_groups,
            vec![SkippedGroup {
                base_path: base.clone(),
                reason: SkipReason::SizeMismatch,
                base_size: Some(100),
                buckets: group_of(vec![(90, vec![marked.clone()])]),
            }]
        );
    }

    #[test]
    fn test_size_mismatch_warning_names_base_and_members_without_info_logs() {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let dir = temp_dir.path();
        let base = dir.join("report.txt");
        let marked = dir.join("report (Name Clash 1).txt");
        write_sized(&base, 100);
        write_sized(&marked, 90);

        let mut groups = ClashGroups::new();
        groups.insert(base.clone(), group_of(vec![(90, vec![marked.clone()])]));

        let (_, log) = run(&groups, warnings_only());
        assert!(!log.contains("File grouping located"));
        assert!(log.contains(&format!("Base path: `{}`", base.display())));
        assert!(log.contains("90 bytes:"));
        assert!(log.contains(&format!("- `{}`", marked.display())));
    }

    #[test]
    fn test_directory_at_base_path_is_left_alone() {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let dir = temp_dir.path();
        let base = dir.join("report.txt");
        let marked = dir.join("report (Name Clash 1).txt");
        fs::create_dir(&base).expect("Failed to create directory");
        write_sized(&marked, 4);

        let mut groups = ClashGroups::new();
        groups.insert(base.clone(), group_of(vec![(4, vec![marked.clone()])]));

        let (report, log) = run(&groups, warnings_only());
        assert_eq!(report.skipped_base_not_file, 1);
        assert_eq!(report.skipped_groups[0].reason, SkipReason::BaseNotAFile);
        assert!(marked.exists());
        assert!(base.is_dir());
        assert!(log.contains(&format!("Base path: `{}`", base.display())));
        assert!(log.contains(&format!("- `{}`", marked.display())));
    }

    #[test]
    fn test_ambiguous_group_warns_with_every_bucket() {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let dir = temp_dir.path();
        let base = dir.join("report.txt");
        let one = dir.join("report (Name Clash 1).txt");
        let two = dir.join("report (Name Clash 2).txt");
        write_sized(&one, 100);
        write_sized(&two, 150);

        let mut groups = ClashGroups::new();
        groups.insert(
            base.clone(),
            group_of(vec![(100, vec![one.clone()]), (150, vec![two.clone()])]),
        );

        let (report, log) = run(&groups, live());
        assert_eq!(report.skipped_ambiguous, 1);
        assert_eq!(report.skipped_groups.len(), 1);
        assert_eq!(report.skipped_groups[0].base_path, base);
        assert!(one.exists());
        assert!(two.exists());
        assert!(!base.exists());
        assert!(log.contains("differing file sizes"));
        assert!(log.contains("100 bytes:"));
        assert!(log.contains("150 bytes:"));
    }

    #[test]
    fn test_dry_run_matches_live_decisions_without_mutating() {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let dir = temp_dir.path();
        let kept = dir.join("kept.txt");
        let kept_dup = dir.join("kept (Name Clash 1).txt");
        let lone = dir.join("lone (Name Clash 1).txt");
        write_sized(&kept, 3);
        write_sized(&kept_dup, 3);
        write_sized(&lone, 8);

        let mut groups = ClashGroups::new();
        groups.insert(kept.clone(), group_of(vec![(3, vec![kept_dup.clone()])]));
        groups.insert(dir.join("lone.txt"), group_of(vec![(8, vec![lone.clone()])]));

        let (dry_report, log) = run(&groups, dry_run());
        assert!(kept_dup.exists());
        assert!(lone.exists());
        assert!(!dir.join("lone.txt").exists());
        assert!(log.contains(&format!(
            "Would delete `{}`, but this is a dry run.",
            kept_dup.display()
        )));
        assert!(log.contains("Would rename"));

        let (live_report, _) = run(&groups, live());
        assert_eq!(dry_report, live_report);
        assert!(!kept_dup.exists());
        assert!(dir.join("lone.txt").exists());
    }

    #[test]
    fn test_missing_member_aborts_with_error() {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let dir = temp_dir.path();
        let base = dir.join("gone.txt");
        write_sized(&base, 2);

        let mut groups = ClashGroups::new();
        groups.insert(
            base,
            group_of(vec![(2, vec![dir.join("gone (Name Clash 1).txt")])]),
        );

        let mut out = Vec::new();
        let err = resolve_groups(&groups, live(), &mut out).expect_err("delete should fail");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_warnings_go_to_stderr_when_requested() {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let dir = temp_dir.path();
        let one = dir.join("a (Name Clash 1).txt");
        let two = dir.join("a (Name Clash 2).txt");
        write_sized(&one, 5);
        write_sized(&two, 6);

        let mut groups = ClashGroups::new();
        groups.insert(
            dir.join("a.txt"),
            group_of(vec![(5, vec![one]), (6, vec![two])]),
        );

        let opts = ResolveOptions {
            info_logs: false,
            warn_stderr: true,
            ..live()
        };
        let (report, log) = run(&groups, opts);
        assert_eq!(report.skipped_ambiguous, 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_skipped_group_description_lists_members() {
        let skipped = SkippedGroup {
            base_path: PathBuf::from("/t/r.txt"),
            reason: SkipReason::SizeMismatch,
            base_size: Some(100),
            buckets: group_of(vec![(90, vec![PathBuf::from("/t/r (Name Clash 1).txt")])]),
        };
        assert_eq!(
            skipped.describe(),
            "Skipped for review: `/t/r.txt` (base file is 100 bytes): `/t/r (Name Clash 1).txt` (90 bytes)"
        );
    }

    #[test]
    fn test_quiet_options_write_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let dir = temp_dir.path();
        let lone = dir.join("lone (Name Clash 1).txt");
        write_sized(&lone, 1);

        let mut groups = ClashGroups::new();
        groups.insert(dir.join("lone.txt"), group_of(vec![(1, vec![lone])]));

        let opts = ResolveOptions {
            info_logs: false,
            warn_logs: false,
            ..dry_run()
        };
        let (report, log) = run(&groups, opts);
        assert_eq!(report.renamed, 1);
        assert!(log.is_empty());
    }
}

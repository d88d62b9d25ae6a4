mod grouper;
mod marker;
mod resolver;
mod summary;

use ansi_term::Colour;
use clap::{Parser, ValueEnum};
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use grouper::{group_clashing_files, ScanOptions};
use resolver::{resolve_groups, ResolveOptions, ResolveReport};
use summary::{format_duration, summary_line, write_summary_to_path, JsonSummary, SummaryFormat};

/// Resolves the "Name Clash" copies a file-sync client leaves behind when two devices
/// upload conflicting versions of the same file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to scan
    directory: PathBuf,

    /// Log every rename and delete that would happen without touching any file.
    #[arg(short = 'd', long)]
    dry_run: bool,

    /// Follow symbolic links when scanning directories.
    #[arg(long)]
    follow_symlinks: bool,

    /// Suppress group listings, action logs and progress; only show warnings and the summary.
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Logging verbosity for group listings, actions and warnings.
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Summary format to emit after processing.
    #[arg(long, value_enum, default_value = "text")]
    summary_format: SummaryFormat,

    /// Optional path to write the final summary output.
    #[arg(long)]
    summary_path: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
enum LogLevel {
    Info,
    Warn,
    Error,
    None,
}

#[derive(Debug)]
enum AppError {
    Io(io::Error),
    DirectoryMissing(PathBuf),
    NotADirectory(PathBuf),
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Io(err)
    }
}

fn check_root(directory: &Path) -> Result<(), AppError> {
    match fs::metadata(directory) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(AppError::NotADirectory(directory.to_path_buf())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(AppError::DirectoryMissing(directory.to_path_buf()))
        }
        Err(err) => Err(AppError::Io(err)),
    }
}

fn run_app<W: Write>(args: Args, out: &mut W, color: bool) -> Result<(), AppError> {
    let start = Instant::now();
    let summary_stdout = args.summary_format == SummaryFormat::Text;
    let info_logs = !args.quiet && matches!(args.log_level, LogLevel::Info);
    let warn_logs = matches!(args.log_level, LogLevel::Info | LogLevel::Warn);
    let error_logs = matches!(
        args.log_level,
        LogLevel::Info | LogLevel::Warn | LogLevel::Error
    );
    let mut summary_lines: Vec<String> = Vec::new();

    check_root(&args.directory)?;

    if summary_stdout {
        if args.dry_run && warn_logs {
            writeln!(out, "Running as a dry run; no files will be changed.")?;
        }
        if info_logs {
            writeln!(
                out,
                "Scanning for name clashes in directory: {}",
                args.directory.display()
            )?;
        }
    }

    let scan = group_clashing_files(
        &args.directory,
        ScanOptions {
            show_progress: info_logs && summary_stdout && color,
            follow_symlinks: args.follow_symlinks,
            error_logs,
        },
    )?;
    if info_logs && summary_stdout {
        writeln!(
            out,
            "Filesystem scan complete: {} files scanned, {} clash groups found in {}.",
            scan.scanned_files,
            scan.groups.len(),
            format_duration(scan.elapsed)
        )?;
    }

    let report = if scan.groups.is_empty() {
        let message = "No clashing files found!";
        if summary_stdout {
            writeln!(out, "{}", message)?;
        }
        summary_lines.push(message.to_string());
        ResolveReport::default()
    } else {
        // Text listings would corrupt the JSON document on stdout; warnings move to stderr.
        let opts = ResolveOptions {
            dry_run: args.dry_run,
            info_logs: info_logs && summary_stdout,
            warn_logs,
            warn_stderr: !summary_stdout,
            color,
        };
        let report = resolve_groups(&scan.groups, opts, out)?;

        let line = summary_line(&scan, &report, start.elapsed());
        if summary_stdout {
            if color {
                writeln!(
                    out,
                    "{} {}",
                    Colour::RGB(173, 216, 230).paint("Clash resolution summary:"),
                    Colour::RGB(255, 255, 224).paint(line.as_str())
                )?;
            } else {
                writeln!(out, "Clash resolution summary: {}", line)?;
            }
        }
        summary_lines.push(format!("Clash resolution summary: {}", line));
        for skipped in &report.skipped_groups {
            let described = skipped.describe();
            if summary_stdout {
                writeln!(out, "{}", described)?;
            }
            summary_lines.push(described);
        }

        if args.dry_run {
            let notice = "This was a dry run; no files have been changed!";
            if summary_stdout {
                writeln!(out, "{}", notice)?;
            }
            summary_lines.push(notice.to_string());
        }
        report
    };

    let contents = match args.summary_format {
        SummaryFormat::Json => {
            let json_summary = JsonSummary::new(
                &args.directory,
                args.dry_run,
                &scan,
                &report,
                start.elapsed(),
            );
            let json_output = serde_json::to_string_pretty(&json_summary)
                .map_err(|err| AppError::Io(io::Error::other(err.to_string())))?;
            writeln!(out, "{}", json_output)?;
            json_output
        }
        SummaryFormat::Text => summary_lines.join("\n"),
    };

    if let Some(path) = &args.summary_path {
        write_summary_to_path(path, &contents)?;
    }

    out.flush()?;
    Ok(())
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    let color = io::stdout().is_terminal();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match run_app(args, &mut out, color) {
        Ok(()) => Ok(()),
        Err(AppError::Io(err)) => Err(err),
        Err(AppError::DirectoryMissing(path)) => {
            eprintln!("Directory {} does not exist.", path.display());
            process::exit(1);
        }
        Err(AppError::NotADirectory(path)) => {
            eprintln!("Path must be a directory: {}", path.display());
            process::exit(1);
        }
    }
}

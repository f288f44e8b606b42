use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use chrono::{Datelike, Local, NaiveDate};
use tracing::{info, warn};

use crate::config::PostgresSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|arg| (*arg).to_string()).collect(),
            env: Vec::new(),
        }
    }

    /// Command line for display; environment values are never shown.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait CommandRunner {
    fn run(&mut self, command: &CommandSpec) -> Result<ProcessOutput>;
}

/// Runs commands as child processes and waits for them.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, command: &CommandSpec) -> Result<ProcessOutput> {
        let output = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(key, value)| (key, value)))
            .output()
            .with_context(|| format!("failed to execute {}", command.program))?;
        Ok(ProcessOutput {
            code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub bucket: String,
    pub aws_profile: Option<String>,
    pub skip_sync: bool,
    pub skip_rotate: bool,
    pub backup_dir: PathBuf,
    pub keep_dailies: usize,
    pub postgres: PostgresSettings,
    pub today: NaiveDate,
}

#[derive(Debug, Clone, Default)]
pub struct BackupReport {
    pub dump_path: PathBuf,
    pub archived_to: Option<String>,
    pub rotated: Vec<PathBuf>,
    pub synced_to: Option<String>,
    pub commands: Vec<String>,
}

/// Calendar date used to name today's dump.
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Dump the database, archive it twice a month, trim old dailies, and sync the rest.
pub fn run_backup<R: CommandRunner>(runner: &mut R, options: &BackupOptions) -> Result<BackupReport> {
    let bucket = options.bucket.trim().trim_start_matches("s3://").trim_end_matches('/');
    if bucket.is_empty() {
        bail!("bucket name must not be empty");
    }
    fs::create_dir_all(&options.backup_dir)
        .with_context(|| format!("failed to create {}", options.backup_dir.display()))?;

    let postgres = &options.postgres;
    let dump_path = options.backup_dir.join(format!(
        "{}__{}.sql",
        options.today.format("%Y%m%d"),
        postgres.name
    ));
    let dump_target = dump_path.to_string_lossy().to_string();
    let port = postgres.port.to_string();
    let mut dump = CommandSpec::new(
        "pg_dump",
        &[
            "-U",
            &postgres.user,
            "-h",
            &postgres.host,
            "-p",
            &port,
            "-f",
            &dump_target,
            &postgres.name,
        ],
    );
    if let Some(password) = &postgres.password {
        dump.env.push(("PGPASSWORD".to_string(), password.clone()));
    }

    let mut report = BackupReport {
        dump_path: dump_path.clone(),
        ..BackupReport::default()
    };
    run_checked(runner, &dump, &mut report)?;
    info!(path = %dump_path.display(), "database dumped");

    if matches!(options.today.day(), 1 | 15) {
        let destination = format!("s3://{bucket}/{}/", options.today.year());
        let copy = with_profile(
            CommandSpec::new("aws", &["s3", "cp", &dump_target, &destination]),
            options.aws_profile.as_deref(),
        );
        run_checked(runner, &copy, &mut report)?;
        report.archived_to = Some(destination);
    }

    if !options.skip_rotate {
        report.rotated = rotate_dailies(&options.backup_dir, options.keep_dailies, &dump_path)?;
    }

    if !options.skip_sync {
        let destination = format!("s3://{bucket}/daily/");
        let backup_dir = options.backup_dir.to_string_lossy().to_string();
        let sync = with_profile(
            CommandSpec::new("aws", &["s3", "sync", &backup_dir, &destination]),
            options.aws_profile.as_deref(),
        );
        run_checked(runner, &sync, &mut report)?;
        report.synced_to = Some(destination);
    }

    Ok(report)
}

/// Keep the newest `keep` `.sql` dumps (by file name) and delete the rest.
/// A `keep` of 0 disables rotation, and `current` is never removed.
pub fn rotate_dailies(backup_dir: &Path, keep: usize, current: &Path) -> Result<Vec<PathBuf>> {
    if keep == 0 {
        return Ok(Vec::new());
    }
    let mut dumps = Vec::new();
    for entry in fs::read_dir(backup_dir)
        .with_context(|| format!("failed to read {}", backup_dir.display()))?
    {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", backup_dir.display()))?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") && path != current {
            dumps.push(path);
        }
    }
    dumps.sort();

    // the current dump takes one of the kept slots
    let excess = (dumps.len() + 1).saturating_sub(keep);
    let removed: Vec<PathBuf> = dumps.into_iter().take(excess).collect();
    for path in &removed {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    if !removed.is_empty() {
        info!(removed = removed.len(), keep, "rotated daily backups");
    }
    Ok(removed)
}

fn with_profile(mut command: CommandSpec, profile: Option<&str>) -> CommandSpec {
    if let Some(profile) = profile.filter(|value| !value.trim().is_empty()) {
        command.args.push("--profile".to_string());
        command.args.push(profile.to_string());
    }
    command
}

fn run_checked<R: CommandRunner>(
    runner: &mut R,
    command: &CommandSpec,
    report: &mut BackupReport,
) -> Result<()> {
    let line = command.command_line();
    info!(command = %line, "running");
    report.commands.push(line.clone());
    let output = runner.run(command)?;
    if output.code != 0 {
        let detail = output
            .stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("no error output");
        warn!(command = %line, code = output.code, "command failed");
        bail!("`{}` exited with status {}: {detail}", command.program, output.code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[derive(Default)]
    struct FakeRunner {
        commands: Vec<CommandSpec>,
        fail_program: Option<&'static str>,
    }

    impl CommandRunner for FakeRunner {
        fn run(&mut self, command: &CommandSpec) -> Result<ProcessOutput> {
            self.commands.push(command.clone());
            if self.fail_program == Some(command.program.as_str()) {
                return Ok(ProcessOutput {
                    code: 2,
                    stdout: String::new(),
                    stderr: "connection refused\n".to_string(),
                });
            }
            if command.program == "pg_dump" {
                let target = command
                    .args
                    .iter()
                    .skip_while(|arg| *arg != "-f")
                    .nth(1)
                    .expect("dump target");
                fs::write(target, "-- dump").expect("write dump");
            }
            Ok(ProcessOutput {
                code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn options(dir: &Path, today: NaiveDate) -> BackupOptions {
        BackupOptions {
            bucket: "heritage-backups".to_string(),
            aws_profile: None,
            skip_sync: false,
            skip_rotate: false,
            backup_dir: dir.join(".db_backups").join("daily"),
            keep_dailies: 10,
            postgres: PostgresSettings {
                name: "arches".to_string(),
                user: "postgres".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                password: Some("secret".to_string()),
            },
            today,
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn ordinary_day_dumps_and_syncs() {
        let temp = tempdir().expect("tempdir");
        let mut runner = FakeRunner::default();
        let options = options(temp.path(), date(2024, 3, 7));

        let report = run_backup(&mut runner, &options).expect("backup");
        assert!(report.dump_path.ends_with("20240307__arches.sql"));
        assert!(report.dump_path.is_file());
        assert!(report.archived_to.is_none());
        assert_eq!(report.synced_to.as_deref(), Some("s3://heritage-backups/daily/"));

        let programs: Vec<&str> = runner
            .commands
            .iter()
            .map(|command| command.program.as_str())
            .collect();
        assert_eq!(programs, vec!["pg_dump", "aws"]);
        assert_eq!(
            runner.commands[0].env,
            vec![("PGPASSWORD".to_string(), "secret".to_string())]
        );
        assert!(!report.commands[0].contains("secret"));
    }

    #[test]
    fn mid_month_copies_to_yearly_folder_with_profile() {
        let temp = tempdir().expect("tempdir");
        let mut runner = FakeRunner::default();
        let mut options = options(temp.path(), date(2024, 3, 15));
        options.aws_profile = Some("archive".to_string());
        options.skip_sync = true;

        let report = run_backup(&mut runner, &options).expect("backup");
        assert_eq!(report.archived_to.as_deref(), Some("s3://heritage-backups/2024/"));
        assert!(report.synced_to.is_none());
        let copy = &runner.commands[1];
        assert_eq!(&copy.args[..2], ["s3", "cp"]);
        assert_eq!(&copy.args[copy.args.len() - 2..], ["--profile", "archive"]);
    }

    #[test]
    fn failed_dump_stops_the_backup() {
        let temp = tempdir().expect("tempdir");
        let mut runner = FakeRunner {
            fail_program: Some("pg_dump"),
            ..FakeRunner::default()
        };

        let err = run_backup(&mut runner, &options(temp.path(), date(2024, 3, 1)))
            .expect_err("must fail");
        assert!(err.to_string().contains("connection refused"), "{err}");
        assert_eq!(runner.commands.len(), 1);
    }

    #[test]
    fn rotation_keeps_newest_dumps() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path();
        for day in 1..=12 {
            fs::write(dir.join(format!("202402{day:02}__arches.sql")), "").expect("write");
        }
        fs::write(dir.join("notes.txt"), "").expect("write");
        fs::write(dir.join("20240213__arches.sql"), "").expect("write");

        let removed = rotate_dailies(dir, 10, &dir.join("20240213__arches.sql")).expect("rotate");
        let names: Vec<String> = removed
            .iter()
            .map(|path| path.file_name().expect("name").to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "20240201__arches.sql",
                "20240202__arches.sql",
                "20240203__arches.sql"
            ]
        );
        assert!(dir.join("notes.txt").exists());
        assert!(dir.join("20240212__arches.sql").exists());
        assert!(dir.join("20240213__arches.sql").exists());
    }

    #[test]
    fn zero_keep_disables_rotation() {
        let temp = tempdir().expect("tempdir");
        let mut runner = FakeRunner::default();
        let mut options = options(temp.path(), date(2024, 3, 7));
        options.keep_dailies = 0;
        fs::create_dir_all(&options.backup_dir).expect("mkdir");
        fs::write(options.backup_dir.join("20240305__arches.sql"), "").expect("write");
        fs::write(options.backup_dir.join("20240306__arches.sql"), "").expect("write");

        let report = run_backup(&mut runner, &options).expect("backup");
        assert!(report.rotated.is_empty());
        assert!(report.dump_path.is_file());
        assert!(options.backup_dir.join("20240305__arches.sql").exists());
        assert!(options.backup_dir.join("20240306__arches.sql").exists());
    }

    #[test]
    fn keep_one_retains_only_the_fresh_dump() {
        let temp = tempdir().expect("tempdir");
        let mut runner = FakeRunner::default();
        let mut options = options(temp.path(), date(2024, 3, 7));
        options.keep_dailies = 1;
        fs::create_dir_all(&options.backup_dir).expect("mkdir");
        // sorts after the fresh dump by name
        fs::write(options.backup_dir.join("20991231__arches.sql"), "").expect("write");

        let report = run_backup(&mut runner, &options).expect("backup");
        assert_eq!(report.rotated.len(), 1);
        assert!(report.dump_path.is_file());
        assert!(!options.backup_dir.join("20991231__arches.sql").exists());
    }
}

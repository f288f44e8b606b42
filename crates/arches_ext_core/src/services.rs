use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CeleryLogLevel {
    #[default]
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

impl CeleryLogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            "FATAL" => Some(Self::Fatal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for CeleryLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CeleryUnitOptions {
    pub app: String,
    pub celery_bin: PathBuf,
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: CeleryLogLevel,
    pub prefix: Option<String>,
    pub require_rabbitmq: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub file_name: String,
    pub content: String,
}

/// Worker and beat systemd units for a celery app.
pub fn render_celery_units(options: &CeleryUnitOptions) -> Result<Vec<ServiceUnit>> {
    let app = options.app.trim();
    if app.is_empty() {
        bail!("-a/--app is required for celery configuration");
    }

    let prefix = options
        .prefix
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let file_prefix = prefix.map(|value| format!("{value}_")).unwrap_or_default();
    let description_suffix = prefix.map(|value| format!(" ({value})")).unwrap_or_default();
    let requirement_block = if options.require_rabbitmq {
        "After=rabbitmq-server.service\nRequires=rabbitmq-server.service"
    } else {
        "After=network.target"
    };
    let celery = options.celery_bin.display();
    let working_dir = options.working_dir.display();
    let log_dir = options.log_dir.display();
    let level = options.log_level;

    let worker = format!(
        "[Unit]
Description=Celery Service{description_suffix}
{requirement_block}

[Service]
Type=simple
WorkingDirectory={working_dir}
ExecStart=/bin/sh -c '{celery} \\
    -A {app} worker -n worker1@%h \\
    -B \\
    -s celerybeat-schedule \\
    --pidfile={log_dir}/{file_prefix}celery.pid \\
    --logfile={log_dir}/{file_prefix}celery.log \\
    --loglevel={level}'
ExecStop=/bin/sh -c '{celery} worker stopwait \\
    --pidfile={log_dir}/{file_prefix}celery.pid \\
    --logfile={log_dir}/{file_prefix}celery.log \\
    --loglevel={level}'
Restart=always
RestartSec=1

[Install]
WantedBy=multi-user.target
"
    );

    let beat = format!(
        "[Unit]
Description=Celery Beat Service{description_suffix}
After=network.target

[Service]
Type=simple
WorkingDirectory={working_dir}
ExecStart=/bin/sh -c '{celery} \\
    -A {app} beat \\
    --pidfile={log_dir}/{file_prefix}celerybeat.pid \\
    --logfile={log_dir}/{file_prefix}celerybeat.log \\
    --loglevel={level}'
Restart=always
RestartSec=1

[Install]
WantedBy=multi-user.target
"
    );

    Ok(vec![
        ServiceUnit {
            file_name: format!("{file_prefix}celery.service"),
            content: worker,
        },
        ServiceUnit {
            file_name: format!("{file_prefix}celerybeat.service"),
            content: beat,
        },
    ])
}

/// Celery executable next to the Python interpreter, or plain `celery` from PATH.
pub fn celery_bin_for(python_interpreter: &Path) -> PathBuf {
    match python_interpreter.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join("celery"),
        _ => PathBuf::from("celery"),
    }
}

pub fn write_service_units(destination: &Path, units: &[ServiceUnit]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    units
        .iter()
        .map(|unit| {
            let path = destination.join(&unit.file_name);
            fs::write(&path, &unit.content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn options() -> CeleryUnitOptions {
        CeleryUnitOptions {
            app: "heritage".to_string(),
            celery_bin: PathBuf::from("/srv/env/bin/celery"),
            working_dir: PathBuf::from("/srv/heritage"),
            log_dir: PathBuf::from("/srv/heritage/.logs"),
            log_level: CeleryLogLevel::Info,
            prefix: None,
            require_rabbitmq: false,
        }
    }

    #[test]
    fn worker_unit_waits_for_network_without_rabbitmq() {
        let units = render_celery_units(&options()).expect("render");
        assert_eq!(units[0].file_name, "celery.service");
        assert_eq!(units[1].file_name, "celerybeat.service");
        assert!(units[0].content.contains("\nAfter=network.target\n"));
        assert!(!units[0].content.contains("rabbitmq"));
        assert!(units[0].content.contains("-A heritage worker -n worker1@%h"));
        assert!(units[0].content.contains("--loglevel=INFO'"));
    }

    #[test]
    fn prefix_and_rabbitmq_requirement() {
        let units = render_celery_units(&CeleryUnitOptions {
            prefix: Some("hist".to_string()),
            require_rabbitmq: true,
            ..options()
        })
        .expect("render");
        assert_eq!(units[0].file_name, "hist_celery.service");
        assert!(units[0].content.contains("Description=Celery Service (hist)"));
        assert!(units[0].content.contains("Requires=rabbitmq-server.service"));
        assert!(
            units[1]
                .content
                .contains("--pidfile=/srv/heritage/.logs/hist_celerybeat.pid")
        );
    }

    #[test]
    fn missing_app_is_rejected() {
        let err = render_celery_units(&CeleryUnitOptions {
            app: " ".to_string(),
            ..options()
        })
        .expect_err("must fail");
        assert!(err.to_string().contains("--app is required"));
    }

    #[test]
    fn units_are_written_to_destination() {
        let temp = tempdir().expect("tempdir");
        let units = render_celery_units(&options()).expect("render");
        let written = write_service_units(&temp.path().join(".services"), &units).expect("write");
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|path| path.is_file()));
    }

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!(CeleryLogLevel::parse("warning"), Some(CeleryLogLevel::Warning));
        assert_eq!(CeleryLogLevel::parse("verbose"), None);
        assert_eq!(CeleryLogLevel::default().as_str(), "DEBUG");
        assert_eq!(
            celery_bin_for(Path::new("/srv/env/bin/python3")),
            PathBuf::from("/srv/env/bin/celery")
        );
        assert_eq!(celery_bin_for(Path::new("python3")), PathBuf::from("celery"));
    }
}

//! Process-wide log setup, done once in `main` before any command runs.
//!
//! stdout always gets log output; a size-rotated file is added unless
//! disabled. A log file that cannot be opened downgrades to stdout only.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::cli::args::{LogArgs, LogFormat};

pub const LOG_FILE_NAME: &str = "packrat.log";
pub const DEFAULT_LOG_FILE: &str = "/var/log/packrat/packrat.log";
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
pub const LOG_BACKUPS: usize = 7;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Where the file log goes: explicit file, explicit dir, then the default.
/// Environment fallbacks are already folded into `args` by clap.
pub fn resolve_log_file(args: &LogArgs) -> Option<PathBuf> {
    if args.no_log_file {
        return None;
    }
    if let Some(file) = &args.log_file {
        return Some(file.clone());
    }
    if let Some(dir) = &args.log_dir {
        return Some(dir.join(LOG_FILE_NAME));
    }
    Some(PathBuf::from(DEFAULT_LOG_FILE))
}

pub fn init(args: &LogArgs) -> anyhow::Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(args.log_level.to_lowercase()),
    }
    .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(
        args.log_format,
        io::stdout,
        io::stdout().is_terminal(),
    )];

    let mut file_error = None;
    if let Some(path) = resolve_log_file(args) {
        match RotatingFile::open(&path, MAX_LOG_BYTES, LOG_BACKUPS) {
            Ok(file) => layers.push(fmt_layer(args.log_format, Mutex::new(file), false)),
            Err(e) => file_error = Some((path, e)),
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging already initialised: {e}"))?;

    if let Some((path, e)) = file_error {
        tracing::warn!("File logging disabled (could not open {}): {e}", path.display());
    }
    Ok(())
}

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    }
}

/// Append-mode log file that rolls over to `<name>.1 .. <name>.N` once it
/// reaches `max_bytes`.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64, backups: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            backups,
            file,
            written,
        })
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file.set_len(0)?;
        } else {
            for n in (1..self.backups).rev() {
                let from = self.backup_path(n);
                if from.exists() {
                    std::fs::rename(&from, self.backup_path(n + 1))?;
                }
            }
            std::fs::rename(&self.path, self.backup_path(1))?;
            self.file = open_append(&self.path)?;
        }
        self.written = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

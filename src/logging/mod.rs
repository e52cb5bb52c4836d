use std::fs::{create_dir_all, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use env_logger::{Builder, Env, Target};
use log::LevelFilter;

use crate::config::LogConfig;
use crate::core::error::{ErrorContext, SynthResult};

/// Line-buffered writer over the log file
pub struct FileWriter {
    inner: BufWriter<std::fs::File>,
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if buf.ends_with(b"\n") {
            self.inner.flush()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub struct Logger {
    config: LogConfig,
}

impl Logger {
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    fn level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.config.level).unwrap_or_else(|_| {
            eprintln!(
                "Unknown log level '{}', falling back to info",
                self.config.level
            );
            LevelFilter::Info
        })
    }

    fn create_file_writer(&self, path: &str) -> SynthResult<FileWriter> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                create_dir_all(parent).with_context("Failed to create log path")?;
            }
        }

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .with_context("Failed to open or create log file")?;
        Ok(FileWriter {
            inner: BufWriter::new(file),
        })
    }

    /// Installs the global logger. `RUST_LOG` directives are applied on top
    /// of the configured level.
    pub fn init_env_logger(&self) -> SynthResult<()> {
        let mut builder = Builder::new();
        builder.filter_level(self.level());
        builder.parse_env(Env::default());

        match &self.config.path {
            Some(path) => {
                let writer = self.create_file_writer(path)?;
                builder.target(Target::Pipe(Box::new(writer)));
            }
            None => {
                builder.target(Target::Stderr);
            }
        }

        builder
            .try_init()
            .with_context("Failed to initialize logger")
    }
}

pub fn init_logger(config: &LogConfig) -> SynthResult<()> {
    Logger::new(config.clone()).init_env_logger()
}

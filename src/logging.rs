//! Logging configuration
//!
//! Uses log4rs with appenders:
//! 1. ConsoleAppender - stdout output
//! 2. RollingFileAppender - log files with rotation (not on mobile)
//! 3. NodeLogAppender - keeps the latest node lifecycle records for the UI

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
#[cfg(not(any(target_os = "android", target_os = "ios")))]
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
#[cfg(not(any(target_os = "android", target_os = "ios")))]
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
#[cfg(not(any(target_os = "android", target_os = "ios")))]
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
#[cfg(not(any(target_os = "android", target_os = "ios")))]
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

/// Records kept for [`recent_node_logs`]
pub const NODE_LOG_CAPACITY: usize = 500;

const NODE_TARGET: &str = "lnd_supervisor::node";

static NODE_LOGS: NodeLogBuffer = NodeLogBuffer::new(NODE_LOG_CAPACITY);

// ============================================================================
// Node Log Appender
// ============================================================================

/// One captured log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLogLine {
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Bounded buffer of node log records, oldest dropped first
#[derive(Debug)]
pub struct NodeLogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<NodeLogLine>>,
}

impl NodeLogBuffer {
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, line: NodeLogLine) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<NodeLogLine> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

/// Latest info-and-above records from the node controller
pub fn recent_node_logs() -> Vec<NodeLogLine> {
    NODE_LOGS.snapshot()
}

/// Custom log4rs appender that captures node controller records
#[derive(Debug)]
pub struct NodeLogAppender {
    buffer: &'static NodeLogBuffer,
}

impl Default for NodeLogAppender {
    fn default() -> Self {
        Self { buffer: &NODE_LOGS }
    }
}

impl NodeLogAppender {
    pub fn with_buffer(buffer: &'static NodeLogBuffer) -> Self {
        Self { buffer }
    }
}

impl log4rs::append::Append for NodeLogAppender {
    fn append(&self, record: &log::Record) -> anyhow::Result<()> {
        let target = record.target();
        if !target.starts_with(NODE_TARGET) {
            return Ok(());
        }

        let level = match record.level() {
            log::Level::Error => "error",
            log::Level::Warn => "warn",
            log::Level::Info => "info",
            _ => return Ok(()), // Skip debug/trace
        };

        self.buffer.push(NodeLogLine {
            level: level.to_string(),
            target: target.to_string(),
            message: format!("{}", record.args()),
        });
        Ok(())
    }

    fn flush(&self) {}
}

// ============================================================================
// Logger Initialization
// ============================================================================

/// Build the log4rs configuration
///
/// # Log File Configuration (desktop only)
/// - File: `{log_dir}/lnd-supervisor.1.log`
/// - Max size: 20 MB per file
/// - Max count: 10 files (rotation)
/// - Pattern: `{timestamp} [{level}] {target} - {message}`
pub fn build_config(log_dir: PathBuf, level: LevelFilter) -> Result<Config, Box<dyn std::error::Error>> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S)} [{l}] {t} - {m}{n}",
        )))
        .build();

    // Mobile sandboxes get no log files
    #[cfg(any(target_os = "android", target_os = "ios"))]
    let config = {
        let _ = log_dir;
        Config::builder()
            .appender(Appender::builder().build("console", Box::new(console)))
            .appender(Appender::builder().build("node_logs", Box::new(NodeLogAppender::default())))
            .build(
                Root::builder()
                    .appender("console")
                    .appender("node_logs")
                    .build(level),
            )?
    };

    #[cfg(not(any(target_os = "android", target_os = "ios")))]
    let config = {
        std::fs::create_dir_all(&log_dir)?;

        let log_file = log_dir.join("lnd-supervisor.1.log");
        let log_pattern = log_dir.join("lnd-supervisor.{}.log");
        let log_pattern = log_pattern
            .to_str()
            .ok_or("log directory is not valid UTF-8")?;

        // Rolling file appender (20MB per file, 10 files max)
        let roller = FixedWindowRoller::builder().base(1).build(log_pattern, 10)?;
        let trigger = SizeTrigger::new(20 * 1024 * 1024); // 20 MB
        let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

        let logfile = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "{d(%Y-%m-%d %H:%M:%S)} [{l}] {t} - {m}{n}",
            )))
            .build(log_file, Box::new(policy))?;

        Config::builder()
            .appender(Appender::builder().build("console", Box::new(console)))
            .appender(Appender::builder().build("logfile", Box::new(logfile)))
            .appender(Appender::builder().build("node_logs", Box::new(NodeLogAppender::default())))
            .build(
                Root::builder()
                    .appender("console")
                    .appender("logfile")
                    .appender("node_logs")
                    .build(level),
            )?
    };

    Ok(config)
}

/// Initialize log4rs at info level
///
/// # Arguments
/// * `log_dir` - Directory for log files (ignored on mobile)
pub fn init_logger(log_dir: PathBuf) -> Result<log4rs::Handle, Box<dyn std::error::Error>> {
    let config = build_config(log_dir, LevelFilter::Info)?;
    Ok(log4rs::init_config(config)?)
}

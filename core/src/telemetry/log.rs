use log::Level;

/// One buffered log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
}

/// Per-worker log buffer. Records travel back with each ray result and are
/// emitted by the dispatcher, so lines from different workers never interleave.
#[derive(Debug, Default)]
pub struct LogManager {
    records: Vec<LogRecord>,
}

impl LogManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, level: Level, message: impl Into<String>) {
        if level > log::max_level() {
            return;
        }
        self.records.push(LogRecord {
            level,
            message: message.into(),
        });
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.record(Level::Debug, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(Level::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(Level::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(Level::Error, message);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Hands over everything buffered so far.
    pub fn take(&mut self) -> Vec<LogRecord> {
        std::mem::take(&mut self.records)
    }

    /// Emits records through the `log` facade in the order they were buffered.
    pub fn flush(records: Vec<LogRecord>) {
        for record in records {
            log::log!(target: "cov2mom", record.level, "{}", record.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_drains_in_order() {
        log::set_max_level(log::LevelFilter::Trace);
        let mut manager = LogManager::new();
        manager.warn("first");
        manager.debug("second");
        let records = manager.take();
        assert!(manager.is_empty());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "first");
        assert_eq!(records[1].level, Level::Debug);
    }
}

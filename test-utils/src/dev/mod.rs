// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities intended for the test suite.  These should not be used in
//! production code.

use camino::Utf8PathBuf;
use slog::o;
use slog::Drain;
use slog::Logger;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

static TEST_LOG_ID: AtomicU32 = AtomicU32::new(0);

/// A per-test logger backed by a JSON file
///
/// The file is left behind when a test fails so that it can be inspected.
/// Tests that pass should call [`LogContext::cleanup_successful()`] to remove
/// it.
pub struct LogContext {
    pub log: Logger,
    log_path: Utf8PathBuf,
}

impl LogContext {
    pub fn new(test_name: &str) -> LogContext {
        let directory = Utf8PathBuf::try_from(std::env::temp_dir())
            .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
        let id = TEST_LOG_ID.fetch_add(1, Ordering::SeqCst);
        let log_path = directory.join(format!(
            "{}.{}.{}.log",
            test_name,
            std::process::id(),
            id
        ));
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&log_path)
            .unwrap_or_else(|e| {
                panic!("failed to create log file {}: {}", log_path, e)
            });
        eprintln!("log file: {}", log_path);

        let drain = slog_json::Json::new(file).add_default_keys().build();
        let drain = Mutex::new(drain).fuse();
        let log = Logger::root(drain, o!("test_name" => test_name.to_string()));
        LogContext { log, log_path }
    }

    pub fn log_path(&self) -> &Utf8PathBuf {
        &self.log_path
    }

    /// Removes the log file; call this once the test has passed
    pub fn cleanup_successful(self) {
        let LogContext { log, log_path } = self;
        drop(log);
        if let Err(e) = std::fs::remove_file(&log_path) {
            eprintln!("failed to remove log file {}: {}", log_path, e);
        }
    }
}

/// Set up a [`LogContext`] appropriate for a test named `test_name`
pub fn test_setup_log(test_name: &str) -> LogContext {
    LogContext::new(test_name)
}

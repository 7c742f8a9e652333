use std::time::SystemTime;

use chrono::{DateTime, Local};

/// Timestamp format used in process logs and reports.
const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S%p";

pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format(TIMESTAMP_FORMAT).to_string()
}

pub fn clear_screen() {
    print!("\x1b[2J\x1b[1;1H");
}

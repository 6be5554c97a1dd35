//! Output helpers for CLI commands with BrokenPipe handling.
//!
//! When output is piped into something like `head`, stdout closes early.
//! The macros below treat that as a normal end of output.

/// Print with newline; returns `Ok(())` from the caller on BrokenPipe.
#[macro_export]
macro_rules! print_line {
    ($($arg:tt)*) => {{
        use std::io::Write;
        match writeln!(std::io::stdout(), $($arg)*) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }};
}

pub use print_line;

/// Whether an error chain bottoms out in a closed stdout
pub fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| e.kind() == std::io::ErrorKind::BrokenPipe)
    })
}

/// `2019-03-04 12:00` for a millisecond timestamp, `-` when unknown
pub fn format_modified(millis: Option<i64>) -> String {
    millis
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_size(size: u64) -> String {
    humansize::format_size(size, humansize::DECIMAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_modified() {
        assert_eq!(format_modified(None), "-");
        assert_eq!(format_modified(Some(0)), "1970-01-01 00:00");
        assert_eq!(format_modified(Some(1_551_700_800_000)), "2019-03-04 12:00");
    }

    #[test]
    fn test_broken_pipe_detection() {
        let err = anyhow::Error::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .context("writing output");
        assert!(is_broken_pipe(&err));
        assert!(!is_broken_pipe(&anyhow::anyhow!("other")));
    }
}

// crates/jobs/src/buffer.rs
//! Per-job output line buffer.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Unbounded FIFO of output lines, shared between exactly two roles: the
/// drain worker pushes, the status poller pops.
///
/// `try_pop` is a single atomic operation — there is no separate emptiness
/// check for callers to race against.
#[derive(Default)]
pub struct OutputBuffer {
    lines: Mutex<VecDeque<String>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line (producer side).
    pub fn push(&self, line: String) {
        match self.lines.lock() {
            Ok(mut q) => q.push_back(line),
            Err(e) => tracing::error!("output buffer mutex poisoned on push: {e}"),
        }
    }

    /// Pop the oldest line, or `None` if the buffer is currently empty.
    pub fn try_pop(&self) -> Option<String> {
        match self.lines.lock() {
            Ok(mut q) => q.pop_front(),
            Err(e) => {
                tracing::error!("output buffer mutex poisoned on pop: {e}");
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.lines.lock() {
            Ok(q) => q.is_empty(),
            Err(e) => {
                tracing::error!("output buffer mutex poisoned on empty check: {e}");
                true
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lines.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let buf = OutputBuffer::new();
        buf.push("first".into());
        buf.push("second".into());
        buf.push("third".into());

        assert_eq!(buf.try_pop(), Some("first".into()));
        assert_eq!(buf.try_pop(), Some("second".into()));
        assert_eq!(buf.try_pop(), Some("third".into()));
        assert_eq!(buf.try_pop(), None);
    }

    #[test]
    fn test_empty_check() {
        let buf = OutputBuffer::new();
        assert!(buf.is_empty());
        buf.push("line".into());
        assert!(!buf.is_empty());
        buf.try_pop();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_concurrent_push_pop_loses_nothing() {
        let buf = Arc::new(OutputBuffer::new());
        let producer = {
            let buf = Arc::clone(&buf);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    buf.push(format!("line-{i}"));
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 1000 {
            if let Some(line) = buf.try_pop() {
                seen.push(line);
            }
        }
        producer.join().unwrap();

        // Single producer, single consumer: order must be preserved.
        for (i, line) in seen.iter().enumerate() {
            assert_eq!(line, &format!("line-{i}"));
        }
        assert!(buf.is_empty());
    }
}

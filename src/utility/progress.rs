use std::{
    io::{self, Write},
    time::{Duration, Instant},
};
use bytesize::ByteSize;
use tokio_util::sync::CancellationToken;
use tracing::info;

const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Counts the bytes flowing into the wrapped writer and reports progress at
/// most every ten seconds. When a cancellation token is attached, the first
/// write after cancellation fails, aborting whatever copy is in flight.
pub struct ProgressCounter<W> {
    inner: W,
    shutdown: Option<CancellationToken>,
    op: &'static str,
    name: String,
    size: u64,
    written: u64,
    last_report: Instant,
}

impl<W: Write> ProgressCounter<W> {
    pub fn new(
        shutdown: Option<CancellationToken>,
        op: &'static str,
        name: &str,
        size: u64,
        inner: W,
    ) -> Self {
        ProgressCounter {
            inner,
            shutdown,
            op,
            name: name.to_string(),
            size,
            written: 0,
            last_report: Instant::now(),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn print_progress(&mut self) {
        let pct = if self.size > 0 {
            self.written * 100 / self.size
        } else {
            0
        };
        info!(
            "{}ing {}: {} / {} - {}% complete",
            self.op,
            self.name,
            ByteSize(self.written),
            ByteSize(self.size),
            pct,
        );
        self.last_report = Instant::now();
    }
}

impl<W: Write> Write for ProgressCounter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(token) = &self.shutdown {
            if token.is_cancelled() {
                // not Interrupted: write_all and io::copy retry that kind
                return Err(io::Error::new(io::ErrorKind::Other, "canceled"));
            }
        }

        let n = self.inner.write(buf)?;
        self.written += n as u64;

        if self.written == self.size || self.last_report.elapsed() > REPORT_INTERVAL {
            self.print_progress();
        }

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_written_bytes() {
        let mut counter = ProgressCounter::new(None, "Download", "test", 10, Vec::new());
        counter.write_all(&[0u8; 4]).unwrap();
        counter.write_all(&[0u8; 6]).unwrap();
        assert_eq!(counter.written, 10);
        assert_eq!(counter.into_inner().len(), 10);
    }

    #[test]
    fn cancellation_aborts_the_copy() {
        let token = CancellationToken::new();
        let mut counter = ProgressCounter::new(Some(token.clone()), "Extract", "test", 0, Vec::new());
        counter.write_all(&[0u8; 4]).unwrap();
        token.cancel();
        assert!(counter.write_all(&[0u8; 4]).is_err());
    }
}

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::warn;

/// What the sink consumer did with the matches it received.
#[derive(Debug)]
pub struct SinkReport<W> {
    pub writer: W,
    pub written: u64,
    pub write_errors: u64,
}

/// Starts the single consumer that appends matched domains, one per line,
/// to `writer` in arrival order. The stream ends when every sender is dropped.
pub fn spawn_sink<W>(writer: W, capacity: usize) -> (mpsc::Sender<String>, JoinHandle<SinkReport<W>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(drain(rx, writer));
    (tx, handle)
}

async fn drain<W>(mut rx: mpsc::Receiver<String>, mut writer: W) -> SinkReport<W>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    let mut write_errors = 0;

    while let Some(domain) = rx.recv().await {
        let mut line = domain;
        line.push('\n');
        match writer.write_all(line.as_bytes()).await {
            Ok(()) => written += 1,
            Err(e) => {
                write_errors += 1;
                warn!(domain = %line.trim_end(), error = %e, "error writing result");
            }
        }
    }

    if let Err(e) = writer.flush().await {
        write_errors += 1;
        warn!(error = %e, "error flushing results");
    }

    SinkReport {
        writer,
        written,
        write_errors,
    }
}

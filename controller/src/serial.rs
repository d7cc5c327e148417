use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::{Mutex, Notify};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::warn;

use alarmclock_common::SerialConfig;

type PortWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of the device link. Cloneable so the emit loop, the tick
/// loop, and the HTTP handlers can all push frames; `None` while the
/// port is down and a reconnect is pending.
#[derive(Clone)]
pub struct SerialLink {
    writer: Arc<Mutex<Option<PortWriter>>>,
    write_fault: Arc<Notify>,
}

impl SerialLink {
    fn new(writer: Option<PortWriter>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            write_fault: Arc::new(Notify::new()),
        }
    }

    /// Frames are fire-and-forget: the device resynchronizes from the
    /// next frame, so a failed write is logged and dropped rather than
    /// retried. A write failure also wakes the read loop so a reconnect
    /// starts even when the read side is idle.
    pub async fn send_frame(&self, frame: &str) {
        let mut writer = self.writer.lock().await;
        let Some(port) = writer.as_mut() else {
            warn!("serial port down, dropping frame");
            return;
        };
        if let Err(err) = port.write_all(frame.as_bytes()).await {
            warn!("serial write failed: {err}");
            *writer = None;
            self.write_fault.notify_one();
        }
    }

    /// Installs the write half of a freshly opened port.
    pub async fn replace(&self, writer: impl AsyncWrite + Send + Unpin + 'static) {
        *self.writer.lock().await = Some(Box::new(writer));
    }

    /// Completes once an outbound write has failed. The notification is
    /// stored, so a fault that happens before the loop is waiting is
    /// still observed.
    pub async fn write_failed(&self) {
        self.write_fault.notified().await;
    }
}

/// Opens the configured port and splits it. Failure here is fatal at
/// startup; reconnects after that go through `reopen`.
pub fn open(config: &SerialConfig) -> anyhow::Result<(SerialLink, ReadHalf<SerialStream>)> {
    let stream = tokio_serial::new(&config.port, config.baud)
        .open_native_async()
        .with_context(|| format!("failed to open serial port {}", config.port))?;
    let (reader, writer) = tokio::io::split(stream);

    let link = SerialLink::new(Some(Box::new(writer)));
    Ok((link, reader))
}

pub fn reopen(config: &SerialConfig) -> tokio_serial::Result<SerialStream> {
    tokio_serial::new(&config.port, config.baud).open_native_async()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context as TaskContext, Poll};
    use tokio::io::AsyncReadExt;

    struct BrokenPort;

    impl AsyncWrite for BrokenPort {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "port gone")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn frames_reach_the_port() {
        let (local, mut remote) = tokio::io::duplex(64);
        let link = SerialLink::new(None);
        link.replace(local).await;

        link.send_frame("20260105120000100\n").await;

        let mut buf = [0u8; 32];
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"20260105120000100\n");
    }

    #[tokio::test]
    async fn write_fault_drops_the_writer_and_signals_reconnect() {
        let link = SerialLink::new(None);
        link.replace(BrokenPort).await;

        link.send_frame("20260105120000000\n").await;
        // The fault fired before anyone was waiting; it must still be
        // observable here.
        link.write_failed().await;

        // The broken writer is gone; frames are dropped until a new
        // port is installed.
        link.send_frame("20260105120010000\n").await;

        let (local, mut remote) = tokio::io::duplex(64);
        link.replace(local).await;
        link.send_frame("20260105120020000\n").await;

        let mut buf = [0u8; 32];
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"20260105120020000\n");
    }
}

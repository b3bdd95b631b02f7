use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

use super::Transport;
use crate::{LabelPrinterError, REPORT_SIZE, Result};

/// Linux hidraw device node (`/dev/hidrawN`).
///
/// The printers use unnumbered reports, so every write is prefixed with
/// report id 0 and reads return the bare 64-byte report.
///
/// The node is opened non-blocking and driven through the reactor. Reads
/// and writes only touch the descriptor once it is ready, so a receive
/// dropped on timeout leaves nothing running that a later send must wait
/// behind.
#[derive(Debug)]
pub struct HidrawTransport {
    path: PathBuf,
    fd: Option<AsyncFd<File>>,
}

impl HidrawTransport {
    /// Open a hidraw node for read and write.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)?;
        let fd = AsyncFd::new(file)?;
        info!(path = %path.display(), "Opened hidraw device");
        Ok(Self { path, fd: Some(fd) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> Result<&AsyncFd<File>> {
        self.fd.as_ref().ok_or(LabelPrinterError::TransportClosed)
    }
}

impl Transport for HidrawTransport {
    async fn send_report(&mut self, report: &[u8; REPORT_SIZE]) -> Result<()> {
        let mut buf = [0u8; REPORT_SIZE + 1];
        buf[1..].copy_from_slice(report);
        let fd = self.fd()?;
        loop {
            let mut guard = fd.writable().await?;
            let Ok(written) = guard.try_io(|inner| (&mut inner.get_ref()).write(&buf)) else {
                continue;
            };
            // hidraw takes a report in one write or not at all
            if written? != buf.len() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "short write to hidraw device",
                )
                .into());
            }
            return Ok(());
        }
    }

    async fn recv_report(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; REPORT_SIZE];
        let fd = self.fd()?;
        loop {
            let mut guard = fd.readable().await?;
            let Ok(read) = guard.try_io(|inner| (&mut inner.get_ref()).read(&mut buf)) else {
                continue;
            };
            let n = read?;
            if n == 0 {
                return Err(LabelPrinterError::TransportClosed);
            }
            return Ok(buf[..n].to_vec());
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.fd.take().is_some() {
            debug!(path = %self.path.display(), "Closed hidraw device");
        }
        Ok(())
    }
}

//! TAP ports: one frame per read or write on a file descriptor.

use super::{receive, spawn_worker, Port, PortBuilder, PortConfig, PortDriver};
use crate::context::Context;
use crate::error::{FwdError, Result};
use crate::packet::Packet;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

const MAX_FRAME: usize = 65536;

struct TapDriver {
    path: PathBuf,
    file: Mutex<File>,
}

impl PortDriver for TapDriver {
    fn write(&self, _port: &Port, pkt: Packet) -> Result<()> {
        self.file.lock().write_all(&pkt.frame())?;
        Ok(())
    }

    fn start(&self, port: &Arc<Port>, ctx: &Arc<Context>) -> Result<()> {
        let mut reader = tokio::fs::File::from_std(self.file.lock().try_clone()?);
        let weak_port = Arc::downgrade(port);
        let weak_ctx = Arc::downgrade(ctx);
        let cancel = port.cancel_token().clone();
        let path = self.path.clone();
        spawn_worker(ctx, async move {
            let mut buf = vec![0u8; MAX_FRAME];
            loop {
                let n = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = reader.read(&mut buf) => match r {
                        Ok(0) => {
                            debug!(path = %path.display(), "tap reader reached end of file");
                            break;
                        }
                        Ok(n) => n,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "tap read failed");
                            break;
                        }
                    },
                };
                let (Some(ctx), Some(port)) = (weak_ctx.upgrade(), weak_port.upgrade()) else {
                    break;
                };
                receive(&ctx, &port, &buf[..n]);
            }
        })
    }

    fn describe(&self) -> String {
        format!("path {}", self.path.display())
    }
}

pub(super) struct TapBuilder;

impl PortBuilder for TapBuilder {
    fn build(&self, _ctx: &Arc<Context>, _id: &str, config: &PortConfig) -> Result<Box<dyn PortDriver>> {
        let PortConfig::Tap { path } = config else {
            return Err(FwdError::invalid_argument("tap builder given a non-tap config"));
        };
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Box::new(TapDriver {
            path: path.clone(),
            file: Mutex::new(file),
        }))
    }
}

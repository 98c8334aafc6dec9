//! Framed serial link over tokio-serial.
//!
//! Raw read chunks are handed to the device's parser as-is; framing is
//! the parser's job. On I/O failure the link reconnects with exponential
//! backoff up to the configured retry budget.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{BytesCodec, Decoder, Framed};
use tracing::{debug, warn};

use crate::config::{LinkConfig, Parity, StopBits};
use crate::{Error, Result};

pub struct SerialLink {
    framed: Framed<tokio_serial::SerialStream, BytesCodec>,
    config: LinkConfig,
    connected: bool,
}

impl SerialLink {
    /// Open the port with the configured settings and flush any stale
    /// bytes left over from previous runs or device boot chatter.
    pub async fn open(config: &LinkConfig) -> Result<Self> {
        let stream = open_stream(config)?;
        let mut framed = BytesCodec::new().framed(stream);
        drain_residual(&mut framed).await;
        debug!("serial link open on {}", config.port);
        Ok(SerialLink {
            framed,
            config: config.clone(),
            connected: true,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Send one pre-built frame.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let result = self.framed.send(Bytes::copy_from_slice(frame)).await;
        if let Err(e) = result {
            self.connected = false;
            return Err(e.into());
        }
        Ok(())
    }

    /// Receive the next raw chunk. `Ok(None)` means the port went away;
    /// callers normally follow up with [`Self::reconnect_with_backoff`].
    pub async fn recv(&mut self) -> Result<Option<BytesMut>> {
        match self.framed.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => {
                self.connected = false;
                Err(Error::from(e))
            }
            None => {
                self.connected = false;
                Ok(None)
            }
        }
    }

    /// Re-open the port, sleeping `base * 2^(retry-1)` before each
    /// attempt, up to `max_retries` attempts.
    pub async fn reconnect_with_backoff(&mut self) -> Result<()> {
        for retry in 1..=self.config.max_retries {
            let delay = std::time::Duration::from_millis(self.config.backoff_delay_ms(retry));
            warn!(
                "serial link {} reconnect attempt {retry}/{} in {delay:?}",
                self.config.port, self.config.max_retries
            );
            tokio::time::sleep(delay).await;
            match open_stream(&self.config) {
                Ok(stream) => {
                    let mut framed = BytesCodec::new().framed(stream);
                    drain_residual(&mut framed).await;
                    self.framed = framed;
                    self.connected = true;
                    debug!("serial link {} reconnected", self.config.port);
                    return Ok(());
                }
                Err(e) => {
                    warn!("serial link {} reopen failed: {e}", self.config.port);
                }
            }
        }
        Err(Error::RetriesExhausted {
            retries: self.config.max_retries,
        })
    }
}

fn open_stream(config: &LinkConfig) -> Result<tokio_serial::SerialStream> {
    let parity = match config.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    };
    let stop_bits = match config.stop_bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    };
    let data_bits = match config.data_bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    };
    let flow = if config.flow_control {
        tokio_serial::FlowControl::Hardware
    } else {
        tokio_serial::FlowControl::None
    };

    #[allow(unused_mut)]
    let mut stream = tokio_serial::new(&config.port, config.baud)
        .parity(parity)
        .stop_bits(stop_bits)
        .data_bits(data_bits)
        .flow_control(flow)
        .open_native_async()?;

    #[cfg(unix)]
    stream.set_exclusive(false)?;

    Ok(stream)
}

/// Discard whatever is sitting in the OS buffer so the parser starts on
/// a frame boundary instead of mid-stream garbage.
async fn drain_residual(framed: &mut Framed<tokio_serial::SerialStream, BytesCodec>) {
    let _ = tokio::time::timeout(std::time::Duration::from_millis(50), framed.next()).await;
}

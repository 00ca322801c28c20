// src/io/socketcan.rs
//
// SocketCAN adapter for Linux native CAN interfaces.
//
// Requires the interface to be configured first:
//   sudo ip link set can0 up type can bitrate 250000
//
// The reader runs a blocking read loop with a short read timeout on a
// `spawn_blocking` thread and pushes validated frames into the ingress queue.
// Remote and error frames are skipped; anything that is not an 8-byte extended
// data frame is rejected before the decoder.

use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::rvc::RvcFrame;

#[cfg(target_os = "linux")]
mod linux_impl {
    use async_trait::async_trait;
    use socketcan::{
        CanAnyFrame, CanDataFrame, CanFdSocket, EmbeddedFrame, ExtendedId, Frame, Id, Socket,
    };
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    use crate::error::TransportError;
    use crate::io::{now_us, FrameSink};
    use crate::rvc::{RvcFrame, CAN_EFF_MASK, PAYLOAD_LEN};

    fn device(interface: &str) -> String {
        format!("socketcan({})", interface)
    }

    /// Convert a received frame. `None` for frames that never reach the decoder.
    fn convert_any_frame(frame: CanAnyFrame) -> Option<RvcFrame> {
        match frame {
            CanAnyFrame::Normal(f) => {
                match RvcFrame::from_parts(f.raw_id() & CAN_EFF_MASK, f.is_extended(), f.data()) {
                    Ok(frame) => Some(frame.with_timestamp(now_us())),
                    Err(e) => {
                        tracing::debug!(id = %format!("{:X}", f.raw_id()), error = %e, "rejected frame");
                        None
                    }
                }
            }
            CanAnyFrame::Fd(f) => {
                tracing::debug!(id = %format!("{:X}", f.raw_id()), "ignoring CAN FD frame");
                None
            }
            CanAnyFrame::Remote(_) => None,
            CanAnyFrame::Error(_) => None,
        }
    }

    pub fn spawn_reader(
        interface: &str,
        poll_timeout: Duration,
        tx: mpsc::Sender<RvcFrame>,
        stop: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>, TransportError> {
        let device = device(interface);
        let socket = CanFdSocket::open(interface)
            .map_err(|e| TransportError::connection(&device, e.to_string()))?;
        socket
            .set_read_timeout(poll_timeout)
            .map_err(|e| TransportError::connection(&device, format!("set read timeout: {}", e)))?;

        tracing::info!(interface, "CAN reader started");

        Ok(tokio::task::spawn_blocking(move || {
            while !stop.load(Ordering::Relaxed) {
                match socket.read_frame() {
                    Ok(frame) => {
                        if let Some(frame) = convert_any_frame(frame) {
                            if tx.blocking_send(frame).is_err() {
                                break;
                            }
                        }
                    }
                    Err(ref e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        // Timeout - check the stop flag
                    }
                    Err(e) => {
                        tracing::error!(device = %device, error = %e, "read error");
                        break;
                    }
                }
            }
            tracing::info!(device = %device, "CAN reader stopped");
        }))
    }

    /// Write side. Opens its own socket so reads never wait on writes.
    pub struct SocketCanWriter {
        socket: CanFdSocket,
        device: String,
    }

    impl SocketCanWriter {
        pub fn open(interface: &str) -> Result<Self, TransportError> {
            let device = device(interface);
            let socket = CanFdSocket::open(interface)
                .map_err(|e| TransportError::connection(&device, e.to_string()))?;
            Ok(Self { socket, device })
        }
    }

    #[async_trait]
    impl FrameSink for SocketCanWriter {
        async fn send(
            &mut self,
            arbitration_id: u32,
            data: &[u8; PAYLOAD_LEN],
        ) -> Result<(), TransportError> {
            let id = ExtendedId::new(arbitration_id & CAN_EFF_MASK).ok_or_else(|| {
                TransportError::CanSend(format!("Invalid extended ID: 0x{:08X}", arbitration_id))
            })?;
            let frame = CanDataFrame::new(Id::Extended(id), data)
                .ok_or_else(|| TransportError::CanSend("Failed to create extended frame".to_string()))?;
            self.socket
                .write_frame(&frame)
                .map_err(|e| TransportError::CanSend(format!("{}: {}", self.device, e)))
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux_impl::SocketCanWriter;

/// Start the blocking reader for `interface`.
pub fn spawn_reader(
    interface: &str,
    poll_timeout: Duration,
    tx: mpsc::Sender<RvcFrame>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, TransportError> {
    #[cfg(target_os = "linux")]
    {
        linux_impl::spawn_reader(interface, poll_timeout, tx, stop)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (poll_timeout, tx, stop);
        Err(TransportError::connection(
            &format!("socketcan({})", interface),
            "SocketCAN is only available on Linux",
        ))
    }
}

/// Open the writer for `interface`.
pub fn open_writer(interface: &str) -> Result<Box<dyn crate::io::FrameSink>, TransportError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux_impl::SocketCanWriter::open(interface)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(TransportError::connection(
            &format!("socketcan({})", interface),
            "SocketCAN is only available on Linux",
        ))
    }
}

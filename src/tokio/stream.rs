use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};
use tracing::{instrument, trace};
use zerocopy::{FromZeros, IntoBytes};

#[cfg(feature = "tls")]
use tokio_native_tls::TlsStream;

use crate::buffer::BufferSet;
use crate::constant::MAX_PAYLOAD_LEN;
use crate::error::{Error, Result};
use crate::protocol::packet::{PacketHeader, SequenceId, write_framed};

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "tls")]
    Tls(BufReader<TlsStream<TcpStream>>),
    Unix(BufReader<UnixStream>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(BufReader::new(stream))
    }

    #[cfg(feature = "tls")]
    pub async fn upgrade_to_tls(self, host: &str) -> std::io::Result<Self> {
        let tcp = match self {
            Self::Tcp(buf_reader) => buf_reader.into_inner(),
            Self::Tls(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "Already using TLS",
                ));
            }
            Self::Unix(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "TLS not supported for Unix sockets",
                ));
            }
        };

        let connector = native_tls::TlsConnector::new().map_err(std::io::Error::other)?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let tls_stream = connector
            .connect(host, tcp)
            .await
            .map_err(std::io::Error::other)?;

        Ok(Self::Tls(BufReader::new(tls_stream)))
    }

    pub fn is_tls(&self) -> bool {
        #[cfg(feature = "tls")]
        if let Self::Tls(_) = self {
            return true;
        }
        false
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Self::Tcp(reader) => reader.read_exact(buf).await.map(|_| ()),
            #[cfg(feature = "tls")]
            Self::Tls(reader) => reader.read_exact(buf).await.map(|_| ()),
            Self::Unix(reader) => reader.read_exact(buf).await.map(|_| ()),
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Tcp(reader) => reader.get_mut().write_all(buf).await,
            #[cfg(feature = "tls")]
            Self::Tls(reader) => reader.get_mut().write_all(buf).await,
            Self::Unix(reader) => reader.get_mut().write_all(buf).await,
        }
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Tcp(reader) => reader.get_mut().flush().await,
            #[cfg(feature = "tls")]
            Self::Tls(reader) => reader.get_mut().flush().await,
            Self::Unix(reader) => reader.get_mut().flush().await,
        }
    }
}

/// The peer closing the socket is reported as a closed connection.
fn closed_on_eof(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        Error::IoError(err)
    }
}

/// Read one logical payload into `buffer`, concatenating packets if they span
/// multiple 16MB chunks.
#[instrument(skip_all)]
pub async fn read_payload(
    stream: &mut Stream,
    sequence_id: &mut SequenceId,
    buffer: &mut Vec<u8>,
) -> Result<()> {
    let mut header = PacketHeader::new_zeroed();
    buffer.clear();

    loop {
        stream
            .read_exact(header.as_mut_bytes())
            .await
            .map_err(closed_on_eof)?;
        sequence_id.check_incoming(header.sequence_id)?;

        let length = header.length();
        let start = buffer.len();
        buffer.resize(start + length, 0);
        stream
            .read_exact(&mut buffer[start..])
            .await
            .map_err(closed_on_eof)?;
        trace!(length, sequence_id = header.sequence_id, "read packet");

        if length < MAX_PAYLOAD_LEN {
            return Ok(());
        }
    }
}

/// Frame and send the payload in the write buffer.
#[instrument(skip_all)]
pub async fn write_payload(
    stream: &mut Stream,
    buffer_set: &mut BufferSet,
    sequence_id: &mut SequenceId,
) -> Result<()> {
    let (payload, frame) = buffer_set.write_and_frame_buffers();
    write_framed(frame, payload, sequence_id);
    trace!(length = payload.len(), "write payload");
    stream.write_all(frame).await?;
    stream.flush().await?;
    Ok(())
}

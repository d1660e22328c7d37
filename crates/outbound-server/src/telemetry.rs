//! Log subscriber setup: human readable lines on stdout and JSON datagrams to
//! the remote syslog sink.

use std::io::{self, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use tracing::Span;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Args;
use crate::errors::StartupError;

/// Syslog PRI of every datagram: facility local6 (22) at severity info (6),
/// encoded as `facility * 8 + severity`. Datagrams are framed as
/// `<PRI>TAG: MSG` with the service name as tag.
const PRIORITY: u8 = 22 * 8 + 6;

fn header(tag: &str) -> String {
    format!("<{}>{}: ", PRIORITY, tag)
}

/// Sends every write as one syslog datagram.
#[derive(Clone)]
pub struct SyslogWriter {
    socket: Arc<UdpSocket>,
    header: Arc<str>,
}

impl SyslogWriter {
    pub fn connect(address: &str, tag: &str) -> io::Result<Self> {
        let target = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address did not resolve"))?;
        let local = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let socket = UdpSocket::bind(local)?;
        socket.connect(target)?;

        Ok(Self {
            socket: Arc::new(socket),
            header: header(tag).into(),
        })
    }
}

impl Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = buf.strip_suffix(b"\n").unwrap_or(buf);
        let mut datagram = Vec::with_capacity(self.header.len() + line.len());
        datagram.extend_from_slice(self.header.as_bytes());
        datagram.extend_from_slice(line);
        self.socket.send(&datagram)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn init(args: &Args) -> Result<(), StartupError> {
    let syslog = SyslogWriter::connect(&args.syslog_address, &args.service_name).map_err(|source| {
        StartupError::LogSink {
            address: args.syslog_address.clone(),
            source,
        }
    })?;

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(move || syslog.clone()),
        )
        .try_init()
        .map_err(|e| StartupError::Subscriber(e.to_string()))
}

/// Root span carrying the identity fields attached to every log line.
pub fn service_span(args: &Args) -> Span {
    tracing::info_span!(
        "service",
        ip = %args.http_addr,
        service_name = %args.service_name,
        version = %args.version(),
        data_type = %args.data_type,
    )
}

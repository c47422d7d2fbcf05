// Copyright 2020 Joyent, Inc.

//! A [`Channel`]: ../carom/channel/trait.Channel.html implementation over
//! a plain `TcpStream`, for services whose request/response protocol fits
//! one of two trivial transports: length-prefix framing (a 4-byte
//! big-endian length before each payload) or newline-delimited lines.
//! Which one is used follows the host's `framed` tunable, and the host's
//! socket timeout bounds connects, reads, and writes.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use carom::channel::Channel;
use carom::error::{Classify, ErrorKind};
use carom::host::Host;

// Connect deadline applied when the host carries no socket timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
// Cap on a single reply frame; anything larger is a protocol violation.
const MAX_FRAME_LEN: usize = 1024 * 1024;

const CLUSTER_NAME_REQUEST: &[u8] = b"describe_cluster_name";

#[derive(Debug, Error)]
pub enum TcpChannelError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not resolve '{0}'")]
    Unresolvable(String),

    #[error("channel is not open")]
    NotOpen,

    #[error("malformed frame: {0}")]
    BadFrame(String),
}

impl Classify for TcpChannelError {
    fn kind(&self) -> ErrorKind {
        match self {
            TcpChannelError::Io(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                ErrorKind::Timeout
            }
            _ => ErrorKind::Transport,
        }
    }
}

#[derive(Debug)]
pub struct TcpChannel {
    host: Host,
    stream: Option<TcpStream>,
}

impl TcpChannel {
    pub fn new(host: &Host) -> Self {
        TcpChannel {
            host: host.clone(),
            stream: None,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, TcpChannelError> {
        self.stream.as_mut().ok_or(TcpChannelError::NotOpen)
    }

    fn resolve(&self) -> Result<SocketAddr, TcpChannelError> {
        (self.host.address(), self.host.port())
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                TcpChannelError::Unresolvable(String::from(
                    self.host.name(),
                ))
            })
    }

    fn exchange_framed(
        &mut self,
        request: &[u8],
    ) -> Result<Vec<u8>, TcpChannelError> {
        let stream = self.stream_mut()?;
        let len = request.len() as u32;
        stream.write_all(&len.to_be_bytes())?;
        stream.write_all(request)?;
        stream.flush()?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf)?;
        let reply_len = u32::from_be_bytes(len_buf) as usize;
        if reply_len > MAX_FRAME_LEN {
            return Err(TcpChannelError::BadFrame(format!(
                "reply of {} bytes exceeds the frame cap",
                reply_len
            )));
        }
        let mut reply = vec![0u8; reply_len];
        stream.read_exact(&mut reply)?;
        Ok(reply)
    }

    fn exchange_line(
        &mut self,
        request: &[u8],
    ) -> Result<Vec<u8>, TcpChannelError> {
        let stream = self.stream_mut()?;
        stream.write_all(request)?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        let mut reply = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte)?;
            if byte[0] == b'\n' {
                return Ok(reply);
            }
            reply.push(byte[0]);
            if reply.len() > MAX_FRAME_LEN {
                return Err(TcpChannelError::BadFrame(String::from(
                    "unterminated reply line",
                )));
            }
        }
    }

    fn exchange(
        &mut self,
        request: &[u8],
    ) -> Result<Vec<u8>, TcpChannelError> {
        if self.host.framed() {
            self.exchange_framed(request)
        } else {
            self.exchange_line(request)
        }
    }
}

impl Channel for TcpChannel {
    type Error = TcpChannelError;

    fn open(&mut self) -> Result<(), TcpChannelError> {
        let addr = self.resolve()?;
        let timeout = self
            .host
            .socket_timeout()
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(self.host.socket_timeout())?;
        stream.set_write_timeout(self.host.socket_timeout())?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn cluster_name(&mut self) -> Result<String, TcpChannelError> {
        let reply = self.exchange(CLUSTER_NAME_REQUEST)?;
        String::from_utf8(reply).map_err(|e| {
            TcpChannelError::BadFrame(format!(
                "cluster name is not utf-8: {}",
                e
            ))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn io_timeouts_classify_as_timeout() {
        let timed_out: TcpChannelError = std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "read timed out",
        )
        .into();
        assert_eq!(timed_out.kind(), ErrorKind::Timeout);

        let refused: TcpChannelError = std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )
        .into();
        assert_eq!(refused.kind(), ErrorKind::Transport);

        assert_eq!(
            TcpChannelError::NotOpen.kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn rpc_on_unopened_channel_fails_cleanly() {
        let host = Host::new("127.0.0.1", 1);
        let mut channel = TcpChannel::new(&host);
        match channel.cluster_name() {
            Err(TcpChannelError::NotOpen) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

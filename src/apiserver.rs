// apiserver.rs

use std::{fmt, io, net::SocketAddr, time::Duration};

use askama::Template;
use log::*;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpSocket, TcpStream},
    time::{sleep, timeout},
};

const RECV_BUF_SIZE: usize = 1024;
const LISTEN_BACKLOG: u32 = 2;
const REBOOT_FLUSH_DELAY: Duration = Duration::from_millis(300);

pub const RESPONSE_HEADER: &str =
    "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n";

pub const REBOOT_HTML: &str = "<html><head><meta charset='utf-8'><title>Rebooting</title></head>\
<body><h1>Rebooting...</h1></body></html>";

#[derive(Clone, Debug, Template)]
#[template(path = "status.html.ask", escape = "html")]
pub struct StatusPage {
    pub local_time: String,
    pub utc_time: String,
    pub utc_date: String,
    pub uptime: String,
    pub chip_temp: String,
    pub chip: String,
}

impl Default for StatusPage {
    fn default() -> Self {
        StatusPage {
            local_time: "--".into(),
            utc_time: "--:--:--".into(),
            utc_date: "--".into(),
            uptime: "--".into(),
            chip_temp: "--".into(),
            chip: "--".into(),
        }
    }
}

/// Hard reset of the device. Never returns on real hardware.
pub trait Restart {
    fn restart(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Reboot,
    Status,
}

/// Method and path from the request line, if there is one.
pub fn parse_request_line(req: &[u8]) -> Option<(&str, &str)> {
    let line = req.split(|b| *b == b'\n').next()?;
    let line = std::str::from_utf8(line).ok()?;
    let mut parts = line.split_whitespace();
    Some((parts.next()?, parts.next()?))
}

pub fn route(req: &[u8]) -> Route {
    match parse_request_line(req) {
        Some(("GET", path)) if path.split('?').next() == Some("/reboot") => Route::Reboot,
        _ => Route::Status,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Served {
    /// Nobody connected within the accept timeout.
    Idle,
    Status,
    Reboot,
    /// Listener already released by a reboot.
    Closed,
}

#[derive(Debug)]
pub enum ServerError {
    Io(io::Error),
    RecvTimeout(SocketAddr),
    Render(askama::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Io(e) => write!(f, "socket error: {e}"),
            ServerError::RecvTimeout(a) => write!(f, "recv timeout from {a}"),
            ServerError::Render(e) => write!(f, "status page template error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<io::Error> for ServerError {
    fn from(value: io::Error) -> Self {
        ServerError::Io(value)
    }
}

impl From<askama::Error> for ServerError {
    fn from(value: askama::Error) -> Self {
        ServerError::Render(value)
    }
}

/// One listening socket, polled once per loop iteration.
pub struct StatusServer {
    listener: Option<TcpListener>,
    accept_timeout: Duration,
    recv_timeout: Duration,
}

impl StatusServer {
    pub fn bind(addr: SocketAddr, accept_timeout: Duration, recv_timeout: Duration) -> Result<Self, ServerError> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        info!("Status server listening on {}", listener.local_addr()?);
        Ok(StatusServer {
            listener: Some(listener),
            accept_timeout,
            recv_timeout,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref()?.local_addr().ok()
    }

    /// Accept at most one client and answer it.
    pub async fn serve_once<R: Restart>(&mut self, page: &StatusPage, restart: &mut R) -> Result<Served, ServerError> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(Served::Closed);
        };

        let (mut stream, addr) = match timeout(self.accept_timeout, listener.accept()).await {
            Err(_) => return Ok(Served::Idle),
            Ok(res) => res?,
        };
        info!("Client from {addr}");

        let mut buf = [0u8; RECV_BUF_SIZE];
        let n = match timeout(self.recv_timeout, stream.read(&mut buf)).await {
            Err(_) => return Err(ServerError::RecvTimeout(addr)),
            Ok(res) => res?,
        };

        match route(&buf[..n]) {
            Route::Reboot => {
                warn!("Reboot requested by {addr}");
                if let Err(e) = respond(&mut stream, REBOOT_HTML).await {
                    error!("Cannot send reboot page: {e}");
                }
                drop(stream);
                self.listener = None;
                sleep(REBOOT_FLUSH_DELAY).await;
                restart.restart();
                Ok(Served::Reboot)
            }
            Route::Status => {
                let html = page.render()?;
                respond(&mut stream, &html).await?;
                Ok(Served::Status)
            }
        }
    }
}

async fn respond(stream: &mut TcpStream, body: &str) -> io::Result<()> {
    stream.write_all(RESPONSE_HEADER.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}


// EOF

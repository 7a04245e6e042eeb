//! One-shot management-interface query.
//!
//! Client-mode daemons do not write status files, so their live attributes
//! are read over the management port: `state` gives the connection time
//! and virtual address, `status` gives the byte counters.

use crate::openvpn::types::*;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const BANNER: &str = "OpenVPN Management Interface";

/// Live attributes of a client-mode VPN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_received: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_sent: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub management_interface_err: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub management_interface_warn: Option<String>,
}

impl ClientAttributes {
    pub fn unavailable() -> Self {
        Self {
            management_interface_warn: Some(MANAGEMENT_UNAVAILABLE.to_string()),
            ..Default::default()
        }
    }

    pub fn failed(err: impl Into<String>) -> Self {
        Self {
            management_interface_err: Some(err.into()),
            ..Default::default()
        }
    }
}

/// Raw replies of one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagementReply {
    /// First line of the `state` reply, split on commas.
    pub state: Vec<String>,
    /// `key,value` lines of the `status` reply.
    pub status: BTreeMap<String, String>,
}

impl ManagementReply {
    pub fn to_attributes(&self) -> ClientAttributes {
        let epoch = self
            .state
            .first()
            .and_then(|t| t.trim().parse::<i64>().ok())
            .unwrap_or(0);
        ClientAttributes {
            virtual_address: self.state.get(3).filter(|a| !a.is_empty()).cloned(),
            bytes_received: self
                .status
                .get("TCP/UDP read bytes")
                .and_then(|v| v.parse().ok()),
            bytes_sent: self
                .status
                .get("TCP/UDP write bytes")
                .and_then(|v| v.parse().ok()),
            connected_since: if epoch > 0 {
                Utc.timestamp_opt(epoch, 0).single()
            } else {
                None
            },
            ..Default::default()
        }
    }
}

/// Query the daemon and fold any failure into `management_interface_err`.
pub async fn query(address: &str, port: &str, timeout: Duration) -> ClientAttributes {
    match query_raw(address, port, timeout).await {
        Ok(reply) => reply.to_attributes(),
        Err(e) => {
            log::info!("management interface {}:{} unavailable: {}", address, port, e);
            ClientAttributes::failed(e.to_string())
        }
    }
}

/// Run `state`, `status`, `exit` against the management interface.
pub async fn query_raw(
    address: &str,
    port: &str,
    timeout: Duration,
) -> Result<ManagementReply, OpenVpnError> {
    let port: u16 = port.trim().parse().map_err(|_| {
        OpenVpnError::new(
            OpenVpnErrorKind::InvalidRequest,
            format!("Invalid management port '{}'", port),
        )
    })?;

    tokio::time::timeout(timeout, exchange(address, port))
        .await
        .map_err(|_| {
            OpenVpnError::new(
                OpenVpnErrorKind::Timeout,
                format!(
                    "Management interface at {}:{} did not answer within {:?}",
                    address, port, timeout
                ),
            )
        })?
}

async fn exchange(address: &str, port: u16) -> Result<ManagementReply, OpenVpnError> {
    let stream = TcpStream::connect((address, port)).await.map_err(|e| {
        OpenVpnError::new(
            OpenVpnErrorKind::ManagementConnectFailed,
            format!("Cannot connect to management interface at {}:{}", address, port),
        )
        .with_detail(e.to_string())
    })?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = Lines::new(BufReader::new(reader));

    let banner = lines.next().await?;
    if !banner.contains(BANNER) {
        return Err(OpenVpnError::new(
            OpenVpnErrorKind::ManagementProtocol,
            "Unexpected management banner",
        )
        .with_detail(banner));
    }

    let mut reply = ManagementReply::default();

    send(&mut writer, "state").await?;
    let state = lines.next().await?;
    reply.state = state.split(',').map(str::to_string).collect();
    if state != "END" {
        while lines.next().await? != "END" {}
    }

    send(&mut writer, "status").await?;
    loop {
        let line = lines.next().await?;
        if line == "END" {
            break;
        }
        let kv: Vec<&str> = line.split(',').collect();
        if let [k, v] = kv.as_slice() {
            reply.status.insert(k.to_string(), v.to_string());
        }
    }

    send(&mut writer, "exit").await?;
    Ok(reply)
}

async fn send(writer: &mut tokio::net::tcp::OwnedWriteHalf, cmd: &str) -> Result<(), OpenVpnError> {
    writer
        .write_all(format!("{}\n", cmd).as_bytes())
        .await
        .map_err(|e| {
            OpenVpnError::new(
                OpenVpnErrorKind::ManagementProtocol,
                format!("Failed to send command: {}", cmd),
            )
            .with_detail(e.to_string())
        })
}

/// Trimmed reply lines, skipping real-time `>` notifications.
struct Lines<R> {
    reader: R,
    buf: String,
}

impl<R: AsyncBufRead + Unpin> Lines<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
        }
    }

    async fn next(&mut self) -> Result<String, OpenVpnError> {
        loop {
            self.buf.clear();
            let n = self.reader.read_line(&mut self.buf).await.map_err(|e| {
                OpenVpnError::new(OpenVpnErrorKind::ManagementProtocol, "Read failed")
                    .with_detail(e.to_string())
            })?;
            if n == 0 {
                return Err(OpenVpnError::new(
                    OpenVpnErrorKind::ManagementProtocol,
                    "Management interface closed the connection",
                ));
            }
            let line = self.buf.trim();
            // The banner itself starts with `>INFO:`.
            if line.starts_with('>') && !line.contains(BANNER) {
                continue;
            }
            return Ok(line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve one connection: send the banner, then answer each expected
    /// command with its canned reply.
    async fn scripted_daemon(script: Vec<(&'static str, &'static str)>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (r, mut w) = stream.into_split();
            let mut r = BufReader::new(r);
            w.write_all(b">INFO:OpenVPN Management Interface Version 3 -- type 'help' for more info\r\n")
                .await
                .unwrap();
            for (expect, reply) in script {
                let mut line = String::new();
                r.read_line(&mut line).await.unwrap();
                assert_eq!(line.trim(), expect);
                w.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn reads_state_and_status() {
        let port = scripted_daemon(vec![
            (
                "state",
                "1434601383,CONNECTED,SUCCESS,10.8.0.6,203.0.113.1,1194,,\r\nEND\r\n",
            ),
            (
                "status",
                ">BYTECOUNT:1,2\r\nOpenVPN STATISTICS\r\nUpdated,Thu Jun 18 08:12:15 2015\r\nTCP/UDP read bytes,21543\r\nTCP/UDP write bytes,18733\r\nEND\r\n",
            ),
            ("exit", ""),
        ])
        .await;

        let attrs = query("127.0.0.1", &port.to_string(), Duration::from_secs(3)).await;
        assert_eq!(attrs.management_interface_err, None);
        assert_eq!(attrs.virtual_address.as_deref(), Some("10.8.0.6"));
        assert_eq!(attrs.bytes_received, Some(21543));
        assert_eq!(attrs.bytes_sent, Some(18733));
        assert_eq!(attrs.connected_since, Utc.timestamp_opt(1434601383, 0).single());
    }

    #[tokio::test]
    async fn refused_connection_is_soft() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let started = std::time::Instant::now();
        let attrs = query("127.0.0.1", &port.to_string(), Duration::from_secs(3)).await;
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(attrs
            .management_interface_err
            .unwrap()
            .contains("ManagementConnectFailed"));
        assert_eq!(attrs.virtual_address, None);
    }

    #[tokio::test]
    async fn silent_daemon_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let started = std::time::Instant::now();
        let attrs = query("127.0.0.1", &port.to_string(), Duration::from_millis(300)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(attrs.management_interface_err.unwrap().contains("Timeout"));
    }

    #[tokio::test]
    async fn wrong_banner_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
        });
        let err = query_raw("127.0.0.1", &port.to_string(), Duration::from_secs(3))
            .await
            .unwrap_err();
        assert_eq!(err.kind, OpenVpnErrorKind::ManagementProtocol);
    }

    #[tokio::test]
    async fn bad_port_is_invalid_request() {
        let err = query_raw("127.0.0.1", "http", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, OpenVpnErrorKind::InvalidRequest);
    }

    #[test]
    fn unavailable_carries_warning() {
        let a = ClientAttributes::unavailable();
        assert_eq!(a.management_interface_warn.as_deref(), Some(MANAGEMENT_UNAVAILABLE));
    }
}

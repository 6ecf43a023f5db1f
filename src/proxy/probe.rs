//! Protocol probes
//!
//! A probe makes one real attempt to use a candidate as a proxy of one
//! protocol. HTTP and HTTPS probes do a full request through the candidate;
//! SOCKS probes stop once the proxy has accepted a CONNECT to the target.

use crate::error::ProbeError;
use crate::proxy::models::{Candidate, ProbeOutcome, ProxyType};
use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default URL fetched through HTTP proxies
const DEFAULT_HTTP_TEST_URL: &str = "http://httpbin.org/ip";

/// Default URL fetched through HTTPS (CONNECT) proxies
const DEFAULT_HTTPS_TEST_URL: &str = "https://httpbin.org/ip";

/// Default destination requested from SOCKS proxies
const DEFAULT_SOCKS_TARGET_HOST: &str = "httpbin.org";
const DEFAULT_SOCKS_TARGET_PORT: u16 = 80;

const SOCKS4_GRANTED: u8 = 0x5a;
const SOCKS5_NO_AUTH: u8 = 0x00;
const SOCKS5_SUCCEEDED: u8 = 0x00;

/// Something that can test one candidate for one protocol.
///
/// Implementations never fail: every problem is reported as a failed
/// [`ProbeOutcome`]. Probes must not depend on each other.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, candidate: &Candidate, proxy_type: ProxyType, timeout: Duration)
        -> ProbeOutcome;
}

/// Endpoints the probes try to reach through a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeTargets {
    pub http_url: String,
    pub https_url: String,
    pub socks_host: String,
    pub socks_port: u16,
}

impl Default for ProbeTargets {
    fn default() -> Self {
        Self {
            http_url: DEFAULT_HTTP_TEST_URL.to_string(),
            https_url: DEFAULT_HTTPS_TEST_URL.to_string(),
            socks_host: DEFAULT_SOCKS_TARGET_HOST.to_string(),
            socks_port: DEFAULT_SOCKS_TARGET_PORT,
        }
    }
}

/// [`Prober`] talking to candidates over the network
#[derive(Debug, Clone, Default)]
pub struct NetworkProber {
    targets: ProbeTargets,
}

impl NetworkProber {
    pub fn new(targets: ProbeTargets) -> Self {
        Self { targets }
    }

    pub fn targets(&self) -> &ProbeTargets {
        &self.targets
    }

    async fn attempt(
        &self,
        candidate: &Candidate,
        proxy_type: ProxyType,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        match proxy_type {
            // Both go through the candidate whatever the target scheme;
            // https targets are tunnelled with CONNECT.
            ProxyType::Http => {
                let proxy = ReqwestProxy::all(candidate.url("http"))?;
                http_round_trip(proxy, &self.targets.http_url, timeout).await
            }
            ProxyType::Https => {
                let proxy = ReqwestProxy::all(candidate.url("http"))?;
                http_round_trip(proxy, &self.targets.https_url, timeout).await
            }
            ProxyType::Socks4 => {
                let mut stream = connect(candidate).await?;
                socks4_connect(&mut stream, &self.targets.socks_host, self.targets.socks_port)
                    .await
            }
            ProxyType::Socks5 => {
                let mut stream = connect(candidate).await?;
                socks5_connect(&mut stream, &self.targets.socks_host, self.targets.socks_port)
                    .await
            }
        }
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn probe(
        &self,
        candidate: &Candidate,
        proxy_type: ProxyType,
        timeout: Duration,
    ) -> ProbeOutcome {
        let start = Instant::now();

        match tokio::time::timeout(timeout, self.attempt(candidate, proxy_type, timeout)).await {
            Ok(Ok(())) => ProbeOutcome::passed(start.elapsed().as_millis() as u64),
            Ok(Err(e)) => ProbeOutcome::failed(e.to_string()),
            Err(_) => ProbeOutcome::timeout(),
        }
    }
}

/// GET `url` through `proxy`; any 2xx counts
async fn http_round_trip(
    proxy: ReqwestProxy,
    url: &str,
    timeout: Duration,
) -> Result<(), ProbeError> {
    let client = Client::builder()
        .proxy(proxy)
        .timeout(timeout)
        .danger_accept_invalid_certs(true)
        .build()?;

    let response = client.get(url).send().await?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(ProbeError::Status(response.status().as_u16()))
    }
}

async fn connect(candidate: &Candidate) -> Result<TcpStream, ProbeError> {
    Ok(TcpStream::connect((candidate.host(), candidate.port())).await?)
}

/// SOCKS4 CONNECT, using the SOCKS4a form when `host` is not an IPv4 literal
pub async fn socks4_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = vec![0x04, 0x01];
    request.extend_from_slice(&port.to_be_bytes());
    match host.parse::<Ipv4Addr>() {
        Ok(ip) => {
            request.extend_from_slice(&ip.octets());
            request.push(0x00);
        }
        Err(_) => {
            request.extend_from_slice(&[0, 0, 0, 1]);
            request.push(0x00);
            request.extend_from_slice(host.as_bytes());
            request.push(0x00);
        }
    }
    stream.write_all(&request).await?;

    let mut response = [0u8; 8];
    stream.read_exact(&mut response).await?;

    if response[1] == SOCKS4_GRANTED {
        Ok(())
    } else {
        Err(ProbeError::Rejected(format!("CD={}", response[1])))
    }
}

/// SOCKS5 no-auth greeting followed by CONNECT to `host:port`
pub async fn socks5_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[0x05, 0x01, SOCKS5_NO_AUTH]).await?;

    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting[0] != 0x05 {
        return Err(ProbeError::Rejected(format!("version {}", greeting[0])));
    }
    if greeting[1] != SOCKS5_NO_AUTH {
        return Err(ProbeError::Rejected(format!("requires method {}", greeting[1])));
    }

    let mut request = vec![0x05, 0x01, 0x00];
    match host.parse::<Ipv4Addr>() {
        Ok(ip) => {
            request.push(0x01);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let name = host.as_bytes();
            if name.len() > 255 {
                return Err(ProbeError::Rejected("target host name too long".to_string()));
            }
            request.push(0x03);
            request.push(name.len() as u8);
            request.extend_from_slice(name);
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != 0x05 {
        return Err(ProbeError::Rejected(format!("version {}", header[0])));
    }
    if header[1] != SOCKS5_SUCCEEDED {
        return Err(ProbeError::Rejected(format!("REP={}", header[1])));
    }

    // BND.ADDR + BND.PORT
    let remaining = match header[3] {
        0x01 => 4 + 2,
        0x04 => 16 + 2,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize + 2
        }
        other => return Err(ProbeError::Rejected(format!("ATYP={other}"))),
    };
    let mut bound = vec![0u8; remaining];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_probe_targets_default() {
        let targets = ProbeTargets::default();
        assert_eq!(targets.http_url, DEFAULT_HTTP_TEST_URL);
        assert_eq!(targets.https_url, DEFAULT_HTTPS_TEST_URL);
        assert_eq!(targets.socks_host, "httpbin.org");
        assert_eq!(targets.socks_port, 80);
    }

    #[tokio::test]
    async fn test_socks4a_request_and_grant() {
        let (mut client, mut server) = duplex(256);

        let proxy = tokio::spawn(async move {
            let mut request = vec![0u8; 8 + 1 + "httpbin.org".len() + 1];
            server.read_exact(&mut request).await.unwrap();
            server
                .write_all(&[0x00, 0x5a, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            request
        });

        socks4_connect(&mut client, "httpbin.org", 80).await.unwrap();
        let request = proxy.await.unwrap();

        assert_eq!(&request[..4], &[0x04, 0x01, 0x00, 0x50]);
        assert_eq!(&request[4..8], &[0, 0, 0, 1]);
        assert_eq!(request[8], 0x00);
        assert_eq!(&request[9..20], b"httpbin.org");
        assert_eq!(request[20], 0x00);
    }

    #[tokio::test]
    async fn test_socks4_rejection() {
        let (mut client, mut server) = duplex(256);

        tokio::spawn(async move {
            let mut request = [0u8; 9];
            server.read_exact(&mut request).await.unwrap();
            server
                .write_all(&[0x00, 0x5b, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let result = socks4_connect(&mut client, "10.0.0.1", 80).await;
        assert!(matches!(result, Err(ProbeError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_socks5_domain_connect() {
        let (mut client, mut server) = duplex(256);

        let proxy = tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0x00]).await.unwrap();

            let mut request = vec![0u8; 5 + "httpbin.org".len() + 2];
            server.read_exact(&mut request).await.unwrap();
            server
                .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x1f, 0x90])
                .await
                .unwrap();
            (greeting, request)
        });

        socks5_connect(&mut client, "httpbin.org", 80).await.unwrap();
        let (greeting, request) = proxy.await.unwrap();

        assert_eq!(greeting, [0x05, 0x01, 0x00]);
        assert_eq!(&request[..5], &[0x05, 0x01, 0x00, 0x03, 11]);
        assert_eq!(&request[5..16], b"httpbin.org");
        assert_eq!(&request[16..], &[0x00, 0x50]);
    }

    #[tokio::test]
    async fn test_socks5_requires_auth_is_failure() {
        let (mut client, mut server) = duplex(256);

        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0xff]).await.unwrap();
        });

        let result = socks5_connect(&mut client, "httpbin.org", 80).await;
        assert!(matches!(result, Err(ProbeError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_socks5_connect_refused_by_proxy() {
        let (mut client, mut server) = duplex(256);

        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0x00]).await.unwrap();
            let mut request = [0u8; 10];
            server.read_exact(&mut request).await.unwrap();
            server
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let result = socks5_connect(&mut client, "10.0.0.1", 80).await;
        assert!(matches!(result, Err(ProbeError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_closed_port_fails_without_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = NetworkProber::default();
        let candidate = Candidate::new("127.0.0.1", port);
        for proxy_type in [ProxyType::Socks4, ProxyType::Socks5] {
            let outcome = prober
                .probe(&candidate, proxy_type, Duration::from_secs(2))
                .await;
            assert!(!outcome.is_passed());
        }
    }
}

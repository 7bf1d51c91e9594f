use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use super::types::{Headers, Request, Response};

/// The network fetch primitive.
///
/// Treated as a black box: no timeout is imposed here, so a fetch is bounded
/// only by the transport's own behavior. An `Err` means the request never
/// produced a response (offline, DNS, connection reset); HTTP error statuses
/// are `Ok` responses.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// HTTP network client
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("swcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self::from_client(client))
  }

  /// Wrap a preconfigured client (proxies, timeouts, roots).
  pub fn from_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid request method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in request.headers.iter() {
      builder = builder.header(name, value);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status();
    let url = response.url().clone();
    // Every field, repeats and non-ASCII values included
    let headers: Headers = response
      .headers()
      .iter()
      .map(|(name, value)| (name.as_str(), value.as_bytes()))
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
      url: Some(url),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;
  use url::Url;

  const RAW_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Set-Cookie: a=1\r\n\
Set-Cookie: b=2\r\n\
Link: </x.js>; rel=preload\r\n\
Link: </y.js>; rel=preload\r\n\
X-Label: caf\xe9\r\n\
Content-Length: 2\r\n\
Connection: close\r\n\
\r\n\
ok";

  async fn serve_once(raw: &'static [u8]) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = [0u8; 4096];
      let _ = socket.read(&mut buf).await;
      socket.write_all(raw).await.unwrap();
      socket.shutdown().await.unwrap();
    });
    Url::parse(&format!("http://{}/page", addr)).unwrap()
  }

  #[tokio::test]
  async fn test_fetch_keeps_every_header_field() {
    let url = serve_once(RAW_RESPONSE).await;
    let network = HttpNetwork::from_client(reqwest::Client::builder().no_proxy().build().unwrap());

    let response = network.fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"ok");
    assert_eq!(response.headers.get_all("set-cookie").count(), 2);
    let links: Vec<_> = response.headers.get_all("link").collect();
    assert_eq!(
      links,
      vec![&b"</x.js>; rel=preload"[..], &b"</y.js>; rel=preload"[..]]
    );
    assert_eq!(response.headers.get("x-label"), Some(&b"caf\xe9"[..]));
  }
}

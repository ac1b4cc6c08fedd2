//! Local HTTP server for tests.
//!
//! Serves small interactive HTML pages so browser-dependent tests never
//! touch the network. The server runs as a background task on an ephemeral
//! port and is aborted when the fixture is dropped.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use warp::Filter;

pub struct TestServer {
    addr: SocketAddr,
    server: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let index = warp::path::end().map(|| {
            warp::reply::html(
                r#"<!DOCTYPE html>
<html lang="en">
<head>
    <title>Studio Fixture</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
</head>
<body>
    <h1>Studio Fixture</h1>
    <p>Interactive fixture page for executor and recording tests.</p>
    <input id="query" placeholder="Search" />
    <button id="go" onclick="document.getElementById('out').textContent = document.getElementById('query').value">Go</button>
    <select id="lang">
        <option value="en">English</option>
        <option value="de">German</option>
    </select>
    <p id="out"></p>
    <p><a href="/noisy">Noisy page</a></p>
</body>
</html>"#,
            )
        });

        // Emits console output on load so console-capture tests have
        // something to collect.
        let noisy = warp::path("noisy").map(|| {
            warp::reply::html(
                r#"<!DOCTYPE html>
<html lang="en">
<head><title>Noisy Page</title></head>
<body>
    <h1>Noisy Page</h1>
    <script>
        console.log('hello from fixture', 42);
        console.warn('fixture warning');
        setTimeout(() => { throw new Error('fixture exception'); }, 10);
    </script>
</body>
</html>"#,
            )
        });

        let tall = warp::path("tall").map(|| {
            warp::reply::html(
                r#"<!DOCTYPE html>
<html lang="en">
<head><title>Tall Page</title></head>
<body>
    <h1 id="top">Top</h1>
    <div style="height: 4000px"></div>
    <h1 id="bottom">Bottom</h1>
</body>
</html>"#,
            )
        });

        let routes = index.or(noisy).or(tall);

        // The listener is bound before bind_ephemeral returns, so the
        // address is usable as soon as the task is spawned.
        let (addr, serving) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        let server = tokio::spawn(serving);

        Self { addr, server }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    #[allow(dead_code)]
    pub fn page_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Confirm the listener accepts connections before pointing a browser
    /// at it. Probes the socket directly; no HTTP round trip needed.
    #[allow(dead_code)]
    pub async fn wait_ready(&self) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if tokio::net::TcpStream::connect(self.addr).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("test server on {} never accepted a connection", self.addr);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

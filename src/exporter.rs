use std::time::Duration;

use anyhow::{bail, Context};

pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8123";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Columns of the tagged index table, in wire order.
pub const TAGGED_COLUMNS: &str = "Date, Tag1, Path, Tags, Version";

/// Receives one fully encoded insert at a time.
pub trait Transport: Send {
    /// `format` names the encoding of `body`, e.g. `RowBinary`.
    fn send(&mut self, format: &str, body: &[u8]) -> anyhow::Result<()>;
    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn insert_query(table: &str, format: &str) -> String {
    format!("INSERT INTO {table} ({TAGGED_COLUMNS}) FORMAT {format}")
}

/// Posts inserts to the ClickHouse HTTP interface.
#[derive(Debug)]
pub struct HttpTransport {
    client: ureq::Agent,
    url: String,
    table: String,
}
impl HttpTransport {
    pub fn new(url: String, table: String, timeout: Duration) -> Self {
        let url = if url.is_empty() {
            DEFAULT_ADDRESS.to_owned()
        } else {
            url
        };
        let client = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { client, url, table }
    }
}
impl Transport for HttpTransport {
    /// Blocking I/O
    fn send(&mut self, format: &str, body: &[u8]) -> anyhow::Result<()> {
        let query = insert_query(&self.table, format);
        let resp = self
            .client
            .post(&self.url)
            .query("query", &query)
            .send_bytes(body);
        match resp {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                bail!("clickhouse response status {status}: {}", body.trim_end())
            }
            Err(e) => Err(e).with_context(|| format!("failed to post to {}", self.url)),
        }
    }
}

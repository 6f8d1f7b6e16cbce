use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS operators (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  image TEXT NOT NULL DEFAULT '',
  description TEXT NOT NULL DEFAULT '',
  deployment_type TEXT NOT NULL DEFAULT '',
  cost BIGINT,
  user_id TEXT NOT NULL,
  pub BOOLEAN NOT NULL DEFAULT FALSE,
  config_values JSONB NOT NULL DEFAULT '[]'::jsonb,
  inputs JSONB NOT NULL DEFAULT '[]'::jsonb,
  outputs JSONB NOT NULL DEFAULT '[]'::jsonb
);
CREATE INDEX IF NOT EXISTS operators_user_id_idx ON operators (user_id);
"#;

#[derive(Clone)]
pub struct OperatorDb {
    client: Arc<Mutex<Client>>,
}

impl OperatorDb {
    pub async fn connect(database_url: &str, connect_timeout: Duration) -> Result<Self> {
        let (client, connection) =
            tokio::time::timeout(connect_timeout, tokio_postgres::connect(database_url, NoTls))
                .await
                .map_err(|_| anyhow!("postgres connect timed out after {connect_timeout:?}"))?
                .context("connect to postgres")?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!(reason = %error, "operator postgres connection error");
            }
        });

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    pub async fn migrate(&self) -> Result<()> {
        self.client
            .lock()
            .await
            .batch_execute(SCHEMA)
            .await
            .context("create operators schema")
    }

    pub fn client(&self) -> Arc<Mutex<Client>> {
        self.client.clone()
    }
}

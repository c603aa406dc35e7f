use std::path::Path;
use std::sync::Arc;

use deadpool_postgres::{Config as PgConfig, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime};
use postgres_types::ToSql;
use tokio_postgres::NoTls;
use tracing::{debug, error, info};

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::types::{DecodedEvent, FieldValue};

/// Postgres connection pool. Broken connections are dropped and replaced on checkout.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl Database {
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut pg_config = PgConfig::new();
        pg_config.host = Some(cfg.host.clone());
        pg_config.port = Some(cfg.port);
        pg_config.user = Some(cfg.user.clone());
        pg_config.password = Some(cfg.password.clone());
        pg_config.dbname = Some(cfg.name.clone());

        Self::create(pg_config, cfg.max_connections).await
    }

    /// Pool over a `postgresql://` connection string.
    pub async fn connect_url(url: &str, max_connections: usize) -> Result<Self, StoreError> {
        let mut pg_config = PgConfig::new();
        pg_config.url = Some(url.to_string());

        Self::create(pg_config, max_connections).await
    }

    async fn create(mut pg_config: PgConfig, max_connections: usize) -> Result<Self, StoreError> {
        let size = max_connections.max(1);
        pg_config.pool = Some(PoolConfig::new(size));
        // Verified recycling runs a query on checkout and replaces dead connections.
        pg_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Verified,
        });

        let pool = pg_config.create_pool(Some(Runtime::Tokio1), NoTls)?;
        let db = Self { pool };
        db.ping().await?;

        info!("PostgreSQL pool ready with max_size: {}", size);
        Ok(db)
    }

    pub async fn client(&self) -> Result<Object, StoreError> {
        Ok(self.pool.get().await?)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.client().await?.execute("SELECT 1", &[]).await?;
        Ok(())
    }

    pub async fn apply_schema(&self, sql: &str) -> Result<(), StoreError> {
        self.client().await?.batch_execute(sql).await?;
        Ok(())
    }

    pub async fn apply_schema_file(&self, path: &Path) -> Result<(), StoreError> {
        let sql = tokio::fs::read_to_string(path).await?;
        self.apply_schema(&sql).await?;
        info!("Applied schema from {}", path.display());
        Ok(())
    }
}

/// Quote a SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(String),
    BigInt(i64),
    Bool(bool),
    /// Decimal text cast to `numeric` in the placeholder.
    Numeric(String),
}

impl SqlValue {
    fn from_field(value: &FieldValue) -> Self {
        match value {
            FieldValue::Int(i) => SqlValue::Numeric(i.to_string()),
            FieldValue::Bool(b) => SqlValue::Bool(*b),
            other => SqlValue::Text(other.to_string()),
        }
    }

    fn placeholder(&self, position: usize) -> String {
        match self {
            SqlValue::Numeric(_) => format!("${position}::text::numeric"),
            _ => format!("${position}"),
        }
    }

    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlValue::Text(s) | SqlValue::Numeric(s) => s,
            SqlValue::BigInt(i) => i,
            SqlValue::Bool(b) => b,
        }
    }
}

/// Parameterized insert of one decoded event into the relation named after it.
#[derive(Debug, Clone)]
pub struct InsertStatement {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl InsertStatement {
    pub fn for_event(event: &DecodedEvent) -> Result<Self, StoreError> {
        let block_number =
            i64::try_from(event.block_number).map_err(|_| StoreError::BlockNumberOverflow(event.block_number))?;

        let mut columns = vec![
            quote_ident("name"),
            quote_ident("blockNumber"),
            quote_ident("transactionHash"),
            quote_ident("contractAddress"),
        ];
        let mut values = vec![
            SqlValue::Text(event.name.clone()),
            SqlValue::BigInt(block_number),
            SqlValue::Text(format!("{:#x}", event.transaction_hash)),
            SqlValue::Text(event.contract_address.to_checksum(None)),
        ];
        for field in &event.fields {
            columns.push(quote_ident(&field.name));
            values.push(SqlValue::from_field(&field.value));
        }

        let placeholders: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, v)| v.placeholder(i + 1))
            .collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
            quote_ident(&event.name.to_lowercase()),
            columns.join(", "),
            placeholders.join(", ")
        );

        Ok(Self { sql, values })
    }

    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values.iter().map(SqlValue::as_sql).collect()
    }
}

/// Receiver of decoded events. Dispatch must not block the caller.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: DecodedEvent);
}

#[derive(Clone)]
pub struct EventWriter {
    db: Arc<Database>,
}

impl EventWriter {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert the event row. Returns the number of rows written, 0 for a duplicate.
    pub async fn persist(&self, event: &DecodedEvent) -> Result<u64, StoreError> {
        let statement = InsertStatement::for_event(event)?;
        let client = self.db.client().await?;
        let rows = client.execute(statement.sql.as_str(), &statement.params()).await?;

        debug!(
            "Persisted {} in tx {:#x} at block {} ({} rows)",
            event.name, event.transaction_hash, event.block_number, rows
        );
        Ok(rows)
    }
}

impl EventSink for EventWriter {
    fn dispatch(&self, event: DecodedEvent) {
        let writer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = writer.persist(&event).await {
                error!(
                    "Failed to persist {} in tx {:#x}: {}",
                    event.name, event.transaction_hash, e
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecodedField;
    use alloy_primitives::{Address, B256};
    use num_bigint::BigInt;

    fn transfer() -> DecodedEvent {
        DecodedEvent {
            name: "Transfer".to_string(),
            block_number: 100,
            transaction_hash: B256::repeat_byte(0xab),
            contract_address: Address::repeat_byte(0x11),
            fields: vec![
                DecodedField {
                    name: "from".to_string(),
                    value: FieldValue::Address(Address::repeat_byte(0x01)),
                },
                DecodedField {
                    name: "to".to_string(),
                    value: FieldValue::Address(Address::repeat_byte(0x02)),
                },
                DecodedField {
                    name: "value".to_string(),
                    value: FieldValue::Int(BigInt::from(1000)),
                },
            ],
        }
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("blockNumber"), r#""blockNumber""#);
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }

    #[test]
    fn test_insert_statement_for_transfer() {
        let statement = InsertStatement::for_event(&transfer()).unwrap();

        assert_eq!(
            statement.sql,
            r#"INSERT INTO "transfer" ("name", "blockNumber", "transactionHash", "contractAddress", "from", "to", "value") VALUES ($1, $2, $3, $4, $5, $6, $7::text::numeric) ON CONFLICT DO NOTHING"#
        );
        assert_eq!(statement.values.len(), 7);
        assert_eq!(statement.values[0], SqlValue::Text("Transfer".to_string()));
        assert_eq!(statement.values[1], SqlValue::BigInt(100));
        assert_eq!(statement.values[2], SqlValue::Text(format!("0x{}", "ab".repeat(32))));
        assert_eq!(
            statement.values[4],
            SqlValue::Text(Address::repeat_byte(0x01).to_checksum(None))
        );
        assert_eq!(statement.values[6], SqlValue::Numeric("1000".to_string()));
        assert_eq!(statement.params().len(), 7);
    }

    #[test]
    fn test_field_value_bindings() {
        assert_eq!(SqlValue::from_field(&FieldValue::Bool(true)), SqlValue::Bool(true));
        assert_eq!(
            SqlValue::from_field(&FieldValue::Int(BigInt::from(-3))),
            SqlValue::Numeric("-3".to_string())
        );
        assert_eq!(
            SqlValue::from_field(&FieldValue::IndexedHash(B256::repeat_byte(0x01))),
            SqlValue::Text(format!("0x{}", "01".repeat(32)))
        );
        assert_eq!(
            SqlValue::from_field(&FieldValue::List(vec![FieldValue::Int(BigInt::from(1))])),
            SqlValue::Text(r#"["1"]"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_unreachable_database_reports_pool_error() {
        let cfg = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            name: "indexer".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections: 2,
            schema_path: None,
        };

        let result = Database::connect(&cfg).await;
        assert!(matches!(result, Err(StoreError::Pool(_))));
    }

    #[test]
    fn test_block_number_overflow() {
        let mut event = transfer();
        event.block_number = u64::MAX;

        assert!(matches!(
            InsertStatement::for_event(&event),
            Err(StoreError::BlockNumberOverflow(u64::MAX))
        ));
    }
}

//! Built-in driver for PostgreSQL sources, speaking the wire protocol through `tokio-postgres`.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use core::pin::Pin;
use core::task::{Context, Poll};
use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;
use reqwest::Url;
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, Connection, NoTls, Row, RowStream, Socket};
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{ErrorKind, EtlResult};
use crate::source::{QueryResult, ResolvedConnection, SourceConnection, SourceDriver};
use crate::types::{Cell, ColumnMetadata};
use crate::{bail, etl_error};

/// JDBC class name of the PostgreSQL driver.
pub const POSTGRES_DRIVER_CLASS_NAME: &str = "org.postgresql.Driver";

/// URL prefix accepted by [`PostgresDriver`].
const POSTGRES_URL_PREFIX: &str = "jdbc:postgresql:";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;

/// Looks up the underlying name of a result column from its originating table and attribute.
const COLUMN_NAME_QUERY: &str =
    "select attname from pg_catalog.pg_attribute where attrelid = $1 and attnum = $2";

/// Driver for `jdbc:postgresql:` URLs.
///
/// Connections are made without TLS, so an `sslmode` that requires encryption is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

#[async_trait]
impl SourceDriver for PostgresDriver {
    fn class_name(&self) -> &'static str {
        POSTGRES_DRIVER_CLASS_NAME
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with(POSTGRES_URL_PREFIX)
    }

    async fn connect(&self, connection: ResolvedConnection) -> EtlResult<Box<dyn SourceConnection>> {
        let config = build_config(&connection)?;

        let (client, pg_connection) = config.connect(NoTls).await.map_err(|err| {
            etl_error!(
                ErrorKind::SourceConnectionFailed,
                "Failed to connect to PostgreSQL",
                source: err
            )
        })?;
        spawn_postgres_connection::<NoTls>(pg_connection);

        info!("connected to postgres source");

        Ok(Box::new(PostgresConnection { client }))
    }
}

fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        match connection.await {
            Err(err) => error!("an error occurred during the postgres connection: {}", err),
            Ok(()) => debug!("postgres connection terminated"),
        }
    }
    .instrument(span);

    // The connection task ends on its own once the owning `Client` is dropped.
    tokio::spawn(task);
}

/// Host, port and database parts of a `jdbc:postgresql:` URL, plus its query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PostgresUrl {
    hosts: Vec<(String, u16)>,
    database: Option<String>,
    parameters: Vec<(String, String)>,
}

/// Parses `jdbc:postgresql://host[:port][,host[:port]...]/database?key=value&...` as well as the
/// short `jdbc:postgresql:database` form, which connects to the default host.
fn parse_url(url: &str) -> EtlResult<PostgresUrl> {
    let Some(rest) = url.strip_prefix(POSTGRES_URL_PREFIX) else {
        bail!(
            ErrorKind::ConfigError,
            "Connection URL is not a PostgreSQL JDBC URL"
        );
    };

    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (rest, None),
    };

    let (hosts, database) = match location.strip_prefix("//") {
        Some(authority_and_path) => {
            let (authority, path) = match authority_and_path.split_once('/') {
                Some((authority, path)) => (authority, path),
                None => (authority_and_path, ""),
            };

            (parse_hosts(authority)?, path)
        }
        None => (
            vec![(DEFAULT_HOST.to_owned(), DEFAULT_PORT)],
            location,
        ),
    };

    let parameters = match query {
        Some(query) => parse_query(query)?,
        None => vec![],
    };

    Ok(PostgresUrl {
        hosts,
        database: (!database.is_empty()).then(|| database.to_owned()),
        parameters,
    })
}

fn parse_hosts(authority: &str) -> EtlResult<Vec<(String, u16)>> {
    if authority.is_empty() {
        return Ok(vec![(DEFAULT_HOST.to_owned(), DEFAULT_PORT)]);
    }

    authority
        .split(',')
        .map(|host| {
            let (name, port) = match host.rsplit_once(':') {
                Some((name, port)) => {
                    let port = port.parse::<u16>().map_err(|_| {
                        etl_error!(
                            ErrorKind::ConfigError,
                            "Connection URL has an invalid port",
                            format!("host `{name}`")
                        )
                    })?;
                    (name, port)
                }
                None => (host, DEFAULT_PORT),
            };

            if name.is_empty() {
                bail!(ErrorKind::ConfigError, "Connection URL has an empty host");
            }

            Ok((name.to_owned(), port))
        })
        .collect()
}

/// Decodes the `key=value&...` query of the URL, percent-decoding names and values.
fn parse_query(query: &str) -> EtlResult<Vec<(String, String)>> {
    let mut url = Url::parse(POSTGRES_URL_PREFIX).map_err(|err| {
        etl_error!(
            ErrorKind::ConfigError,
            "Failed to parse connection URL parameters",
            source: err
        )
    })?;
    url.set_query(Some(query));

    Ok(url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect())
}

/// Builds the `tokio-postgres` configuration for `connection`.
///
/// Parameters are applied in order of increasing precedence: URL query parameters, explicit
/// connection properties, then the resolved username and password.
fn build_config(connection: &ResolvedConnection) -> EtlResult<Config> {
    let url = parse_url(connection.url.expose_secret())?;

    let mut config = Config::new();
    for (host, port) in &url.hosts {
        config.host(host);
        config.port(*port);
    }
    if let Some(database) = &url.database {
        config.dbname(database);
    }

    let properties = url.parameters.iter().map(|(key, value)| (key.as_str(), value.as_str())).chain(
        connection
            .properties
            .iter()
            .map(|(key, value)| (key.as_str(), value.expose_secret().as_str())),
    );
    for (key, value) in properties {
        apply_property(&mut config, key, value)?;
    }

    if let Some(username) = &connection.username {
        config.user(username.expose_secret());
    }
    if let Some(password) = &connection.password {
        config.password(password.expose_secret());
    }

    Ok(config)
}

fn apply_property(config: &mut Config, key: &str, value: &str) -> EtlResult<()> {
    match key {
        "user" => {
            config.user(value);
        }
        "password" => {
            config.password(value);
        }
        "ApplicationName" => {
            config.application_name(value);
        }
        "options" => {
            config.options(value);
        }
        "connectTimeout" => {
            let seconds = value.trim().parse::<u64>().map_err(|_| {
                etl_error!(
                    ErrorKind::MalformedProperties,
                    "Connection property `connectTimeout` is not a number of seconds",
                    value
                )
            })?;
            // Zero means no timeout.
            if seconds > 0 {
                config.connect_timeout(Duration::from_secs(seconds));
            }
        }
        "sslmode" => {
            let ssl_mode = match value {
                "disable" => SslMode::Disable,
                "allow" | "prefer" => SslMode::Prefer,
                _ => bail!(
                    ErrorKind::SourceConnectionFailed,
                    "Unsupported sslmode for the PostgreSQL driver",
                    format!("sslmode `{value}` requires TLS, which is not available")
                ),
            };
            config.ssl_mode(ssl_mode);
        }
        _ => warn!(property = key, "ignoring unknown postgres connection property"),
    }

    Ok(())
}

struct PostgresConnection {
    client: Client,
}

impl PostgresConnection {
    /// Returns the name of the table column behind a result column, or an empty string for
    /// computed columns.
    async fn column_name(&self, column: &tokio_postgres::Column) -> EtlResult<String> {
        let (Some(table_oid), Some(column_id)) = (column.table_oid(), column.column_id()) else {
            return Ok(String::new());
        };

        let row = self
            .client
            .query_opt(COLUMN_NAME_QUERY, &[&table_oid, &column_id])
            .await?;

        Ok(match row {
            Some(row) => row.try_get::<_, String>(0)?,
            None => String::new(),
        })
    }
}

#[async_trait]
impl SourceConnection for PostgresConnection {
    async fn execute(self: Box<Self>, query: &str) -> EtlResult<QueryResult> {
        let statement = self.client.prepare(query).await?;

        let mut columns = Vec::with_capacity(statement.columns().len());
        let mut column_types = Vec::with_capacity(statement.columns().len());
        for column in statement.columns() {
            let Some(column_type) = PostgresColumnType::from_type(column.type_()) else {
                bail!(
                    ErrorKind::UnsupportedType,
                    "Source column has an unsupported type",
                    format!(
                        "column `{}` has SQL type `{}`",
                        column.name(),
                        column.type_().name()
                    )
                );
            };

            let name = self.column_name(column).await?;
            columns.push(ColumnMetadata::new(
                column.name(),
                name,
                column_type.jdbc_type_name(),
            ));
            column_types.push(column_type);
        }

        debug!(columns = columns.len(), "prepared source query");

        let rows = self
            .client
            .query_raw(&statement, std::iter::empty::<&(dyn ToSql + Sync)>())
            .await?;

        let rows = PostgresRowStream {
            _client: self.client,
            rows,
        };

        Ok(QueryResult {
            columns,
            rows: rows
                .map(move |row| decode_row(&row?, &column_types))
                .boxed(),
        })
    }
}

pin_project! {
    /// Rows of a running query. Owns the client so the connection stays open until the rows are
    /// exhausted or dropped.
    struct PostgresRowStream {
        _client: Client,
        #[pin]
        rows: RowStream,
    }
}

impl Stream for PostgresRowStream {
    type Item = Result<Row, tokio_postgres::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().rows.poll_next(cx)
    }
}

/// PostgreSQL column types the driver can decode.
///
/// A query whose result has a column of any other type is rejected before rows are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostgresColumnType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Timestamp,
    TimestampTz,
    Date,
    Bytea,
}

impl PostgresColumnType {
    #[cfg(test)]
    const ALL: [PostgresColumnType; 11] = [
        Self::Bool,
        Self::Int2,
        Self::Int4,
        Self::Int8,
        Self::Float4,
        Self::Float8,
        Self::Text,
        Self::Timestamp,
        Self::TimestampTz,
        Self::Date,
        Self::Bytea,
    ];

    fn from_type(pg_type: &Type) -> Option<Self> {
        let column_type = match *pg_type {
            Type::BOOL => Self::Bool,
            Type::INT2 => Self::Int2,
            Type::INT4 => Self::Int4,
            Type::INT8 => Self::Int8,
            Type::FLOAT4 => Self::Float4,
            Type::FLOAT8 => Self::Float8,
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Self::Text,
            Type::TIMESTAMP => Self::Timestamp,
            Type::TIMESTAMPTZ => Self::TimestampTz,
            Type::DATE => Self::Date,
            Type::BYTEA => Self::Bytea,
            _ => return None,
        };

        Some(column_type)
    }

    /// JDBC type name reported in the column metadata.
    fn jdbc_type_name(self) -> &'static str {
        match self {
            Self::Bool => "BOOLEAN",
            Self::Int2 => "SMALLINT",
            Self::Int4 => "INTEGER",
            Self::Int8 => "BIGINT",
            Self::Float4 => "REAL",
            Self::Float8 => "DOUBLE",
            Self::Text => "VARCHAR",
            Self::Timestamp => "TIMESTAMP",
            Self::TimestampTz => "TIMESTAMP_WITH_TIMEZONE",
            Self::Date => "DATE",
            Self::Bytea => "BINARY",
        }
    }

    fn decode(self, row: &Row, index: usize) -> EtlResult<Cell> {
        let cell = match self {
            Self::Bool => row.try_get::<_, Option<bool>>(index)?.into(),
            Self::Int2 => row.try_get::<_, Option<i16>>(index)?.map(i64::from).into(),
            Self::Int4 => row.try_get::<_, Option<i32>>(index)?.map(i64::from).into(),
            Self::Int8 => row.try_get::<_, Option<i64>>(index)?.into(),
            Self::Float4 => row.try_get::<_, Option<f32>>(index)?.map(f64::from).into(),
            Self::Float8 => row.try_get::<_, Option<f64>>(index)?.into(),
            Self::Text => row.try_get::<_, Option<String>>(index)?.into(),
            Self::Timestamp => row
                .try_get::<_, Option<NaiveDateTime>>(index)?
                .map(|timestamp| timestamp.and_utc())
                .into(),
            Self::TimestampTz => row
                .try_get::<_, Option<chrono::DateTime<Utc>>>(index)?
                .into(),
            Self::Date => row
                .try_get::<_, Option<NaiveDate>>(index)?
                .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
                .into(),
            Self::Bytea => row.try_get::<_, Option<Vec<u8>>>(index)?.into(),
        };

        Ok(cell)
    }
}

fn decode_row(row: &Row, column_types: &[PostgresColumnType]) -> EtlResult<Vec<Cell>> {
    column_types
        .iter()
        .enumerate()
        .map(|(index, column_type)| column_type.decode(row, index))
        .collect()
}

use gcp_bigquery_client::Client;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::query_parameter::QueryParameter;
use gcp_bigquery_client::model::query_parameter_type::QueryParameterType;
use gcp_bigquery_client::model::query_parameter_value::QueryParameterValue;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::ResultSet;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use serde_json::Value;
use std::fmt;
use std::sync::Once;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::load::staging::StagingStore;
use crate::load::warehouse::Warehouse;
use crate::load::{LoadMode, StagedLoad};
use crate::types::{DestinationTable, FieldMode, FieldSchema, FieldType, TableSchema};
use crate::{bail, etl_error};

/// Maximum number of rows sent in one streaming insert request.
const MAX_ROWS_PER_INSERT: usize = 500;

/// Scratch tables left behind by a crashed run expire after this many hours.
const SCRATCH_TABLE_EXPIRATION_HOURS: u32 = 24;

static INIT_CRYPTO: Once = Once::new();

/// Installs the AWS LC provider as the process wide rustls provider, once.
///
/// Another provider installed earlier is left in place.
pub fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Warehouse backed by Google BigQuery.
///
/// A commit streams the staged rows into a scratch table created with the destination's schema,
/// then moves them into the destination with a single multi-statement transaction. Truncate
/// loads delete the existing rows inside the same transaction, so readers observe either the old
/// or the new contents. The scratch table is dropped afterwards.
pub struct BigQueryWarehouse {
    project_id: String,
    client: Client,
}

impl BigQueryWarehouse {
    /// Creates a warehouse authenticating with a service account key in JSON form.
    pub async fn new_with_key(project_id: String, service_account_key: &str) -> EtlResult<Self> {
        install_crypto_provider();

        let key = parse_service_account_key(service_account_key).map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "Invalid BigQuery service account key",
                source: err
            )
        })?;
        let client = Client::from_service_account_key(key, false)
            .await
            .map_err(|err| bq_error_to_etl_error(err, ErrorKind::ConfigError))?;

        Ok(Self { project_id, client })
    }

    fn project_of<'a>(&'a self, table: &'a DestinationTable) -> &'a str {
        table.project.as_deref().unwrap_or(&self.project_id)
    }

    fn full_table_name(&self, table: &DestinationTable) -> String {
        format!(
            "`{}.{}.{}`",
            self.project_of(table),
            table.dataset,
            table.table
        )
    }

    async fn query(&self, request: QueryRequest) -> Result<ResultSet, BQError> {
        let query_response = self.client.job().query(&self.project_id, request).await?;

        Ok(ResultSet::new_from_query_response(query_response))
    }

    async fn execute(&self, sql: String) -> EtlResult<()> {
        debug!(%sql, "executing bigquery statement");

        self.query(QueryRequest::new(sql))
            .await
            .map_err(|err| bq_error_to_etl_error(err, ErrorKind::LoadCommitFailed))?;

        Ok(())
    }

    /// Streams the rows of every staged batch into `scratch`.
    async fn copy_to_scratch<S>(
        &self,
        scratch: &DestinationTable,
        staging: &S,
        load: &StagedLoad,
    ) -> EtlResult<u64>
    where
        S: StagingStore,
    {
        let mut written = 0;

        for batch in load.batches() {
            let data = staging.read(&batch.key).await?;
            let rows = data
                .split(|byte| *byte == b'\n')
                .filter(|line| !line.is_empty())
                .map(serde_json::from_slice::<Value>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| {
                    etl_error!(
                        ErrorKind::LoadStagingIoFailed,
                        "Staged batch is not valid newline-delimited JSON",
                        staging.location(&batch.key),
                        source: err
                    )
                })?;

            for chunk in rows.chunks(MAX_ROWS_PER_INSERT) {
                self.insert_rows(scratch, chunk).await?;
                written += chunk.len() as u64;
            }
        }

        Ok(written)
    }

    async fn insert_rows(&self, table: &DestinationTable, rows: &[Value]) -> EtlResult<()> {
        let mut request = TableDataInsertAllRequest::new();
        for row in rows {
            request
                .add_row(None, row)
                .map_err(|err| bq_error_to_etl_error(err, ErrorKind::SerializationError))?;
        }

        let response = self
            .client
            .tabledata()
            .insert_all(
                self.project_of(table),
                &table.dataset,
                &table.table,
                request,
            )
            .await
            .map_err(|err| bq_error_to_etl_error(err, ErrorKind::LoadCommitFailed))?;

        if let Some(insert_errors) = response.insert_errors
            && !insert_errors.is_empty()
        {
            bail!(
                ErrorKind::LoadSchemaValidationFailed,
                "BigQuery rejected staged rows",
                format!(
                    "{} of {} rows rejected by {table}",
                    insert_errors.len(),
                    rows.len()
                )
            );
        }

        Ok(())
    }
}

impl fmt::Debug for BigQueryWarehouse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryWarehouse")
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// Converts a BigQuery error to an [`EtlError`], using `fallback` for errors without a more
/// specific load kind.
fn bq_error_to_etl_error(err: BQError, fallback: ErrorKind) -> EtlError {
    let (kind, description) = match &err {
        BQError::ResponseError { error } => match error.error.code {
            404 => (
                ErrorKind::DestinationTableMissing,
                "BigQuery table or dataset not found",
            ),
            429 => (ErrorKind::LoadQuotaExceeded, "BigQuery rate limit exceeded"),
            403 if error.error.message.to_ascii_lowercase().contains("quota") => {
                (ErrorKind::LoadQuotaExceeded, "BigQuery quota exceeded")
            }
            400 => (
                ErrorKind::LoadSchemaValidationFailed,
                "BigQuery rejected the load",
            ),
            _ => (fallback, "BigQuery response error"),
        },
        _ => (fallback, "BigQuery request failed"),
    };

    etl_error!(kind, description, err.to_string(), source: err)
}

fn field_from_column(name: String, data_type: &str, is_nullable: &str) -> EtlResult<FieldSchema> {
    let Some(field_type) = FieldType::from_type_name(data_type) else {
        bail!(
            ErrorKind::UnsupportedType,
            "Destination field has an unsupported type",
            format!("field `{name}` has type `{data_type}`")
        );
    };

    let mode = if is_nullable.eq_ignore_ascii_case("NO") {
        FieldMode::Required
    } else {
        FieldMode::Nullable
    };

    Ok(FieldSchema::new(name, field_type, mode))
}

/// Builds the transaction moving the rows of `scratch` into `target`.
fn commit_script(target: &str, scratch: &str, schema: &TableSchema, mode: LoadMode) -> String {
    let columns = schema
        .field_names()
        .map(|name| format!("`{name}`"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut script = String::from("begin transaction;\n");
    if mode == LoadMode::Truncate {
        script.push_str(&format!("delete from {target} where true;\n"));
    }
    script.push_str(&format!(
        "insert into {target} ({columns}) select {columns} from {scratch};\n"
    ));
    script.push_str("commit transaction;");

    script
}

fn string_parameter(name: &str, value: &str) -> QueryParameter {
    QueryParameter {
        name: Some(name.to_owned()),
        parameter_type: Some(QueryParameterType {
            r#type: "STRING".to_owned(),
            array_type: None,
            struct_types: None,
        }),
        parameter_value: Some(QueryParameterValue {
            value: Some(value.to_owned()),
            array_values: None,
            struct_values: None,
        }),
    }
}

impl Warehouse for BigQueryWarehouse {
    fn name() -> &'static str {
        "bigquery"
    }

    async fn table_schema(&self, table: &DestinationTable) -> EtlResult<TableSchema> {
        let query = format!(
            "select column_name, data_type, is_nullable from `{}.{}.INFORMATION_SCHEMA.COLUMNS` \
             where table_name = @table_name order by ordinal_position",
            self.project_of(table),
            table.dataset
        );
        let mut request = QueryRequest::new(query);
        request.query_parameters = Some(vec![string_parameter("table_name", &table.table)]);

        let mut result_set = self
            .query(request)
            .await
            .map_err(|err| bq_error_to_etl_error(err, ErrorKind::DestinationTableMissing))?;

        let mut fields = Vec::new();
        while result_set.next_row() {
            let column = |name: &str| -> EtlResult<String> {
                result_set
                    .get_string_by_name(name)
                    .map_err(|err| bq_error_to_etl_error(err, ErrorKind::DeserializationError))?
                    .ok_or_else(|| {
                        etl_error!(
                            ErrorKind::DeserializationError,
                            "BigQuery schema query returned a null column",
                            name
                        )
                    })
            };

            let column_name = column("column_name")?;
            let data_type = column("data_type")?;
            let is_nullable = column("is_nullable")?;
            fields.push(field_from_column(column_name, &data_type, &is_nullable)?);
        }

        if fields.is_empty() {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Destination table does not exist",
                table
            );
        }

        Ok(TableSchema::new(fields))
    }

    async fn commit<S>(
        &self,
        table: &DestinationTable,
        schema: &TableSchema,
        staging: &S,
        load: &StagedLoad,
        mode: LoadMode,
    ) -> EtlResult<u64>
    where
        S: StagingStore,
    {
        let scratch = table.sibling(format!(
            "{}_load_{}",
            table.table,
            load.run_id().replace('-', "_")
        ));

        self.execute(format!(
            "create table {} like {} options (expiration_timestamp = timestamp_add(current_timestamp(), interval {SCRATCH_TABLE_EXPIRATION_HOURS} hour))",
            self.full_table_name(&scratch),
            self.full_table_name(table)
        ))
        .await?;

        let result = match self.copy_to_scratch(&scratch, staging, load).await {
            Ok(written) => {
                let script = commit_script(
                    &self.full_table_name(table),
                    &self.full_table_name(&scratch),
                    schema,
                    mode,
                );
                self.execute(script).await.map(|()| written)
            }
            Err(err) => Err(err),
        };

        if let Err(err) = self
            .execute(format!(
                "drop table if exists {}",
                self.full_table_name(&scratch)
            ))
            .await
        {
            warn!(table = %scratch, error = %err, "failed to drop bigquery scratch table, it will expire");
        }

        let written = result?;
        info!(%table, %mode, rows = written, "committed load into bigquery");

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_information_schema_columns() {
        let field = field_from_column("id".to_owned(), "INT64", "NO").unwrap();
        assert_eq!(field, FieldSchema::required("id", FieldType::Int64));

        let field = field_from_column("name".to_owned(), "STRING", "YES").unwrap();
        assert_eq!(field, FieldSchema::nullable("name", FieldType::String));

        let err = field_from_column("amount".to_owned(), "NUMERIC", "YES").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
    }

    #[test]
    fn truncate_deletes_inside_the_transaction() {
        let schema = TableSchema::new(vec![
            FieldSchema::required("id", FieldType::Int64),
            FieldSchema::nullable("full_name", FieldType::String),
        ]);

        let script = commit_script("`p.d.users`", "`p.d.users_load_1`", &schema, LoadMode::Truncate);

        assert_eq!(
            script,
            "begin transaction;\n\
             delete from `p.d.users` where true;\n\
             insert into `p.d.users` (`id`, `full_name`) select `id`, `full_name` from `p.d.users_load_1`;\n\
             commit transaction;"
        );

        let script = commit_script("`p.d.users`", "`p.d.users_load_1`", &schema, LoadMode::Append);
        assert!(!script.contains("delete"));
    }
}

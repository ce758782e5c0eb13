use thiserror::Error;

/// Configuration validation errors.
///
/// Messages never embed the value of credential-bearing fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required text field is empty.
    #[error("`{0}` must not be empty")]
    MissingField(&'static str),
    /// The connection URL is neither a `jdbc:` URL nor base64 ciphertext.
    #[error("`connection_url` must be a `jdbc:` URL or a base64 encoded ciphertext")]
    InvalidConnectionUrl,
    /// A field looks like ciphertext but no key was configured to decrypt it.
    #[error(
        "`{0}` looks like base64 encoded ciphertext but no `kms_encryption_key` is configured"
    )]
    EncryptedValueWithoutKey(&'static str),
    /// The connection properties contain characters outside of the allowed set.
    #[error(
        "`connection_properties` must match the format `[propertyName=property;]*` and contain only allowed characters"
    )]
    InvalidConnectionProperties,
    /// The KMS key name is not a fully qualified crypto key resource name.
    #[error(
        "`kms_encryption_key` must have the form `projects/<project>/locations/<location>/keyRings/<ring>/cryptoKeys/<key>`, got `{0}`"
    )]
    InvalidKmsKeyName(String),
    /// The output table is not a valid table reference.
    #[error("`output_table` must have the form `<project>:<dataset>.<table>`, got `{0}`")]
    InvalidOutputTable(String),
    /// A KMS key was set but no key-management backend is configured.
    #[error("`kms_encryption_key` is set but no `kms` backend is configured")]
    MissingKmsBackend,
    /// A field value violates a constraint.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}

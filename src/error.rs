use aws_sdk_dynamodb::error::{BuildError, DisplayErrorContext, SdkError};
use thiserror::Error;

/// Result type alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to DynamoDB or handling table files.
#[derive(Error, Debug)]
pub enum Error {
    #[error("AWS SDK error: {0}")]
    AwsSdk(String),

    #[error("failed to build request: {0}")]
    Build(#[from] BuildError),

    #[error("item conversion failed: {0}")]
    Conversion(#[from] serde_dynamo::Error),

    #[error("{count} items remained unprocessed after {attempts} attempts")]
    Unprocessed { count: usize, attempts: usize },

    #[error("transaction holds {count} actions, DynamoDB accepts at most {max}")]
    TransactionTooLarge { count: usize, max: usize },

    #[error("timeout waiting for table '{table_name}' to {state}")]
    TableWaitTimeout { table_name: String, state: &'static str },

    #[error("item is missing one of the key attributes {0:?}")]
    MissingKey(Vec<String>),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unknown index '{0}'")]
    UnknownIndex(String),

    #[error("invalid entity manager config: {0}")]
    Config(String),

    #[error("table definition file: {0}")]
    TableFile(String),

    #[error("transform for version {version} failed: {message}")]
    Transform { version: String, message: String },

    #[error("operation cancelled by user")]
    UserCancelled,

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl<E, R> From<SdkError<E, R>> for Error
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    fn from(err: SdkError<E, R>) -> Self {
        Error::AwsSdk(DisplayErrorContext(&err).to_string())
    }
}

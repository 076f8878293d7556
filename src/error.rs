use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FactError {
    #[error("{table}.{column} references unknown key {key}")]
    #[diagnostic(help("fix the submission so every referenced row is present in the batch"))]
    ReferentialViolation {
        table: String,
        column: String,
        key: String,
    },

    #[error("duplicate key in {table}: {key}")]
    DuplicateKey { table: String, key: String },

    #[error("containment cycle in {graph} through {node}")]
    #[diagnostic(help("rerun with --cycle-policy truncate to tolerate cyclic containment"))]
    ContainmentCycle { graph: String, node: String },

    #[error("unknown {vocabulary} term: {id}")]
    UnknownTerm { vocabulary: String, id: String },

    #[error("invalid term id: {0}")]
    InvalidTermId(String),

    #[error("invalid entity key (expected NAMESPACE::LOCAL_ID): {0}")]
    InvalidEntityKey(String),

    #[error("invalid statistics dimension: {0}")]
    InvalidDimension(String),

    #[error("failed to parse {table} line {line}: {message}")]
    TableParse {
        table: String,
        line: usize,
        message: String,
    },

    #[error("missing column {column} in {table}")]
    MissingColumn { table: String, column: String },

    #[error("missing config file c2m2-facts.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no submission sources configured")]
    NoSources,

    #[error("failed to serialise {0}")]
    Serialization(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("too many rows for 32-bit surrogates: {0}")]
    SurrogateOverflow(usize),

    #[error("not found: {0}")]
    NotFound(String),
}

impl FactError {
    pub fn referential(table: &str, column: &str, key: impl ToString) -> Self {
        FactError::ReferentialViolation {
            table: table.to_string(),
            column: column.to_string(),
            key: key.to_string(),
        }
    }
}

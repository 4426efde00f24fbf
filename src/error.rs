use std::num::ParseIntError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoschedError {
    #[error("Unit {unit}: min-members declaration {value:?} is invalid")]
    InvalidMinMembers {
        unit: String,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Unit {unit}: min-members declaration {value} is less than 1")]
    NonPositiveMinMembers { unit: String, value: i64 },

    #[error("Listing error: {0}")]
    Listing(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoschedError>;

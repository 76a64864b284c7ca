pub mod constants;
pub mod error;
pub mod types;

pub use error::{OracleError, Result};
pub use types::{
    Address, OracleHash, PendingRequest, Record, SignRequest, SignResponse, Signature, Timestamp,
    TrustedSet,
};

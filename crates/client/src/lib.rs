//! StudySpark Client
//!
//! Uploads a PDF to the bucket and follows its processing record until a
//! summary (or an error) shows up, then lets the user ask for extra study
//! artifacts on the finished record.

mod machine;
mod sync;
mod upload;

pub use machine::{
    Phase, SessionMachine, SessionSnapshot, PROCESSING_FAILED_MESSAGE, UPLOAD_FAILED_MESSAGE,
};
pub use sync::SyncClient;
pub use upload::{BlobUploader, Uploader};

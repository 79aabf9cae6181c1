pub mod keys;
pub mod observation;
pub mod report;
pub mod result;

pub use keys::BlockKey;
pub use keys::KeyError;
pub use keys::UpkeepIdentifier;
pub use keys::UpkeepKey;
pub use observation::ObservationError;
pub use observation::UpkeepObservation;
pub use report::decode_report;
pub use report::encode_report;
pub use report::PerformDataWrapper;
pub use report::ReportError;
pub use result::UpkeepFailureReason;
pub use result::UpkeepResult;
pub use result::UpkeepState;

pub type UpkeepResults = Vec<UpkeepResult>;

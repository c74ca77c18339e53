/// Document-store record identifiers are opaque strings assigned on create.
pub type DocId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

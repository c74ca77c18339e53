//! Record models stored in the document store.

pub mod job;

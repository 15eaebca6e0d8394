//! End-to-end sync runs against in-memory stores, recording connections,
//! and a mock HTTP destination.

mod support;

mod database_sync_test;
mod http_sync_test;

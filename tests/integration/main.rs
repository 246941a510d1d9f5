//! Integration tests: the three services wired together over one store.

mod harness;

mod concurrency;
mod conservation;
mod idempotence;
mod scenario;

//! End-to-end suites for the broker.

mod support;

//! Service and request channel tests.

mod serve_test;

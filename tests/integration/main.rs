//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the server against
//! in-memory sockets. No real network is needed.

mod mock_net;
mod server_tests;

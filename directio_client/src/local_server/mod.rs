mod handlers;
mod server;

pub use server::{LocalServer, LocalServerConfig, LocalTestServer, TEST_ACCESS_KEY_ID};

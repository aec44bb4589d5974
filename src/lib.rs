// Root app shell: demo scene helpers plus re-exports for the binary and tests.
pub use data_runtime as data;
pub use net_core as net;
pub use server_core as server;
pub mod demo;

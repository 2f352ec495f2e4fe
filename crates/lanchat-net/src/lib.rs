// LAN networking: multicast group channel, file transfer over TCP and the
// bounded worker pool every listener hands its connections to.

pub mod error;
pub mod group;
pub mod pool;
pub mod transfer;

pub use error::NetError;
pub use group::{GroupChannel, GroupNotification};
pub use pool::{run_accept_loop, WorkerPool};
pub use transfer::{fetch_file, TransferServer};

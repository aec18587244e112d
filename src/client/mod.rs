//! Client side of the cluster
//!
//! - `session`: one multiplexed TCP connection per server
//! - `pool`: sessions keyed by address, replaced when they die
//! - `meta`: partition configuration lookup with leader following
//! - `table`: hash key to partition/primary routing
//! - `pegasus`: the public `PegasusClient`

pub mod meta;
pub mod pegasus;
pub mod pool;
pub mod session;
pub mod table;

pub use meta::MetaResolver;
pub use pegasus::{ClientState, PegasusClient};
pub use pool::SessionPool;
pub use session::ReplicaSession;
pub use table::{Route, RoutingTable};

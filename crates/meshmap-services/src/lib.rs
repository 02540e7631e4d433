//! meshmap-services — the replication core: content store, peer link
//! manager, fan-out broadcaster, RPC transport, and the node surface
//! that ties them together.

pub mod broadcast;
pub mod history;
pub mod node;
pub mod peers;
pub mod rpc;
pub mod store;

pub use broadcast::{Broadcaster, PeerErrors};
pub use history::{persist_loop, HistoryStore};
pub use node::{method, Node};
pub use peers::{reconcile_loop, PeerLinkManager, PeerStatus};
pub use rpc::{RpcClient, RpcError, RpcService};
pub use store::{sweep_loop, ContentStore, StoreError, StoredEntry};

// # Distributed Transaction Module
//
// XA support: the Xid value key, the pooled XA backend session wrapper and
// its factory, and the per-connection-hash transaction registry that pins
// each branch to one backend session.

pub mod pool;
pub mod registry;
pub mod session;
pub mod xid;

pub use registry::{XaBranchState, XaRegistries, XaSlot, XaTransactionRegistry};
pub use session::XaBackendSession;
pub use xid::{flags, XidKey};

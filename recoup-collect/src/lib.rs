//! Collection execution layer.
//!
//! The boundary between the ledger and the outside world during a
//! collection attempt:
//!
//! - **Ports**: interfaces to the upstream balance source and the external
//!   repayment engine (adapters out of scope; stubs provided for tests)
//! - **Balance Refresh Controller**: single-flight, timeout-bounded,
//!   cache-assisted balance refresh with audit-on-failure
//! - **Collection executor**: one attempt end to end (refresh, speculative
//!   payment, fire-and-forget dispatch)

#![warn(clippy::all)]

mod error;
mod executor;
mod ports;
mod refresh;
mod stub;

pub use error::{BalanceError, CollectError, EngineError};
pub use executor::CollectionExecutor;
pub use ports::{
    BalanceSnapshot, BalanceSourcePort, CollectionTask, FetchContext, RepaymentEnginePort,
};
pub use refresh::{BalanceRefresh, BalanceRefresher, RefreshOptions};
pub use stub::{StubBalanceSource, StubRepaymentEngine};

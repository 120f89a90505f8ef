pub mod error;
pub mod ledger;
pub mod query;
pub mod records;
pub mod txn;

pub use error::LedgerError;
pub use ledger::LedgerStore;
pub use query::{Page, PageRequest};
pub use txn::LedgerTxn;

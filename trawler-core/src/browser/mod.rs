pub mod backend;
pub mod error;
pub mod page;
pub mod pool;

pub use backend::{BrowserBackend, ChromiumBackend, ChromiumHandle};
pub use error::{BrowserError, BrowserResult};
pub use page::PageLease;
pub use pool::{BrowserLease, BrowserPool, PoolOptions, PoolStats};

pub mod config;
pub mod dispatch;
pub mod exception;
pub mod param;
pub mod queue;
pub mod registry;
pub mod request;
pub mod response;
pub mod rwlock;
pub mod server;
pub mod storage;

pub use config::{Config, LockPolicy};
pub use dispatch::{Dispatcher, Outcome, Stage};
pub use exception::Exception;
pub use param::{HttpRequestMethod, HttpVersion};
pub use queue::BoundedQueue;
pub use registry::LockRegistry;
pub use request::Request;
pub use response::Response;
pub use rwlock::{LockStats, Priority, PriorityRwLock};
pub use server::{Server, ServerHandle, ServerStats};
pub use storage::{FileStorage, Storage, Transfer};

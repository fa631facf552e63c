pub mod backend;
pub mod error;
mod http;
mod name;
mod table;

pub use crate::backend::{Cache, CacheStore};
pub use crate::http::{CacheMode, Headers, Method, Request, RequestMode, Response, ResponseKind};
pub use crate::name::validate as validate_name;
pub use crate::table::{Database, Table};
use std::sync::Arc;

pub type StoreHandle = Arc<dyn CacheStore + Send + Sync>;
pub type CacheHandle = Arc<dyn Cache + Send + Sync>;

//! Request Module
//!
//! The request-facing layer: the request model, payload parsers, the decoded
//! object cache and the coordinator that ties them to the cache tiers.

mod coordinator;
mod decoded;
mod parser;
mod query;
mod result;

pub use coordinator::{CacheHit, FetchTicket, Fetcher, RequestCacheCoordinator, Submission};
pub use decoded::{AnyValue, DecodedObjectCache};
pub use parser::{BoolParser, IntegerParser, Parser, Preprocessor, SimpleParser, TextParser};
pub use query::{CachePolicy, DecodedCacheMode, Request, CACHE_TIME_ONE_DAY};
pub use result::{
    FailureKind, NetworkFailure, NetworkResponse, QueryCallback, ResultCode, ResultInfo,
};

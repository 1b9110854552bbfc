//! Requests this node sends to peers, and may receive from them.

pub(crate) mod filters;
pub(crate) mod get_data;
pub(crate) mod get_headers;

pub use filters::{GetCFCheckpt, GetCFHeaders, GetCFilters};
pub use get_data::GetData;
pub use get_headers::{GetBlocks, GetHeaders, MAX_LOCATOR_SIZE};

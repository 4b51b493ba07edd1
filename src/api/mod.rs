mod client;
mod types;

pub use client::ApiClient;
pub use types::{ApiErrorBody, DeleteAck, ListParams, Page, Sort, SortDirection, DEFAULT_PAGE_SIZE};

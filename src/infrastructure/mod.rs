pub mod cache;
pub mod feed_parser;
pub mod http_client;
pub mod rate_limit;
pub mod security_headers;
pub mod ssrf;
pub mod worker_pool;

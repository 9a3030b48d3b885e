pub mod fetcher;
pub mod parser;

pub use fetcher::ReqwestFeedFetcher;
pub use parser::parse_feed;

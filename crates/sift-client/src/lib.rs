pub mod extractor;
pub mod fetcher;

pub use extractor::{SelectorConfig, SelectorExtractor};
pub use fetcher::ReqwestFetcher;

pub mod crawler;
pub mod kind;

pub use crawler::ResourceCrawler;
pub use kind::{ArticleKind, CrawlKind, FeedKind, ImageKind};

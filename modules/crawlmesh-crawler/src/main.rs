use std::sync::Arc;
use std::time::Duration;

use crawlmesh_broker::Broker;
use crawlmesh_common::Config;
use crawlmesh_crawler::{ArticleKind, FeedKind, ImageKind, ResourceCrawler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::crawler_from_env();
    config.log_redacted();

    let broker = Broker::connect(
        &config.broker.uri,
        Duration::from_secs(config.broker.connection_timeout_secs),
    )
    .await?;

    let retrieve_timeout = Duration::from_secs(config.crawler.retrieve_timeout_secs);
    let query_exclude = config.crawler.canonical_url_query_exclude.clone();

    let feeds = Arc::new(ResourceCrawler::new(
        FeedKind,
        broker.clone(),
        retrieve_timeout,
        query_exclude.clone(),
    ));
    let articles = Arc::new(ResourceCrawler::new(
        ArticleKind,
        broker.clone(),
        retrieve_timeout,
        query_exclude.clone(),
    ));
    let images = Arc::new(ResourceCrawler::new(ImageKind, broker, retrieve_timeout, query_exclude));

    tracing::info!("crawler starting: feed, article, and image workers");

    tokio::try_join!(feeds.run(), articles.run(), images.run())?;

    Ok(())
}

use anyhow::Result;
use clap::Parser;
use rickbot::CrawlerBuilder;

#[derive(Parser, Debug)]
#[command(name = "crawl")]
#[command(about = "Breadth-first crawl of every subdomain reachable from a seed URL")]
struct Cli {
    /// Seed URL; must begin with http:// or https://
    url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();
    let crawler = CrawlerBuilder::new().build()?;
    crawler.run(&args.url).await?;
    Ok(())
}

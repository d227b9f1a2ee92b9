use anyhow::Result;

use crate::config::Config;
use crate::iliad::IliadClient;
use crate::models::SourceListing;

/// Print the vendor sources visible with the configured credentials.
pub async fn list_sources(config: &Config) -> Result<()> {
    let client = IliadClient::new(config)?;
    let listing = client.list_sources().await?;
    print_listing(&listing, &config.iliad.source_prefix);
    Ok(())
}

fn print_listing(listing: &SourceListing, prefix: &str) {
    println!("{:<32} {:<10} LISTED", "SOURCE", "VISIBILITY");
    for (names, visibility) in [
        (&listing.global_sources, "global"),
        (&listing.private_sources, "private"),
    ] {
        for name in names {
            let listed = name.starts_with(prefix);
            println!("{:<32} {:<10} {}", name, visibility, listed);
        }
    }
}

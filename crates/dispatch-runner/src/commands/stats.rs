//! Stats command - success rate from the request journal.

use crate::error::AppResult;
use inference_client::Journal;

pub async fn run(journal: &Journal) -> AppResult<()> {
    let stats = journal.stats().await?;

    println!("Journal: {}", journal.path().display());
    println!(
        "Success rate: {:.2}% ({}/{} attempts)",
        stats.success_rate(),
        stats.succeeded,
        stats.total
    );

    Ok(())
}

//! Store statistics and health overview.
//!
//! Summarizes what has been processed: file counts per owner and folder,
//! chunk counts, embedding coverage, and when each folder last saw a
//! processed file. Used by `docbridge stats` to confirm that processing
//! and merges are landing.

use docbridge_core::store::KnowledgeBase;
use sqlx::Row;

use crate::error::Result;
use crate::fsutil;
use crate::services::Services;

/// Per-folder breakdown of processed files.
struct FolderStats {
    owner: String,
    path: String,
    file_count: i64,
    last_processed_ms: Option<i64>,
}

/// Run the stats command: query both stores and print a summary.
pub async fn run_stats(services: &Services) -> Result<()> {
    let config = &services.config;
    let kb = services.knowledge_base.stats().await?;
    let dimension = services.knowledge_base.dimension().await?;
    let files = services.state.count_files().await?;
    let last_processed = services.state.last_processed_at().await?;

    let state_size = fsutil::tree_size(&config.state.path);
    let kb_size = fsutil::tree_size(&config.knowledge_base.path);

    println!("docbridge: Store Stats");
    println!("======================");
    println!();
    println!("  State store:     {}", config.state.path.display());
    println!("  Size:            {}", format_bytes(state_size));
    println!("  Knowledge base:  {}", config.knowledge_base.path.display());
    println!("  Size:            {}", format_bytes(kb_size));
    println!();
    println!("  Files:       {}", files);
    println!(
        "  Last run:    {}",
        last_processed
            .map(|ms| format_ts_relative(ms / 1000))
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Chunks:      {}", kb.total_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        kb.embedded_chunks,
        kb.total_chunks,
        if kb.total_chunks > 0 {
            (kb.embedded_chunks * 100) / kb.total_chunks
        } else {
            0
        }
    );
    println!(
        "  Dimension:   {}",
        dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    );

    let rows = sqlx::query(
        r#"
        SELECT o.name AS owner, f.path AS path,
               COUNT(p.id) AS file_count,
               MAX(p.processed_at) AS last_processed
        FROM watched_folders f
        JOIN owners o ON o.id = f.owner_id
        LEFT JOIN processed_files p ON p.folder_id = f.id
        GROUP BY f.id
        ORDER BY o.name, f.path
        "#,
    )
    .fetch_all(services.state.pool())
    .await?;

    let folders: Vec<FolderStats> = rows
        .iter()
        .map(|row| FolderStats {
            owner: row.get("owner"),
            path: row.get("path"),
            file_count: row.get("file_count"),
            last_processed_ms: row.get("last_processed"),
        })
        .collect();

    if !folders.is_empty() {
        println!();
        println!("  By folder:");
        println!(
            "  {:<12} {:<40} {:>6}   {}",
            "OWNER", "FOLDER", "FILES", "LAST PROCESSED"
        );
        println!("  {}", "-".repeat(76));

        for f in &folders {
            let last = match f.last_processed_ms {
                Some(ms) => format_ts_relative(ms / 1000),
                None => "never".to_string(),
            };
            println!(
                "  {:<12} {:<40} {:>6}   {}",
                f.owner, f.path, f.file_count, last
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp (seconds) as a relative time string.
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_relative_timestamps() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now - 5), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}

//! Index outputs written per TLP label.
//!
//! After all advisories of a provider are mirrored, three documents are
//! written for each label: `changes.csv` (sorted by current release,
//! newest first), `index.txt` (enumeration order) and the mirror's own
//! ROLIE feed `csaf-feed-tlp-<label>.json`.

use crate::error::Result;
use crate::models::AdvisorySummary;
use crate::rolie::{Content, Entry, EntrySummary, FeedData, Format, Link, RolieFeed};
use chrono::{Datelike, SecondsFormat, Utc};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One mirrored advisory as recorded for the index outputs.
#[derive(Debug, Clone)]
pub struct SummaryEntry {
    /// The on-disk filename chosen for the advisory.
    pub filename: String,
    /// The summary extracted from the advisory body.
    pub summary: AdvisorySummary,
    /// The upstream URL the advisory was mirrored from.
    pub url: String,
}

impl SummaryEntry {
    /// The year-partitioned relative path, e.g. `2024/acme-2024-01.json`.
    fn relative_path(&self) -> String {
        format!(
            "{}/{}",
            self.summary.initial_release_date.year(),
            self.filename
        )
    }
}

fn label_dir(dir: &Path, label: &str) -> Result<std::path::PathBuf> {
    let path = dir.join(label);
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Write `<label>/changes.csv`: rows of `(current release, year/filename)`,
/// sorted by current release descending, no header.
pub fn write_changes_csv(dir: &Path, label: &str, entries: &[SummaryEntry]) -> Result<()> {
    // Do not sort in place.
    let mut sorted: Vec<&SummaryEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| {
        b.summary
            .current_release_date
            .cmp(&a.summary.current_release_date)
    });

    let path = label_dir(dir, label)?.join("changes.csv");
    let mut out = csv::Writer::from_path(path)?;
    for entry in sorted {
        out.write_record([
            entry
                .summary
                .current_release_date
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            entry.relative_path(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

/// Write `<label>/index.txt`: one `year/filename` per line, in enumeration
/// order.
pub fn write_index_txt(dir: &Path, label: &str, entries: &[SummaryEntry]) -> Result<()> {
    let path = label_dir(dir, label)?.join("index.txt");
    let mut out = BufWriter::new(File::create(path)?);
    for entry in entries {
        writeln!(out, "{}", entry.relative_path())?;
    }
    out.flush()?;
    Ok(())
}

/// Write the mirror's own ROLIE feed for one label.
pub fn write_rolie_feed(
    dir: &Path,
    domain: &str,
    provider_name: &str,
    label: &str,
    entries: &[SummaryEntry],
) -> Result<()> {
    let feed_name = format!("csaf-feed-tlp-{label}.json");
    let provider_base = format!("{domain}/.well-known/csaf-aggregator/{provider_name}");
    let feed_url = format!("{provider_base}/{feed_name}");

    let feed_entries = entries
        .iter()
        .map(|entry| {
            let csaf_url = format!("{provider_base}/{label}/{}", entry.relative_path());
            Entry {
                id: entry.summary.id.clone(),
                title: entry.summary.title.clone(),
                link: vec![Link {
                    rel: "self".to_string(),
                    href: csaf_url.clone(),
                }],
                published: Some(entry.summary.initial_release_date),
                updated: Some(entry.summary.current_release_date),
                summary: entry.summary.summary.clone().map(|content| EntrySummary {
                    content,
                }),
                format: Some(Format::csaf()),
                content: Some(Content {
                    content_type: "application/json".to_string(),
                    src: csaf_url,
                }),
            }
        })
        .collect();

    let mut feed = RolieFeed {
        feed: FeedData {
            id: format!("csaf-feed-tlp-{label}"),
            title: format!("CSAF feed (TLP:{})", label.to_uppercase()),
            link: vec![Link {
                rel: "self".to_string(),
                href: feed_url,
            }],
            updated: Some(Utc::now()),
            entry: feed_entries,
        },
    };
    feed.feed.sort_entries_by_updated();

    let mut out = BufWriter::new(File::create(dir.join(feed_name))?);
    serde_json::to_writer(&mut out, &feed)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(id: &str, initial: &str, current: &str) -> SummaryEntry {
        SummaryEntry {
            filename: format!("{id}.json"),
            summary: AdvisorySummary {
                id: id.to_string(),
                title: format!("Advisory {id}"),
                summary: None,
                initial_release_date: initial.parse().unwrap(),
                current_release_date: current.parse().unwrap(),
            },
            url: format!("https://p.test/{id}.json"),
        }
    }

    fn entries() -> Vec<SummaryEntry> {
        vec![
            entry("a-1", "2024-01-10T00:00:00Z", "2024-01-10T00:00:00Z"),
            entry("a-2", "2024-01-20T00:00:00Z", "2024-02-01T00:00:00Z"),
        ]
    }

    #[test]
    fn test_changes_csv_sorted_descending() {
        let dir = tempdir().unwrap();
        write_changes_csv(dir.path(), "white", &entries()).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("white/changes.csv")).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(
            lines,
            vec![
                "2024-02-01T00:00:00Z,2024/a-2.json",
                "2024-01-10T00:00:00Z,2024/a-1.json",
            ]
        );
    }

    #[test]
    fn test_index_txt_enumeration_order() {
        let dir = tempdir().unwrap();
        write_index_txt(dir.path(), "white", &entries()).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("white/index.txt")).unwrap();
        assert_eq!(raw, "2024/a-1.json\n2024/a-2.json\n");
    }

    #[test]
    fn test_rolie_feed_content() {
        let dir = tempdir().unwrap();
        write_rolie_feed(
            dir.path(),
            "https://agg.example",
            "acme",
            "white",
            &entries(),
        )
        .unwrap();

        let raw =
            std::fs::read_to_string(dir.path().join("csaf-feed-tlp-white.json")).unwrap();
        let feed: RolieFeed = serde_json::from_str(&raw).unwrap();

        // Sorted by updated descending: a-2 first.
        assert_eq!(feed.feed.entry[0].id, "a-2");
        assert_eq!(feed.feed.entry[1].id, "a-1");

        let self_link = &feed.feed.entry[0].link[0];
        assert_eq!(self_link.rel, "self");
        assert_eq!(
            self_link.href,
            "https://agg.example/.well-known/csaf-aggregator/acme/white/2024/a-2.json"
        );
        assert!(!self_link.href.contains("./well-known"));

        let content = feed.feed.entry[0].content.as_ref().unwrap();
        assert_eq!(content.content_type, "application/json");
        assert_eq!(content.src, self_link.href);
        assert!(feed.feed.entry[0].format.is_some());
    }
}

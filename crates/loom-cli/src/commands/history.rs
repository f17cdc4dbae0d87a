//! Node history commands, operating on a node document file

use anyhow::{Context, Result};
use clap::Subcommand;
use loom_gen::history::DEFAULT_HISTORY_LIMIT;
use loom_gen::{History, NodeDocument};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// Print a node's results
    Show {
        /// Node document file
        file: PathBuf,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Move the cursor by a relative amount
    Navigate {
        /// Node document file
        file: PathBuf,

        /// Steps to move; negative goes back
        #[arg(allow_hyphen_values = true)]
        delta: isize,
    },

    /// Point the cursor at an entry by index
    Select {
        file: PathBuf,
        index: usize,
    },

    /// Remove every entry
    Clear {
        file: PathBuf,
    },
}

pub fn run(cmd: HistoryCommands) -> Result<()> {
    match cmd {
        HistoryCommands::Show { file, format } => {
            let doc = load(&file)?;
            if format == "json" {
                println!("{}", doc.to_json()?);
            } else {
                print_history(&doc);
            }
            Ok(())
        }
        HistoryCommands::Navigate { file, delta } => {
            update(&file, |history| {
                history.navigate(delta);
            })
        }
        HistoryCommands::Select { file, index } => {
            update(&file, |history| {
                history.select(index);
            })
        }
        HistoryCommands::Clear { file } => update(&file, History::clear),
    }
}

fn load(file: &Path) -> Result<NodeDocument> {
    NodeDocument::load(file).with_context(|| format!("loading {}", file.display()))
}

fn update(file: &Path, edit: impl FnOnce(&mut History)) -> Result<()> {
    let doc = load(file)?;
    let mut history = doc.to_history(DEFAULT_HISTORY_LIMIT);
    edit(&mut history);
    let doc = NodeDocument::from_history(&history, doc.last_model_used.as_deref());
    doc.save(file)
        .with_context(|| format!("saving {}", file.display()))?;
    print_history(&doc);
    Ok(())
}

fn print_history(doc: &NodeDocument) {
    if doc.history.is_empty() {
        println!("No results.");
        return;
    }
    println!("{} result(s):\n", doc.history.len());
    for (i, entry) in doc.history.iter().enumerate() {
        let marker = if i == doc.cursor { ">" } else { " " };
        println!(
            "{} {:>3}  {}  {}  {}",
            marker,
            i,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.model_id,
            entry.artifact_path.display()
        );
    }
    if let Some(model) = &doc.last_model_used {
        println!("\nLast model: {}", model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_gen::ResultEntry;

    fn write_doc(dir: &Path, n: usize) -> PathBuf {
        let mut history = History::default();
        for i in 0..n {
            history.append(ResultEntry::new(format!("/r/{}.png", i), "mock-image"));
        }
        let path = dir.join("node.json");
        NodeDocument::from_history(&history, Some("mock-image"))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_navigate_persists_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), 3);

        run(HistoryCommands::Navigate {
            file: path.clone(),
            delta: -2,
        })
        .unwrap();
        assert_eq!(NodeDocument::load(&path).unwrap().cursor, 0);

        run(HistoryCommands::Navigate {
            file: path.clone(),
            delta: 10,
        })
        .unwrap();
        assert_eq!(NodeDocument::load(&path).unwrap().cursor, 2);
    }

    #[test]
    fn test_clear_keeps_last_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), 2);

        run(HistoryCommands::Clear { file: path.clone() }).unwrap();
        let doc = NodeDocument::load(&path).unwrap();
        assert!(doc.history.is_empty());
        assert_eq!(doc.last_model_used.as_deref(), Some("mock-image"));
    }
}

//! `parcel init` command implementation
//!
//! Creates the dataset layout. Existing files are never overwritten, so
//! running it again only fills in what is missing.

use crate::commands::{report_error, Outcome};
use crate::error::Result;
use crate::gitignore::{self, GitignoreChange};
use crate::output;
use parcel_engine::config::CONFIG_FILE;
use parcel_engine::dataset::LEDGER_FILE;
use parcel_engine::{CommandRunner, CommitHook, DatasetLayout, GitCommitHook, MetricsLedger};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Written to new datasets; everything is commented out
const SAMPLE_CONFIG: &str = r#"# Command producing the payload; write to $PARCEL_PATH plus an extension
# cmd = "echo example > $PARCEL_PATH.txt"

# How often `parcel process` exports, and how many complete parcels to keep
# interval = "1 day"
# keep = 5

# [metrics.lines]
# cmd = "wc -l < $PARCEL_PATH"

# [ingest]
# paths = ["~/Downloads/export-*.zip"]
"#;

/// Initialise every dataset in `paths`
pub async fn run(paths: Vec<PathBuf>, git: bool) -> Result<Outcome> {
    let mut outcome = Outcome::Success;
    for path in &paths {
        if let Err(e) = init_dataset(path, git).await {
            outcome = report_error(path, &e);
        }
    }
    Ok(outcome)
}

async fn init_dataset(path: &Path, git: bool) -> Result<()> {
    fs::create_dir_all(path)?;
    let layout = DatasetLayout::new(path);
    layout.ensure_dirs()?;

    output::heading(&path.display().to_string());

    let config_path = layout.config_path();
    if config_path.exists() {
        println!("  Kept:    {}", CONFIG_FILE);
    } else {
        let mut config = SAMPLE_CONFIG.to_string();
        if git {
            config.push_str("\ngit = true\n");
        }
        fs::write(&config_path, config)?;
        println!("  Created: {}", CONFIG_FILE);
    }

    MetricsLedger::new(layout.ledger_path()).initialize()?;
    println!("  Created: data/ incomplete/ log/ {}", LEDGER_FILE);

    if git {
        match gitignore::ensure_section(path)? {
            GitignoreChange::Created => println!("  Created: .gitignore"),
            GitignoreChange::Updated => println!("  Updated: .gitignore"),
            GitignoreChange::Unchanged => {},
        }

        let hook = GitCommitHook::new(CommandRunner::default());
        if hook.init_repository(path).await? {
            println!("  Created: git repository");
        }
        match hook
            .commit(path, "initialize", &[".gitignore", CONFIG_FILE, LEDGER_FILE])
            .await
        {
            Ok(true) => println!("  Committed initial files"),
            Ok(false) => {},
            Err(e) => output::warning(&format!("initial commit failed: {}", e)),
        }
    }

    info!(dataset = %path.display(), git, "Dataset initialized");
    Ok(())
}
